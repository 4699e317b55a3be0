//! Server configuration.
//!
//! Converts CLI-friendly strings ("100M", "allkeys-lru") into the
//! engine's config types and carries the resolved settings.

use cinder_core::EvictionPolicy;

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of SELECT-able logical databases.
    pub databases: u32,
    /// Memory budget in bytes; `None` means unlimited.
    pub max_memory: Option<usize>,
    pub eviction_policy: EvictionPolicy,
    /// Password required from clients; `None` disables AUTH.
    pub requirepass: Option<String>,
    /// Periodic tick frequency in hertz.
    pub hz: u32,
    /// Idle client timeout in seconds; 0 disables the scan.
    pub client_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 6379,
            databases: 16,
            max_memory: None,
            eviction_policy: EvictionPolicy::NoEviction,
            requirepass: None,
            hz: 10,
            client_timeout_secs: 0,
        }
    }
}

/// Parses a human-readable byte size string into a number of bytes.
///
/// Supports suffixes K/KB, M/MB, G/GB (binary multiples); plain numbers
/// are bytes. Case insensitive.
pub fn parse_byte_size(input: &str) -> Result<usize, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty byte size string".into());
    }

    let upper = input.to_ascii_uppercase();

    let (num_str, multiplier) = if let Some(n) = upper.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = upper.strip_suffix('G') {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix('M') {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix('K') {
        (n, 1024)
    } else {
        (upper.as_str(), 1)
    };

    let num: usize = num_str
        .parse()
        .map_err(|_| format!("invalid byte size: '{input}'"))?;

    num.checked_mul(multiplier)
        .ok_or_else(|| format!("byte size overflow: '{input}'"))
}

/// Parses an eviction policy name.
pub fn parse_eviction_policy(input: &str) -> Result<EvictionPolicy, String> {
    match input.to_ascii_lowercase().as_str() {
        "noeviction" => Ok(EvictionPolicy::NoEviction),
        "allkeys-lru" => Ok(EvictionPolicy::AllKeysLru),
        "volatile-lru" => Ok(EvictionPolicy::VolatileLru),
        _ => Err(format!(
            "unknown eviction policy '{input}'. valid options: noeviction, allkeys-lru, volatile-lru"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_bytes() {
        assert_eq!(parse_byte_size("1024").unwrap(), 1024);
    }

    #[test]
    fn parse_kilobytes() {
        assert_eq!(parse_byte_size("100K").unwrap(), 100 * 1024);
        assert_eq!(parse_byte_size("100KB").unwrap(), 100 * 1024);
        assert_eq!(parse_byte_size("100k").unwrap(), 100 * 1024);
    }

    #[test]
    fn parse_megabytes_and_gigabytes() {
        assert_eq!(parse_byte_size("50M").unwrap(), 50 * 1024 * 1024);
        assert_eq!(parse_byte_size("2GB").unwrap(), 2 * 1024 * 1024 * 1024);
    }

    #[test]
    fn parse_empty_is_error() {
        assert!(parse_byte_size("").is_err());
        assert!(parse_byte_size("   ").is_err());
    }

    #[test]
    fn parse_garbage_is_error() {
        assert!(parse_byte_size("abc").is_err());
        assert!(parse_byte_size("M").is_err());
    }

    #[test]
    fn parse_policies() {
        assert_eq!(
            parse_eviction_policy("noeviction").unwrap(),
            EvictionPolicy::NoEviction
        );
        assert_eq!(
            parse_eviction_policy("ALLKEYS-LRU").unwrap(),
            EvictionPolicy::AllKeysLru
        );
        assert_eq!(
            parse_eviction_policy("volatile-lru").unwrap(),
            EvictionPolicy::VolatileLru
        );
        assert!(parse_eviction_policy("random").is_err());
    }
}
