//! Command table and execution pipeline.
//!
//! The table is built once at startup and immutable afterwards. Every
//! incoming request runs the same gate sequence: resolve → arity →
//! protected → auth → MULTI → ACL → memory, then the handler.

use std::collections::HashMap;
use std::sync::OnceLock;

use cinder_core::EvictOutcome;

use crate::acl::AclCheck;
use crate::client::{Client, ClientFlags};
use crate::commands;
use crate::server::ServerContext;
use crate::shared;

/// Byte budget for the args preview in the unknown-command error.
const UNKNOWN_ARGS_PREVIEW: usize = 128;

/// Command behavior bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CmdFlags(u16);

impl CmdFlags {
    pub const NONE: CmdFlags = CmdFlags(0);
    /// May modify the keyspace.
    pub const WRITE: CmdFlags = CmdFlags(1 << 0);
    /// Never modifies the keyspace.
    pub const READONLY: CmdFlags = CmdFlags(1 << 1);
    /// Rejected when memory is over budget and eviction can't help.
    pub const DENY_OOM: CmdFlags = CmdFlags(1 << 2);
    /// Runnable before authentication.
    pub const NO_AUTH: CmdFlags = CmdFlags(1 << 3);
    /// Admin-only; requires explicit enablement.
    pub const PROTECTED: CmdFlags = CmdFlags(1 << 4);
    /// Not allowed inside MULTI.
    pub const NO_MULTI: CmdFlags = CmdFlags(1 << 5);
    /// May park the client on a key.
    pub const BLOCKING: CmdFlags = CmdFlags(1 << 6);
    /// Administrative surface.
    pub const ADMIN: CmdFlags = CmdFlags(1 << 7);
    /// Constant-ish time.
    pub const FAST: CmdFlags = CmdFlags(1 << 8);

    pub fn contains(self, other: CmdFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CmdFlags {
    type Output = CmdFlags;
    fn bitor(self, rhs: CmdFlags) -> CmdFlags {
        CmdFlags(self.0 | rhs.0)
    }
}

pub type Handler = fn(&mut ServerContext, &mut Client);

/// One entry of the command table.
pub struct CommandSpec {
    /// Canonical lowercase name.
    pub name: &'static str,
    /// Positive: exact argc. Negative: minimum argc.
    pub arity: i32,
    pub flags: CmdFlags,
    pub handler: Handler,
    /// Dispatched by argv[1] when non-empty.
    pub subcommands: &'static [CommandSpec],
}

impl CommandSpec {
    /// Human-readable flag names for COMMAND introspection.
    pub fn flag_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        let pairs = [
            (CmdFlags::WRITE, "write"),
            (CmdFlags::READONLY, "readonly"),
            (CmdFlags::DENY_OOM, "denyoom"),
            (CmdFlags::NO_AUTH, "no-auth"),
            (CmdFlags::PROTECTED, "protected"),
            (CmdFlags::NO_MULTI, "no-multi"),
            (CmdFlags::BLOCKING, "blocking"),
            (CmdFlags::ADMIN, "admin"),
            (CmdFlags::FAST, "fast"),
        ];
        for (flag, name) in pairs {
            if self.flags.contains(flag) {
                names.push(name);
            }
        }
        names
    }
}

/// The process-global command table.
pub static COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec {
        name: "hello",
        arity: -1,
        flags: CmdFlags(CmdFlags::NO_AUTH.0 | CmdFlags::FAST.0),
        handler: commands::connection::cmd_hello,
        subcommands: &[],
    },
    CommandSpec {
        name: "auth",
        arity: -2,
        flags: CmdFlags(CmdFlags::NO_AUTH.0 | CmdFlags::FAST.0),
        handler: commands::connection::cmd_auth,
        subcommands: &[],
    },
    CommandSpec {
        name: "select",
        arity: 2,
        flags: CmdFlags(CmdFlags::FAST.0),
        handler: commands::connection::cmd_select,
        subcommands: &[],
    },
    CommandSpec {
        name: "ping",
        arity: -1,
        flags: CmdFlags(CmdFlags::FAST.0),
        handler: commands::connection::cmd_ping,
        subcommands: &[],
    },
    CommandSpec {
        name: "echo",
        arity: 2,
        flags: CmdFlags(CmdFlags::FAST.0),
        handler: commands::connection::cmd_echo,
        subcommands: &[],
    },
    CommandSpec {
        name: "quit",
        arity: -1,
        flags: CmdFlags(CmdFlags::NO_AUTH.0 | CmdFlags::FAST.0),
        handler: commands::connection::cmd_quit,
        subcommands: &[],
    },
    CommandSpec {
        name: "set",
        arity: -3,
        flags: CmdFlags(CmdFlags::WRITE.0 | CmdFlags::DENY_OOM.0),
        handler: commands::string::cmd_set,
        subcommands: &[],
    },
    CommandSpec {
        name: "get",
        arity: 2,
        flags: CmdFlags(CmdFlags::READONLY.0 | CmdFlags::FAST.0),
        handler: commands::string::cmd_get,
        subcommands: &[],
    },
    CommandSpec {
        name: "getex",
        arity: -2,
        flags: CmdFlags(CmdFlags::WRITE.0 | CmdFlags::FAST.0),
        handler: commands::string::cmd_getex,
        subcommands: &[],
    },
    CommandSpec {
        name: "del",
        arity: -2,
        flags: CmdFlags(CmdFlags::WRITE.0),
        handler: commands::keyspace::cmd_del,
        subcommands: &[],
    },
    CommandSpec {
        name: "exists",
        arity: -2,
        flags: CmdFlags(CmdFlags::READONLY.0 | CmdFlags::FAST.0),
        handler: commands::keyspace::cmd_exists,
        subcommands: &[],
    },
    CommandSpec {
        name: "expire",
        arity: 3,
        flags: CmdFlags(CmdFlags::WRITE.0 | CmdFlags::FAST.0),
        handler: commands::keyspace::cmd_expire,
        subcommands: &[],
    },
    CommandSpec {
        name: "ttl",
        arity: 2,
        flags: CmdFlags(CmdFlags::READONLY.0 | CmdFlags::FAST.0),
        handler: commands::keyspace::cmd_ttl,
        subcommands: &[],
    },
    CommandSpec {
        name: "dbsize",
        arity: 1,
        flags: CmdFlags(CmdFlags::READONLY.0 | CmdFlags::FAST.0),
        handler: commands::keyspace::cmd_dbsize,
        subcommands: &[],
    },
    CommandSpec {
        name: "flushdb",
        arity: -1,
        flags: CmdFlags(CmdFlags::WRITE.0),
        handler: commands::keyspace::cmd_flushdb,
        subcommands: &[],
    },
    CommandSpec {
        name: "command",
        arity: -1,
        flags: CmdFlags(CmdFlags::NONE.0),
        handler: commands::server::cmd_command,
        subcommands: &[
            CommandSpec {
                name: "count",
                arity: 2,
                flags: CmdFlags(CmdFlags::NONE.0),
                handler: commands::server::cmd_command_count,
                subcommands: &[],
            },
            CommandSpec {
                name: "docs",
                arity: -2,
                flags: CmdFlags(CmdFlags::NONE.0),
                handler: commands::server::cmd_command_docs,
                subcommands: &[],
            },
        ],
    },
    CommandSpec {
        name: "client",
        arity: -2,
        flags: CmdFlags(CmdFlags::NONE.0),
        handler: commands::connection::cmd_client,
        subcommands: &[
            CommandSpec {
                name: "id",
                arity: 2,
                flags: CmdFlags(CmdFlags::FAST.0),
                handler: commands::connection::cmd_client_id,
                subcommands: &[],
            },
            CommandSpec {
                name: "getname",
                arity: 2,
                flags: CmdFlags(CmdFlags::FAST.0),
                handler: commands::connection::cmd_client_getname,
                subcommands: &[],
            },
            CommandSpec {
                name: "setname",
                arity: 3,
                flags: CmdFlags(CmdFlags::FAST.0),
                handler: commands::connection::cmd_client_setname,
                subcommands: &[],
            },
        ],
    },
];

fn index() -> &'static HashMap<&'static str, &'static CommandSpec> {
    static INDEX: OnceLock<HashMap<&'static str, &'static CommandSpec>> = OnceLock::new();
    INDEX.get_or_init(|| COMMAND_TABLE.iter().map(|spec| (spec.name, spec)).collect())
}

/// Case-insensitive command lookup.
pub fn lookup(name: &[u8]) -> Option<&'static CommandSpec> {
    let lower = name.to_ascii_lowercase();
    let name = std::str::from_utf8(&lower).ok()?;
    index().get(name).copied()
}

fn lookup_subcommand(
    container: &'static CommandSpec,
    name: &[u8],
) -> Option<&'static CommandSpec> {
    let lower = name.to_ascii_lowercase();
    container
        .subcommands
        .iter()
        .find(|sub| sub.name.as_bytes() == lower.as_slice())
}

/// Executes the request currently assembled in `client.argv`, running
/// the full gate sequence before the handler.
pub fn execute_command(ctx: &mut ServerContext, client: &mut Client) {
    let Some(container) = lookup(&client.argv[0]) else {
        reject_unknown(client);
        return;
    };

    // subcommand dispatch by argv[1] inside container commands
    let spec = if !container.subcommands.is_empty() && client.argc() >= 2 {
        match lookup_subcommand(container, &client.argv[1]) {
            Some(sub) => sub,
            None => {
                let sub = String::from_utf8_lossy(&client.argv[1]).into_owned();
                let upper = container.name.to_ascii_uppercase();
                client.add_reply_error(&format!(
                    "Unknown subcommand or wrong number of arguments for '{sub}'. Try {upper} HELP."
                ));
                client.last_cmd_name = Some(container.name);
                return;
            }
        }
    } else {
        container
    };
    client.last_cmd_name = Some(container.name);

    // arity: positive is exact, negative is a minimum
    let argc = client.argc() as i32;
    if (spec.arity > 0 && argc != spec.arity) || argc < -spec.arity {
        client.add_reply_error(&format!(
            "wrong number of arguments for '{}' command",
            container.name
        ));
        return;
    }

    if spec.flags.contains(CmdFlags::PROTECTED) {
        client.add_reply_error(&format!(
            "{} command not allowed. This command is protected and must be \
             explicitly enabled in the configuration",
            container.name.to_ascii_uppercase()
        ));
        return;
    }

    // AUTH and HELLO stay valid in the non-authenticated state
    if ctx.auth.authentication_required(client.authenticated)
        && !spec.flags.contains(CmdFlags::NO_AUTH)
    {
        client.add_reply(shared::NOAUTH_ERR);
        return;
    }

    if client.flags.contains(ClientFlags::MULTI) && spec.flags.contains(CmdFlags::NO_MULTI) {
        client.add_reply_error(&format!(
            "{} is not allowed in transactions",
            container.name.to_ascii_uppercase()
        ));
        return;
    }

    match ctx
        .auth
        .check_all_perm(client.authenticated, spec.name, &client.argv)
    {
        AclCheck::Ok => {}
        AclCheck::DeniedAuth => {
            client.add_reply(shared::NOAUTH_ERR);
            return;
        }
        _ => {
            client.add_reply_error(
                "NOPERM this user has no permissions to run this command",
            );
            return;
        }
    }

    // memory gate: try to get back under budget before giving up
    if spec.flags.contains(CmdFlags::DENY_OOM) && ctx.over_budget() {
        if ctx.evict_to_budget() == EvictOutcome::Fail {
            client.add_reply(shared::OOM_ERR);
            return;
        }
    }

    client.flags.insert(ClientFlags::EXECUTING_COMMAND);
    (spec.handler)(ctx, client);
    client.flags.remove(ClientFlags::EXECUTING_COMMAND);
}

/// Formats the unknown-command error with a bounded preview of the
/// arguments the client sent.
fn reject_unknown(client: &mut Client) {
    let name = String::from_utf8_lossy(&client.argv[0]);
    let mut preview = String::new();
    for arg in &client.argv[1..] {
        if preview.len() >= UNKNOWN_ARGS_PREVIEW {
            break;
        }
        let remaining = UNKNOWN_ARGS_PREVIEW - preview.len();
        let text = String::from_utf8_lossy(arg);
        let clipped: String = text.chars().take(remaining).collect();
        preview.push('\'');
        preview.push_str(&clipped);
        preview.push_str("', ");
    }
    client.add_reply_error(&format!(
        "unknown command '{name}', with args beginning with: {preview}"
    ));
    client.last_cmd_name = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(lookup(b"GET").is_some());
        assert!(lookup(b"get").is_some());
        assert!(lookup(b"GeT").is_some());
        assert!(lookup(b"bogus").is_none());
    }

    #[test]
    fn table_names_are_unique_and_lowercase() {
        let mut seen = std::collections::HashSet::new();
        for spec in COMMAND_TABLE {
            assert!(seen.insert(spec.name), "duplicate command {}", spec.name);
            assert_eq!(spec.name, spec.name.to_ascii_lowercase());
        }
    }

    #[test]
    fn subcommand_lookup() {
        let client = lookup(b"client").unwrap();
        assert!(lookup_subcommand(client, b"ID").is_some());
        assert!(lookup_subcommand(client, b"setname").is_some());
        assert!(lookup_subcommand(client, b"nope").is_none());
    }

    #[test]
    fn flag_names_render() {
        let set = lookup(b"set").unwrap();
        let names = set.flag_names();
        assert!(names.contains(&"write"));
        assert!(names.contains(&"denyoom"));
    }
}
