//! Authentication and permission boundary.
//!
//! The engine only consumes this narrow surface; real ACL rule
//! evaluation belongs to an external collaborator. The default
//! implementation models a single default user that either requires a
//! password or doesn't.

use subtle::ConstantTimeEq;

/// Flags on the default user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UserFlags {
    /// No password required; clients are implicitly authenticated.
    nopass: bool,
    /// The user is disabled entirely.
    disabled: bool,
}

/// Outcome of a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclCheck {
    Ok,
    DeniedCmd,
    DeniedKey,
    DeniedAuth,
    DeniedChannel,
}

/// Authentication gate for the default user.
#[derive(Debug, Clone)]
pub struct AuthGate {
    password: Option<String>,
    flags: UserFlags,
}

impl AuthGate {
    /// `requirepass: None` yields a nopass user (no AUTH needed).
    pub fn new(requirepass: Option<String>) -> Self {
        let nopass = requirepass.is_none();
        Self {
            password: requirepass,
            flags: UserFlags {
                nopass,
                disabled: false,
            },
        }
    }

    /// `true` when an unauthenticated client must AUTH before running
    /// commands not flagged as pre-auth.
    pub fn authentication_required(&self, authenticated: bool) -> bool {
        !(self.flags.nopass || self.flags.disabled) && !authenticated
    }

    /// `true` when a password is configured at all.
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// Constant-time password comparison.
    pub fn check_password(&self, given: &[u8]) -> bool {
        match &self.password {
            Some(expected) => expected.as_bytes().ct_eq(given).into(),
            None => false,
        }
    }

    /// Full permission check for a resolved command. Rule evaluation is
    /// the collaborator's job; the default user may run everything once
    /// authenticated.
    pub fn check_all_perm(&self, authenticated: bool, _cmd: &str, _argv: &[bytes::Bytes]) -> AclCheck {
        if self.authentication_required(authenticated) {
            AclCheck::DeniedAuth
        } else {
            AclCheck::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nopass_user_never_requires_auth() {
        let gate = AuthGate::new(None);
        assert!(!gate.authentication_required(false));
        assert!(!gate.authentication_required(true));
    }

    #[test]
    fn password_user_requires_auth_until_authenticated() {
        let gate = AuthGate::new(Some("sekrit".into()));
        assert!(gate.authentication_required(false));
        assert!(!gate.authentication_required(true));
    }

    #[test]
    fn check_password_matches_exactly() {
        let gate = AuthGate::new(Some("sekrit".into()));
        assert!(gate.check_password(b"sekrit"));
        assert!(!gate.check_password(b"sekri"));
        assert!(!gate.check_password(b"sekrit2"));
        assert!(!gate.check_password(b""));
    }

    #[test]
    fn no_password_rejects_everything() {
        let gate = AuthGate::new(None);
        assert!(!gate.check_password(b"anything"));
    }

    #[test]
    fn perm_check_reflects_auth_state() {
        let gate = AuthGate::new(Some("pw".into()));
        assert_eq!(gate.check_all_perm(false, "get", &[]), AclCheck::DeniedAuth);
        assert_eq!(gate.check_all_perm(true, "get", &[]), AclCheck::Ok);
    }
}
