//! User identities and account-name presentation.
//!
//! Errors only carry numeric ids. Turning an id into an account name is a
//! presentation step done through an [`AccountLookup`], so the store itself
//! never consults the system account database.

use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Numeric user identifier. `-1` stands for all users (global configuration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    pub const ALL_USERS: UserId = UserId(-1);

    pub fn is_all_users(self) -> bool {
        self == Self::ALL_USERS
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all_users() {
            f.write_str("all users")
        } else {
            write!(f, "userid {}", self.0)
        }
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        UserId(id)
    }
}

/// Resolves numeric ids to account names.
pub trait AccountLookup: Send + Sync {
    fn account_name(&self, user: UserId) -> Option<String>;
}

/// Lookup that never resolves anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAccounts;

impl AccountLookup for NoAccounts {
    fn account_name(&self, _user: UserId) -> Option<String> {
        None
    }
}

/// Lookup backed by a passwd(5) formatted file.
#[derive(Debug, Clone)]
pub struct PasswdAccounts {
    path: PathBuf,
}

impl PasswdAccounts {
    pub const SYSTEM_PATH: &'static str = "/etc/passwd";

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn system() -> Self {
        Self::new(Self::SYSTEM_PATH)
    }
}

impl AccountLookup for PasswdAccounts {
    fn account_name(&self, user: UserId) -> Option<String> {
        if user.0 < 0 {
            return None;
        }
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Account database unavailable");
                return None;
            }
        };
        contents
            .lines()
            .filter(|line| !line.starts_with('#'))
            .find_map(|line| {
                let mut fields = line.split(':');
                let name = fields.next()?;
                let uid = fields.nth(1)?.parse::<i64>().ok()?;
                (uid == user.0 && !name.is_empty()).then(|| name.to_string())
            })
    }
}

/// Describe a user for humans: `user alice`, `userid 1000` or `all users`.
pub fn describe_user(user: UserId, accounts: &dyn AccountLookup) -> String {
    if user.is_all_users() {
        return user.to_string();
    }
    match accounts.account_name(user) {
        Some(name) => format!("user {}", name),
        None => user.to_string(),
    }
}

/// Render a registry error, naming the account when it can be resolved.
pub fn describe_error(err: &RegistryError, accounts: &dyn AccountLookup) -> String {
    match err {
        RegistryError::AlreadyRegistered { user, program } => {
            format!("{} already has program: {}", describe_user(*user, accounts), program)
        }
        RegistryError::UnknownConfig { user, program } => {
            format!("{} has no program: {}", describe_user(*user, accounts), program)
        }
        RegistryError::UnknownKey { .. } => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn passwd_fixture() -> (TempDir, PasswdAccounts) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("passwd");
        fs::write(
            &path,
            "# comment line\nroot:x:0:0:root:/root:/bin/sh\nalice:x:1000:1000::/home/alice:/bin/sh\n",
        )
        .unwrap();
        (tmp, PasswdAccounts::new(path))
    }

    #[test]
    fn test_passwd_lookup() {
        let (_tmp, accounts) = passwd_fixture();
        assert_eq!(accounts.account_name(UserId(0)).as_deref(), Some("root"));
        assert_eq!(accounts.account_name(UserId(1000)).as_deref(), Some("alice"));
        assert_eq!(accounts.account_name(UserId(4242)), None);
        assert_eq!(accounts.account_name(UserId::ALL_USERS), None);
    }

    #[test]
    fn test_missing_passwd_file_resolves_nothing() {
        let accounts = PasswdAccounts::new("/nonexistent/passwd");
        assert_eq!(accounts.account_name(UserId(0)), None);
    }

    #[test]
    fn test_describe_error_prefers_account_name() {
        let (_tmp, accounts) = passwd_fixture();
        let err = RegistryError::AlreadyRegistered {
            user: UserId(1000),
            program: "/usr/bin/editor".into(),
        };
        assert_eq!(
            describe_error(&err, &accounts),
            "user alice already has program: /usr/bin/editor"
        );
        assert_eq!(
            describe_error(&err, &NoAccounts),
            "userid 1000 already has program: /usr/bin/editor"
        );
    }

    #[test]
    fn test_describe_all_users() {
        let err = RegistryError::UnknownConfig {
            user: UserId::ALL_USERS,
            program: "/bin/x".into(),
        };
        assert_eq!(describe_error(&err, &NoAccounts), "all users has no program: /bin/x");
        assert_eq!(err.to_string(), "all users has no program: /bin/x");
    }
}
