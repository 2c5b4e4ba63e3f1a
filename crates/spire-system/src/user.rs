//! Invoking-user lookup on the target

use crate::{Error, Result};
use spire_exec::{Command, CommandExecutor};
use std::path::PathBuf;

/// The user a reconciliation pass runs as on the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// User name
    pub name: String,
    /// User id
    pub uid: u32,
    /// Primary group id
    pub gid: u32,
    /// Home directory
    pub home: PathBuf,
}

impl User {
    /// Parse a passwd entry, e.g. `root:x:0:0:root:/root:/bin/bash`
    pub fn from_passwd_entry(passwd_entry: &str) -> Result<User> {
        let trimmed = passwd_entry.trim();
        let splits: Vec<&str> = trimmed.split(':').collect();
        if splits.len() < 6 {
            return Err(Error::Precondition(format!(
                "not a passwd entry: {passwd_entry:?}"
            )));
        }
        let uid = splits[2]
            .parse()
            .map_err(|e| Error::Precondition(format!("bad uid in {passwd_entry:?}: {e}")))?;
        let gid = splits[3]
            .parse()
            .map_err(|e| Error::Precondition(format!("bad gid in {passwd_entry:?}: {e}")))?;
        let home = PathBuf::from(splits[splits.len() - 2]);
        Ok(User {
            name: splits[0].to_string(),
            uid,
            gid,
            home,
        })
    }

    /// Resolve the invoking user on the target via `getent`
    pub async fn current(executor: &dyn CommandExecutor) -> Result<User> {
        let cmd = Command::from_argv(["sh", "-c", "getent passwd $(id -u)"]);
        let outcome = executor.run(cmd).await?;
        if outcome.failed() || outcome.has_blank_stdout() {
            return Err(Error::Precondition(format!(
                "failed to resolve the invoking user: {}",
                outcome.describe()
            )));
        }
        User::from_passwd_entry(&outcome.stdout)
    }

    /// Whether this is the superuser
    pub fn is_root(&self) -> bool {
        self.uid == 0
    }

    /// Home-derived directories that must never get attribute corrections
    ///
    /// The home itself, plus the per-user systemd unit directory for
    /// non-root users.
    pub fn system_dirs(&self) -> Vec<PathBuf> {
        if self.is_root() {
            vec![self.home.clone()]
        } else {
            vec![self.home.clone(), self.home.join(".config/systemd/user")]
        }
    }
}
