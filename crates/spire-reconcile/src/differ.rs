//! Assembling the composite actual-vs-expected diff

use crate::Result;
use crate::expected::ExpectedConfig;
use spire_model::diff::{
    ComponentDiff, DigestDiff, FileStatsDiff, SharedDirPolicy, StateDiff, StrResourceDiff,
    VersionDiff,
};
use spire_model::dirs::{AgentDirs, ServerDirs};
use spire_model::file_stat::FileStats;
use spire_model::state::{StateOfAgent, StateOfServer};
use spire_system::info::{AgentSnapshot, ServerSnapshot};
use spire_system::user::User;
use std::path::{Path, PathBuf};

/// Directories whose attributes are owned by the OS, never by this system
pub fn shared_dir_policy(user: &User) -> SharedDirPolicy {
    SharedDirPolicy::new(
        [
            PathBuf::from("/etc/systemd/system"),
            PathBuf::from("/var/log"),
        ],
        user.system_dirs(),
    )
}

/// A digest standing in for files tracked by existence only
///
/// The environment file carries a generated join token and the trust bundle
/// mirrors server state, so their content legitimately differs between
/// passes; only their absence demands a copy.
fn existence_digest(stats: &FileStats, path: &Path) -> Result<String> {
    Ok(format!("exists={}", stats.exists(path)?))
}

fn expected_existence_digest(present: bool) -> String {
    format!("exists={present}")
}

/// Build the full agent diff from snapshot and expectation
pub fn agent_diff(
    snapshot: &AgentSnapshot,
    expected_state: &StateOfAgent,
    expected: &ExpectedConfig,
    expected_stats: &FileStats,
    dirs: &AgentDirs,
    user: &User,
) -> Result<ComponentDiff> {
    let policy = shared_dir_policy(user);
    let files = dirs.expected_dirs_and_files();
    let file_attrs = FileStatsDiff::for_files(
        &files,
        &policy,
        &snapshot.component.file_stats,
        expected_stats,
    )?;

    let expected_present = expected.conf_digest.is_some();
    let file_contents = vec![
        DigestDiff::new(
            dirs.dirs.conf_file.clone(),
            snapshot.component.config_file_digest.value.as_deref(),
            expected.conf_digest.as_deref(),
        ),
        DigestDiff::new(
            dirs.dirs.service_file.clone(),
            snapshot.component.service_file_digest.value.as_deref(),
            expected.service_digest.as_deref(),
        ),
        DigestDiff::new(
            dirs.dirs.env_file.clone(),
            Some(&existence_digest(
                &snapshot.component.file_stats,
                &dirs.dirs.env_file,
            )?),
            Some(&expected_existence_digest(expected_present)),
        ),
        DigestDiff::new(
            dirs.trust_bundle_file.clone(),
            Some(&existence_digest(
                &snapshot.component.file_stats,
                &dirs.trust_bundle_file,
            )?),
            Some(&expected_existence_digest(expected_present)),
        ),
    ];

    let exe_versions = vec![VersionDiff::new(
        dirs.dirs.executable.clone(),
        snapshot.component.version.value.as_deref(),
        expected.version.as_deref(),
    )];

    let state = StateDiff::Agent {
        actual: snapshot.state_of_agent(),
        expected: expected_state.clone(),
    };
    let scope = StrResourceDiff::new(
        "spire-agent-service-scope",
        snapshot
            .component
            .service_scope
            .value
            .map(|s| s.to_string())
            .as_deref(),
        expected.scope.map(|s| s.to_string()).as_deref(),
    );

    Ok(ComponentDiff::new(
        file_attrs.diffs,
        file_contents,
        exe_versions,
        state,
        scope,
    ))
}

/// Build the full server diff from snapshot and expectation
pub fn server_diff(
    snapshot: &ServerSnapshot,
    expected_state: &StateOfServer,
    expected: &ExpectedConfig,
    expected_stats: &FileStats,
    dirs: &ServerDirs,
    user: &User,
) -> Result<ComponentDiff> {
    let policy = shared_dir_policy(user);
    let files = dirs.expected_dirs_and_files();
    let file_attrs = FileStatsDiff::for_files(
        &files,
        &policy,
        &snapshot.component.file_stats,
        expected_stats,
    )?;

    let expected_present = expected.conf_digest.is_some();
    let file_contents = vec![
        DigestDiff::new(
            dirs.dirs.conf_file.clone(),
            snapshot.component.config_file_digest.value.as_deref(),
            expected.conf_digest.as_deref(),
        ),
        DigestDiff::new(
            dirs.dirs.service_file.clone(),
            snapshot.component.service_file_digest.value.as_deref(),
            expected.service_digest.as_deref(),
        ),
        DigestDiff::new(
            dirs.dirs.env_file.clone(),
            Some(&existence_digest(
                &snapshot.component.file_stats,
                &dirs.dirs.env_file,
            )?),
            Some(&expected_existence_digest(expected_present)),
        ),
    ];

    let exe_versions = vec![VersionDiff::new(
        dirs.dirs.executable.clone(),
        snapshot.component.version.value.as_deref(),
        expected.version.as_deref(),
    )];

    let state = StateDiff::Server {
        actual: snapshot.state_of_server(),
        expected: expected_state.clone(),
    };
    let scope = StrResourceDiff::new(
        "spire-server-service-scope",
        snapshot
            .component
            .service_scope
            .value
            .map(|s| s.to_string())
            .as_deref(),
        expected.scope.map(|s| s.to_string()).as_deref(),
    );

    Ok(ComponentDiff::new(
        file_attrs.diffs,
        file_contents,
        exe_versions,
        state,
        scope,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_dir_policy_includes_user_dirs() {
        let user = User::from_passwd_entry("me:x:1000:1000::/home/me:/bin/sh").unwrap();
        let policy = shared_dir_policy(&user);
        assert!(policy.is_shared(Path::new("/etc/systemd/system")));
        assert!(policy.is_shared(Path::new("/var/log")));
        assert!(policy.is_shared(Path::new("/home/me")));
        assert!(policy.is_shared(Path::new("/home/me/.config/systemd/user")));
        assert!(!policy.is_shared(Path::new("/opt/spire-agent")));
    }

    #[test]
    fn test_existence_digests() {
        assert_eq!(expected_existence_digest(true), "exists=true");
        assert_eq!(expected_existence_digest(false), "exists=false");
    }
}
