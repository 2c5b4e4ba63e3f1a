//! Resource diffs and the composite actual-vs-expected diff

use crate::file_stat::{FileStat, FileStats, STAT_ATTRS};
use crate::state::{StateOfAgent, StateOfServer};
use crate::{Error, Result, trim_to_none};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Rendered before/after headers for one diverging resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    /// The resource the divergence belongs to
    pub resource: String,
    /// The actual side
    pub before_header: String,
    /// The expected side
    pub after_header: String,
}

/// Equality diff over two nullable trimmed strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrResourceDiff {
    /// Identifier of the compared resource
    pub resource_id: String,
    /// Actual value
    pub actual: Option<String>,
    /// Expected value
    pub expected: Option<String>,
    no_diff: bool,
}

impl StrResourceDiff {
    /// Compare two nullable strings after trimming
    pub fn new(resource_id: &str, actual: Option<&str>, expected: Option<&str>) -> Self {
        let actual = trim_to_none(actual);
        let expected = trim_to_none(expected);
        Self {
            resource_id: resource_id.to_string(),
            no_diff: actual == expected,
            actual,
            expected,
        }
    }

    /// True when both sides are equal
    pub fn no_diff(&self) -> bool {
        self.no_diff
    }

    /// Rendered before/after headers
    pub fn entry(&self) -> DiffEntry {
        DiffEntry {
            resource: self.resource_id.clone(),
            before_header: format!("{} ({:?})", self.resource_id, self.actual),
            after_header: format!("{} ({:?})", self.resource_id, self.expected),
        }
    }
}

/// Content-digest equality diff for one file
///
/// A missing digest (`None`) is never equal to a present one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestDiff {
    /// The digested file
    pub file: PathBuf,
    /// Actual content digest
    pub actual: Option<String>,
    /// Expected content digest
    pub expected: Option<String>,
    no_diff: bool,
}

impl DigestDiff {
    /// Compare two nullable digests after trimming
    pub fn new(file: impl Into<PathBuf>, actual: Option<&str>, expected: Option<&str>) -> Self {
        let actual = trim_to_none(actual);
        let expected = trim_to_none(expected);
        Self {
            file: file.into(),
            no_diff: actual == expected,
            actual,
            expected,
        }
    }

    /// True when both digests are equal
    pub fn no_diff(&self) -> bool {
        self.no_diff
    }

    /// Rendered before/after headers
    pub fn entry(&self) -> DiffEntry {
        let file = self.file.display();
        DiffEntry {
            resource: self.file.display().to_string(),
            before_header: format!("{file} (content digest={:?})", self.actual),
            after_header: format!("{file} (content digest={:?})", self.expected),
        }
    }
}

/// Version-string equality diff for one executable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDiff {
    /// The versioned resource, normally the executable path
    pub resource_id: PathBuf,
    /// Actual version
    pub actual: Option<String>,
    /// Expected version
    pub expected: Option<String>,
    no_diff: bool,
}

impl VersionDiff {
    /// Compare two nullable version strings after trimming
    pub fn new(
        resource_id: impl Into<PathBuf>,
        actual: Option<&str>,
        expected: Option<&str>,
    ) -> Self {
        let actual = trim_to_none(actual);
        let expected = trim_to_none(expected);
        Self {
            resource_id: resource_id.into(),
            no_diff: actual == expected,
            actual,
            expected,
        }
    }

    /// True when both versions are equal
    pub fn no_diff(&self) -> bool {
        self.no_diff
    }

    /// Rendered before/after headers
    pub fn entry(&self) -> DiffEntry {
        let file = self.resource_id.display();
        DiffEntry {
            resource: self.resource_id.display().to_string(),
            before_header: format!("{file} (version={:?})", self.actual),
            after_header: format!("{file} (version={:?})", self.expected),
        }
    }
}

/// Attribute diff for one path
///
/// Carries the symmetric difference of the compared attribute sets; whether
/// that difference counts as a divergence depends on the comparison policy
/// used at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatDiff {
    /// The compared path
    pub file: PathBuf,
    /// Attributes present only on the actual side
    pub only_actual: BTreeSet<(String, String)>,
    /// Attributes present only on the expected side
    pub only_expected: BTreeSet<(String, String)>,
    no_diff: bool,
}

impl FileStatDiff {
    /// Symmetric-difference policy over the full attribute set
    ///
    /// Used for managed paths: any owner/group/mode/type/existence divergence
    /// counts.
    pub fn by_attrs(file: impl Into<PathBuf>, actual: &FileStat, expected: &FileStat) -> Self {
        let attrs_actual = actual.relevant_state(&STAT_ATTRS);
        let attrs_expected = expected.relevant_state(&STAT_ATTRS);
        let only_actual: BTreeSet<_> = attrs_actual.difference(&attrs_expected).cloned().collect();
        let only_expected: BTreeSet<_> =
            attrs_expected.difference(&attrs_actual).cloned().collect();
        let no_diff = only_actual.is_empty() && only_expected.is_empty();
        Self {
            file: file.into(),
            only_actual,
            only_expected,
            no_diff,
        }
    }

    /// Existence-only policy: diverges only when creation is required
    ///
    /// Used for shared system directories, which must never be flagged for
    /// attribute correction when they already exist.
    pub fn creation_only(file: impl Into<PathBuf>, actual: &FileStat, expected: &FileStat) -> Self {
        let attrs = ["exists"];
        let attrs_actual = actual.relevant_state(&attrs);
        let attrs_expected = expected.relevant_state(&attrs);
        let only_actual: BTreeSet<_> = attrs_actual.difference(&attrs_expected).cloned().collect();
        let only_expected: BTreeSet<_> =
            attrs_expected.difference(&attrs_actual).cloned().collect();
        let need_create = expected.exists && !actual.exists;
        Self {
            file: file.into(),
            only_actual,
            only_expected,
            no_diff: !need_create,
        }
    }

    /// True when the path needs no correction under its policy
    pub fn no_diff(&self) -> bool {
        self.no_diff
    }

    /// Rendered before/after headers
    pub fn entry(&self) -> DiffEntry {
        let file = self.file.display();
        DiffEntry {
            resource: self.file.display().to_string(),
            before_header: format!("{file} (-={:?})", self.only_actual),
            after_header: format!("{file} (+={:?})", self.only_expected),
        }
    }
}

/// Classification of paths whose attributes must not be corrected in place
///
/// Shared OS directories (`/etc/systemd/system`, `/var/log`) and directories
/// derived from the invoking user's home get the creation-only policy; every
/// other path gets the full symmetric-difference policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedDirPolicy {
    /// Shared system directories
    pub system_dirs: BTreeSet<PathBuf>,
    /// Home-derived directories of the invoking user
    pub user_system_dirs: BTreeSet<PathBuf>,
}

impl SharedDirPolicy {
    /// Build a policy from the two directory sets, normalizing both
    pub fn new<I, J>(system_dirs: I, user_system_dirs: J) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
        J: IntoIterator<Item = PathBuf>,
    {
        Self {
            system_dirs: system_dirs
                .into_iter()
                .map(|p| crate::dirs::normalize_path(&p))
                .collect(),
            user_system_dirs: user_system_dirs
                .into_iter()
                .map(|p| crate::dirs::normalize_path(&p))
                .collect(),
        }
    }

    /// Whether the path is shared and must only ever be created, not altered
    pub fn is_shared(&self, path: &Path) -> bool {
        let normalized = crate::dirs::normalize_path(path);
        self.system_dirs.contains(&normalized) || self.user_system_dirs.contains(&normalized)
    }
}

/// All per-path attribute diffs of one comparison pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatsDiff {
    /// Per-path diffs in path order
    pub diffs: Vec<FileStatDiff>,
    no_diff: bool,
}

impl FileStatsDiff {
    /// Diff every listed path, selecting the policy per path
    ///
    /// Errors when either side is missing a stat for a listed path.
    pub fn for_files(
        files: &[PathBuf],
        policy: &SharedDirPolicy,
        actual: &FileStats,
        expected: &FileStats,
    ) -> Result<Self> {
        let mut diffs = Vec::with_capacity(files.len());
        for file in files {
            let stat_actual = lookup(actual, file, "actual file stats")?;
            let stat_expected = lookup(expected, file, "expected file stats")?;
            let diff = if policy.is_shared(file) {
                FileStatDiff::creation_only(file.clone(), stat_actual, stat_expected)
            } else {
                FileStatDiff::by_attrs(file.clone(), stat_actual, stat_expected)
            };
            diffs.push(diff);
        }
        let no_diff = diffs.iter().all(FileStatDiff::no_diff);
        Ok(Self { diffs, no_diff })
    }

    /// True when no listed path needs correction
    pub fn no_diff(&self) -> bool {
        self.no_diff
    }
}

fn lookup<'a>(stats: &'a FileStats, file: &Path, collection: &str) -> Result<&'a FileStat> {
    stats.get(file).ok_or_else(|| Error::UnknownDiffResource {
        resource: file.display().to_string(),
        collection: collection.to_string(),
        available: stats
            .paths()
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
    })
}

/// Composite-state diff for either component kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateDiff {
    /// Agent composite-state comparison
    Agent {
        /// Detected state
        actual: StateOfAgent,
        /// Declared state
        expected: StateOfAgent,
    },
    /// Server composite-state comparison
    Server {
        /// Detected state
        actual: StateOfServer,
        /// Declared state
        expected: StateOfServer,
    },
}

impl StateDiff {
    /// True when the actual composite state satisfies the expectation
    pub fn no_diff(&self) -> bool {
        match self {
            StateDiff::Agent { actual, expected } => !actual.need_change(expected),
            StateDiff::Server { actual, expected } => !actual.need_change(expected),
        }
    }

    /// The resource id used in diff output
    pub fn resource_id(&self) -> &'static str {
        match self {
            StateDiff::Agent { .. } => "state-of-spire-agent",
            StateDiff::Server { .. } => "state-of-spire-server",
        }
    }

    /// Rendered before/after headers
    pub fn entry(&self) -> DiffEntry {
        let resource = self.resource_id();
        let (before, after) = match self {
            StateDiff::Agent { actual, expected } => {
                (actual.header(resource), expected.header(resource))
            }
            StateDiff::Server { actual, expected } => {
                (actual.header(resource), expected.header(resource))
            }
        };
        DiffEntry {
            resource: resource.to_string(),
            before_header: before,
            after_header: after,
        }
    }
}

/// The full actual-vs-expected diff of one component on one target
///
/// `no_diff` is the logical AND over every child diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDiff {
    /// Per-path attribute diffs
    pub file_attrs: Vec<FileStatDiff>,
    /// Per-file content digest diffs
    pub file_contents: Vec<DigestDiff>,
    /// Executable version diffs
    pub exe_versions: Vec<VersionDiff>,
    /// Composite-state diff
    pub state: StateDiff,
    /// Service scope diff
    pub scope: StrResourceDiff,
    no_diff: bool,
}

impl ComponentDiff {
    /// Aggregate the child diffs
    pub fn new(
        file_attrs: Vec<FileStatDiff>,
        file_contents: Vec<DigestDiff>,
        exe_versions: Vec<VersionDiff>,
        state: StateDiff,
        scope: StrResourceDiff,
    ) -> Self {
        let no_diff = state.no_diff()
            && scope.no_diff()
            && file_attrs.iter().all(FileStatDiff::no_diff)
            && file_contents.iter().all(DigestDiff::no_diff)
            && exe_versions.iter().all(VersionDiff::no_diff);
        Self {
            file_attrs,
            file_contents,
            exe_versions,
            state,
            scope,
            no_diff,
        }
    }

    /// True when nothing diverges
    pub fn no_diff(&self) -> bool {
        self.no_diff
    }

    /// True when any child diff diverges
    pub fn need_change(&self) -> bool {
        !self.no_diff
    }

    /// Whether the executable itself must be re-installed
    ///
    /// Considers only content and version diffs keyed on the binary path, so
    /// config-only changes never force a re-download.
    pub fn need_binary_change(&self, bin_file: &Path) -> bool {
        if self.no_diff {
            return false;
        }
        let content_diverges = self
            .file_contents
            .iter()
            .filter(|d| d.file == bin_file)
            .any(|d| !d.no_diff());
        let version_diverges = self
            .exe_versions
            .iter()
            .filter(|d| d.resource_id == bin_file)
            .any(|d| !d.no_diff());
        content_diverges || version_diverges
    }

    /// The subset of `dirs` whose attribute diff is non-trivial
    ///
    /// Minimizes directory-creation calls to directories that actually
    /// changed.
    pub fn dirs_needing_change(&self, dirs: &[PathBuf]) -> Vec<PathBuf> {
        self.file_attrs
            .iter()
            .filter(|d| !d.no_diff() && dirs.contains(&d.file))
            .map(|d| d.file.clone())
            .collect()
    }

    /// Whether the file's content diverges
    ///
    /// Errors when the file has no content diff entry at all.
    pub fn need_content_change(&self, file: &Path) -> Result<bool> {
        for diff in &self.file_contents {
            if diff.file == file {
                return Ok(!diff.no_diff());
            }
        }
        Err(self.unknown_resource(file, "file_contents"))
    }

    /// Whether the file's attributes diverge
    ///
    /// Errors when the file has no attribute diff entry at all.
    pub fn need_attrs_change(&self, file: &Path) -> Result<bool> {
        for diff in &self.file_attrs {
            if diff.file == file {
                return Ok(!diff.no_diff());
            }
        }
        Err(self.unknown_resource(file, "file_attrs"))
    }

    /// Before/after headers for every diverging resource
    pub fn entries(&self) -> Vec<DiffEntry> {
        let mut entries = Vec::new();
        entries.extend(
            self.file_attrs
                .iter()
                .filter(|d| !d.no_diff())
                .map(FileStatDiff::entry),
        );
        entries.extend(
            self.file_contents
                .iter()
                .filter(|d| !d.no_diff())
                .map(DigestDiff::entry),
        );
        entries.extend(
            self.exe_versions
                .iter()
                .filter(|d| !d.no_diff())
                .map(VersionDiff::entry),
        );
        if !self.state.no_diff() {
            entries.push(self.state.entry());
        }
        if !self.scope.no_diff() {
            entries.push(self.scope.entry());
        }
        entries
    }

    fn unknown_resource(&self, file: &Path, collection: &str) -> Error {
        let available = match collection {
            "file_contents" => self
                .file_contents
                .iter()
                .map(|d| d.file.display().to_string())
                .collect(),
            _ => self
                .file_attrs
                .iter()
                .map(|d| d.file.display().to_string())
                .collect(),
        };
        Error::UnknownDiffResource {
            resource: file.display().to_string(),
            collection: collection.to_string(),
            available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_stat::FileType;
    use crate::state::{AgentRegistered, ServiceInstallation, ServiceStatus, State};

    fn stat(mode: u32) -> FileStat {
        FileStat::new(
            true,
            Some("root".to_string()),
            Some("root".to_string()),
            Some(mode),
            Some(FileType::Directory),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_str_diff_trims_and_treats_blank_as_none() {
        let diff = StrResourceDiff::new("scope", Some(" system "), Some("system"));
        assert!(diff.no_diff());
        let diff = StrResourceDiff::new("scope", Some("  "), None);
        assert!(diff.no_diff());
        let diff = StrResourceDiff::new("scope", None, Some("system"));
        assert!(!diff.no_diff());
    }

    #[test]
    fn test_file_stat_diff_is_reflexive() {
        let a = stat(0o750);
        let diff = FileStatDiff::by_attrs("/opt/spire-agent", &a, &a.clone());
        assert!(diff.no_diff());
        assert!(diff.only_actual.is_empty());
        assert!(diff.only_expected.is_empty());
    }

    #[test]
    fn test_file_stat_diff_detects_mode_divergence() {
        let diff = FileStatDiff::by_attrs("/opt/spire-agent", &stat(0o750), &stat(0o770));
        assert!(!diff.no_diff());
        assert!(diff.only_actual.contains(&("mode".to_string(), "0750".to_string())));
        assert!(diff.only_expected.contains(&("mode".to_string(), "0770".to_string())));
    }

    #[test]
    fn test_creation_only_policy_is_monotonic() {
        // both exist: attribute mismatches never count
        let mut actual = stat(0o755);
        actual.owner = Some("nobody".to_string());
        let diff = FileStatDiff::creation_only("/var/log", &actual, &stat(0o700));
        assert!(diff.no_diff());

        // expected exists, actual does not: creation required
        let missing = FileStat::from_issue("no such file");
        let diff = FileStatDiff::creation_only("/var/log", &missing, &stat(0o755));
        assert!(!diff.no_diff());

        // expected absent: nothing to create
        let diff = FileStatDiff::creation_only("/var/log", &stat(0o755), &missing);
        assert!(diff.no_diff());
    }

    fn state_diff_trivial() -> StateDiff {
        let state = StateOfServer::new(
            State::Present,
            Some(ServiceInstallation::Enabled),
            Some(ServiceStatus::Healthy),
        )
        .unwrap();
        StateDiff::Server {
            actual: state.clone(),
            expected: state,
        }
    }

    fn composite(bin_content_differs: bool, version_differs: bool) -> ComponentDiff {
        let bin = PathBuf::from("/opt/spire/bin/spire-server");
        let conf = PathBuf::from("/etc/spire/server.conf");
        ComponentDiff::new(
            vec![],
            vec![
                DigestDiff::new(
                    bin.clone(),
                    Some("aaaa"),
                    Some(if bin_content_differs { "bbbb" } else { "aaaa" }),
                ),
                DigestDiff::new(conf, Some("cccc"), Some("dddd")),
            ],
            vec![VersionDiff::new(
                bin,
                Some("1.0.0"),
                Some(if version_differs { "1.1.0" } else { "1.0.0" }),
            )],
            state_diff_trivial(),
            StrResourceDiff::new("scope", Some("system"), Some("system")),
        )
    }

    #[test]
    fn test_need_binary_change_is_independent_of_config_diffs() {
        let bin = PathBuf::from("/opt/spire/bin/spire-server");
        // config content differs but binary matches: no binary change
        let diff = composite(false, false);
        assert!(diff.need_change());
        assert!(!diff.need_binary_change(&bin));

        let diff = composite(true, false);
        assert!(diff.need_binary_change(&bin));
        let diff = composite(false, true);
        assert!(diff.need_binary_change(&bin));
    }

    #[test]
    fn test_need_binary_change_false_when_composite_trivial() {
        let bin = PathBuf::from("/opt/spire/bin/spire-server");
        let diff = ComponentDiff::new(
            vec![],
            vec![DigestDiff::new(bin.clone(), Some("aaaa"), Some("aaaa"))],
            vec![VersionDiff::new(bin.clone(), Some("1.0.0"), Some("1.0.0"))],
            state_diff_trivial(),
            StrResourceDiff::new("scope", Some("system"), Some("system")),
        );
        assert!(!diff.need_change());
        assert!(!diff.need_binary_change(&bin));
    }

    #[test]
    fn test_dirs_needing_change_filters_trivial_diffs() {
        let changed = PathBuf::from("/opt/spire");
        let unchanged = PathBuf::from("/etc/spire");
        let missing = FileStat::from_issue("absent");
        let diff = ComponentDiff::new(
            vec![
                FileStatDiff::by_attrs(changed.clone(), &missing, &stat(0o750)),
                FileStatDiff::by_attrs(unchanged.clone(), &stat(0o750), &stat(0o750)),
            ],
            vec![],
            vec![],
            state_diff_trivial(),
            StrResourceDiff::new("scope", Some("system"), Some("system")),
        );
        let dirs = vec![changed.clone(), unchanged];
        assert_eq!(diff.dirs_needing_change(&dirs), vec![changed]);
    }

    #[test]
    fn test_need_content_change_unknown_file_errors() {
        let diff = composite(false, false);
        let err = diff
            .need_content_change(Path::new("/not/tracked"))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownDiffResource { .. }));
    }

    #[test]
    fn test_entries_list_only_divergent_resources() {
        let diff = composite(true, false);
        let entries = diff.entries();
        // binary content + conf content diverge, version/state/scope do not
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| !e.resource.is_empty()));
    }

    #[test]
    fn test_state_diff_against_absent_expectation() {
        let actual = StateOfAgent::new(
            State::Present,
            Some(ServiceInstallation::Enabled),
            Some(ServiceStatus::Healthy),
            Some(AgentRegistered::Yes),
        )
        .unwrap();
        let diff = StateDiff::Agent {
            actual,
            expected: StateOfAgent::absent(),
        };
        assert!(!diff.no_diff());
        let absent = StateDiff::Agent {
            actual: StateOfAgent::absent(),
            expected: StateOfAgent::absent(),
        };
        assert!(absent.no_diff());
    }
}
