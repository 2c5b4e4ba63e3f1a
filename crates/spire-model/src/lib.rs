//! # SPIRE state model
//!
//! The pure data model behind SPIRE component provisioning: declared and
//! detected component states, file attributes and modes, component directory
//! layouts, resource diffs and the composite actual-vs-expected diff,
//! normalized content digests, release-version compatibility, and the
//! parsers for `spire-server` list-style output.
//!
//! Nothing in this crate touches the host; probes and command execution live
//! in `spire-system`, orchestration in `spire-reconcile`.

pub mod agent_entry;
pub mod diff;
pub mod digest;
pub mod dirs;
pub mod file_stat;
pub mod list_output;
pub mod probe;
pub mod server_entry;
pub mod state;
pub mod version;

pub use diff::{
    ComponentDiff, DiffEntry, DigestDiff, FileStatDiff, FileStatsDiff, SharedDirPolicy,
    StateDiff, StrResourceDiff, VersionDiff,
};
pub use dirs::{AgentDirs, ComponentDirs, ServerDirs};
pub use file_stat::{FileModes, FileStat, FileStats, FileType};
pub use probe::Probed;
pub use state::{
    AgentRegistered, ServiceInstallation, ServiceStatus, State, StateOfAgent, StateOfServer,
};
pub use version::{ReleaseVersion, can_upgrade_or_downgrade};

/// Error types for model construction and comparison
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A composite state was built with missing required substates
    #[error("invalid composite state: {0}")]
    InvalidState(String),

    /// A file stat violated its construction invariant
    #[error("invalid file stat: {0}")]
    InvalidFileStat(String),

    /// A mode string could not be parsed
    #[error("invalid mode string {mode:?}: {reason}")]
    InvalidMode {
        /// The offending mode string
        mode: String,
        /// Why it was rejected
        reason: String,
    },

    /// A version string was not a well-formed release version
    #[error("bad version format: {0}")]
    BadVersion(String),

    /// A required parameter was missing or blank
    #[error("{0} must be provided")]
    MissingValue(String),

    /// A diff lookup referenced a resource with no diff entry
    #[error("no diff for [{resource}] found in {collection}, available are {available:?}")]
    UnknownDiffResource {
        /// The resource that was looked up
        resource: String,
        /// The diff collection that was searched
        collection: String,
        /// The resource ids that do exist
        available: Vec<String>,
    },

    /// List-style command output did not match the expected format
    #[error("bad list output: {0}")]
    BadListOutput(String),

    /// Content could not be normalized for digesting
    #[error("digest failure: {0}")]
    Digest(String),

    /// An I/O failure while digesting file content
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Trim a string, mapping blank input to `None`
pub(crate) fn trim_to_none(value: Option<&str>) -> Option<String> {
    match value {
        None => None,
        Some(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
    }
}
