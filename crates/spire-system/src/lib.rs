//! # Host collaborators and state detection
//!
//! Everything that touches a live host lives here: the systemd service
//! controller, the file probe/store, health checks with an injected clock,
//! SVID certificate inspection, the `spire-server` CLI operations, and the
//! detectors that assemble point-in-time snapshots of an agent or server
//! installation.

pub mod clock;
pub mod fs;
pub mod health;
pub mod info;
pub mod scope;
pub mod server_cmd;
pub mod service;
pub mod svid;
pub mod user;

pub use clock::{Clock, SystemClock};
pub use fs::{FileStore, LocalFileStore};
pub use info::{AgentInfo, AgentSnapshot, ComponentSnapshot, ServerInfo, ServerSnapshot};
pub use scope::Scope;
pub use server_cmd::ServerCommands;
pub use service::{ComponentService, detect_service_scope, is_service_installed};
pub use user::User;

/// Error types for host interactions
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Command execution failed at the transport level
    #[error(transparent)]
    Exec(#[from] spire_exec::Error),

    /// Model-level construction or comparison failure
    #[error(transparent)]
    Model(#[from] spire_model::Error),

    /// A systemd action exited nonzero
    #[error("failed to {action} service [{service}]: {outcome}")]
    ServiceFailed {
        /// The systemctl verb that failed
        action: String,
        /// The full unit name
        service: String,
        /// The captured command outcome
        outcome: String,
    },

    /// A service survived its teardown sequence
    #[error("failed to remove service {service}: {details}")]
    TeardownFailed {
        /// The full unit name
        service: String,
        /// Outcome of every teardown step
        details: String,
    },

    /// The health probe did not report healthy before the timeout
    #[error(
        "readiness probe failed: timeout={timed_out}, \
         probe_timeout_seconds={timeout_seconds}, attempts={attempts}, \
         last issue: {last_issue:?}"
    )]
    HealthTimeout {
        /// Whether the loop ended because time ran out
        timed_out: bool,
        /// The caller-supplied timeout
        timeout_seconds: f64,
        /// Number of probe attempts performed
        attempts: u32,
        /// The last probe issue, when one was reported
        last_issue: Option<String>,
    },

    /// A `spire-server` command exited nonzero
    #[error("failed to execute {action}: {outcome}")]
    ServerCommandFailed {
        /// What was being executed
        action: String,
        /// The captured command outcome
        outcome: String,
    },

    /// Required input was missing or malformed
    #[error("{0}")]
    Precondition(String),

    /// I/O failure while touching the host
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
