//! # Reconciliation engine
//!
//! Drives a SPIRE agent or server installation from its detected state to
//! the declared state with minimal, safe side effects: render the expected
//! configuration, detect, diff, apply only the necessary corrective actions
//! in order, re-detect, and verify convergence.
//!
//! Collaborators (command executors, file store, clock) are injected at
//! construction; nothing reaches into ambient global context.

pub mod differ;
pub mod expected;
pub mod fetch;
pub mod outcome;
pub mod params;
pub mod reconciler;

pub use differ::{agent_diff, server_diff};
pub use expected::{ExpectedConfig, expected_file_stats};
pub use fetch::{ReleaseFetcher, extract_member};
pub use outcome::ReconcileOutcome;
pub use params::{AgentParams, ServerParams};
pub use reconciler::{AgentReconciler, Mode, ServerReconciler};

/// Error types for reconciliation passes
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Transport-level command failure
    #[error(transparent)]
    Exec(#[from] spire_exec::Error),

    /// Model construction or comparison failure
    #[error(transparent)]
    Model(#[from] spire_model::Error),

    /// Host collaborator failure (service control, probing, server CLI)
    #[error(transparent)]
    System(#[from] spire_system::Error),

    /// Template rendering failure
    #[error("failed to render {label}: {source}")]
    Template {
        /// Which template failed
        label: String,
        /// The underlying rendering error
        #[source]
        source: minijinja::Error,
    },

    /// Release artifact download or extraction failure
    #[error("release artifact: {0}")]
    Artifact(String),

    /// Required input was missing or malformed
    #[error("{0}")]
    Precondition(String),

    /// I/O failure in the pass's local working area
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Snapshot serialization failure
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
