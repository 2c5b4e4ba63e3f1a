//! The result a reconciliation pass hands back to its caller

use serde::Serialize;
use spire_model::diff::DiffEntry;

/// Outcome of one reconciliation pass
///
/// `failed` distinguishes "acted but did not converge" from transport-level
/// errors, which abort the pass instead. The snapshot always reflects the
/// final detection, issues included.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    /// Whether anything was (or, in plan mode, would be) changed
    pub changed: bool,
    /// Whether the pass acted but left a residual divergence
    pub failed: bool,
    /// Human-readable failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    /// Before/after headers per diverging resource, when diff output was
    /// requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Vec<DiffEntry>>,
    /// The final detected snapshot
    pub snapshot: serde_json::Value,
}

impl ReconcileOutcome {
    /// A successful outcome around the final snapshot
    pub fn new(changed: bool, snapshot: serde_json::Value) -> Self {
        Self {
            changed,
            failed: false,
            failure_message: None,
            diff: None,
            snapshot,
        }
    }

    /// Attach the requested diff entries
    pub fn with_diff(mut self, entries: Vec<DiffEntry>) -> Self {
        self.diff = Some(entries);
        self
    }

    /// Mark the outcome failed with the residual divergence
    pub fn with_residual(mut self, entries: Vec<DiffEntry>) -> Self {
        self.failed = true;
        self.failure_message = Some(format!("no diff expected after acting but got: {entries:?}"));
        self
    }
}
