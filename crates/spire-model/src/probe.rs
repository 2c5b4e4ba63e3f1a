//! Tri-state probe outcomes
//!
//! Detection never raises on uncertainty: a probe answers with a value, an
//! issue, or both. `issue` is populated exactly when the value is not
//! confidently known.

use serde::{Deserialize, Serialize};

/// The outcome of a detection probe
///
/// Distinguishes "confidently false" from "could not determine": the latter
/// carries `value: None` plus an issue. Uncertainty propagates into the
/// snapshot as `*_issue` fields instead of aborting the pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Probed<T> {
    /// The probed value, when determined
    pub value: Option<T>,
    /// Why the value is not confidently known, when it is not
    pub issue: Option<String>,
}

impl<T> Probed<T> {
    /// A confidently determined value
    pub fn ok(value: T) -> Self {
        Self {
            value: Some(value),
            issue: None,
        }
    }

    /// An undetermined value with the reason it could not be probed
    pub fn issue(issue: impl Into<String>) -> Self {
        Self {
            value: None,
            issue: Some(issue.into()),
        }
    }

    /// A determined value carrying a qualifying issue
    pub fn with_issue(value: T, issue: impl Into<String>) -> Self {
        Self {
            value: Some(value),
            issue: Some(issue.into()),
        }
    }

    /// The value, or the given default when undetermined
    pub fn value_or(&self, default: T) -> T
    where
        T: Clone,
    {
        self.value.clone().unwrap_or(default)
    }

    /// Borrow the value
    pub fn as_ref(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

impl Probed<bool> {
    /// True only when the probe confidently answered true
    pub fn is_true(&self) -> bool {
        self.value == Some(true)
    }
}

impl<T> Default for Probed<T> {
    fn default() -> Self {
        Self {
            value: None,
            issue: None,
        }
    }
}
