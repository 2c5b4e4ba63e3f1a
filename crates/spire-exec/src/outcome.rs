//! Captured outcome of an executed command

use serde::{Deserialize, Serialize};

/// The captured result of a completed command
///
/// `code` is `None` when the process was terminated by a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutcome {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl ExecOutcome {
    /// Outcome with exit code 0 and the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Outcome with the given nonzero exit code and stderr
    pub fn err(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Outcome with exit code 0 and the given stderr (some tools log there)
    pub fn ok_stderr(stderr: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// True if the process exited with code 0
    pub fn succeeded(&self) -> bool {
        self.code == Some(0)
    }

    /// True if the process did not exit with code 0
    pub fn failed(&self) -> bool {
        !self.succeeded()
    }

    /// True if stdout is empty or whitespace-only
    pub fn has_blank_stdout(&self) -> bool {
        self.stdout.trim().is_empty()
    }

    /// True if stderr is empty or whitespace-only
    pub fn has_blank_stderr(&self) -> bool {
        self.stderr.trim().is_empty()
    }

    /// True if both output streams are empty or whitespace-only
    pub fn has_blank_stdout_and_stderr(&self) -> bool {
        self.has_blank_stdout() && self.has_blank_stderr()
    }

    /// Compact one-line rendering for issue strings and log lines
    pub fn describe(&self) -> String {
        format!(
            "rc={:?} stdout={:?} stderr={:?}",
            self.code, self.stdout, self.stderr
        )
    }
}
