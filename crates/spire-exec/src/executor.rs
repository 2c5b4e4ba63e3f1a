//! Executor trait every command goes through

use crate::command::Command;
use crate::error::Result;
use crate::outcome::ExecOutcome;
use async_trait::async_trait;

/// An executor that runs a command and captures its output
///
/// Implementations decide WHERE the command runs (local process, test
/// script); callers decide WHAT runs. Probes convert errors from this trait
/// into `(value, issue)` pairs instead of propagating them.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute the command to completion and capture its output
    async fn run(&self, command: Command) -> Result<ExecOutcome>;
}
