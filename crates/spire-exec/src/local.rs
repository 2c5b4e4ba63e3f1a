//! Local process execution

use crate::command::Command;
use crate::error::{Error, Result};
use crate::executor::CommandExecutor;
use crate::outcome::ExecOutcome;
use async_trait::async_trait;
use tracing::debug;

/// Executor that runs commands as local child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    /// Create a new local executor
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    async fn run(&self, command: Command) -> Result<ExecOutcome> {
        let mut async_cmd = command.prepare();
        let output = match async_cmd.output().await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::CommandNotFound {
                    command: command.get_program().to_string(),
                });
            }
            Err(e) => return Err(Error::spawn_failed(format!("{command}: {e}"))),
        };

        let stdout = String::from_utf8(output.stdout).map_err(|_| Error::NonUtf8Output {
            command: command.get_program().to_string(),
        })?;
        let stderr = String::from_utf8(output.stderr).map_err(|_| Error::NonUtf8Output {
            command: command.get_program().to_string(),
        })?;

        let outcome = ExecOutcome {
            code: output.status.code(),
            stdout,
            stderr,
        };
        debug!(command = %command, code = ?outcome.code, "command completed");
        Ok(outcome)
    }
}
