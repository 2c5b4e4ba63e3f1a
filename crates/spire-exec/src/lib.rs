//! Argv command execution with captured output
//!
//! This crate provides the transport seam for SPIRE provisioning: a cloneable
//! [`Command`] builder, the [`CommandExecutor`] trait every probe and systemd
//! interaction goes through, and a [`LocalExecutor`] that runs commands on
//! the invoking host. The [`ScriptedExecutor`] test double (behind the
//! `test-utils` feature) lets dependent crates script command traffic and
//! assert which calls were issued.

pub mod command;
pub mod error;
pub mod executor;
pub mod local;
pub mod outcome;
#[cfg(any(test, feature = "test-utils"))]
pub mod scripted;

pub use command::Command;
pub use error::{Error, Result};
pub use executor::CommandExecutor;
pub use local::LocalExecutor;
pub use outcome::ExecOutcome;
#[cfg(any(test, feature = "test-utils"))]
pub use scripted::ScriptedExecutor;
