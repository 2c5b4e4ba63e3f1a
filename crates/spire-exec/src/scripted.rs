//! Scripted executor double for tests
//!
//! Rules are matched first-to-last against the argv prefix; the first match
//! wins. Every call is recorded so tests can assert, for example, that a dry
//! run issued no mutating commands.

use crate::command::Command;
use crate::error::{Error, Result};
use crate::executor::CommandExecutor;
use crate::outcome::ExecOutcome;
use async_trait::async_trait;
use std::sync::Mutex;

type Responder = Box<dyn Fn(&[String]) -> Response + Send + Sync>;

enum Response {
    Outcome(ExecOutcome),
    Error(Error),
}

struct Rule {
    prefix: Vec<String>,
    responder: Responder,
}

/// A `CommandExecutor` that answers from scripted rules and records calls
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedExecutor {
    /// Create an executor with no rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands whose argv starts with `prefix` with a fixed outcome
    pub fn on<I, S>(self, prefix: I, outcome: ExecOutcome) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_fn(prefix, move |_argv| outcome.clone())
    }

    /// Answer commands whose argv starts with `prefix` via a closure
    pub fn on_fn<I, S, F>(self, prefix: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&[String]) -> ExecOutcome + Send + Sync + 'static,
    {
        self.rules.lock().unwrap().push(Rule {
            prefix: prefix.into_iter().map(Into::into).collect(),
            responder: Box::new(move |argv| Response::Outcome(f(argv))),
        });
        self
    }

    /// Answer commands whose argv starts with `prefix` with a spawn error
    ///
    /// Used to script a missing binary (`CommandNotFound`).
    pub fn on_not_found<I, S>(self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefix: Vec<String> = prefix.into_iter().map(Into::into).collect();
        let program = prefix.first().cloned().unwrap_or_default();
        self.rules.lock().unwrap().push(Rule {
            prefix,
            responder: Box::new(move |_argv| {
                Response::Error(Error::CommandNotFound {
                    command: program.clone(),
                })
            }),
        });
        self
    }

    /// Snapshot of every argv this executor has been asked to run
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose argv contains the given token
    pub fn calls_containing(&self, token: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|argv| argv.iter().any(|a| a == token))
            .collect()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, command: Command) -> Result<ExecOutcome> {
        let argv = command.argv();
        self.calls.lock().unwrap().push(argv.clone());

        let rules = self.rules.lock().unwrap();
        for rule in rules.iter() {
            if argv.len() >= rule.prefix.len() && argv[..rule.prefix.len()] == rule.prefix[..] {
                return match (rule.responder)(&argv) {
                    Response::Outcome(outcome) => Ok(outcome),
                    Response::Error(Error::CommandNotFound { command }) => {
                        Err(Error::CommandNotFound { command })
                    }
                    Response::Error(e) => Err(Error::spawn_failed(e.to_string())),
                };
            }
        }
        // unscripted commands fail loudly so tests notice unexpected traffic
        Ok(ExecOutcome::err(
            127,
            format!("no scripted rule for argv {argv:?}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn test_first_matching_rule_wins() {
        let exec = ScriptedExecutor::new()
            .on(["systemctl", "--system", "is-active"], ExecOutcome::ok("active"))
            .on(["systemctl"], ExecOutcome::err(1, "fallback"));

        let outcome = exec
            .run(Command::from_argv([
                "systemctl",
                "--system",
                "is-active",
                "spire_agent.service",
            ]))
            .await
            .unwrap();
        assert_eq!(outcome.stdout, "active");

        let outcome = exec
            .run(Command::from_argv(["systemctl", "--user", "is-enabled", "x"]))
            .await
            .unwrap();
        assert!(outcome.failed());
    }

    #[smol_potat::test]
    async fn test_unscripted_command_fails_loudly() {
        let exec = ScriptedExecutor::new();
        let outcome = exec.run(Command::new("whoami")).await.unwrap();
        assert_eq!(outcome.code, Some(127));
        assert_eq!(exec.calls().len(), 1);
    }

    #[smol_potat::test]
    async fn test_not_found_rule() {
        let exec = ScriptedExecutor::new().on_not_found(["/opt/spire/bin/spire-agent"]);
        let err = exec
            .run(Command::from_argv(["/opt/spire/bin/spire-agent", "--version"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandNotFound { .. }));
    }
}
