//! Component health checks and the bounded readiness wait

use crate::clock::Clock;
use crate::{Error, Result};
use regex::Regex;
use spire_exec::{Command, CommandExecutor};
use spire_model::Probed;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// The stdout pattern a healthy agent prints
pub fn agent_healthy_pattern() -> Regex {
    Regex::new(r".*Agent\sis\shealthy.*").expect("static pattern")
}

/// The stdout pattern a healthy server prints
pub fn server_healthy_pattern() -> Regex {
    Regex::new(r".*Server\sis\shealthy.*").expect("static pattern")
}

/// The agent's IPC socket argument, when a socket path is declared
pub fn agent_socket_args(socket_path: Option<&str>) -> Vec<String> {
    match socket_path {
        Some(path) if !path.trim().is_empty() => {
            vec!["-socketPath".to_string(), path.to_string()]
        }
        _ => Vec::new(),
    }
}

/// The server's registration socket argument, when a path is declared
pub fn server_socket_args(registration_uds_path: Option<&str>) -> Vec<String> {
    match registration_uds_path {
        Some(path) if !path.trim().is_empty() => {
            vec!["-registrationUDSPath".to_string(), path.to_string()]
        }
        _ => Vec::new(),
    }
}

/// Run the component's healthcheck subcommand once
///
/// Healthy requires exit 0 AND stdout matching the component's healthy
/// message. Spawn failures (missing binary) answer `(false, issue)` — never
/// an error.
pub async fn is_component_healthy(
    executor: &dyn CommandExecutor,
    component_bin: &Path,
    socket_args: &[String],
    healthy_pattern: &Regex,
) -> Probed<bool> {
    let mut cmd = Command::new(component_bin.display().to_string());
    cmd.arg("healthcheck").args(socket_args.iter().cloned());
    let argv = cmd.argv();

    let outcome = match executor.run(cmd).await {
        Ok(outcome) => outcome,
        Err(e) => {
            return Probed::with_issue(false, format!("error executing {argv:?}: {e}"));
        }
    };
    if outcome.failed() || !healthy_pattern.is_match(&outcome.stdout) {
        return Probed::with_issue(
            false,
            format!("args: {argv:?} {}", outcome.describe()),
        );
    }
    Probed::ok(true)
}

/// Poll the probe once per second until healthy or the timeout elapses
///
/// Timeout expiry is fatal, carrying the attempt count and the last probe
/// issue. A `None` timeout means probe once and give the answer back without
/// waiting.
pub async fn wait_for_healthy<F, Fut>(
    clock: &dyn Clock,
    timeout_seconds: Option<f64>,
    mut probe: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Probed<bool>>,
{
    let mut result = probe().await;
    if result.is_true() {
        return Ok(());
    }
    let Some(timeout_seconds) = timeout_seconds else {
        return Err(Error::HealthTimeout {
            timed_out: false,
            timeout_seconds: 0.0,
            attempts: 1,
            last_issue: result.issue,
        });
    };

    let start = clock.now();
    let timeout = Duration::from_secs_f64(timeout_seconds);
    let mut attempts: u32 = 1;
    let mut timed_out = clock.now().duration_since(start) >= timeout;
    while !result.is_true() && !timed_out {
        clock.sleep(Duration::from_secs(1)).await;
        attempts += 1;
        result = probe().await;
        timed_out = clock.now().duration_since(start) >= timeout;
        debug!(attempts, healthy = result.is_true(), "readiness probe");
    }

    if result.is_true() {
        return Ok(());
    }
    Err(Error::HealthTimeout {
        timed_out,
        timeout_seconds,
        attempts,
        last_issue: result.issue,
    })
}
