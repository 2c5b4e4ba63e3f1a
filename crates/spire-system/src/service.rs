//! Systemd service control and installation probes

use crate::fs::FileStore;
use crate::scope::{ALL_SCOPES, Scope};
use crate::{Error, Result};
use spire_exec::{Command, CommandExecutor, ExecOutcome};
use spire_model::Probed;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Whether the unit is known to the service manager under the given scope
///
/// Uses `systemctl list-unit-files <pattern>` because a freshly copied unit
/// may be loaded but inactive, which makes `systemctl show` answer the
/// installation question incorrectly. Installed ⇔ the full unit name appears
/// literally in stdout.
pub async fn is_service_installed(
    executor: &dyn CommandExecutor,
    service_full_name: &str,
    scope: Option<Scope>,
) -> Probed<bool> {
    let mut cmd = Command::new("systemctl");
    if let Some(scope) = scope {
        cmd.arg(scope.systemctl_arg());
    }
    cmd.arg("list-unit-files").arg(service_full_name);
    let argv = cmd.argv();

    let outcome = match executor.run(cmd).await {
        Ok(outcome) => outcome,
        Err(e) => {
            return Probed::issue(format!("failed to systemctl-list-unit-files: cmd={argv:?}: {e}"));
        }
    };
    if outcome.failed() {
        return Probed::issue(format!(
            "failed to systemctl-list-unit-files: cmd={argv:?}, {}",
            outcome.describe()
        ));
    }
    let installed = outcome.stdout.contains(service_full_name);
    if installed {
        Probed::ok(true)
    } else {
        Probed::with_issue(
            false,
            format!("unit not listed: cmd={argv:?}, {}", outcome.describe()),
        )
    }
}

/// Probe every scope in fixed order for the service
///
/// Returns the first scope the unit is installed under; when none matches,
/// the issue is the concatenation of every per-scope issue.
pub async fn detect_service_scope(
    executor: &dyn CommandExecutor,
    service_full_name: &str,
) -> Probed<Scope> {
    let mut issues = String::new();
    for scope in ALL_SCOPES {
        let installed = is_service_installed(executor, service_full_name, Some(scope)).await;
        if installed.is_true() {
            return Probed::ok(scope);
        }
        if let Some(issue) = installed.issue {
            issues.push_str(&issue);
        }
    }
    Probed::issue(issues)
}

/// Controller for one component's systemd service within one scope
pub struct ComponentService {
    /// Service name without the `.service` suffix
    pub service_name: String,
    /// Full unit name
    pub service_full_name: String,
    /// The scope every systemctl call runs under
    pub scope: Scope,
    /// The unit file location under the scope's default install dir
    pub service_file: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl ComponentService {
    /// Build a controller for the named service under the given scope
    pub fn new(service_name: &str, scope: Scope, executor: Arc<dyn CommandExecutor>) -> Self {
        let (service_name, service_full_name) = match service_name.strip_suffix(".service") {
            Some(base) => (base.to_string(), service_name.to_string()),
            None => (service_name.to_string(), format!("{service_name}.service")),
        };
        let service_file = scope.default_install_dir().join(&service_full_name);
        Self {
            service_name,
            service_full_name,
            scope,
            service_file,
            executor,
        }
    }

    /// Override the unit file location
    ///
    /// Used when the unit is declared to live somewhere other than the
    /// scope's default directory.
    pub fn with_unit_file(mut self, path: PathBuf) -> Self {
        self.service_file = path;
        self
    }

    async fn run_unit_cmd(&self, action: &str) -> Result<ExecOutcome> {
        let cmd = Command::from_argv([
            "systemctl",
            self.scope.systemctl_arg(),
            action,
            &self.service_full_name,
        ]);
        debug!(command = %cmd, "running unit command");
        Ok(self.executor.run(cmd).await?)
    }

    async fn run_unit_cmd_checked(&self, action: &str) -> Result<ExecOutcome> {
        let outcome = self.run_unit_cmd(action).await?;
        if outcome.failed() {
            return Err(Error::ServiceFailed {
                action: action.to_string(),
                service: self.service_full_name.clone(),
                outcome: outcome.describe(),
            });
        }
        Ok(outcome)
    }

    /// Start the service, failing on nonzero exit
    pub async fn start(&self) -> Result<()> {
        self.run_unit_cmd_checked("start").await.map(|_| ())
    }

    /// Stop the service, failing on nonzero exit
    pub async fn stop(&self) -> Result<()> {
        self.run_unit_cmd_checked("stop").await.map(|_| ())
    }

    /// Enable the service, failing on nonzero exit
    pub async fn enable(&self) -> Result<()> {
        self.run_unit_cmd_checked("enable").await.map(|_| ())
    }

    /// Disable the service, failing on nonzero exit
    pub async fn disable(&self) -> Result<()> {
        self.run_unit_cmd_checked("disable").await.map(|_| ())
    }

    /// Whether the service is currently active
    pub async fn is_active(&self) -> Probed<bool> {
        match self.run_unit_cmd("is-active").await {
            Ok(outcome) if outcome.succeeded() && outcome.stdout.trim() == "active" => {
                Probed::ok(true)
            }
            Ok(outcome) => Probed::with_issue(
                false,
                format!("service found not to be active: {}", outcome.describe()),
            ),
            Err(e) => Probed::with_issue(false, format!("failed to execute <systemctl is-active ...>: {e}")),
        }
    }

    /// Whether the service is enabled
    pub async fn is_enabled(&self) -> Probed<bool> {
        match self.run_unit_cmd("is-enabled").await {
            Ok(outcome) if outcome.succeeded() && outcome.stdout.trim() == "enabled" => {
                Probed::ok(true)
            }
            Ok(outcome) => Probed::with_issue(
                false,
                format!("service found not to be enabled: {}", outcome.describe()),
            ),
            Err(e) => Probed::with_issue(false, format!("failed to execute <systemctl is-enabled ...>: {e}")),
        }
    }

    /// The unit names matching this service, via `systemctl show`
    ///
    /// `systemctl show … --property=Names --value` prints nothing when the
    /// unit is not installed and the full name(s) when it is.
    pub async fn show_unit_names(&self) -> Result<ExecOutcome> {
        let pattern = format!("*{}*", self.service_full_name);
        let cmd = Command::from_argv([
            "systemctl",
            self.scope.systemctl_arg(),
            "show",
            &pattern,
            "--no-pager",
            "--property=Names",
            "--value",
        ]);
        Ok(self.executor.run(cmd).await?)
    }

    /// Reload systemd unit definitions
    pub async fn daemon_reload(&self) -> Result<ExecOutcome> {
        let cmd = Command::from_argv(["systemctl", self.scope.systemctl_arg(), "daemon-reload"]);
        Ok(self.executor.run(cmd).await?)
    }

    /// Reset the failed state of the unit
    pub async fn reset_failed(&self) -> Result<ExecOutcome> {
        self.run_unit_cmd("reset-failed").await
    }

    /// Tear the service down completely
    ///
    /// Stop, disable, remove the unit file, daemon-reload, reset-failed,
    /// then verify the unit is gone; a unit that survives is a fatal error
    /// carrying the outcome of every step.
    pub async fn teardown(&self, store: &dyn FileStore) -> Result<()> {
        let show = self.show_unit_names().await?;
        if show.succeeded() && show.has_blank_stdout_and_stderr() {
            debug!(service = %self.service_full_name, "not installed, skipping teardown");
            return Ok(());
        }

        let res_stop = self.run_unit_cmd("stop").await?;
        let res_disable = self.run_unit_cmd("disable").await?;
        let rm_result = store.remove_file(&self.service_file).await;
        let res_daemon_reload = self.daemon_reload().await?;
        let res_reset_failed = self.run_unit_cmd("reset-failed").await?;

        let installed = is_service_installed(
            self.executor.as_ref(),
            &self.service_full_name,
            Some(self.scope),
        )
        .await;
        if installed.is_true() {
            return Err(Error::TeardownFailed {
                service: self.service_full_name.clone(),
                details: format!(
                    "stop: {} / disable: {} / rm unit file: {:?} / daemon-reload: {} / \
                     reset-failed: {}",
                    res_stop.describe(),
                    res_disable.describe(),
                    rm_result.err().map(|e| e.to_string()),
                    res_daemon_reload.describe(),
                    res_reset_failed.describe(),
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileStore;
    use spire_exec::ScriptedExecutor;

    fn service(exec: ScriptedExecutor) -> ComponentService {
        ComponentService::new("spire_agent", Scope::System, Arc::new(exec))
    }

    #[test]
    fn test_full_name_derivation() {
        let svc = service(ScriptedExecutor::new());
        assert_eq!(svc.service_name, "spire_agent");
        assert_eq!(svc.service_full_name, "spire_agent.service");
        assert!(svc.service_file.ends_with("spire_agent.service"));
    }

    #[smol_potat::test]
    async fn test_is_active() {
        let exec = ScriptedExecutor::new().on(
            ["systemctl", "--system", "is-active", "spire_agent.service"],
            ExecOutcome::ok("active\n"),
        );
        assert!(service(exec).is_active().await.is_true());

        let exec = ScriptedExecutor::new().on(
            ["systemctl", "--system", "is-active", "spire_agent.service"],
            ExecOutcome::err(3, "inactive"),
        );
        let probe = service(exec).is_active().await;
        assert_eq!(probe.value, Some(false));
        assert!(probe.issue.is_some());
    }

    #[smol_potat::test]
    async fn test_is_enabled() {
        let exec = ScriptedExecutor::new().on(
            ["systemctl", "--system", "is-enabled", "spire_agent.service"],
            ExecOutcome::ok("enabled\n"),
        );
        assert!(service(exec).is_enabled().await.is_true());

        let exec = ScriptedExecutor::new().on(
            ["systemctl", "--system", "is-enabled", "spire_agent.service"],
            ExecOutcome::ok("disabled\n"),
        );
        assert_eq!(service(exec).is_enabled().await.value, Some(false));
    }

    #[smol_potat::test]
    async fn test_start_failure_is_fatal() {
        let exec = ScriptedExecutor::new().on(
            ["systemctl", "--system", "start", "spire_agent.service"],
            ExecOutcome::err(1, "unit not found"),
        );
        let err = service(exec).start().await.unwrap_err();
        assert!(matches!(err, Error::ServiceFailed { .. }));
    }

    #[smol_potat::test]
    async fn test_is_service_installed_matches_literal_unit_name() {
        let exec = ScriptedExecutor::new().on(
            ["systemctl", "--system", "list-unit-files"],
            ExecOutcome::ok(
                "UNIT FILE            STATE\nspire_agent.service  disabled\n\n1 unit files listed.\n",
            ),
        );
        let probe = is_service_installed(&exec, "spire_agent.service", Some(Scope::System)).await;
        assert!(probe.is_true());

        let exec = ScriptedExecutor::new().on(
            ["systemctl", "--system", "list-unit-files"],
            ExecOutcome::ok("0 unit files listed.\n"),
        );
        let probe = is_service_installed(&exec, "spire_agent.service", Some(Scope::System)).await;
        assert_eq!(probe.value, Some(false));
        assert!(probe.issue.is_some());
    }

    #[smol_potat::test]
    async fn test_detect_scope_probes_in_fixed_order() {
        let exec = ScriptedExecutor::new()
            .on(
                ["systemctl", "--user", "list-unit-files"],
                ExecOutcome::ok("0 unit files listed.\n"),
            )
            .on(
                ["systemctl", "--system", "list-unit-files"],
                ExecOutcome::ok("spire_agent.service enabled\n"),
            );
        let probe = detect_service_scope(&exec, "spire_agent.service").await;
        assert_eq!(probe.value, Some(Scope::System));

        let calls = exec.calls();
        assert_eq!(calls[0][1], "--user");
        assert_eq!(calls[1][1], "--system");
        // detection stops at the first installed scope
        assert_eq!(calls.len(), 2);
    }

    #[smol_potat::test]
    async fn test_detect_scope_concatenates_issues_when_not_found() {
        let exec = ScriptedExecutor::new().on(
            ["systemctl"],
            ExecOutcome::ok("0 unit files listed.\n"),
        );
        let probe = detect_service_scope(&exec, "spire_agent.service").await;
        assert_eq!(probe.value, None);
        assert!(probe.issue.is_some());
        assert_eq!(exec.calls().len(), 3);
    }

    #[smol_potat::test]
    async fn test_teardown_skipped_when_not_installed() {
        let exec = ScriptedExecutor::new().on(
            ["systemctl", "--system", "show"],
            ExecOutcome::ok(""),
        );
        let store = LocalFileStore::new();
        service(exec).teardown(&store).await.unwrap();
    }
}
