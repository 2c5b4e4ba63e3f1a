//! State detection: point-in-time snapshots of a component installation

use crate::fs::FileStore;
use crate::health::{
    agent_healthy_pattern, agent_socket_args, is_component_healthy, server_healthy_pattern,
    server_socket_args,
};
use crate::scope::Scope;
use crate::service::{ComponentService, detect_service_scope, is_service_installed};
use crate::svid::cert_identity;
use spire_exec::{Command, CommandExecutor};
use spire_model::dirs::{AgentDirs, ComponentDirs, ServerDirs};
use spire_model::file_stat::FileStats;
use spire_model::probe::Probed;
use spire_model::state::{
    AgentRegistered, ServiceInstallation, ServiceStatus, State, StateOfAgent, StateOfServer,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Detect an executable's version via `<exe> --version`
///
/// The binary prints its version to stderr; stdout is the fallback in case
/// that changes. A missing executable or failed execution is an issue, not
/// an error.
pub async fn detect_executable_version(
    executor: &dyn CommandExecutor,
    executable: &Path,
    executable_exists: bool,
) -> Probed<String> {
    if !executable_exists {
        return Probed::issue(format!("{} does not exist", executable.display()));
    }
    let mut cmd = Command::new(executable.display().to_string());
    cmd.arg("--version");
    let argv = cmd.argv();
    let outcome = match executor.run(cmd).await {
        Ok(outcome) => outcome,
        Err(e) => return Probed::issue(format!("fail to execute command {argv:?}: {e}")),
    };
    if outcome.failed() {
        return Probed::issue(format!(
            "fail to execute command {argv:?}: {}",
            outcome.describe()
        ));
    }
    let version = if !outcome.has_blank_stderr() {
        outcome.stderr
    } else {
        outcome.stdout
    };
    Probed::ok(version.trim().to_string())
}

fn installed_probe(
    executable: &Path,
    executable_exists: bool,
    conf_file: &Path,
    conf_exists: bool,
    expected_version: Option<&str>,
    version: &Probed<String>,
) -> Probed<bool> {
    let version_matches = match expected_version {
        None => true,
        Some(expected) => version.as_ref().map(String::as_str) == Some(expected),
    };
    if executable_exists && conf_exists && version_matches {
        Probed::ok(true)
    } else {
        Probed::with_issue(
            false,
            format!(
                "version: {:?}, {}: {executable_exists}, {}: {conf_exists}",
                version.value,
                executable.display(),
                conf_file.display()
            ),
        )
    }
}

/// Detected state shared by agent and server installations
#[derive(Debug, Clone, Serialize)]
pub struct ComponentSnapshot {
    /// Whether the component is installed (binary + config + version)
    pub installed: Probed<bool>,
    /// Detected binary version
    pub version: Probed<String>,
    /// The expected executable path
    pub executable_path: PathBuf,
    /// Trust domain id from the bundled CA certificate
    pub trust_domain_id: Probed<String>,
    /// Whether the component answers its healthcheck
    pub healthy: Probed<bool>,
    /// The scope the service is installed under
    pub service_scope: Probed<Scope>,
    /// Whether the service unit is installed
    pub service_installed: Probed<bool>,
    /// Whether the service is running
    pub service_running: Probed<bool>,
    /// Whether the service is enabled
    pub service_enabled: Probed<bool>,
    /// Normalized digest of the configuration file
    pub config_file_digest: Probed<String>,
    /// Normalized digest of the service unit file
    pub service_file_digest: Probed<String>,
    /// Attributes of every expected directory and file
    pub file_stats: FileStats,
}

impl ComponentSnapshot {
    /// Base state rollup: installed ⇒ present
    pub fn state(&self) -> State {
        State::from_installed(self.installed.is_true())
    }

    /// Service status rollup: healthy > started > stopped
    pub fn service_status(&self) -> ServiceStatus {
        ServiceStatus::from_flags(self.healthy.is_true(), self.service_running.is_true())
    }

    /// Service installation rollup: enabled > installed > not_installed
    pub fn service_installation(&self) -> ServiceInstallation {
        ServiceInstallation::from_flags(
            self.service_enabled.is_true(),
            self.service_installed.is_true(),
        )
    }

    /// Every probe issue collected during detection
    pub fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let mut push = |issue: &Option<String>| {
            if let Some(issue) = issue {
                issues.push(issue.clone());
            }
        };
        push(&self.installed.issue);
        push(&self.version.issue);
        push(&self.trust_domain_id.issue);
        push(&self.healthy.issue);
        push(&self.service_scope.issue);
        push(&self.service_installed.issue);
        push(&self.service_running.issue);
        push(&self.service_enabled.issue);
        push(&self.config_file_digest.issue);
        push(&self.service_file_digest.issue);
        issues
    }
}

async fn component_snapshot(
    executor: &Arc<dyn CommandExecutor>,
    store: &dyn FileStore,
    dirs: &ComponentDirs,
    expected_dirs_and_files: &[PathBuf],
    declared_scope: Option<&str>,
    expected_version: Option<&str>,
    healthy: Probed<bool>,
    trust_domain_id: Probed<String>,
) -> ComponentSnapshot {
    let executable_exists = store.exists(&dirs.executable).await;
    let conf_exists = store.exists(&dirs.conf_file).await;

    let version =
        detect_executable_version(executor.as_ref(), &dirs.executable, executable_exists).await;
    let installed = installed_probe(
        &dirs.executable,
        executable_exists,
        &dirs.conf_file,
        conf_exists,
        expected_version,
        &version,
    );

    let service_scope = detect_service_scope(executor.as_ref(), &dirs.service_full_name).await;
    let effective_scope = Scope::or_default(service_scope.value, declared_scope);
    let service = ComponentService::new(&dirs.service_full_name, effective_scope, executor.clone());

    let service_installed =
        is_service_installed(executor.as_ref(), &dirs.service_full_name, service_scope.value)
            .await;
    let service_running = service.is_active().await;
    let service_enabled = service.is_enabled().await;

    let config_file_digest = store.digest_config(&dirs.conf_file).await;
    let service_file_digest = store.digest_service_unit(&dirs.service_file).await;

    let mut file_stats = FileStats::default();
    for path in expected_dirs_and_files {
        file_stats.insert(path.clone(), store.stat(path).await);
    }

    ComponentSnapshot {
        installed,
        version,
        executable_path: dirs.executable.clone(),
        trust_domain_id,
        healthy,
        service_scope,
        service_installed,
        service_running,
        service_enabled,
        config_file_digest,
        service_file_digest,
        file_stats,
    }
}

/// Detector for a SPIRE agent installation
pub struct AgentInfo {
    /// The agent's directory layout
    pub dirs: AgentDirs,
    executor: Arc<dyn CommandExecutor>,
    socket_path: Option<String>,
    expected_version: Option<String>,
    declared_scope: Option<String>,
}

/// Detected state of a SPIRE agent installation
#[derive(Debug, Clone, Serialize)]
pub struct AgentSnapshot {
    /// State shared with the server detector
    pub component: ComponentSnapshot,
    /// The agent's SPIFFE ID from its SVID on disk
    pub spiffe_id: Probed<String>,
    /// The SVID serial number, decimal rendering
    pub serial_number: Option<String>,
    /// Registration substate; refined by a server-side query when available
    pub registered: AgentRegistered,
}

impl AgentSnapshot {
    /// The composite state this snapshot represents
    pub fn state_of_agent(&self) -> StateOfAgent {
        StateOfAgent {
            state: self.component.state(),
            service_installation: Some(self.component.service_installation()),
            service_status: Some(self.component.service_status()),
            agent_registered: Some(self.registered),
        }
    }
}

impl AgentInfo {
    /// Build a detector over the given executor and layout
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        dirs: AgentDirs,
        socket_path: Option<String>,
        expected_version: Option<String>,
        declared_scope: Option<String>,
    ) -> Self {
        Self {
            dirs,
            executor,
            socket_path,
            expected_version,
            declared_scope,
        }
    }

    /// Run the agent's healthcheck once
    pub async fn detect_health(&self, store: &dyn FileStore) -> Probed<bool> {
        if !store.exists(&self.dirs.dirs.executable).await {
            return Probed::issue(format!(
                "{} does not exist",
                self.dirs.dirs.executable.display()
            ));
        }
        is_component_healthy(
            self.executor.as_ref(),
            &self.dirs.dirs.executable,
            &agent_socket_args(self.socket_path.as_deref()),
            &agent_healthy_pattern(),
        )
        .await
    }

    /// Assemble a full snapshot of the installation
    ///
    /// Registration is reported `Indeterminable`: the registration record
    /// lives in the server's data, which this host-side detector cannot
    /// see. The reconciler refines it with a server-side query.
    pub async fn snapshot(&self, store: &dyn FileStore) -> AgentSnapshot {
        let healthy = self.detect_health(store).await;
        let svid = cert_identity(&self.dirs.dirs.data_dir.join("agent_svid.der"));
        let trust_domain = cert_identity(&self.dirs.dirs.data_dir.join("bundle.der"));

        let (spiffe_id, serial_number) = match svid.value {
            Some(identity) => (
                Probed {
                    value: Some(identity.uri),
                    issue: svid.issue,
                },
                Some(identity.serial),
            ),
            None => (
                Probed {
                    value: None,
                    issue: svid.issue,
                },
                None,
            ),
        };
        let trust_domain_id = Probed {
            value: trust_domain.value.map(|identity| identity.uri),
            issue: trust_domain.issue,
        };

        let component = component_snapshot(
            &self.executor,
            store,
            &self.dirs.dirs,
            &self.dirs.expected_dirs_and_files(),
            self.declared_scope.as_deref(),
            self.expected_version.as_deref(),
            healthy,
            trust_domain_id,
        )
        .await;

        AgentSnapshot {
            component,
            spiffe_id,
            serial_number,
            registered: AgentRegistered::Indeterminable,
        }
    }

    /// A service controller under the snapshot's effective scope
    pub fn service(&self, snapshot: &AgentSnapshot) -> ComponentService {
        let scope = Scope::or_default(
            snapshot.component.service_scope.value,
            self.declared_scope.as_deref(),
        );
        ComponentService::new(&self.dirs.dirs.service_full_name, scope, self.executor.clone())
            .with_unit_file(self.dirs.dirs.service_file.clone())
    }
}

/// Detector for a SPIRE server installation
pub struct ServerInfo {
    /// The server's directory layout
    pub dirs: ServerDirs,
    executor: Arc<dyn CommandExecutor>,
    registration_uds_path: Option<String>,
    expected_version: Option<String>,
    declared_scope: Option<String>,
}

/// Detected state of a SPIRE server installation
#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    /// State shared with the agent detector
    pub component: ComponentSnapshot,
}

impl ServerSnapshot {
    /// The composite state this snapshot represents
    pub fn state_of_server(&self) -> StateOfServer {
        StateOfServer {
            state: self.component.state(),
            service_installation: Some(self.component.service_installation()),
            service_status: Some(self.component.service_status()),
        }
    }
}

impl ServerInfo {
    /// Build a detector over the given executor and layout
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        dirs: ServerDirs,
        registration_uds_path: Option<String>,
        expected_version: Option<String>,
        declared_scope: Option<String>,
    ) -> Self {
        Self {
            dirs,
            executor,
            registration_uds_path,
            expected_version,
            declared_scope,
        }
    }

    /// Run the server's healthcheck once
    pub async fn detect_health(&self, store: &dyn FileStore) -> Probed<bool> {
        if !store.exists(&self.dirs.dirs.executable).await {
            return Probed::issue(format!(
                "{} does not exist",
                self.dirs.dirs.executable.display()
            ));
        }
        is_component_healthy(
            self.executor.as_ref(),
            &self.dirs.dirs.executable,
            &server_socket_args(self.registration_uds_path.as_deref()),
            &server_healthy_pattern(),
        )
        .await
    }

    /// Assemble a full snapshot of the installation
    pub async fn snapshot(&self, store: &dyn FileStore) -> ServerSnapshot {
        let healthy = self.detect_health(store).await;
        let trust_domain = cert_identity(&self.dirs.dirs.data_dir.join("bundle.der"));
        let trust_domain_id = Probed {
            value: trust_domain.value.map(|identity| identity.uri),
            issue: trust_domain.issue,
        };

        let component = component_snapshot(
            &self.executor,
            store,
            &self.dirs.dirs,
            &self.dirs.expected_dirs_and_files(),
            self.declared_scope.as_deref(),
            self.expected_version.as_deref(),
            healthy,
            trust_domain_id,
        )
        .await;

        ServerSnapshot { component }
    }

    /// A service controller under the snapshot's effective scope
    pub fn service(&self, snapshot: &ServerSnapshot) -> ComponentService {
        let scope = Scope::or_default(
            snapshot.component.service_scope.value,
            self.declared_scope.as_deref(),
        );
        ComponentService::new(&self.dirs.dirs.service_full_name, scope, self.executor.clone())
            .with_unit_file(self.dirs.dirs.service_file.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalFileStore;
    use spire_exec::{ExecOutcome, ScriptedExecutor};

    fn agent_dirs(base: &Path) -> AgentDirs {
        AgentDirs::new(
            base.join("etc").to_str().unwrap(),
            base.join("data").to_str().unwrap(),
            base.join("opt").to_str().unwrap(),
            base.join("systemd").to_str().unwrap(),
            base.join("log").to_str().unwrap(),
            "spire_agent",
        )
        .unwrap()
    }

    #[smol_potat::test]
    async fn test_detect_version_missing_executable() {
        let exec = ScriptedExecutor::new();
        let probe =
            detect_executable_version(&exec, Path::new("/opt/spire/bin/spire-agent"), false).await;
        assert_eq!(probe.value, None);
        assert!(probe.issue.unwrap().contains("does not exist"));
        // the executor must not have been asked to run anything
        assert!(exec.calls().is_empty());
    }

    #[smol_potat::test]
    async fn test_detect_version_prefers_stderr() {
        let exec = ScriptedExecutor::new().on(
            ["/opt/spire/bin/spire-agent", "--version"],
            ExecOutcome {
                code: Some(0),
                stdout: "ignored\n".to_string(),
                stderr: "1.0.0\n".to_string(),
            },
        );
        let probe =
            detect_executable_version(&exec, Path::new("/opt/spire/bin/spire-agent"), true).await;
        assert_eq!(probe.value.as_deref(), Some("1.0.0"));
    }

    #[smol_potat::test]
    async fn test_detect_version_nonzero_exit_is_issue() {
        let exec = ScriptedExecutor::new().on(
            ["/opt/spire/bin/spire-agent", "--version"],
            ExecOutcome::err(1, "cannot load"),
        );
        let probe =
            detect_executable_version(&exec, Path::new("/opt/spire/bin/spire-agent"), true).await;
        assert_eq!(probe.value, None);
        assert!(probe.issue.unwrap().contains("cannot load"));
    }

    #[smol_potat::test]
    async fn test_snapshot_of_empty_target_is_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = agent_dirs(tmp.path());
        // nothing installed: every systemctl probe answers empty
        let exec = ScriptedExecutor::new()
            .on(["systemctl"], ExecOutcome::ok("0 unit files listed.\n"));
        let info = AgentInfo::new(Arc::new(exec), dirs, None, None, Some("system".to_string()));
        let snapshot = info.snapshot(&LocalFileStore::new()).await;

        assert_eq!(snapshot.component.state(), State::Absent);
        assert_eq!(
            snapshot.component.service_installation(),
            ServiceInstallation::NotInstalled
        );
        assert_eq!(snapshot.component.service_status(), ServiceStatus::Stopped);
        assert_eq!(snapshot.registered, AgentRegistered::Indeterminable);
        assert!(snapshot.spiffe_id.value.is_none());
        assert!(!snapshot.component.issues().is_empty());
        // every expected path has a stat, all reporting absence
        assert_eq!(
            snapshot.component.file_stats.paths().len(),
            info.dirs.expected_dirs_and_files().len()
        );
    }

    #[smol_potat::test]
    async fn test_installed_probe_requires_version_match() {
        let version = Probed::ok("1.0.0".to_string());
        let exe = Path::new("/opt/bin/spire-agent");
        let conf = Path::new("/etc/agent.conf");
        assert!(installed_probe(exe, true, conf, true, Some("1.0.0"), &version).is_true());
        assert!(installed_probe(exe, true, conf, true, None, &version).is_true());

        let probe = installed_probe(exe, true, conf, true, Some("1.1.0"), &version);
        assert_eq!(probe.value, Some(false));
        let probe = installed_probe(exe, false, conf, true, None, &version);
        assert_eq!(probe.value, Some(false));
        assert!(probe.issue.is_some());
    }
}
