//! The reconciliation state machine
//!
//! One pass: render the expectation, detect, diff, then either report (plan
//! mode), no-op, or apply the ordered corrective actions and verify that the
//! target converged. A pass that acts but leaves a residual divergence is a
//! failed outcome, never a silent partial application.

use crate::differ::{agent_diff, server_diff, shared_dir_policy};
use crate::expected::{ExpectedConfig, expected_file_stats, resolve_owner_group};
use crate::fetch::{ReleaseFetcher, extract_member};
use crate::outcome::ReconcileOutcome;
use crate::params::{AgentParams, ServerParams};
use crate::{Error, Result};
use chrono::Utc;
use spire_exec::CommandExecutor;
use spire_model::diff::ComponentDiff;
use spire_model::dirs::{AgentDirs, ServerDirs};
use spire_model::file_stat::FileModes;
use spire_model::state::{AgentRegistered, ServiceInstallation, ServiceStatus, State};
use spire_model::agent_entry::AgentEntryFilter;
use spire_system::clock::Clock;
use spire_system::fs::{FileAttrs, FileStore};
use spire_system::health::wait_for_healthy;
use spire_system::info::{AgentInfo, AgentSnapshot, ServerInfo, ServerSnapshot};
use spire_system::server_cmd::ServerCommands;
use spire_system::service::ComponentService;
use spire_system::user::User;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// How a pass is allowed to interact with the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Detect and diff only; no mutating collaborator is invoked
    Plan,
    /// Apply the corrective actions the diff demands
    Apply,
}

async fn copy_or_touch_attrs(
    store: &dyn FileStore,
    diff: &ComponentDiff,
    src: Option<&Path>,
    dest: &Path,
    attrs: &FileAttrs,
) -> Result<()> {
    if diff.need_content_change(dest)? {
        let src = src.ok_or_else(|| {
            Error::Precondition(format!(
                "no rendered source for managed file {}",
                dest.display()
            ))
        })?;
        store.copy(src, dest, attrs).await?;
    } else if diff.need_attrs_change(dest)? {
        // attributes drifted but content matches: no content transfer
        store.apply_attrs(dest, attrs).await?;
    }
    Ok(())
}

async fn create_needed_dirs(
    store: &dyn FileStore,
    diff: &ComponentDiff,
    expected_dirs: &[PathBuf],
    dir_mode: u32,
    owner: &FileAttrs,
) -> Result<()> {
    for dir in diff.dirs_needing_change(expected_dirs) {
        store.create_dir(&dir, dir_mode).await?;
        if owner.owner.is_some() {
            store.apply_attrs(&dir, owner).await?;
        }
    }
    Ok(())
}

async fn align_service_installation(
    service: &ComponentService,
    store: &dyn FileStore,
    expected: Option<ServiceInstallation>,
) -> Result<bool> {
    match expected {
        Some(ServiceInstallation::NotInstalled) => {
            service.teardown(store).await?;
            Ok(false)
        }
        Some(ServiceInstallation::Enabled) => {
            service.daemon_reload().await?;
            service.enable().await?;
            Ok(true)
        }
        Some(ServiceInstallation::Installed) | None => {
            service.daemon_reload().await?;
            if service.is_enabled().await.is_true() {
                service.disable().await?;
            }
            Ok(true)
        }
    }
}

/// Reconciles a SPIRE agent installation on one target
pub struct AgentReconciler {
    params: AgentParams,
    executor: Arc<dyn CommandExecutor>,
    server: ServerCommands,
    store: Arc<dyn FileStore>,
    clock: Arc<dyn Clock>,
    fetcher: ReleaseFetcher,
    with_diff: bool,
}

impl AgentReconciler {
    /// Wire a reconciler to its collaborators
    ///
    /// `server_executor` runs `spire-server` commands (token generation,
    /// bundle retrieval, registration queries); `executor` runs everything
    /// addressed at the agent's host.
    pub fn new(
        params: AgentParams,
        executor: Arc<dyn CommandExecutor>,
        server_executor: Arc<dyn CommandExecutor>,
        store: Arc<dyn FileStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let server = ServerCommands::new(
            server_executor,
            params.server_install_dir.as_deref().map(Path::new),
            params.server_registration_uds_path.clone(),
        );
        Self {
            params,
            executor,
            server,
            store,
            clock,
            fetcher: ReleaseFetcher::new(),
            with_diff: false,
        }
    }

    /// Request before/after diff entries in the outcome
    pub fn with_diff(mut self, with_diff: bool) -> Self {
        self.with_diff = with_diff;
        self
    }

    /// Run one reconciliation pass
    pub async fn run(&self, mode: Mode) -> Result<ReconcileOutcome> {
        self.params.validate()?;
        let dirs = self.params.dirs()?;
        let expected_state = self.params.expected_state()?;
        let modes = self.params.file_modes()?;
        let work = tempfile::tempdir()?;
        let user = User::current(self.executor.as_ref()).await?;
        let (owner, group) = resolve_owner_group(self.params.install_file_owner.as_deref());

        let expected = ExpectedConfig::for_agent(&self.params, &dirs, work.path(), None, None)?;
        let expected_stats = expected_file_stats(
            self.params.state,
            &dirs.dirs.expected_dirs(),
            &dirs.expected_files_not_exec(),
            &dirs.dirs.expected_files_exec(),
            &modes,
            owner.as_deref(),
            group.as_deref(),
        );

        let info = self.info(&dirs);
        let mut snapshot = info.snapshot(self.store.as_ref()).await;
        self.refine_registration(&mut snapshot).await?;
        let diff = agent_diff(
            &snapshot,
            &expected_state,
            &expected,
            &expected_stats,
            &dirs,
            &user,
        )?;

        if mode == Mode::Plan {
            let mut outcome =
                ReconcileOutcome::new(diff.need_change(), serde_json::to_value(&snapshot)?);
            if self.with_diff {
                let entries = if diff.need_change() { diff.entries() } else { Vec::new() };
                outcome = outcome.with_diff(entries);
            }
            return Ok(outcome);
        }

        if !diff.need_change() {
            debug!("agent already converged, nothing to do");
            let mut outcome = ReconcileOutcome::new(false, serde_json::to_value(&snapshot)?);
            if self.with_diff {
                outcome = outcome.with_diff(Vec::new());
            }
            return Ok(outcome);
        }

        if self.params.state == State::Present {
            self.apply_present(&dirs, &modes, &expected_state, &diff, &info, &snapshot, work.path())
                .await?;
        } else {
            self.apply_absent(&dirs, &info, &snapshot, &user).await?;
        }

        let mut final_snapshot = info.snapshot(self.store.as_ref()).await;
        self.refine_registration(&mut final_snapshot).await?;
        let post_diff = agent_diff(
            &final_snapshot,
            &expected_state,
            &expected,
            &expected_stats,
            &dirs,
            &user,
        )?;

        let mut outcome = ReconcileOutcome::new(true, serde_json::to_value(&final_snapshot)?);
        if post_diff.need_change() {
            outcome = outcome.with_residual(post_diff.entries());
        }
        if self.with_diff {
            outcome = outcome.with_diff(diff.entries());
        }
        Ok(outcome)
    }

    fn info(&self, dirs: &AgentDirs) -> AgentInfo {
        AgentInfo::new(
            self.executor.clone(),
            dirs.clone(),
            Some(self.params.socket_path.clone()),
            Some(self.params.version.clone()),
            self.params.service_scope.clone(),
        )
    }

    /// Refine the registration substate with the server's records
    ///
    /// The host alone cannot answer the registration question; the record
    /// lives in the server's data. An agent without an SVID on disk cannot
    /// be attested, hence not registered.
    async fn refine_registration(&self, snapshot: &mut AgentSnapshot) -> Result<()> {
        let Some(spiffe_id) = snapshot.spiffe_id.value.clone() else {
            snapshot.registered = AgentRegistered::No;
            return Ok(());
        };
        let filter = AgentEntryFilter {
            spiffe_ids: vec![spiffe_id],
            attestation_types: vec!["join_token".to_string()],
            serial_numbers: snapshot.serial_number.iter().cloned().collect(),
        };
        let entries = self.server.agent_list(&filter).await?;
        let now = Utc::now();
        let live = entries.iter().any(|e| e.is_live_at(now));
        snapshot.registered = AgentRegistered::from_flag(live);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_present(
        &self,
        dirs: &AgentDirs,
        modes: &FileModes,
        expected_state: &spire_model::state::StateOfAgent,
        diff: &ComponentDiff,
        info: &AgentInfo,
        snapshot: &AgentSnapshot,
        work_dir: &Path,
    ) -> Result<()> {
        let service = info.service(snapshot);
        // never mutate files or binaries under a live process
        if snapshot.component.service_running.is_true() {
            service.stop().await?;
        }

        let join_token = self
            .server
            .token_generate(
                self.params.additional_spiffe_id.as_deref(),
                Some(self.params.join_token_ttl),
            )
            .await?;
        let bundle = self.server.bundle_show().await?;
        let server_version = self.server.version().await?;
        info!(server_version = %server_version, "acquired join token and trust bundle");

        let expected = ExpectedConfig::for_agent(
            &self.params,
            dirs,
            work_dir,
            Some(&join_token),
            Some(&bundle),
        )?;

        let need_binary = diff.need_binary_change(&dirs.dirs.executable);
        let extracted = if need_binary {
            let archive = self
                .fetcher
                .fetch(&self.params.download_url, &self.params.version, work_dir)
                .await?;
            Some(extract_member(&archive, "/bin/spire-agent")?)
        } else {
            debug!("binary unchanged, skipping release download");
            None
        };

        let owner_attrs = FileAttrs {
            owner: self.params.install_file_owner.clone(),
            mode: None,
        };
        create_needed_dirs(
            self.store.as_ref(),
            diff,
            &dirs.dirs.expected_dirs(),
            modes.dir,
            &owner_attrs,
        )
        .await?;

        if let Some(bin_src) = extracted {
            let attrs = FileAttrs {
                owner: self.params.install_file_owner.clone(),
                mode: Some(modes.exe),
            };
            self.store
                .copy(&bin_src, &dirs.dirs.executable, &attrs)
                .await?;
        }

        let attrs = FileAttrs {
            owner: self.params.install_file_owner.clone(),
            mode: Some(modes.file),
        };
        copy_or_touch_attrs(
            self.store.as_ref(),
            diff,
            expected.conf_file.as_deref(),
            &dirs.dirs.conf_file,
            &attrs,
        )
        .await?;
        copy_or_touch_attrs(
            self.store.as_ref(),
            diff,
            expected.env_file.as_deref(),
            &dirs.dirs.env_file,
            &attrs,
        )
        .await?;
        copy_or_touch_attrs(
            self.store.as_ref(),
            diff,
            expected.service_file.as_deref(),
            &dirs.dirs.service_file,
            &attrs,
        )
        .await?;
        copy_or_touch_attrs(
            self.store.as_ref(),
            diff,
            expected.trust_bundle_file.as_deref(),
            &dirs.trust_bundle_file,
            &attrs,
        )
        .await?;

        self.apply_service_state(info, snapshot, expected_state).await
    }

    async fn apply_service_state(
        &self,
        info: &AgentInfo,
        snapshot: &AgentSnapshot,
        expected_state: &spire_model::state::StateOfAgent,
    ) -> Result<()> {
        let service = info.service(snapshot);
        let keep_installed = align_service_installation(
            &service,
            self.store.as_ref(),
            expected_state.service_installation,
        )
        .await?;
        if !keep_installed {
            return Ok(());
        }

        match expected_state.service_status {
            Some(ServiceStatus::Stopped) => {
                if expected_state.agent_registered == Some(AgentRegistered::Yes)
                    && snapshot.registered != AgentRegistered::Yes
                {
                    // registration is a collaborative job between agent and
                    // server: a healthy agent necessarily holds a valid
                    // registration, so run one health cycle before stopping
                    service.start().await?;
                    self.wait_healthy(info).await?;
                }
                if service.is_active().await.is_true() {
                    service.stop().await?;
                }
            }
            Some(ServiceStatus::Started) => {
                service.start().await?;
            }
            Some(ServiceStatus::Healthy) | None => {
                service.start().await?;
                self.wait_healthy(info).await?;
            }
        }
        Ok(())
    }

    async fn wait_healthy(&self, info: &AgentInfo) -> Result<()> {
        wait_for_healthy(
            self.clock.as_ref(),
            Some(self.params.healthiness_probe_timeout_seconds),
            || info.detect_health(self.store.as_ref()),
        )
        .await?;
        Ok(())
    }

    async fn apply_absent(
        &self,
        dirs: &AgentDirs,
        info: &AgentInfo,
        snapshot: &AgentSnapshot,
        user: &User,
    ) -> Result<()> {
        let service = info.service(snapshot);
        service.teardown(self.store.as_ref()).await?;

        let policy = shared_dir_policy(user);
        for dir in [&dirs.dirs.config_dir, &dirs.dirs.data_dir, &dirs.dirs.install_dir] {
            if !policy.is_shared(dir) {
                self.store.remove_tree(dir).await?;
            }
        }
        let log_dir = &dirs.dirs.log_dir;
        if log_dir != Path::new("/var/log") && !policy.is_shared(log_dir) {
            self.store.remove_tree(log_dir).await?;
        }
        Ok(())
    }
}

/// Reconciles a SPIRE server installation on one target
pub struct ServerReconciler {
    params: ServerParams,
    executor: Arc<dyn CommandExecutor>,
    store: Arc<dyn FileStore>,
    clock: Arc<dyn Clock>,
    fetcher: ReleaseFetcher,
    with_diff: bool,
}

impl ServerReconciler {
    /// Wire a reconciler to its collaborators
    pub fn new(
        params: ServerParams,
        executor: Arc<dyn CommandExecutor>,
        store: Arc<dyn FileStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            params,
            executor,
            store,
            clock,
            fetcher: ReleaseFetcher::new(),
            with_diff: false,
        }
    }

    /// Request before/after diff entries in the outcome
    pub fn with_diff(mut self, with_diff: bool) -> Self {
        self.with_diff = with_diff;
        self
    }

    /// Run one reconciliation pass
    pub async fn run(&self, mode: Mode) -> Result<ReconcileOutcome> {
        self.params.validate()?;
        let dirs = self.params.dirs()?;
        let expected_state = self.params.expected_state()?;
        let modes = self.params.file_modes()?;
        let work = tempfile::tempdir()?;
        let user = User::current(self.executor.as_ref()).await?;
        let (owner, group) = resolve_owner_group(self.params.install_file_owner.as_deref());

        let expected = ExpectedConfig::for_server(&self.params, &dirs, work.path())?;
        let expected_stats = expected_file_stats(
            self.params.state,
            &dirs.dirs.expected_dirs(),
            &dirs.dirs.expected_files_not_exec(),
            &dirs.dirs.expected_files_exec(),
            &modes,
            owner.as_deref(),
            group.as_deref(),
        );

        let info = self.info(&dirs);
        let snapshot = info.snapshot(self.store.as_ref()).await;
        let diff = server_diff(
            &snapshot,
            &expected_state,
            &expected,
            &expected_stats,
            &dirs,
            &user,
        )?;

        if mode == Mode::Plan {
            let mut outcome =
                ReconcileOutcome::new(diff.need_change(), serde_json::to_value(&snapshot)?);
            if self.with_diff {
                let entries = if diff.need_change() { diff.entries() } else { Vec::new() };
                outcome = outcome.with_diff(entries);
            }
            return Ok(outcome);
        }

        if !diff.need_change() {
            debug!("server already converged, nothing to do");
            let mut outcome = ReconcileOutcome::new(false, serde_json::to_value(&snapshot)?);
            if self.with_diff {
                outcome = outcome.with_diff(Vec::new());
            }
            return Ok(outcome);
        }

        if self.params.state == State::Present {
            self.apply_present(&dirs, &modes, &expected_state, &expected, &diff, &info, &snapshot, work.path())
                .await?;
        } else {
            self.apply_absent(&dirs, &info, &snapshot, &user).await?;
        }

        let final_snapshot = info.snapshot(self.store.as_ref()).await;
        let post_diff = server_diff(
            &final_snapshot,
            &expected_state,
            &expected,
            &expected_stats,
            &dirs,
            &user,
        )?;

        let mut outcome = ReconcileOutcome::new(true, serde_json::to_value(&final_snapshot)?);
        if post_diff.need_change() {
            outcome = outcome.with_residual(post_diff.entries());
        }
        if self.with_diff {
            outcome = outcome.with_diff(diff.entries());
        }
        Ok(outcome)
    }

    fn info(&self, dirs: &ServerDirs) -> ServerInfo {
        ServerInfo::new(
            self.executor.clone(),
            dirs.clone(),
            self.params.registration_uds_path.clone(),
            Some(self.params.version.clone()),
            self.params.service_scope.clone(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_present(
        &self,
        dirs: &ServerDirs,
        modes: &FileModes,
        expected_state: &spire_model::state::StateOfServer,
        expected: &ExpectedConfig,
        diff: &ComponentDiff,
        info: &ServerInfo,
        snapshot: &ServerSnapshot,
        work_dir: &Path,
    ) -> Result<()> {
        let service = info.service(snapshot);
        // never mutate files or binaries under a live process
        if snapshot.component.service_running.is_true() {
            service.stop().await?;
        }

        let need_binary = diff.need_binary_change(&dirs.dirs.executable);
        let extracted = if need_binary {
            let archive = self
                .fetcher
                .fetch(&self.params.download_url, &self.params.version, work_dir)
                .await?;
            Some(extract_member(&archive, "/bin/spire-server")?)
        } else {
            debug!("binary unchanged, skipping release download");
            None
        };

        let owner_attrs = FileAttrs {
            owner: self.params.install_file_owner.clone(),
            mode: None,
        };
        create_needed_dirs(
            self.store.as_ref(),
            diff,
            &dirs.dirs.expected_dirs(),
            modes.dir,
            &owner_attrs,
        )
        .await?;

        if let Some(bin_src) = extracted {
            let attrs = FileAttrs {
                owner: self.params.install_file_owner.clone(),
                mode: Some(modes.exe),
            };
            self.store
                .copy(&bin_src, &dirs.dirs.executable, &attrs)
                .await?;
        }

        let attrs = FileAttrs {
            owner: self.params.install_file_owner.clone(),
            mode: Some(modes.file),
        };
        copy_or_touch_attrs(
            self.store.as_ref(),
            diff,
            expected.conf_file.as_deref(),
            &dirs.dirs.conf_file,
            &attrs,
        )
        .await?;
        copy_or_touch_attrs(
            self.store.as_ref(),
            diff,
            expected.env_file.as_deref(),
            &dirs.dirs.env_file,
            &attrs,
        )
        .await?;
        copy_or_touch_attrs(
            self.store.as_ref(),
            diff,
            expected.service_file.as_deref(),
            &dirs.dirs.service_file,
            &attrs,
        )
        .await?;

        let keep_installed = align_service_installation(
            &service,
            self.store.as_ref(),
            expected_state.service_installation,
        )
        .await?;
        if !keep_installed {
            return Ok(());
        }

        match expected_state.service_status {
            Some(ServiceStatus::Stopped) => {
                if service.is_active().await.is_true() {
                    service.stop().await?;
                }
            }
            Some(ServiceStatus::Started) => {
                service.start().await?;
            }
            Some(ServiceStatus::Healthy) | None => {
                service.start().await?;
                wait_for_healthy(
                    self.clock.as_ref(),
                    Some(self.params.healthiness_probe_timeout_seconds),
                    || info.detect_health(self.store.as_ref()),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn apply_absent(
        &self,
        dirs: &ServerDirs,
        info: &ServerInfo,
        snapshot: &ServerSnapshot,
        user: &User,
    ) -> Result<()> {
        let service = info.service(snapshot);
        service.teardown(self.store.as_ref()).await?;

        let policy = shared_dir_policy(user);
        for dir in [&dirs.dirs.config_dir, &dirs.dirs.data_dir, &dirs.dirs.install_dir] {
            if !policy.is_shared(dir) {
                self.store.remove_tree(dir).await?;
            }
        }
        let log_dir = &dirs.dirs.log_dir;
        if log_dir != Path::new("/var/log") && !policy.is_shared(log_dir) {
            self.store.remove_tree(log_dir).await?;
        }
        Ok(())
    }
}
