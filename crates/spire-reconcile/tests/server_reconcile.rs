//! Server reconciliation scenarios against a scripted host

mod common;

use common::{
    SystemdFlags, mutating_calls, scripted_component_binary, scripted_systemd, scripted_user,
};
use spire_exec::ScriptedExecutor;
use spire_reconcile::params::ServerParams;
use spire_reconcile::reconciler::{Mode, ServerReconciler};
use spire_system::clock::SystemClock;
use spire_system::fs::LocalFileStore;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

fn server_params(base: &Path, state: &str) -> ServerParams {
    let yaml = format!(
        "state: \"{state}\"\n\
         substate_service_installation: \"enabled\"\n\
         substate_service_status: \"healthy\"\n\
         config_dir: \"{base}/etc/spire\"\n\
         data_dir: \"{base}/var/lib/spire\"\n\
         install_dir: \"{base}/opt/spire\"\n\
         service_dir: \"{base}/systemd\"\n\
         log_dir: \"{base}/log\"\n\
         version: \"1.0.0\"\n\
         download_url: \"file://{base}/dist/spire-1.0.0-linux-x86_64-glibc.tar.gz\"\n\
         service_name: \"spire_server\"\n\
         service_scope: \"system\"\n\
         healthiness_probe_timeout_seconds: 2.0\n\
         trust_domain: \"example.org\"\n\
         registration_uds_path: \"/tmp/spire-registration-test.sock\"\n",
        base = base.display(),
    );
    serde_yaml::from_str(&yaml).unwrap()
}

#[smol_potat::test]
async fn present_installation_is_torn_down_when_absent_is_declared() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let params = server_params(base, "absent");
    let dirs = params.dirs().unwrap();

    // materialize a running installation
    for dir in dirs.dirs.expected_dirs() {
        std::fs::create_dir_all(&dir).unwrap();
    }
    std::fs::write(&dirs.dirs.conf_file, r#"{"server": {}}"#).unwrap();
    std::fs::write(&dirs.dirs.env_file, "SPIRE_SERVER_LOG_LEVEL=INFO\n").unwrap();
    std::fs::write(&dirs.dirs.service_file, "[Unit]\nDescription=SPIRE server\n").unwrap();
    std::fs::write(&dirs.dirs.executable, b"#!/bin/sh\nexit 0\n").unwrap();
    std::fs::set_permissions(
        &dirs.dirs.executable,
        std::fs::Permissions::from_mode(0o755),
    )
    .unwrap();

    let flags = SystemdFlags::new(true, true, true);
    let exec = scripted_user(ScriptedExecutor::new(), &dirs.dirs.service_dir);
    let exec = scripted_systemd(exec, "spire_server.service", &flags, false);
    let exec = scripted_component_binary(
        exec,
        &dirs.dirs.executable,
        "1.0.0",
        "Server is healthy.",
        &flags,
    );
    let exec = Arc::new(exec);

    let reconciler = ServerReconciler::new(
        params,
        exec.clone(),
        Arc::new(LocalFileStore::new()),
        Arc::new(SystemClock::new()),
    );
    let outcome = reconciler.run(Mode::Apply).await.unwrap();

    assert!(outcome.changed);
    assert!(!outcome.failed, "residual diff: {:?}", outcome.failure_message);

    // the teardown sequence ran: stop, disable, unit file removed
    assert!(!mutating_calls(&exec, &["stop"]).is_empty());
    assert!(!mutating_calls(&exec, &["disable"]).is_empty());
    assert!(!dirs.dirs.service_file.exists());

    // managed directories are gone, the shared service dir survives
    assert!(!dirs.dirs.config_dir.exists());
    assert!(!dirs.dirs.data_dir.exists());
    assert!(!dirs.dirs.install_dir.exists());
    assert!(!dirs.dirs.log_dir.exists());
    assert!(dirs.dirs.service_dir.exists());

    assert_eq!(outcome.snapshot["component"]["installed"]["value"], false);
}

#[smol_potat::test]
async fn absent_target_with_absent_expectation_is_a_noop() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let params = server_params(base, "absent");
    let dirs = params.dirs().unwrap();

    let flags = SystemdFlags::new(false, false, false);
    let exec = scripted_user(ScriptedExecutor::new(), &dirs.dirs.service_dir);
    let exec = scripted_systemd(exec, "spire_server.service", &flags, false);
    let exec = Arc::new(exec);

    let reconciler = ServerReconciler::new(
        params,
        exec.clone(),
        Arc::new(LocalFileStore::new()),
        Arc::new(SystemClock::new()),
    );
    let outcome = reconciler.run(Mode::Apply).await.unwrap();

    assert!(!outcome.changed);
    assert!(!outcome.failed);
    assert!(mutating_calls(&exec, &["daemon-reload", "enable", "disable", "start", "stop"]).is_empty());
}
