//! Shared fixtures for reconciler scenario tests

use spire_exec::{ExecOutcome, ScriptedExecutor};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Mutable systemd state shared between scripted rules
#[derive(Clone, Default)]
pub struct SystemdFlags {
    pub installed: Arc<AtomicBool>,
    pub enabled: Arc<AtomicBool>,
    pub running: Arc<AtomicBool>,
}

impl SystemdFlags {
    pub fn new(installed: bool, enabled: bool, running: bool) -> Self {
        Self {
            installed: Arc::new(AtomicBool::new(installed)),
            enabled: Arc::new(AtomicBool::new(enabled)),
            running: Arc::new(AtomicBool::new(running)),
        }
    }
}

/// Script a systemd surface for one unit over the given flags
///
/// `reload_installs` controls whether `daemon-reload` marks the unit
/// installed (install flows) or leaves it alone (teardown flows, where
/// `disable` uninstalls instead).
pub fn scripted_systemd(
    exec: ScriptedExecutor,
    unit: &str,
    flags: &SystemdFlags,
    reload_installs: bool,
) -> ScriptedExecutor {
    let unit_line = format!("{unit} enabled\n");
    let installed = flags.installed.clone();
    let exec = exec
        .on(
            ["systemctl", "--user", "list-unit-files"],
            ExecOutcome::ok("0 unit files listed.\n"),
        )
        .on(
            ["systemctl", "--global", "list-unit-files"],
            ExecOutcome::ok("0 unit files listed.\n"),
        )
        .on_fn(["systemctl", "--system", "list-unit-files"], move |_| {
            if installed.load(Ordering::SeqCst) {
                ExecOutcome::ok(unit_line.clone())
            } else {
                ExecOutcome::ok("0 unit files listed.\n")
            }
        });

    let installed = flags.installed.clone();
    let exec = exec.on_fn(["systemctl", "--system", "daemon-reload"], move |_| {
        if reload_installs {
            installed.store(true, Ordering::SeqCst);
        }
        ExecOutcome::ok("")
    });

    let enabled = flags.enabled.clone();
    let exec = exec.on_fn(["systemctl", "--system", "enable"], move |_| {
        enabled.store(true, Ordering::SeqCst);
        ExecOutcome::ok("")
    });
    let enabled = flags.enabled.clone();
    let installed = flags.installed.clone();
    let exec = exec.on_fn(["systemctl", "--system", "disable"], move |_| {
        enabled.store(false, Ordering::SeqCst);
        installed.store(false, Ordering::SeqCst);
        ExecOutcome::ok("")
    });
    let enabled = flags.enabled.clone();
    let exec = exec.on_fn(["systemctl", "--system", "is-enabled"], move |_| {
        if enabled.load(Ordering::SeqCst) {
            ExecOutcome::ok("enabled\n")
        } else {
            ExecOutcome::err(1, "disabled")
        }
    });

    let running = flags.running.clone();
    let exec = exec.on_fn(["systemctl", "--system", "start"], move |_| {
        running.store(true, Ordering::SeqCst);
        ExecOutcome::ok("")
    });
    let running = flags.running.clone();
    let exec = exec.on_fn(["systemctl", "--system", "stop"], move |_| {
        running.store(false, Ordering::SeqCst);
        ExecOutcome::ok("")
    });
    let running = flags.running.clone();
    let exec = exec.on_fn(["systemctl", "--system", "is-active"], move |_| {
        if running.load(Ordering::SeqCst) {
            ExecOutcome::ok("active\n")
        } else {
            ExecOutcome::err(3, "inactive")
        }
    });

    let installed = flags.installed.clone();
    let unit_name = unit.to_string();
    let exec = exec.on_fn(["systemctl", "--system", "show"], move |_| {
        if installed.load(Ordering::SeqCst) {
            ExecOutcome::ok(format!("{unit_name}\n"))
        } else {
            ExecOutcome::ok("")
        }
    });

    // reset-failed and anything else systemd answers quietly
    exec.on(["systemctl"], ExecOutcome::ok(""))
}

/// Script the component binary's --version and healthcheck probes
pub fn scripted_component_binary(
    exec: ScriptedExecutor,
    executable: &Path,
    version: &str,
    healthy_message: &str,
    flags: &SystemdFlags,
) -> ScriptedExecutor {
    let exe = executable.display().to_string();
    let version_line = format!("{version}\n");
    let exec = exec.on_fn(vec![exe.clone(), "--version".to_string()], move |_| {
        ExecOutcome::ok_stderr(version_line.clone())
    });
    let running = flags.running.clone();
    let message = format!("{healthy_message}\n");
    exec.on_fn(vec![exe, "healthcheck".to_string()], move |_| {
        if running.load(Ordering::SeqCst) {
            ExecOutcome::ok(message.clone())
        } else {
            ExecOutcome::err(1, "connection refused")
        }
    })
}

/// Script the invoking-user lookup with a home under the scenario base
///
/// Pointing the home at the declared service dir puts it under the
/// shared-directory policy, mirroring the real `/etc/systemd/system` setup.
pub fn scripted_user(exec: ScriptedExecutor, home: &Path) -> ScriptedExecutor {
    let passwd = format!("tester:x:1000:1000:tester:{}:/bin/sh\n", home.display());
    exec.on(["sh", "-c"], ExecOutcome::ok(passwd))
}

/// Build a release archive holding the given binary member
pub fn build_release_archive(dir: &Path, member: &str, content: &[u8]) -> PathBuf {
    let archive_path = dir.join("spire-1.0.0-linux-x86_64-glibc.tar.gz");
    let file = std::fs::File::create(&archive_path).unwrap();
    let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(gz);
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder.append_data(&mut header, member, content).unwrap();
    builder
        .into_inner()
        .unwrap()
        .finish()
        .unwrap()
        .flush()
        .unwrap();
    archive_path
}

/// The calls whose argv contains any of the given mutating verbs
pub fn mutating_calls(exec: &ScriptedExecutor, verbs: &[&str]) -> Vec<Vec<String>> {
    exec.calls()
        .into_iter()
        .filter(|argv| argv.iter().any(|a| verbs.contains(&a.as_str())))
        .collect()
}
