//! Component directory layouts and derived paths

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Normalize a path lexically: strip `.` components and resolve `..`
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Directory layout and derived paths shared by both SPIRE components
///
/// The service name is kept in both its base form (`spire_agent`) and its
/// full unit form (`spire_agent.service`); construction accepts either and
/// derives the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDirs {
    /// Configuration directory
    pub config_dir: PathBuf,
    /// Data directory
    pub data_dir: PathBuf,
    /// Installation directory
    pub install_dir: PathBuf,
    /// `bin` directory under the installation directory
    pub install_dir_bin: PathBuf,
    /// Directory holding the service unit file
    pub service_dir: PathBuf,
    /// Log directory
    pub log_dir: PathBuf,
    /// Service name without the `.service` suffix
    pub service_name: String,
    /// Full unit name with the `.service` suffix
    pub service_full_name: String,
    /// Main configuration file
    pub conf_file: PathBuf,
    /// Environment file sourced by the service unit
    pub env_file: PathBuf,
    /// Installed service unit file
    pub service_file: PathBuf,
    /// Component executable
    pub executable: PathBuf,
}

impl ComponentDirs {
    /// Assemble the layout from the declared directories and file names
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config_dir: &str,
        data_dir: &str,
        install_dir: &str,
        service_dir: &str,
        log_dir: &str,
        service_name: &str,
        exec_file_name: &str,
        conf_file_name: &str,
        env_file_name: &str,
    ) -> Result<Self> {
        for (label, value) in [
            ("config_dir", config_dir),
            ("data_dir", data_dir),
            ("install_dir", install_dir),
            ("service_dir", service_dir),
            ("log_dir", log_dir),
            ("service_name", service_name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::MissingValue(label.to_string()));
            }
        }

        let config_dir = normalize_path(Path::new(config_dir));
        let data_dir = normalize_path(Path::new(data_dir));
        let install_dir = normalize_path(Path::new(install_dir));
        let install_dir_bin = install_dir.join("bin");
        let service_dir = normalize_path(Path::new(service_dir));
        let log_dir = normalize_path(Path::new(log_dir));

        let (service_name, service_full_name) = split_service_name(service_name);

        let conf_file = config_dir.join(conf_file_name);
        let env_file = config_dir.join(env_file_name);
        let service_file = service_dir.join(&service_full_name);
        let executable = install_dir_bin.join(exec_file_name);

        Ok(Self {
            config_dir,
            data_dir,
            install_dir,
            install_dir_bin,
            service_dir,
            log_dir,
            service_name,
            service_full_name,
            conf_file,
            env_file,
            service_file,
            executable,
        })
    }

    /// Directories a present installation is expected to have
    pub fn expected_dirs(&self) -> Vec<PathBuf> {
        vec![
            self.config_dir.clone(),
            self.data_dir.clone(),
            self.install_dir.clone(),
            self.install_dir_bin.clone(),
            self.service_dir.clone(),
            self.log_dir.clone(),
        ]
    }

    /// Non-executable files a present installation is expected to have
    pub fn expected_files_not_exec(&self) -> Vec<PathBuf> {
        vec![
            self.conf_file.clone(),
            self.env_file.clone(),
            self.service_file.clone(),
        ]
    }

    /// Executable files a present installation is expected to have
    pub fn expected_files_exec(&self) -> Vec<PathBuf> {
        vec![self.executable.clone()]
    }
}

fn split_service_name(name: &str) -> (String, String) {
    let trimmed = name.trim();
    match trimmed.strip_suffix(".service") {
        Some(base) => (base.to_string(), trimmed.to_string()),
        None => (trimmed.to_string(), format!("{trimmed}.service")),
    }
}

/// Directory layout of a SPIRE agent installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDirs {
    /// The shared component layout
    pub dirs: ComponentDirs,
    /// Bootstrap trust bundle delivered next to the agent configuration
    pub trust_bundle_file: PathBuf,
}

impl AgentDirs {
    /// Assemble the agent layout from the declared directories
    pub fn new(
        config_dir: &str,
        data_dir: &str,
        install_dir: &str,
        service_dir: &str,
        log_dir: &str,
        service_name: &str,
    ) -> Result<Self> {
        let dirs = ComponentDirs::new(
            config_dir,
            data_dir,
            install_dir,
            service_dir,
            log_dir,
            service_name,
            "spire-agent",
            "agent.conf",
            "agent.env",
        )?;
        let trust_bundle_file = dirs.config_dir.join("trust_bundle.pem");
        Ok(Self {
            dirs,
            trust_bundle_file,
        })
    }

    /// Non-executable files, including the trust bundle
    pub fn expected_files_not_exec(&self) -> Vec<PathBuf> {
        let mut files = self.dirs.expected_files_not_exec();
        files.push(self.trust_bundle_file.clone());
        files
    }

    /// Every directory and file a present installation is expected to have
    pub fn expected_dirs_and_files(&self) -> Vec<PathBuf> {
        let mut all = self.dirs.expected_dirs();
        all.extend(self.expected_files_not_exec());
        all.extend(self.dirs.expected_files_exec());
        all
    }
}

/// Directory layout of a SPIRE server installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDirs {
    /// The shared component layout
    pub dirs: ComponentDirs,
}

impl ServerDirs {
    /// Assemble the server layout from the declared directories
    pub fn new(
        config_dir: &str,
        data_dir: &str,
        install_dir: &str,
        service_dir: &str,
        log_dir: &str,
        service_name: &str,
    ) -> Result<Self> {
        let dirs = ComponentDirs::new(
            config_dir,
            data_dir,
            install_dir,
            service_dir,
            log_dir,
            service_name,
            "spire-server",
            "server.conf",
            "server.env",
        )?;
        Ok(Self { dirs })
    }

    /// Every directory and file a present installation is expected to have
    pub fn expected_dirs_and_files(&self) -> Vec<PathBuf> {
        let mut all = self.dirs.expected_dirs();
        all.extend(self.dirs.expected_files_not_exec());
        all.extend(self.dirs.expected_files_exec());
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_dirs() -> AgentDirs {
        AgentDirs::new(
            "/etc/spire-agent",
            "/var/lib/spire-agent/data",
            "/opt/spire-agent/",
            "/etc/systemd/system",
            "/var/log",
            "spire_agent",
        )
        .unwrap()
    }

    #[test]
    fn test_derived_paths() {
        let dirs = agent_dirs();
        assert_eq!(dirs.dirs.install_dir, PathBuf::from("/opt/spire-agent"));
        assert_eq!(
            dirs.dirs.executable,
            PathBuf::from("/opt/spire-agent/bin/spire-agent")
        );
        assert_eq!(
            dirs.dirs.conf_file,
            PathBuf::from("/etc/spire-agent/agent.conf")
        );
        assert_eq!(
            dirs.dirs.service_file,
            PathBuf::from("/etc/systemd/system/spire_agent.service")
        );
        assert_eq!(
            dirs.trust_bundle_file,
            PathBuf::from("/etc/spire-agent/trust_bundle.pem")
        );
    }

    #[test]
    fn test_service_name_bijection() {
        let dirs = agent_dirs();
        assert_eq!(dirs.dirs.service_name, "spire_agent");
        assert_eq!(dirs.dirs.service_full_name, "spire_agent.service");

        let from_full = AgentDirs::new(
            "/etc/spire-agent",
            "/var/lib/spire-agent/data",
            "/opt/spire-agent",
            "/etc/systemd/system",
            "/var/log",
            "spire_agent.service",
        )
        .unwrap();
        assert_eq!(from_full.dirs.service_name, "spire_agent");
        assert_eq!(from_full.dirs.service_full_name, "spire_agent.service");
    }

    #[test]
    fn test_blank_dir_rejected() {
        let err = AgentDirs::new("", "/d", "/i", "/s", "/l", "svc").unwrap_err();
        assert!(matches!(err, Error::MissingValue(_)));
    }

    #[test]
    fn test_expected_enumerations() {
        let dirs = agent_dirs();
        let all = dirs.expected_dirs_and_files();
        assert_eq!(all.len(), 6 + 4 + 1);
        assert!(all.contains(&PathBuf::from("/opt/spire-agent/bin")));
        assert!(all.contains(&PathBuf::from("/etc/spire-agent/trust_bundle.pem")));

        let server = ServerDirs::new(
            "/etc/spire",
            "/var/lib/spire/data",
            "/opt/spire",
            "/etc/systemd/system",
            "/var/log",
            "spire_server",
        )
        .unwrap();
        assert_eq!(
            server.dirs.conf_file,
            PathBuf::from("/etc/spire/server.conf")
        );
        assert_eq!(server.expected_dirs_and_files().len(), 6 + 3 + 1);
    }
}
