//! Declared parameters for agent and server reconciliation

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use spire_model::dirs::{AgentDirs, ServerDirs};
use spire_model::file_stat::FileModes;
use spire_model::state::{
    AgentRegistered, ServiceInstallation, ServiceStatus, State, StateOfAgent, StateOfServer,
};

fn default_present() -> State {
    State::Present
}

fn default_enabled() -> ServiceInstallation {
    ServiceInstallation::Enabled
}

fn default_healthy() -> ServiceStatus {
    ServiceStatus::Healthy
}

fn default_registered() -> AgentRegistered {
    AgentRegistered::Yes
}

fn default_dir_mode() -> String {
    "u=rwx,g=rx,o=".to_string()
}

fn default_file_mode() -> String {
    "u=rw,g=r,o=".to_string()
}

fn default_exe_mode() -> String {
    "u=rwx,g=rx,o=rx".to_string()
}

fn default_scope() -> Option<String> {
    Some("system".to_string())
}

fn default_probe_timeout() -> f64 {
    5.0
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_join_token_ttl() -> u32 {
    600
}

fn default_registration_uds_path() -> Option<String> {
    Some("/tmp/spire-registration.sock".to_string())
}

fn default_agent_config_dir() -> String {
    "/etc/spire-agent".to_string()
}

fn default_agent_data_dir() -> String {
    "/var/lib/spire-agent/data/agent".to_string()
}

fn default_agent_install_dir() -> String {
    "/opt/spire-agent".to_string()
}

fn default_service_dir() -> String {
    "/etc/systemd/system".to_string()
}

fn default_log_dir() -> String {
    "/var/log".to_string()
}

fn default_agent_service_name() -> String {
    "spire_agent".to_string()
}

fn default_agent_socket_path() -> String {
    "/tmp/agent.sock".to_string()
}

fn default_server_config_dir() -> String {
    "/etc/spire".to_string()
}

fn default_server_data_dir() -> String {
    "/var/lib/spire/data".to_string()
}

fn default_server_install_dir() -> String {
    "/opt/spire".to_string()
}

fn default_server_service_name() -> String {
    "spire_server".to_string()
}

fn default_server_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_bind_port() -> u16 {
    8081
}

/// Declared target state and inputs for one agent reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentParams {
    /// Whether the agent should be installed
    #[serde(default = "default_present")]
    pub state: State,
    /// Declared service installation substate
    #[serde(default = "default_enabled")]
    pub substate_service_installation: ServiceInstallation,
    /// Declared service run substate
    #[serde(default = "default_healthy")]
    pub substate_service_status: ServiceStatus,
    /// Declared registration substate
    #[serde(default = "default_registered")]
    pub substate_agent_registered: AgentRegistered,

    /// Configuration directory
    #[serde(default = "default_agent_config_dir")]
    pub config_dir: String,
    /// Data directory
    #[serde(default = "default_agent_data_dir")]
    pub data_dir: String,
    /// Installation directory
    #[serde(default = "default_agent_install_dir")]
    pub install_dir: String,
    /// Directory the service unit file is installed to
    #[serde(default = "default_service_dir")]
    pub service_dir: String,
    /// Log directory
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Owner of installed files; unset leaves ownership to the invoking user
    #[serde(default)]
    pub install_file_owner: Option<String>,
    /// Mode of managed directories
    #[serde(default = "default_dir_mode")]
    pub install_dir_mode: String,
    /// Mode of managed non-executable files
    #[serde(default = "default_file_mode")]
    pub install_file_mode: String,
    /// Mode of managed executable files
    #[serde(default = "default_exe_mode")]
    pub install_file_mode_exe: String,

    /// Declared agent version
    pub version: String,
    /// URL the release artifact is fetched from
    pub download_url: String,

    /// Service name
    #[serde(default = "default_agent_service_name")]
    pub service_name: String,
    /// Declared service scope
    #[serde(default = "default_scope")]
    pub service_scope: Option<String>,
    /// Seconds the healthiness wait may take
    #[serde(default = "default_probe_timeout")]
    pub healthiness_probe_timeout_seconds: f64,

    /// Agent IPC socket path
    #[serde(default = "default_agent_socket_path")]
    pub socket_path: String,
    /// Agent log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// The SPIFFE trust domain
    pub trust_domain: String,
    /// Extra SPIFFE ID bound to the join token
    #[serde(default)]
    pub additional_spiffe_id: Option<String>,
    /// Join token TTL in seconds
    #[serde(default = "default_join_token_ttl")]
    pub join_token_ttl: u32,

    /// SPIRE server address written into the agent configuration
    pub server_address: String,
    /// SPIRE server port written into the agent configuration
    pub server_port: u16,
    /// Install dir of the server the registration workflow talks to
    #[serde(default)]
    pub server_install_dir: Option<String>,
    /// Registration API socket path on the server
    #[serde(default = "default_registration_uds_path")]
    pub server_registration_uds_path: Option<String>,
}

impl AgentParams {
    /// The declared composite state
    pub fn expected_state(&self) -> Result<StateOfAgent> {
        Ok(StateOfAgent::new(
            self.state,
            Some(self.substate_service_installation),
            Some(self.substate_service_status),
            Some(self.substate_agent_registered),
        )?)
    }

    /// The agent directory layout these params describe
    pub fn dirs(&self) -> Result<AgentDirs> {
        Ok(AgentDirs::new(
            &self.config_dir,
            &self.data_dir,
            &self.install_dir,
            &self.service_dir,
            &self.log_dir,
            &self.service_name,
        )?)
    }

    /// The declared file modes, parsed
    pub fn file_modes(&self) -> Result<FileModes> {
        Ok(FileModes::parse(
            &self.install_dir_mode,
            &self.install_file_mode,
            &self.install_file_mode_exe,
        )?)
    }

    /// Reject blank required inputs early
    pub fn validate(&self) -> Result<()> {
        for (label, value) in [
            ("version", &self.version),
            ("download_url", &self.download_url),
            ("trust_domain", &self.trust_domain),
            ("server_address", &self.server_address),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Precondition(format!("{label} must not be blank")));
            }
        }
        Ok(())
    }
}

/// Declared target state and inputs for one server reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerParams {
    /// Whether the server should be installed
    #[serde(default = "default_present")]
    pub state: State,
    /// Declared service installation substate
    #[serde(default = "default_enabled")]
    pub substate_service_installation: ServiceInstallation,
    /// Declared service run substate
    #[serde(default = "default_healthy")]
    pub substate_service_status: ServiceStatus,

    /// Configuration directory
    #[serde(default = "default_server_config_dir")]
    pub config_dir: String,
    /// Data directory
    #[serde(default = "default_server_data_dir")]
    pub data_dir: String,
    /// Installation directory
    #[serde(default = "default_server_install_dir")]
    pub install_dir: String,
    /// Directory the service unit file is installed to
    #[serde(default = "default_service_dir")]
    pub service_dir: String,
    /// Log directory
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Owner of installed files; unset leaves ownership to the invoking user
    #[serde(default)]
    pub install_file_owner: Option<String>,
    /// Mode of managed directories
    #[serde(default = "default_dir_mode")]
    pub install_dir_mode: String,
    /// Mode of managed non-executable files
    #[serde(default = "default_file_mode")]
    pub install_file_mode: String,
    /// Mode of managed executable files
    #[serde(default = "default_exe_mode")]
    pub install_file_mode_exe: String,

    /// Declared server version
    pub version: String,
    /// URL the release artifact is fetched from
    pub download_url: String,

    /// Service name
    #[serde(default = "default_server_service_name")]
    pub service_name: String,
    /// Declared service scope
    #[serde(default = "default_scope")]
    pub service_scope: Option<String>,
    /// Seconds the healthiness wait may take
    #[serde(default = "default_probe_timeout")]
    pub healthiness_probe_timeout_seconds: f64,

    /// Server log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// The SPIFFE trust domain
    pub trust_domain: String,
    /// Bind address written into the server configuration
    #[serde(default = "default_server_bind_address")]
    pub bind_address: String,
    /// Bind port written into the server configuration
    #[serde(default = "default_server_bind_port")]
    pub bind_port: u16,
    /// Registration API socket path
    #[serde(default = "default_registration_uds_path")]
    pub registration_uds_path: Option<String>,
}

impl ServerParams {
    /// The declared composite state
    pub fn expected_state(&self) -> Result<StateOfServer> {
        Ok(StateOfServer::new(
            self.state,
            Some(self.substate_service_installation),
            Some(self.substate_service_status),
        )?)
    }

    /// The server directory layout these params describe
    pub fn dirs(&self) -> Result<ServerDirs> {
        Ok(ServerDirs::new(
            &self.config_dir,
            &self.data_dir,
            &self.install_dir,
            &self.service_dir,
            &self.log_dir,
            &self.service_name,
        )?)
    }

    /// The declared file modes, parsed
    pub fn file_modes(&self) -> Result<FileModes> {
        Ok(FileModes::parse(
            &self.install_dir_mode,
            &self.install_file_mode,
            &self.install_file_mode_exe,
        )?)
    }

    /// Reject blank required inputs early
    pub fn validate(&self) -> Result<()> {
        for (label, value) in [
            ("version", &self.version),
            ("download_url", &self.download_url),
            ("trust_domain", &self.trust_domain),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Precondition(format!("{label} must not be blank")));
            }
        }
        Ok(())
    }
}
