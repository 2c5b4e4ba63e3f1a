//! Declared and detected component states

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Base installation state of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Installed on the target
    Present,
    /// Not installed on the target
    Absent,
}

impl State {
    /// Derive the base state from the installed flag
    pub fn from_installed(installed: bool) -> Self {
        if installed { State::Present } else { State::Absent }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Present => "present",
            State::Absent => "absent",
        };
        write!(f, "{name}")
    }
}

/// Installation substate of the component's service unit
///
/// Ordered: `Enabled` implies `Installed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceInstallation {
    /// The unit is not known to the service manager
    NotInstalled,
    /// The unit file is installed
    Installed,
    /// The unit is installed and enabled
    Enabled,
}

impl ServiceInstallation {
    /// Roll up the substate from the enabled/installed probe results
    pub fn from_flags(enabled: bool, installed: bool) -> Self {
        if enabled {
            ServiceInstallation::Enabled
        } else if installed {
            ServiceInstallation::Installed
        } else {
            ServiceInstallation::NotInstalled
        }
    }
}

impl fmt::Display for ServiceInstallation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceInstallation::NotInstalled => "not_installed",
            ServiceInstallation::Installed => "installed",
            ServiceInstallation::Enabled => "enabled",
        };
        write!(f, "{name}")
    }
}

/// Run substate of the component's service
///
/// Ordered by containment, not equality: a `Healthy` expectation is satisfied
/// only by `Healthy`, but an actual `Healthy` satisfies an expected
/// `Started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Not running
    Stopped,
    /// Running, health unknown or not demanded
    Started,
    /// Running and answering its healthcheck
    Healthy,
}

impl ServiceStatus {
    /// Roll up the substate from the healthy/running probe results
    pub fn from_flags(healthy: bool, running: bool) -> Self {
        if healthy {
            ServiceStatus::Healthy
        } else if running {
            ServiceStatus::Started
        } else {
            ServiceStatus::Stopped
        }
    }

    /// Whether this actual status satisfies the expectation
    ///
    /// `Healthy` contains `Started`; everything else requires equality.
    pub fn satisfies(self, expected: ServiceStatus) -> bool {
        match (self, expected) {
            (ServiceStatus::Healthy, ServiceStatus::Started) => true,
            (actual, expected) => actual == expected,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Started => "started",
            ServiceStatus::Healthy => "healthy",
        };
        write!(f, "{name}")
    }
}

/// Registration substate of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRegistered {
    /// A live registration exists on the server
    Yes,
    /// No registration exists
    No,
    /// Some but not all expected registrations exist
    Partially,
    /// The registration state cannot be determined from the host
    Indeterminable,
}

impl AgentRegistered {
    /// Derive the substate from a registration check result
    pub fn from_flag(registered: bool) -> Self {
        if registered {
            AgentRegistered::Yes
        } else {
            AgentRegistered::No
        }
    }
}

impl fmt::Display for AgentRegistered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentRegistered::Yes => "yes",
            AgentRegistered::No => "no",
            AgentRegistered::Partially => "partially",
            AgentRegistered::Indeterminable => "indeterminable",
        };
        write!(f, "{name}")
    }
}

/// Composite state of an agent installation
///
/// When `state` is `Present` all substates are required; when `Absent` they
/// are ignored for comparison purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateOfAgent {
    /// Base installation state
    pub state: State,
    /// Service unit installation substate
    pub service_installation: Option<ServiceInstallation>,
    /// Service run substate
    pub service_status: Option<ServiceStatus>,
    /// Registration substate
    pub agent_registered: Option<AgentRegistered>,
}

impl StateOfAgent {
    /// Build a composite agent state, enforcing the presence invariant
    pub fn new(
        state: State,
        service_installation: Option<ServiceInstallation>,
        service_status: Option<ServiceStatus>,
        agent_registered: Option<AgentRegistered>,
    ) -> Result<Self> {
        if state == State::Present
            && (service_installation.is_none()
                || service_status.is_none()
                || agent_registered.is_none())
        {
            return Err(Error::InvalidState(format!(
                "state {state} requires service installation, status and registration substates: \
                 installation={service_installation:?} status={service_status:?} \
                 registered={agent_registered:?}"
            )));
        }
        Ok(Self {
            state,
            service_installation,
            service_status,
            agent_registered,
        })
    }

    /// An absent composite state
    pub fn absent() -> Self {
        Self {
            state: State::Absent,
            service_installation: None,
            service_status: None,
            agent_registered: None,
        }
    }

    /// Whether the actual state (self) diverges from the expectation
    pub fn need_change(&self, expected: &StateOfAgent) -> bool {
        self.need_change_with(expected, false)
    }

    /// `need_change` with the registration substate optionally ignored
    pub fn need_change_with(&self, expected: &StateOfAgent, ignore_registered: bool) -> bool {
        if self.state == State::Absent {
            return expected.state != State::Absent;
        }
        let matches = expected.state == State::Present
            && self.service_installation == expected.service_installation
            && status_satisfies(self.service_status, expected.service_status)
            && (ignore_registered || self.agent_registered == expected.agent_registered);
        !matches
    }

    /// Whether the service installation substate diverges
    pub fn need_service_installation_change(&self, expected: &StateOfAgent) -> bool {
        self.service_installation != expected.service_installation
    }

    /// One-line rendering used in diff headers
    pub fn header(&self, resource: &str) -> String {
        format!(
            "{resource} ({} // {} // {} // {})",
            self.state,
            display_opt(&self.service_installation),
            display_opt(&self.service_status),
            display_opt(&self.agent_registered),
        )
    }
}

/// Composite state of a server installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateOfServer {
    /// Base installation state
    pub state: State,
    /// Service unit installation substate
    pub service_installation: Option<ServiceInstallation>,
    /// Service run substate
    pub service_status: Option<ServiceStatus>,
}

impl StateOfServer {
    /// Build a composite server state, enforcing the presence invariant
    pub fn new(
        state: State,
        service_installation: Option<ServiceInstallation>,
        service_status: Option<ServiceStatus>,
    ) -> Result<Self> {
        if state == State::Present
            && (service_installation.is_none() || service_status.is_none())
        {
            return Err(Error::InvalidState(format!(
                "state {state} requires service installation and status substates: \
                 installation={service_installation:?} status={service_status:?}"
            )));
        }
        Ok(Self {
            state,
            service_installation,
            service_status,
        })
    }

    /// An absent composite state
    pub fn absent() -> Self {
        Self {
            state: State::Absent,
            service_installation: None,
            service_status: None,
        }
    }

    /// Whether the actual state (self) diverges from the expectation
    pub fn need_change(&self, expected: &StateOfServer) -> bool {
        if self.state == State::Absent {
            return expected.state != State::Absent;
        }
        let matches = expected.state == State::Present
            && self.service_installation == expected.service_installation
            && status_satisfies(self.service_status, expected.service_status);
        !matches
    }

    /// Whether the service installation substate diverges
    pub fn need_service_installation_change(&self, expected: &StateOfServer) -> bool {
        self.service_installation != expected.service_installation
    }

    /// One-line rendering used in diff headers
    pub fn header(&self, resource: &str) -> String {
        format!(
            "{resource} ({} // {} // {})",
            self.state,
            display_opt(&self.service_installation),
            display_opt(&self.service_status),
        )
    }
}

fn status_satisfies(actual: Option<ServiceStatus>, expected: Option<ServiceStatus>) -> bool {
    match (actual, expected) {
        (Some(actual), Some(expected)) => actual.satisfies(expected),
        (actual, expected) => actual == expected,
    }
}

fn display_opt<T: fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn present_agent(
        installation: ServiceInstallation,
        status: ServiceStatus,
        registered: AgentRegistered,
    ) -> StateOfAgent {
        StateOfAgent::new(
            State::Present,
            Some(installation),
            Some(status),
            Some(registered),
        )
        .unwrap()
    }

    #[test]
    fn test_present_requires_substates() {
        let err = StateOfAgent::new(State::Present, None, None, None).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let err = StateOfServer::new(State::Present, Some(ServiceInstallation::Enabled), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        // absent needs nothing
        StateOfAgent::new(State::Absent, None, None, None).unwrap();
    }

    #[test]
    fn test_absent_actual_compares_on_base_state_only() {
        let actual = StateOfAgent::absent();
        assert!(!actual.need_change(&StateOfAgent::absent()));

        let expected = present_agent(
            ServiceInstallation::Enabled,
            ServiceStatus::Healthy,
            AgentRegistered::Yes,
        );
        assert!(actual.need_change(&expected));
    }

    #[test]
    fn test_healthy_satisfies_started_expectation() {
        let actual = present_agent(
            ServiceInstallation::Enabled,
            ServiceStatus::Healthy,
            AgentRegistered::Yes,
        );
        let expected = present_agent(
            ServiceInstallation::Enabled,
            ServiceStatus::Started,
            AgentRegistered::Yes,
        );
        assert!(!actual.need_change(&expected));

        // containment is one-directional
        let actual_started = present_agent(
            ServiceInstallation::Enabled,
            ServiceStatus::Started,
            AgentRegistered::Yes,
        );
        let expected_healthy = present_agent(
            ServiceInstallation::Enabled,
            ServiceStatus::Healthy,
            AgentRegistered::Yes,
        );
        assert!(actual_started.need_change(&expected_healthy));
    }

    #[test]
    fn test_registration_can_be_ignored() {
        let actual = present_agent(
            ServiceInstallation::Enabled,
            ServiceStatus::Healthy,
            AgentRegistered::No,
        );
        let expected = present_agent(
            ServiceInstallation::Enabled,
            ServiceStatus::Healthy,
            AgentRegistered::Yes,
        );
        assert!(actual.need_change(&expected));
        assert!(!actual.need_change_with(&expected, true));
    }

    #[test]
    fn test_server_need_change() {
        let actual = StateOfServer::new(
            State::Present,
            Some(ServiceInstallation::Enabled),
            Some(ServiceStatus::Healthy),
        )
        .unwrap();
        let same = actual.clone();
        assert!(!actual.need_change(&same));
        assert!(actual.need_change(&StateOfServer::absent()));
    }

    #[test]
    fn test_rollups() {
        assert_eq!(
            ServiceInstallation::from_flags(true, false),
            ServiceInstallation::Enabled
        );
        assert_eq!(
            ServiceInstallation::from_flags(false, true),
            ServiceInstallation::Installed
        );
        assert_eq!(ServiceStatus::from_flags(true, false), ServiceStatus::Healthy);
        assert_eq!(ServiceStatus::from_flags(false, true), ServiceStatus::Started);
        assert_eq!(ServiceStatus::from_flags(false, false), ServiceStatus::Stopped);
        assert_eq!(State::from_installed(true), State::Present);
    }
}
