//! Service-manager scopes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The visibility level a service is registered under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Per-user service manager
    User,
    /// System-wide service manager
    System,
    /// Units visible to every user's manager
    Global,
}

/// Detection probes every scope in this fixed order
pub const ALL_SCOPES: [Scope; 3] = [Scope::User, Scope::System, Scope::Global];

impl Scope {
    /// The systemctl argument selecting this scope
    pub fn systemctl_arg(self) -> &'static str {
        match self {
            Scope::User => "--user",
            Scope::System => "--system",
            Scope::Global => "--global",
        }
    }

    /// The default directory unit files are installed to under this scope
    pub fn default_install_dir(self) -> PathBuf {
        match self {
            Scope::System => PathBuf::from("/etc/systemd/system/"),
            Scope::User => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/root"))
                .join(".config/systemd/user/"),
            Scope::Global => PathBuf::from("/usr/lib/systemd/user/"),
        }
    }

    /// Look a scope up by name, tolerating a `scope_` prefix
    pub fn by_name(name: &str) -> Option<Scope> {
        let trimmed = name.trim();
        let bare = trimmed.strip_prefix("scope_").unwrap_or(trimmed);
        match bare {
            "user" => Some(Scope::User),
            "system" => Some(Scope::System),
            "global" => Some(Scope::Global),
            _ => None,
        }
    }

    /// Resolve the effective scope: detected, else declared, else system
    pub fn or_default(detected: Option<Scope>, declared: Option<&str>) -> Scope {
        detected
            .or_else(|| declared.and_then(Scope::by_name))
            .unwrap_or(Scope::System)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scope::User => "user",
            Scope::System => "system",
            Scope::Global => "global",
        };
        write!(f, "{name}")
    }
}
