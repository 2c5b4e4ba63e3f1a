//! Attested-agent registration records from `spire-server agent list`

use crate::list_output::{ListEntry, parse_list_stdout};
use crate::{Error, Result};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// One attested agent known to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistrationEntry {
    /// The agent's SPIFFE ID
    pub spiffe_id: String,
    /// How the agent attested, e.g. `join_token`
    pub attestation_type: String,
    /// When the agent's SVID expires
    pub expiration_time: DateTime<FixedOffset>,
    /// Serial number of the agent's SVID, decimal rendering
    pub serial_number: String,
}

impl AgentRegistrationEntry {
    /// Whether the registration is still live at the given instant
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_time > now
    }

    /// Build an entry from one parsed list block
    pub fn from_list_entry(entry: &ListEntry) -> Result<Self> {
        let mut issues = Vec::new();
        let spiffe_id = scalar(entry, "Spiffe ID", &mut issues);
        let attestation_type = scalar(entry, "Attestation type", &mut issues);
        let serial_number = scalar(entry, "Serial number", &mut issues);
        let expiration_time = scalar(entry, "Expiration time", &mut issues)
            .and_then(|raw| match parse_expiration_time(&raw) {
                Ok(dt) => Some(dt),
                Err(e) => {
                    issues.push(e.to_string());
                    None
                }
            });
        if !issues.is_empty() {
            return Err(Error::BadListOutput(format!(
                "error while reading agent entry data: issues={issues:?} entry={entry:?}"
            )));
        }
        Ok(Self {
            spiffe_id: spiffe_id.unwrap(),
            attestation_type: attestation_type.unwrap(),
            expiration_time: expiration_time.unwrap(),
            serial_number: serial_number.unwrap(),
        })
    }
}

fn scalar(entry: &ListEntry, key: &str, issues: &mut Vec<String>) -> Option<String> {
    match entry.get(key).and_then(|v| v.as_single()) {
        Some(value) => Some(value.to_string()),
        None => {
            issues.push(format!("entry data [{key}] must be a single string value"));
            None
        }
    }
}

/// Parse the CLI's expiration time format, e.g.
/// `2020-09-22 01:07:36 +0200 CEST`
///
/// The trailing zone name is redundant with the numeric offset (and depends
/// on the server host's zone database), so it is ignored.
pub fn parse_expiration_time(raw: &str) -> Result<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    let without_zone_name = match trimmed.rsplit_once(' ') {
        Some((head, tail)) if tail.chars().all(|c| c.is_ascii_alphabetic()) => head,
        _ => trimmed,
    };
    DateTime::parse_from_str(without_zone_name, "%Y-%m-%d %H:%M:%S %z").map_err(|e| {
        Error::BadListOutput(format!("failed to parse expiration time {raw:?}: {e}"))
    })
}

/// Parse the full `spire-server agent list` stdout
pub fn parse_agent_list(stdout: &str) -> Result<Vec<AgentRegistrationEntry>> {
    let blocks = parse_list_stdout(stdout, &[])?;
    blocks
        .iter()
        .map(AgentRegistrationEntry::from_list_entry)
        .collect()
}

/// Filter criteria for attested-agent lookups
///
/// Empty criteria match everything; each populated criterion must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentEntryFilter {
    /// Accepted SPIFFE IDs
    pub spiffe_ids: Vec<String>,
    /// Accepted attestation types
    pub attestation_types: Vec<String>,
    /// Accepted serial numbers, decimal rendering
    pub serial_numbers: Vec<String>,
}

impl AgentEntryFilter {
    /// Whether the entry satisfies every populated criterion
    pub fn matches(&self, entry: &AgentRegistrationEntry) -> bool {
        (self.spiffe_ids.is_empty() || self.spiffe_ids.contains(&entry.spiffe_id))
            && (self.attestation_types.is_empty()
                || self.attestation_types.contains(&entry.attestation_type))
            && (self.serial_numbers.is_empty()
                || self.serial_numbers.contains(&entry.serial_number))
    }
}
