//! Server registration entries: parsing, identity matching, drift detection

use crate::state::State;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default TTL the server assigns when an entry declares none
pub const DEFAULT_ENTRY_TTL: u32 = 3600;

/// A workload or node registration record on the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationEntry {
    /// Entry ID
    pub entry_id: Option<String>,
    /// The registered SPIFFE ID
    pub spiffe_id: Option<String>,
    /// SPIFFE ID of the entity authorized to attest this selector set
    pub parent_id: Option<String>,
    /// Time to live in seconds
    pub ttl: Option<String>,
    /// Selector list
    pub selector: Vec<String>,
    /// DNS names; the first element doubles as the certificate CN
    pub dns_name: Vec<String>,
    /// Federated trust domain SPIFFE IDs
    pub federates_with: Vec<String>,
    /// Admin workload flag
    pub admin: bool,
    /// Downstream CA signing flag
    pub downstream: bool,
    /// Node entry flag
    pub node: bool,
    /// Revision counter, bumped on every update
    pub revision: Option<String>,
}

/// Fields of a registration entry addressable in identity matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryField {
    /// `spiffe_id`
    SpiffeId,
    /// `parent_id`
    ParentId,
    /// `selector` (list-valued)
    Selector,
    /// `dns_name` (list-valued)
    DnsName,
    /// `federates_with` (list-valued)
    FederatesWith,
    /// `admin` (bool-valued)
    Admin,
    /// `downstream` (bool-valued)
    Downstream,
    /// `node` (bool-valued)
    Node,
}

/// Declared parameters for one registration entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryParams {
    /// Whether the entry should exist
    #[serde(default = "default_entry_state")]
    pub state: State,
    /// Entry ID, required for update and delete
    #[serde(default)]
    pub entry_id: Option<String>,
    /// The SPIFFE ID to register
    #[serde(default)]
    pub spiffe_id: Option<String>,
    /// The parent SPIFFE ID
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Time to live in seconds; the server defaults to 3600
    #[serde(default)]
    pub ttl: Option<u32>,
    /// Selector list
    #[serde(default)]
    pub selector: Vec<String>,
    /// DNS names
    #[serde(default)]
    pub dns_name: Vec<String>,
    /// Federated trust domains
    #[serde(default)]
    pub federates_with: Vec<String>,
    /// Admin workload flag
    #[serde(default)]
    pub admin: Option<bool>,
    /// Downstream CA signing flag
    #[serde(default)]
    pub downstream: Option<bool>,
    /// Node entry flag
    #[serde(default)]
    pub node: Option<bool>,
    /// Entry expiry, seconds from epoch
    #[serde(default)]
    pub entry_expiry: Option<i64>,
    /// The field subset forming the entry's natural key
    #[serde(default = "default_identity_args")]
    pub identity_args: Vec<EntryField>,
    /// Registration API socket path on the server
    #[serde(default)]
    pub registration_uds_path: Option<String>,
}

impl Default for EntryParams {
    fn default() -> Self {
        Self {
            state: State::Present,
            entry_id: None,
            spiffe_id: None,
            parent_id: None,
            ttl: None,
            selector: Vec::new(),
            dns_name: Vec::new(),
            federates_with: Vec::new(),
            admin: None,
            downstream: None,
            node: None,
            entry_expiry: None,
            identity_args: default_identity_args(),
            registration_uds_path: None,
        }
    }
}

fn default_entry_state() -> State {
    State::Present
}

fn default_identity_args() -> Vec<EntryField> {
    vec![EntryField::SpiffeId, EntryField::ParentId]
}

impl RegistrationEntry {
    fn field_matches(&self, params: &EntryParams, field: EntryField) -> bool {
        match field {
            EntryField::SpiffeId => self.spiffe_id == params.spiffe_id,
            EntryField::ParentId => self.parent_id == params.parent_id,
            EntryField::Selector => set_of(&self.selector) == set_of(&params.selector),
            EntryField::DnsName => set_of(&self.dns_name) == set_of(&params.dns_name),
            EntryField::FederatesWith => {
                set_of(&self.federates_with) == set_of(&params.federates_with)
            }
            // unspecified bools mean false on both sides
            EntryField::Admin => self.admin == params.admin.unwrap_or(false),
            EntryField::Downstream => self.downstream == params.downstream.unwrap_or(false),
            EntryField::Node => self.node == params.node.unwrap_or(false),
        }
    }

    /// Whether this entry has the identity declared by the params
    pub fn has_same_identity(&self, params: &EntryParams) -> bool {
        params
            .identity_args
            .iter()
            .all(|field| self.field_matches(params, *field))
    }
}

fn set_of(values: &[String]) -> BTreeSet<&str> {
    values.iter().map(String::as_str).collect()
}

/// The entries whose identity matches the declared params
pub fn entries_having_same_identity<'a>(
    params: &EntryParams,
    entries: &'a [RegistrationEntry],
) -> Vec<&'a RegistrationEntry> {
    entries
        .iter()
        .filter(|e| e.has_same_identity(params))
        .collect()
}

fn dns_names_equal(expected: &[String], actual: &[String]) -> bool {
    // the first element also serves as CN in issued certificates and must
    // match exactly; the rest compare as a set
    set_of(expected) == set_of(actual) && expected.first() == actual.first()
}

/// Whether the declared entry diverges from the found entry
///
/// `actual = None` means no entry with the declared identity exists.
pub fn need_change(params: &EntryParams, actual: Option<&RegistrationEntry>) -> bool {
    if params.state == State::Absent {
        return actual.is_some();
    }
    let Some(actual) = actual else {
        return true;
    };

    let expected_ttl = params.ttl.unwrap_or(DEFAULT_ENTRY_TTL).to_string();
    let actual_ttl = actual
        .ttl
        .clone()
        .unwrap_or_else(|| DEFAULT_ENTRY_TTL.to_string());
    if expected_ttl != actual_ttl {
        return true;
    }
    if params.spiffe_id != actual.spiffe_id || params.parent_id != actual.parent_id {
        return true;
    }
    if !dns_names_equal(&params.dns_name, &actual.dns_name) {
        return true;
    }
    if set_of(&params.selector) != set_of(&actual.selector)
        || set_of(&params.federates_with) != set_of(&actual.federates_with)
    {
        return true;
    }
    params.admin.unwrap_or(false) != actual.admin
        || params.downstream.unwrap_or(false) != actual.downstream
        || params.node.unwrap_or(false) != actual.node
}

/// Outcome of a `spire-server entry show` execution
///
/// Parsing never raises: a malformed stdout is captured as `parse_error`
/// beside the raw output so callers can still inspect rc/stdout/stderr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryShowOutcome {
    /// Exit code of the show command
    pub rc: Option<i32>,
    /// Raw stdout
    pub stdout: String,
    /// Raw stderr
    pub stderr: String,
    /// Parsed entries, empty on failure
    pub entries: Vec<RegistrationEntry>,
    /// Why parsing failed, if it did
    pub parse_error: Option<String>,
}

impl EntryShowOutcome {
    /// Parse the captured output of `spire-server entry show`
    pub fn from_output(rc: Option<i32>, stdout: &str, stderr: &str) -> Self {
        let mut outcome = Self {
            rc,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            entries: Vec::new(),
            parse_error: None,
        };
        if rc != Some(0) {
            return outcome;
        }
        match parse_entries(stdout) {
            Ok(entries) => outcome.entries = entries,
            Err(e) => outcome.parse_error = Some(e),
        }
        outcome
    }

    /// True when the show command itself failed
    pub fn exec_failed(&self) -> bool {
        self.rc != Some(0)
    }

    /// True when stdout could not be parsed
    pub fn parsing_failed(&self) -> bool {
        self.parse_error.is_some()
    }
}

fn parse_entries(stdout: &str) -> std::result::Result<Vec<RegistrationEntry>, String> {
    let mut entries: Vec<RegistrationEntry> = Vec::new();
    let mut detected = false;
    for (line_idx, line) in stdout.lines().enumerate() {
        let line_nr = line_idx + 1;
        if !detected {
            // expected format: Found 23 entries
            let splits: Vec<&str> = line.split(' ').collect();
            if splits.len() != 3
                || splits[0] != "Found"
                || !matches!(splits[2], "entries" | "entry")
            {
                continue;
            }
            splits[1]
                .parse::<usize>()
                .map_err(|e| format!("bad found-entries line at {line_nr}: {e} -> {line}"))?;
            detected = true;
        } else {
            if line.trim().is_empty() {
                continue;
            }
            let (label, value) = line
                .split_once(':')
                .ok_or_else(|| format!("bad line format at {line_nr}: {line}"))?;
            let label = label.trim();
            let value = value.trim().to_string();
            if label == "Entry ID" {
                // a new entry begins; pushing it up front avoids needing an
                // end-of-entry marker
                entries.push(RegistrationEntry::default());
            }
            let entry = entries
                .last_mut()
                .ok_or_else(|| format!("line {line_nr} before any Entry ID: {line}"))?;
            contribute(entry, label, value, line_nr)?;
        }
    }
    Ok(entries)
}

fn set_scalar(
    slot: &mut Option<String>,
    label: &str,
    value: String,
    line_nr: usize,
) -> std::result::Result<(), String> {
    if slot.is_some() {
        return Err(format!("label {label:?} occurred twice at line {line_nr}"));
    }
    *slot = Some(value);
    Ok(())
}

fn contribute(
    entry: &mut RegistrationEntry,
    label: &str,
    value: String,
    line_nr: usize,
) -> std::result::Result<(), String> {
    match label {
        "Entry ID" => set_scalar(&mut entry.entry_id, label, value, line_nr),
        "SPIFFE ID" => set_scalar(&mut entry.spiffe_id, label, value, line_nr),
        "Parent ID" => set_scalar(&mut entry.parent_id, label, value, line_nr),
        "TTL" => set_scalar(&mut entry.ttl, label, value, line_nr),
        "Revision" => set_scalar(&mut entry.revision, label, value, line_nr),
        "Selector" => {
            entry.selector.push(value);
            Ok(())
        }
        "DNS name" => {
            entry.dns_name.push(value);
            Ok(())
        }
        "FederatesWith" => {
            entry.federates_with.push(value);
            Ok(())
        }
        "Admin" => {
            entry.admin = value.eq_ignore_ascii_case("true");
            Ok(())
        }
        "Downstream" => {
            entry.downstream = value.eq_ignore_ascii_case("true");
            Ok(())
        }
        "Node" => {
            entry.node = value.eq_ignore_ascii_case("true");
            Ok(())
        }
        unknown => Err(format!("line {line_nr}: unknown label ({unknown})")),
    }
}
