//! Parser for `spire-server` list-style command output
//!
//! The CLI prints a `Found N …` header followed by blank-line-separated
//! blocks of `Label : value` lines, e.g.
//!
//! ```text
//! Found 1 attested agent:
//!
//! Spiffe ID         : spiffe://example.org/myagent
//! Attestation type  : join_token
//! Expiration time   : 2020-09-22 01:07:36 +0200 CEST
//! Serial number     : 232387843638226
//! ```

use crate::{Error, Result};
use std::collections::BTreeMap;

/// A parsed block value: scalar, or accumulated list for repeatable labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListValue {
    /// A label that occurred once
    Single(String),
    /// A label declared repeatable, in occurrence order
    Many(Vec<String>),
}

impl ListValue {
    /// The scalar value, if this is a single-valued label
    pub fn as_single(&self) -> Option<&str> {
        match self {
            ListValue::Single(v) => Some(v),
            ListValue::Many(_) => None,
        }
    }

    /// The values as a slice, one element for scalars
    pub fn values(&self) -> Vec<&str> {
        match self {
            ListValue::Single(v) => vec![v.as_str()],
            ListValue::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

/// One parsed `Label : value` block
pub type ListEntry = BTreeMap<String, ListValue>;

/// Parse list-style stdout into labeled entry blocks
///
/// `list_value_labels` names the labels that may repeat within one block and
/// accumulate into lists; any other repeated label is a format error. Output
/// before the `Found N …` header line is skipped. Empty input parses to no
/// entries.
pub fn parse_list_stdout(to_parse: &str, list_value_labels: &[&str]) -> Result<Vec<ListEntry>> {
    if to_parse.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut entries: Vec<ListEntry> = Vec::new();
    let mut detected = false;
    for (line_idx, line) in to_parse.lines().enumerate() {
        let line_nr = line_idx + 1;
        if !detected {
            let splits: Vec<&str> = line.split(' ').collect();
            if splits.len() < 3 || splits[0] != "Found" {
                continue;
            }
            splits[1].parse::<usize>().map_err(|e| {
                Error::BadListOutput(format!(
                    "bad found-entries line: {e} at line {line_nr}: {line}"
                ))
            })?;
            detected = true;
            // in case there is no blank line between the header and the
            // first entry
            entries.push(ListEntry::new());
        } else if line.trim().is_empty() {
            if matches!(entries.last(), Some(last) if last.is_empty()) {
                // multiple blank separator lines between elements
                continue;
            }
            entries.push(ListEntry::new());
        } else {
            let (label, value) = line.split_once(':').ok_or_else(|| {
                Error::BadListOutput(format!("bad line format at line {line_nr}: {line}"))
            })?;
            let label = label.trim().to_string();
            let value = value.trim().to_string();
            let entry = entries.last_mut().expect("an entry is always open");
            contribute(entry, label, value, list_value_labels, line_nr)?;
        }
    }
    if matches!(entries.last(), Some(last) if last.is_empty()) {
        entries.pop();
    }
    Ok(entries)
}

fn contribute(
    entry: &mut ListEntry,
    label: String,
    value: String,
    list_value_labels: &[&str],
    line_nr: usize,
) -> Result<()> {
    let is_list = list_value_labels.contains(&label.as_str());
    match entry.get_mut(&label) {
        None => {
            let v = if is_list {
                ListValue::Many(vec![value])
            } else {
                ListValue::Single(value)
            };
            entry.insert(label, v);
        }
        Some(ListValue::Many(values)) => values.push(value),
        Some(ListValue::Single(old)) => {
            return Err(Error::BadListOutput(format!(
                "non-list label {label:?} occurred twice at line {line_nr}: \
                 old={old:?} new={value:?}"
            )));
        }
    }
    Ok(())
}
