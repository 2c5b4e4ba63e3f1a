//! Normalized content digests
//!
//! Digests compare configuration by meaning, not by bytes: both sides are
//! normalized the same way before hashing, so formatting-only differences
//! (key order, whitespace, comments) do not register as drift.

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::Path;

/// SHA-256 hex digest of a string
pub fn sha256_hexdigest(to_digest: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(to_digest.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Normalize JSON configuration content: sorted keys, compact separators
pub fn normalize_config(content: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| Error::Digest(format!("config content is not valid JSON: {e}")))?;
    // serde_json maps are BTreeMap-backed, so serialization is key-sorted
    serde_json::to_string(&value)
        .map_err(|e| Error::Digest(format!("config re-serialization failed: {e}")))
}

/// Digest of a configuration file after JSON normalization
pub fn digest_config_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)?;
    digest_config_str(&content)
}

/// Digest of configuration content after JSON normalization
pub fn digest_config_str(content: &str) -> Result<String> {
    Ok(sha256_hexdigest(&normalize_config(content)?))
}

/// Normalize INI-style content: comments and blank lines dropped, keys
/// lowercased, `key=value` without surrounding spacing, section headers kept
pub fn normalize_service_unit(content: &str) -> String {
    let mut normalized = String::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            normalized.push_str(line);
            normalized.push('\n');
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => {
                normalized.push_str(&key.trim().to_lowercase());
                normalized.push('=');
                normalized.push_str(value.trim());
                normalized.push('\n');
            }
            None => {
                normalized.push_str(line);
                normalized.push('\n');
            }
        }
    }
    normalized
}

/// Digest of a service unit file after INI normalization
pub fn digest_service_unit_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)?;
    Ok(digest_service_unit_str(&content))
}

/// Digest of service unit content after INI normalization
pub fn digest_service_unit_str(content: &str) -> String {
    sha256_hexdigest(&normalize_service_unit(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_digest_ignores_key_order_and_whitespace() {
        let a = r#"{"agent": {"trust_domain": "example.org", "log_level": "INFO"}}"#;
        let b = "{\n  \"agent\": {\n    \"log_level\": \"INFO\",\n    \"trust_domain\": \"example.org\"\n  }\n}";
        assert_eq!(digest_config_str(a).unwrap(), digest_config_str(b).unwrap());
    }

    #[test]
    fn test_config_digest_detects_value_change() {
        let a = r#"{"agent": {"log_level": "INFO"}}"#;
        let b = r#"{"agent": {"log_level": "DEBUG"}}"#;
        assert_ne!(digest_config_str(a).unwrap(), digest_config_str(b).unwrap());
    }

    #[test]
    fn test_config_digest_is_deterministic() {
        let content = r#"{"server": {"bind_address": "0.0.0.0", "bind_port": 8081}}"#;
        assert_eq!(
            digest_config_str(content).unwrap(),
            digest_config_str(content).unwrap()
        );
    }

    #[test]
    fn test_config_digest_rejects_malformed_content() {
        assert!(digest_config_str("not json at all").is_err());
    }

    #[test]
    fn test_service_unit_normalization() {
        let a = "[Unit]\nDescription = SPIRE Agent\n\n# a comment\n[Service]\nExecStart=/opt/spire-agent/bin/spire-agent run\n";
        let b = "[Unit]\ndescription=SPIRE Agent\n[Service]\nexecstart = /opt/spire-agent/bin/spire-agent run";
        assert_eq!(digest_service_unit_str(a), digest_service_unit_str(b));

        let c = "[Unit]\nDescription=Something else\n";
        assert_ne!(digest_service_unit_str(a), digest_service_unit_str(c));
    }

    #[test]
    fn test_file_variants_report_missing_files() {
        let missing = Path::new("/definitely/not/here.conf");
        assert!(digest_config_file(missing).is_err());
        assert!(digest_service_unit_file(missing).is_err());
    }
}
