//! Release-version parsing and in-place upgrade compatibility

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// A strict `major.minor.patch` release version
///
/// SPIRE releases use plain semantic versions; anything else (pre-release
/// tags, build metadata, legacy formats) is rejected with a typed error so
/// upgrade decisions never run on guessed numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReleaseVersion {
    /// Major version
    pub major: u64,
    /// Minor version
    pub minor: u64,
    /// Patch version
    pub patch: u64,
}

impl FromStr for ReleaseVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::MissingValue("version".to_string()));
        }
        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() != 3 {
            return Err(Error::BadVersion(trimmed.to_string()));
        }
        let mut numbers = [0u64; 3];
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(Error::BadVersion(trimmed.to_string()));
            }
            numbers[i] = part
                .parse()
                .map_err(|_| Error::BadVersion(trimmed.to_string()))?;
        }
        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
        })
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

fn within_one_minor(a: ReleaseVersion, b: ReleaseVersion) -> bool {
    a.major == b.major && a.minor.abs_diff(b.minor) <= 1
}

fn is_0_12_x(v: ReleaseVersion) -> bool {
    v.major == 0 && v.minor == 12
}

fn is_1_0_x(v: ReleaseVersion) -> bool {
    v.major == 1 && v.minor == 0
}

/// Whether an in-place upgrade or downgrade between the two versions is safe
///
/// Allowed iff both versions share a major and differ by at most one minor,
/// or the transition is the known 0.12.x ↔ 1.0.x boundary jump in either
/// direction. Callers wanting a larger jump should reinstall via
/// absent → present instead.
pub fn can_upgrade_or_downgrade(current: &str, target: &str) -> Result<bool> {
    let current: ReleaseVersion = current.parse()?;
    let target: ReleaseVersion = target.parse()?;
    Ok(within_one_minor(current, target)
        || (is_0_12_x(current) && is_1_0_x(target))
        || (is_0_12_x(target) && is_1_0_x(current)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release_version() {
        let v: ReleaseVersion = "1.12.3".parse().unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 12, 3));
        assert_eq!(v.to_string(), "1.12.3");
    }

    #[test]
    fn test_parse_rejects_legacy_formats() {
        for bad in ["1.0", "1.0.0-rc1", "v1.0.0", "1.0.x", "", "  ", "1.0.0.0"] {
            assert!(bad.parse::<ReleaseVersion>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_within_one_minor_either_direction() {
        assert!(can_upgrade_or_downgrade("0.10.0", "0.11.2").unwrap());
        assert!(can_upgrade_or_downgrade("0.11.2", "0.10.0").unwrap());
        assert!(can_upgrade_or_downgrade("1.5.0", "1.5.9").unwrap());
    }

    #[test]
    fn test_two_minor_jump_rejected() {
        assert!(!can_upgrade_or_downgrade("0.10.0", "0.12.0").unwrap());
    }

    #[test]
    fn test_major_boundary_jump_is_symmetric() {
        assert!(can_upgrade_or_downgrade("0.12.3", "1.0.0").unwrap());
        assert!(can_upgrade_or_downgrade("1.0.0", "0.12.3").unwrap());
        // other cross-major jumps stay rejected
        assert!(!can_upgrade_or_downgrade("0.11.0", "1.0.0").unwrap());
        assert!(!can_upgrade_or_downgrade("1.1.0", "0.12.0").unwrap());
    }

    #[test]
    fn test_malformed_versions_are_typed_errors() {
        let err = can_upgrade_or_downgrade("0.10.x", "1.0.0").unwrap_err();
        assert!(matches!(err, Error::BadVersion(_)));
        let err = can_upgrade_or_downgrade("", "1.0.0").unwrap_err();
        assert!(matches!(err, Error::MissingValue(_)));
    }
}
