//! Numeric build version and lenient parsing of the many version spellings
//! found in archive and directory names.

use crate::{Result, VaultError};
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// A `(major, minor, patch)` version triple with a strict total order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BuildVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl BuildVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn same_major(&self, other: &BuildVersion) -> bool {
        self.major == other.major
    }

    pub fn same_minor(&self, other: &BuildVersion) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl fmt::Display for BuildVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for BuildVersion {
    type Err = VaultError;

    /// Strict parse: exactly three dot-separated numeric components.
    fn from_str(s: &str) -> Result<Self> {
        let malformed = || VaultError::MalformedVersion {
            input: s.to_string(),
        };
        let mut parts = s.split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(malformed)?;
        let minor = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(malformed)?;
        let patch = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

// Versions serialize as their string form so tables and caches stay
// hand-editable.
impl Serialize for BuildVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BuildVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

fn loose_matchers() -> &'static [Regex] {
    static MATCHERS: OnceLock<Vec<Regex>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        // Order matters: the "(sub N)" spelling must win over the bare
        // major.minor fallback.
        [
            r"(\d+)\.(\d+)\.(\d+)",
            r"(\d+)\.(\d+) \(sub (\d+)\)",
            r"(\d+)\.(\d+)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static version matcher"))
        .collect()
    })
}

/// Lenient version extraction for strings like `"4.2"`, `"2.80 (sub 75)"`,
/// `"blender-4.1.0-linux-x64"` or `"upbge-0.36.1-windows"`.
///
/// Tries a strict semver parse first, then falls back to a small matcher
/// table searched anywhere in the string. Missing components default to 0.
pub fn parse_loose_version(s: &str) -> Result<BuildVersion> {
    let trimmed = s.trim();
    if let Ok(v) = semver::Version::parse(trimmed) {
        return Ok(BuildVersion::new(v.major, v.minor, v.patch));
    }

    for matcher in loose_matchers() {
        if let Some(caps) = matcher.captures(trimmed) {
            let num = |i: usize| {
                caps.get(i)
                    .and_then(|m| m.as_str().parse::<u64>().ok())
                    .unwrap_or(0)
            };
            return Ok(BuildVersion::new(num(1), num(2), num(3)));
        }
    }

    Err(VaultError::MalformedVersion {
        input: s.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_parse_roundtrip() {
        for s in ["4.2.0", "0.36.1", "2.80.75"] {
            let v: BuildVersion = s.parse().unwrap();
            assert_eq!(v.to_string(), s);
        }
    }

    #[test]
    fn test_strict_parse_rejects_partial() {
        assert!("4.2".parse::<BuildVersion>().is_err());
        assert!("4".parse::<BuildVersion>().is_err());
        assert!("4.2.0.1".parse::<BuildVersion>().is_err());
        assert!("abc".parse::<BuildVersion>().is_err());
        assert!("".parse::<BuildVersion>().is_err());
    }

    #[test]
    fn test_total_order() {
        let a = BuildVersion::new(4, 2, 0);
        let b = BuildVersion::new(4, 10, 0);
        let c = BuildVersion::new(5, 0, 0);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.cmp(&a), std::cmp::Ordering::Equal);
    }

    #[test]
    fn test_loose_parse_table() {
        let cases = [
            ("4.2.0", BuildVersion::new(4, 2, 0)),
            ("4.2", BuildVersion::new(4, 2, 0)),
            ("2.80 (sub 75)", BuildVersion::new(2, 80, 75)),
            ("blender-4.1.0-linux-x64", BuildVersion::new(4, 1, 0)),
            ("upbge-0.36.1-windows", BuildVersion::new(0, 36, 1)),
            ("bforartists-4.5.2", BuildVersion::new(4, 5, 2)),
            ("v1.12.0", BuildVersion::new(1, 12, 0)),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_loose_version(input).unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn test_loose_parse_rejects_nonsense() {
        assert!(matches!(
            parse_loose_version("no-version-here"),
            Err(VaultError::MalformedVersion { .. })
        ));
    }

    #[test]
    fn test_serde_as_string() {
        let v = BuildVersion::new(4, 2, 1);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"4.2.1\"");
        let back: BuildVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
