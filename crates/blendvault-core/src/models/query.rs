//! Version search queries for picking builds out of a set.
//!
//! Queries use a small non-semver syntax,
//! `<major>.<minor>.<patch>[-<lineage>][+<hash>][@<commit time>]`, where each
//! positional place is a number or one of:
//!
//! - `^` — match the largest/newest value in that place
//! - `*` — match any value
//! - `-` — match the smallest/oldest value
//!
//! Examples: `*.*.*`, `4.2.^`, `^.^.*-daily@^`, `4.3.^+cb886aba06d5`.

use crate::config::Lineage;
use crate::models::build::BuildIdentity;
use crate::{Result, VaultError};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// One positional place of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Place {
    #[default]
    Any,
    Largest,
    Smallest,
    Exact(u64),
}

impl Place {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "*" => Some(Place::Any),
            "^" => Some(Place::Largest),
            "-" => Some(Place::Smallest),
            n => n.parse().ok().map(Place::Exact),
        }
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Place::Any => write!(f, "*"),
            Place::Largest => write!(f, "^"),
            Place::Smallest => write!(f, "-"),
            Place::Exact(n) => write!(f, "{n}"),
        }
    }
}

/// Commit-time place: temporal analog of [`Place`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimePlace {
    #[default]
    Any,
    Latest,
    Oldest,
    Exact(DateTime<Utc>),
}

/// A search query over build identities. Places are applied in priority
/// order: hash, major, minor, patch, lineage, commit time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionSearchQuery {
    pub content_hash: Option<String>,
    pub major: Place,
    pub minor: Place,
    pub patch: Place,
    pub lineages: Option<Vec<Lineage>>,
    pub commit_time: TimePlace,
}

fn query_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^([\^\-\*]|\d+)\.([\^\-\*]|\d+)\.([\^\-\*]|\d+)(?:-([^@\s+]+))?(?:\+([0-9a-zA-Z]+))?(?:@([\^\-\*]|.+))?$",
        )
        .expect("static query grammar")
    })
}

impl VersionSearchQuery {
    /// The newest build overall: `^.^.^@^`.
    pub fn newest() -> Self {
        Self {
            major: Place::Largest,
            minor: Place::Largest,
            patch: Place::Largest,
            commit_time: TimePlace::Latest,
            ..Self::default()
        }
    }

    /// Any build at all: `*.*.*`.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn with_lineages(mut self, lineages: Vec<Lineage>) -> Self {
        self.lineages = Some(lineages);
        self
    }

    pub fn parse(s: &str) -> Result<Self> {
        let malformed = || VaultError::MalformedVersion {
            input: s.to_string(),
        };
        let caps = query_re().captures(s.trim()).ok_or_else(malformed)?;
        let place = |i: usize| {
            caps.get(i)
                .and_then(|m| Place::parse(m.as_str()))
                .ok_or_else(malformed)
        };

        let lineages = match caps.get(4) {
            Some(m) => {
                let parsed: Option<Vec<Lineage>> =
                    m.as_str().split(',').map(Lineage::from_str).collect();
                Some(parsed.ok_or_else(malformed)?)
            }
            None => None,
        };

        let commit_time = match caps.get(6).map(|m| m.as_str()) {
            None | Some("*") => TimePlace::Any,
            Some("^") => TimePlace::Latest,
            Some("-") => TimePlace::Oldest,
            Some(raw) => TimePlace::Exact(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|_| malformed())?
                    .with_timezone(&Utc),
            ),
        };

        Ok(Self {
            content_hash: caps.get(5).map(|m| m.as_str().to_string()),
            major: place(1)?,
            minor: place(2)?,
            patch: place(3)?,
            lineages,
            commit_time,
        })
    }

    /// Filter `builds` down to the matching set, narrowing place by place.
    pub fn matches<'a>(&self, builds: &[&'a BuildIdentity]) -> Vec<&'a BuildIdentity> {
        let mut remaining: Vec<&BuildIdentity> = builds.to_vec();

        if let Some(ref hash) = self.content_hash {
            remaining.retain(|b| b.content_hash.as_deref() == Some(hash.as_str()));
        }

        type PlaceGetter = fn(&BuildIdentity) -> u64;
        for (place, get) in [
            (self.major, (|b: &BuildIdentity| b.version.major) as PlaceGetter),
            (self.minor, (|b: &BuildIdentity| b.version.minor) as PlaceGetter),
            (self.patch, (|b: &BuildIdentity| b.version.patch) as PlaceGetter),
        ] {
            if remaining.is_empty() {
                return remaining;
            }
            match place {
                Place::Any => {}
                Place::Exact(n) => remaining.retain(|b| get(b) == n),
                Place::Largest => {
                    let max = remaining.iter().map(|b| get(b)).max().unwrap();
                    remaining.retain(|b| get(b) == max);
                }
                Place::Smallest => {
                    let min = remaining.iter().map(|b| get(b)).min().unwrap();
                    remaining.retain(|b| get(b) == min);
                }
            }
        }

        if let Some(ref lineages) = self.lineages {
            remaining.retain(|b| lineages.contains(&b.lineage));
        }

        if remaining.is_empty() {
            return remaining;
        }
        match self.commit_time {
            TimePlace::Any => {}
            TimePlace::Exact(t) => remaining.retain(|b| b.commit_time == Some(t)),
            TimePlace::Latest => {
                let max = remaining.iter().map(|b| b.commit_time).max().unwrap();
                remaining.retain(|b| b.commit_time == max);
            }
            TimePlace::Oldest => {
                let min = remaining.iter().map(|b| b.commit_time).min().unwrap();
                remaining.retain(|b| b.commit_time == min);
            }
        }

        remaining
    }
}

impl fmt::Display for VersionSearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref lineages) = self.lineages {
            let names: Vec<&str> = lineages.iter().map(Lineage::as_str).collect();
            write!(f, "-{}", names.join(","))?;
        }
        if let Some(ref hash) = self.content_hash {
            write!(f, "+{hash}")?;
        }
        match self.commit_time {
            TimePlace::Any => {}
            TimePlace::Latest => write!(f, "@^")?,
            TimePlace::Oldest => write!(f, "@-")?,
            TimePlace::Exact(t) => {
                write!(f, "@{}", t.to_rfc3339_opts(SecondsFormat::Secs, true))?
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::version::BuildVersion;
    use chrono::TimeZone;

    fn build(
        version: (u64, u64, u64),
        lineage: Lineage,
        hash: &str,
        day: u32,
    ) -> BuildIdentity {
        let mut b = BuildIdentity::new(
            BuildVersion::new(version.0, version.1, version.2),
            lineage,
            "url",
        )
        .with_commit_time(Utc.with_ymd_and_hms(2024, 7, day, 0, 0, 0).unwrap());
        if !hash.is_empty() {
            b = b.with_hash(hash);
        }
        b
    }

    fn corpus() -> Vec<BuildIdentity> {
        vec![
            build((1, 2, 3), Lineage::Stable, "", 4),
            build((1, 2, 4), Lineage::Stable, "", 6),
            build((3, 6, 14), Lineage::Lts, "", 16),
            build((4, 2, 0), Lineage::Stable, "", 16),
            build((4, 3, 0), Lineage::Daily, "aab", 30),
            build((4, 3, 0), Lineage::Daily, "aac", 28),
            build((4, 3, 1), Lineage::Daily, "aad", 20),
        ]
    }

    #[test]
    fn test_parse_roundtrip() {
        for s in [
            "*.*.*",
            "^.^.*",
            "4.2.^",
            "*.*.14",
            "*.*.*-lts",
            "^.*.*-daily@^",
            "4.3.^+cb886aba06d5",
            "*.*.*@2024-07-31T23:53:51Z",
        ] {
            let query = VersionSearchQuery::parse(s).unwrap();
            let printed = query.to_string();
            assert_eq!(printed, s, "roundtrip of {s}");
            assert_eq!(VersionSearchQuery::parse(&printed).unwrap(), query);
        }
    }

    #[test]
    fn test_parse_rejects_invalid() {
        for bad in ["abc", "4.2", "^.^", ""] {
            assert!(VersionSearchQuery::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_match_largest_minor_any_patch() {
        let builds = corpus();
        let refs: Vec<&BuildIdentity> = builds.iter().collect();
        let results = VersionSearchQuery::parse("^.^.*").unwrap().matches(&refs);
        let versions: Vec<BuildVersion> = results.iter().map(|b| b.version).collect();
        assert_eq!(
            versions,
            vec![
                BuildVersion::new(4, 3, 0),
                BuildVersion::new(4, 3, 0),
                BuildVersion::new(4, 3, 1)
            ]
        );
    }

    #[test]
    fn test_match_exact_patch() {
        let builds = corpus();
        let refs: Vec<&BuildIdentity> = builds.iter().collect();
        let results = VersionSearchQuery::parse("*.*.14").unwrap().matches(&refs);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].lineage, Lineage::Lts);
    }

    #[test]
    fn test_match_lineage_and_latest_time() {
        let builds = corpus();
        let refs: Vec<&BuildIdentity> = builds.iter().collect();
        let results = VersionSearchQuery::parse("^.*.*-daily@^")
            .unwrap()
            .matches(&refs);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content_hash.as_deref(), Some("aab"));
    }

    #[test]
    fn test_match_oldest_major() {
        let builds = corpus();
        let refs: Vec<&BuildIdentity> = builds.iter().collect();
        let results = VersionSearchQuery::parse("-.*.^").unwrap().matches(&refs);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].version, BuildVersion::new(1, 2, 4));
    }

    #[test]
    fn test_match_by_hash() {
        let builds = corpus();
        let refs: Vec<&BuildIdentity> = builds.iter().collect();
        let results = VersionSearchQuery::parse("*.*.*+aac").unwrap().matches(&refs);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content_hash.as_deref(), Some("aac"));
    }

    #[test]
    fn test_match_empty_set_stays_empty() {
        let results = VersionSearchQuery::newest().matches(&[]);
        assert!(results.is_empty());
    }
}
