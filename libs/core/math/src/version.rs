//! Binary-version patterns and the resolver that picks a concrete binary
//! for an (agent, job) pair (C1).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::errors::MathError;

/// A concrete engine binary version, e.g. `7.1.2` or `7.1.2-NTLMv3`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub suffix: Option<String>,
}

impl Version {
    pub fn parse(s: &str) -> Result<Self, MathError> {
        let (core, suffix) = match s.split_once('-') {
            Some((core, suf)) => (core, Some(suf.to_string())),
            None => (s, None),
        };
        let mut parts = core.split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| MathError::MalformedVersion(s.to_string()))?;
        let minor = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| MathError::MalformedVersion(s.to_string()))?;
        let patch = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(|| MathError::MalformedVersion(s.to_string()))?;
        if parts.next().is_some() {
            return Err(MathError::MalformedVersion(s.to_string()));
        }
        Ok(Version {
            major,
            minor,
            patch,
            suffix,
        })
    }
}

/// Ordering used to pick the "highest" version among compatible candidates:
/// numeric triple first, then suffix broken alphabetically with
/// no-suffix sorting below any suffix (spec.md §4.1 step 3).
impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.suffix, &other.suffix) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A pattern constraining which binary versions may satisfy an agent or a
/// job. See spec.md §3 (VersionPattern) and §4.1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum VersionPattern {
    Default,
    Major(u32),
    Minor(u32, u32),
    Exact {
        major: u32,
        minor: u32,
        patch: u32,
        suffix: Option<String>,
    },
}

impl VersionPattern {
    /// `Matches(pattern, version)` — total, per spec.md §8 property 8.
    pub fn matches(&self, v: &Version) -> bool {
        match self {
            VersionPattern::Default => true,
            VersionPattern::Major(m) => v.major == *m,
            VersionPattern::Minor(m, n) => v.major == *m && v.minor == *n,
            VersionPattern::Exact {
                major,
                minor,
                patch,
                suffix,
            } => {
                v.major == *major
                    && v.minor == *minor
                    && v.patch == *patch
                    && &v.suffix == suffix
            }
        }
    }
}

/// Renders a pattern the way the UI dropdown labels it (spec.md §4.1
/// final paragraph): `default`, `M.x`, `M.m.x`, `M.m.p[-suffix]`.
impl std::fmt::Display for VersionPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionPattern::Default => write!(f, "default"),
            VersionPattern::Major(m) => write!(f, "{m}.x"),
            VersionPattern::Minor(m, n) => write!(f, "{m}.{n}.x"),
            VersionPattern::Exact { major, minor, patch, suffix: None } => write!(f, "{major}.{minor}.{patch}"),
            VersionPattern::Exact { major, minor, patch, suffix: Some(s) } => write!(f, "{major}.{minor}.{patch}-{s}"),
        }
    }
}

/// A binary known to the controller, as consumed by the resolver.
#[derive(Debug, Clone)]
pub struct ActiveBinary {
    pub id: i64,
    pub version: Version,
    pub is_default: bool,
    pub is_active: bool,
}

/// Resolve `(agentPattern, jobPattern, activeBinaries)` into a concrete
/// binary id, following spec.md §4.1 steps 1-4.
#[tracing::instrument(skip(active_binaries), fields(n_binaries = active_binaries.len()))]
pub fn resolve(
    agent_pattern: &VersionPattern,
    job_pattern: &VersionPattern,
    active_binaries: &[ActiveBinary],
) -> Result<i64, MathError> {
    let candidates: Vec<&ActiveBinary> = active_binaries
        .iter()
        .filter(|b| b.is_active)
        .filter(|b| matches!(job_pattern, VersionPattern::Default) || job_pattern.matches(&b.version))
        .collect();

    if candidates.is_empty() {
        return Err(MathError::NoBinaryForJob(format!("{job_pattern:?}")));
    }

    let compatible: Vec<&&ActiveBinary> = candidates
        .iter()
        .filter(|b| matches!(agent_pattern, VersionPattern::Default) || agent_pattern.matches(&b.version))
        .collect();

    if compatible.is_empty() {
        return Err(MathError::Incompatible {
            agent: format!("{agent_pattern:?}"),
            job: format!("{job_pattern:?}"),
        });
    }

    if let Some(default) = compatible.iter().find(|b| b.is_default) {
        return Ok(default.id);
    }

    let highest = compatible
        .iter()
        .max_by(|a, b| a.version.cmp(&b.version))
        .expect("compatible is non-empty");
    Ok(highest.id)
}

/// One bucket of the UI pattern dropdown (spec.md §4.1 final paragraph).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternBucket {
    pub pattern: VersionPattern,
    pub label: String,
    pub count: usize,
}

/// Build the dropdown: `default`, then descending major wildcards, then
/// descending minor wildcards (only for majors with >1 distinct minor),
/// then descending exact versions. Counts are exact per bucket.
pub fn pattern_dropdown(active_binaries: &[ActiveBinary]) -> Vec<PatternBucket> {
    let mut buckets = Vec::new();
    let active: Vec<&ActiveBinary> = active_binaries.iter().filter(|b| b.is_active).collect();

    buckets.push(PatternBucket {
        pattern: VersionPattern::Default,
        label: "default".to_string(),
        count: active.len(),
    });

    let mut majors: Vec<u32> = active.iter().map(|b| b.version.major).collect();
    majors.sort_unstable();
    majors.dedup();
    majors.reverse();
    for m in &majors {
        let count = active.iter().filter(|b| b.version.major == *m).count();
        buckets.push(PatternBucket {
            pattern: VersionPattern::Major(*m),
            label: format!("{m}.x"),
            count,
        });

        let mut minors: Vec<u32> = active
            .iter()
            .filter(|b| b.version.major == *m)
            .map(|b| b.version.minor)
            .collect();
        minors.sort_unstable();
        minors.dedup();
        if minors.len() > 1 {
            minors.reverse();
            for n in &minors {
                let count = active
                    .iter()
                    .filter(|b| b.version.major == *m && b.version.minor == *n)
                    .count();
                buckets.push(PatternBucket {
                    pattern: VersionPattern::Minor(*m, *n),
                    label: format!("{m}.{n}.x"),
                    count,
                });
            }
        }
    }

    let mut exact: Vec<&ActiveBinary> = active.clone();
    exact.sort_by(|a, b| b.version.cmp(&a.version));
    for b in exact {
        buckets.push(PatternBucket {
            pattern: VersionPattern::Exact {
                major: b.version.major,
                minor: b.version.minor,
                patch: b.version.patch,
                suffix: b.version.suffix.clone(),
            },
            label: match &b.version.suffix {
                Some(s) => format!("{}.{}.{}-{}", b.version.major, b.version.minor, b.version.patch, s),
                None => format!("{}.{}.{}", b.version.major, b.version.minor, b.version.patch),
            },
            count: 1,
        });
    }

    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binaries() -> Vec<ActiveBinary> {
        vec![
            ActiveBinary { id: 1, version: Version::parse("6.2.6").unwrap(), is_default: false, is_active: true },
            ActiveBinary { id: 2, version: Version::parse("7.1.1").unwrap(), is_default: false, is_active: true },
            ActiveBinary { id: 3, version: Version::parse("7.1.2").unwrap(), is_default: true, is_active: true },
            ActiveBinary { id: 4, version: Version::parse("7.1.2-NTLMv3").unwrap(), is_default: false, is_active: true },
            ActiveBinary { id: 5, version: Version::parse("7.2.1").unwrap(), is_default: false, is_active: true },
        ]
    }

    #[test]
    fn s4_resolver_default_when_compatible() {
        let bins = binaries();
        let agent = VersionPattern::Major(7);
        let job = VersionPattern::Exact { major: 7, minor: 1, patch: 2, suffix: None };
        assert_eq!(resolve(&agent, &job, &bins).unwrap(), 3);
    }

    #[test]
    fn s4_resolver_suffix_exact_skips_default() {
        let bins = binaries();
        let agent = VersionPattern::Major(7);
        let job = VersionPattern::Exact { major: 7, minor: 1, patch: 2, suffix: Some("NTLMv3".to_string()) };
        assert_eq!(resolve(&agent, &job, &bins).unwrap(), 4);
    }

    #[test]
    fn no_binary_matches_job() {
        let bins = binaries();
        let job = VersionPattern::Major(9);
        let agent = VersionPattern::Default;
        assert!(matches!(resolve(&agent, &job, &bins), Err(MathError::NoBinaryForJob(_))));
    }

    #[test]
    fn incompatible_after_job_match() {
        let bins = binaries();
        let job = VersionPattern::Major(6);
        let agent = VersionPattern::Major(7);
        assert!(matches!(resolve(&agent, &job, &bins), Err(MathError::Incompatible { .. })));
    }

    #[test]
    fn display_matches_dropdown_label_conventions() {
        assert_eq!(VersionPattern::Default.to_string(), "default");
        assert_eq!(VersionPattern::Major(7).to_string(), "7.x");
        assert_eq!(VersionPattern::Minor(7, 1).to_string(), "7.1.x");
        let exact = VersionPattern::Exact { major: 7, minor: 1, patch: 2, suffix: None };
        assert_eq!(exact.to_string(), "7.1.2");
        let suffixed = VersionPattern::Exact { major: 7, minor: 1, patch: 2, suffix: Some("NTLMv3".to_string()) };
        assert_eq!(suffixed.to_string(), "7.1.2-NTLMv3");
    }

    #[test]
    fn property_matches_is_total() {
        let v = Version::parse("7.1.2").unwrap();
        assert!(VersionPattern::Default.matches(&v));
        assert!(VersionPattern::Major(7).matches(&v));
        assert!(!VersionPattern::Major(6).matches(&v));
        assert!(VersionPattern::Minor(7, 1).matches(&v));
        assert!(!VersionPattern::Minor(7, 2).matches(&v));
        let exact = VersionPattern::Exact { major: 7, minor: 1, patch: 2, suffix: None };
        assert!(exact.matches(&v));
        let suffixed = Version::parse("7.1.2-NTLMv3").unwrap();
        assert!(!exact.matches(&suffixed));
    }

    proptest::proptest! {
        /// `Matches(default, v)` holds for every generated version
        /// (spec.md §8 property 8, first clause).
        #[test]
        fn default_pattern_matches_any_version(major in 0u32..20, minor in 0u32..20, patch in 0u32..20) {
            let v = Version { major, minor, patch, suffix: None };
            proptest::prop_assert!(VersionPattern::Default.matches(&v));
        }

        /// `Matches(M.x, v) <=> v.major == M`, for arbitrary major/minor/patch.
        #[test]
        fn major_wildcard_matches_iff_major_equal(
            pattern_major in 0u32..20,
            v_major in 0u32..20,
            minor in 0u32..20,
            patch in 0u32..20,
        ) {
            let v = Version { major: v_major, minor, patch, suffix: None };
            let matches = VersionPattern::Major(pattern_major).matches(&v);
            proptest::prop_assert_eq!(matches, pattern_major == v_major);
        }
    }
}
