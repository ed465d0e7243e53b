//! Version numbers of installed services and of medsrv itself

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Dotted version, e.g. `7.0`, `7.0.12` or `0.2.0-rc.1+build5`.
///
/// Missing minor or patch components read as zero so that install
/// directories named `7.0` compare against full `7.0.12` releases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
    pub build: Option<String>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("invalid version format")]
    InvalidFormat,
    #[error("invalid version number")]
    InvalidNumber,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
            build: None,
        }
    }

    /// Version of the running medsrv build
    pub fn current() -> Self {
        // CARGO_PKG_VERSION is always a valid semver string
        env!("CARGO_PKG_VERSION")
            .parse()
            .unwrap_or_else(|_| Self::new(0, 0, 0))
    }

    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some()
    }

    /// Sort `names` (directory names, tags, ...) newest first, dropping
    /// anything that is not a version.
    pub fn newest_first<I, S>(names: I) -> Vec<(Version, S)>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parsed: Vec<(Version, S)> = names
            .into_iter()
            .filter_map(|name| name.as_ref().parse().ok().map(|v| (v, name)))
            .collect();
        parsed.sort_by(|a, b| b.0.cmp(&a.0));
        parsed
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix('v').unwrap_or(s);

        let mut parts = s.splitn(2, '+');
        let main_part = parts.next().ok_or(VersionError::InvalidFormat)?;
        let build_part = parts.next();

        let mut parts = main_part.splitn(2, '-');
        let version_part = parts.next().ok_or(VersionError::InvalidFormat)?;
        let pre_part = parts.next();

        let components: Vec<&str> = version_part.split('.').collect();
        if components.is_empty() || components.len() > 3 {
            return Err(VersionError::InvalidFormat);
        }

        let mut numbers = [0u64; 3];
        for (slot, component) in numbers.iter_mut().zip(&components) {
            *slot = component
                .parse()
                .map_err(|_| VersionError::InvalidNumber)?;
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre: pre_part.map(str::to_string),
            build: build_part.map(str::to_string),
        })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                // Stable > pre-release
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}
