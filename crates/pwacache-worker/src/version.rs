//! Cache namespace naming: `<prefix>-v<N>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Monotonically bumped deployment version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheVersion(pub u64);

impl CacheVersion {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Name of a versioned cache store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheName {
    pub prefix: String,
    pub version: CacheVersion,
}

impl CacheName {
    pub fn new(prefix: impl Into<String>, version: CacheVersion) -> Self {
        Self {
            prefix: prefix.into(),
            version,
        }
    }

    /// Parse a store name, returning `None` for names outside the scheme.
    pub fn parse(name: &str) -> Option<Self> {
        let (prefix, version) = name.rsplit_once("-v")?;
        if prefix.is_empty() || version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let version = version.parse().ok()?;
        Some(Self::new(prefix, CacheVersion(version)))
    }

    /// The name of the next deployment's store.
    pub fn bumped(&self) -> Self {
        Self::new(self.prefix.clone(), self.version.next())
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.prefix, self.version)
    }
}

impl FromStr for CacheName {
    type Err = pwacache_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            pwacache_common::Error::InvalidArgument(format!("not a versioned cache name: {s}"))
        })
    }
}
