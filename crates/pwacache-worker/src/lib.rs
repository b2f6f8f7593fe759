//! # pwacache Worker
//!
//! Background resource cache with versioned stores and fetch interception.
//!
//! ## Features
//!
//! - **Install**: precache a fixed manifest into `<prefix>-v<N>`, all or nothing
//! - **Activate**: garbage-collect every other store, optionally claim pages
//! - **Fetch**: network-first for documents, cache-first for everything else,
//!   network-only for excluded bootstrap scripts
//! - **Messages**: `SKIP_WAITING` in string or tagged form
//!
//! ## Architecture
//!
//! ```text
//! WorkerHandle ── Command ──→ CacheWorker (actor)
//!                                 ├── machine::transition (pure)
//!                                 ├── Responder (one task per fetch)
//!                                 │       ├── FetchPolicy
//!                                 │       └── Fetcher (network)
//!                                 └── CacheStorage (shared per origin)
//!
//! CacheWorker ── WorkerSignal ──→ host
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod fetch;
pub mod machine;
pub mod manifest;
pub mod message;
pub mod policy;
pub mod request;
pub mod store;
pub mod version;
pub mod worker;

pub use fetch::{FetchError, Fetcher, HttpFetcher, HttpFetcherConfig, MemoryOrigin};
pub use manifest::ResourceManifest;
pub use message::ControlMessage;
pub use policy::{FetchPolicy, Route};
pub use request::{Destination, Request, RequestMode, Response, ResponseType};
pub use store::{CacheEntry, CacheStorage, CacheStore, SharedStorage};
pub use version::{CacheName, CacheVersion};
pub use worker::{CacheWorker, WorkerHandle, WorkerSignal};

/// Unique identifier for a worker generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Script evaluated, install not started.
    #[default]
    Parsed,
    /// Install event running.
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Activate event running.
    Activating,
    /// Active and answering fetches.
    Activated,
    /// Replaced or failed to install.
    Redundant,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_ids_are_unique() {
        assert_ne!(WorkerId::new(), WorkerId::new());
    }

    #[test]
    fn test_state_names_match_serde() {
        for state in [
            WorkerState::Installing,
            WorkerState::Installed,
            WorkerState::Activated,
            WorkerState::Redundant,
        ] {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, state.as_str());
        }
    }
}
