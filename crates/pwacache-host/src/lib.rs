//! # pwacache Host
//!
//! In-process model of the browser side of the protocol: one origin with its
//! cache storage and network, worker registrations with installing, waiting
//! and active slots, and pages that are controlled by a worker and can run an
//! update coordinator.
//!
//! ```text
//! ServiceWorkerContainer
//!   ├── Origin (url, CacheStorage, Fetcher)
//!   ├── Registration per scope
//!   │     ├── installing / waiting / active WorkerHandle
//!   │     └── signal pump ← WorkerSignal
//!   └── Clients
//!         └── Page (PageHost) ── PageEvent ──→ UpdateCoordinator
//! ```

use std::sync::{Mutex, MutexGuard};

pub mod container;
pub mod origin;
pub mod page;
pub mod registration;

pub use container::ServiceWorkerContainer;
pub use origin::{deploy, Origin, WorkerScript};
pub use page::{ClientId, Page};
pub use registration::Registration;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
