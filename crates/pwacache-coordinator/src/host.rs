//! Seams between the coordinator and the page's host runtime.

use async_trait::async_trait;
use pwacache_common::Result;
use pwacache_worker::{WorkerId, WorkerState};
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Events the host delivers to a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    /// The registration started installing a new worker.
    UpdateFound { worker: WorkerId },
    /// A worker of the registration changed state.
    StateChange { worker: WorkerId, state: WorkerState },
    /// The page's controlling worker changed.
    ControllerChange,
    /// The page became visible or hidden.
    VisibilityChange { visible: bool },
}

/// Registers worker scripts (`navigator.serviceWorker`).
#[async_trait]
pub trait WorkerContainer: Send + Sync {
    async fn register(&self, script_url: &str) -> Result<Arc<dyn WorkerRegistration>>;
}

/// A worker registration as seen from the page.
#[async_trait]
pub trait WorkerRegistration: Send + Sync {
    /// Check the server for a newer worker script.
    async fn update(&self) -> Result<()>;

    /// The installed worker waiting to activate, if any.
    async fn waiting_worker(&self) -> Option<WorkerId>;

    /// Post a message to one of the registration's workers.
    async fn post_message(&self, worker: WorkerId, data: JsonValue) -> Result<()>;
}

/// The page the coordinator runs in.
pub trait PageHost: Send + Sync {
    /// Whether a worker currently controls the page.
    fn has_controller(&self) -> bool;

    /// Show or remove the update banner.
    fn set_prompt_visible(&self, visible: bool);

    /// Reload the document.
    fn reload(&self);
}
