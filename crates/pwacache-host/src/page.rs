//! Pages (window clients) and the client list of an origin.

use pwacache_coordinator::{PageEvent, PageHost};
use pwacache_worker::{WorkerHandle, WorkerId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use crate::lock;

/// Unique identifier for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// An open document.
pub struct Page {
    id: ClientId,
    url: Url,
    controller: Mutex<Option<WorkerHandle>>,
    visible: AtomicBool,
    prompt_visible: AtomicBool,
    reloads: AtomicUsize,
    events: mpsc::UnboundedSender<PageEvent>,
}

impl Page {
    pub(crate) fn new(
        url: Url,
        controller: Option<WorkerHandle>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PageEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let page = Arc::new(Self {
            id: ClientId::new(),
            url,
            controller: Mutex::new(controller),
            visible: AtomicBool::new(true),
            prompt_visible: AtomicBool::new(false),
            reloads: AtomicUsize::new(0),
            events,
        });
        (page, rx)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The worker that answers this page's requests.
    pub fn controller(&self) -> Option<WorkerHandle> {
        lock(&self.controller).clone()
    }

    pub fn controller_id(&self) -> Option<WorkerId> {
        lock(&self.controller).as_ref().map(WorkerHandle::id)
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    /// Change tab visibility, notifying the page when it flips.
    pub fn set_visible(&self, visible: bool) {
        if self.visible.swap(visible, Ordering::SeqCst) != visible {
            self.dispatch(PageEvent::VisibilityChange { visible });
        }
    }

    pub fn is_prompt_visible(&self) -> bool {
        self.prompt_visible.load(Ordering::SeqCst)
    }

    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }

    /// Replace the controller. Returns true when it changed.
    pub(crate) fn set_controller(&self, worker: &WorkerHandle) -> bool {
        let mut controller = lock(&self.controller);
        if controller.as_ref().map(WorkerHandle::id) == Some(worker.id()) {
            return false;
        }
        *controller = Some(worker.clone());
        true
    }

    pub(crate) fn dispatch(&self, event: PageEvent) {
        if self.events.send(event).is_err() {
            debug!(client = %self.id, "Page stopped listening");
        }
    }
}

impl PageHost for Page {
    fn has_controller(&self) -> bool {
        lock(&self.controller).is_some()
    }

    fn set_prompt_visible(&self, visible: bool) {
        self.prompt_visible.store(visible, Ordering::SeqCst);
    }

    fn reload(&self) {
        let count = self.reloads.fetch_add(1, Ordering::SeqCst) + 1;
        self.prompt_visible.store(false, Ordering::SeqCst);
        info!(client = %self.id, url = %self.url, count, "Page reloaded");
    }
}

/// Open pages of one origin.
#[derive(Default)]
pub(crate) struct Clients {
    pages: Mutex<Vec<Arc<Page>>>,
}

impl Clients {
    pub fn add(&self, page: Arc<Page>) {
        lock(&self.pages).push(page);
    }

    pub fn remove(&self, id: ClientId) -> bool {
        let mut pages = lock(&self.pages);
        let before = pages.len();
        pages.retain(|p| p.id != id);
        pages.len() != before
    }

    pub fn broadcast(&self, event: PageEvent) {
        for page in lock(&self.pages).iter() {
            page.dispatch(event.clone());
        }
    }

    pub fn is_controlled_by(&self, worker: WorkerId) -> bool {
        lock(&self.pages)
            .iter()
            .any(|p| p.controller_id() == Some(worker))
    }

    /// Hand every page controlled by `from` to `to`.
    pub fn replace_controller(&self, from: WorkerId, to: &WorkerHandle) -> usize {
        self.update_controllers(to, |page| page.controller_id() == Some(from))
    }

    /// Make `worker` the controller of every page.
    pub fn claim(&self, worker: &WorkerHandle) -> usize {
        self.update_controllers(worker, |_| true)
    }

    fn update_controllers(&self, worker: &WorkerHandle, select: impl Fn(&Page) -> bool) -> usize {
        let pages = lock(&self.pages);
        let mut changed = 0;
        for page in pages.iter() {
            if select(page.as_ref()) && page.set_controller(worker) {
                page.dispatch(PageEvent::ControllerChange);
                changed += 1;
            }
        }
        changed
    }
}
