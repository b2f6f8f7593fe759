//! A worker registration: installing, waiting and active slots.
//!
//! Update and activation jobs for one registration never overlap; both run
//! under the job lock. Worker signals are drained by a pump task that holds
//! only a weak reference, so dropping the registration stops it.

use async_trait::async_trait;
use bytes::Bytes;
use pwacache_common::{Error, Result};
use pwacache_coordinator::{PageEvent, WorkerRegistration};
use pwacache_worker::{CacheWorker, WorkerHandle, WorkerId, WorkerSignal, WorkerState};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::lock;
use crate::origin::Origin;
use crate::page::Clients;

#[derive(Default)]
struct Slots {
    installing: Option<WorkerHandle>,
    waiting: Option<WorkerHandle>,
    active: Option<WorkerHandle>,
    /// Script body of the newest installed worker.
    script: Option<Bytes>,
    /// Script body that failed to install or was rejected. Not retried until
    /// a different script is deployed.
    failed: Option<Bytes>,
    /// Why the last install failed.
    install_error: Option<Error>,
}

/// Service worker registration for one scope.
pub struct Registration {
    scope: String,
    script_url: String,
    origin: Arc<Origin>,
    clients: Arc<Clients>,
    slots: Mutex<Slots>,
    job: tokio::sync::Mutex<()>,
    signals: mpsc::UnboundedSender<WorkerSignal>,
}

impl Registration {
    pub(crate) fn new(
        scope: String,
        script_url: String,
        origin: Arc<Origin>,
        clients: Arc<Clients>,
    ) -> Arc<Self> {
        let (signals, rx) = mpsc::unbounded_channel();
        let registration = Arc::new(Self {
            scope,
            script_url,
            origin,
            clients,
            slots: Mutex::new(Slots::default()),
            job: tokio::sync::Mutex::new(()),
            signals,
        });
        tokio::spawn(pump(Arc::downgrade(&registration), rx));
        registration
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn script_url(&self) -> &str {
        &self.script_url
    }

    pub fn installing(&self) -> Option<WorkerHandle> {
        lock(&self.slots).installing.clone()
    }

    pub fn waiting(&self) -> Option<WorkerHandle> {
        lock(&self.slots).waiting.clone()
    }

    pub fn active(&self) -> Option<WorkerHandle> {
        lock(&self.slots).active.clone()
    }

    /// Take the error of the last failed install, if the newest deployed
    /// script failed to install.
    pub fn take_install_error(&self) -> Option<Error> {
        lock(&self.slots).install_error.take()
    }

    /// Fetch the worker script and install it if it changed.
    ///
    /// A first worker activates as soon as it is installed. A later one waits
    /// until it asks to skip waiting or no page is controlled by the active
    /// worker.
    ///
    /// A script that failed to install is not installed again until a
    /// different script is deployed. A script whose cache name belongs to the
    /// waiting or active worker is rejected, so a live store is never
    /// overwritten.
    pub async fn update(&self) -> Result<()> {
        let _job = self.job.lock().await;

        let (body, script) = self.origin.fetch_script(&self.script_url).await?;
        {
            let slots = lock(&self.slots);
            if slots.script.as_ref() == Some(&body) {
                debug!(scope = %self.scope, "Worker script unchanged");
                return Ok(());
            }
            if slots.failed.as_ref() == Some(&body) {
                debug!(scope = %self.scope, "Worker script already failed, waiting for a new deploy");
                return Ok(());
            }
        }

        let cache = script.config().cache_name();
        if let Some(live) = self.worker_using(&cache) {
            lock(&self.slots).failed = Some(body);
            let err = Error::config(format!(
                "deployed script reuses cache {cache} of worker {}; bump the version",
                live.id()
            ));
            warn!(scope = %self.scope, error = %err, "Worker script rejected");
            return Err(err);
        }

        let worker = CacheWorker::spawn(
            script.config(),
            self.origin.url().clone(),
            Arc::clone(self.origin.fetcher()),
            Arc::clone(self.origin.storage()),
            self.signals.clone(),
        )?;
        info!(scope = %self.scope, worker = %worker.id(), cache = %worker.cache_name(), "Installing new worker");

        lock(&self.slots).installing = Some(worker.clone());
        self.clients.broadcast(PageEvent::UpdateFound { worker: worker.id() });

        if let Err(err) = worker.install().await {
            let mut slots = lock(&self.slots);
            if slots.installing.as_ref().map(WorkerHandle::id) == Some(worker.id()) {
                slots.installing = None;
            }
            slots.failed = Some(body);
            slots.install_error = Some(match &err {
                Error::InstallFailed {
                    cache,
                    resource,
                    reason,
                } => Error::install_failed(cache, resource, reason),
                other => Error::install_failed(
                    worker.cache_name().to_string(),
                    &self.script_url,
                    other.to_string(),
                ),
            });
            return Err(err);
        }

        self.promote(worker.id()).await;
        {
            let mut slots = lock(&self.slots);
            slots.script = Some(body);
            slots.failed = None;
            slots.install_error = None;
        }

        if !self.active_controls_pages() {
            self.activate_waiting().await?;
        }
        Ok(())
    }

    /// Activate `worker` now if it is the waiting worker.
    pub async fn skip_waiting(&self, worker: WorkerId) -> Result<()> {
        let _job = self.job.lock().await;
        if self.waiting().map(|w| w.id()) != Some(worker) {
            debug!(%worker, "Skip waiting for a worker that is not waiting");
            return Ok(());
        }
        self.activate_waiting().await
    }

    /// Activate the waiting worker if no page still uses the active one.
    pub async fn try_activate(&self) -> Result<()> {
        let _job = self.job.lock().await;
        if self.waiting().is_some() && !self.active_controls_pages() {
            self.activate_waiting().await?;
        }
        Ok(())
    }

    fn active_controls_pages(&self) -> bool {
        match self.active() {
            Some(active) => self.clients.is_controlled_by(active.id()),
            None => false,
        }
    }

    /// Move `worker` from installing to waiting, replacing an older waiting
    /// worker. Does nothing if it already moved.
    async fn promote(&self, worker: WorkerId) {
        let replaced = {
            let mut slots = lock(&self.slots);
            if slots.installing.as_ref().map(WorkerHandle::id) != Some(worker) {
                return;
            }
            let installed = slots.installing.take();
            std::mem::replace(&mut slots.waiting, installed)
        };
        if let Some(old) = replaced {
            info!(worker = %old.id(), "Waiting worker replaced by a newer one");
            let _ = old.mark_replaced().await;
        }
    }

    /// Must be called with the job lock held.
    async fn activate_waiting(&self) -> Result<()> {
        let (next, previous) = {
            let mut slots = lock(&self.slots);
            let Some(next) = slots.waiting.take() else {
                return Ok(());
            };
            let previous = slots.active.replace(next.clone());
            (next, previous)
        };
        info!(scope = %self.scope, worker = %next.id(), "Activating worker");

        if let Some(previous) = &previous {
            previous.mark_replaced().await?;
        }
        next.activate().await?;

        if let Some(previous) = previous {
            let moved = self.clients.replace_controller(previous.id(), &next);
            debug!(worker = %next.id(), moved, "Controlled pages moved to new worker");
        }
        Ok(())
    }

    fn claim(&self, worker: WorkerId) {
        let Some(active) = self.active().filter(|a| a.id() == worker) else {
            debug!(%worker, "Claim from a worker that is not active");
            return;
        };
        let claimed = self.clients.claim(&active);
        info!(%worker, claimed, "Worker claimed pages");
    }

    fn find(&self, worker: WorkerId) -> Option<WorkerHandle> {
        let slots = lock(&self.slots);
        let found = [&slots.installing, &slots.waiting, &slots.active]
            .into_iter()
            .flatten()
            .find(|w| w.id() == worker)
            .cloned();
        found
    }

    /// The waiting or active worker that owns the store named `cache`.
    fn worker_using(&self, cache: &str) -> Option<WorkerHandle> {
        let slots = lock(&self.slots);
        let found = [&slots.waiting, &slots.active]
            .into_iter()
            .flatten()
            .find(|w| w.cache_name().to_string() == cache)
            .cloned();
        found
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = lock(&self.slots);
        f.debug_struct("Registration")
            .field("scope", &self.scope)
            .field("script_url", &self.script_url)
            .field("installing", &slots.installing)
            .field("waiting", &slots.waiting)
            .field("active", &slots.active)
            .finish()
    }
}

#[async_trait]
impl WorkerRegistration for Registration {
    async fn update(&self) -> Result<()> {
        Registration::update(self).await
    }

    async fn waiting_worker(&self) -> Option<WorkerId> {
        self.waiting().map(|w| w.id())
    }

    async fn post_message(&self, worker: WorkerId, data: JsonValue) -> Result<()> {
        let handle = self
            .find(worker)
            .ok_or_else(|| Error::NotFound(format!("worker {worker}")))?;
        handle.post_message(data).await
    }
}

async fn pump(registration: Weak<Registration>, mut rx: mpsc::UnboundedReceiver<WorkerSignal>) {
    while let Some(signal) = rx.recv().await {
        let Some(registration) = registration.upgrade() else {
            break;
        };
        match signal {
            WorkerSignal::StateChanged { worker, state } => {
                // Pages must see an installed update in the waiting slot.
                if state == WorkerState::Installed {
                    registration.promote(worker).await;
                }
                registration
                    .clients
                    .broadcast(PageEvent::StateChange { worker, state });
            }
            WorkerSignal::SkipWaitingRequested { worker } => {
                tokio::spawn(async move {
                    if let Err(err) = registration.skip_waiting(worker).await {
                        warn!(%worker, error = %err, "Activation failed");
                    }
                });
            }
            WorkerSignal::ClaimRequested { worker } => registration.claim(worker),
        }
    }
}
