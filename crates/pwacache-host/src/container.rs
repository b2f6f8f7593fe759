//! Per-origin service worker container (`navigator.serviceWorker`).

use async_trait::async_trait;
use hashbrown::HashMap;
use pwacache_common::{Error, Result};
use pwacache_coordinator::{PageEvent, WorkerContainer, WorkerRegistration};
use pwacache_worker::{Request, Response};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::origin::Origin;
use crate::page::{Clients, Page};
use crate::registration::Registration;

/// Registrations, pages and fetch routing for one origin.
pub struct ServiceWorkerContainer {
    origin: Arc<Origin>,
    registrations: RwLock<HashMap<String, Arc<Registration>>>,
    clients: Arc<Clients>,
}

impl ServiceWorkerContainer {
    pub fn new(origin: Arc<Origin>) -> Arc<Self> {
        Arc::new(Self {
            origin,
            registrations: RwLock::new(HashMap::new()),
            clients: Arc::new(Clients::default()),
        })
    }

    pub fn origin(&self) -> &Arc<Origin> {
        &self.origin
    }

    /// Register `script_url`, or update the existing registration for its
    /// scope.
    ///
    /// A failed install of a new version does not fail registration; only
    /// an unreachable or invalid script does.
    pub async fn register_script(&self, script_url: &str) -> Result<Arc<Registration>> {
        let scope = scope_of(script_url);

        let existing = self.registrations.read().await.get(&scope).cloned();
        if let Some(registration) = existing {
            if let Err(err) = registration.update().await {
                warn!(scope = %scope, error = %err, "Update on register failed");
            }
            return Ok(registration);
        }

        let registration = Registration::new(
            scope.clone(),
            script_url.to_string(),
            Arc::clone(&self.origin),
            Arc::clone(&self.clients),
        );
        self.registrations
            .write()
            .await
            .insert(scope.clone(), Arc::clone(&registration));

        match registration.update().await {
            Ok(()) => {}
            Err(err @ Error::InstallFailed { .. }) => {
                warn!(scope = %scope, error = %err, "First install failed");
            }
            Err(err) => {
                self.registrations.write().await.remove(&scope);
                return Err(err);
            }
        }

        info!(scope = %scope, script = script_url, "Registered worker");
        Ok(registration)
    }

    /// The registration for an exact scope.
    pub async fn registration(&self, scope: &str) -> Option<Arc<Registration>> {
        self.registrations.read().await.get(scope).cloned()
    }

    /// The registration with the longest scope containing `path`.
    pub async fn registration_for(&self, path: &str) -> Option<Arc<Registration>> {
        self.registrations
            .read()
            .await
            .iter()
            .filter(|(scope, _)| path.starts_with(scope.as_str()))
            .max_by_key(|(scope, _)| scope.len())
            .map(|(_, registration)| Arc::clone(registration))
    }

    /// Open a page at `path`. It is controlled by the active worker of the
    /// matching registration, if there is one.
    pub async fn open_page(&self, path: &str) -> Result<(Arc<Page>, mpsc::UnboundedReceiver<PageEvent>)> {
        let url = self.origin.resolve(path)?;
        let controller = self
            .registration_for(url.path())
            .await
            .and_then(|r| r.active());

        let (page, events) = Page::new(url, controller);
        debug!(client = %page.id(), url = %page.url(), controlled = page.controller_id().is_some(), "Page opened");
        self.clients.add(Arc::clone(&page));
        Ok((page, events))
    }

    /// Close a page. A waiting worker activates once no page uses the old
    /// one.
    pub async fn close_page(&self, page: &Page) {
        if !self.clients.remove(page.id()) {
            return;
        }
        debug!(client = %page.id(), "Page closed");

        let registrations: Vec<_> = self.registrations.read().await.values().cloned().collect();
        for registration in registrations {
            if let Err(err) = registration.try_activate().await {
                warn!(scope = %registration.scope(), error = %err, "Activation failed");
            }
        }
    }

    /// Route a request from `page`: through its controlling worker, or
    /// straight to the network when uncontrolled.
    pub async fn fetch(&self, page: &Page, request: Request) -> Result<Response> {
        match page.controller() {
            Some(worker) => worker.fetch(request).await,
            None => {
                let url = request.url.clone();
                self.origin
                    .fetcher()
                    .fetch(&request)
                    .await
                    .map_err(|e| e.into_error(&url))
            }
        }
    }

    /// Fetch a subresource at `path` on behalf of `page`.
    pub async fn get(&self, page: &Page, path: &str) -> Result<Response> {
        let request = Request::get(self.origin.resolve(path)?);
        self.fetch(page, request).await
    }

    /// Navigate `page` to `path` (a document request).
    pub async fn navigate(&self, page: &Page, path: &str) -> Result<Response> {
        let request = Request::navigate(self.origin.resolve(path)?);
        self.fetch(page, request).await
    }
}

#[async_trait]
impl WorkerContainer for ServiceWorkerContainer {
    async fn register(&self, script_url: &str) -> Result<Arc<dyn WorkerRegistration>> {
        let registration: Arc<dyn WorkerRegistration> = self.register_script(script_url).await?;
        Ok(registration)
    }
}

/// Default scope: the directory containing the script.
fn scope_of(script_url: &str) -> String {
    match script_url.rsplit_once('/') {
        Some((dir, _)) => format!("{dir}/"),
        None => "/".to_string(),
    }
}
