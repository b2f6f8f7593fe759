//! The cache worker actor.
//!
//! Lifecycle commands are handled one at a time by a single task. Fetch
//! commands leave the mailbox in order but each runs on its own task, so
//! responses to independent requests may complete in any order.

use pwacache_common::{CacheConfig, Error, Result};
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::fetch::Fetcher;
use crate::machine::{transition, Effect, LifecycleEvent, LifecyclePolicy};
use crate::manifest::ResourceManifest;
use crate::message::ControlMessage;
use crate::policy::{FetchPolicy, Route};
use crate::request::{Request, Response};
use crate::store::{CacheEntry, CacheStore, SharedStorage};
use crate::version::{CacheName, CacheVersion};
use crate::{WorkerId, WorkerState};

/// Signals a worker sends to its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerSignal {
    /// The worker entered a new lifecycle state.
    StateChanged { worker: WorkerId, state: WorkerState },
    /// The worker asked to be activated without waiting.
    SkipWaitingRequested { worker: WorkerId },
    /// The worker asked to control every open page.
    ClaimRequested { worker: WorkerId },
}

enum Command {
    Install { reply: oneshot::Sender<Result<()>> },
    Activate { reply: oneshot::Sender<Result<()>> },
    Message { data: JsonValue, reply: oneshot::Sender<()> },
    Replaced { reply: oneshot::Sender<()> },
    Fetch { request: Request, reply: oneshot::Sender<Result<Response>> },
}

/// Cloneable handle to a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    id: WorkerId,
    cache_name: CacheName,
    tx: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<WorkerState>,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("cache_name", &self.cache_name.to_string())
            .field("state", &self.state())
            .finish()
    }
}

impl WorkerHandle {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn cache_name(&self) -> &CacheName {
        &self.cache_name
    }

    pub fn version(&self) -> CacheVersion {
        self.cache_name.version
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Run the install event: precache the manifest.
    pub async fn install(&self) -> Result<()> {
        self.call(|reply| Command::Install { reply }).await?
    }

    /// Run the activate event: purge stale stores.
    pub async fn activate(&self) -> Result<()> {
        self.call(|reply| Command::Activate { reply }).await?
    }

    /// Deliver a message posted by a page.
    pub async fn post_message(&self, data: JsonValue) -> Result<()> {
        self.call(|reply| Command::Message { data, reply }).await
    }

    /// Tell the worker a newer worker replaced it.
    pub async fn mark_replaced(&self) -> Result<()> {
        self.call(|reply| Command::Replaced { reply }).await
    }

    /// Answer an intercepted request.
    pub async fn fetch(&self, request: Request) -> Result<Response> {
        self.call(|reply| Command::Fetch { request, reply }).await?
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| Error::internal(format!("worker {} mailbox closed", self.id)))?;
        rx.await
            .map_err(|_| Error::internal(format!("worker {} dropped a reply", self.id)))
    }
}

/// Answers intercepted requests for one version.
struct Responder {
    cache_name: String,
    policy: FetchPolicy,
    fetcher: Arc<dyn Fetcher>,
    storage: SharedStorage,
}

impl Responder {
    async fn respond(&self, request: Request) -> Result<Response> {
        let route = self.policy.route(&request);
        debug!(url = %request.url, ?route, "Handling fetch");

        match route {
            Route::Passthrough | Route::NetworkOnly => self.network(&request).await,
            Route::NetworkFirst => self.network_first(&request).await,
            Route::CacheFirst => self.cache_first(&request).await,
        }
    }

    async fn network(&self, request: &Request) -> Result<Response> {
        self.fetcher
            .fetch(request)
            .await
            .map_err(|e| e.into_error(&request.url))
    }

    async fn network_first(&self, request: &Request) -> Result<Response> {
        match self.network(request).await {
            Ok(response) => {
                self.store(request, &response).await;
                Ok(response)
            }
            Err(err) => match self.lookup(request).await {
                Some(cached) => {
                    debug!(url = %request.url, error = %err, "Network failed, serving stored document");
                    Ok(cached)
                }
                None => {
                    warn!(url = %request.url, error = %err, "Network failed with nothing stored");
                    Err(err)
                }
            },
        }
    }

    async fn cache_first(&self, request: &Request) -> Result<Response> {
        if let Some(cached) = self.lookup(request).await {
            return Ok(cached);
        }
        let response = self.network(request).await?;
        self.store(request, &response).await;
        Ok(response)
    }

    async fn lookup(&self, request: &Request) -> Option<Response> {
        let storage = self.storage.read().await;
        storage
            .get(&self.cache_name)?
            .match_key(&request.cache_key())
            .map(|entry| Response::from_entry(request.url.clone(), entry))
    }

    /// Store a copy when cacheable. The store must already exist: a stale
    /// worker never recreates a store that activation deleted.
    async fn store(&self, request: &Request, response: &Response) {
        if !response.is_cacheable() {
            return;
        }
        let mut storage = self.storage.write().await;
        if let Some(store) = storage.get_mut(&self.cache_name) {
            store.put(&request.cache_key(), CacheEntry::from_response(response));
        }
    }
}

/// The worker actor state.
pub struct CacheWorker {
    id: WorkerId,
    cache_name: CacheName,
    origin: Url,
    manifest: ResourceManifest,
    lifecycle: LifecyclePolicy,
    state: WorkerState,
    state_tx: watch::Sender<WorkerState>,
    responder: Arc<Responder>,
    signals: mpsc::UnboundedSender<WorkerSignal>,
}

impl CacheWorker {
    /// Validate `config` and start a worker for it on the current runtime.
    pub fn spawn(
        config: &CacheConfig,
        origin: Url,
        fetcher: Arc<dyn Fetcher>,
        storage: SharedStorage,
        signals: mpsc::UnboundedSender<WorkerSignal>,
    ) -> Result<WorkerHandle> {
        config.validate()?;

        let id = WorkerId::new();
        let cache_name = CacheName::new(config.prefix.clone(), CacheVersion(config.version));
        let manifest = ResourceManifest::new(config.manifest.iter().cloned())?;
        let (state_tx, state_rx) = watch::channel(WorkerState::Parsed);
        let (tx, rx) = mpsc::unbounded_channel();

        let responder = Arc::new(Responder {
            cache_name: cache_name.to_string(),
            policy: FetchPolicy::new(&origin, config.no_cache.iter().cloned()),
            fetcher,
            storage,
        });

        let worker = Self {
            id,
            cache_name: cache_name.clone(),
            origin,
            manifest,
            lifecycle: LifecyclePolicy {
                activation: config.activation,
                claim_clients: config.claim_clients,
            },
            state: WorkerState::Parsed,
            state_tx,
            responder,
            signals,
        };

        info!(worker = %id, cache = %cache_name, resources = worker.manifest.len(), "Worker started");
        tokio::spawn(worker.run(rx));

        Ok(WorkerHandle {
            id,
            cache_name,
            tx,
            state: state_rx,
        })
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Fetch { request, reply } => {
                    let responder = Arc::clone(&self.responder);
                    tokio::spawn(async move {
                        let _ = reply.send(responder.respond(request).await);
                    });
                }
                Command::Install { reply } => {
                    let result = self.install().await;
                    let _ = reply.send(result);
                }
                Command::Activate { reply } => {
                    let result = self.activate().await;
                    let _ = reply.send(result);
                }
                Command::Message { data, reply } => {
                    match ControlMessage::from_json(&data) {
                        Some(message) => {
                            let _ = self.dispatch(LifecycleEvent::Message(message)).await;
                        }
                        None => debug!(worker = %self.id, %data, "Ignoring unknown message"),
                    }
                    let _ = reply.send(());
                }
                Command::Replaced { reply } => {
                    let _ = self.dispatch(LifecycleEvent::Replaced).await;
                    let _ = reply.send(());
                }
            }
        }
        debug!(worker = %self.id, "Worker mailbox closed");
    }

    async fn install(&mut self) -> Result<()> {
        if self.state != WorkerState::Parsed {
            return Err(Error::InvalidArgument(format!(
                "cannot install worker {} in state {:?}",
                self.id, self.state
            )));
        }
        self.dispatch(LifecycleEvent::Install).await
    }

    async fn activate(&mut self) -> Result<()> {
        if self.state != WorkerState::Installed {
            return Err(Error::InvalidArgument(format!(
                "cannot activate worker {} in state {:?}",
                self.id, self.state
            )));
        }
        self.dispatch(LifecycleEvent::Activate).await
    }

    /// Feed an event through the state machine and run the effects, including
    /// the follow-up events the effects produce.
    async fn dispatch(&mut self, event: LifecycleEvent) -> Result<()> {
        let mut pending = VecDeque::from([event]);
        let mut outcome = Ok(());

        while let Some(event) = pending.pop_front() {
            let step = transition(self.state, event, &self.lifecycle);
            self.state = step.state;

            for effect in step.effects {
                match effect {
                    Effect::Notify(state) => {
                        self.state_tx.send_replace(state);
                        self.signal(WorkerSignal::StateChanged {
                            worker: self.id,
                            state,
                        });
                    }
                    Effect::Precache => match self.precache().await {
                        Ok(()) => pending.push_back(LifecycleEvent::InstallSucceeded),
                        Err(err) => {
                            error!(worker = %self.id, cache = %self.cache_name, error = %err, "Install failed");
                            pending.push_back(LifecycleEvent::InstallFailed);
                            outcome = Err(err);
                        }
                    },
                    Effect::PurgeStaleCaches => {
                        self.purge_stale_caches().await;
                        pending.push_back(LifecycleEvent::ActivateSucceeded);
                    }
                    Effect::RequestSkipWaiting => {
                        self.signal(WorkerSignal::SkipWaitingRequested { worker: self.id });
                    }
                    Effect::ClaimClients => {
                        self.signal(WorkerSignal::ClaimRequested { worker: self.id });
                    }
                }
            }
        }

        outcome
    }

    /// Fetch every manifest entry and commit them as one store. Nothing is
    /// written unless every fetch succeeds.
    async fn precache(&self) -> Result<()> {
        let cache = self.cache_name.to_string();
        let urls = self.manifest.resolve(&self.origin)?;
        info!(worker = %self.id, cache = %cache, count = urls.len(), "Caching manifest");

        let fetches = urls.into_iter().map(|url| {
            let fetcher = Arc::clone(&self.responder.fetcher);
            let cache = cache.clone();
            async move {
                let request = Request::get(url);
                let response = fetcher
                    .fetch(&request)
                    .await
                    .map_err(|e| Error::install_failed(&cache, request.url.path(), e.to_string()))?;
                if !response.ok() {
                    return Err(Error::install_failed(
                        &cache,
                        request.url.path(),
                        format!("status {}", response.status),
                    ));
                }
                Ok((request.cache_key(), CacheEntry::from_response(&response)))
            }
        });
        let entries = futures::future::try_join_all(fetches).await?;

        let mut store = CacheStore::new(&cache);
        for (key, entry) in entries {
            store.put(&key, entry);
        }
        self.responder.storage.write().await.commit(store);

        info!(worker = %self.id, cache = %cache, "All manifest resources cached");
        Ok(())
    }

    async fn purge_stale_caches(&self) {
        let keep = self.cache_name.to_string();
        let deleted = self.responder.storage.write().await.retain_only(&keep);
        for name in &deleted {
            info!(worker = %self.id, cache = %name, "Deleted stale cache");
        }
    }

    fn signal(&self, signal: WorkerSignal) {
        if self.signals.send(signal).is_err() {
            debug!(worker = %self.id, "Host stopped listening for worker signals");
        }
    }
}
