//! The coordinator event loop.
//!
//! One task owns the [`CoordinatorState`]. Host page events, user actions,
//! the polling interval and timer tasks are all funnelled into it, so the
//! state machine never sees two events at once.

use pwacache_common::{CoordinatorConfig, Error, Result};
use pwacache_worker::{ControlMessage, WorkerId, WorkerState};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::host::{PageEvent, PageHost, WorkerContainer, WorkerRegistration};
use crate::machine::{transition, Action, CoordinatorState, Event, PromptState};

/// Handle to a running coordinator.
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Event>,
    prompt: watch::Receiver<PromptState>,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// The user clicked "Update Now".
    pub fn apply(&self) {
        self.send(Event::ApplyClicked);
    }

    /// The user clicked "Later".
    pub fn dismiss(&self) {
        self.send(Event::DismissClicked);
    }

    /// Run an update check now instead of waiting for the next poll.
    pub fn check_now(&self) {
        self.send(Event::PollTick);
    }

    pub fn prompt(&self) -> PromptState {
        *self.prompt.borrow()
    }

    /// Wait until the prompt reaches `state`.
    pub async fn wait_for_prompt(&mut self, state: PromptState) -> Result<()> {
        self.prompt
            .wait_for(|s| *s == state)
            .await
            .map(|_| ())
            .map_err(|_| Error::internal("coordinator stopped"))
    }

    /// Whether the loop has ended, which happens after the page reloads.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop.
    pub fn shutdown(self) {
        self.task.abort();
    }

    fn send(&self, event: Event) {
        if self.tx.send(event).is_err() {
            debug!(?event, "Coordinator already stopped");
        }
    }
}

/// Foreground half of the update protocol.
pub struct UpdateCoordinator {
    config: CoordinatorConfig,
    registration: Arc<dyn WorkerRegistration>,
    page: Arc<dyn PageHost>,
    state: CoordinatorState,
    /// Worker announced by the last `UpdateFound`.
    tracked: Option<WorkerId>,
    timer: Option<JoinHandle<()>>,
    fallback: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<Event>,
    prompt: watch::Sender<PromptState>,
}

impl UpdateCoordinator {
    /// Register the worker script and start the event loop.
    ///
    /// Fails only when registration itself fails.
    pub async fn start(
        container: Arc<dyn WorkerContainer>,
        page: Arc<dyn PageHost>,
        events: mpsc::UnboundedReceiver<PageEvent>,
        config: CoordinatorConfig,
    ) -> Result<CoordinatorHandle> {
        config.validate()?;

        // Taken before registering so a first install's claim is not
        // mistaken for an update.
        let controlled = page.has_controller();
        let registration = container.register(&config.script_url).await?;
        info!(script = %config.script_url, controlled, "Worker registered");

        let (tx, rx) = mpsc::unbounded_channel();
        let (prompt_tx, prompt_rx) = watch::channel(PromptState::None);

        let mut coordinator = Self {
            config,
            registration,
            page,
            state: CoordinatorState::new(controlled),
            tracked: None,
            timer: None,
            fallback: None,
            tx: tx.clone(),
            prompt: prompt_tx,
        };

        // Covers an update that finished installing before this page loaded.
        if let Some(worker) = coordinator.registration.waiting_worker().await {
            debug!(%worker, "Worker already waiting");
            coordinator.step(Event::WaitingOnRegistration).await;
        }

        let task = tokio::spawn(coordinator.run(rx, events));
        Ok(CoordinatorHandle {
            tx,
            prompt: prompt_rx,
            task,
        })
    }

    async fn run(
        mut self,
        mut inputs: mpsc::UnboundedReceiver<Event>,
        mut events: mpsc::UnboundedReceiver<PageEvent>,
    ) {
        let period = self.config.update_check_interval();
        let mut poll = tokio::time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.state.reloading {
            let event = tokio::select! {
                Some(event) = inputs.recv() => event,
                Some(page_event) = events.recv() => match self.translate(page_event).await {
                    Some(event) => event,
                    None => continue,
                },
                _ = poll.tick() => Event::PollTick,
            };
            self.step(event).await;
        }

        self.cancel_timers();
        debug!("Coordinator stopped");
    }

    /// Map a host event to a state machine event.
    async fn translate(&mut self, event: PageEvent) -> Option<Event> {
        match event {
            PageEvent::UpdateFound { worker } => {
                debug!(%worker, "Update found");
                self.tracked = Some(worker);
                None
            }
            PageEvent::StateChange { worker, state } if self.tracked == Some(worker) => {
                debug!(%worker, state = state.as_str(), "Tracked worker changed state");
                match state {
                    WorkerState::Installed => {
                        // An uncontrolled page, or a worker that already moved
                        // on to activation, is a first install.
                        let waiting = self.registration.waiting_worker().await == Some(worker);
                        Some(Event::WorkerInstalled {
                            controlled: waiting && self.page.has_controller(),
                        })
                    }
                    WorkerState::Redundant => {
                        self.tracked = None;
                        None
                    }
                    _ => None,
                }
            }
            PageEvent::StateChange { .. } => None,
            PageEvent::ControllerChange => Some(Event::ControllerChange),
            PageEvent::VisibilityChange { visible } => Some(Event::VisibilityChanged { visible }),
        }
    }

    async fn step(&mut self, event: Event) {
        let (state, actions) = transition(self.state, event, &self.config.prompt);
        self.state = state;

        for action in actions {
            self.execute(action).await;
        }
        self.prompt.send_replace(state.prompt);
    }

    async fn execute(&mut self, action: Action) {
        match action {
            Action::ShowPrompt => {
                info!("Update available");
                self.page.set_prompt_visible(true);
            }
            Action::HidePrompt => self.page.set_prompt_visible(false),
            Action::ArmTimer { generation, after } => {
                let tx = self.tx.clone();
                self.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = tx.send(Event::TimerElapsed { generation });
                }));
            }
            Action::CancelTimer => {
                if let Some(timer) = self.timer.take() {
                    timer.abort();
                }
            }
            Action::SendSkipWaiting => self.send_skip_waiting().await,
            Action::ScheduleReload => {
                let tx = self.tx.clone();
                let grace = self.config.fallback_reload_delay();
                self.fallback = Some(tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    let _ = tx.send(Event::FallbackElapsed);
                }));
            }
            Action::Reload => {
                info!("Reloading page");
                self.page.reload();
            }
            Action::CheckForUpdates => {
                let registration = Arc::clone(&self.registration);
                tokio::spawn(async move {
                    if let Err(err) = registration.update().await {
                        let err = Error::UpdateCheckFailed(err.to_string());
                        warn!(error = %err, "Update check failed");
                    }
                });
            }
        }
    }

    async fn send_skip_waiting(&mut self) {
        let Some(worker) = self.registration.waiting_worker().await else {
            warn!(error = %Error::ApplyRace, "Falling back to a plain reload");
            self.feed(Event::ApplyRace);
            return;
        };

        info!(%worker, "Sending SKIP_WAITING");
        let message = ControlMessage::SkipWaiting.to_json();
        if let Err(err) = self.registration.post_message(worker, message).await {
            warn!(%worker, error = %err, "Could not deliver SKIP_WAITING");
            self.feed(Event::ApplyRace);
        }
    }

    fn feed(&self, event: Event) {
        // The loop owns the receiver, so this cannot fail while it runs.
        let _ = self.tx.send(event);
    }

    fn cancel_timers(&mut self) {
        for task in [self.timer.take(), self.fallback.take()].into_iter().flatten() {
            task.abort();
        }
    }
}
