//! Update prompt and reload protocol as a pure transition function.

use pwacache_common::PromptPolicy;
use std::time::Duration;

/// Visibility of the update prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptState {
    #[default]
    None,
    Shown,
    Dismissed,
    /// Skip-waiting was sent; the prompt is gone until the page reloads.
    Applying,
}

/// Everything the coordinator remembers between events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CoordinatorState {
    pub prompt: PromptState,
    /// A worker controlled the page when it last checked.
    pub controlled: bool,
    /// Reload latch. Once set, no further reload is ever issued.
    pub reloading: bool,
    /// Generation of the most recently armed prompt timer.
    pub timer_generation: u64,
    pub timer_armed: bool,
}

impl CoordinatorState {
    pub fn new(controlled: bool) -> Self {
        Self {
            controlled,
            ..Default::default()
        }
    }
}

/// Inputs to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A tracked worker finished installing. `controlled` is false for the
    /// first install of an uncontrolled page.
    WorkerInstalled { controlled: bool },
    /// Registration found a worker already waiting.
    WaitingOnRegistration,
    ApplyClicked,
    DismissClicked,
    TimerElapsed { generation: u64 },
    /// Skip-waiting found no waiting worker.
    ApplyRace,
    ControllerChange,
    FallbackElapsed,
    PollTick,
    VisibilityChanged { visible: bool },
}

/// Side effects for the adapter to run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ShowPrompt,
    HidePrompt,
    ArmTimer { generation: u64, after: Duration },
    CancelTimer,
    SendSkipWaiting,
    /// Reload after the fallback grace delay.
    ScheduleReload,
    Reload,
    CheckForUpdates,
}

/// Compute the next state and the actions to run.
pub fn transition(
    mut state: CoordinatorState,
    event: Event,
    policy: &PromptPolicy,
) -> (CoordinatorState, Vec<Action>) {
    let mut actions = Vec::new();

    match event {
        Event::WorkerInstalled { controlled: false } => {}
        Event::WorkerInstalled { controlled: true } | Event::WaitingOnRegistration => {
            show(&mut state, &mut actions, policy);
        }

        Event::ApplyClicked if state.prompt == PromptState::Shown => {
            cancel_timer(&mut state, &mut actions);
            apply(&mut state, &mut actions);
        }
        Event::DismissClicked if state.prompt == PromptState::Shown => {
            cancel_timer(&mut state, &mut actions);
            dismiss(&mut state, &mut actions);
        }

        Event::TimerElapsed { generation }
            if state.timer_armed
                && generation == state.timer_generation
                && state.prompt == PromptState::Shown =>
        {
            state.timer_armed = false;
            match policy {
                PromptPolicy::AutoApply { .. } => apply(&mut state, &mut actions),
                PromptPolicy::AutoDismiss { .. } => dismiss(&mut state, &mut actions),
                PromptPolicy::Never => {}
            }
        }

        Event::ApplyRace if state.prompt == PromptState::Applying && !state.reloading => {
            actions.push(Action::ScheduleReload);
        }
        Event::FallbackElapsed => reload_once(&mut state, &mut actions),

        Event::ControllerChange => {
            if state.controlled || state.prompt == PromptState::Applying {
                cancel_timer(&mut state, &mut actions);
                if state.prompt == PromptState::Shown {
                    actions.push(Action::HidePrompt);
                }
                reload_once(&mut state, &mut actions);
            } else {
                state.controlled = true;
            }
        }

        Event::PollTick | Event::VisibilityChanged { visible: true } if !state.reloading => {
            actions.push(Action::CheckForUpdates);
        }

        _ => {}
    }

    (state, actions)
}

fn show(state: &mut CoordinatorState, actions: &mut Vec<Action>, policy: &PromptPolicy) {
    if state.reloading || matches!(state.prompt, PromptState::Shown | PromptState::Applying) {
        return;
    }
    state.prompt = PromptState::Shown;
    actions.push(Action::ShowPrompt);

    if let Some(after) = policy.timer() {
        state.timer_generation += 1;
        state.timer_armed = true;
        actions.push(Action::ArmTimer {
            generation: state.timer_generation,
            after,
        });
    }
}

fn cancel_timer(state: &mut CoordinatorState, actions: &mut Vec<Action>) {
    if state.timer_armed {
        state.timer_armed = false;
        actions.push(Action::CancelTimer);
    }
}

fn apply(state: &mut CoordinatorState, actions: &mut Vec<Action>) {
    state.prompt = PromptState::Applying;
    actions.push(Action::HidePrompt);
    actions.push(Action::SendSkipWaiting);
}

fn dismiss(state: &mut CoordinatorState, actions: &mut Vec<Action>) {
    state.prompt = PromptState::Dismissed;
    actions.push(Action::HidePrompt);
}

fn reload_once(state: &mut CoordinatorState, actions: &mut Vec<Action>) {
    if !state.reloading {
        state.reloading = true;
        actions.push(Action::Reload);
    }
}
