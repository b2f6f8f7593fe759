//! Worker lifecycle as a pure transition function.
//!
//! The host drives the lifecycle; the worker only reacts. Side effects are
//! returned as [`Effect`]s and executed by the actor in `worker.rs`.

use pwacache_common::ActivationPolicy;

use crate::message::ControlMessage;
use crate::WorkerState;

/// Inputs to the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Host dispatched the install event.
    Install,
    /// Every manifest resource was stored.
    InstallSucceeded,
    /// Precaching failed; nothing was stored.
    InstallFailed,
    /// Host dispatched the activate event.
    Activate,
    /// Stale stores were deleted.
    ActivateSucceeded,
    /// A page posted a control message.
    Message(ControlMessage),
    /// A newer worker replaced this one.
    Replaced,
}

/// Work the actor must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Fetch and store the manifest.
    Precache,
    /// Ask the host to activate this worker without waiting.
    RequestSkipWaiting,
    /// Delete every store not belonging to this version.
    PurgeStaleCaches,
    /// Ask the host to make this worker the controller of open pages.
    ClaimClients,
    /// Report a state change to the host.
    Notify(WorkerState),
}

/// Lifecycle options fixed per worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub activation: ActivationPolicy,
    pub claim_clients: bool,
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: WorkerState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(state: WorkerState, mut effects: Vec<Effect>) -> Self {
        effects.insert(0, Effect::Notify(state));
        Self { state, effects }
    }

    fn stay(state: WorkerState, effects: Vec<Effect>) -> Self {
        Self { state, effects }
    }
}

/// Compute the next state and the effects to run.
///
/// Events that do not apply in `state` leave it unchanged without effects.
pub fn transition(state: WorkerState, event: LifecycleEvent, policy: &LifecyclePolicy) -> Transition {
    use LifecycleEvent as E;
    use WorkerState as S;

    match (state, event) {
        (S::Redundant, _) => Transition::stay(state, Vec::new()),
        (_, E::Replaced) => Transition::to(S::Redundant, Vec::new()),

        (S::Parsed, E::Install) => Transition::to(S::Installing, vec![Effect::Precache]),
        (S::Installing, E::InstallSucceeded) => {
            let effects = match policy.activation {
                ActivationPolicy::Immediate => vec![Effect::RequestSkipWaiting],
                ActivationPolicy::AwaitConfirmation => Vec::new(),
            };
            Transition::to(S::Installed, effects)
        }
        (S::Installing, E::InstallFailed) => Transition::to(S::Redundant, Vec::new()),

        // A request made while installing is honoured once the install job
        // ends, since the host's skip-waiting job queues behind it.
        (S::Installing | S::Installed, E::Message(ControlMessage::SkipWaiting)) => {
            Transition::stay(state, vec![Effect::RequestSkipWaiting])
        }

        (S::Installed, E::Activate) => {
            Transition::to(S::Activating, vec![Effect::PurgeStaleCaches])
        }
        (S::Activating, E::ActivateSucceeded) => {
            let effects = if policy.claim_clients {
                vec![Effect::ClaimClients]
            } else {
                Vec::new()
            };
            Transition::to(S::Activated, effects)
        }

        _ => Transition::stay(state, Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AWAIT: LifecyclePolicy = LifecyclePolicy {
        activation: ActivationPolicy::AwaitConfirmation,
        claim_clients: true,
    };

    const IMMEDIATE: LifecyclePolicy = LifecyclePolicy {
        activation: ActivationPolicy::Immediate,
        claim_clients: false,
    };

    #[test]
    fn test_install_precaches() {
        let t = transition(WorkerState::Parsed, LifecycleEvent::Install, &AWAIT);
        assert_eq!(t.state, WorkerState::Installing);
        assert_eq!(
            t.effects,
            vec![Effect::Notify(WorkerState::Installing), Effect::Precache]
        );
    }

    #[test]
    fn test_installed_waits_for_confirmation() {
        let t = transition(WorkerState::Installing, LifecycleEvent::InstallSucceeded, &AWAIT);
        assert_eq!(t.state, WorkerState::Installed);
        assert_eq!(t.effects, vec![Effect::Notify(WorkerState::Installed)]);
    }

    #[test]
    fn test_immediate_policy_requests_skip_waiting() {
        let t = transition(WorkerState::Installing, LifecycleEvent::InstallSucceeded, &IMMEDIATE);
        assert_eq!(
            t.effects,
            vec![Effect::Notify(WorkerState::Installed), Effect::RequestSkipWaiting]
        );
    }

    #[test]
    fn test_install_failure_is_terminal() {
        let t = transition(WorkerState::Installing, LifecycleEvent::InstallFailed, &AWAIT);
        assert_eq!(t.state, WorkerState::Redundant);

        let t = transition(t.state, LifecycleEvent::Install, &AWAIT);
        assert_eq!(t.state, WorkerState::Redundant);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_skip_waiting_message() {
        let msg = LifecycleEvent::Message(ControlMessage::SkipWaiting);

        let t = transition(WorkerState::Installed, msg, &AWAIT);
        assert_eq!(t.state, WorkerState::Installed);
        assert_eq!(t.effects, vec![Effect::RequestSkipWaiting]);

        let t = transition(WorkerState::Installing, msg, &AWAIT);
        assert_eq!(t.state, WorkerState::Installing);
        assert_eq!(t.effects, vec![Effect::RequestSkipWaiting]);

        let t = transition(WorkerState::Activated, msg, &AWAIT);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_activation_purges_before_claiming() {
        let t = transition(WorkerState::Installed, LifecycleEvent::Activate, &AWAIT);
        assert_eq!(t.state, WorkerState::Activating);
        assert_eq!(
            t.effects,
            vec![Effect::Notify(WorkerState::Activating), Effect::PurgeStaleCaches]
        );

        let t = transition(t.state, LifecycleEvent::ActivateSucceeded, &AWAIT);
        assert_eq!(t.state, WorkerState::Activated);
        assert_eq!(
            t.effects,
            vec![Effect::Notify(WorkerState::Activated), Effect::ClaimClients]
        );
    }

    #[test]
    fn test_activate_ignored_before_install() {
        let t = transition(WorkerState::Installing, LifecycleEvent::Activate, &AWAIT);
        assert_eq!(t.state, WorkerState::Installing);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_replaced() {
        let t = transition(WorkerState::Activated, LifecycleEvent::Replaced, &AWAIT);
        assert_eq!(t.state, WorkerState::Redundant);
        assert_eq!(t.effects, vec![Effect::Notify(WorkerState::Redundant)]);
    }
}
