//! # pwacache Coordinator
//!
//! Foreground half of the update protocol. Detects that a new worker version
//! is waiting, shows exactly one prompt, sends `SKIP_WAITING` on confirmation
//! and reloads the page exactly once when control passes to the new worker.
//!
//! ## Architecture
//!
//! ```text
//! PageEvent ──┐
//! CoordinatorHandle (apply/dismiss) ──┼──→ UpdateCoordinator loop ──→ machine::transition
//! poll interval / timers ──┘                    │
//!                                               ├──→ PageHost (prompt, reload)
//!                                               └──→ WorkerRegistration (update, SKIP_WAITING)
//! ```

pub mod coordinator;
pub mod host;
pub mod machine;

pub use coordinator::{CoordinatorHandle, UpdateCoordinator};
pub use host::{PageEvent, PageHost, WorkerContainer, WorkerRegistration};
pub use machine::{Action, CoordinatorState, Event, PromptState};
