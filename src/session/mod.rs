//! Session module - controller for one interactive extraction at a time.
//!
//! - **State**: [`SessionState`] machine and the per-attempt [`Session`]
//! - **Challenges**: single-flight password prompts via [`ChallengeCoordinator`]
//! - **Routing**: [`EventRouter`] applies engine events to the current session
//!   and drops everything from superseded ones
//! - **Controller**: [`SessionController`] serializes engine events and user
//!   actions into one loop

pub mod challenge;
pub mod controller;
pub mod router;
pub mod state;

// Re-export commonly used types
pub use challenge::{ChallengeCoordinator, ChallengeRequest, ChallengeStatus};
pub use controller::{
    Activity, ControllerError, ControllerHandle, PasswordCallback, SessionController,
};
pub use router::{Envelope, EventRouter, Routed, RouterStats};
pub use state::{Session, SessionId, SessionState, Transition, TransitionError};
