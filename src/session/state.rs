//! Lifecycle of one extraction attempt.
//!
//! [`SessionState`] is a plain value; every change goes through
//! [`SessionState::apply`] so the legal transitions live in one table:
//!
//! ```text
//! Idle ──Start──▶ Extracting ──PasswordRequired──▶ AwaitingPassword
//!                  │   ▲                              │   │   │
//!                  │   └──────PasswordSubmitted───────┘   │   │
//!                  ├──Complete──▶ Completed               │   │
//!                  ├──Cancel────▶ Cancelled ◀──Cancel─────┘   │
//!                  └──Fail(k)───▶ Failed(k) ◀──Fail(k)────────┘
//! ```
//!
//! `Start` is accepted from every state: starting a new session replaces the
//! old one outright.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::model::PathTree;
use crate::traits::{ArchiveHandle, ErrorKind};

/// Identity of one `start_session` call. Strictly increasing per controller.
pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Extracting,
    AwaitingPassword,
    Cancelled,
    Completed,
    Failed(ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    PasswordRequired,
    PasswordSubmitted,
    Cancel,
    Complete,
    Fail(ErrorKind),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal transition {transition:?} from {from:?}")]
pub struct TransitionError {
    pub from: SessionState,
    pub transition: Transition,
}

impl SessionState {
    /// `Completed`, `Cancelled` and `Failed` accept nothing but a new start.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed(_)
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Extracting | SessionState::AwaitingPassword
        )
    }

    pub fn apply(&self, transition: Transition) -> Result<SessionState, TransitionError> {
        use SessionState::*;

        let next = match (*self, transition) {
            (_, Transition::Start) => Extracting,
            (Extracting, Transition::PasswordRequired) => AwaitingPassword,
            (AwaitingPassword, Transition::PasswordSubmitted) => Extracting,
            (Extracting | AwaitingPassword, Transition::Cancel) => Cancelled,
            (Extracting, Transition::Complete) => Completed,
            (Extracting | AwaitingPassword, Transition::Fail(kind)) => Failed(kind),
            (from, transition) => return Err(TransitionError { from, transition }),
        };
        Ok(next)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Extracting => f.write_str("extracting"),
            SessionState::AwaitingPassword => f.write_str("awaiting password"),
            SessionState::Cancelled => f.write_str("cancelled"),
            SessionState::Completed => f.write_str("completed"),
            SessionState::Failed(kind) => write!(f, "failed ({})", kind),
        }
    }
}

/// Everything owned by the current extraction attempt.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub archive: Option<ArchiveHandle>,
    pub(crate) state: SessionState,
    pub(crate) tree: PathTree,
}

impl Session {
    pub(crate) fn new(id: SessionId, archive: Option<ArchiveHandle>) -> Self {
        Self {
            id,
            archive,
            state: SessionState::Idle,
            tree: PathTree::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn tree(&self) -> &PathTree {
        &self.tree
    }

    /// Applies `transition`, returning the state that was left.
    pub(crate) fn transition(
        &mut self,
        transition: Transition,
    ) -> Result<SessionState, TransitionError> {
        let from = self.state;
        self.state = from.apply(transition)?;
        debug!(session = self.id, %from, to = %self.state, "Session transition");
        Ok(from)
    }
}
