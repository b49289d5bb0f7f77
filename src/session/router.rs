//! Demultiplexes engine events onto the current session.

use tracing::{debug, info, warn};

use super::challenge::{ChallengeCoordinator, ChallengeRequest};
use super::state::{Session, SessionId, SessionState, Transition};
use crate::traits::{EngineEvent, ErrorKind};

/// An engine event tagged with the session whose subscription produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub session: SessionId,
    pub event: EngineEvent,
}

/// What routing one envelope did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Inserted,
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    ChallengeRaised(ChallengeRequest),
    /// Envelope belongs to a superseded session
    DroppedStale,
    /// Session already finished (or never started)
    DroppedTerminal,
    /// Event not acceptable in the current state; logged and ignored
    Violation,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    pub applied: u64,
    pub stale: u64,
    pub after_terminal: u64,
    pub violations: u64,
}

#[derive(Debug, Default)]
pub struct EventRouter {
    current: Option<SessionId>,
    stats: RouterStats,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `session` the only one whose events are applied.
    pub fn bind(&mut self, session: SessionId) {
        self.current = Some(session);
    }

    pub fn current(&self) -> Option<SessionId> {
        self.current
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    pub fn route(
        &mut self,
        envelope: Envelope,
        session: &mut Session,
        challenges: &mut ChallengeCoordinator,
    ) -> Routed {
        let routed = self.dispatch(envelope, session, challenges);
        self.record(&routed);
        routed
    }

    /// The subscription of `id` ended. If that leaves the current session
    /// active with nothing left to drive it, the session fails.
    pub fn route_closed(
        &mut self,
        id: SessionId,
        session: &mut Session,
        challenges: &mut ChallengeCoordinator,
    ) -> Routed {
        let routed = if !self.is_current(id, session) {
            Routed::DroppedStale
        } else if !session.state.is_active() {
            Routed::DroppedTerminal
        } else {
            warn!(session = id, state = %session.state, "Event stream ended before completion");
            self.fail(session, challenges, ErrorKind::EngineIO)
        };
        self.record(&routed);
        routed
    }

    fn record(&mut self, routed: &Routed) {
        match routed {
            Routed::DroppedStale => self.stats.stale += 1,
            Routed::DroppedTerminal => self.stats.after_terminal += 1,
            Routed::Violation => self.stats.violations += 1,
            _ => self.stats.applied += 1,
        }
    }

    fn is_current(&self, id: SessionId, session: &Session) -> bool {
        self.current == Some(id) && session.id == id
    }

    fn dispatch(
        &mut self,
        envelope: Envelope,
        session: &mut Session,
        challenges: &mut ChallengeCoordinator,
    ) -> Routed {
        if !self.is_current(envelope.session, session) {
            debug!(
                event_session = envelope.session,
                current = ?self.current,
                "Dropping event from superseded session"
            );
            return Routed::DroppedStale;
        }
        if !session.state.is_active() {
            debug!(session = session.id, state = %session.state, "Dropping event after session end");
            return Routed::DroppedTerminal;
        }

        match envelope.event {
            EngineEvent::PathDiscovered { path, meta } => {
                session.tree.insert(&path, meta);
                Routed::Inserted
            }
            EngineEvent::PasswordRequired
            | EngineEvent::Error {
                kind: ErrorKind::IncorrectPassword,
            } => match challenges.raise(session) {
                Ok(request) => Routed::ChallengeRaised(request),
                Err(e) => {
                    warn!(session = session.id, error = %e, "Ignoring duplicate password request");
                    Routed::Violation
                }
            },
            EngineEvent::Completed => match session.transition(Transition::Complete) {
                Ok(from) => {
                    info!(
                        session = session.id,
                        entries = session.tree.node_count(),
                        "Extraction completed"
                    );
                    Routed::StateChanged {
                        from,
                        to: session.state,
                    }
                }
                Err(e) => {
                    warn!(session = session.id, error = %e, "Ignoring completion");
                    Routed::Violation
                }
            },
            EngineEvent::Error { kind } => self.fail(session, challenges, kind),
        }
    }

    fn fail(
        &mut self,
        session: &mut Session,
        challenges: &mut ChallengeCoordinator,
        kind: ErrorKind,
    ) -> Routed {
        challenges.discard();
        match session.transition(Transition::Fail(kind)) {
            Ok(from) => {
                warn!(session = session.id, %kind, "Extraction failed");
                Routed::StateChanged {
                    from,
                    to: session.state,
                }
            }
            Err(e) => {
                warn!(session = session.id, error = %e, "Ignoring failure");
                Routed::Violation
            }
        }
    }
}
