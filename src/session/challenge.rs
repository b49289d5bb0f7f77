//! Password challenge bookkeeping.
//!
//! At most one [`ChallengeRequest`] is outstanding per session. The
//! coordinator keeps the request in step with [`SessionState::AwaitingPassword`]:
//! a request is pending exactly while the session awaits a password.

use tokio::time::Instant;
use tracing::{info, warn};

use super::controller::ControllerError;
use super::state::{Session, SessionId, SessionState, Transition};
use crate::traits::{ErrorKind, ExtractionEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeStatus {
    Pending,
    Resolved,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRequest {
    /// Session that raised the challenge
    pub session: SessionId,

    /// 1 for the first prompt of a session, incremented on every reissue
    pub attempt: u32,

    pub status: ChallengeStatus,

    pub issued_at: Instant,
}

#[derive(Debug, Default)]
pub struct ChallengeCoordinator {
    pending: Option<ChallengeRequest>,
    attempts: u32,
}

impl ChallengeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<&ChallengeRequest> {
        self.pending.as_ref()
    }

    /// Number of challenges raised for the current session.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Forgets everything; called when a new session starts.
    pub(crate) fn reset(&mut self) {
        self.pending = None;
        self.attempts = 0;
    }

    /// Opens a challenge and moves the session to `AwaitingPassword`.
    ///
    /// A second request while one is pending is refused, never stacked.
    pub(crate) fn raise(
        &mut self,
        session: &mut Session,
    ) -> Result<ChallengeRequest, ControllerError> {
        if self.pending.is_some() {
            return Err(ControllerError::ProtocolViolation {
                state: session.state,
                action: "password request",
            });
        }
        session.transition(Transition::PasswordRequired)?;

        self.attempts += 1;
        let request = ChallengeRequest {
            session: session.id,
            attempt: self.attempts,
            status: ChallengeStatus::Pending,
            issued_at: Instant::now(),
        };
        info!(session = session.id, attempt = request.attempt, "Password required");
        self.pending = Some(request.clone());
        Ok(request)
    }

    /// Drops the pending request without engine involvement (session failed).
    pub(crate) fn discard(&mut self) -> Option<ChallengeRequest> {
        self.pending.take().map(|mut request| {
            request.status = ChallengeStatus::Cancelled;
            request
        })
    }

    /// Forwards `password` to the engine and resumes extraction.
    ///
    /// # Errors
    ///
    /// - [`ControllerError::ProtocolViolation`] outside `AwaitingPassword`
    /// - [`ControllerError::EmptyPassword`] for an empty password; the
    ///   challenge stays open
    /// - [`ControllerError::Engine`] if the engine refuses the password; the
    ///   session fails with [`ErrorKind::EngineIO`]
    pub async fn submit<E>(
        &mut self,
        session: &mut Session,
        engine: &E,
        password: &str,
    ) -> Result<ChallengeRequest, ControllerError>
    where
        E: ExtractionEngine + ?Sized,
    {
        self.ensure_pending(session, "password submission")?;
        if password.is_empty() {
            return Err(ControllerError::EmptyPassword);
        }

        if let Err(e) = engine.submit_password(password.to_string()).await {
            warn!(session = session.id, error = %e, "Engine rejected password submission");
            self.discard();
            session.transition(Transition::Fail(ErrorKind::EngineIO))?;
            return Err(e.into());
        }

        session.transition(Transition::PasswordSubmitted)?;
        let mut request = self
            .pending
            .take()
            .ok_or(ControllerError::ProtocolViolation {
                state: session.state,
                action: "password submission",
            })?;
        request.status = ChallengeStatus::Resolved;
        Ok(request)
    }

    /// Cancels the session from `AwaitingPassword` and tells the engine to
    /// abort. The session is `Cancelled` even if the engine call fails.
    pub async fn cancel<E>(
        &mut self,
        session: &mut Session,
        engine: &E,
    ) -> Result<ChallengeRequest, ControllerError>
    where
        E: ExtractionEngine + ?Sized,
    {
        self.ensure_pending(session, "challenge cancellation")?;

        session.transition(Transition::Cancel)?;
        let request = self.discard().ok_or(ControllerError::ProtocolViolation {
            state: session.state,
            action: "challenge cancellation",
        })?;
        info!(session = session.id, attempt = request.attempt, "Password challenge cancelled");

        if let Err(e) = engine.cancel().await {
            warn!(session = session.id, error = %e, "Engine cancel failed");
        }
        Ok(request)
    }

    fn ensure_pending(
        &self,
        session: &Session,
        action: &'static str,
    ) -> Result<(), ControllerError> {
        if session.state != SessionState::AwaitingPassword || self.pending.is_none() {
            warn!(session = session.id, state = %session.state, action, "Ignoring out-of-state action");
            return Err(ControllerError::ProtocolViolation {
                state: session.state,
                action,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{ArchiveHandle, EngineError, Subscription};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEngine {
        passwords: Mutex<Vec<String>>,
        cancels: Mutex<usize>,
        refuse: bool,
    }

    #[async_trait]
    impl ExtractionEngine for RecordingEngine {
        fn engine_id(&self) -> &str {
            "recording"
        }

        async fn start_extraction(
            &self,
            _archive: &ArchiveHandle,
        ) -> Result<Subscription, EngineError> {
            Ok(Subscription::channel(1).1)
        }

        async fn submit_password(&self, password: String) -> Result<(), EngineError> {
            if self.refuse {
                return Err(EngineError::NoActiveJob);
            }
            self.passwords.lock().unwrap().push(password);
            Ok(())
        }

        async fn cancel(&self) -> Result<(), EngineError> {
            *self.cancels.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn extracting_session() -> Session {
        let mut session = Session::new(1, None);
        session.transition(Transition::Start).unwrap();
        session
    }

    #[test]
    fn test_raise_is_single_flight() {
        let mut session = extracting_session();
        let mut challenges = ChallengeCoordinator::new();

        let first = challenges.raise(&mut session).unwrap();
        assert_eq!(first.attempt, 1);
        assert_eq!(first.status, ChallengeStatus::Pending);
        assert_eq!(session.state(), SessionState::AwaitingPassword);

        let second = challenges.raise(&mut session);
        assert!(matches!(
            second,
            Err(ControllerError::ProtocolViolation { .. })
        ));
        assert_eq!(challenges.pending(), Some(&first));
        assert_eq!(challenges.attempts(), 1);
    }

    #[tokio::test]
    async fn test_submit_resumes_extraction() {
        let engine = RecordingEngine::default();
        let mut session = extracting_session();
        let mut challenges = ChallengeCoordinator::new();
        challenges.raise(&mut session).unwrap();

        let resolved = challenges.submit(&mut session, &engine, "pw").await.unwrap();
        assert_eq!(resolved.status, ChallengeStatus::Resolved);
        assert_eq!(session.state(), SessionState::Extracting);
        assert!(challenges.pending().is_none());
        assert_eq!(*engine.passwords.lock().unwrap(), vec!["pw".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_password_keeps_challenge_open() {
        let engine = RecordingEngine::default();
        let mut session = extracting_session();
        let mut challenges = ChallengeCoordinator::new();
        challenges.raise(&mut session).unwrap();

        let result = challenges.submit(&mut session, &engine, "").await;
        assert!(matches!(result, Err(ControllerError::EmptyPassword)));
        assert_eq!(session.state(), SessionState::AwaitingPassword);
        assert!(challenges.pending().is_some());
        assert!(engine.passwords.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_outside_challenge_is_rejected() {
        let engine = RecordingEngine::default();
        let mut session = extracting_session();
        let mut challenges = ChallengeCoordinator::new();

        let result = challenges.submit(&mut session, &engine, "pw").await;
        assert!(matches!(
            result,
            Err(ControllerError::ProtocolViolation { .. })
        ));
        assert_eq!(session.state(), SessionState::Extracting);
    }

    #[tokio::test]
    async fn test_engine_refusal_fails_session() {
        let engine = RecordingEngine {
            refuse: true,
            ..Default::default()
        };
        let mut session = extracting_session();
        let mut challenges = ChallengeCoordinator::new();
        challenges.raise(&mut session).unwrap();

        let result = challenges.submit(&mut session, &engine, "pw").await;
        assert!(matches!(result, Err(ControllerError::Engine(_))));
        assert_eq!(session.state(), SessionState::Failed(ErrorKind::EngineIO));
        assert!(challenges.pending().is_none());
    }

    #[tokio::test]
    async fn test_cancel_notifies_engine() {
        let engine = RecordingEngine::default();
        let mut session = extracting_session();
        let mut challenges = ChallengeCoordinator::new();
        challenges.raise(&mut session).unwrap();

        let cancelled = challenges.cancel(&mut session, &engine).await.unwrap();
        assert_eq!(cancelled.status, ChallengeStatus::Cancelled);
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(*engine.cancels.lock().unwrap(), 1);

        // second cancel is refused without touching the engine again
        assert!(challenges.cancel(&mut session, &engine).await.is_err());
        assert_eq!(*engine.cancels.lock().unwrap(), 1);
    }

    #[test]
    fn test_attempts_count_across_reissues() {
        let mut session = extracting_session();
        let mut challenges = ChallengeCoordinator::new();
        challenges.raise(&mut session).unwrap();
        challenges.pending = None;
        session.state = SessionState::Extracting;

        let again = challenges.raise(&mut session).unwrap();
        assert_eq!(again.attempt, 2);

        challenges.reset();
        assert_eq!(challenges.attempts(), 0);
        assert!(challenges.pending().is_none());
    }
}
