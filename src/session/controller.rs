//! Session controller: the single place where engine events and user
//! actions meet.
//!
//! The controller owns the current [`Session`], the [`EventRouter`] and the
//! [`ChallengeCoordinator`]. Engine subscriptions are pumped by small
//! forwarding tasks into one inbox, each event tagged with its session id;
//! user actions arrive through a [`ControllerHandle`]. [`SessionController::step`]
//! takes one item at a time from either source, so the tree and the state are
//! never touched concurrently.
//!
//! # Example
//!
//! ```ignore
//! let engine = Arc::new(ZipEngine::from_config(&config));
//! let mut controller = SessionController::new(engine).with_config(&config);
//! let handle = controller.handle();
//! controller.on_password_required(move |request| {
//!     handle.submit_password(request.session, "secret");
//! });
//! controller.start_session(ArchiveHandle::new("bundle.zip")).await?;
//! let state = controller.run().await;
//! println!("{state}: {}", serde_json::to_string(controller.tree())?);
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep_until;
use tracing::{debug, info, instrument, warn};

use super::challenge::{ChallengeCoordinator, ChallengeRequest};
use super::router::{Envelope, EventRouter, Routed, RouterStats};
use super::state::{Session, SessionId, SessionState, Transition, TransitionError};
use crate::config::{AppConfig, RecentSource};
use crate::model::PathTree;
use crate::traits::{ArchiveHandle, EngineError, ErrorKind, ExtractionEngine};

// ============================================================================
// Errors
// ============================================================================

#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    /// Action not valid in the current state; nothing was changed
    #[error("{action} is not valid while {state}")]
    ProtocolViolation {
        state: SessionState,
        action: &'static str,
    },

    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl ControllerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControllerError::Engine(_) => ErrorKind::EngineIO,
            _ => ErrorKind::ProtocolViolation,
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

#[derive(Debug)]
enum Command {
    SubmitPassword {
        session: SessionId,
        password: String,
    },
    Cancel {
        session: SessionId,
    },
}

impl Command {
    fn session(&self) -> SessionId {
        match self {
            Command::SubmitPassword { session, .. } | Command::Cancel { session } => *session,
        }
    }
}

#[derive(Debug)]
enum Inbound {
    Event(Envelope),
    Closed(SessionId),
}

/// Cloneable sender for user actions. Commands are applied in order by the
/// controller's loop.
///
/// Every command names the session it was meant for, usually
/// [`ChallengeRequest::session`]. Commands for a session that is no longer
/// current are dropped.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ControllerHandle {
    /// Returns `false` if the controller is gone.
    pub fn submit_password(&self, session: SessionId, password: impl Into<String>) -> bool {
        self.tx
            .send(Command::SubmitPassword {
                session,
                password: password.into(),
            })
            .is_ok()
    }

    pub fn cancel(&self, session: SessionId) -> bool {
        self.tx.send(Command::Cancel { session }).is_ok()
    }
}

/// What one [`SessionController::step`] processed.
#[derive(Debug)]
pub enum Activity {
    Event(Routed),
    Command(Result<(), ControllerError>),
    /// Command addressed to a superseded session; nothing was changed
    StaleCommand,
    ChallengeExpired,
}

pub type PasswordCallback = Box<dyn Fn(&ChallengeRequest) + Send + Sync>;

// ============================================================================
// Controller
// ============================================================================

pub struct SessionController<E>
where
    E: ExtractionEngine,
{
    engine: Arc<E>,
    session: Session,
    router: EventRouter,
    challenges: ChallengeCoordinator,
    callbacks: Vec<PasswordCallback>,

    // Unbounded: backpressure on the engine comes from each subscription's
    // own bounded channel, which the forwarder drains.
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: mpsc::UnboundedReceiver<Inbound>,
    command_tx: mpsc::UnboundedSender<Command>,
    command_rx: mpsc::UnboundedReceiver<Command>,

    forwarder: Option<JoinHandle<()>>,
    next_id: SessionId,

    /// Unanswered challenges older than this cancel the session
    challenge_timeout: Option<Duration>,
}

impl<E> SessionController<E>
where
    E: ExtractionEngine,
{
    pub fn new(engine: Arc<E>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            session: Session::new(0, None),
            router: EventRouter::new(),
            challenges: ChallengeCoordinator::new(),
            callbacks: Vec::new(),
            inbox_tx,
            inbox_rx,
            command_tx,
            command_rx,
            forwarder: None,
            next_id: 1,
            challenge_timeout: None,
        }
    }

    pub fn with_challenge_timeout(mut self, timeout: Duration) -> Self {
        self.challenge_timeout = Some(timeout);
        self
    }

    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.challenge_timeout = config.challenge_timeout();
        self
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            tx: self.command_tx.clone(),
        }
    }

    /// Registers a callback invoked every time a password challenge opens.
    pub fn on_password_required<F>(&mut self, callback: F)
    where
        F: Fn(&ChallengeRequest) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    pub fn current_state(&self) -> SessionState {
        self.session.state
    }

    /// Owned snapshot of the tree.
    pub fn current_tree(&self) -> PathTree {
        self.session.tree.clone()
    }

    pub fn tree(&self) -> &PathTree {
        &self.session.tree
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn pending_challenge(&self) -> Option<&ChallengeRequest> {
        self.challenges.pending()
    }

    pub fn stats(&self) -> RouterStats {
        self.router.stats()
    }

    /// Replaces whatever session is current with a new one for `archive`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Engine`] if the engine cannot start; the new
    /// session is then `Failed(EngineIO)`.
    #[instrument(skip(self), fields(engine = self.engine.engine_id()))]
    pub async fn start_session(
        &mut self,
        archive: ArchiveHandle,
    ) -> Result<SessionId, ControllerError> {
        if self.session.state.is_active() {
            info!(session = self.session.id, "Replacing active session");
            if let Err(e) = self.engine.cancel().await {
                warn!(session = self.session.id, error = %e, "Engine cancel failed");
            }
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }

        let id = self.next_id;
        self.next_id += 1;
        self.session = Session::new(id, Some(archive.clone()));
        self.challenges.reset();
        self.router.bind(id);

        let mut subscription = match self.engine.start_extraction(&archive).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(session = id, error = %e, "Engine failed to start");
                self.session.transition(Transition::Start)?;
                self.session.transition(Transition::Fail(ErrorKind::EngineIO))?;
                return Err(e.into());
            }
        };
        self.session.transition(Transition::Start)?;
        info!(session = id, path = %archive.path().display(), "Session started");

        let inbox = self.inbox_tx.clone();
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                if inbox
                    .send(Inbound::Event(Envelope { session: id, event }))
                    .is_err()
                {
                    return;
                }
            }
            let _ = inbox.send(Inbound::Closed(id));
        }));

        Ok(id)
    }

    /// One-shot read of the last opened archive; starts a session if there is
    /// one.
    pub async fn start_from(
        &mut self,
        source: &dyn RecentSource,
    ) -> Result<Option<SessionId>, ControllerError> {
        match source.last_opened() {
            Some(archive) => self.start_session(archive).await.map(Some),
            None => {
                debug!("No recently opened archive");
                Ok(None)
            }
        }
    }

    /// Routes one engine event. Public so custom drivers and tests can feed
    /// events without going through the inbox.
    pub fn handle_event(&mut self, envelope: Envelope) -> Routed {
        let routed = self
            .router
            .route(envelope, &mut self.session, &mut self.challenges);
        if let Routed::ChallengeRaised(request) = &routed {
            for callback in &self.callbacks {
                callback(request);
            }
        }
        routed
    }

    pub async fn submit_password(&mut self, password: &str) -> Result<(), ControllerError> {
        self.challenges
            .submit(&mut self.session, self.engine.as_ref(), password)
            .await
            .map(|_| ())
    }

    /// Cancels the current session.
    ///
    /// From `AwaitingPassword` this goes through the challenge coordinator;
    /// from `Extracting` the session is cancelled directly. A finished or
    /// never-started session is left alone.
    pub async fn cancel(&mut self) -> Result<(), ControllerError> {
        match self.session.state {
            SessionState::AwaitingPassword => self
                .challenges
                .cancel(&mut self.session, self.engine.as_ref())
                .await
                .map(|_| ()),
            SessionState::Extracting => {
                self.session.transition(Transition::Cancel)?;
                info!(session = self.session.id, "Session cancelled");
                if let Err(e) = self.engine.cancel().await {
                    warn!(session = self.session.id, error = %e, "Engine cancel failed");
                }
                Ok(())
            }
            state => {
                debug!(session = self.session.id, %state, "Cancel ignored");
                Ok(())
            }
        }
    }

    /// Waits for the next engine event, user command or challenge timeout and
    /// applies it.
    pub async fn step(&mut self) -> Activity {
        enum Next {
            Inbound(Inbound),
            Command(Command),
            Expired,
        }

        let deadline = match (self.challenge_timeout, self.challenges.pending()) {
            (Some(timeout), Some(request)) => Some(request.issued_at + timeout),
            _ => None,
        };

        let next = tokio::select! {
            Some(inbound) = self.inbox_rx.recv() => Next::Inbound(inbound),
            Some(command) = self.command_rx.recv() => Next::Command(command),
            _ = async { sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)).await }, if deadline.is_some() => Next::Expired,
        };

        match next {
            Next::Inbound(Inbound::Event(envelope)) => Activity::Event(self.handle_event(envelope)),
            Next::Inbound(Inbound::Closed(id)) => Activity::Event(self.router.route_closed(
                id,
                &mut self.session,
                &mut self.challenges,
            )),
            Next::Command(command) if command.session() != self.session.id => {
                warn!(
                    command_session = command.session(),
                    current = self.session.id,
                    "Dropping command for superseded session"
                );
                Activity::StaleCommand
            }
            Next::Command(Command::SubmitPassword { password, .. }) => {
                let result = self.submit_password(&password).await;
                if let Err(e) = &result {
                    warn!(error = %e, "Password submission failed");
                }
                Activity::Command(result)
            }
            Next::Command(Command::Cancel { .. }) => Activity::Command(self.cancel().await),
            Next::Expired => {
                warn!(session = self.session.id, "Password challenge timed out");
                if let Err(e) = self.cancel().await {
                    warn!(error = %e, "Cancel after timeout failed");
                }
                Activity::ChallengeExpired
            }
        }
    }

    /// Steps until the current session is finished and returns its final
    /// state. Returns immediately if no session was started.
    pub async fn run(&mut self) -> SessionState {
        while self.session.state.is_active() {
            self.step().await;
        }
        self.session.state
    }
}

impl<E> Drop for SessionController<E>
where
    E: ExtractionEngine,
{
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
