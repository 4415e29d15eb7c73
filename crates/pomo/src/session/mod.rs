//! Timed focus sessions.
//!
//! A [`Session`] runs one countdown on its own Tokio task and reports exactly
//! one terminal outcome to its completion callback: either the countdown
//! elapsed or the session was cancelled first.

mod registry;

pub use registry::SessionRegistry;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Source of process-unique session ids.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

const STATE_PENDING: u8 = 0;
const STATE_COMPLETED: u8 = 1;
const STATE_CANCELLED: u8 = 2;

/// Identifies one session instance, distinct from the identity key it runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a session terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOutcome {
    /// The full duration elapsed
    Completed,
    /// The session was cancelled before its duration elapsed
    Cancelled,
}

impl SessionOutcome {
    /// `true` when the session ran to natural completion.
    pub fn finished_normally(self) -> bool {
        matches!(self, Self::Completed)
    }

    fn state_code(self) -> u8 {
        match self {
            Self::Completed => STATE_COMPLETED,
            Self::Cancelled => STATE_CANCELLED,
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Observable lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Completed,
    Cancelled,
}

/// A running countdown.
///
/// The countdown starts as soon as the session is constructed; there is no
/// separate arming step. The handle only allows cancelling and observing the
/// session. Dropping it leaves the countdown running.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    duration: Duration,
    cancel_token: CancellationToken,
    state: Arc<AtomicU8>,
}

impl Session {
    /// Start a session that calls `on_end` once with `payload` when it
    /// completes or is cancelled.
    ///
    /// Must be called from within a Tokio runtime. A zero duration fires at
    /// the next scheduling opportunity.
    pub fn start<P, F>(duration: Duration, on_end: F, payload: P) -> Self
    where
        P: Send + 'static,
        F: FnOnce(P, SessionOutcome) + Send + 'static,
    {
        Self::spawn(SessionId::next(), duration, on_end, payload)
    }

    pub(crate) fn spawn<P, F>(id: SessionId, duration: Duration, on_end: F, payload: P) -> Self
    where
        P: Send + 'static,
        F: FnOnce(P, SessionOutcome) + Send + 'static,
    {
        let cancel_token = CancellationToken::new();
        let state = Arc::new(AtomicU8::new(STATE_PENDING));

        let token = cancel_token.clone();
        let task_state = Arc::clone(&state);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = tokio::time::sleep(duration) => SessionOutcome::Completed,
                _ = token.cancelled() => SessionOutcome::Cancelled,
            };

            // Only this task ever leaves the pending state.
            task_state.store(outcome.state_code(), Ordering::Release);
            debug!("Session {} {} after {:?}", id, outcome, duration);
            on_end(payload, outcome);
        });

        Self {
            id,
            duration,
            cancel_token,
            state,
        }
    }

    /// Request early termination.
    ///
    /// Returns immediately; the callback runs on the session's own task. Has
    /// no effect once the session has terminated or was already cancelled.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Requested countdown length.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Current lifecycle state.
    ///
    /// A cancelled session reports `Pending` until its task has observed the
    /// cancellation.
    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::Acquire) {
            STATE_COMPLETED => SessionState::Completed,
            STATE_CANCELLED => SessionState::Cancelled,
            _ => SessionState::Pending,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state() != SessionState::Pending
    }
}
