// Client-side handle for the booking currently being built in server session state

use crate::guard::SessionRegistry;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque credential identifying the server-side session.
///
/// Clones share one allocation; the token text is never copied or mutated here.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(Arc<str>);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Safe form for logs: the first four characters only.
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(4).collect();
        format!("{}…", prefix)
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionToken").field(&self.redacted()).finish()
    }
}

impl From<&str> for SessionToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for SessionToken {
    fn from(token: String) -> Self {
        Self::new(token)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommitState {
    Building,
    CommitRequested,
    CommitPending,
    Committed,
    CommitFailed,
}

impl CommitState {
    /// A commit is in flight (or parked awaiting a status check).
    pub fn is_outstanding(self) -> bool {
        matches!(self, CommitState::CommitRequested | CommitState::CommitPending)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CommitState::Committed | CommitState::CommitFailed)
    }

    pub(crate) fn can_transition_to(self, next: CommitState) -> bool {
        use CommitState::*;
        matches!(
            (self, next),
            (Building | Committed | CommitFailed, CommitRequested)
                | (CommitRequested, CommitPending | Committed | CommitFailed)
                | (CommitPending, Committed | CommitFailed)
                | (Committed | CommitFailed, Building)
        )
    }
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
pub(crate) struct SessionInner {
    pub(crate) state: CommitState,
    pub(crate) lease_held: bool,
    pub(crate) last_commit_request_id: Option<Uuid>,
    pub(crate) record_locator: Option<String>,
}

impl SessionInner {
    // Returns false and leaves the state untouched on an illegal move.
    pub(crate) fn transition(&mut self, next: CommitState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::error!(from = %self.state, to = %next, "illegal commit state transition");
            return false;
        }
        tracing::debug!(from = %self.state, to = %next, "commit state transition");
        self.state = next;
        true
    }
}

pub struct BookingSession {
    token: SessionToken,
    pub(crate) inner: Mutex<SessionInner>,
    registry: Option<SessionRegistry>,
}

impl BookingSession {
    /// Standalone session, not tracked by any registry.
    pub fn new(token: SessionToken) -> Self {
        Self::build(token, None)
    }

    pub(crate) fn registered(token: SessionToken, registry: SessionRegistry) -> Self {
        Self::build(token, Some(registry))
    }

    fn build(token: SessionToken, registry: Option<SessionRegistry>) -> Self {
        Self {
            token,
            inner: Mutex::new(SessionInner {
                state: CommitState::Building,
                lease_held: false,
                last_commit_request_id: None,
                record_locator: None,
            }),
            registry,
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn state(&self) -> CommitState {
        self.inner.lock().state
    }

    pub fn last_commit_request_id(&self) -> Option<Uuid> {
        self.inner.lock().last_commit_request_id
    }

    /// Record locator of the last successful commit.
    pub fn record_locator(&self) -> Option<String> {
        self.inner.lock().record_locator.clone()
    }

    /// Returns a terminal session to `Building` so the caller can correct the
    /// booking before committing again. Returns the state the session is left in.
    pub fn reset(&self) -> CommitState {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() && !inner.lease_held {
            inner.transition(CommitState::Building);
        }
        inner.state
    }

    /// Ends the session, freeing its token for a new one.
    pub fn close(self) {}
}

impl fmt::Debug for BookingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BookingSession")
            .field("token", &self.token)
            .field("state", &inner.state)
            .field("lease_held", &inner.lease_held)
            .field("last_commit_request_id", &inner.last_commit_request_id)
            .finish()
    }
}

impl Drop for BookingSession {
    fn drop(&mut self) {
        if let Some(registry) = &self.registry {
            registry.release(&self.token);
        }
    }
}
