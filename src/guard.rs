// Session guard: at most one commit in flight per session, at most one session per token.
// Mutating calls against one session token must never overlap upstream, so a second
// commit is rejected immediately rather than queued.

use crate::error::{translate, ApiError, Failure};
use crate::session::{BookingSession, CommitState, SessionToken};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Tracks which session tokens currently have a live `BookingSession`.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    active: Arc<DashMap<SessionToken, ()>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, token: SessionToken) -> Result<BookingSession, ApiError> {
        match self.active.entry(token.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(token = %token.redacted(), "session already open for token");
                Err(translate(Failure::DuplicateSession(token)))
            }
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(BookingSession::registered(token, self.clone()))
            }
        }
    }

    pub fn is_open(&self, token: &SessionToken) -> bool {
        self.active.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub(crate) fn release(&self, token: &SessionToken) {
        self.active.remove(token);
    }
}

/// Exclusive right to drive one commit on a session.
///
/// Resolve it with [`complete`](Self::complete), [`fail`](Self::fail) or
/// [`park`](Self::park). Dropping an unresolved lease fails a commit that was never
/// acknowledged and parks one the server already accepted.
#[derive(Debug)]
#[must_use]
pub struct CommitLease<'a> {
    session: &'a BookingSession,
    request_id: Uuid,
    resolved: bool,
}

impl<'a> CommitLease<'a> {
    pub fn session(&self) -> &'a BookingSession {
        self.session
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn state(&self) -> CommitState {
        self.session.state()
    }

    /// Upstream accepted the commit and is still processing it.
    pub fn mark_pending(&mut self) {
        self.session
            .inner
            .lock()
            .transition(CommitState::CommitPending);
    }

    pub fn complete(mut self, record_locator: &str) {
        let mut inner = self.session.inner.lock();
        if inner.transition(CommitState::Committed) {
            inner.record_locator = Some(record_locator.to_string());
        }
        inner.lease_held = false;
        self.resolved = true;
    }

    pub fn fail(mut self) {
        let mut inner = self.session.inner.lock();
        inner.transition(CommitState::CommitFailed);
        inner.lease_held = false;
        self.resolved = true;
    }

    /// Releases the lease without resolving the commit; the session stays
    /// `CommitPending` so a later status check can finish it.
    pub fn park(mut self) {
        self.session.inner.lock().lease_held = false;
        self.resolved = true;
    }
}

impl Drop for CommitLease<'_> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        let mut inner = self.session.inner.lock();
        if inner.state == CommitState::CommitRequested {
            inner.transition(CommitState::CommitFailed);
        }
        inner.lease_held = false;
    }
}

/// Starts a commit on `session`, moving it to `CommitRequested`.
///
/// Fails with a conflict while another commit is requested or pending.
pub fn begin_commit(session: &BookingSession) -> Result<CommitLease<'_>, ApiError> {
    let mut inner = session.inner.lock();
    if inner.lease_held || !inner.state.can_transition_to(CommitState::CommitRequested) {
        tracing::warn!(
            token = %session.token().redacted(),
            state = %inner.state,
            "commit rejected: another commit is outstanding"
        );
        return Err(translate(Failure::Busy(inner.state)));
    }

    inner.transition(CommitState::CommitRequested);
    inner.lease_held = true;
    let request_id = Uuid::new_v4();
    inner.last_commit_request_id = Some(request_id);

    Ok(CommitLease {
        session,
        request_id,
        resolved: false,
    })
}

/// Takes over a parked `CommitPending` session so its outcome can be resolved.
pub fn resume(session: &BookingSession) -> Result<CommitLease<'_>, ApiError> {
    let mut inner = session.inner.lock();
    if inner.lease_held || inner.state != CommitState::CommitPending {
        return Err(translate(Failure::NotPending(inner.state)));
    }

    inner.lease_held = true;
    let request_id = inner.last_commit_request_id.unwrap_or_else(Uuid::new_v4);

    Ok(CommitLease {
        session,
        request_id,
        resolved: false,
    })
}
