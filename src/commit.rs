// Commit orchestration
// Submits the booking commit, then follows a 202 "still processing" answer with
// status polls until the booking is committed, rejected, or the caller gives up.

use crate::config::{ClientConfig, Endpoints, PollConfig, RetryConfig};
use crate::error::{error_list_message, translate, ApiError, Failure};
use crate::executor::{ApiRequest, ApiResponse, RequestExecutor};
use crate::guard::{self, CommitLease};
use crate::session::BookingSession;
use crate::validation::{validate, Rule, Ruleset, ValidationResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

pub const COMMENT_TYPES: [&str; 5] = ["Default", "Itinerary", "Manifest", "Alert", "Archive"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_by: Option<String>,
    pub restriction_override: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hold: Option<HoldOptions>,
    pub notify_contacts: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<BookingComment>,
    // Let upstream merge changes made by other sessions instead of rejecting the commit
    pub merge_concurrent_changes: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldOptions {
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingComment {
    #[serde(rename = "type")]
    pub comment_type: String,
    pub text: String,
}

impl BookingComment {
    pub fn new(comment_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            comment_type: comment_type.into(),
            text: text.into(),
        }
    }
}

impl CommitRequest {
    /// Local checks applied before a commit is sent.
    pub fn ruleset() -> Ruleset {
        Ruleset::new()
            .field("receivedBy", Rule::length(1, 64))
            .field("hold.date", Rule::Date)
            .field("comments", Rule::length(0, 50))
            .field("comments[].type", Rule::Required)
            .field("comments[].type", Rule::one_of(COMMENT_TYPES))
            .field("comments[].text", Rule::Required)
            .field("comments[].text", Rule::length(1, 256))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    // POST: first commit of a new booking
    Create,
    // PUT: commit changes to an existing booking
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommittedBooking {
    pub record_locator: String,
    pub booking: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitStatus {
    Pending,
    Committed(CommittedBooking),
    Failed(ApiError),
}

impl CommitStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommitStatus::Pending)
    }

    /// Reads a 2xx commit or status response.
    pub fn from_response(response: ApiResponse) -> Self {
        let status = response.status;
        let booking = response.body.map(unwrap_data).unwrap_or(Value::Null);

        if let Some(message) = failure_marker(&booking) {
            return CommitStatus::Failed(ApiError::Rejected { status, message });
        }
        if status == 202 {
            return CommitStatus::Pending;
        }

        match booking.get("recordLocator").and_then(Value::as_str) {
            Some(locator) if !locator.is_empty() => CommitStatus::Committed(CommittedBooking {
                record_locator: locator.to_string(),
                booking,
            }),
            _ => CommitStatus::Failed(translate(Failure::Decode(format!(
                "{} response carried no record locator",
                status
            )))),
        }
    }
}

fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn failure_marker(booking: &Value) -> Option<String> {
    let status = booking.get("status").and_then(Value::as_str)?;
    if !status.eq_ignore_ascii_case("failed") {
        return None;
    }
    Some(
        error_list_message(booking)
            .or_else(|| {
                booking
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "commit failed upstream".to_string()),
    )
}

#[derive(Debug, Default)]
struct StatsCounters {
    commits_started: AtomicUsize,
    commits_committed: AtomicUsize,
    commits_failed: AtomicUsize,
    conflicts: AtomicUsize,
    polls_sent: AtomicUsize,
    transient_retries: AtomicUsize,
    cancellations: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommitStats {
    pub commits_started: usize,
    pub commits_committed: usize,
    pub commits_failed: usize,
    pub conflicts: usize,
    pub polls_sent: usize,
    pub transient_retries: usize,
    pub cancellations: usize,
}

pub struct CommitOrchestrator {
    executor: Arc<dyn RequestExecutor>,
    endpoints: Endpoints,
    retry: RetryConfig,
    poll: PollConfig,
    ruleset: Ruleset,
    stats: StatsCounters,
}

impl CommitOrchestrator {
    pub fn new(executor: Arc<dyn RequestExecutor>, config: &ClientConfig) -> Self {
        Self {
            executor,
            endpoints: config.endpoints.clone(),
            retry: config.retry.clone(),
            poll: config.poll.clone(),
            ruleset: CommitRequest::ruleset(),
            stats: StatsCounters::default(),
        }
    }

    pub fn with_ruleset(mut self, ruleset: Ruleset) -> Self {
        self.ruleset = ruleset;
        self
    }

    /// Commits the booking held in `session`.
    ///
    /// Returns once the commit is resolved. A 202 answer is followed by status polls
    /// until a terminal status, the configured poll timeout, or `cancel` fires; on
    /// timeout or cancellation the session stays `CommitPending` and the error is
    /// [`ApiError::Cancelled`].
    pub async fn commit(
        &self,
        session: &BookingSession,
        request: &CommitRequest,
        mode: CommitMode,
        cancel: CancellationToken,
    ) -> Result<CommittedBooking, ApiError> {
        let lease = match guard::begin_commit(session) {
            Ok(lease) => lease,
            Err(err) => {
                self.stats.conflicts.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }
        };
        self.stats.commits_started.fetch_add(1, Ordering::Relaxed);

        let payload = match serde_json::to_value(request) {
            Ok(payload) => payload,
            Err(e) => return Err(self.fail(lease, translate(Failure::Decode(e.to_string())))),
        };
        if let ValidationResult::Invalid(violations) = validate(&payload, &self.ruleset) {
            tracing::warn!(violations = violations.len(), "commit rejected by local validation");
            return Err(self.fail(lease, translate(Failure::Invalid(violations))));
        }

        let path = self.endpoints.commit_path.as_str();
        let submit = match mode {
            CommitMode::Create => ApiRequest::post(path, payload),
            CommitMode::Update => ApiRequest::put(path, payload),
        }
        .header("X-Request-Id", lease.request_id().to_string());

        tracing::info!(request_id = %lease.request_id(), ?mode, "submitting commit");
        let response = match self.executor.execute(session.token(), submit).await {
            Ok(response) => response,
            Err(failure) => return Err(self.fail(lease, translate(failure))),
        };

        self.settle(lease, CommitStatus::from_response(response), cancel)
            .await
    }

    /// Resumes polling a commit left `CommitPending` by an earlier cancellation.
    pub async fn await_commit(
        &self,
        session: &BookingSession,
        cancel: CancellationToken,
    ) -> Result<CommittedBooking, ApiError> {
        let lease = guard::resume(session)?;
        self.poll_until_terminal(lease, cancel).await
    }

    /// One status request, no retries.
    ///
    /// A parked pending session is advanced when the answer is terminal; otherwise
    /// the session is left untouched.
    pub async fn check_status(&self, session: &BookingSession) -> Result<CommitStatus, ApiError> {
        let lease = guard::resume(session).ok();
        self.stats.polls_sent.fetch_add(1, Ordering::Relaxed);
        let result = self
            .executor
            .execute(session.token(), self.status_request())
            .await;

        let status = match result {
            Ok(response) => CommitStatus::from_response(response),
            Err(failure) => {
                let err = translate(failure);
                if err.is_retryable() {
                    if let Some(lease) = lease {
                        lease.park();
                    }
                    return Err(err);
                }
                CommitStatus::Failed(err)
            }
        };

        if let Some(lease) = lease {
            match &status {
                CommitStatus::Pending => lease.park(),
                CommitStatus::Committed(booking) => {
                    self.stats.commits_committed.fetch_add(1, Ordering::Relaxed);
                    lease.complete(&booking.record_locator);
                }
                CommitStatus::Failed(_) => {
                    self.stats.commits_failed.fetch_add(1, Ordering::Relaxed);
                    lease.fail();
                }
            }
        }
        Ok(status)
    }

    pub fn stats(&self) -> CommitStats {
        let s = &self.stats;
        CommitStats {
            commits_started: s.commits_started.load(Ordering::Relaxed),
            commits_committed: s.commits_committed.load(Ordering::Relaxed),
            commits_failed: s.commits_failed.load(Ordering::Relaxed),
            conflicts: s.conflicts.load(Ordering::Relaxed),
            polls_sent: s.polls_sent.load(Ordering::Relaxed),
            transient_retries: s.transient_retries.load(Ordering::Relaxed),
            cancellations: s.cancellations.load(Ordering::Relaxed),
        }
    }

    fn status_request(&self) -> ApiRequest {
        ApiRequest::get(self.endpoints.status_path.as_str())
    }

    async fn settle(
        &self,
        mut lease: CommitLease<'_>,
        status: CommitStatus,
        cancel: CancellationToken,
    ) -> Result<CommittedBooking, ApiError> {
        match status {
            CommitStatus::Committed(booking) => Ok(self.complete(lease, booking)),
            CommitStatus::Failed(err) => Err(self.fail(lease, err)),
            CommitStatus::Pending => {
                tracing::info!(request_id = %lease.request_id(), "commit accepted, processing upstream");
                lease.mark_pending();
                self.poll_until_terminal(lease, cancel).await
            }
        }
    }

    async fn poll_until_terminal(
        &self,
        lease: CommitLease<'_>,
        cancel: CancellationToken,
    ) -> Result<CommittedBooking, ApiError> {
        let deadline = self.poll.timeout().map(|timeout| Instant::now() + timeout);
        let token = lease.session().token().clone();
        let mut attempt: u32 = 0;
        let mut transient_failures: u32 = 0;

        loop {
            let delay = self.retry.backoff(attempt);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                _ = until(deadline) => None,
                result = async {
                    sleep(delay).await;
                    self.stats.polls_sent.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(attempt, "polling commit status");
                    self.executor.execute(&token, self.status_request()).await
                } => Some(result),
            };

            let result = match outcome {
                Some(result) => result,
                None => {
                    tracing::warn!(attempt, "commit polling cancelled, leaving session pending");
                    self.stats.cancellations.fetch_add(1, Ordering::Relaxed);
                    lease.park();
                    return Err(translate(Failure::Cancelled));
                }
            };

            match result {
                Ok(response) => match CommitStatus::from_response(response) {
                    CommitStatus::Pending => {
                        transient_failures = 0;
                        attempt = attempt.saturating_add(1);
                    }
                    CommitStatus::Committed(booking) => return Ok(self.complete(lease, booking)),
                    CommitStatus::Failed(err) => return Err(self.fail(lease, err)),
                },
                Err(failure) => {
                    let err = translate(failure);
                    if !err.is_retryable() || transient_failures >= self.retry.max_retries {
                        return Err(self.fail(lease, err));
                    }
                    transient_failures += 1;
                    attempt = attempt.saturating_add(1);
                    self.stats.transient_retries.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        attempt,
                        retry = transient_failures,
                        status = ?err.http_status(),
                        error = %err,
                        "transient failure while polling commit status"
                    );
                }
            }
        }
    }

    fn complete(&self, lease: CommitLease<'_>, booking: CommittedBooking) -> CommittedBooking {
        tracing::info!(record_locator = %booking.record_locator, "booking committed");
        self.stats.commits_committed.fetch_add(1, Ordering::Relaxed);
        lease.complete(&booking.record_locator);
        booking
    }

    fn fail(&self, lease: CommitLease<'_>, err: ApiError) -> ApiError {
        tracing::warn!(kind = ?err.kind(), status = ?err.http_status(), error = %err, "commit failed");
        self.stats.commits_failed.fetch_add(1, Ordering::Relaxed);
        lease.fail();
        err
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => futures::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::executor::mock::{status, ScriptedExecutor};
    use crate::executor::Method;
    use crate::session::{CommitState, SessionToken};
    use serde_json::json;
    use std::time::Duration;

    fn booking(locator: &str) -> ApiResponse {
        ApiResponse::ok(json!({ "data": { "recordLocator": locator, "journeys": [] } }))
    }

    fn orchestrator(executor: Arc<ScriptedExecutor>) -> CommitOrchestrator {
        let mut config = ClientConfig::new("https://dcs.example.com");
        config.poll.timeout_ms = Some(30_000);
        CommitOrchestrator::new(executor, &config)
    }

    fn session() -> BookingSession {
        BookingSession::new(SessionToken::new("session-token"))
    }

    fn request() -> CommitRequest {
        CommitRequest {
            received_by: Some("agent".into()),
            comments: vec![BookingComment::new("Default", "window seat please")],
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_synchronous_commit() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(booking("ABC123"))]));
        let orchestrator = orchestrator(executor.clone());
        let session = session();

        let committed = orchestrator
            .commit(&session, &request(), CommitMode::Create, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(committed.record_locator, "ABC123");
        assert_eq!(session.state(), CommitState::Committed);
        assert_eq!(session.record_locator().as_deref(), Some("ABC123"));
        assert_eq!(executor.calls(), 1);

        let (token, submitted) = &executor.requests()[0];
        assert_eq!(token.as_str(), "session-token");
        assert_eq!(submitted.method, Method::Post);
        assert_eq!(submitted.path, crate::config::DEFAULT_COMMIT_PATH);
        let request_id = session.last_commit_request_id().unwrap().to_string();
        assert!(submitted
            .headers
            .contains(&("X-Request-Id".to_string(), request_id)));
        assert_eq!(
            submitted.body.as_ref().unwrap()["comments"][0]["type"],
            json!("Default")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_mode_uses_put() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(booking("ABC123"))]));
        let orchestrator = orchestrator(executor.clone());

        orchestrator
            .commit(&session(), &request(), CommitMode::Update, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(executor.requests()[0].1.method, Method::Put);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_then_two_polls() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Ok(ApiResponse::accepted()),
            Ok(ApiResponse::accepted()),
            Ok(booking("QWE987")),
        ]));
        let orchestrator = orchestrator(executor.clone());
        let session = session();

        let committed = orchestrator
            .commit(&session, &request(), CommitMode::Create, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(committed.record_locator, "QWE987");
        assert_eq!(session.state(), CommitState::Committed);
        assert_eq!(orchestrator.stats().polls_sent, 2);
        assert_eq!(executor.calls(), 3);

        let requests = executor.requests();
        assert_eq!(requests[1].1.method, Method::Get);
        assert_eq!(requests[1].1.path, crate::config::DEFAULT_STATUS_PATH);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_poll_failures_are_retried() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Ok(ApiResponse::accepted()),
            status(503),
            status(500),
            Ok(booking("ABC123")),
        ]));
        let orchestrator = orchestrator(executor.clone());
        let session = session();

        let committed = orchestrator
            .commit(&session, &request(), CommitMode::Create, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(committed.record_locator, "ABC123");
        assert_eq!(session.state(), CommitState::Committed);
        let stats = orchestrator.stats();
        assert_eq!(stats.transient_retries, 2);
        assert_eq!(stats.polls_sent, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_retries() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Ok(ApiResponse::accepted()),
            status(500),
            status(500),
            status(500),
            status(500),
            Ok(booking("NEVER1")),
        ]));
        let orchestrator = orchestrator(executor.clone());
        let session = session();

        let err = orchestrator
            .commit(&session, &request(), CommitMode::Create, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.http_status(), Some(500));
        assert_eq!(session.state(), CommitState::CommitFailed);
        assert_eq!(executor.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_while_polling_is_terminal() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Ok(ApiResponse::accepted()),
            status(404),
            Ok(booking("NEVER1")),
        ]));
        let orchestrator = orchestrator(executor.clone());
        let session = session();

        let err = orchestrator
            .commit(&session, &request(), CommitMode::Create, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Api);
        assert_eq!(session.state(), CommitState::CommitFailed);
        assert_eq!(executor.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_marker_in_status_body() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Ok(ApiResponse::accepted()),
            Ok(ApiResponse::ok(json!({ "data": { "status": "Failed", "message": "payment declined" } }))),
        ]));
        let orchestrator = orchestrator(executor);
        let session = session();

        let err = orchestrator
            .commit(&session, &request(), CommitMode::Create, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ApiError::Rejected {
                status: 200,
                message: "payment declined".into()
            }
        );
        assert_eq!(session.state(), CommitState::CommitFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_rejection_fails_commit() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Err(Failure::Status {
            status: 400,
            body: r#"{"errors":[{"code":"nsk:Booking:Invalid","message":"no passengers"}]}"#.into(),
        })]));
        let orchestrator = orchestrator(executor.clone());
        let session = session();

        let err = orchestrator
            .commit(&session, &request(), CommitMode::Create, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.http_status(), Some(400));
        assert!(err.to_string().contains("no passengers"));
        assert_eq!(session.state(), CommitState::CommitFailed);
        assert_eq!(executor.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_request_never_reaches_network() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(booking("ABC123"))]));
        let orchestrator = orchestrator(executor.clone());
        let session = session();
        let request = CommitRequest {
            received_by: Some(String::new()),
            hold: Some(HoldOptions {
                date: "next tuesday".into(),
            }),
            comments: vec![BookingComment::new("Gossip", "")],
            ..Default::default()
        };

        let err = orchestrator
            .commit(&session, &request, CommitMode::Create, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        // receivedBy length, hold.date, comment type, comment text required + length
        assert_eq!(err.violations().len(), 5, "{:?}", err.violations());
        assert_eq!(executor.calls(), 0);
        assert_eq!(session.state(), CommitState::CommitFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_commit_conflicts_without_network_call() {
        let executor = Arc::new(
            ScriptedExecutor::new(vec![Ok(booking("ABC123"))]).with_delay(Duration::from_secs(1)),
        );
        let orchestrator = orchestrator(executor.clone());
        let session = session();
        let request = request();

        let (first, second) = tokio::join!(
            orchestrator.commit(&session, &request, CommitMode::Create, CancellationToken::new()),
            orchestrator.commit(&session, &request, CommitMode::Create, CancellationToken::new()),
        );

        assert_eq!(first.unwrap().record_locator, "ABC123");
        assert_eq!(second.unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(executor.calls(), 1);
        assert_eq!(orchestrator.stats().conflicts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout_cancels_and_leaves_pending() {
        let executor = Arc::new(
            ScriptedExecutor::new(vec![]).then_forever(ApiResponse::accepted()),
        );
        let orchestrator = orchestrator(executor.clone());
        let session = session();

        let started = Instant::now();
        let err = orchestrator
            .commit(&session, &request(), CommitMode::Create, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, ApiError::Cancelled);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(session.state(), CommitState::CommitPending);
        assert_eq!(orchestrator.stats().cancellations, 1);

        // Still outstanding: a fresh commit is refused without touching the network.
        let calls = executor.calls();
        let err = orchestrator
            .commit(&session, &request(), CommitMode::Create, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(executor.calls(), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_token_stops_polling() {
        let executor = Arc::new(
            ScriptedExecutor::new(vec![]).then_forever(ApiResponse::accepted()),
        );
        let orchestrator = orchestrator(executor);
        let session = session();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(2)).await;
            trigger.cancel();
        });

        let err = orchestrator
            .commit(&session, &request(), CommitMode::Create, cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(session.state(), CommitState::CommitPending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_after_cancellation() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Ok(ApiResponse::accepted()),
            Ok(booking("RES123")),
        ]));
        let orchestrator = orchestrator(executor);
        let session = session();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .commit(&session, &request(), CommitMode::Create, cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Cancelled);
        assert_eq!(session.state(), CommitState::CommitPending);

        let committed = orchestrator
            .await_commit(&session, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(committed.record_locator, "RES123");
        assert_eq!(session.state(), CommitState::Committed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_status_resolves_parked_commit() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Ok(ApiResponse::accepted()),
            Ok(ApiResponse::accepted()),
            Ok(booking("CHK001")),
        ]));
        let orchestrator = orchestrator(executor);
        let session = session();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let _ = orchestrator
            .commit(&session, &request(), CommitMode::Create, cancel)
            .await;

        assert_eq!(
            orchestrator.check_status(&session).await.unwrap(),
            CommitStatus::Pending
        );
        assert_eq!(session.state(), CommitState::CommitPending);

        let status = orchestrator.check_status(&session).await.unwrap();
        assert!(matches!(status, CommitStatus::Committed(ref b) if b.record_locator == "CHK001"));
        assert_eq!(session.state(), CommitState::Committed);
    }

    // Submits, gets a 202, and parks the commit without polling
    async fn parked(orchestrator: &CommitOrchestrator, session: &BookingSession) {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orchestrator
            .commit(session, &request(), CommitMode::Create, cancel)
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Cancelled);
        assert_eq!(session.state(), CommitState::CommitPending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_status_leaves_leased_session_alone() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(booking("OTHER1"))]));
        let orchestrator = orchestrator(executor.clone());
        let session = session();
        let mut lease = guard::begin_commit(&session).unwrap();
        lease.mark_pending();

        let status = orchestrator.check_status(&session).await.unwrap();
        assert!(matches!(status, CommitStatus::Committed(ref b) if b.record_locator == "OTHER1"));
        assert_eq!(session.state(), CommitState::CommitPending);
        assert_eq!(session.record_locator(), None);
        assert_eq!(orchestrator.stats().commits_committed, 0);
        assert_eq!(executor.calls(), 1);

        // The holder still owns the commit and resolves it itself.
        lease.park();
        assert_eq!(session.state(), CommitState::CommitPending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_status_transient_keeps_commit_resumable() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Ok(ApiResponse::accepted()),
            status(503),
            Ok(booking("RES503")),
        ]));
        let orchestrator = orchestrator(executor);
        let session = session();
        parked(&orchestrator, &session).await;

        let err = orchestrator.check_status(&session).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.http_status(), Some(503));
        assert_eq!(session.state(), CommitState::CommitPending);

        let committed = orchestrator
            .await_commit(&session, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(committed.record_locator, "RES503");
        assert_eq!(session.state(), CommitState::Committed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_status_client_error_fails_parked_commit() {
        let executor = Arc::new(ScriptedExecutor::new(vec![Ok(ApiResponse::accepted()), status(404)]));
        let orchestrator = orchestrator(executor);
        let session = session();
        parked(&orchestrator, &session).await;

        let status = orchestrator.check_status(&session).await.unwrap();
        assert!(matches!(
            status,
            CommitStatus::Failed(ApiError::Rejected { status: 404, .. })
        ));
        assert_eq!(session.state(), CommitState::CommitFailed);
        assert_eq!(orchestrator.stats().commits_failed, 1);
        assert!(guard::resume(&session).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_status_failure_marker_fails_parked_commit() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Ok(ApiResponse::accepted()),
            Ok(ApiResponse::ok(json!({ "data": { "status": "Failed", "message": "seat gone" } }))),
        ]));
        let orchestrator = orchestrator(executor);
        let session = session();
        parked(&orchestrator, &session).await;

        let status = orchestrator.check_status(&session).await.unwrap();
        assert_eq!(
            status,
            CommitStatus::Failed(ApiError::Rejected {
                status: 200,
                message: "seat gone".into()
            })
        );
        assert_eq!(session.state(), CommitState::CommitFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_poll_request_is_not_retried() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            Ok(ApiResponse::accepted()),
            Err(Failure::Request("invalid HTTP header value".into())),
            Ok(booking("NEVER1")),
        ]));
        let orchestrator = orchestrator(executor.clone());
        let session = session();

        let err = orchestrator
            .commit(&session, &request(), CommitMode::Create, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(session.state(), CommitState::CommitFailed);
        assert_eq!(orchestrator.stats().transient_retries, 0);
        assert_eq!(executor.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_commit_after_terminal_states() {
        let executor = Arc::new(ScriptedExecutor::new(vec![
            status(422),
            Ok(booking("ABC123")),
            Ok(booking("ABC123")),
        ]));
        let orchestrator = orchestrator(executor.clone());
        let session = session();

        assert!(orchestrator
            .commit(&session, &request(), CommitMode::Create, CancellationToken::new())
            .await
            .is_err());
        assert_eq!(session.state(), CommitState::CommitFailed);

        orchestrator
            .commit(&session, &request(), CommitMode::Create, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.state(), CommitState::Committed);

        orchestrator
            .commit(&session, &request(), CommitMode::Update, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.state(), CommitState::Committed);
        assert_eq!(executor.calls(), 3);
    }

    #[test]
    fn test_status_interpretation() {
        assert_eq!(CommitStatus::from_response(ApiResponse::accepted()), CommitStatus::Pending);
        assert_eq!(
            CommitStatus::from_response(ApiResponse::new(
                202,
                Some(json!({ "data": { "status": "Processing" } }))
            )),
            CommitStatus::Pending
        );

        let bare = CommitStatus::from_response(ApiResponse::ok(json!({ "recordLocator": "BARE01" })));
        assert!(matches!(bare, CommitStatus::Committed(ref b) if b.record_locator == "BARE01"));

        let missing = CommitStatus::from_response(ApiResponse::ok(json!({ "data": {} })));
        assert!(matches!(missing, CommitStatus::Failed(ApiError::Decode { .. })));
        assert!(missing.is_terminal());
    }
}
