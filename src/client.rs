// Booking client: one entry point over the session registry, executor and commit orchestrator

use crate::commit::{CommitMode, CommitOrchestrator, CommitRequest, CommitStats, CommitStatus, CommittedBooking};
use crate::config::ClientConfig;
use crate::error::{translate, ApiError, ClientError};
use crate::executor::{ApiRequest, ApiResponse, HttpExecutor, RequestExecutor};
use crate::guard::SessionRegistry;
use crate::session::{BookingSession, SessionToken};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct BookingClient {
    registry: SessionRegistry,
    executor: Arc<dyn RequestExecutor>,
    orchestrator: CommitOrchestrator,
}

impl BookingClient {
    /// Client talking HTTP to `config.base_url`.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let executor = Arc::new(HttpExecutor::new(&config)?);
        Self::with_executor(config, executor)
    }

    pub fn with_executor(
        config: ClientConfig,
        executor: Arc<dyn RequestExecutor>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let orchestrator = CommitOrchestrator::new(executor.clone(), &config);
        tracing::debug!(base_url = %config.base_url, "booking client ready");
        Ok(Self {
            registry: SessionRegistry::new(),
            executor,
            orchestrator,
        })
    }

    /// Starts building a booking under `token`. Only one session per token may be
    /// open at a time; the slot frees when the session is dropped or closed.
    pub fn open_session(&self, token: impl Into<SessionToken>) -> Result<BookingSession, ApiError> {
        self.registry.open(token.into())
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub async fn commit(
        &self,
        session: &BookingSession,
        request: &CommitRequest,
        mode: CommitMode,
        cancel: CancellationToken,
    ) -> Result<CommittedBooking, ApiError> {
        self.orchestrator.commit(session, request, mode, cancel).await
    }

    pub async fn await_commit(
        &self,
        session: &BookingSession,
        cancel: CancellationToken,
    ) -> Result<CommittedBooking, ApiError> {
        self.orchestrator.await_commit(session, cancel).await
    }

    pub async fn check_status(&self, session: &BookingSession) -> Result<CommitStatus, ApiError> {
        self.orchestrator.check_status(session).await
    }

    /// Sends any other resource call with the session's token attached.
    ///
    /// These calls are not serialized by the commit guard.
    pub async fn execute(
        &self,
        session: &BookingSession,
        request: ApiRequest,
    ) -> Result<ApiResponse, ApiError> {
        self.executor
            .execute(session.token(), request)
            .await
            .map_err(translate)
    }

    pub fn stats(&self) -> CommitStats {
        self.orchestrator.stats()
    }
}
