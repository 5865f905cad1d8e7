// Client library for the DCS booking session protocol

pub mod client;
pub mod commit;
pub mod config;
pub mod error;
pub mod executor;
pub mod guard;
pub mod session;
pub mod validation;

// Re-export key types for convenience
pub use client::BookingClient;
pub use commit::{
    BookingComment, CommitMode, CommitOrchestrator, CommitRequest, CommitStats, CommitStatus,
    CommittedBooking, HoldOptions,
};
pub use config::{ClientConfig, Endpoints, PollConfig, RetryConfig};
pub use error::{translate, ApiError, ClientError, ErrorKind, Failure};
pub use executor::{ApiRequest, ApiResponse, HttpExecutor, Method, RequestExecutor};
pub use guard::{begin_commit, resume, CommitLease, SessionRegistry};
pub use session::{BookingSession, CommitState, SessionToken};
pub use tokio_util::sync::CancellationToken;
pub use validation::{validate, CrossRule, Rule, RuleKind, Ruleset, ValidationResult, Violation};
