// Error taxonomy and the translator every failure goes through before reaching a caller

use crate::session::{CommitState, SessionToken};
use crate::validation::Violation;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// A failure as it was observed, before translation.
#[derive(Error, Debug)]
pub enum Failure {
    #[error("transport error: {0}")]
    Transport(String),

    // The request could not be built (bad header name or value); sending it again cannot help
    #[error("malformed request: {0}")]
    Request(String),

    #[error("upstream returned {status}")]
    Status { status: u16, body: String },

    #[error("{} validation violation(s)", .0.len())]
    Invalid(Vec<Violation>),

    #[error("commit outstanding in state {0}")]
    Busy(CommitState),

    #[error("no parked commit to resume in state {0}")]
    NotPending(CommitState),

    #[error("session already open for token {}", .0.redacted())]
    DuplicateSession(SessionToken),

    #[error("cancelled")]
    Cancelled,

    #[error("undecodable payload: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for Failure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            Failure::Request(err.to_string())
        } else {
            Failure::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    InvalidRequest,
    Api,
    Transient,
    Cancelled,
    Decode,
}

// Unified error returned by every client operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Validation failed: {}", format_violations(.violations))]
    Validation { violations: Vec<Violation> },

    // `state` is the commit state that blocked the call, when a session was involved
    #[error("Conflict: {message}")]
    Conflict {
        state: Option<CommitState>,
        message: String,
    },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("API error: {status} - {message}")]
    Rejected { status: u16, message: String },

    #[error("Transient error: {message}")]
    Transient { status: Option<u16>, message: String },

    #[error("Commit polling cancelled; the commit may still complete upstream")]
    Cancelled,

    #[error("Unreadable response: {message}")]
    Decode { message: String },
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Validation { .. } => ErrorKind::Validation,
            ApiError::Conflict { .. } => ErrorKind::Conflict,
            ApiError::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            ApiError::Rejected { .. } => ErrorKind::Api,
            ApiError::Transient { .. } => ErrorKind::Transient,
            ApiError::Cancelled => ErrorKind::Cancelled,
            ApiError::Decode { .. } => ErrorKind::Decode,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            ApiError::Rejected { status, .. } => Some(*status),
            ApiError::Transient { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transient { .. })
    }

    pub fn conflict_state(&self) -> Option<CommitState> {
        match self {
            ApiError::Conflict { state, .. } => *state,
            _ => None,
        }
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            ApiError::Validation { violations } => violations,
            _ => &[],
        }
    }
}

// Configuration and setup failures, never returned from booking operations
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization error: {0}")]
    Init(String),
}

/// Maps any failure onto the unified error shape.
pub fn translate(failure: Failure) -> ApiError {
    match failure {
        Failure::Transport(message) => ApiError::Transient {
            status: None,
            message,
        },
        Failure::Status { status, body } => {
            let message = upstream_message(status, &body);
            if status >= 500 {
                ApiError::Transient {
                    status: Some(status),
                    message,
                }
            } else {
                ApiError::Rejected { status, message }
            }
        }
        Failure::Invalid(violations) => ApiError::Validation { violations },
        Failure::Request(message) => ApiError::InvalidRequest { message },
        Failure::Busy(state) => ApiError::Conflict {
            state: Some(state),
            message: format!("a commit is already outstanding (state {})", state),
        },
        Failure::NotPending(state) => ApiError::Conflict {
            state: Some(state),
            message: format!("no parked commit to resume (state {})", state),
        },
        Failure::DuplicateSession(token) => ApiError::Conflict {
            state: None,
            message: format!("a booking session is already open for {}", token.redacted()),
        },
        Failure::Cancelled => ApiError::Cancelled,
        Failure::Decode(message) => ApiError::Decode { message },
    }
}

// Pulls a readable message out of an upstream error body, falling back to the raw text
fn upstream_message(status: u16, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if let Some(message) = error_list_message(&json) {
            return message;
        }
        if let Some(message) = json.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("unknown error")
        .to_string()
}

pub(crate) fn error_list_message(json: &Value) -> Option<String> {
    let errors = json.get("errors")?.as_array()?;
    let messages: Vec<String> = errors
        .iter()
        .filter_map(|e| {
            let message = e.get("message").and_then(Value::as_str)?;
            Some(match e.get("code").and_then(Value::as_str) {
                Some(code) => format!("[{}] {}", code, message),
                None => message.to_string(),
            })
        })
        .collect();
    (!messages.is_empty()).then(|| messages.join("; "))
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
