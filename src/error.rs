//! Error types for Smart Inbox.

use std::time::Duration;

use crate::history::HistoryRecord;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Inference timed out after {0:?}")]
    Timeout(Duration),
}

/// Message source (mail fetch transport) errors.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("Authentication failed for {user} on {host}")]
    AuthFailed { host: String, user: String },

    #[error("Protocol error from {host}: {reason}")]
    Protocol { host: String, reason: String },

    #[error("Fetch task aborted: {0}")]
    Aborted(String),

    #[error("Fetch window {0:?} reaches before the earliest representable date")]
    WindowOutOfRange(Duration),
}

/// Digest delivery (notifier transport) errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP delivery via {host} failed: {reason}")]
    SendFailed { host: String, reason: String },
}

/// History store errors.
///
/// A failed write carries the rows that were not persisted so the caller
/// can retry or dump them.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Failed to append {} row(s) to {path}: {reason}", .unwritten.len())]
    WriteFailed {
        path: String,
        reason: String,
        unwritten: Vec<HistoryRecord>,
    },

    #[error("Failed to read history from {path}: {reason}")]
    ReadFailed { path: String, reason: String },
}

impl HistoryError {
    /// Rows that were not written, if this was a write failure.
    pub fn unwritten(&self) -> &[HistoryRecord] {
        match self {
            Self::WriteFailed { unwritten, .. } => unwritten,
            Self::ReadFailed { .. } => &[],
        }
    }
}

/// Run-level pipeline errors. Each variant names the stage that failed.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("fetch stage failed: {0}")]
    Fetch(#[from] SourceError),

    #[error("history stage failed: {0}")]
    History(#[from] HistoryError),
}

impl PipelineError {
    /// Short stage label for logging and exit messages.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::History(_) => "history",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_failure_exposes_unwritten_rows() {
        let err = HistoryError::WriteFailed {
            path: "history.csv".into(),
            reason: "disk full".into(),
            unwritten: vec![],
        };
        assert!(err.unwritten().is_empty());
        assert!(err.to_string().contains("0 row(s)"));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn pipeline_error_names_stage() {
        let err = PipelineError::from(SourceError::AuthFailed {
            host: "imap.test.com".into(),
            user: "me".into(),
        });
        assert_eq!(err.stage(), "fetch");
        assert!(err.to_string().starts_with("fetch stage failed"));
    }
}
