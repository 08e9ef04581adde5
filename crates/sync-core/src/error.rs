use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::RealtimeState;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorCategory {
    /// Rejected client-side before any request (for example over-length content).
    Validation,
    /// Missing or rejected access token.
    Auth,
    /// Timeout, abort, or other transient transport failure.
    Network,
    /// Rejected by server rate limiting.
    RateLimited,
    /// Response body could not be decoded.
    Serialization,
    /// Request rejected as invalid by the server, or bad local configuration.
    Config,
    /// Internal invariant break.
    Internal,
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    /// High-level error category.
    pub category: ChatErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl ChatError {
    /// Construct a new error.
    pub fn new(
        category: ChatErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ChatErrorCategory::Validation, code, message)
    }

    /// Timeout raised by the transport deadline wrapper.
    pub fn timeout(operation: &str, after: Duration) -> Self {
        Self::new(
            ChatErrorCategory::Network,
            "timeout",
            format!("{operation} timed out after {} ms", after.as_millis()),
        )
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: RealtimeState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChatErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while realtime channel is {current:?}"),
        )
    }

    pub fn no_thread_selected() -> Self {
        Self::new(
            ChatErrorCategory::Validation,
            "no_thread_selected",
            "no thread is open",
        )
    }

    pub fn disposed() -> Self {
        Self::new(
            ChatErrorCategory::Internal,
            "engine_disposed",
            "sync engine was disposed",
        )
    }

    /// Retry hint rounded up to whole seconds (at least one).
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after_ms.map(|ms| ms.div_ceil(1_000).max(1))
    }

    /// Text shown to the user when this error is surfaced.
    pub fn user_message(&self) -> String {
        match self.category {
            ChatErrorCategory::RateLimited => match self.retry_after_secs() {
                Some(secs) => format!(
                    "You are sending messages too quickly. Please wait {secs} seconds and try again."
                ),
                None => "You are sending messages too quickly. Please try again shortly.".to_owned(),
            },
            ChatErrorCategory::Auth => "Please sign in to use messages.".to_owned(),
            ChatErrorCategory::Validation => self.message.clone(),
            ChatErrorCategory::Network => {
                "Network problem. Check your connection and try again.".to_owned()
            }
            ChatErrorCategory::Config => {
                if self.message.is_empty() {
                    "The request was rejected.".to_owned()
                } else {
                    self.message.clone()
                }
            }
            ChatErrorCategory::Serialization | ChatErrorCategory::Internal => {
                "Something went wrong. Please try again.".to_owned()
            }
        }
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> ChatErrorCategory {
    match status {
        401 | 403 => ChatErrorCategory::Auth,
        429 => ChatErrorCategory::RateLimited,
        408 => ChatErrorCategory::Network,
        400..=499 => ChatErrorCategory::Config,
        500..=599 => ChatErrorCategory::Network,
        _ => ChatErrorCategory::Internal,
    }
}
