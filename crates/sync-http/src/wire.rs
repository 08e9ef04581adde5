//! Response decoding and error mapping.

use std::time::Duration;

use reqwest_eventsource::Error as EventSourceError;
use serde::{Deserialize, de::DeserializeOwned};
use sync_core::{ChatError, ChatErrorCategory, classify_http_status};
use sync_platform::AuthError;

/// Longest retry hint honoured from a server response.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60 * 60);

/// Fields shared by every response body, success or failure.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    ok: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    retry_after: Option<f64>,
}

impl Envelope {
    fn server_message(self) -> Option<String> {
        self.error
            .or(self.message)
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty())
    }
}

/// Decode a 2xx body, treating `{ok:false}` as a rejected request.
pub(crate) fn decode_body<T: DeserializeOwned>(operation: &str, body: &[u8]) -> Result<T, ChatError> {
    let envelope: Envelope = serde_json::from_slice(body).unwrap_or_default();
    if envelope.ok == Some(false) {
        let message = envelope
            .server_message()
            .unwrap_or_else(|| format!("{operation} was rejected"));
        return Err(ChatError::new(
            ChatErrorCategory::Config,
            "request_rejected",
            message,
        ));
    }
    serde_json::from_slice(body).map_err(|err| {
        ChatError::new(
            ChatErrorCategory::Serialization,
            "invalid_response",
            format!("{operation} returned an unexpected body: {err}"),
        )
    })
}

/// Build the error for a non-2xx response.
///
/// The retry hint comes from the JSON `retryAfter` seconds, falling back to
/// the `Retry-After` header, and is capped at [`MAX_RETRY_AFTER`].
pub(crate) fn error_from_response(
    status: u16,
    body: &[u8],
    retry_after_header: Option<&str>,
) -> ChatError {
    let category = classify_http_status(status);
    let envelope: Envelope = serde_json::from_slice(body).unwrap_or_default();
    let retry_after = envelope
        .retry_after
        .or_else(|| retry_after_header.and_then(|value| value.trim().parse().ok()))
        .filter(|secs: &f64| secs.is_finite())
        .map(|secs| secs.min(MAX_RETRY_AFTER.as_secs_f64()))
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
    let message = envelope
        .server_message()
        .unwrap_or_else(|| format!("server responded with HTTP {status}"));

    let code = match category {
        ChatErrorCategory::Auth => "unauthorized",
        ChatErrorCategory::RateLimited => "rate_limited",
        ChatErrorCategory::Network if status == 408 => "request_timeout",
        ChatErrorCategory::Network => "server_unavailable",
        ChatErrorCategory::Config => "request_rejected",
        _ => "unexpected_status",
    };

    let mut err = ChatError::new(category, code, message);
    if let Some(hint) = retry_after {
        err = err.with_retry_after(hint);
    }
    err
}

pub(crate) fn map_reqwest_error(operation: &str, err: reqwest::Error) -> ChatError {
    if err.is_timeout() {
        ChatError::new(
            ChatErrorCategory::Network,
            "timeout",
            format!("{operation} timed out: {err}"),
        )
    } else if err.is_decode() {
        ChatError::new(
            ChatErrorCategory::Serialization,
            "invalid_response",
            format!("{operation} body could not be read: {err}"),
        )
    } else if err.is_builder() {
        ChatError::new(
            ChatErrorCategory::Config,
            "invalid_request",
            format!("{operation} could not be built: {err}"),
        )
    } else {
        ChatError::new(
            ChatErrorCategory::Network,
            "network_error",
            format!("{operation} failed: {err}"),
        )
    }
}

/// Errors the event source raises after the push stream is open.
///
/// Status failures are handled while opening, where the body is still readable.
pub(crate) fn map_event_source_error(operation: &str, err: EventSourceError) -> ChatError {
    match err {
        EventSourceError::Transport(err) => map_reqwest_error(operation, err),
        EventSourceError::InvalidStatusCode(status, _) => {
            error_from_response(status.as_u16(), b"", None)
        }
        EventSourceError::InvalidContentType(content_type, _) => ChatError::new(
            ChatErrorCategory::Config,
            "invalid_push_stream",
            format!("{operation} answered with content type {content_type:?}"),
        ),
        EventSourceError::StreamEnded => ChatError::new(
            ChatErrorCategory::Network,
            "push_stream_ended",
            format!("{operation} ended"),
        ),
        other => ChatError::new(
            ChatErrorCategory::Serialization,
            "invalid_push_event",
            format!("{operation} sent an unreadable event: {other}"),
        ),
    }
}

pub(crate) fn map_auth_error(err: AuthError) -> ChatError {
    match err {
        AuthError::SignedOut => ChatError::new(ChatErrorCategory::Auth, "signed_out", err.to_string()),
        AuthError::Unavailable(_) => {
            ChatError::new(ChatErrorCategory::Internal, "token_store_error", err.to_string())
        }
    }
}
