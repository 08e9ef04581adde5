//! Optimistic send helpers: validation, idempotency keys, pending rows.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use crate::{
    error::ChatError,
    store::next_local_seq,
    types::{Message, ThreadId, UserId},
};

/// Longest accepted thread message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 300;

/// Trim and length-check outgoing content before any request is made.
pub fn validate_content(content: &str, max_chars: usize) -> Result<String, ChatError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ChatError::validation(
            "empty_message",
            "Type a message before sending.",
        ));
    }
    let length = trimmed.chars().count();
    if length > max_chars {
        return Err(ChatError::validation(
            "message_too_long",
            format!("Messages can be at most {max_chars} characters ({length} entered)."),
        ));
    }
    Ok(trimmed.to_owned())
}

/// Fresh client idempotency key.
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Build the optimistic row shown until the server confirms.
pub fn pending_message(
    thread_id: ThreadId,
    sender_user_id: UserId,
    content: String,
    created_at: i64,
    local_request_id: String,
) -> Message {
    Message {
        id: 0,
        thread_id,
        sender_user_id,
        content,
        created_at,
        pending: true,
        local_request_id,
        local_seq: next_local_seq(),
    }
}

/// Wall clock in milliseconds since Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
