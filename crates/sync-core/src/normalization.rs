use crate::{
    error::ChatError,
    types::{Message, SendAck, SyncEvent, ThreadId},
};

/// Send result before it is turned into an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Server confirmed the message.
    Confirmed { message: Message },
    /// Send failed; the pending entry was rolled back.
    Failed { error: ChatError },
}

/// Convert a send outcome to a stable `SyncEvent::SendAck`.
pub fn normalize_send_outcome(
    local_request_id: impl Into<String>,
    thread_id: ThreadId,
    outcome: SendOutcome,
) -> SyncEvent {
    let local_request_id = local_request_id.into();
    match outcome {
        SendOutcome::Confirmed { message } => SyncEvent::SendAck(SendAck {
            local_request_id,
            thread_id,
            message_id: Some(message.id),
            error_code: None,
            error_text: None,
        }),
        SendOutcome::Failed { error } => SyncEvent::SendAck(SendAck {
            local_request_id,
            thread_id,
            message_id: None,
            error_text: Some(error.user_message()),
            error_code: Some(error.code),
        }),
    }
}

/// Convert a background failure into a `SyncEvent::Error`.
pub fn normalize_error(error: &ChatError) -> SyncEvent {
    SyncEvent::Error {
        code: error.code.clone(),
        message: error.message.clone(),
        user_message: error.user_message(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::ChatErrorCategory;

    #[test]
    fn maps_confirmation_to_send_ack() {
        let message = Message {
            id: 501,
            thread_id: 7,
            sender_user_id: 1,
            content: "hi".into(),
            created_at: 1,
            pending: false,
            local_request_id: "r-1".into(),
            local_seq: 0,
        };
        let event = normalize_send_outcome("r-1", 7, SendOutcome::Confirmed { message });

        match event {
            SyncEvent::SendAck(ack) => {
                assert_eq!(ack.local_request_id, "r-1");
                assert_eq!(ack.message_id, Some(501));
                assert_eq!(ack.error_code, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn maps_rate_limit_to_ack_with_wait_hint() {
        let error = ChatError::new(ChatErrorCategory::RateLimited, "rate_limited", "slow down")
            .with_retry_after(Duration::from_secs(8));
        let event = normalize_send_outcome("r-2", 7, SendOutcome::Failed { error });

        match event {
            SyncEvent::SendAck(ack) => {
                assert_eq!(ack.message_id, None);
                assert_eq!(ack.error_code.as_deref(), Some("rate_limited"));
                assert!(ack.error_text.expect("failure text").contains('8'));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
