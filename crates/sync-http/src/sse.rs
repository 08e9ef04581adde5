//! Push channel: `reqwest-eventsource` events mapped onto [`PushEvent`].

use futures::{Stream, StreamExt};
use eventsource_stream::Event as MessageEvent;
use reqwest_eventsource::{Error as EventSourceError, Event};
use serde_json::Value;
use sync_core::{PushEvent, PushStream, ThreadId};
use tracing::{debug, trace};

use crate::wire::map_event_source_error;

const DEFAULT_EVENT: &str = "message";

/// Name and payload of one dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl From<MessageEvent> for SseFrame {
    fn from(message: MessageEvent) -> Self {
        Self {
            event: message.event,
            data: message.data,
        }
    }
}

/// Map a frame onto the engine's push vocabulary; unknown events are dropped.
///
/// Frames without an event name are treated as an untagged chat change.
pub fn push_event_from_frame(frame: &SseFrame) -> Option<PushEvent> {
    match frame.event.as_str() {
        "ready" => Some(PushEvent::Ready),
        "heartbeat" => Some(PushEvent::Heartbeat),
        "chat" => Some(PushEvent::Chat {
            thread_id: chat_thread_id(&frame.data),
        }),
        "" | DEFAULT_EVENT => Some(PushEvent::Chat { thread_id: None }),
        other => {
            trace!(event = other, "ignoring unknown push event");
            None
        }
    }
}

fn chat_thread_id(data: &str) -> Option<ThreadId> {
    let payload: Value = serde_json::from_str(data).ok()?;
    let thread_id = match payload.get("threadId")? {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    thread_id.filter(|thread_id| *thread_id > 0)
}

/// Adapt an opened event source into the engine's push stream.
///
/// The source must not retry on its own: it yields at most one error, then
/// ends, and the engine decides when to reconnect.
pub(crate) fn push_stream<S>(source: S) -> PushStream
where
    S: Stream<Item = Result<Event, EventSourceError>> + Send + 'static,
{
    source
        .filter_map(|item| async move {
            match item {
                Ok(Event::Open) => None,
                Ok(Event::Message(message)) => push_event_from_frame(&message.into()).map(Ok),
                Err(EventSourceError::StreamEnded) => {
                    debug!("push stream closed by server");
                    None
                }
                Err(err) => Some(Err(map_event_source_error("push stream", err))),
            }
        })
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: &str, data: &str) -> SseFrame {
        SseFrame {
            event: event.into(),
            data: data.into(),
        }
    }

    #[test]
    fn maps_named_events() {
        assert_eq!(push_event_from_frame(&frame("ready", "{}")), Some(PushEvent::Ready));
        assert_eq!(push_event_from_frame(&frame("heartbeat", "")), Some(PushEvent::Heartbeat));
        assert_eq!(
            push_event_from_frame(&frame("chat", "{\"threadId\":7}")),
            Some(PushEvent::Chat { thread_id: Some(7) })
        );
    }

    #[test]
    fn string_thread_ids_are_accepted() {
        assert_eq!(
            push_event_from_frame(&frame("chat", "{\"threadId\":\" 12 \"}")),
            Some(PushEvent::Chat { thread_id: Some(12) })
        );
    }

    #[test]
    fn unnamed_event_is_untagged_chat() {
        for name in ["message", ""] {
            assert_eq!(
                push_event_from_frame(&frame(name, "{\"threadId\":3}")),
                Some(PushEvent::Chat { thread_id: None }),
                "event name {name:?}"
            );
        }
    }

    #[test]
    fn malformed_chat_payload_has_no_thread() {
        for data in ["not json", "{}", "{\"threadId\":null}", "{\"threadId\":0}", "{\"threadId\":-4}"] {
            assert_eq!(
                push_event_from_frame(&frame("chat", data)),
                Some(PushEvent::Chat { thread_id: None }),
                "payload {data}"
            );
        }
    }

    #[test]
    fn unknown_events_are_dropped() {
        assert_eq!(push_event_from_frame(&frame("typing", "x")), None);
    }
}
