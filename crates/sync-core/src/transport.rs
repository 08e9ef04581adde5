use std::{future::Future, time::Duration};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    error::ChatError,
    types::{MessagePage, MessageQuery, Message, PushEvent, Thread, ThreadId, UserId},
};

/// Push events as delivered by one open stream. The stream ends on disconnect.
pub type PushStream = BoxStream<'static, Result<PushEvent, ChatError>>;

/// Server seam used by the engine.
///
/// Implementations map HTTP and decoding failures into [`ChatError`] and do
/// not retry on their own.
#[async_trait]
pub trait ChatTransport: Send + Sync + 'static {
    /// `GET /threads`.
    async fn list_threads(&self) -> Result<Vec<Thread>, ChatError>;

    /// `POST /threads`; returns the new or existing thread id.
    async fn create_thread(&self, target_user_id: UserId) -> Result<ThreadId, ChatError>;

    /// `GET /threads/:id/messages`.
    async fn fetch_messages(
        &self,
        thread_id: ThreadId,
        query: MessageQuery,
    ) -> Result<MessagePage, ChatError>;

    /// `POST /threads/:id/messages`; returns the confirmed row.
    async fn send_message(
        &self,
        thread_id: ThreadId,
        content: &str,
        request_id: &str,
    ) -> Result<Message, ChatError>;

    /// Open the `/stream` push channel.
    async fn open_push(&self) -> Result<PushStream, ChatError>;
}

/// Bound `fut` by `limit`; the request is dropped when the deadline passes.
pub async fn with_deadline<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T, ChatError>
where
    F: Future<Output = Result<T, ChatError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ChatError::timeout(operation, limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatErrorCategory;

    #[tokio::test(start_paused = true)]
    async fn deadline_maps_to_network_timeout() {
        let err = with_deadline(Duration::from_secs(10), "fetch_messages", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ChatError>(())
        })
        .await
        .expect_err("slow call should time out");

        assert_eq!(err.category, ChatErrorCategory::Network);
        assert_eq!(err.code, "timeout");
    }

    #[tokio::test]
    async fn deadline_passes_through_result() {
        let value = with_deadline(Duration::from_secs(1), "noop", async { Ok::<_, ChatError>(3) })
            .await
            .expect("fast call should succeed");
        assert_eq!(value, 3);
    }
}
