use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use reqwest::{Client, RequestBuilder, Response, header};
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource, retry::Never};
use serde::{Serialize, de::DeserializeOwned};
use sync_core::{
    ChatError, ChatErrorCategory, ChatTransport, CreateThreadResponse, Message, MessagePage,
    MessageQuery, PushStream, SendMessageResponse, Thread, ThreadId, ThreadListResponse, UserId,
};
use sync_platform::AccessTokenProvider;
use tracing::{debug, warn};
use url::Url;

use crate::{
    sse::{push_event_from_frame, push_stream},
    wire::{
        decode_body, error_from_response, map_auth_error, map_event_source_error,
        map_reqwest_error,
    },
};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateThreadBody {
    target_user_id: UserId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody<'a> {
    content: &'a str,
    request_id: &'a str,
}

/// [`ChatTransport`] over the messages HTTP API.
///
/// Every request carries the bearer token from `auth`. A missing or rejected
/// token asks the provider for a fresh sign-in before the error is returned.
pub struct HttpTransport<P> {
    http: Client,
    base: Url,
    auth: P,
}

impl<P: AccessTokenProvider> HttpTransport<P> {
    /// `base_url` is the messages API root, e.g. `https://host/api/messages`.
    pub fn new(base_url: &str, auth: P) -> Result<Self, ChatError> {
        let http = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|err| map_reqwest_error("http client setup", err))?;
        Self::with_client(http, base_url, auth)
    }

    pub fn with_client(http: Client, base_url: &str, auth: P) -> Result<Self, ChatError> {
        let mut base = Url::parse(base_url).map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Config,
                "invalid_base_url",
                format!("invalid messages base url `{base_url}`: {err}"),
            )
        })?;
        if base.cannot_be_a_base() {
            return Err(ChatError::new(
                ChatErrorCategory::Config,
                "invalid_base_url",
                format!("messages base url `{base_url}` cannot carry a path"),
            ));
        }
        // Url::join drops the last segment unless the path ends in a slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self { http, base, auth })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChatError> {
        self.base.join(path).map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Config,
                "invalid_endpoint",
                format!("cannot build `{path}` endpoint: {err}"),
            )
        })
    }

    pub fn threads_url(&self) -> Result<Url, ChatError> {
        let mut url = self.endpoint("threads")?;
        url.query_pairs_mut().append_pair("format", "json");
        Ok(url)
    }

    pub fn messages_url(&self, thread_id: ThreadId, query: MessageQuery) -> Result<Url, ChatError> {
        let mut url = self.endpoint(&format!("threads/{thread_id}/messages"))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("limit", &query.limit.to_string());
            if let Some(before_id) = query.before_id {
                pairs.append_pair("beforeId", &before_id.to_string());
            }
            if query.mark_read {
                pairs.append_pair("markRead", "1");
            }
        }
        Ok(url)
    }

    pub fn stream_url(&self) -> Result<Url, ChatError> {
        self.endpoint("stream")
    }

    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, ChatError> {
        match self.auth.access_token() {
            Ok(token) => Ok(request.bearer_auth(token)),
            Err(err) => {
                let err = map_auth_error(err);
                if err.category == ChatErrorCategory::Auth {
                    self.auth.request_sign_in();
                }
                Err(err)
            }
        }
    }

    /// Send `request` and return the response when its status is 2xx.
    async fn dispatch(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<Response, ChatError> {
        let response = self
            .authorize(request)?
            .send()
            .await
            .map_err(|err| map_reqwest_error(operation, err))?;

        if response.status().is_success() {
            return Ok(response);
        }
        Err(self.failure(operation, response).await)
    }

    /// Turn a non-2xx response into an error, asking for sign-in on auth failures.
    async fn failure(&self, operation: &str, response: Response) -> ChatError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await.unwrap_or_default();
        let err = error_from_response(status.as_u16(), &body, retry_after.as_deref());
        warn!(
            operation,
            status = status.as_u16(),
            code = %err.code,
            "chat request failed"
        );
        if err.category == ChatErrorCategory::Auth {
            self.auth.request_sign_in();
        }
        err
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<T, ChatError> {
        let response = self.dispatch(operation, request).await?;
        let body = response
            .bytes()
            .await
            .map_err(|err| map_reqwest_error(operation, err))?;
        decode_body(operation, &body)
    }
}

#[async_trait]
impl<P: AccessTokenProvider + 'static> ChatTransport for HttpTransport<P> {
    async fn list_threads(&self) -> Result<Vec<Thread>, ChatError> {
        let url = self.threads_url()?;
        let response: ThreadListResponse = self.execute("list_threads", self.http.get(url)).await?;
        debug!(count = response.threads.len(), "fetched thread list");
        Ok(response.threads)
    }

    async fn create_thread(&self, target_user_id: UserId) -> Result<ThreadId, ChatError> {
        let url = self.endpoint("threads")?;
        let request = self.http.post(url).json(&CreateThreadBody { target_user_id });
        let response: CreateThreadResponse = self.execute("create_thread", request).await?;
        Ok(response.thread_id)
    }

    async fn fetch_messages(
        &self,
        thread_id: ThreadId,
        query: MessageQuery,
    ) -> Result<MessagePage, ChatError> {
        let url = self.messages_url(thread_id, query)?;
        self.execute("fetch_messages", self.http.get(url)).await
    }

    async fn send_message(
        &self,
        thread_id: ThreadId,
        content: &str,
        request_id: &str,
    ) -> Result<Message, ChatError> {
        let url = self.endpoint(&format!("threads/{thread_id}/messages"))?;
        let request = self.http.post(url).json(&SendMessageBody {
            content,
            request_id,
        });
        let response: SendMessageResponse = self.execute("send_message", request).await?;
        Ok(response.message)
    }

    async fn open_push(&self) -> Result<PushStream, ChatError> {
        let url = self.stream_url()?;
        let request = self.authorize(
            self.http
                .get(url)
                .header(header::ACCEPT, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache"),
        )?;
        let mut source = EventSource::new(request).map_err(|err| {
            ChatError::new(
                ChatErrorCategory::Config,
                "invalid_request",
                format!("open_push request cannot be replayed: {err}"),
            )
        })?;
        // Reconnects belong to the engine's retry policy.
        source.set_retry_policy(Box::new(Never));
        let mut source = Box::pin(source);

        let first = match source.next().await {
            Some(Ok(Event::Open)) => None,
            Some(Ok(Event::Message(message))) => push_event_from_frame(&message.into()),
            Some(Err(EventSourceError::InvalidStatusCode(_, response))) => {
                return Err(self.failure("open_push", response).await);
            }
            Some(Err(err)) => return Err(map_event_source_error("open_push", err)),
            None => {
                return Err(map_event_source_error("open_push", EventSourceError::StreamEnded));
            }
        };
        debug!("push stream opened");

        let events = stream::iter(first.map(Ok)).chain(push_stream(source));
        Ok(events.boxed())
    }
}

#[cfg(test)]
mod tests {
    use sync_platform::StaticToken;

    use super::*;

    fn transport(base: &str) -> HttpTransport<StaticToken> {
        HttpTransport::new(base, StaticToken("t".into())).expect("base url should parse")
    }

    #[test]
    fn keeps_base_path_when_joining() {
        let transport = transport("https://chat.example.com/api/messages");

        assert_eq!(
            transport.threads_url().expect("threads url").as_str(),
            "https://chat.example.com/api/messages/threads?format=json"
        );
        assert_eq!(
            transport.stream_url().expect("stream url").as_str(),
            "https://chat.example.com/api/messages/stream"
        );
    }

    #[test]
    fn builds_message_window_queries() {
        let transport = transport("https://chat.example.com/api/messages/");

        let newest = transport
            .messages_url(7, MessageQuery::newest(30, true))
            .expect("newest url");
        assert_eq!(
            newest.as_str(),
            "https://chat.example.com/api/messages/threads/7/messages?limit=30&markRead=1"
        );

        let older = transport
            .messages_url(7, MessageQuery::before(120, 30))
            .expect("older url");
        assert_eq!(
            older.as_str(),
            "https://chat.example.com/api/messages/threads/7/messages?limit=30&beforeId=120"
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        for base in ["not a url", "mailto:someone@example.com"] {
            let err = HttpTransport::new(base, StaticToken("t".into()))
                .err()
                .expect("base should be rejected");
            assert_eq!(err.code, "invalid_base_url", "base {base}");
        }
    }

    #[test]
    fn request_bodies_use_camel_case() {
        let body = serde_json::to_value(SendMessageBody {
            content: "hi",
            request_id: "r-1",
        })
        .expect("body serializes");
        assert_eq!(body, serde_json::json!({"content": "hi", "requestId": "r-1"}));

        let body = serde_json::to_value(CreateThreadBody { target_user_id: 9 })
            .expect("body serializes");
        assert_eq!(body, serde_json::json!({"targetUserId": 9}));
    }
}
