use std::time::Duration;

use crate::{
    outbox::MAX_MESSAGE_CHARS,
    pagination::{INITIAL_LIMIT, LATEST_LIMIT, MAX_BACKFILL_ROUNDS, OLDER_LIMIT},
    realtime::{MESSAGE_POLL_INTERVAL, PUSH_DEBOUNCE, THREAD_LIST_POLL_INTERVAL},
    reconcile::RECONCILE_WINDOW_MS,
    retry::RetryPolicy,
    scroll::NEAR_BOTTOM_PX,
    types::UserId,
    view_cache::THREAD_VIEW_CACHE_LIMIT,
};

const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_THREAD_LIST_TIMEOUT: Duration = Duration::from_secs(12);
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Tunables for one [`crate::SyncEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Signed-in user; author of optimistic messages.
    pub self_user_id: UserId,
    pub initial_limit: u16,
    pub older_limit: u16,
    pub latest_limit: u16,
    pub max_backfill_rounds: u32,
    /// Deadline for message window fetches and sends.
    pub message_timeout: Duration,
    /// Deadline for thread list fetches and thread creation.
    pub thread_list_timeout: Duration,
    pub push_debounce: Duration,
    pub thread_list_poll: Duration,
    pub message_poll: Duration,
    pub max_message_chars: usize,
    /// Heuristic reconciliation window in milliseconds.
    pub reconcile_window_ms: i64,
    pub view_cache_limit: usize,
    /// Distance from the bottom under which the reader counts as pinned.
    pub near_bottom_px: f64,
    /// Backoff between push reconnect attempts.
    pub reconnect: RetryPolicy,
    /// Capacity of the broadcast event channel.
    pub event_buffer: usize,
}

impl SyncConfig {
    pub fn new(self_user_id: UserId) -> Self {
        Self {
            self_user_id,
            initial_limit: INITIAL_LIMIT,
            older_limit: OLDER_LIMIT,
            latest_limit: LATEST_LIMIT,
            max_backfill_rounds: MAX_BACKFILL_ROUNDS,
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
            thread_list_timeout: DEFAULT_THREAD_LIST_TIMEOUT,
            push_debounce: PUSH_DEBOUNCE,
            thread_list_poll: THREAD_LIST_POLL_INTERVAL,
            message_poll: MESSAGE_POLL_INTERVAL,
            max_message_chars: MAX_MESSAGE_CHARS,
            reconcile_window_ms: RECONCILE_WINDOW_MS,
            view_cache_limit: THREAD_VIEW_CACHE_LIMIT,
            near_bottom_px: NEAR_BOTTOM_PX,
            reconnect: RetryPolicy::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = SyncConfig::new(9);
        assert_eq!(config.initial_limit, 10);
        assert_eq!(config.older_limit, 25);
        assert_eq!(config.max_backfill_rounds, 4);
        assert_eq!(config.message_timeout, Duration::from_secs(10));
        assert_eq!(config.thread_list_timeout, Duration::from_secs(12));
        assert_eq!(config.push_debounce, Duration::from_millis(220));
        assert_eq!(config.thread_list_poll, Duration::from_secs(20));
        assert_eq!(config.message_poll, Duration::from_secs(12));
        assert_eq!(config.max_message_chars, 300);
        assert_eq!(config.reconcile_window_ms, 25_000);
        assert_eq!(config.view_cache_limit, 36);
        assert_eq!(config.reconnect, RetryPolicy::new(1_000, 30_000));
    }
}
