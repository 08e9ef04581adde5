use std::time::Duration;

use crate::{
    error::ChatError,
    types::{PushEvent, RealtimeState, ThreadId},
};

/// Coalescing delay for push-triggered refreshes.
pub const PUSH_DEBOUNCE: Duration = Duration::from_millis(220);
/// Thread-list poll period while push is unavailable.
pub const THREAD_LIST_POLL_INTERVAL: Duration = Duration::from_secs(20);
/// Open-thread poll period while push is unavailable.
pub const MESSAGE_POLL_INTERVAL: Duration = Duration::from_secs(12);

/// Connection state of the push channel.
///
/// Reconnection itself belongs to the push task; this only tracks whether
/// polling may be suppressed.
#[derive(Debug, Clone, Default)]
pub struct RealtimeStateMachine {
    state: RealtimeState,
}

impl RealtimeStateMachine {
    pub fn state(&self) -> RealtimeState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == RealtimeState::Connected
    }

    /// `Disconnected -> Connecting`.
    pub fn begin_connect(&mut self) -> Result<Option<RealtimeState>, ChatError> {
        self.transition_from(&[RealtimeState::Disconnected], RealtimeState::Connecting, "begin_connect")
    }

    /// `Connecting -> Connected` once the stream is open.
    pub fn on_open(&mut self) -> Result<Option<RealtimeState>, ChatError> {
        self.transition_from(&[RealtimeState::Connecting], RealtimeState::Connected, "on_open")
    }

    /// `ready` event; idempotent while connected.
    pub fn on_ready(&mut self) -> Result<Option<RealtimeState>, ChatError> {
        self.transition_from(
            &[RealtimeState::Connecting, RealtimeState::Connected],
            RealtimeState::Connected,
            "on_ready",
        )
    }

    /// Stream error, end, or teardown; valid from any state.
    pub fn on_disconnect(&mut self) -> Option<RealtimeState> {
        self.set(RealtimeState::Disconnected)
    }

    fn transition_from(
        &mut self,
        expected: &[RealtimeState],
        next: RealtimeState,
        action: &str,
    ) -> Result<Option<RealtimeState>, ChatError> {
        if !expected.contains(&self.state) {
            return Err(ChatError::invalid_state(self.state, action));
        }
        Ok(self.set(next))
    }

    fn set(&mut self, next: RealtimeState) -> Option<RealtimeState> {
        if self.state == next {
            return None;
        }
        self.state = next;
        Some(next)
    }
}

/// Which refreshes a trigger asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshPlan {
    pub thread_list: bool,
    pub open_thread: bool,
}

impl RefreshPlan {
    pub const NONE: Self = Self {
        thread_list: false,
        open_thread: false,
    };

    pub const BOTH: Self = Self {
        thread_list: true,
        open_thread: true,
    };

    pub const THREAD_LIST: Self = Self {
        thread_list: true,
        open_thread: false,
    };

    pub fn merge(self, other: Self) -> Self {
        Self {
            thread_list: self.thread_list || other.thread_list,
            open_thread: self.open_thread || other.open_thread,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.thread_list && !self.open_thread
    }
}

/// Decide what a push event should refresh.
///
/// A change in the open thread refreshes its newest window (and the list, for
/// the preview); a change elsewhere only refreshes the list; an untagged or
/// malformed chat event refreshes both.
pub fn route_push(event: &PushEvent, open_thread: Option<ThreadId>) -> RefreshPlan {
    match event {
        PushEvent::Ready | PushEvent::Heartbeat => RefreshPlan::NONE,
        PushEvent::Chat {
            thread_id: Some(thread_id),
        } => {
            if open_thread == Some(*thread_id) {
                RefreshPlan::BOTH
            } else {
                RefreshPlan::THREAD_LIST
            }
        }
        PushEvent::Chat { thread_id: None } => RefreshPlan::BOTH,
    }
}

/// Polling runs only as a fallback: visible tab and no live push channel.
pub fn should_poll(visible: bool, realtime: RealtimeState) -> bool {
    visible && realtime != RealtimeState::Connected
}
