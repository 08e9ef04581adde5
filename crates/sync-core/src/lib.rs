//! Client-side synchronization engine for two-party chat threads.
//!
//! This crate owns the message store and its merge rules, cursor pagination,
//! optimistic sends, the per-thread view cache, scroll anchoring and push
//! routing. The server is reached through the [`ChatTransport`] seam.

/// Async command/event channel primitives.
pub mod channel;
/// Engine tunables.
pub mod config;
/// Trailing-edge debounce timer.
pub mod debounce;
/// The engine that ties every component together.
pub mod engine;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Event normalization helpers (send acknowledgements, background errors).
pub mod normalization;
/// Optimistic send helpers.
pub mod outbox;
/// Cursor pagination state and viewport probing.
pub mod pagination;
/// Push channel state and refresh routing.
pub mod realtime;
/// Pending/confirmed reconciliation.
pub mod reconcile;
/// Backoff policy used by the push reconnect loop.
pub mod retry;
/// Command queue runtime around the engine.
pub mod runtime;
/// Scroll position preservation across re-renders.
pub mod scroll;
/// Message merge and ordering.
pub mod store;
/// Conversation list ordering.
pub mod thread_list;
/// Server seam.
pub mod transport;
/// Wire and protocol types (messages, threads, commands, events).
pub mod types;
/// LRU of per-thread views.
pub mod view_cache;

pub use channel::{EventBus, EventStream, SyncChannelError};
pub use config::SyncConfig;
pub use debounce::{DebounceHandle, Debouncer};
pub use engine::SyncEngine;
pub use error::{ChatError, ChatErrorCategory, classify_http_status};
pub use normalization::{SendOutcome, normalize_error, normalize_send_outcome};
pub use pagination::{AlwaysScrollable, FixedRowViewport, PageCursor, ViewportProbe};
pub use realtime::{RealtimeStateMachine, RefreshPlan, route_push, should_poll};
pub use retry::RetryPolicy;
pub use runtime::{SyncHandle, spawn_runtime};
pub use scroll::{NEAR_BOTTOM_PX, RowLayout, ScrollAnchor, ScrollViewport, apply_anchor, compute_anchor};
pub use store::{MessageStore, merge_messages};
pub use transport::{ChatTransport, PushStream, with_deadline};
pub use types::{
    CreateThreadResponse, LoadOutcome, Message, MessageId, MessageKey, MessagePage, MessageQuery,
    PushEvent, RealtimeState, SelectOutcome, SendAck, SendMessageResponse, SyncCommand, SyncEvent,
    Thread, ThreadId, ThreadListResponse, ThreadUser, UserId,
};
pub use view_cache::{ThreadViewCache, ThreadViewSnapshot};
