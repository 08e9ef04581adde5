use crate::types::{Message, MessageId, MessagePage, MessageQuery};

/// Rows requested when a thread is first opened.
pub const INITIAL_LIMIT: u16 = 10;
/// Rows requested per older-history page.
pub const OLDER_LIMIT: u16 = 25;
/// Rows requested by latest-window refreshes.
pub const LATEST_LIMIT: u16 = 25;
/// Upper bound of automatic backfill rounds after a render.
pub const MAX_BACKFILL_ROUNDS: u32 = 4;
/// Hard cap accepted by the messages endpoint.
pub const SERVER_LIMIT_CAP: u16 = 100;

/// Clamp a requested page size against safety and server caps.
///
/// The result is always in `1..=100`.
pub fn bounded_limit(requested: u16, server_cap: u16) -> u16 {
    requested.max(1).min(server_cap.max(1)).min(SERVER_LIMIT_CAP)
}

/// Backward pagination state of the open thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCursor {
    /// Server reported more history before the oldest loaded row.
    pub has_older: bool,
    /// Exclusive upper bound for the next older page.
    pub oldest_loaded_id: Option<MessageId>,
}

impl PageCursor {
    /// Cursor after the initial window.
    pub fn from_initial(page: &MessagePage, store_oldest: Option<MessageId>) -> Self {
        let oldest_loaded_id = store_oldest.or(page.next_before_id);
        Self {
            has_older: page.has_more && oldest_loaded_id.is_some(),
            oldest_loaded_id,
        }
    }

    /// Advance after an older page was merged at the head.
    pub fn advance_older(&mut self, page: &MessagePage, store_oldest: Option<MessageId>) {
        self.has_older = page.has_more && !page.messages.is_empty();
        self.oldest_loaded_id = min_id(store_oldest, self.oldest_loaded_id);
    }

    /// Fill in a cursor for a thread whose first rows arrived via a refresh.
    pub fn seed_if_empty(&mut self, store_oldest: Option<MessageId>) {
        if self.oldest_loaded_id.is_none() {
            self.oldest_loaded_id = store_oldest;
        }
    }

    /// Query for the next older page, if one is owed.
    pub fn older_query(&self, limit: u16) -> Option<MessageQuery> {
        if !self.has_older {
            return None;
        }
        self.oldest_loaded_id
            .map(|before_id| MessageQuery::before(before_id, limit))
    }
}

fn min_id(a: Option<MessageId>, b: Option<MessageId>) -> Option<MessageId> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Single-flight guards, scoped to the selection token that started them.
#[derive(Debug, Default, Clone)]
pub struct LoadFlags {
    initial: Option<u64>,
    older: Option<u64>,
}

impl LoadFlags {
    pub fn try_begin_initial(&mut self, token: u64) -> bool {
        try_begin(&mut self.initial, token)
    }

    pub fn finish_initial(&mut self, token: u64) {
        finish(&mut self.initial, token);
    }

    pub fn try_begin_older(&mut self, token: u64) -> bool {
        try_begin(&mut self.older, token)
    }

    pub fn finish_older(&mut self, token: u64) {
        finish(&mut self.older, token);
    }
}

fn try_begin(slot: &mut Option<u64>, token: u64) -> bool {
    if *slot == Some(token) {
        return false;
    }
    *slot = Some(token);
    true
}

fn finish(slot: &mut Option<u64>, token: u64) {
    if *slot == Some(token) {
        *slot = None;
    }
}

/// Answers whether the rendered list currently overflows the viewport.
pub trait ViewportProbe: Send + Sync {
    fn has_scrollable_overflow(&self, rendered: &[Message]) -> bool;
}

impl<F> ViewportProbe for F
where
    F: Fn(&[Message]) -> bool + Send + Sync,
{
    fn has_scrollable_overflow(&self, rendered: &[Message]) -> bool {
        self(rendered)
    }
}

/// Probe for headless clients: always reports a scrollbar, so no auto-backfill.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysScrollable;

impl ViewportProbe for AlwaysScrollable {
    fn has_scrollable_overflow(&self, _rendered: &[Message]) -> bool {
        true
    }
}

/// Probe that assumes every row has the same height.
#[derive(Debug, Clone, Copy)]
pub struct FixedRowViewport {
    /// Rows that fit without scrolling.
    pub visible_rows: usize,
}

impl ViewportProbe for FixedRowViewport {
    fn has_scrollable_overflow(&self, rendered: &[Message]) -> bool {
        rendered.len() > self.visible_rows
    }
}
