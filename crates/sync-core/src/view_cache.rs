use std::{collections::HashSet, num::NonZeroUsize, sync::Arc};

use lru::LruCache;
use tracing::{debug, trace};

use crate::{
    pagination::PageCursor,
    store::MessageStore,
    types::{Message, MessageId, ThreadId},
};

/// Number of thread views kept for instant switching.
pub const THREAD_VIEW_CACHE_LIMIT: usize = 36;

/// Restorable copy of one thread's loaded messages and scroll state.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadViewSnapshot {
    /// Confirmed rows, shared with the store that produced them.
    pub message_items: Arc<[Message]>,
    pub pending_messages: Vec<Message>,
    pub has_older_messages: bool,
    pub oldest_loaded_message_id: Option<MessageId>,
    pub distance_to_bottom: f64,
    /// Capture time in milliseconds since Unix epoch.
    pub saved_at: i64,
}

impl ThreadViewSnapshot {
    pub fn capture(
        store: &MessageStore,
        cursor: PageCursor,
        distance_to_bottom: f64,
        saved_at: i64,
    ) -> Self {
        Self {
            message_items: Arc::clone(store.confirmed()),
            pending_messages: store.pending().to_vec(),
            has_older_messages: cursor.has_older,
            oldest_loaded_message_id: cursor.oldest_loaded_id,
            distance_to_bottom,
            saved_at,
        }
    }

    pub fn to_store(&self) -> MessageStore {
        MessageStore::from_parts(Arc::clone(&self.message_items), self.pending_messages.clone())
    }

    pub fn cursor(&self) -> PageCursor {
        PageCursor {
            has_older: self.has_older_messages,
            oldest_loaded_id: self.oldest_loaded_message_id,
        }
    }
}

/// Bounded LRU of thread views keyed by thread id.
#[derive(Debug)]
pub struct ThreadViewCache {
    entries: LruCache<ThreadId, ThreadViewSnapshot>,
}

impl Default for ThreadViewCache {
    fn default() -> Self {
        Self::new(THREAD_VIEW_CACHE_LIMIT)
    }
}

impl ThreadViewCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn contains(&self, thread_id: ThreadId) -> bool {
        self.entries.contains(&thread_id)
    }

    /// Insert or refresh a snapshot as most recently used.
    ///
    /// Returns the thread whose snapshot was evicted to make room.
    pub fn save(&mut self, thread_id: ThreadId, snapshot: ThreadViewSnapshot) -> Option<ThreadId> {
        trace!(
            thread_id,
            rows = snapshot.message_items.len(),
            pending = snapshot.pending_messages.len(),
            "saving thread view"
        );
        match self.entries.push(thread_id, snapshot) {
            Some((evicted, _)) if evicted != thread_id => {
                debug!(thread_id = evicted, "evicted least recently used thread view");
                Some(evicted)
            }
            _ => None,
        }
    }

    /// Look up a snapshot and mark it most recently used.
    pub fn restore(&mut self, thread_id: ThreadId) -> Option<ThreadViewSnapshot> {
        self.entries.get(&thread_id).cloned()
    }

    /// Look up a snapshot without touching recency.
    pub fn peek(&self, thread_id: ThreadId) -> Option<&ThreadViewSnapshot> {
        self.entries.peek(&thread_id)
    }

    /// Edit a snapshot in place without touching recency.
    pub fn update<F>(&mut self, thread_id: ThreadId, edit: F) -> bool
    where
        F: FnOnce(&mut ThreadViewSnapshot),
    {
        match self.entries.peek_mut(&thread_id) {
            Some(snapshot) => {
                edit(snapshot);
                true
            }
            None => false,
        }
    }

    /// Drop snapshots of threads that are no longer listed.
    ///
    /// Returns how many entries were purged.
    pub fn retain_threads(&mut self, live: &HashSet<ThreadId>) -> usize {
        let stale: Vec<ThreadId> = self
            .entries
            .iter()
            .map(|(thread_id, _)| *thread_id)
            .filter(|thread_id| !live.contains(thread_id))
            .collect();
        for thread_id in &stale {
            self.entries.pop(thread_id);
        }
        if !stale.is_empty() {
            debug!(purged = stale.len(), "purged views of vanished threads");
        }
        stale.len()
    }

    /// Thread ids from least to most recently used.
    pub fn thread_ids_lru_first(&self) -> Vec<ThreadId> {
        self.entries.iter().rev().map(|(thread_id, _)| *thread_id).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
