use std::{
    cmp::Ordering,
    collections::{HashMap, hash_map::Entry},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering as AtomicOrdering},
    },
};

use tracing::warn;

use crate::{
    reconcile::reconcile_pending,
    types::{Message, MessageId, MessageKey},
};

static LOCAL_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Next process-local sequence number for a pending message.
pub fn next_local_seq() -> u64 {
    LOCAL_SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed)
}

/// Display order: `(created_at, id)`, then local creation sequence.
pub fn compare_messages(a: &Message, b: &Message) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then(a.id.cmp(&b.id))
        .then(a.local_seq.cmp(&b.local_seq))
}

/// Merge two message lists by identity key; `incoming` wins on collision.
///
/// Always returns a fresh, sorted vector.
pub fn merge_messages(base: &[Message], incoming: &[Message]) -> Vec<Message> {
    let mut index: HashMap<MessageKey, usize> = HashMap::with_capacity(base.len() + incoming.len());
    let mut merged: Vec<Message> = Vec::with_capacity(base.len() + incoming.len());

    for message in base.iter().chain(incoming) {
        match index.entry(message.key()) {
            Entry::Occupied(slot) => merged[*slot.get()] = message.clone(),
            Entry::Vacant(slot) => {
                slot.insert(merged.len());
                merged.push(message.clone());
            }
        }
    }

    merged.sort_by(compare_messages);
    merged
}

/// Confirmed history plus optimistic sends for the open thread.
///
/// Confirmed rows live in a shared immutable slice that is replaced, never
/// edited, so view snapshots can hold on to it.
#[derive(Debug, Clone)]
pub struct MessageStore {
    confirmed: Arc<[Message]>,
    pending: Vec<Message>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self {
            confirmed: Arc::from(Vec::new()),
            pending: Vec::new(),
        }
    }
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from previously captured parts.
    pub fn from_parts(confirmed: Arc<[Message]>, pending: Vec<Message>) -> Self {
        Self { confirmed, pending }
    }

    /// Confirmed rows sorted by display order.
    pub fn confirmed(&self) -> &Arc<[Message]> {
        &self.confirmed
    }

    /// Optimistic rows in creation order.
    pub fn pending(&self) -> &[Message] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.pending.is_empty()
    }

    /// What the user sees: `sort(confirmed ∪ pending)`.
    pub fn rendered(&self) -> Vec<Message> {
        merge_messages(&self.confirmed, &self.pending)
    }

    /// Smallest confirmed id, the backward pagination cursor.
    pub fn oldest_confirmed_id(&self) -> Option<MessageId> {
        self.confirmed.iter().map(|message| message.id).min()
    }

    /// Merge server rows into confirmed history and return how many were new.
    ///
    /// A request id already attached to a confirmed row survives a refresh that
    /// returns the same row without it.
    pub fn merge_confirmed(&mut self, incoming: &[Message]) -> usize {
        let known: HashMap<MessageId, &str> = self
            .confirmed
            .iter()
            .map(|message| (message.id, message.local_request_id.as_str()))
            .collect();

        let accepted: Vec<Message> = incoming
            .iter()
            .filter(|message| accept_confirmed(message))
            .map(|message| {
                let mut message = message.clone();
                if message.local_request_id.is_empty()
                    && let Some(request_id) = known.get(&message.id)
                {
                    message.local_request_id = (*request_id).to_owned();
                }
                message
            })
            .collect();

        let before = self.confirmed.len();
        self.confirmed = Arc::from(merge_messages(&self.confirmed, &accepted));
        self.confirmed.len() - before
    }

    /// Add an optimistic message.
    pub fn push_pending(&mut self, message: Message) {
        self.pending.push(message);
    }

    /// Drop the pending entry for a request id.
    pub fn remove_pending(&mut self, local_request_id: &str) -> Option<Message> {
        let index = self
            .pending
            .iter()
            .position(|message| message.local_request_id == local_request_id)?;
        Some(self.pending.remove(index))
    }

    /// Drop pending entries that already have a confirmed counterpart.
    ///
    /// Returns how many pending entries were collapsed.
    pub fn reconcile(&mut self, window_ms: i64) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let before = self.pending.len();
        self.pending = reconcile_pending(&self.pending, &self.confirmed, window_ms);
        before - self.pending.len()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn accept_confirmed(message: &Message) -> bool {
    if message.pending || !message.validate() {
        warn!(
            message_id = message.id,
            thread_id = message.thread_id,
            "dropping server row that violates the confirmed-message invariant"
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn confirmed(id: MessageId, created_at: i64, content: &str) -> Message {
        Message {
            id,
            thread_id: 1,
            sender_user_id: 10,
            content: content.to_owned(),
            created_at,
            pending: false,
            local_request_id: String::new(),
            local_seq: 0,
        }
    }

    fn pending(request_id: &str, created_at: i64, content: &str) -> Message {
        Message {
            id: 0,
            thread_id: 1,
            sender_user_id: 10,
            content: content.to_owned(),
            created_at,
            pending: true,
            local_request_id: request_id.to_owned(),
            local_seq: next_local_seq(),
        }
    }

    fn is_sorted(messages: &[Message]) -> bool {
        messages
            .windows(2)
            .all(|pair| compare_messages(&pair[0], &pair[1]) != Ordering::Greater)
    }

    #[test]
    fn incoming_copy_replaces_stale_copy() {
        let base = vec![confirmed(1, 100, "old"), confirmed(2, 200, "two")];
        let incoming = vec![confirmed(1, 100, "edited")];

        let merged = merge_messages(&base, &incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].content, "edited");
    }

    #[test]
    fn merge_is_idempotent_for_repeated_batches() {
        let a = vec![
            confirmed(3, 300, "c"),
            confirmed(1, 100, "a"),
            pending("r-1", 250, "p"),
        ];
        let b = vec![confirmed(2, 200, "b"), confirmed(3, 300, "c2")];

        let once = merge_messages(&a, &b);
        let twice = merge_messages(&once, &b);
        assert_eq!(once, twice);
        assert!(is_sorted(&once));
    }

    #[test]
    fn merge_is_idempotent_across_batch_shapes() {
        let early = pending("r-early", 50, "early");
        let late = pending("r-late", 400, "late");
        let cases: Vec<(&str, Vec<Message>, Vec<Message>)> = vec![
            ("empty", Vec::new(), Vec::new()),
            ("empty base", Vec::new(), vec![confirmed(2, 200, "b"), early.clone()]),
            ("empty batch", vec![confirmed(1, 100, "a"), late.clone()], Vec::new()),
            (
                "pending and confirmed overlap",
                vec![early.clone(), confirmed(1, 100, "a"), late.clone()],
                vec![late.clone(), confirmed(1, 100, "a2"), early.clone()],
            ),
            (
                "duplicate ids inside one batch",
                vec![confirmed(1, 100, "a")],
                vec![confirmed(2, 200, "first"), confirmed(2, 200, "second"), confirmed(1, 100, "a")],
            ),
            (
                "same timestamp everywhere",
                vec![confirmed(7, 100, "x"), early.clone()],
                vec![confirmed(5, 100, "y"), confirmed(7, 100, "x2"), late.clone()],
            ),
        ];

        for (name, base, incoming) in cases {
            let once = merge_messages(&base, &incoming);
            let twice = merge_messages(&once, &incoming);
            assert_eq!(once, twice, "{name}: second merge changed the list");
            assert!(is_sorted(&once), "{name}: merged list is not sorted");

            let keys: HashSet<_> = once.iter().map(Message::key).collect();
            assert_eq!(keys.len(), once.len(), "{name}: identity key repeated");
        }
    }

    #[test]
    fn repeated_confirmed_batch_adds_nothing() {
        let mut store = MessageStore::new();
        let batch = [confirmed(3, 300, "c"), confirmed(1, 100, "a"), confirmed(3, 300, "c")];

        assert_eq!(store.merge_confirmed(&batch), 2);
        let snapshot = store.confirmed().to_vec();
        assert_eq!(store.merge_confirmed(&batch), 0);
        assert_eq!(store.confirmed().to_vec(), snapshot);
    }

    #[test]
    fn same_millisecond_pending_messages_keep_send_order() {
        let first = pending("r-a", 500, "first");
        let second = pending("r-b", 500, "second");
        let third = pending("r-c", 500, "third");

        let merged = merge_messages(&[], &[third.clone(), first.clone(), second.clone()]);
        let contents: Vec<_> = merged.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn ties_on_timestamp_order_by_id() {
        let merged = merge_messages(&[confirmed(9, 100, "nine")], &[confirmed(4, 100, "four")]);
        assert_eq!(merged[0].id, 4);
        assert_eq!(merged[1].id, 9);
    }

    #[test]
    fn rendered_list_interleaves_pending_and_confirmed() {
        let mut store = MessageStore::new();
        store.merge_confirmed(&[confirmed(1, 100, "a"), confirmed(2, 300, "c")]);
        store.push_pending(pending("r-1", 200, "b"));

        let rendered = store.rendered();
        let contents: Vec<_> = rendered.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
        assert!(is_sorted(&rendered));
    }

    #[test]
    fn merge_confirmed_produces_new_slice_and_counts_new_rows() {
        let mut store = MessageStore::new();
        store.merge_confirmed(&[confirmed(1, 100, "a")]);
        let before = Arc::clone(store.confirmed());

        let added = store.merge_confirmed(&[confirmed(1, 100, "a"), confirmed(2, 200, "b")]);
        assert_eq!(added, 1);
        assert_eq!(before.len(), 1);
        assert_eq!(store.confirmed().len(), 2);
        assert!(!Arc::ptr_eq(&before, store.confirmed()));
    }

    #[test]
    fn merge_confirmed_keeps_attached_request_id() {
        let mut store = MessageStore::new();
        let mut own = confirmed(5, 100, "hi");
        own.local_request_id = "r-5".into();
        store.merge_confirmed(&[own]);

        store.merge_confirmed(&[confirmed(5, 100, "hi")]);
        assert_eq!(store.confirmed()[0].local_request_id, "r-5");
    }

    #[test]
    fn merge_confirmed_drops_rows_without_server_id() {
        let mut store = MessageStore::new();
        store.merge_confirmed(&[confirmed(0, 100, "bad"), confirmed(1, 100, "good")]);
        assert_eq!(store.confirmed().len(), 1);
        assert_eq!(store.oldest_confirmed_id(), Some(1));
    }

    #[test]
    fn remove_pending_only_touches_pending_rows() {
        let mut store = MessageStore::new();
        store.merge_confirmed(&[confirmed(1, 100, "a")]);
        store.push_pending(pending("r-1", 200, "b"));

        let removed = store.remove_pending("r-1").expect("pending entry should exist");
        assert_eq!(removed.content, "b");
        assert!(store.pending().is_empty());
        assert_eq!(store.confirmed().len(), 1);
        assert_eq!(store.remove_pending("r-1"), None);
    }
}
