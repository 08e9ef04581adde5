use std::collections::HashSet;

use tracing::debug;

use crate::types::{Thread, ThreadId, UserId};

/// Conversation list in display order (most recent first).
#[derive(Debug, Clone, Default)]
pub struct ThreadList {
    threads: Vec<Thread>,
}

impl ThreadList {
    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Replace the list with a fresh server response.
    pub fn replace(&mut self, threads: Vec<Thread>) {
        let mut seen = HashSet::with_capacity(threads.len());
        let mut threads: Vec<Thread> = threads
            .into_iter()
            .filter(|thread| seen.insert(thread.id))
            .collect();
        sort_by_recency(&mut threads);
        self.threads = threads;
        debug!(thread_count = self.threads.len(), "thread list replaced");
    }

    pub fn ids(&self) -> HashSet<ThreadId> {
        self.threads.iter().map(|thread| thread.id).collect()
    }

    pub fn get(&self, thread_id: ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|thread| thread.id == thread_id)
    }

    /// Thread shared with a given user, if already listed.
    pub fn thread_with_user(&self, user_id: UserId) -> Option<ThreadId> {
        self.threads
            .iter()
            .find(|thread| thread.other_user.id == user_id)
            .map(|thread| thread.id)
    }
}

/// Newest activity first; threads without messages last; newer ids first on ties.
pub fn sort_by_recency(threads: &mut [Thread]) {
    threads.sort_by(|a, b| {
        b.last_message_at
            .cmp(&a.last_message_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ThreadUser;

    fn thread(id: ThreadId, user: UserId, last_message_at: Option<i64>) -> Thread {
        Thread {
            id,
            last_message_at,
            last_message_id: None,
            last_message_content: None,
            last_message_sender_user_id: None,
            other_user: ThreadUser {
                id: user,
                display_name: None,
                avatar_url: None,
            },
        }
    }

    #[test]
    fn orders_by_last_message_with_empty_threads_last() {
        let mut list = ThreadList::default();
        list.replace(vec![
            thread(1, 10, Some(100)),
            thread(2, 20, None),
            thread(3, 30, Some(300)),
            thread(4, 40, Some(100)),
        ]);

        let order: Vec<_> = list.threads().iter().map(|t| t.id).collect();
        assert_eq!(order, vec![3, 4, 1, 2]);
    }

    #[test]
    fn drops_duplicate_rows() {
        let mut list = ThreadList::default();
        list.replace(vec![thread(1, 10, Some(5)), thread(1, 10, Some(9))]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(1).and_then(|t| t.last_message_at), Some(5));
    }

    #[test]
    fn finds_thread_by_other_user() {
        let mut list = ThreadList::default();
        list.replace(vec![thread(1, 10, None), thread(2, 20, None)]);
        assert_eq!(list.thread_with_user(20), Some(2));
        assert_eq!(list.thread_with_user(99), None);
        assert_eq!(list.ids(), [1, 2].into_iter().collect());
    }
}
