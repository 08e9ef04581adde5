//! Best-effort matching of optimistic sends against confirmed history.
//!
//! Push delivery can surface a just-sent message as an ordinary confirmed row
//! before the send response arrives. The server does not always echo the
//! client request id, so matching falls back to a heuristic: same sender, same
//! content, created within a tolerance window. Distinct identical messages can
//! still collapse or fail to collapse; that is an accepted limitation.

use crate::types::Message;

/// Tolerance between a pending message's local timestamp and its confirmed copy.
pub const RECONCILE_WINDOW_MS: i64 = 25_000;

/// Return the pending entries that have no confirmed counterpart.
///
/// Two passes: exact request-id echoes first, then the content/sender/time
/// heuristic. Each confirmed row is consumed at most once. Confirmed rows that
/// carry a different request id belong to another send and never match
/// heuristically.
pub fn reconcile_pending(pending: &[Message], confirmed: &[Message], window_ms: i64) -> Vec<Message> {
    let mut used = vec![false; confirmed.len()];
    let mut matched = vec![false; pending.len()];

    for (p_idx, local) in pending.iter().enumerate() {
        let exact = confirmed.iter().enumerate().position(|(c_idx, row)| {
            !used[c_idx]
                && !row.local_request_id.is_empty()
                && row.local_request_id == local.local_request_id
        });
        if let Some(c_idx) = exact {
            used[c_idx] = true;
            matched[p_idx] = true;
        }
    }

    for (p_idx, local) in pending.iter().enumerate() {
        if matched[p_idx] {
            continue;
        }
        let candidate = confirmed
            .iter()
            .enumerate()
            .filter(|(c_idx, row)| !used[*c_idx] && is_heuristic_match(local, row, window_ms))
            .min_by_key(|(_, row)| row.created_at.abs_diff(local.created_at))
            .map(|(c_idx, _)| c_idx);
        if let Some(c_idx) = candidate {
            used[c_idx] = true;
            matched[p_idx] = true;
        }
    }

    pending
        .iter()
        .zip(matched)
        .filter(|(_, was_matched)| !was_matched)
        .map(|(message, _)| message.clone())
        .collect()
}

fn is_heuristic_match(local: &Message, row: &Message, window_ms: i64) -> bool {
    row.local_request_id.is_empty()
        && row.thread_id == local.thread_id
        && row.sender_user_id == local.sender_user_id
        && row.content == local.content
        && u64::try_from(window_ms)
            .is_ok_and(|window| row.created_at.abs_diff(local.created_at) <= window)
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 1_700_000_000_000;

    fn pending(request_id: &str, sender: u64, content: &str, created_at: i64) -> Message {
        Message {
            id: 0,
            thread_id: 7,
            sender_user_id: sender,
            content: content.to_owned(),
            created_at,
            pending: true,
            local_request_id: request_id.to_owned(),
            local_seq: 1,
        }
    }

    fn confirmed(id: u64, sender: u64, content: &str, created_at: i64) -> Message {
        Message {
            id,
            thread_id: 7,
            sender_user_id: sender,
            content: content.to_owned(),
            created_at,
            pending: false,
            local_request_id: String::new(),
            local_seq: 0,
        }
    }

    #[test]
    fn collapses_echo_five_seconds_later() {
        let remaining = reconcile_pending(
            &[pending("r-1", 1, "C", T)],
            &[confirmed(50, 1, "C", T + 5_000)],
            RECONCILE_WINDOW_MS,
        );
        assert!(remaining.is_empty());
    }

    #[test]
    fn window_edges_are_inclusive() {
        let inside = reconcile_pending(
            &[pending("r-1", 1, "C", T)],
            &[confirmed(50, 1, "C", T - 25_000)],
            RECONCILE_WINDOW_MS,
        );
        assert!(inside.is_empty());

        let outside = reconcile_pending(
            &[pending("r-1", 1, "C", T)],
            &[confirmed(50, 1, "C", T + 25_001)],
            RECONCILE_WINDOW_MS,
        );
        assert_eq!(outside.len(), 1);
    }

    #[test]
    fn different_sender_or_content_never_matches() {
        let remaining = reconcile_pending(
            &[pending("r-1", 1, "C", T), pending("r-2", 1, "D", T)],
            &[confirmed(50, 2, "C", T), confirmed(51, 1, "d", T)],
            RECONCILE_WINDOW_MS,
        );
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn each_confirmed_row_collapses_one_pending_entry() {
        let remaining = reconcile_pending(
            &[pending("r-1", 1, "ok", T), pending("r-2", 1, "ok", T + 10)],
            &[confirmed(50, 1, "ok", T + 2_000)],
            RECONCILE_WINDOW_MS,
        );
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].local_request_id, "r-2");
    }

    #[test]
    fn echoed_request_id_matches_exactly_before_heuristic() {
        let mut echo = confirmed(51, 1, "ok", T + 1_000);
        echo.local_request_id = "r-2".into();

        let remaining = reconcile_pending(
            &[pending("r-1", 1, "ok", T), pending("r-2", 1, "ok", T + 500)],
            &[echo],
            RECONCILE_WINDOW_MS,
        );
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].local_request_id, "r-1");
    }

    #[test]
    fn row_claimed_by_another_send_is_not_reused() {
        let mut earlier = confirmed(40, 1, "ok", T - 3_000);
        earlier.local_request_id = "r-0".into();

        let remaining = reconcile_pending(&[pending("r-1", 1, "ok", T)], &[earlier], RECONCILE_WINDOW_MS);
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn closest_candidate_in_time_is_consumed() {
        let remaining = reconcile_pending(
            &[pending("r-1", 1, "ok", T), pending("r-2", 1, "ok", T + 20_000)],
            &[confirmed(50, 1, "ok", T + 19_000), confirmed(49, 1, "ok", T + 1_000)],
            RECONCILE_WINDOW_MS,
        );
        assert!(remaining.is_empty());
    }

    #[test]
    fn extreme_timestamps_do_not_overflow_the_distance() {
        let remaining = reconcile_pending(
            &[pending("r-1", 1, "C", i64::MIN), pending("r-2", 1, "C", i64::MAX)],
            &[confirmed(50, 1, "C", i64::MAX), confirmed(51, 1, "C", i64::MIN + 1)],
            RECONCILE_WINDOW_MS,
        );
        assert!(remaining.is_empty());

        let far_apart = reconcile_pending(
            &[pending("r-1", 1, "C", i64::MIN)],
            &[confirmed(50, 1, "C", i64::MAX)],
            RECONCILE_WINDOW_MS,
        );
        assert_eq!(far_apart.len(), 1);
    }
}
