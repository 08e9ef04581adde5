//! Content-relative scroll anchoring.
//!
//! A render that inserts rows above the viewport (older backfill, a background
//! merge while reading history) must not move the text under the reader's eyes.
//! Before the render, capture which row sits at the top edge and how far into
//! it the viewport starts; after the render, put that row back at the same
//! offset. Everything here is plain geometry so it can run without a renderer.

use serde::{Deserialize, Serialize};

use crate::types::MessageKey;

/// Distance from the bottom (px) under which the reader counts as caught up.
pub const NEAR_BOTTOM_PX: f64 = 80.0;

/// Layout of one rendered message row, in content coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowLayout {
    pub key: MessageKey,
    pub top: f64,
    pub height: f64,
}

impl RowLayout {
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

/// Scroll container metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollViewport {
    pub scroll_top: f64,
    pub client_height: f64,
    pub scroll_height: f64,
}

impl ScrollViewport {
    pub fn max_scroll_top(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }

    pub fn distance_to_bottom(&self) -> f64 {
        (self.scroll_height - self.client_height - self.scroll_top).max(0.0)
    }

    pub fn is_near_bottom(&self, threshold_px: f64) -> bool {
        self.distance_to_bottom() < threshold_px
    }

    pub fn has_overflow(&self) -> bool {
        self.scroll_height > self.client_height
    }
}

/// Reading position captured before a re-render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrollAnchor {
    /// First row whose bottom edge is at or below the scroll offset.
    pub key: Option<MessageKey>,
    /// `row.top - scroll_top` at capture time.
    pub offset: f64,
    /// Raw offset, used when the anchor row disappears.
    pub scroll_top: f64,
    /// Reader was caught up with the newest rows.
    pub pinned_to_bottom: bool,
}

/// Capture the anchor for `rows` (sorted top to bottom) under `viewport`.
pub fn compute_anchor(rows: &[RowLayout], viewport: ScrollViewport, near_bottom_px: f64) -> ScrollAnchor {
    let row = rows.iter().find(|row| row.bottom() >= viewport.scroll_top);
    ScrollAnchor {
        key: row.map(|row| row.key.clone()),
        offset: row.map(|row| row.top - viewport.scroll_top).unwrap_or(0.0),
        scroll_top: viewport.scroll_top,
        pinned_to_bottom: viewport.is_near_bottom(near_bottom_px),
    }
}

/// Scroll offset that restores `anchor` against the re-rendered `rows`.
///
/// A reader pinned to the bottom stays pinned; otherwise the anchor row is put
/// back at its old offset; if it is gone the raw offset is kept.
pub fn apply_anchor(rows: &[RowLayout], viewport: ScrollViewport, anchor: &ScrollAnchor) -> f64 {
    let target = if anchor.pinned_to_bottom {
        viewport.max_scroll_top()
    } else {
        anchor
            .key
            .as_ref()
            .and_then(|key| rows.iter().find(|row| &row.key == key))
            .map(|row| row.top - anchor.offset)
            .unwrap_or(anchor.scroll_top)
    };
    target.clamp(0.0, viewport.max_scroll_top())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(ids: &[u64], row_height: f64) -> Vec<RowLayout> {
        ids.iter()
            .enumerate()
            .map(|(index, id)| RowLayout {
                key: MessageKey::Server(*id),
                top: index as f64 * row_height,
                height: row_height,
            })
            .collect()
    }

    fn viewport(scroll_top: f64, rows: usize, row_height: f64) -> ScrollViewport {
        ScrollViewport {
            scroll_top,
            client_height: 200.0,
            scroll_height: rows as f64 * row_height,
        }
    }

    #[test]
    fn prepending_older_rows_keeps_reading_position() {
        let before = rows(&[10, 11, 12, 13, 14, 15, 16, 17], 50.0);
        let anchor = compute_anchor(&before, viewport(120.0, 8, 50.0), NEAR_BOTTOM_PX);
        assert_eq!(anchor.key, Some(MessageKey::Server(12)));
        assert_eq!(anchor.offset, -20.0);

        let after = rows(&[5, 6, 7, 8, 10, 11, 12, 13, 14, 15, 16, 17], 50.0);
        let restored = apply_anchor(&after, viewport(120.0, 12, 50.0), &anchor);
        assert_eq!(restored, 320.0);
    }

    #[test]
    fn pinned_reader_is_re_pinned_after_new_rows() {
        let before = rows(&[1, 2, 3, 4, 5], 50.0);
        let anchor = compute_anchor(&before, viewport(50.0, 5, 50.0), NEAR_BOTTOM_PX);
        assert!(anchor.pinned_to_bottom);

        let after = rows(&[1, 2, 3, 4, 5, 6, 7], 50.0);
        let restored = apply_anchor(&after, viewport(50.0, 7, 50.0), &anchor);
        assert_eq!(restored, 150.0);
    }

    #[test]
    fn reader_scrolled_up_is_not_pulled_down() {
        let before = rows(&[1, 2, 3, 4, 5, 6, 7, 8], 50.0);
        let anchor = compute_anchor(&before, viewport(0.0, 8, 50.0), NEAR_BOTTOM_PX);
        assert!(!anchor.pinned_to_bottom);

        let after = rows(&[1, 2, 3, 4, 5, 6, 7, 8, 9], 50.0);
        assert_eq!(apply_anchor(&after, viewport(0.0, 9, 50.0), &anchor), 0.0);
    }

    #[test]
    fn falls_back_to_raw_offset_without_anchor_row() {
        let anchor = compute_anchor(&[], viewport(30.0, 0, 50.0), NEAR_BOTTOM_PX);
        assert_eq!(anchor.key, None);

        let mut far = anchor.clone();
        far.pinned_to_bottom = false;
        let after = rows(&[1, 2, 3, 4, 5, 6], 50.0);
        assert_eq!(apply_anchor(&after, viewport(0.0, 6, 50.0), &far), 30.0);
    }

    #[test]
    fn missing_anchor_row_keeps_raw_offset_and_clamps() {
        let anchor = ScrollAnchor {
            key: Some(MessageKey::Local("gone".into())),
            offset: 0.0,
            scroll_top: 900.0,
            pinned_to_bottom: false,
        };
        let after = rows(&[1, 2, 3, 4, 5, 6], 50.0);
        assert_eq!(apply_anchor(&after, viewport(0.0, 6, 50.0), &anchor), 100.0);
    }

    #[test]
    fn near_bottom_threshold_is_exclusive() {
        let at_threshold = ScrollViewport {
            scroll_top: 20.0,
            client_height: 100.0,
            scroll_height: 200.0,
        };
        assert_eq!(at_threshold.distance_to_bottom(), 80.0);
        assert!(!at_threshold.is_near_bottom(NEAR_BOTTOM_PX));
        assert!(at_threshold.has_overflow());
    }
}
