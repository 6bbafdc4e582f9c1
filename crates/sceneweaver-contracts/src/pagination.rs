use std::ops::Range;

pub const DEFAULT_PAGE_SIZE: usize = 6;

/// Fixed-size page window over an ordered collection, wrapping at both ends.
///
/// The cursor does not hold the collection; every call takes the current length so the view can
/// move it after the collection changed underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationCursor {
    page_size: usize,
    current_index: usize,
}

impl Default for PaginationCursor {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl PaginationCursor {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            current_index: 0,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn next(&mut self, len: usize) {
        if len <= self.page_size {
            return;
        }
        if self.current_index + self.page_size >= len {
            self.current_index = 0;
        } else {
            self.current_index += self.page_size;
        }
    }

    pub fn prev(&mut self, len: usize) {
        if len <= self.page_size {
            return;
        }
        if self.current_index == 0 {
            self.current_index = self.last_page_start(len);
        } else {
            self.current_index = self.current_index.saturating_sub(self.page_size);
        }
    }

    /// Pulls an index left dangling by a shrinking collection back onto the last page.
    pub fn clamp(&mut self, len: usize) {
        if len == 0 {
            self.current_index = 0;
        } else if self.current_index >= len {
            self.current_index = self.last_page_start(len);
        }
    }

    pub fn window(&self, len: usize) -> Range<usize> {
        let start = self.current_index.min(len);
        start..(start + self.page_size).min(len)
    }

    pub fn page_number(&self) -> usize {
        self.current_index / self.page_size + 1
    }

    pub fn page_count(&self, len: usize) -> usize {
        len.div_ceil(self.page_size).max(1)
    }

    fn last_page_start(&self, len: usize) -> usize {
        let tail = match len % self.page_size {
            0 => self.page_size,
            partial => partial,
        };
        len - tail
    }
}

/// 1-based label shown under each frame.
pub fn caption_label(index: usize) -> String {
    format!("Caption {}", index + 1)
}

#[cfg(test)]
mod tests {
    use super::{caption_label, PaginationCursor};

    fn cursor_at(index: usize) -> PaginationCursor {
        let mut cursor = PaginationCursor::new(6);
        while cursor.current_index() != index {
            cursor.next(64);
        }
        cursor
    }

    #[test]
    fn next_wraps_to_start_on_last_page() {
        let mut cursor = cursor_at(12);
        cursor.next(14);
        assert_eq!(cursor.current_index(), 0);
    }

    #[test]
    fn prev_from_start_lands_on_partial_last_page() {
        let mut cursor = PaginationCursor::new(6);
        cursor.prev(14);
        assert_eq!(cursor.current_index(), 12);
    }

    #[test]
    fn prev_from_start_lands_on_full_last_page() {
        let mut cursor = PaginationCursor::new(6);
        cursor.prev(12);
        assert_eq!(cursor.current_index(), 6);
    }

    #[test]
    fn single_page_collections_do_not_move() {
        let mut cursor = PaginationCursor::new(6);
        cursor.next(6);
        assert_eq!(cursor.current_index(), 0);
        cursor.prev(4);
        assert_eq!(cursor.current_index(), 0);
    }

    #[test]
    fn next_and_prev_walk_pages() {
        let mut cursor = PaginationCursor::new(6);
        cursor.next(14);
        assert_eq!(cursor.current_index(), 6);
        cursor.next(14);
        assert_eq!(cursor.current_index(), 12);
        cursor.prev(14);
        assert_eq!(cursor.current_index(), 6);
    }

    #[test]
    fn clamp_after_deleting_everything_returns_to_zero() {
        let mut cursor = cursor_at(6);
        cursor.clamp(0);
        assert_eq!(cursor.current_index(), 0);
    }

    #[test]
    fn clamp_after_emptying_last_page_moves_back_one_page() {
        let mut cursor = cursor_at(6);
        cursor.clamp(6);
        assert_eq!(cursor.current_index(), 0);
        let mut cursor = cursor_at(12);
        cursor.clamp(11);
        assert_eq!(cursor.current_index(), 6);
    }

    #[test]
    fn clamp_leaves_valid_index_alone() {
        let mut cursor = cursor_at(6);
        cursor.clamp(7);
        assert_eq!(cursor.current_index(), 6);
    }

    #[test]
    fn window_covers_partial_last_page() {
        let cursor = cursor_at(12);
        assert_eq!(cursor.window(14), 12..14);
        assert_eq!(cursor.page_number(), 3);
        assert_eq!(cursor.page_count(14), 3);
    }

    #[test]
    fn labels_are_one_based() {
        assert_eq!(caption_label(0), "Caption 1");
        assert_eq!(caption_label(12), "Caption 13");
    }
}
