//! Damage tracking
//!
//! Records which regions of the grid changed since the last drain. Rects are
//! merged by bounding union so the list stays short; when it grows past a
//! small bound (or covers most of the grid) the tracker collapses to a single
//! full-damage flag.

use serde::{Deserialize, Serialize};

/// Above this many disjoint rects the tracker reports full damage.
pub const MAX_RECTS: usize = 16;

/// A changed region, end-exclusive in both dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DamageRect {
    pub start_row: usize,
    pub start_col: usize,
    pub end_row: usize,
    pub end_col: usize,
}

impl DamageRect {
    pub const fn new(start_row: usize, start_col: usize, end_row: usize, end_col: usize) -> Self {
        Self {
            start_row,
            start_col,
            end_row,
            end_col,
        }
    }

    /// The rect covering a whole `rows` x `cols` grid
    pub const fn full(rows: usize, cols: usize) -> Self {
        Self::new(0, 0, rows, cols)
    }

    /// A single cell
    pub const fn cell(row: usize, col: usize) -> Self {
        Self::new(row, col, row + 1, col + 1)
    }

    /// Whole rows `start..end`
    pub const fn rows(start: usize, end: usize, cols: usize) -> Self {
        Self::new(start, 0, end, cols)
    }

    pub fn is_empty(&self) -> bool {
        self.start_row >= self.end_row || self.start_col >= self.end_col
    }

    pub fn area(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.end_row - self.start_row) * (self.end_col - self.start_col)
        }
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        row >= self.start_row && row < self.end_row && col >= self.start_col && col < self.end_col
    }

    /// True when the rects overlap or share an edge or corner
    pub fn touches(&self, other: &DamageRect) -> bool {
        self.start_row <= other.end_row
            && other.start_row <= self.end_row
            && self.start_col <= other.end_col
            && other.start_col <= self.end_col
    }

    /// Bounding box of both rects
    pub fn union(&self, other: &DamageRect) -> DamageRect {
        DamageRect {
            start_row: self.start_row.min(other.start_row),
            start_col: self.start_col.min(other.start_col),
            end_row: self.end_row.max(other.end_row),
            end_col: self.end_col.max(other.end_col),
        }
    }

    /// Clip to a `rows` x `cols` grid
    pub fn clamp(&self, rows: usize, cols: usize) -> DamageRect {
        DamageRect {
            start_row: self.start_row.min(rows),
            start_col: self.start_col.min(cols),
            end_row: self.end_row.min(rows),
            end_col: self.end_col.min(cols),
        }
    }
}

/// The result of a drain: either full damage or a list of disjoint rects
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Damage {
    pub full: bool,
    pub rects: Vec<DamageRect>,
}

impl Damage {
    pub fn is_empty(&self) -> bool {
        !self.full && self.rects.is_empty()
    }

    /// Bounding union of the rects, or the whole grid for full damage.
    /// Returns `None` when nothing changed.
    pub fn bounding_rect(&self, rows: usize, cols: usize) -> Option<DamageRect> {
        if self.full {
            return Some(DamageRect::full(rows, cols));
        }
        self.rects.iter().copied().reduce(|a, b| a.union(&b))
    }
}

/// Accumulates damage between publish cycles
#[derive(Debug, Clone)]
pub struct DamageTracker {
    rects: Vec<DamageRect>,
    full: bool,
    rows: usize,
    cols: usize,
}

impl DamageTracker {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rects: Vec::new(),
            full: false,
            rows,
            cols,
        }
    }

    /// Record a changed region.
    ///
    /// The rect is merged with every rect it touches until the list is
    /// disjoint again. Merged rects may cover more cells than were actually
    /// damaged, never fewer.
    pub fn mark_damage(&mut self, rect: DamageRect) {
        if self.full {
            return;
        }
        let mut merged = rect.clamp(self.rows, self.cols);
        if merged.is_empty() {
            return;
        }

        loop {
            match self.rects.iter().position(|r| r.touches(&merged)) {
                Some(idx) => {
                    let existing = self.rects.swap_remove(idx);
                    merged = merged.union(&existing);
                }
                None => break,
            }
        }
        self.rects.push(merged);

        let area: usize = self.rects.iter().map(DamageRect::area).sum();
        if self.rects.len() > MAX_RECTS || area * 2 > self.rows * self.cols {
            self.mark_full();
        }
    }

    pub fn mark_cell(&mut self, row: usize, col: usize) {
        self.mark_damage(DamageRect::cell(row, col));
    }

    /// Mark whole rows `start..end`
    pub fn mark_rows(&mut self, start: usize, end: usize) {
        self.mark_damage(DamageRect::rows(start, end, self.cols));
    }

    pub fn mark_full(&mut self) {
        self.full = true;
        self.rects.clear();
    }

    pub fn has_damage(&self) -> bool {
        self.full || !self.rects.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn rects(&self) -> &[DamageRect] {
        &self.rects
    }

    pub fn bounding_rect(&self) -> Option<DamageRect> {
        self.peek().bounding_rect(self.rows, self.cols)
    }

    /// Current damage without clearing it
    pub fn peek(&self) -> Damage {
        Damage {
            full: self.full,
            rects: self.rects.clone(),
        }
    }

    /// Take the accumulated damage and reset the tracker
    pub fn drain(&mut self) -> Damage {
        let full = std::mem::take(&mut self.full);
        Damage {
            full,
            rects: std::mem::take(&mut self.rects),
        }
    }

    pub fn clear(&mut self) {
        self.full = false;
        self.rects.clear();
    }

    /// Adopt new geometry; everything is damaged afterwards
    pub fn resize(&mut self, rows: usize, cols: usize) {
        self.rows = rows;
        self.cols = cols;
        self.mark_full();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_disjoint_rects_stay_separate() {
        let mut tracker = DamageTracker::new(24, 80);
        tracker.mark_cell(0, 0);
        tracker.mark_cell(10, 10);
        assert_eq!(tracker.rects().len(), 2);
        assert!(!tracker.is_full());
    }

    #[test]
    fn test_adjacent_rects_merge() {
        let mut tracker = DamageTracker::new(24, 80);
        tracker.mark_cell(2, 2);
        tracker.mark_cell(2, 3);
        assert_eq!(tracker.rects(), &[DamageRect::new(2, 2, 3, 4)]);
    }

    #[test]
    fn test_merge_cascades() {
        let mut tracker = DamageTracker::new(24, 80);
        tracker.mark_cell(0, 0);
        tracker.mark_cell(0, 4);
        // Bridges both existing rects
        tracker.mark_damage(DamageRect::new(0, 1, 1, 4));
        assert_eq!(tracker.rects(), &[DamageRect::new(0, 0, 1, 5)]);
    }

    #[test]
    fn test_collapse_on_rect_count() {
        let mut tracker = DamageTracker::new(100, 100);
        for i in 0..=MAX_RECTS {
            tracker.mark_cell(i * 3, 0);
        }
        assert!(tracker.is_full());
        assert!(tracker.rects().is_empty());
    }

    #[test]
    fn test_collapse_on_area() {
        let mut tracker = DamageTracker::new(10, 10);
        tracker.mark_rows(0, 6);
        assert!(tracker.is_full());
    }

    #[test]
    fn test_drain_is_at_most_once() {
        let mut tracker = DamageTracker::new(24, 80);
        tracker.mark_cell(1, 1);
        let damage = tracker.drain();
        assert_eq!(damage.rects.len(), 1);
        assert!(!tracker.has_damage());
        assert!(tracker.drain().is_empty());
    }

    #[test]
    fn test_out_of_bounds_clamped() {
        let mut tracker = DamageTracker::new(5, 5);
        tracker.mark_cell(10, 10);
        assert!(!tracker.has_damage());
        tracker.mark_damage(DamageRect::new(4, 4, 9, 9));
        assert_eq!(tracker.rects(), &[DamageRect::new(4, 4, 5, 5)]);
    }

    #[test]
    fn test_bounding_rect() {
        let mut tracker = DamageTracker::new(24, 80);
        assert_eq!(tracker.bounding_rect(), None);
        tracker.mark_cell(2, 2);
        tracker.mark_cell(3, 3);
        assert_eq!(tracker.bounding_rect(), Some(DamageRect::new(2, 2, 4, 4)));
        tracker.mark_full();
        assert_eq!(tracker.bounding_rect(), Some(DamageRect::full(24, 80)));
    }

    fn rect_strategy() -> impl Strategy<Value = DamageRect> {
        (0usize..30, 0usize..40, 1usize..5, 1usize..8)
            .prop_map(|(r, c, h, w)| DamageRect::new(r, c, r + h, c + w))
    }

    proptest! {
        #[test]
        fn test_merge_covers_every_input(rects in prop::collection::vec(rect_strategy(), 1..40)) {
            let mut tracker = DamageTracker::new(40, 60);
            for r in &rects {
                tracker.mark_damage(*r);
            }
            let damage = tracker.peek();
            for r in &rects {
                let r = r.clamp(40, 60);
                for row in r.start_row..r.end_row {
                    for col in r.start_col..r.end_col {
                        prop_assert!(damage.full || damage.rects.iter().any(|d| d.contains(row, col)));
                    }
                }
            }
        }

        #[test]
        fn test_merged_rects_are_disjoint(rects in prop::collection::vec(rect_strategy(), 1..40)) {
            let mut tracker = DamageTracker::new(40, 60);
            for r in &rects {
                tracker.mark_damage(*r);
            }
            let list = tracker.rects();
            prop_assert!(list.len() <= MAX_RECTS);
            for (i, a) in list.iter().enumerate() {
                for b in &list[i + 1..] {
                    prop_assert!(!a.touches(b));
                }
            }
        }
    }
}
