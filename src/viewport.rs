/// viewport.rs – Selection index and scroll offset over the ordered positions.

/// Selection/scroll state. Invariant whenever `n > 0`:
/// `offset <= selected <= offset + row_budget - 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Viewport {
    pub selected: usize,
    pub offset: usize,
}

impl Viewport {
    /// Re-establish the invariant for `n` rows and a visible budget.
    pub fn clamp(&mut self, n: usize, row_budget: usize) {
        let (selected, offset) = clamp(self.selected, self.offset, n, row_budget);
        self.selected = selected;
        self.offset = offset;
    }

    /// Move the selection by `delta` (wrapping), then clamp.
    pub fn move_selection(&mut self, delta: isize, n: usize, row_budget: usize) {
        self.selected = move_selection(self.selected, delta, n);
        self.clamp(n, row_budget);
    }

    pub fn reset(&mut self) {
        *self = Viewport::default();
    }

    /// Index range of the rows that fit in the budget.
    pub fn visible(&self, n: usize, row_budget: usize) -> std::ops::Range<usize> {
        let start = self.offset.min(n);
        let end = (start + row_budget.max(1)).min(n);
        start..end
    }
}

pub fn clamp(selected: usize, offset: usize, n: usize, row_budget: usize) -> (usize, usize) {
    if n == 0 {
        return (0, 0);
    }
    let budget = row_budget.max(1);
    let selected = selected.min(n - 1);
    let offset = if selected < offset {
        selected
    } else if selected >= offset + budget {
        (selected + 1).saturating_sub(budget)
    } else {
        offset
    };
    (selected, offset)
}

/// Wrapping move in both directions; a no-op when there are no rows.
pub fn move_selection(selected: usize, delta: isize, n: usize) -> usize {
    if n == 0 {
        return selected;
    }
    let n = n as isize;
    let current = (selected as isize).min(n - 1);
    (current + delta).rem_euclid(n) as usize
}
