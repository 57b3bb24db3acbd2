use ratatui::widgets::TableState;

use crate::style::TreeScrollPolicy;

/// Capabilities a virtualized list control offers to the tree controller.
///
/// The controller only ever talks to the list through this trait: it tells the list how
/// many rows exist, which rows need repainting, and moves selection and scroll position
/// around after structural changes.
pub trait ListHost {
    /// Number of rows the list currently believes it has.
    fn item_count(&self) -> usize;

    fn set_item_count(&mut self, count: usize);

    /// Selected row indices in ascending order.
    fn selected_indices(&self) -> Vec<usize>;

    fn set_selected_indices(&mut self, indices: &[usize]);

    fn focused_index(&self) -> Option<usize>;

    fn set_focused_index(&mut self, index: Option<usize>);

    /// Number of rows that fit in the viewport.
    fn rows_per_page(&self) -> usize;

    /// First row shown in the viewport.
    fn top_index(&self) -> usize;

    fn set_top_index(&mut self, index: usize);

    /// Scrolls the minimum amount needed to show row `index`.
    fn ensure_visible(&mut self, index: usize);

    /// Marks rows `first..=last` for repainting.
    fn redraw_range(&mut self, first: usize, last: usize);

    /// Scrolls so the focused row is on screen.
    fn scroll_to_focus(&mut self) {
        if let Some(index) = self.focused_index() {
            self.ensure_visible(index);
        }
    }

    fn begin_update(&mut self) {}

    fn end_update(&mut self) {}

    /// Shows or hides a busy indicator.
    fn set_busy(&mut self, _busy: bool) {}
}

/// [`ListHost`] backed by ratatui's [`TableState`].
///
/// The table state's selected row is the focused row; the selection set is tracked
/// separately so several rows can stay selected across structural changes.
#[derive(Clone, Debug)]
pub struct TableHost {
    table_state: TableState,
    item_count: usize,
    selected: Vec<usize>,
    viewport_height: usize,
    scroll_policy: TreeScrollPolicy,
    dirty: Option<(usize, usize)>,
    update_depth: u32,
    busy: bool,
}

impl Default for TableHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TableHost {
    pub fn new() -> Self {
        Self {
            table_state: TableState::default(),
            item_count: 0,
            selected: Vec::new(),
            viewport_height: 1,
            scroll_policy: TreeScrollPolicy::KeepInView,
            dirty: None,
            update_depth: 0,
            busy: false,
        }
    }

    /// Updates the viewport height. Called by the widget on every render.
    pub fn set_viewport_height(&mut self, height: usize) {
        self.viewport_height = height.max(1);
        self.clamp();
    }

    pub const fn viewport_height(&self) -> usize {
        self.viewport_height
    }

    pub const fn scroll_policy(&self) -> TreeScrollPolicy {
        self.scroll_policy
    }

    pub const fn set_scroll_policy(&mut self, policy: TreeScrollPolicy) {
        self.scroll_policy = policy;
    }

    /// Rows marked for repainting since the last call.
    ///
    /// [`TreeListView`](crate::TreeListView) repaints the whole viewport on every frame and
    /// leaves this range alone; hosts that cache rendered rows drain it to invalidate them.
    pub const fn take_dirty_range(&mut self) -> Option<(usize, usize)> {
        self.dirty.take()
    }

    pub const fn is_busy(&self) -> bool {
        self.busy
    }

    /// Returns `true` between matching `begin_update` and `end_update` calls.
    pub const fn is_updating(&self) -> bool {
        self.update_depth > 0
    }

    /// Scrolls the view down by the given number of rows.
    pub fn scroll_down_by(&mut self, amount: usize) {
        let max_offset = self.item_count.saturating_sub(self.viewport_height);
        let offset = (self.table_state.offset() + amount).min(max_offset);
        *self.table_state.offset_mut() = offset;
    }

    /// Scrolls the view up by the given number of rows.
    pub fn scroll_up_by(&mut self, amount: usize) {
        let offset = self.table_state.offset().saturating_sub(amount);
        *self.table_state.offset_mut() = offset;
    }

    fn center_on(&mut self, index: usize) {
        if self.item_count <= self.viewport_height {
            *self.table_state.offset_mut() = 0;
            return;
        }
        let max_offset = self.item_count - self.viewport_height;
        let offset = index.saturating_sub(self.viewport_height / 2).min(max_offset);
        *self.table_state.offset_mut() = offset;
    }

    fn clamp(&mut self) {
        let count = self.item_count;
        self.selected.retain(|&idx| idx < count);
        if count == 0 {
            self.table_state.select(None);
            *self.table_state.offset_mut() = 0;
            return;
        }
        if let Some(focused) = self.table_state.selected()
            && focused >= count
        {
            self.table_state.select(Some(count - 1));
        }
        let max_offset = count.saturating_sub(self.viewport_height);
        if self.table_state.offset() > max_offset {
            *self.table_state.offset_mut() = max_offset;
        }
    }
}

impl ListHost for TableHost {
    fn item_count(&self) -> usize {
        self.item_count
    }

    fn set_item_count(&mut self, count: usize) {
        self.item_count = count;
        self.clamp();
    }

    fn selected_indices(&self) -> Vec<usize> {
        self.selected.clone()
    }

    fn set_selected_indices(&mut self, indices: &[usize]) {
        let count = self.item_count;
        self.selected.clear();
        self.selected
            .extend(indices.iter().copied().filter(|&idx| idx < count));
        self.selected.sort_unstable();
        self.selected.dedup();
    }

    fn focused_index(&self) -> Option<usize> {
        self.table_state.selected()
    }

    fn set_focused_index(&mut self, index: Option<usize>) {
        self.table_state
            .select(index.filter(|&idx| idx < self.item_count));
    }

    fn rows_per_page(&self) -> usize {
        self.viewport_height
    }

    fn top_index(&self) -> usize {
        self.table_state.offset()
    }

    fn set_top_index(&mut self, index: usize) {
        let max_offset = self.item_count.saturating_sub(self.viewport_height);
        *self.table_state.offset_mut() = index.min(max_offset);
    }

    fn ensure_visible(&mut self, index: usize) {
        let offset = self.table_state.offset();
        if index < offset {
            *self.table_state.offset_mut() = index;
        } else if index >= offset + self.viewport_height {
            *self.table_state.offset_mut() = index + 1 - self.viewport_height;
        }
    }

    fn redraw_range(&mut self, first: usize, last: usize) {
        if first > last {
            return;
        }
        self.dirty = Some(match self.dirty {
            Some((lo, hi)) => (lo.min(first), hi.max(last)),
            None => (first, last),
        });
    }

    fn scroll_to_focus(&mut self) {
        let Some(focused) = self.table_state.selected() else {
            return;
        };
        match self.scroll_policy {
            TreeScrollPolicy::KeepInView => self.ensure_visible(focused),
            TreeScrollPolicy::CenterOnSelect => self.center_on(focused),
        }
    }

    fn begin_update(&mut self) {
        self.update_depth += 1;
    }

    fn end_update(&mut self) {
        self.update_depth = self.update_depth.saturating_sub(1);
        if self.update_depth == 0 {
            self.clamp();
        }
    }

    fn set_busy(&mut self, busy: bool) {
        self.busy = busy;
    }
}
