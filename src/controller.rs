use std::hash::Hash;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};

use log::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::action::{TreeAction, TreeEvent};
use crate::config::TreeListConfig;
use crate::context::RowItem;
use crate::error::TreeResult;
use crate::host::{ListHost, TableHost};
use crate::model::{
    CanExpandGetter, ChildrenGetter, ColumnComparer, ListFilter, ModelFilter, SortOrder,
};
use crate::tree::Tree;

#[cfg(feature = "keymap")]
use crate::keymap::TreeKeyBindings;
#[cfg(feature = "keymap")]
use crossterm::event::KeyEvent;

/// Which expansion change a [`BranchEvent`] reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchEventKind {
    /// Sent before expanding; can be canceled.
    Expanding,
    /// Sent after a branch was expanded.
    Expanded,
    /// Sent before collapsing; can be canceled.
    Collapsing,
    /// Sent after a branch was collapsed.
    Collapsed,
}

impl BranchEventKind {
    pub const fn is_cancelable(self) -> bool {
        matches!(self, Self::Expanding | Self::Collapsing)
    }
}

/// Notification passed to branch listeners around an expansion toggle.
#[derive(Debug)]
pub struct BranchEvent<'a, M> {
    kind: BranchEventKind,
    model: &'a M,
    row: Option<RowItem<'a, M>>,
    canceled: bool,
}

impl<'a, M> BranchEvent<'a, M> {
    pub const fn kind(&self) -> BranchEventKind {
        self.kind
    }

    pub const fn model(&self) -> &'a M {
        self.model
    }

    /// The row showing the model, if it is currently visible.
    pub const fn row(&self) -> Option<&RowItem<'a, M>> {
        self.row.as_ref()
    }

    /// Stops the pending expand or collapse. Ignored for confirmation events.
    pub const fn cancel(&mut self) {
        if self.kind.is_cancelable() {
            self.canceled = true;
        }
    }

    pub const fn is_canceled(&self) -> bool {
        self.canceled
    }
}

type BranchListener<M> = Box<dyn FnMut(&mut BranchEvent<'_, M>)>;

/// Queues refresh requests for a controller from any thread.
///
/// The controller itself never leaves the thread that owns the widget; the owner applies
/// queued requests with [`TreeListController::process_pending_refreshes`].
pub struct RefreshHandle<M> {
    sender: Sender<Vec<M>>,
}

impl<M> Clone for RefreshHandle<M> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<M> RefreshHandle<M> {
    /// Requests that the children of `models` be refetched. Returns `false` if the
    /// controller is gone.
    pub fn refresh_objects(&self, models: Vec<M>) -> bool {
        self.sender.send(models).is_ok()
    }
}

/// Expansion and selection state that can be carried across a rebuild or persisted.
///
/// With the `serde` feature enabled, this type derives `Serialize`/`Deserialize`.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeListSnapshot<M> {
    /// Models flagged as expanded.
    pub expanded: Vec<M>,
    /// Selected models.
    pub selected: Vec<M>,
    /// Model owning keyboard focus.
    pub focused: Option<M>,
    /// First row in the viewport.
    pub top_index: usize,
}

struct Selection<M> {
    selected: Vec<M>,
    focused: Option<M>,
}

impl<M> Selection<M> {
    const fn empty() -> Self {
        Self {
            selected: Vec::new(),
            focused: None,
        }
    }
}

/// Drives a [`Tree`] and keeps a list host in sync with it.
///
/// Every structural command captures the selection by model identity, runs the tree
/// operation, resizes the host, restores the selection at the models' new rows and asks
/// the host to redraw from the first changed row to the end of the list.
pub struct TreeListController<M, H = TableHost> {
    tree: Tree<M>,
    host: H,
    config: TreeListConfig,
    listeners: Vec<BranchListener<M>>,
    refresh_tx: Sender<Vec<M>>,
    refresh_rx: Receiver<Vec<M>>,
    #[cfg(feature = "keymap")]
    keymap: TreeKeyBindings,
}

impl<M: Clone + Eq + Hash> Default for TreeListController<M, TableHost> {
    fn default() -> Self {
        Self::new(TableHost::new())
    }
}

impl<M: Clone + Eq + Hash, H: ListHost> TreeListController<M, H> {
    pub fn new(host: H) -> Self {
        Self::with_config(host, TreeListConfig::default())
    }

    pub fn with_config(host: H, config: TreeListConfig) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::channel();
        let mut tree = Tree::new();
        tree.set_use_filtering(config.uses_filtering());
        Self {
            tree,
            host,
            config,
            listeners: Vec::new(),
            refresh_tx,
            refresh_rx,
            #[cfg(feature = "keymap")]
            keymap: TreeKeyBindings::new(),
        }
    }

    pub const fn tree(&self) -> &Tree<M> {
        &self.tree
    }

    pub const fn host(&self) -> &H {
        &self.host
    }

    pub const fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub const fn config(&self) -> TreeListConfig {
        self.config
    }

    pub fn set_config(&mut self, config: TreeListConfig) {
        let use_filtering = config.uses_filtering();
        self.config = config;
        if self.tree.use_filtering() != use_filtering {
            self.set_use_filtering(use_filtering);
        }
    }

    #[cfg(feature = "keymap")]
    /// Returns a mutable reference to the key binding set.
    pub const fn keymap_mut(&mut self) -> &mut TreeKeyBindings {
        &mut self.keymap
    }

    pub fn set_can_expand_getter(&mut self, getter: impl CanExpandGetter<M> + 'static) {
        self.tree.set_can_expand_getter(getter);
    }

    pub fn set_children_getter(&mut self, getter: impl ChildrenGetter<M> + 'static) {
        self.tree.set_children_getter(getter);
    }

    pub fn set_column_comparer(&mut self, comparer: impl ColumnComparer<M> + 'static) {
        self.tree.set_column_comparer(comparer);
    }

    /// Registers a listener for expand and collapse notifications.
    pub fn on_branch_event(&mut self, listener: impl FnMut(&mut BranchEvent<'_, M>) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Returns a handle that other threads can use to request refreshes.
    pub fn refresh_handle(&self) -> RefreshHandle<M> {
        RefreshHandle {
            sender: self.refresh_tx.clone(),
        }
    }

    // ---------------------------------------------------------------------------------------
    // Data access

    pub fn object_count(&self) -> usize {
        self.tree.object_count()
    }

    pub fn get_nth_object(&self, n: usize) -> Option<&M> {
        self.tree.get_nth_object(n)
    }

    pub fn row_item(&self, index: usize) -> Option<RowItem<'_, M>> {
        self.tree.row_item(index)
    }

    /// Model owning keyboard focus.
    pub fn focused_object(&self) -> Option<&M> {
        self.host
            .focused_index()
            .and_then(|idx| self.tree.get_nth_object(idx))
    }

    pub fn selected_objects(&self) -> Vec<&M> {
        self.host
            .selected_indices()
            .into_iter()
            .filter_map(|idx| self.tree.get_nth_object(idx))
            .collect()
    }

    /// Focuses and selects the row showing `model`. Returns `false` if it is not visible.
    pub fn select_object(&mut self, model: &M) -> bool {
        let Some(index) = self.tree.object_index(model) else {
            return false;
        };
        self.select_row(index);
        true
    }

    pub fn is_expanded(&self, model: &M) -> bool {
        self.tree.is_expanded(model)
    }

    pub fn expanded_objects(&self) -> Vec<M> {
        self.tree.expanded_objects().cloned().collect()
    }

    /// Replaces the expansion table; applied by the next rebuild.
    pub fn set_expanded_objects<I>(&mut self, models: I)
    where
        I: IntoIterator<Item = M>,
    {
        self.tree.set_expanded_objects(models);
    }

    // ---------------------------------------------------------------------------------------
    // Roots

    pub fn set_roots<I>(&mut self, roots: I) -> TreeResult<()>
    where
        I: IntoIterator<Item = M>,
    {
        let selection = self.capture_selection();
        let result = self.tree.set_root_objects(roots);
        self.sync(0, selection);
        result
    }

    pub fn add_objects<I>(&mut self, models: I) -> TreeResult<()>
    where
        I: IntoIterator<Item = M>,
    {
        let selection = self.capture_selection();
        let result = self.tree.add_objects(models);
        self.sync(0, selection);
        result
    }

    pub fn remove_objects(&mut self, models: &[M]) -> TreeResult<()> {
        let selection = self.capture_selection();
        let result = self.tree.remove_objects(models);
        self.sync(0, selection);
        result
    }

    // ---------------------------------------------------------------------------------------
    // Commands

    /// Expands the branch of `model`. Returns `true` if rows were revealed.
    pub fn expand(&mut self, model: &M) -> TreeResult<bool> {
        if self.host.item_count() == 0 {
            return Ok(false);
        }

        let busy = self.config.uses_wait_cursor_when_expanding() && self.tree.needs_fetch(model);
        if busy {
            self.host.set_busy(true);
        }
        let selection = self.capture_selection();
        let result = self.tree.expand(model);
        if busy {
            self.host.set_busy(false);
        }

        match result {
            Ok(Some(index)) => {
                self.sync(index, selection);
                if self.config.reveals_after_expand() {
                    self.reveal_after_expand(model);
                }
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(err) => {
                self.sync(0, selection);
                Err(err)
            }
        }
    }

    /// Collapses the branch of `model`. Returns `true` if rows were hidden.
    pub fn collapse(&mut self, model: &M) -> bool {
        if self.host.item_count() == 0 {
            return false;
        }
        let selection = self.capture_selection();
        let Some(index) = self.tree.collapse(model) else {
            return false;
        };
        self.sync(index, selection);
        true
    }

    pub fn expand_all(&mut self) -> TreeResult<bool> {
        if self.host.item_count() == 0 {
            return Ok(false);
        }
        let selection = self.capture_selection();
        if self.config.uses_wait_cursor_when_expanding() {
            self.host.set_busy(true);
        }
        let result = self.tree.expand_all();
        if self.config.uses_wait_cursor_when_expanding() {
            self.host.set_busy(false);
        }
        let index = result.as_ref().map_or(0, |&index| index);
        self.sync(index, selection);
        result.map(|_| true)
    }

    pub fn collapse_all(&mut self) -> bool {
        if self.host.item_count() == 0 {
            return false;
        }
        let selection = self.capture_selection();
        let index = self.tree.collapse_all();
        self.sync(index, selection);
        true
    }

    /// Expands or collapses `model`, notifying branch listeners.
    ///
    /// Listeners may cancel the change from the `Expanding`/`Collapsing` notification.
    /// Confirmation notifications are only sent when the expansion state actually changed.
    pub fn toggle_expansion(&mut self, model: &M) -> TreeResult<bool> {
        let was_expanded = self.tree.is_expanded(model);
        if !was_expanded && !self.tree.can_expand(model) {
            return Ok(false);
        }

        let (before, after) = if was_expanded {
            (BranchEventKind::Collapsing, BranchEventKind::Collapsed)
        } else {
            (BranchEventKind::Expanding, BranchEventKind::Expanded)
        };
        if self.notify(before, model) {
            debug!("controller: {before:?} canceled by listener");
            return Ok(false);
        }

        if was_expanded {
            self.collapse(model);
        } else {
            self.expand(model)?;
        }

        let changed = self.tree.is_expanded(model) != was_expanded;
        if changed {
            self.notify(after, model);
        }
        Ok(changed)
    }

    /// Toggles the branch shown at row `index` (an expander click).
    pub fn toggle_row(&mut self, index: usize) -> TreeResult<bool> {
        let Some(model) = self.tree.get_nth_object(index).cloned() else {
            return Ok(false);
        };
        self.toggle_expansion(&model)
    }

    /// Refetches the children of each visible model and redraws from the first change.
    pub fn refresh_objects(&mut self, models: &[M]) -> TreeResult<bool> {
        if self.host.item_count() == 0 {
            return Ok(false);
        }
        let selection = self.capture_selection();
        let mut first_change: Option<usize> = None;
        let mut failure = None;
        for model in models {
            match self.tree.rebuild_children(model) {
                Ok(Some(index)) => {
                    first_change = Some(first_change.map_or(index, |first| first.min(index)));
                }
                Ok(None) => {}
                Err(err) => {
                    failure.get_or_insert(err);
                    first_change = Some(0);
                }
            }
        }

        let Some(first) = first_change else {
            return Ok(false);
        };
        debug!("controller: refreshed {} objects from row {first}", models.len());
        self.sync(first, selection);
        failure.map_or(Ok(true), Err)
    }

    /// Applies refresh requests queued through [`RefreshHandle`]s.
    pub fn process_pending_refreshes(&mut self) -> TreeResult<bool> {
        let models: Vec<M> = self.refresh_rx.try_iter().flatten().collect();
        if models.is_empty() {
            return Ok(false);
        }
        self.refresh_objects(&models)
    }

    /// Rebuilds the whole tree from the current roots, refetching every child list.
    ///
    /// With `preserve_state` the expanded branches and the selection survive the rebuild.
    pub fn rebuild_all(&mut self, preserve_state: bool) -> TreeResult<()> {
        let (selection, expanded) = if preserve_state {
            (self.capture_selection(), self.expanded_objects())
        } else {
            (Selection::empty(), Vec::new())
        };
        let top_index = self.host.top_index();
        self.rebuild_with(expanded, selection, top_index)
    }

    /// Collapses everything and forgets all cached children.
    pub fn discard_all_state(&mut self) -> TreeResult<()> {
        self.rebuild_all(false)
    }

    pub fn sort(&mut self, column: Option<usize>, order: SortOrder) {
        let selection = self.capture_selection();
        self.tree.sort(column, order);
        self.sync(0, selection);
    }

    pub fn apply_filters(
        &mut self,
        model_filter: Option<Rc<dyn ModelFilter<M>>>,
        list_filter: Option<Box<dyn ListFilter<M>>>,
    ) -> TreeResult<()> {
        let selection = self.capture_selection();
        self.tree.apply_filters(model_filter, list_filter)?;
        self.sync(0, selection);
        Ok(())
    }

    /// Installs a model filter (or removes it with `None`).
    pub fn set_model_filter<F>(&mut self, filter: Option<F>)
    where
        F: ModelFilter<M> + 'static,
    {
        let filter = filter.map(|filter| Rc::new(filter) as Rc<dyn ModelFilter<M>>);
        let selection = self.capture_selection();
        self.tree.set_model_filter(filter);
        self.sync(0, selection);
    }

    pub fn set_use_filtering(&mut self, use_filtering: bool) {
        self.config = self.config.use_filtering(use_filtering);
        let selection = self.capture_selection();
        self.tree.set_use_filtering(use_filtering);
        self.sync(0, selection);
    }

    /// Captures expansion, selection and scroll position.
    pub fn snapshot(&self) -> TreeListSnapshot<M> {
        let selection = self.capture_selection();
        TreeListSnapshot {
            expanded: self.expanded_objects(),
            selected: selection.selected,
            focused: selection.focused,
            top_index: self.host.top_index(),
        }
    }

    /// Rebuilds the tree with the state of a previously captured snapshot.
    pub fn restore(&mut self, snapshot: TreeListSnapshot<M>) -> TreeResult<()> {
        let selection = Selection {
            selected: snapshot.selected,
            focused: snapshot.focused,
        };
        self.rebuild_with(snapshot.expanded, selection, snapshot.top_index)
    }

    // ---------------------------------------------------------------------------------------
    // Actions

    /// Handles a tree action and returns the resulting event.
    pub fn handle_action<C>(&mut self, action: TreeAction<C>) -> TreeResult<TreeEvent<C>> {
        if matches!(&action, TreeAction::Custom(_)) {
            return Ok(TreeEvent::Action(action));
        }

        let count = self.tree.object_count();
        if count == 0 {
            return Ok(TreeEvent::Unhandled);
        }
        let focused = self.host.focused_index();
        let page = self.host.rows_per_page().max(1);

        let handled = match action {
            TreeAction::CollapseOrSelectParent => self.collapse_or_select_parent()?,
            TreeAction::ExpandOrSelectChild => self.expand_or_select_child()?,
            TreeAction::ToggleExpansion => match self.focused_object().cloned() {
                Some(model) => self.toggle_expansion(&model)?,
                None => false,
            },
            TreeAction::ExpandAll => self.expand_all()?,
            TreeAction::CollapseAll => self.collapse_all(),
            TreeAction::SelectPrev => {
                self.select_row(focused.map_or(0, |idx| idx.saturating_sub(1)));
                true
            }
            TreeAction::SelectNext => {
                self.select_row(focused.map_or(0, |idx| (idx + 1).min(count - 1)));
                true
            }
            TreeAction::SelectFirst => {
                self.select_row(0);
                true
            }
            TreeAction::SelectLast => {
                self.select_row(count - 1);
                true
            }
            TreeAction::PageUp => {
                self.select_row(focused.unwrap_or(0).saturating_sub(page));
                true
            }
            TreeAction::PageDown => {
                self.select_row((focused.unwrap_or(0) + page).min(count - 1));
                true
            }
            TreeAction::Custom(_) => return Ok(TreeEvent::Action(action)),
        };

        Ok(if handled {
            TreeEvent::Handled
        } else {
            TreeEvent::Unhandled
        })
    }

    #[cfg(feature = "keymap")]
    /// Resolves a key event into an action and handles it.
    pub fn handle_key(&mut self, key: KeyEvent) -> TreeResult<TreeEvent<()>> {
        let Some(action) = self.keymap.resolve(key) else {
            return Ok(TreeEvent::Unhandled);
        };
        self.handle_action(action)
    }

    #[cfg(feature = "keymap")]
    /// Resolves a key event with a custom mapping and handles it.
    pub fn handle_key_with<C, F>(&mut self, key: KeyEvent, custom: F) -> TreeResult<TreeEvent<C>>
    where
        F: Fn(KeyEvent) -> Option<C>,
    {
        let Some(action) = self.keymap.resolve_with(key, custom) else {
            return Ok(TreeEvent::Unhandled);
        };
        self.handle_action(action)
    }

    fn collapse_or_select_parent(&mut self) -> TreeResult<bool> {
        let Some(model) = self.focused_object().cloned() else {
            return Ok(false);
        };
        if self.tree.is_expanded(&model) {
            return self.toggle_expansion(&model);
        }
        let Some(parent) = self.tree.parent(&model).cloned() else {
            return Ok(false);
        };
        Ok(self.select_object(&parent))
    }

    fn expand_or_select_child(&mut self) -> TreeResult<bool> {
        let Some(model) = self.focused_object().cloned() else {
            return Ok(false);
        };
        if self.tree.is_expanded(&model) {
            let Some(first) = self.tree.filtered_children(&model).first().copied().cloned() else {
                return Ok(false);
            };
            return Ok(self.select_object(&first));
        }
        if self.tree.can_expand(&model) {
            return self.toggle_expansion(&model);
        }
        Ok(false)
    }

    // ---------------------------------------------------------------------------------------
    // Host synchronization

    fn select_row(&mut self, index: usize) {
        self.host.set_selected_indices(&[index]);
        self.host.set_focused_index(Some(index));
        self.host.scroll_to_focus();
    }

    fn capture_selection(&self) -> Selection<M> {
        Selection {
            selected: self.selected_objects().into_iter().cloned().collect(),
            focused: self.focused_object().cloned(),
        }
    }

    fn restore_selection(&mut self, selection: Selection<M>) {
        let indices: Vec<usize> = selection
            .selected
            .iter()
            .filter_map(|model| self.tree.object_index(model))
            .collect();
        self.host.set_selected_indices(&indices);
        let focused = selection
            .focused
            .as_ref()
            .and_then(|model| self.tree.object_index(model))
            .or_else(|| indices.first().copied());
        if focused.is_some() {
            self.host.set_focused_index(focused);
        }
    }

    fn sync(&mut self, first_changed: usize, selection: Selection<M>) {
        let count = self.tree.object_count();
        self.host.set_item_count(count);
        self.restore_selection(selection);
        if count > 0 {
            self.host.redraw_range(first_changed.min(count - 1), count - 1);
        }
    }

    fn reveal_after_expand(&mut self, model: &M) {
        let Some(index) = self.tree.object_index(model) else {
            return;
        };
        if index <= self.host.top_index() {
            return;
        }
        let revealed = self.tree.visible_descendent_count(model);
        self.host.begin_update();
        if revealed < self.host.rows_per_page() {
            self.host.ensure_visible(index + revealed);
        } else {
            self.host.set_top_index(index);
        }
        self.host.end_update();
    }

    fn rebuild_with(
        &mut self,
        expanded: Vec<M>,
        selection: Selection<M>,
        top_index: usize,
    ) -> TreeResult<()> {
        let roots: Vec<M> = self.tree.root_objects().cloned().collect();
        let mut tree = self.tree.rebuilt();
        tree.set_expanded_objects(expanded);
        let result = tree.set_root_objects(roots);
        self.tree = tree;
        debug!(
            "controller: rebuilt tree with {} visible rows",
            self.tree.object_count()
        );

        self.host.set_item_count(self.tree.object_count());
        self.host.set_selected_indices(&[]);
        self.host.set_focused_index(None);
        self.restore_selection(selection);
        self.host.set_top_index(top_index);
        if let Some(last) = self.tree.object_count().checked_sub(1) {
            self.host.redraw_range(0, last);
        }
        result
    }

    /// Notifies listeners; returns `true` if the change was canceled.
    fn notify(&mut self, kind: BranchEventKind, model: &M) -> bool {
        if self.listeners.is_empty() {
            return false;
        }
        let row = self
            .tree
            .object_index(model)
            .and_then(|idx| self.tree.row_item(idx));
        let mut event = BranchEvent {
            kind,
            model,
            row,
            canceled: false,
        };
        for listener in &mut self.listeners {
            listener(&mut event);
        }
        event.canceled
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use rustc_hash::FxHashMap;

    use super::*;
    use crate::error::{FetchError, TreeError};

    type Edges = Rc<RefCell<FxHashMap<&'static str, Vec<&'static str>>>>;

    fn controller_with<H: ListHost>(
        host: H,
        roots: &[&'static str],
        edges: &[(&'static str, &[&'static str])],
    ) -> (TreeListController<&'static str, H>, Edges) {
        let edges: Edges = Rc::new(RefCell::new(
            edges
                .iter()
                .map(|(parent, kids)| (*parent, kids.to_vec()))
                .collect(),
        ));
        let mut controller = TreeListController::new(host);
        let expandable = Rc::clone(&edges);
        controller.set_can_expand_getter(move |model: &&'static str| {
            expandable.borrow().get(model).is_some_and(|kids| !kids.is_empty())
        });
        let source = Rc::clone(&edges);
        controller.set_children_getter(
            move |model: &&'static str| -> Result<Vec<&'static str>, FetchError> {
                Ok(source.borrow().get(model).cloned().unwrap_or_default())
            },
        );
        controller.set_roots(roots.iter().copied()).unwrap();
        (controller, edges)
    }

    fn table_host(height: usize) -> TableHost {
        let mut host = TableHost::new();
        host.set_viewport_height(height);
        host
    }

    fn rows<H: ListHost>(controller: &TreeListController<&'static str, H>) -> Vec<&'static str> {
        controller.tree().objects().to_vec()
    }

    #[test]
    fn expand_preserves_selection_by_identity() {
        let (mut ctl, _) = controller_with(table_host(10), &["A", "B"], &[("A", &["A1", "A2"])]);
        ctl.select_object(&"B");
        ctl.host_mut().take_dirty_range();

        assert!(ctl.expand(&"A").unwrap());

        assert_eq!(ctl.host().item_count(), 4);
        assert_eq!(ctl.host().selected_indices(), vec![3]);
        assert_eq!(ctl.focused_object(), Some(&"B"));
        assert_eq!(ctl.host_mut().take_dirty_range(), Some((0, 3)));
    }

    #[test]
    fn collapse_drops_hidden_selection() {
        let (mut ctl, _) = controller_with(table_host(10), &["A", "B"], &[("A", &["A1", "A2"])]);
        ctl.expand(&"A").unwrap();
        ctl.host_mut().set_selected_indices(&[2, 3]);
        ctl.host_mut().set_focused_index(Some(2));

        assert!(ctl.collapse(&"A"));

        assert_eq!(rows(&ctl), vec!["A", "B"]);
        assert_eq!(ctl.selected_objects(), vec![&"B"]);
        assert_eq!(ctl.focused_object(), Some(&"B"));
    }

    #[test]
    fn commands_on_empty_list_do_nothing() {
        let (mut ctl, _) = controller_with(table_host(10), &[], &[]);
        assert!(!ctl.expand(&"A").unwrap());
        assert!(!ctl.collapse(&"A"));
        assert!(!ctl.expand_all().unwrap());
        assert!(!ctl.collapse_all());
        assert_eq!(
            ctl.handle_action::<()>(TreeAction::SelectNext).unwrap(),
            TreeEvent::Unhandled
        );
    }

    #[test]
    fn toggle_fires_events_and_honors_cancel() {
        let (mut ctl, _) = controller_with(table_host(10), &["A", "B"], &[("A", &["A1"])]);
        let log: Rc<RefCell<Vec<(BranchEventKind, Option<usize>)>>> = Rc::default();
        let veto = Rc::new(Cell::new(true));

        let seen = Rc::clone(&log);
        let cancel = Rc::clone(&veto);
        ctl.on_branch_event(move |event| {
            seen.borrow_mut()
                .push((event.kind(), event.row().map(|row| row.index)));
            if cancel.get() {
                event.cancel();
            }
        });

        assert!(!ctl.toggle_expansion(&"A").unwrap());
        assert!(!ctl.is_expanded(&"A"));
        assert_eq!(*log.borrow(), vec![(BranchEventKind::Expanding, Some(0))]);

        veto.set(false);
        log.borrow_mut().clear();
        assert!(ctl.toggle_expansion(&"A").unwrap());
        assert!(ctl.toggle_expansion(&"A").unwrap());
        assert_eq!(
            *log.borrow(),
            vec![
                (BranchEventKind::Expanding, Some(0)),
                (BranchEventKind::Expanded, Some(0)),
                (BranchEventKind::Collapsing, Some(0)),
                (BranchEventKind::Collapsed, Some(0)),
            ]
        );

        // Leaves never notify.
        log.borrow_mut().clear();
        assert!(!ctl.toggle_expansion(&"B").unwrap());
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn left_and_right_keys_navigate_the_tree() {
        let (mut ctl, _) = controller_with(
            table_host(10),
            &["A", "B"],
            &[("A", &["A1", "A2"])],
        );
        ctl.select_object(&"A");

        let event = ctl
            .handle_action::<()>(TreeAction::ExpandOrSelectChild)
            .unwrap();
        assert_eq!(event, TreeEvent::Handled);
        assert_eq!(rows(&ctl), vec!["A", "A1", "A2", "B"]);
        assert_eq!(ctl.focused_object(), Some(&"A"));

        ctl.handle_action::<()>(TreeAction::ExpandOrSelectChild)
            .unwrap();
        assert_eq!(ctl.focused_object(), Some(&"A1"));

        ctl.handle_action::<()>(TreeAction::CollapseOrSelectParent)
            .unwrap();
        assert_eq!(ctl.focused_object(), Some(&"A"));

        ctl.handle_action::<()>(TreeAction::CollapseOrSelectParent)
            .unwrap();
        assert_eq!(rows(&ctl), vec!["A", "B"]);

        // Collapsed root without parent: nothing to do.
        let event = ctl
            .handle_action::<()>(TreeAction::CollapseOrSelectParent)
            .unwrap();
        assert_eq!(event, TreeEvent::Unhandled);
    }

    #[test]
    fn navigation_actions_move_focus() {
        let (mut ctl, _) = controller_with(table_host(3), &["a", "b", "c", "d", "e", "f", "g"], &[]);
        ctl.handle_action::<()>(TreeAction::SelectNext).unwrap();
        assert_eq!(ctl.focused_object(), Some(&"a"));
        ctl.handle_action::<()>(TreeAction::PageDown).unwrap();
        assert_eq!(ctl.focused_object(), Some(&"d"));
        ctl.handle_action::<()>(TreeAction::SelectLast).unwrap();
        assert_eq!(ctl.focused_object(), Some(&"g"));
        assert_eq!(ctl.host().top_index(), 4);
        ctl.handle_action::<()>(TreeAction::PageUp).unwrap();
        assert_eq!(ctl.focused_object(), Some(&"d"));
        ctl.handle_action::<()>(TreeAction::SelectFirst).unwrap();
        assert_eq!(ctl.host().top_index(), 0);

        let event = ctl.handle_action(TreeAction::Custom(7)).unwrap();
        assert_eq!(event, TreeEvent::Action(TreeAction::Custom(7)));
    }

    #[test]
    fn reveal_after_expand_scrolls_small_subtree_into_view() {
        let (mut ctl, _) = controller_with(
            table_host(5),
            &["r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9"],
            &[("r4", &["c1", "c2", "c3"])],
        );
        ctl.host_mut().set_top_index(2);

        ctl.expand(&"r4").unwrap();

        // Last revealed child (row 7) must be on screen.
        assert_eq!(ctl.host().top_index(), 3);
    }

    #[test]
    fn reveal_after_expand_puts_large_subtree_on_top() {
        let kids: &[&'static str] = &["c1", "c2", "c3", "c4", "c5", "c6"];
        let (mut ctl, _) = controller_with(
            table_host(5),
            &["r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9"],
            &[("r3", kids)],
        );
        ctl.host_mut().set_top_index(1);

        ctl.expand(&"r3").unwrap();

        assert_eq!(ctl.host().top_index(), 3);
    }

    #[test]
    fn reveal_can_be_disabled() {
        let (mut ctl, _) = controller_with(
            table_host(5),
            &["r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9"],
            &[("r4", &["c1", "c2", "c3"])],
        );
        ctl.set_config(TreeListConfig::new().reveal_after_expand(false));
        ctl.host_mut().set_top_index(2);

        ctl.expand(&"r4").unwrap();

        assert_eq!(ctl.host().top_index(), 2);
    }

    struct BusyHost {
        inner: TableHost,
        busy: Vec<bool>,
    }

    impl ListHost for BusyHost {
        fn item_count(&self) -> usize {
            self.inner.item_count()
        }
        fn set_item_count(&mut self, count: usize) {
            self.inner.set_item_count(count);
        }
        fn selected_indices(&self) -> Vec<usize> {
            self.inner.selected_indices()
        }
        fn set_selected_indices(&mut self, indices: &[usize]) {
            self.inner.set_selected_indices(indices);
        }
        fn focused_index(&self) -> Option<usize> {
            self.inner.focused_index()
        }
        fn set_focused_index(&mut self, index: Option<usize>) {
            self.inner.set_focused_index(index);
        }
        fn rows_per_page(&self) -> usize {
            self.inner.rows_per_page()
        }
        fn top_index(&self) -> usize {
            self.inner.top_index()
        }
        fn set_top_index(&mut self, index: usize) {
            self.inner.set_top_index(index);
        }
        fn ensure_visible(&mut self, index: usize) {
            self.inner.ensure_visible(index);
        }
        fn redraw_range(&mut self, first: usize, last: usize) {
            self.inner.redraw_range(first, last);
        }
        fn set_busy(&mut self, busy: bool) {
            self.busy.push(busy);
        }
    }

    #[test]
    fn busy_indicator_wraps_first_fetch_only() {
        let host = BusyHost {
            inner: table_host(10),
            busy: Vec::new(),
        };
        let (mut ctl, _) = controller_with(host, &["A"], &[("A", &["A1"])]);

        ctl.expand(&"A").unwrap();
        ctl.collapse(&"A");
        ctl.expand(&"A").unwrap();

        assert_eq!(ctl.host().busy, vec![true, false]);
    }

    #[test]
    fn refresh_requests_from_other_threads_are_applied_on_owner() {
        let (mut ctl, edges) = controller_with(table_host(10), &["A", "B"], &[("A", &["A1"])]);
        ctl.expand(&"A").unwrap();
        edges.borrow_mut().insert("A", vec!["A1", "A2"]);

        let handle = ctl.refresh_handle();
        std::thread::spawn(move || {
            assert!(handle.refresh_objects(vec!["A"]));
        })
        .join()
        .unwrap();

        assert_eq!(rows(&ctl), vec!["A", "A1", "B"]);
        assert!(ctl.process_pending_refreshes().unwrap());
        assert_eq!(rows(&ctl), vec!["A", "A1", "A2", "B"]);
        assert!(!ctl.process_pending_refreshes().unwrap());
    }

    #[test]
    fn refresh_redraws_from_first_change() {
        let (mut ctl, edges) = controller_with(
            table_host(10),
            &["A", "B", "C"],
            &[("B", &["B1"]), ("C", &["C1"])],
        );
        ctl.expand(&"B").unwrap();
        ctl.expand(&"C").unwrap();
        edges.borrow_mut().insert("C", vec!["C2"]);
        ctl.host_mut().take_dirty_range();

        assert!(ctl.refresh_objects(&["C", "B"]).unwrap());
        assert_eq!(rows(&ctl), vec!["A", "B", "B1", "C", "C2"]);
        assert_eq!(ctl.host_mut().take_dirty_range(), Some((1, 4)));

        // Hidden or unknown models change nothing.
        ctl.collapse(&"B");
        assert!(!ctl.refresh_objects(&["B1", "nope"]).unwrap());
    }

    #[test]
    fn rebuild_all_preserves_or_discards_state() {
        let (mut ctl, edges) = controller_with(table_host(10), &["A", "B"], &[("A", &["A1"])]);
        ctl.expand(&"A").unwrap();
        ctl.select_object(&"A1");
        edges.borrow_mut().insert("A", vec!["A1", "A9"]);

        ctl.rebuild_all(true).unwrap();
        assert_eq!(rows(&ctl), vec!["A", "A1", "A9", "B"]);
        assert_eq!(ctl.focused_object(), Some(&"A1"));

        ctl.discard_all_state().unwrap();
        assert_eq!(rows(&ctl), vec!["A", "B"]);
        assert!(ctl.selected_objects().is_empty());
        assert!(ctl.expanded_objects().is_empty());
    }

    #[test]
    fn snapshot_restores_expansion_and_selection() {
        let (mut ctl, _) = controller_with(
            table_host(10),
            &["A", "B"],
            &[("A", &["A1"]), ("B", &["B1"])],
        );
        ctl.expand(&"B").unwrap();
        ctl.select_object(&"B1");
        let snapshot = ctl.snapshot();

        ctl.collapse_all();
        ctl.restore(snapshot).unwrap();

        assert_eq!(rows(&ctl), vec!["A", "B", "B1"]);
        assert_eq!(ctl.focused_object(), Some(&"B1"));
    }

    #[test]
    fn fetch_failure_reports_error_and_keeps_host_in_sync() {
        let mut ctl: TreeListController<u32> = TreeListController::new(table_host(10));
        ctl.set_can_expand_getter(|model: &u32| *model == 1);
        ctl.set_children_getter(|_: &u32| -> Result<Vec<u32>, FetchError> {
            Err(FetchError::new("gone"))
        });
        ctl.set_roots([1, 2]).unwrap();

        let result = ctl.toggle_expansion(&1);
        assert!(matches!(result, Err(TreeError::ChildrenFetch(_))));
        assert!(!ctl.is_expanded(&1));
        assert_eq!(ctl.host().item_count(), 2);
    }

    #[test]
    fn filter_through_controller_keeps_focus() {
        let (mut ctl, _) = controller_with(table_host(10), &["A", "B", "C"], &[]);
        ctl.select_object(&"C");

        ctl.set_model_filter(Some(|model: &&'static str| *model != "B"));
        assert_eq!(rows(&ctl), vec!["A", "C"]);
        assert_eq!(ctl.focused_object(), Some(&"C"));

        ctl.set_use_filtering(false);
        assert_eq!(rows(&ctl), vec!["A", "B", "C"]);
        assert!(!ctl.config().uses_filtering());

        ctl.set_use_filtering(true);
        assert_eq!(rows(&ctl), vec!["A", "C"]);
        ctl.set_model_filter::<crate::model::NoFilter>(None);
        assert_eq!(rows(&ctl), vec!["A", "B", "C"]);
        assert_eq!(ctl.focused_object(), Some(&"C"));
    }
}
