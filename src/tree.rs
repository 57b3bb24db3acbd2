use std::hash::Hash;
use std::rc::Rc;

use log::{debug, trace, warn};
use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::branch::{Branch, BranchComparer, BranchFlags, BranchId};
use crate::context::RowItem;
use crate::error::{TreeError, TreeResult};
use crate::model::{
    CanExpandGetter, ChildrenGetter, ColumnComparer, ListFilter, ModelFilter, SortOrder,
};

type FilterMemo = FxHashMap<BranchId, bool>;
type ChildList = SmallVec<[BranchId; 8]>;

/// Tree of model objects projected onto a flat, index-addressable list of visible rows.
///
/// The flat list is what a virtualized list control consumes through
/// [`get_nth_object`](Self::get_nth_object) and [`object_index`](Self::object_index).
/// Structural commands edit it incrementally: expanding a branch splices its visible
/// descendants in after it and re-indexes only the tail of the list.
///
/// After every command `object_count() == visible_descendent_count(trunk)` and each listed
/// object maps back to its own row index.
pub struct Tree<M> {
    branches: Vec<Branch<M>>,
    // Arena slots released by detached subtrees.
    free: Vec<BranchId>,
    object_list: Vec<M>,
    object_index: FxHashMap<M, usize>,
    object_branch: FxHashMap<M, BranchId>,
    // Keyed by model so the state can outlive a rebuild.
    expanded: FxHashSet<M>,
    can_expand_getter: Option<Rc<dyn CanExpandGetter<M>>>,
    children_getter: Option<Rc<dyn ChildrenGetter<M>>>,
    column_comparer: Option<Rc<dyn ColumnComparer<M>>>,
    model_filter: Option<Rc<dyn ModelFilter<M>>>,
    use_filtering: bool,
    last_sort_column: Option<usize>,
    last_sort_order: SortOrder,
    // Set when a fetch moved a known branch away from another parent.
    needs_full_rebuild: bool,
}

impl<M: Clone + Eq + Hash> Default for Tree<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Clone + Eq + Hash> Tree<M> {
    /// Creates an empty tree with no getters configured.
    pub fn new() -> Self {
        let mut trunk = Branch::new(None, None);
        trunk.already_has_children = true;
        Self {
            branches: vec![trunk],
            free: Vec::new(),
            object_list: Vec::new(),
            object_index: FxHashMap::default(),
            object_branch: FxHashMap::default(),
            expanded: FxHashSet::default(),
            can_expand_getter: None,
            children_getter: None,
            column_comparer: None,
            model_filter: None,
            use_filtering: true,
            last_sort_column: None,
            last_sort_order: SortOrder::None,
            needs_full_rebuild: false,
        }
    }

    /// Creates an empty tree that keeps this tree's getters, sort and filter settings.
    pub fn rebuilt(&self) -> Self {
        Self {
            can_expand_getter: self.can_expand_getter.clone(),
            children_getter: self.children_getter.clone(),
            column_comparer: self.column_comparer.clone(),
            model_filter: self.model_filter.clone(),
            use_filtering: self.use_filtering,
            last_sort_column: self.last_sort_column,
            last_sort_order: self.last_sort_order,
            ..Self::new()
        }
    }

    pub fn set_can_expand_getter(&mut self, getter: impl CanExpandGetter<M> + 'static) {
        self.can_expand_getter = Some(Rc::new(getter));
    }

    pub fn set_children_getter(&mut self, getter: impl ChildrenGetter<M> + 'static) {
        self.children_getter = Some(Rc::new(getter));
    }

    /// Sets the comparer used by [`sort`](Self::sort).
    pub fn set_column_comparer(&mut self, comparer: impl ColumnComparer<M> + 'static) {
        self.column_comparer = Some(Rc::new(comparer));
    }

    // ---------------------------------------------------------------------------------------
    // Virtual list data source

    /// Returns the model shown at row `n`.
    #[inline]
    pub fn get_nth_object(&self, n: usize) -> Option<&M> {
        self.object_list.get(n)
    }

    /// Number of visible rows.
    #[inline]
    pub fn object_count(&self) -> usize {
        self.object_list.len()
    }

    /// Returns the row index of a visible model.
    #[inline]
    pub fn object_index(&self, model: &M) -> Option<usize> {
        self.object_index.get(model).copied()
    }

    /// The flat list of visible models.
    pub fn objects(&self) -> &[M] {
        &self.object_list
    }

    /// Finds the first row in `first..=last` whose text starts with `prefix`
    /// (case-insensitive). When `first > last` the search wraps past the end of the list.
    pub fn search_text<F, S>(
        &self,
        prefix: &str,
        first: usize,
        last: usize,
        text_of: F,
    ) -> Option<usize>
    where
        F: Fn(&M) -> S,
        S: AsRef<str>,
    {
        let count = self.object_list.len();
        if count == 0 {
            return None;
        }
        let needle = prefix.to_lowercase();
        let matches = |idx: usize| {
            text_of(&self.object_list[idx])
                .as_ref()
                .to_lowercase()
                .starts_with(&needle)
        };
        let last = last.min(count - 1);
        if first <= last {
            (first..=last).find(|&idx| matches(idx))
        } else {
            (first.min(count)..count)
                .chain(0..=last)
                .find(|&idx| matches(idx))
        }
    }

    /// Materializes the display data for row `index`.
    pub fn row_item(&self, index: usize) -> Option<RowItem<'_, M>> {
        let model = self.object_list.get(index)?;
        let id = self.branch_id(model)?;
        let level = u16::try_from(self.branch_level(id)).unwrap_or(u16::MAX);
        Some(RowItem {
            index,
            model,
            level,
            indent: level.saturating_sub(1),
            can_expand: self.branch_can_expand(id),
            is_expanded: self.branch_is_expanded(id),
            flags: self.branches[id.index()].flags,
        })
    }

    // ---------------------------------------------------------------------------------------
    // Roots

    /// Top-level model objects, in their current order.
    pub fn root_objects(&self) -> impl Iterator<Item = &M> + '_ {
        self.branches[BranchId::TRUNK.index()]
            .children
            .iter()
            .filter_map(|id| self.branches[id.index()].model.as_ref())
    }

    /// Replaces the top-level objects and rebuilds the visible list.
    ///
    /// Known models keep their branch (and cached children); models no longer present are
    /// forgotten together with their descendants. Expanded branches that were never fetched
    /// are fetched now. A failed fetch leaves that branch without children and the first
    /// failure is returned once the list is consistent.
    pub fn set_root_objects<I>(&mut self, roots: I) -> TreeResult<()>
    where
        I: IntoIterator<Item = M>,
    {
        let roots: Vec<M> = roots.into_iter().collect();
        debug!("tree: setting {} root objects", roots.len());
        self.set_children(BranchId::TRUNK, roots);

        let mut failure = None;
        let top = self.branches[BranchId::TRUNK.index()].children.clone();
        for id in top {
            self.refresh_children(id, &mut failure);
        }
        self.rebuild_list();
        failure.map_or(Ok(()), Err)
    }

    /// Alias of [`set_root_objects`](Self::set_root_objects).
    pub fn set_objects<I>(&mut self, roots: I) -> TreeResult<()>
    where
        I: IntoIterator<Item = M>,
    {
        self.set_root_objects(roots)
    }

    /// Appends top-level objects.
    pub fn add_objects<I>(&mut self, models: I) -> TreeResult<()>
    where
        I: IntoIterator<Item = M>,
    {
        let roots: Vec<M> = self.root_objects().cloned().chain(models).collect();
        self.set_root_objects(roots)
    }

    /// Removes top-level objects (and everything known below them).
    pub fn remove_objects(&mut self, models: &[M]) -> TreeResult<()> {
        let doomed: FxHashSet<&M> = models.iter().collect();
        let roots: Vec<M> = self
            .root_objects()
            .filter(|model| !doomed.contains(model))
            .cloned()
            .collect();
        self.set_root_objects(roots)
    }

    // ---------------------------------------------------------------------------------------
    // Commands

    /// Expands the branch of `model` and returns its row index.
    ///
    /// Returns `Ok(None)` when nothing changed on screen: unknown model, not expandable,
    /// already expanded, or currently hidden under a collapsed ancestor. In the hidden case
    /// the expansion is still recorded and shows up once the ancestors are expanded.
    ///
    /// If fetching the branch's own children fails, the branch stays collapsed and can be
    /// retried.
    pub fn expand(&mut self, model: &M) -> TreeResult<Option<usize>> {
        let Some(id) = self.branch_id(model) else {
            return Ok(None);
        };
        if !self.branch_can_expand(id) || self.branch_is_expanded(id) {
            return Ok(None);
        }

        let index = if self.branch_is_visible(id) {
            self.object_index(model)
        } else {
            None
        };
        let Some(index) = index else {
            // Remember the expansion for when the branch becomes visible.
            self.set_expanded_flag(id, true);
            return Ok(None);
        };

        self.fetch_children(id)?;
        self.set_expanded_flag(id, true);
        let mut failure = None;
        let children = self.branches[id.index()].children.clone();
        for child in children {
            self.refresh_children(child, &mut failure);
        }
        debug!("tree: expand row {index}");
        let index = self.reveal_children(id, index);
        failure.map_or(Ok(Some(index)), Err)
    }

    /// Collapses the branch of `model` and returns its row index.
    ///
    /// Returns `None` when nothing changed on screen; a hidden branch is still marked
    /// collapsed.
    pub fn collapse(&mut self, model: &M) -> Option<usize> {
        let id = self.branch_id(model)?;
        if !self.branch_is_expanded(id) {
            return None;
        }

        let index = if self.branch_is_visible(id) {
            self.object_index(model)
        } else {
            None
        };
        let Some(index) = index else {
            self.set_expanded_flag(id, false);
            return None;
        };

        let count = self.branch_visible_descendent_count(id);
        self.set_expanded_flag(id, false);
        self.remove_rows(index + 1, count);
        self.rebuild_object_map(index + 1);
        debug!("tree: collapse row {index} hiding {count} rows");
        Some(index)
    }

    /// Expands every expandable branch, fetching children as needed, then re-applies the
    /// last sort. Returns the first changed row (always 0).
    pub fn expand_all(&mut self) -> TreeResult<usize> {
        let mut failure = None;
        let mut stack: Vec<BranchId> = self.branches[BranchId::TRUNK.index()]
            .children
            .iter()
            .rev()
            .copied()
            .collect();
        while let Some(id) = stack.pop() {
            if !self.branch_can_expand(id) {
                continue;
            }
            if let Err(err) = self.fetch_children(id) {
                failure.get_or_insert(err);
                continue;
            }
            self.set_expanded_flag(id, true);
            stack.extend(self.branches[id.index()].children.iter().rev().copied());
        }
        self.sort(self.last_sort_column, self.last_sort_order);
        debug!("tree: expand all, {} visible rows", self.object_list.len());
        failure.map_or(Ok(0), Err)
    }

    /// Collapses every known branch. Returns the first changed row (always 0).
    pub fn collapse_all(&mut self) -> usize {
        let mut stack: Vec<BranchId> = self.branches[BranchId::TRUNK.index()].children.clone();
        while let Some(id) = stack.pop() {
            self.set_expanded_flag(id, false);
            stack.extend_from_slice(&self.branches[id.index()].children);
        }
        self.rebuild_list();
        debug!("tree: collapse all, {} visible rows", self.object_list.len());
        0
    }

    /// Drops and refetches the children of a visible branch.
    ///
    /// Everything cached below the branch (child branches and their expansion state) is
    /// forgotten. Returns the branch's row index, or `None` if it is not visible.
    pub fn rebuild_children(&mut self, model: &M) -> TreeResult<Option<usize>> {
        let Some(id) = self.branch_id(model) else {
            return Ok(None);
        };
        if !self.branch_is_visible(id) {
            return Ok(None);
        }
        let Some(index) = self.object_index(model) else {
            return Ok(None);
        };

        let count = self.branch_visible_descendent_count(id);
        self.remove_rows(index + 1, count);
        self.detach_children(id);

        if let Err(err) = self.fetch_children(id) {
            self.rebuild_object_map(index + 1);
            return Err(err);
        }

        let mut failure = None;
        let index = if self.branch_is_expanded(id) {
            let children = self.branches[id.index()].children.clone();
            for child in children {
                self.refresh_children(child, &mut failure);
            }
            self.reveal_children(id, index)
        } else if self.needs_full_rebuild {
            self.rebuild_list();
            0
        } else {
            self.rebuild_object_map(index + 1);
            index
        };
        debug!("tree: rebuilt children of row {index} ({count} rows replaced)");
        failure.map_or(Ok(Some(index)), Err)
    }

    /// Sorts every cached child list by `column` and rebuilds the list.
    ///
    /// The parameters are remembered so that children revealed later are ordered the same
    /// way. `None` or [`SortOrder::None`] leaves the current order untouched.
    pub fn sort(&mut self, column: Option<usize>, order: SortOrder) {
        self.last_sort_column = column;
        self.last_sort_order = order;

        if let Some(comparer) = self.branch_comparer() {
            self.sort_subtree(BranchId::TRUNK, &comparer);
        }
        self.rebuild_list();
    }

    /// Last parameters passed to [`sort`](Self::sort).
    pub const fn last_sort(&self) -> (Option<usize>, SortOrder) {
        (self.last_sort_column, self.last_sort_order)
    }

    /// Installs a model filter and rebuilds the list.
    ///
    /// Whole-list filters are rejected. Filtering only changes which cached branches are
    /// shown; it never discards fetched children.
    pub fn apply_filters(
        &mut self,
        model_filter: Option<Rc<dyn ModelFilter<M>>>,
        list_filter: Option<Box<dyn ListFilter<M>>>,
    ) -> TreeResult<()> {
        if list_filter.is_some() {
            return Err(TreeError::ListFilterUnsupported);
        }
        self.set_model_filter(model_filter);
        Ok(())
    }

    /// Installs (or with `None` removes) the model filter and rebuilds the list.
    pub fn set_model_filter(&mut self, model_filter: Option<Rc<dyn ModelFilter<M>>>) {
        self.model_filter = model_filter;
        self.rebuild_list();
        debug!("tree: filters applied, {} visible rows", self.object_list.len());
    }

    /// Turns filtering on or off without forgetting the installed filter.
    pub fn set_use_filtering(&mut self, use_filtering: bool) {
        if self.use_filtering != use_filtering {
            self.use_filtering = use_filtering;
            self.rebuild_list();
        }
    }

    pub const fn use_filtering(&self) -> bool {
        self.use_filtering
    }

    /// Returns `true` if a filter is installed and filtering is enabled.
    pub const fn is_filtering(&self) -> bool {
        self.use_filtering && self.model_filter.is_some()
    }

    // ---------------------------------------------------------------------------------------
    // Queries

    /// Returns the branch wrapping `model`, if the model has been seen.
    pub fn get_branch(&self, model: &M) -> Option<&Branch<M>> {
        self.branch_id(model).map(|id| &self.branches[id.index()])
    }

    /// Returns a branch by id.
    pub fn branch(&self, id: BranchId) -> Option<&Branch<M>> {
        self.branches.get(id.index())
    }

    pub fn is_expanded(&self, model: &M) -> bool {
        self.branch_id(model)
            .is_some_and(|id| self.branch_is_expanded(id))
    }

    pub fn can_expand(&self, model: &M) -> bool {
        self.branch_id(model)
            .is_some_and(|id| self.branch_can_expand(id))
    }

    /// Returns `true` if every ancestor of `model` is expanded.
    pub fn is_visible(&self, model: &M) -> bool {
        self.branch_id(model)
            .is_some_and(|id| self.branch_is_visible(id))
    }

    /// Returns `true` if the children of `model` would be fetched by the next expand.
    pub fn needs_fetch(&self, model: &M) -> bool {
        self.branch_id(model).is_some_and(|id| {
            !self.branches[id.index()].already_has_children && self.branch_can_expand(id)
        })
    }

    /// Depth of `model`: top-level objects are at level 1.
    pub fn level(&self, model: &M) -> Option<usize> {
        self.branch_id(model).map(|id| self.branch_level(id))
    }

    pub fn parent(&self, model: &M) -> Option<&M> {
        let id = self.branch_id(model)?;
        let parent = self.branches[id.index()].parent?;
        self.branches[parent.index()].model.as_ref()
    }

    /// Cached children of `model`; empty if it cannot expand or was never fetched.
    pub fn children(&self, model: &M) -> Vec<&M> {
        let Some(id) = self.branch_id(model) else {
            return Vec::new();
        };
        if !self.branch_can_expand(id) {
            return Vec::new();
        }
        self.branches[id.index()]
            .children
            .iter()
            .filter_map(|child| self.branches[child.index()].model.as_ref())
            .collect()
    }

    /// Cached children of `model` that pass the filter (ancestor-inclusive).
    pub fn filtered_children(&self, model: &M) -> Vec<&M> {
        let Some(id) = self.branch_id(model) else {
            return Vec::new();
        };
        let mut memo = FilterMemo::default();
        self.filtered_child_ids(id, &mut memo)
            .into_iter()
            .filter_map(|child| self.branches[child.index()].model.as_ref())
            .collect()
    }

    /// Ancestors of `model` from the top level down, excluding the trunk and the model.
    pub fn ancestors(&self, model: &M) -> Vec<&M> {
        let Some(id) = self.branch_id(model) else {
            return Vec::new();
        };
        let mut chain = Vec::new();
        let mut current = self.branches[id.index()].parent;
        while let Some(parent) = current {
            if let Some(model) = self.branches[parent.index()].model.as_ref() {
                chain.push(model);
            }
            current = self.branches[parent.index()].parent;
        }
        chain.reverse();
        chain
    }

    /// Number of rows currently shown below `model` (0 when collapsed).
    pub fn visible_descendent_count(&self, model: &M) -> usize {
        self.branch_id(model)
            .map_or(0, |id| self.branch_visible_descendent_count(id))
    }

    pub fn branch_flags(&self, model: &M) -> Option<BranchFlags> {
        self.get_branch(model).map(Branch::flags)
    }

    /// Models currently flagged as expanded (including ones not yet visible).
    pub fn expanded_objects(&self) -> impl Iterator<Item = &M> + '_ {
        self.expanded.iter()
    }

    /// Replaces the expansion table. Takes effect on the next rebuild or expand.
    pub fn set_expanded_objects<I>(&mut self, models: I)
    where
        I: IntoIterator<Item = M>,
    {
        self.expanded.clear();
        self.expanded.extend(models);
    }

    // ---------------------------------------------------------------------------------------
    // Branch internals

    fn branch_id(&self, model: &M) -> Option<BranchId> {
        self.object_branch.get(model).copied()
    }

    fn branch_model(&self, id: BranchId) -> Option<&M> {
        self.branches[id.index()].model.as_ref()
    }

    fn branch_is_expanded(&self, id: BranchId) -> bool {
        // The trunk is always expanded.
        self.branch_model(id)
            .is_none_or(|model| self.expanded.contains(model))
    }

    fn set_expanded_flag(&mut self, id: BranchId, expanded: bool) {
        let Some(model) = self.branches[id.index()].model.as_ref() else {
            return;
        };
        if expanded {
            self.expanded.insert(model.clone());
        } else {
            self.expanded.remove(model);
        }
    }

    fn branch_can_expand(&self, id: BranchId) -> bool {
        match (self.branch_model(id), self.can_expand_getter.as_ref()) {
            (Some(model), Some(getter)) => getter.can_expand(model),
            _ => false,
        }
    }

    fn branch_is_visible(&self, id: BranchId) -> bool {
        let mut current = self.branches[id.index()].parent;
        while let Some(parent) = current {
            if !self.branch_is_expanded(parent) {
                return false;
            }
            current = self.branches[parent.index()].parent;
        }
        true
    }

    fn branch_level(&self, id: BranchId) -> usize {
        let mut level = 0;
        let mut current = self.branches[id.index()].parent;
        while let Some(parent) = current {
            level += 1;
            current = self.branches[parent.index()].parent;
        }
        level
    }

    fn branch_visible_descendent_count(&self, id: BranchId) -> usize {
        let mut memo = FilterMemo::default();
        self.count_visible(id, &mut memo)
    }

    fn count_visible(&self, id: BranchId, memo: &mut FilterMemo) -> usize {
        if !self.branch_is_expanded(id) {
            return 0;
        }
        let filtered = self.filtered_child_ids(id, memo);
        let mut count = filtered.len();
        for child in filtered {
            count += self.count_visible(child, memo);
        }
        count
    }

    fn include_model(&self, model: &M) -> bool {
        if !self.use_filtering {
            return true;
        }
        self.model_filter
            .as_ref()
            .is_none_or(|filter| filter.filter(model))
    }

    fn filtered_child_ids(&self, id: BranchId, memo: &mut FilterMemo) -> ChildList {
        let children = &self.branches[id.index()].children;
        if !self.is_filtering() {
            return children.iter().copied().collect();
        }
        children
            .iter()
            .copied()
            .filter(|&child| self.subtree_has_match(child, memo))
            .collect()
    }

    // A branch is shown if it passes the filter or any cached descendant does.
    fn subtree_has_match(&self, id: BranchId, memo: &mut FilterMemo) -> bool {
        if let Some(&cached) = memo.get(&id) {
            return cached;
        }
        let mut matched = self.branch_model(id).is_some_and(|m| self.include_model(m));
        if !matched {
            for child in self.branches[id.index()].children.iter().copied() {
                if self.subtree_has_match(child, memo) {
                    matched = true;
                    break;
                }
            }
        }
        memo.insert(id, matched);
        matched
    }

    fn make_branch(&mut self, parent: BranchId, model: M) -> BranchId {
        let branch = Branch::new(Some(parent), Some(model.clone()));
        let id = if let Some(id) = self.free.pop() {
            self.branches[id.index()] = branch;
            id
        } else {
            self.branches.push(branch);
            BranchId::new(self.branches.len() - 1)
        };
        self.object_branch.insert(model, id);
        id
    }

    fn is_ancestor_or_self(&self, candidate: BranchId, of: BranchId) -> bool {
        let mut current = Some(of);
        while let Some(id) = current {
            if id == candidate {
                return true;
            }
            current = self.branches[id.index()].parent;
        }
        false
    }

    // Returns the branch for `model` under `parent`, reusing (and reparenting) a known one.
    fn adopt_child(&mut self, parent: BranchId, model: M) -> BranchId {
        let Some(id) = self.branch_id(&model) else {
            return self.make_branch(parent, model);
        };
        debug_assert!(
            !self.is_ancestor_or_self(id, parent),
            "model object would become its own ancestor"
        );
        let previous = self.branches[id.index()].parent;
        if previous != Some(parent) {
            if let Some(previous) = previous {
                self.branches[previous.index()]
                    .children
                    .retain(|&child| child != id);
                self.needs_full_rebuild = true;
            }
            self.branches[id.index()].parent = Some(parent);
        }
        id
    }

    fn set_children(&mut self, parent: BranchId, models: Vec<M>) {
        let previous = std::mem::take(&mut self.branches[parent.index()].children);
        let mut seen: FxHashSet<BranchId> =
            FxHashSet::with_capacity_and_hasher(models.len(), FxBuildHasher);
        let mut children = Vec::with_capacity(models.len());
        for model in models {
            let id = self.adopt_child(parent, model);
            let fresh = seen.insert(id);
            debug_assert!(fresh, "model object listed twice among siblings");
            if fresh {
                children.push(id);
            }
        }
        self.branches[parent.index()].children = children;

        for id in previous {
            if !seen.contains(&id) && self.branches[id.index()].parent == Some(parent) {
                self.detach_subtree(id);
            }
        }
    }

    // Forgets a branch and every branch it still owns.
    fn detach_subtree(&mut self, root: BranchId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let branch =
                std::mem::replace(&mut self.branches[id.index()], Branch::new(None, None));
            for child in branch.children {
                if self.branches[child.index()].parent == Some(id) {
                    stack.push(child);
                }
            }
            if let Some(model) = branch.model {
                if self.object_branch.get(&model) == Some(&id) {
                    self.object_branch.remove(&model);
                }
                self.object_index.remove(&model);
                self.expanded.remove(&model);
            }
            self.free.push(id);
        }
    }

    fn detach_children(&mut self, id: BranchId) {
        let children = std::mem::take(&mut self.branches[id.index()].children);
        for child in children {
            if self.branches[child.index()].parent == Some(id) {
                self.detach_subtree(child);
            }
        }
        self.branches[id.index()].clear_cached_info();
    }

    fn fetch_children(&mut self, id: BranchId) -> TreeResult<()> {
        let can_expand = self.branch_can_expand(id);
        let branch = &mut self.branches[id.index()];
        if branch.already_has_children {
            return Ok(());
        }
        branch.already_has_children = true;
        // Leaves are never asked for children.
        if !can_expand {
            return Ok(());
        }
        let (Some(getter), Some(model)) = (self.children_getter.clone(), branch.model.clone())
        else {
            return Ok(());
        };

        match getter.children(&model) {
            Ok(children) => {
                trace!("tree: fetched {} children", children.len());
                self.set_children(id, children);
                Ok(())
            }
            Err(err) => {
                warn!("tree: children fetch failed: {err}");
                self.detach_children(id);
                Err(err.into())
            }
        }
    }

    // Fetches children of every expanded branch at or below `id` that has none cached.
    fn refresh_children(&mut self, id: BranchId, failure: &mut Option<TreeError>) {
        if !self.branch_is_expanded(id) {
            return;
        }
        if let Err(err) = self.fetch_children(id) {
            failure.get_or_insert(err);
            return;
        }
        let children = self.branches[id.index()].children.clone();
        for child in children {
            self.refresh_children(child, failure);
        }
    }

    fn branch_comparer(&self) -> Option<BranchComparer<M>> {
        let column = self.last_sort_column?;
        if self.last_sort_order == SortOrder::None {
            return None;
        }
        let comparer = self.column_comparer.clone()?;
        Some(BranchComparer::new(comparer, column, self.last_sort_order))
    }

    fn sort_subtree(&mut self, root: BranchId, comparer: &BranchComparer<M>) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let mut children = std::mem::take(&mut self.branches[id.index()].children);
            if children.is_empty() {
                continue;
            }
            children.sort_by(|a, b| {
                comparer.compare(&self.branches[a.index()], &self.branches[b.index()])
            });
            stack.extend_from_slice(&children);
            self.branches[id.index()].children = children;
        }
    }

    // Sorts, flattens and splices the descendants of an expanded branch at `index`.
    // Returns the first row that changed.
    fn reveal_children(&mut self, id: BranchId, index: usize) -> usize {
        if self.needs_full_rebuild {
            self.rebuild_list();
            return 0;
        }
        if let Some(comparer) = self.branch_comparer() {
            self.sort_subtree(id, &comparer);
        }
        let mut flat = Vec::new();
        let mut memo = FilterMemo::default();
        self.flatten_onto(id, &mut flat, &mut memo);
        let at = index + 1;
        self.object_list.splice(at..at, flat);
        self.rebuild_object_map(at);
        index
    }

    fn flatten_onto(&mut self, id: BranchId, out: &mut Vec<M>, memo: &mut FilterMemo) {
        if !self.branch_is_expanded(id) {
            return;
        }
        let filtered = self.filtered_child_ids(id, memo);
        let last = filtered.len().saturating_sub(1);
        for (pos, child) in filtered.into_iter().enumerate() {
            self.branches[child.index()]
                .flags
                .set(BranchFlags::LAST_CHILD, pos == last);
            if let Some(model) = self.branches[child.index()].model.clone() {
                out.push(model);
            }
            self.flatten_onto(child, out, memo);
        }
    }

    fn remove_rows(&mut self, start: usize, count: usize) {
        if count == 0 {
            return;
        }
        let end = (start + count).min(self.object_list.len());
        for model in self.object_list.drain(start..end) {
            self.object_index.remove(&model);
        }
    }

    fn rebuild_list(&mut self) {
        let mut memo = FilterMemo::default();
        let mut list = Vec::with_capacity(self.object_list.len());
        self.flatten_onto(BranchId::TRUNK, &mut list, &mut memo);
        self.object_list = list;

        let top = self.filtered_child_ids(BranchId::TRUNK, &mut memo);
        for id in self.branches[BranchId::TRUNK.index()].children.clone() {
            let flags = &mut self.branches[id.index()].flags;
            flags.set(BranchFlags::FIRST_BRANCH, false);
            flags.set(BranchFlags::ONLY_BRANCH, false);
        }
        if let Some(&first) = top.first() {
            let flags = &mut self.branches[first.index()].flags;
            flags.set(BranchFlags::FIRST_BRANCH, true);
            flags.set(BranchFlags::ONLY_BRANCH, top.len() == 1);
        }

        self.object_index.clear();
        self.rebuild_object_map(0);
        self.needs_full_rebuild = false;
    }

    fn rebuild_object_map(&mut self, start: usize) {
        trace!(
            "tree: re-indexing rows {start}..{}",
            self.object_list.len()
        );
        self.object_index.reserve(self.object_list.len().saturating_sub(start));
        for (idx, model) in self.object_list.iter().enumerate().skip(start) {
            self.object_index.insert(model.clone(), idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::error::FetchError;

    type Children = Rc<RefCell<FxHashMap<&'static str, Vec<&'static str>>>>;

    struct Fixture {
        tree: Tree<&'static str>,
        children: Children,
        fetches: Rc<Cell<usize>>,
    }

    fn fixture(roots: &[&'static str], edges: &[(&'static str, &[&'static str])]) -> Fixture {
        let children: Children = Rc::new(RefCell::new(
            edges
                .iter()
                .map(|(parent, kids)| (*parent, kids.to_vec()))
                .collect(),
        ));
        let fetches = Rc::new(Cell::new(0));

        let mut tree = Tree::new();
        let expandable = Rc::clone(&children);
        tree.set_can_expand_getter(move |model: &&'static str| {
            expandable.borrow().get(model).is_some_and(|kids| !kids.is_empty())
        });
        let source = Rc::clone(&children);
        let counter = Rc::clone(&fetches);
        tree.set_children_getter(
            move |model: &&'static str| -> Result<Vec<&'static str>, FetchError> {
                counter.set(counter.get() + 1);
                Ok(source.borrow().get(model).cloned().unwrap_or_default())
            },
        );
        tree.set_root_objects(roots.iter().copied())
            .expect("roots");

        Fixture {
            tree,
            children,
            fetches,
        }
    }

    fn assert_invariants<M: Clone + Eq + Hash + std::fmt::Debug>(tree: &Tree<M>) {
        assert_eq!(
            tree.object_count(),
            tree.branch_visible_descendent_count(BranchId::TRUNK)
        );
        assert_eq!(tree.object_index.len(), tree.object_list.len());
        for (idx, model) in tree.object_list.iter().enumerate() {
            assert_eq!(tree.object_index(model), Some(idx), "index of {model:?}");
            assert!(tree.is_visible(model), "{model:?} listed but hidden");
        }
    }

    fn rows(tree: &Tree<&'static str>) -> Vec<&'static str> {
        tree.objects().to_vec()
    }

    #[test]
    fn expand_and_collapse_splice_children() {
        let mut fx = fixture(&["A", "B"], &[("A", &["A1", "A2"])]);
        assert_eq!(rows(&fx.tree), vec!["A", "B"]);

        assert_eq!(fx.tree.expand(&"A").unwrap(), Some(0));
        assert_eq!(rows(&fx.tree), vec!["A", "A1", "A2", "B"]);
        assert_invariants(&fx.tree);

        assert_eq!(fx.tree.collapse(&"A"), Some(0));
        assert_eq!(rows(&fx.tree), vec!["A", "B"]);
        assert_invariants(&fx.tree);
        assert_eq!(fx.tree.object_index(&"A1"), None);
    }

    #[test]
    fn repeated_commands_are_no_ops() {
        let mut fx = fixture(&["A", "B"], &[("A", &["A1", "A2"])]);

        assert_eq!(fx.tree.collapse(&"A"), None);
        assert_eq!(fx.tree.expand(&"A").unwrap(), Some(0));
        assert_eq!(fx.tree.expand(&"A").unwrap(), None);
        assert_eq!(rows(&fx.tree), vec!["A", "A1", "A2", "B"]);

        assert_eq!(fx.tree.collapse(&"A"), Some(0));
        assert_eq!(fx.tree.collapse(&"A"), None);
        assert_eq!(rows(&fx.tree), vec!["A", "B"]);

        assert_eq!(fx.tree.expand(&"B").unwrap(), None);
        assert_eq!(fx.tree.expand(&"missing").unwrap(), None);
        assert_invariants(&fx.tree);
    }

    #[test]
    fn children_are_fetched_once() {
        let mut fx = fixture(&["A"], &[("A", &["A1"])]);
        fx.tree.expand(&"A").unwrap();
        fx.tree.collapse(&"A");
        fx.tree.expand(&"A").unwrap();
        assert_eq!(fx.fetches.get(), 1);
    }

    #[test]
    fn expand_all_and_collapse_all() {
        let mut fx = fixture(&["A"], &[("A", &["A1"]), ("A1", &["A1a"])]);

        assert_eq!(fx.tree.expand_all().unwrap(), 0);
        assert_eq!(rows(&fx.tree), vec!["A", "A1", "A1a"]);
        assert_invariants(&fx.tree);

        assert_eq!(fx.tree.collapse_all(), 0);
        assert_eq!(rows(&fx.tree), vec!["A"]);
        assert!(!fx.tree.is_expanded(&"A1"));
        assert_invariants(&fx.tree);
    }

    #[test]
    fn rebuild_children_replaces_visible_descendants() {
        let mut fx = fixture(&["A", "B"], &[("A", &["A1", "A2"])]);
        fx.tree.expand(&"A").unwrap();
        assert_eq!(rows(&fx.tree), vec!["A", "A1", "A2", "B"]);

        fx.children.borrow_mut().insert("A", vec!["A3"]);
        assert_eq!(fx.tree.rebuild_children(&"A").unwrap(), Some(0));

        assert_eq!(rows(&fx.tree), vec!["A", "A3", "B"]);
        assert_eq!(fx.tree.object_index(&"A1"), None);
        assert_eq!(fx.tree.object_index(&"A2"), None);
        assert!(fx.tree.get_branch(&"A1").is_none());
        assert_invariants(&fx.tree);
    }

    #[test]
    fn rebuild_children_drops_expansion_below() {
        let mut fx = fixture(&["A"], &[("A", &["A1"]), ("A1", &["A1a"])]);
        fx.tree.expand_all().unwrap();
        assert!(fx.tree.is_expanded(&"A1"));

        fx.tree.rebuild_children(&"A").unwrap();

        assert_eq!(rows(&fx.tree), vec!["A", "A1"]);
        assert!(!fx.tree.is_expanded(&"A1"));
        assert_invariants(&fx.tree);
    }

    #[test]
    fn leaves_are_never_fetched() {
        let mut tree: Tree<u32> = Tree::new();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&calls);
        tree.set_can_expand_getter(|model: &u32| *model == 1);
        tree.set_children_getter(move |model: &u32| -> Result<Vec<u32>, FetchError> {
            log.borrow_mut().push(*model);
            if *model == 1 {
                Ok(vec![10, 11])
            } else {
                Err(FetchError::new("not a directory"))
            }
        });
        tree.set_root_objects([1, 2]).unwrap();
        tree.set_expanded_objects([2]);

        assert_eq!(tree.rebuild_children(&2).unwrap(), Some(1));
        assert_eq!(tree.expand(&1).unwrap(), Some(0));
        assert_eq!(tree.rebuild_children(&10).unwrap(), Some(1));
        tree.expand_all().unwrap();

        assert_eq!(tree.objects(), &[1, 10, 11, 2]);
        assert_eq!(*calls.borrow(), vec![1]);
        assert_invariants(&tree);
    }

    #[test]
    fn hidden_branch_expansion_is_deferred() {
        let mut fx = fixture(&["A"], &[("A", &["A1"]), ("A1", &["A1a"])]);
        fx.tree.expand(&"A").unwrap();
        fx.tree.collapse(&"A");

        // A1 is known but hidden: the flag is recorded, the list is untouched.
        assert_eq!(fx.tree.expand(&"A1").unwrap(), None);
        assert_eq!(rows(&fx.tree), vec!["A"]);
        assert!(fx.tree.is_expanded(&"A1"));

        fx.tree.expand(&"A").unwrap();
        assert_eq!(rows(&fx.tree), vec!["A", "A1", "A1a"]);
        assert_invariants(&fx.tree);

        // Hidden collapse also only flips the flag.
        fx.tree.collapse(&"A");
        assert_eq!(fx.tree.collapse(&"A1"), None);
        assert!(!fx.tree.is_expanded(&"A1"));
        assert_eq!(rows(&fx.tree), vec!["A"]);
    }

    #[test]
    fn visibility_follows_ancestors() {
        let mut fx = fixture(&["A"], &[("A", &["A1"]), ("A1", &["A1a"])]);
        fx.tree.expand_all().unwrap();
        assert!(fx.tree.is_visible(&"A1a"));

        fx.tree.collapse(&"A");
        assert!(!fx.tree.is_visible(&"A1"));
        assert!(!fx.tree.is_visible(&"A1a"));
        assert_eq!(fx.tree.visible_descendent_count(&"A"), 0);
        assert!(fx.tree.is_visible(&"A"));
    }

    #[test]
    fn levels_and_traversal() {
        let mut fx = fixture(&["A"], &[("A", &["A1"]), ("A1", &["A1a"])]);
        fx.tree.expand_all().unwrap();

        assert_eq!(fx.tree.level(&"A"), Some(1));
        assert_eq!(fx.tree.level(&"A1a"), Some(3));
        assert_eq!(fx.tree.parent(&"A1a"), Some(&"A1"));
        assert_eq!(fx.tree.parent(&"A"), None);
        assert_eq!(fx.tree.children(&"A"), vec![&"A1"]);
        assert_eq!(fx.tree.ancestors(&"A1a"), vec![&"A", &"A1"]);

        let row = fx.tree.row_item(2).unwrap();
        assert_eq!(*row.model, "A1a");
        assert_eq!(row.indent, 2);
        assert_eq!(fx.tree.row_item(0).unwrap().indent, 0);
    }

    #[test]
    fn filter_keeps_ancestors_of_matches() {
        let mut fx = fixture(
            &["A", "B"],
            &[("A", &["A1", "A2"]), ("A1", &["leaf"]), ("B", &["B1"])],
        );
        fx.tree.expand_all().unwrap();

        let filter: Rc<dyn ModelFilter<&'static str>> =
            Rc::new(|model: &&'static str| *model == "leaf");
        fx.tree.apply_filters(Some(filter), None).unwrap();

        assert_eq!(rows(&fx.tree), vec!["A", "A1", "leaf"]);
        assert_eq!(fx.tree.filtered_children(&"A"), vec![&"A1"]);
        assert_invariants(&fx.tree);

        // Cached children survive filtering.
        fx.tree.apply_filters(None, None).unwrap();
        assert_eq!(rows(&fx.tree), vec!["A", "A1", "leaf", "A2", "B", "B1"]);
        assert_eq!(fx.fetches.get(), 3);
    }

    #[test]
    fn disabling_filtering_shows_everything() {
        let mut fx = fixture(&["A", "B"], &[]);
        let filter: Rc<dyn ModelFilter<&'static str>> = Rc::new(|model: &&'static str| *model == "B");
        fx.tree.apply_filters(Some(filter), None).unwrap();
        assert_eq!(rows(&fx.tree), vec!["B"]);

        fx.tree.set_use_filtering(false);
        assert_eq!(rows(&fx.tree), vec!["A", "B"]);
    }

    #[test]
    fn list_filters_are_rejected() {
        struct KeepAll;
        impl ListFilter<&'static str> for KeepAll {
            fn filter_list(&self, models: &[&'static str]) -> Vec<&'static str> {
                models.to_vec()
            }
        }

        let mut fx = fixture(&["A"], &[]);
        let result = fx.tree.apply_filters(None, Some(Box::new(KeepAll)));
        assert!(matches!(result, Err(TreeError::ListFilterUnsupported)));
    }

    #[test]
    fn sort_orders_children_and_later_expansions() {
        let mut fx = fixture(&["b", "a"], &[("b", &["b2", "b1"]), ("a", &["a2", "a1"])]);
        fx.tree
            .set_column_comparer(|_: usize, x: &&'static str, y: &&'static str| x.cmp(y));
        fx.tree.expand(&"b").unwrap();

        fx.tree.sort(Some(0), SortOrder::Ascending);
        assert_eq!(rows(&fx.tree), vec!["a", "b", "b1", "b2"]);

        // Children revealed after sorting use the same order.
        fx.tree.expand(&"a").unwrap();
        assert_eq!(rows(&fx.tree), vec!["a", "a1", "a2", "b", "b1", "b2"]);

        fx.tree.sort(Some(0), SortOrder::Descending);
        assert_eq!(rows(&fx.tree), vec!["b", "b2", "b1", "a", "a2", "a1"]);
        assert_invariants(&fx.tree);
    }

    #[test]
    fn sort_with_equal_keys_is_stable() {
        let mut fx = fixture(&["c", "a", "b"], &[("a", &["a2", "a1"])]);
        fx.tree
            .set_column_comparer(|_: usize, _: &&'static str, _: &&'static str| {
                std::cmp::Ordering::Equal
            });
        fx.tree.expand(&"a").unwrap();
        let before = rows(&fx.tree);

        fx.tree.sort(Some(3), SortOrder::Ascending);
        assert_eq!(rows(&fx.tree), before);
        fx.tree.sort(None, SortOrder::Ascending);
        fx.tree.sort(None, SortOrder::Ascending);
        assert_eq!(rows(&fx.tree), before);
    }

    #[test]
    fn root_flags_track_first_and_only() {
        let mut fx = fixture(&["A", "B"], &[("A", &["A1", "A2"])]);
        fx.tree.expand(&"A").unwrap();

        assert!(fx.tree.branch_flags(&"A").unwrap().is_first_branch());
        assert!(!fx.tree.branch_flags(&"A").unwrap().is_only_branch());
        assert!(fx.tree.branch_flags(&"A2").unwrap().is_last_child());
        assert!(!fx.tree.branch_flags(&"A1").unwrap().is_last_child());

        fx.tree.remove_objects(&["B"]).unwrap();
        assert!(fx.tree.branch_flags(&"A").unwrap().is_only_branch());
    }

    #[test]
    fn setting_roots_keeps_known_branches() {
        let mut fx = fixture(&["A", "B"], &[("A", &["A1"])]);
        fx.tree.expand(&"A").unwrap();

        fx.tree.set_root_objects(["C", "A"]).unwrap();
        assert_eq!(rows(&fx.tree), vec!["C", "A", "A1"]);
        assert!(fx.tree.get_branch(&"B").is_none());
        assert_eq!(fx.fetches.get(), 1);
        assert_invariants(&fx.tree);

        fx.tree.add_objects(["D"]).unwrap();
        assert_eq!(rows(&fx.tree), vec!["C", "A", "A1", "D"]);
    }

    #[test]
    fn moved_model_is_reparented() {
        let mut fx = fixture(&["A", "B"], &[("A", &["X"]), ("B", &["Y"])]);
        fx.tree.expand_all().unwrap();
        assert_eq!(rows(&fx.tree), vec!["A", "X", "B", "Y"]);

        // X moves from A to B.
        fx.children.borrow_mut().insert("A", vec![]);
        fx.children.borrow_mut().insert("B", vec!["Y", "X"]);
        let changed = fx.tree.rebuild_children(&"B").unwrap();

        assert_eq!(changed, Some(0));
        assert_eq!(rows(&fx.tree), vec!["A", "B", "Y", "X"]);
        assert_eq!(fx.tree.parent(&"X"), Some(&"B"));
        assert_invariants(&fx.tree);
    }

    #[test]
    fn failed_fetch_leaves_branch_collapsed_and_retryable() {
        let fail = Rc::new(Cell::new(true));
        let mut tree: Tree<u32> = Tree::new();
        tree.set_can_expand_getter(|model: &u32| *model == 1);
        let failing = Rc::clone(&fail);
        tree.set_children_getter(move |_: &u32| -> Result<Vec<u32>, FetchError> {
            if failing.get() {
                Err(FetchError::new("offline"))
            } else {
                Ok(vec![10, 11])
            }
        });
        tree.set_root_objects([1, 2]).unwrap();

        let result = tree.expand(&1);
        assert!(matches!(result, Err(TreeError::ChildrenFetch(_))));
        assert!(!tree.is_expanded(&1));
        assert!(tree.needs_fetch(&1));
        assert_eq!(tree.objects(), &[1, 2]);

        fail.set(false);
        assert_eq!(tree.expand(&1).unwrap(), Some(0));
        assert_eq!(tree.objects(), &[1, 10, 11, 2]);
        assert_invariants(&tree);
    }

    #[test]
    fn expanded_objects_round_trip_through_rebuild() {
        let mut fx = fixture(&["A", "B"], &[("A", &["A1"]), ("B", &["B1"])]);
        fx.tree.expand(&"B").unwrap();
        let expanded: Vec<_> = fx.tree.expanded_objects().copied().collect();

        let mut fresh = fx.tree.rebuilt();
        fresh.set_expanded_objects(expanded);
        let roots: Vec<_> = fx.tree.root_objects().copied().collect();
        fresh.set_root_objects(roots).unwrap();

        assert_eq!(fresh.objects(), &["A", "B", "B1"]);
        assert_invariants(&fresh);
    }

    #[test]
    fn search_text_wraps_around() {
        let fx = fixture(&["apple", "banana", "avocado"], &[]);
        let text = |model: &&'static str| *model;
        assert_eq!(fx.tree.search_text("AV", 0, 2, text), Some(2));
        assert_eq!(fx.tree.search_text("ap", 1, 0, text), Some(0));
        assert_eq!(fx.tree.search_text("kiwi", 0, 2, text), None);
    }

    #[test]
    fn large_expand_keeps_index_consistent() {
        let mut tree: Tree<u32> = Tree::new();
        tree.set_can_expand_getter(|model: &u32| *model < 100);
        tree.set_children_getter(|model: &u32| -> Result<Vec<u32>, FetchError> {
            Ok((0..50).map(|i| (model + 1) * 1000 + i).collect())
        });
        tree.set_root_objects(0..100).unwrap();

        for model in [50, 3, 99, 0] {
            tree.expand(&model).unwrap();
            assert_invariants(&tree);
        }
        assert_eq!(tree.object_count(), 100 + 4 * 50);
        tree.collapse(&3);
        assert_invariants(&tree);
        assert_eq!(tree.object_index(&4), Some(4 + 50));
    }
}
