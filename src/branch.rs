use std::cmp::Ordering;
use std::rc::Rc;

use crate::model::{ColumnComparer, SortOrder};

/// Index of a branch inside a tree's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(usize);

impl BranchId {
    /// The synthetic root whose children are the top-level model objects.
    pub const TRUNK: Self = Self(0);

    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    pub(crate) const fn index(self) -> usize {
        self.0
    }
}

/// Positional flags recomputed every time a branch's parent is flattened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BranchFlags(u8);

impl BranchFlags {
    /// First top-level branch in the visible list.
    pub const FIRST_BRANCH: Self = Self(1);
    /// Last visible child of its parent.
    pub const LAST_CHILD: Self = Self(2);
    /// The only top-level branch in the visible list.
    pub const ONLY_BRANCH: Self = Self(4);

    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn set(&mut self, flag: Self, on: bool) {
        if on {
            self.0 |= flag.0;
        } else {
            self.0 &= !flag.0;
        }
    }

    pub const fn is_first_branch(self) -> bool {
        self.contains(Self::FIRST_BRANCH)
    }

    pub const fn is_last_child(self) -> bool {
        self.contains(Self::LAST_CHILD)
    }

    pub const fn is_only_branch(self) -> bool {
        self.contains(Self::ONLY_BRANCH)
    }
}

/// One `(model, parent)` pair in the tree.
///
/// Branches own their children through the arena order `trunk -> children`; `parent` is a
/// back-reference only and is overwritten when a model is moved under another parent.
/// Expansion state lives in the tree, keyed by model, so it survives a rebuild.
#[derive(Clone, Debug)]
pub struct Branch<M> {
    pub(crate) model: Option<M>,
    pub(crate) parent: Option<BranchId>,
    pub(crate) children: Vec<BranchId>,
    pub(crate) already_has_children: bool,
    pub(crate) flags: BranchFlags,
}

impl<M> Branch<M> {
    pub(crate) const fn new(parent: Option<BranchId>, model: Option<M>) -> Self {
        Self {
            model,
            parent,
            children: Vec::new(),
            already_has_children: false,
            flags: BranchFlags::empty(),
        }
    }

    /// The wrapped model, `None` for the trunk.
    pub const fn model(&self) -> Option<&M> {
        self.model.as_ref()
    }

    pub const fn parent(&self) -> Option<BranchId> {
        self.parent
    }

    /// Cached child branches as of the last fetch.
    pub fn child_branches(&self) -> &[BranchId] {
        &self.children
    }

    pub const fn flags(&self) -> BranchFlags {
        self.flags
    }

    /// Drops fetched children so the next fetch calls the getter again.
    pub(crate) fn clear_cached_info(&mut self) {
        self.children.clear();
        self.already_has_children = false;
    }
}

/// Orders branches by comparing their models under a column.
///
/// Ties on the primary column fall back to column 0 in the same direction; remaining ties
/// keep their current order because the sort is stable.
#[derive(Clone)]
pub struct BranchComparer<M> {
    comparer: Rc<dyn ColumnComparer<M>>,
    column: usize,
    order: SortOrder,
}

impl<M> BranchComparer<M> {
    pub fn new(comparer: Rc<dyn ColumnComparer<M>>, column: usize, order: SortOrder) -> Self {
        Self {
            comparer,
            column,
            order,
        }
    }

    /// Compares two model objects; `None` models (the trunk) sort first.
    pub fn compare_models(&self, a: Option<&M>, b: Option<&M>) -> Ordering {
        let (a, b) = match (a, b) {
            (Some(a), Some(b)) => (a, b),
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
        };
        let primary = self.order.apply(self.comparer.compare(self.column, a, b));
        if primary != Ordering::Equal || self.column == 0 {
            return primary;
        }
        self.order.apply(self.comparer.compare(0, a, b))
    }

    pub fn compare(&self, a: &Branch<M>, b: &Branch<M>) -> Ordering {
        self.compare_models(a.model(), b.model())
    }
}
