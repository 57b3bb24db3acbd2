use std::cmp::Ordering;

use crate::error::FetchError;

/// Decides whether a model object can be expanded.
///
/// Model objects are identity handles: `Clone + Eq + Hash`, stable for as long as they
/// appear in the tree. A model object must appear at most once in the tree (no DAG, no
/// cycles); the engine keeps a single branch per object.
pub trait CanExpandGetter<M> {
    /// Returns `true` if `model` may have children.
    fn can_expand(&self, model: &M) -> bool;
}

impl<M, F> CanExpandGetter<M> for F
where
    F: Fn(&M) -> bool,
{
    #[inline]
    fn can_expand(&self, model: &M) -> bool {
        self(model)
    }
}

/// Supplies the children of a model object.
///
/// Only called for a model whose [`CanExpandGetter`] most recently returned `true`, and at
/// most once per branch until its cache is cleared.
pub trait ChildrenGetter<M> {
    /// Returns the children of `model` in their natural order.
    fn children(&self, model: &M) -> Result<Vec<M>, FetchError>;
}

impl<M, F> ChildrenGetter<M> for F
where
    F: Fn(&M) -> Result<Vec<M>, FetchError>,
{
    #[inline]
    fn children(&self, model: &M) -> Result<Vec<M>, FetchError> {
        self(model)
    }
}

/// Per-model visibility filter.
///
/// Filtering is ancestor-inclusive: a branch that fails the filter stays visible when any of
/// its (cached) descendants pass.
pub trait ModelFilter<M> {
    /// Returns `true` if the model matches the filter criteria.
    fn filter(&self, model: &M) -> bool;
}

impl<M, F> ModelFilter<M> for F
where
    F: Fn(&M) -> bool,
{
    #[inline]
    fn filter(&self, model: &M) -> bool {
        self(model)
    }
}

/// Whole-list filter. Tree views reject these; see [`TreeError::ListFilterUnsupported`].
///
/// [`TreeError::ListFilterUnsupported`]: crate::TreeError::ListFilterUnsupported
pub trait ListFilter<M> {
    /// Returns the subset of `models` that should be shown.
    fn filter_list(&self, models: &[M]) -> Vec<M>;
}

/// Filter that matches every model.
#[derive(Clone, Copy, Debug)]
pub struct NoFilter;

impl<M> ModelFilter<M> for NoFilter {
    #[inline]
    fn filter(&self, _model: &M) -> bool {
        true
    }
}

/// Compares two model objects under a given column.
pub trait ColumnComparer<M> {
    fn compare(&self, column: usize, a: &M, b: &M) -> Ordering;
}

impl<M, F> ColumnComparer<M> for F
where
    F: Fn(usize, &M, &M) -> Ordering,
{
    #[inline]
    fn compare(&self, column: usize, a: &M, b: &M) -> Ordering {
        self(column, a, b)
    }
}

/// Sort direction for a column.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Leaves the current order untouched.
    #[default]
    None,
    Ascending,
    Descending,
}

impl SortOrder {
    /// Applies the direction to an ascending comparison result.
    #[inline]
    pub const fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Self::None => Ordering::Equal,
            Self::Ascending => ordering,
            Self::Descending => ordering.reverse(),
        }
    }
}
