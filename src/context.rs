use crate::branch::BranchFlags;

/// Display data for one visible row, produced on demand from a row index.
///
/// Only rows inside the viewport are ever materialized, so a tree with millions of visible
/// rows never needs more than a page of these at once.
#[derive(Debug)]
pub struct RowItem<'a, M> {
    /// Row index in the flat visible list.
    pub index: usize,
    pub model: &'a M,
    /// Depth of the branch: top-level objects are at level 1.
    pub level: u16,
    /// Indentation steps for rendering (`level - 1`, so roots have no indent).
    pub indent: u16,
    pub can_expand: bool,
    pub is_expanded: bool,
    pub flags: BranchFlags,
}

impl<M> Clone for RowItem<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for RowItem<'_, M> {}
