pub use crate::{
    BranchEvent, BranchEventKind, CanExpandGetter, ChildrenGetter, ColumnComparer, ColumnDef,
    ColumnFn, FetchError, ListHost, ModelFilter, NoFilter, RefreshHandle, RowItem,
    SimpleColumns, SortOrder, TableHost, Tree, TreeAction, TreeColumns, TreeError, TreeEvent,
    TreeGlyphs, TreeHit, TreeLabelPrefix, TreeLabelProvider, TreeLabelRenderer,
    TreeListConfig, TreeListController, TreeListSnapshot, TreeListView, TreeListViewStyle,
    TreeResult, TreeScrollPolicy, tree_label_line, tree_name_cell,
};

#[cfg(feature = "keymap")]
pub use crate::{KeyBinding, KeymapProfile, TreeKeyBindings};
