//! Virtualized tree-within-list engine for ratatui.
//!
//! A [`Tree`] presents a lazily loaded hierarchy as a flat list of visible rows: expanding a
//! branch fetches its children on first use and splices them in after the parent, collapsing
//! removes them again. [`TreeListController`] keeps a virtual list host (by default
//! [`TableHost`]) in sync with those changes, and [`TreeListView`] renders only the rows in
//! the viewport.
//!
//! Feature flags:
//! - `keymap`: crossterm-based key bindings and `TreeListController::handle_key*` helpers.
//! - `serde`: serde support for `TreeListSnapshot`, `TreeListConfig` and `TreeScrollPolicy`.

mod action;
mod branch;
mod columns;
mod config;
mod context;
mod controller;
mod error;
mod glyphs;
mod host;
#[cfg(feature = "keymap")]
mod keymap;
mod model;
pub mod prelude;
mod style;
mod tree;
mod widget;

pub use action::{TreeAction, TreeEvent};
pub use branch::{Branch, BranchComparer, BranchFlags, BranchId};
pub use columns::{ColumnDef, ColumnFn, CompareFn, SimpleColumns, TreeColumns};
pub use config::TreeListConfig;
pub use context::RowItem;
pub use controller::{
    BranchEvent, BranchEventKind, RefreshHandle, TreeListController, TreeListSnapshot,
};
pub use error::{FetchError, TreeError, TreeResult};
pub use glyphs::{
    TreeGlyphs, TreeLabelPrefix, TreeLabelProvider, TreeLabelRenderer, tree_label_line,
    tree_name_cell,
};
pub use host::{ListHost, TableHost};
#[cfg(feature = "keymap")]
pub use keymap::{KeyBinding, KeymapProfile, TreeKeyBindings};
pub use model::{
    CanExpandGetter, ChildrenGetter, ColumnComparer, ListFilter, ModelFilter, NoFilter,
    SortOrder,
};
pub use style::{TreeListViewStyle, TreeScrollPolicy};
pub use tree::Tree;
pub use widget::{TreeHit, TreeListView};
