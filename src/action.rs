/// Actions that a user or application can initiate on the tree view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeAction<Custom = ()> {
    /// Collapse the focused branch, or focus its parent if it is already collapsed.
    CollapseOrSelectParent,
    /// Focus the first child of an expanded branch, or expand a collapsed one.
    ExpandOrSelectChild,
    /// Toggle expansion of the focused branch.
    ToggleExpansion,
    /// Expand every branch in the tree.
    ExpandAll,
    /// Collapse every branch in the tree.
    CollapseAll,
    /// Move selection to the previous visible row.
    SelectPrev,
    /// Move selection to the next visible row.
    SelectNext,
    /// Select the first visible row.
    SelectFirst,
    /// Select the last visible row.
    SelectLast,
    /// Move selection one page up.
    PageUp,
    /// Move selection one page down.
    PageDown,
    /// Custom action forwarded to the caller without internal handling.
    Custom(Custom),
}

/// Result of handling an action or key event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeEvent<Custom = ()> {
    /// The action was handled internally and state was updated.
    Handled,
    /// The action was ignored (e.g., nothing selected / nothing to do).
    Unhandled,
    /// The action is forwarded to the caller for handling.
    Action(TreeAction<Custom>),
}
