#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Behavior switches for a [`TreeListController`](crate::TreeListController).
///
/// ```
/// use tui_virtual_treelist::TreeListConfig;
///
/// let config = TreeListConfig::new()
///     .reveal_after_expand(false)
///     .use_filtering(true);
/// assert!(!config.reveals_after_expand());
/// ```
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeListConfig {
    reveal_after_expand: bool,
    use_wait_cursor_when_expanding: bool,
    use_filtering: bool,
}

impl Default for TreeListConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeListConfig {
    pub const fn new() -> Self {
        Self {
            reveal_after_expand: true,
            use_wait_cursor_when_expanding: true,
            use_filtering: true,
        }
    }

    /// Scroll so that newly revealed children are on screen after an expand.
    #[must_use]
    pub const fn reveal_after_expand(mut self, enabled: bool) -> Self {
        self.reveal_after_expand = enabled;
        self
    }

    /// Raise the host's busy indicator while children are being fetched.
    #[must_use]
    pub const fn use_wait_cursor_when_expanding(mut self, enabled: bool) -> Self {
        self.use_wait_cursor_when_expanding = enabled;
        self
    }

    /// Apply the installed model filter.
    #[must_use]
    pub const fn use_filtering(mut self, enabled: bool) -> Self {
        self.use_filtering = enabled;
        self
    }

    pub const fn reveals_after_expand(&self) -> bool {
        self.reveal_after_expand
    }

    pub const fn uses_wait_cursor_when_expanding(&self) -> bool {
        self.use_wait_cursor_when_expanding
    }

    pub const fn uses_filtering(&self) -> bool {
        self.use_filtering
    }
}
