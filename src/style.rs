use ratatui::style::Style;
use ratatui::text::Line;
use ratatui::widgets::Borders;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Политика скролла при изменении выбранной строки.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TreeScrollPolicy {
    #[default]
    KeepInView,
    CenterOnSelect,
}

/// Визуальные настройки виджета дерева.
#[derive(Clone)]
pub struct TreeListViewStyle<'a> {
    pub title: Option<Line<'a>>,
    pub block_style: Style,
    pub border_style: Style,
    /// Style of the focused row.
    pub highlight_style: Style,
    /// Style of selected rows other than the focused one.
    pub selected_style: Style,
    pub busy_style: Style,
    pub highlight_symbol: &'a str,
    pub borders: Borders,
    pub scroll_policy: TreeScrollPolicy,
}

impl Default for TreeListViewStyle<'_> {
    fn default() -> Self {
        Self {
            title: None,
            block_style: Style::default(),
            border_style: Style::default(),
            highlight_style: Style::default(),
            selected_style: Style::default(),
            busy_style: Style::default(),
            highlight_symbol: ">> ",
            borders: Borders::ALL,
            scroll_policy: TreeScrollPolicy::KeepInView,
        }
    }
}
