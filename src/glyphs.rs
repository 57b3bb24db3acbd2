use std::borrow::Cow;

use ratatui::text::{Line, Span};
use ratatui::widgets::Cell;

use crate::context::RowItem;

#[derive(Clone, Copy, Debug)]
pub struct TreeGlyphs<'a> {
    pub indent: &'a str,
    pub leaf: &'a str,
    pub expanded: &'a str,
    pub collapsed: &'a str,
}

impl TreeGlyphs<'static> {
    pub const fn unicode() -> Self {
        Self {
            indent: "  ",
            leaf: " ",
            expanded: "▼",
            collapsed: "▶",
        }
    }

    pub const fn ascii() -> Self {
        Self {
            indent: "  ",
            leaf: " ",
            expanded: "v",
            collapsed: ">",
        }
    }
}

impl<'a> TreeGlyphs<'a> {
    /// Expander glyph for a row.
    pub const fn expander(&self, can_expand: bool, is_expanded: bool) -> &'a str {
        match (can_expand, is_expanded) {
            (true, true) => self.expanded,
            (true, false) => self.collapsed,
            (false, _) => self.leaf,
        }
    }

    /// Column range `(start, width)` of the expander within the label cell.
    pub fn expander_span(&self, indent: u16) -> (u16, u16) {
        let step = u16::try_from(Span::raw(self.indent).width()).unwrap_or(u16::MAX);
        let width = u16::try_from(Span::raw(self.collapsed).width()).unwrap_or(1);
        (step.saturating_mul(indent), width.max(1))
    }
}

#[derive(Clone, Debug)]
pub struct TreeLabelPrefix<'a> {
    pub name: Cow<'a, str>,
    pub prefix: Option<Cow<'a, str>>,
}

impl<'a> TreeLabelPrefix<'a> {
    pub fn new(name: impl Into<Cow<'a, str>>) -> Self {
        Self {
            name: name.into(),
            prefix: None,
        }
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<Cow<'a, str>>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

pub trait TreeLabelProvider<M> {
    fn label_parts<'a>(&'a self, model: &'a M) -> TreeLabelPrefix<'a>;
}

pub trait TreeLabelRenderer<M> {
    fn cell<'a>(&'a self, row: &RowItem<'a, M>, glyphs: &TreeGlyphs<'a>) -> Cell<'a>;
}

impl<M, P> TreeLabelRenderer<M> for P
where
    P: TreeLabelProvider<M>,
{
    fn cell<'a>(&'a self, row: &RowItem<'a, M>, glyphs: &TreeGlyphs<'a>) -> Cell<'a> {
        let parts = self.label_parts(row.model);
        tree_name_cell(row, parts, glyphs)
    }
}

pub fn tree_label_line<'a, M>(
    row: &RowItem<'_, M>,
    parts: TreeLabelPrefix<'a>,
    glyphs: &TreeGlyphs<'a>,
) -> Line<'a> {
    let TreeLabelPrefix { name, prefix: op } = parts;
    let op = op.filter(|value| !value.is_empty());

    let mut spans = Vec::with_capacity(usize::from(row.indent) + 5);
    for _ in 0..row.indent {
        spans.push(Span::raw(glyphs.indent));
    }
    spans.push(Span::raw(glyphs.expander(row.can_expand, row.is_expanded)));
    spans.push(Span::raw(" "));
    if let Some(op) = op {
        spans.push(Span::raw(op));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::raw(name));
    Line::from(spans)
}

pub fn tree_name_cell<'a, M>(
    row: &RowItem<'_, M>,
    parts: TreeLabelPrefix<'a>,
    glyphs: &TreeGlyphs<'a>,
) -> Cell<'a> {
    Cell::from(tree_label_line(row, parts, glyphs))
}
