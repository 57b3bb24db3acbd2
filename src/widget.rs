use std::hash::Hash;
use std::marker::PhantomData;

use ratatui::layout::{Constraint, Rect};
use ratatui::prelude::Buffer;
use ratatui::text::Span;
use ratatui::widgets::{
    Block, Borders, Cell, HighlightSpacing, Row, Scrollbar, ScrollbarOrientation,
    ScrollbarState, StatefulWidget, Table, TableState,
};
use smallvec::SmallVec;

use crate::columns::TreeColumns;
use crate::controller::TreeListController;
use crate::glyphs::{TreeGlyphs, TreeLabelRenderer};
use crate::host::{ListHost, TableHost};
use crate::style::TreeListViewStyle;

/// Result of mapping a terminal position onto the tree view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeHit {
    /// Row index in the flat visible list.
    pub row: usize,
    /// The position is on the row's expander glyph.
    pub on_expander: bool,
}

/// Основной виджет дерева (table + stateful).
///
/// Only the rows inside the viewport are materialized on each render.
pub struct TreeListView<'a, M, L, C>
where
    L: TreeLabelRenderer<M>,
    C: TreeColumns<M>,
{
    label: &'a L,
    columns: &'a C,
    style: TreeListViewStyle<'a>,
    glyphs: TreeGlyphs<'a>,
    _model: PhantomData<fn(&M)>,
}

impl<'a, M, L, C> TreeListView<'a, M, L, C>
where
    M: Clone + Eq + Hash,
    L: TreeLabelRenderer<M>,
    C: TreeColumns<M>,
{
    pub const fn new(label: &'a L, columns: &'a C, style: TreeListViewStyle<'a>) -> Self {
        Self {
            label,
            columns,
            style,
            glyphs: TreeGlyphs::unicode(),
            _model: PhantomData,
        }
    }

    #[must_use]
    pub const fn glyphs(mut self, glyphs: TreeGlyphs<'a>) -> Self {
        self.glyphs = glyphs;
        self
    }

    /// Maps a terminal cell to the row under it, as rendered into `area`.
    pub fn hit_test(
        &self,
        area: Rect,
        state: &TreeListController<M, TableHost>,
        column: u16,
        row: u16,
    ) -> Option<TreeHit> {
        let inner = self.block().inner(area);
        let header_height = u16::from(self.columns.header().is_some());
        let rows_top = inner.y.saturating_add(header_height);
        if row < rows_top || row >= inner.bottom() || column < inner.x || column >= inner.right() {
            return None;
        }

        let index = state.host().top_index() + usize::from(row - rows_top);
        let item = state.row_item(index)?;

        let symbol_width = u16::try_from(Span::raw(self.style.highlight_symbol).width())
            .unwrap_or(u16::MAX);
        let (start, width) = self.glyphs.expander_span(item.indent);
        let expander_x = inner.x.saturating_add(symbol_width).saturating_add(start);
        let on_expander =
            item.can_expand && column >= expander_x && column < expander_x.saturating_add(width);
        Some(TreeHit {
            row: index,
            on_expander,
        })
    }

    fn block(&self) -> Block<'a> {
        let mut block = Block::default().borders(self.style.borders);
        if let Some(title) = self.style.title.clone() {
            block = block.title(title);
        }
        block
            .style(self.style.block_style)
            .border_style(self.style.border_style)
    }

    #[inline]
    fn build_rows<'s>(
        &self,
        state: &'s TreeListController<M, TableHost>,
        range: std::ops::Range<usize>,
    ) -> Vec<Row<'s>>
    where
        'a: 's,
    {
        let selected = state.host().selected_indices();
        let focused = state.host().focused_index();
        let label: &'s L = self.label;
        let columns: &'s C = self.columns;
        let glyphs: TreeGlyphs<'s> = self.glyphs;

        let mut rows = Vec::with_capacity(range.len());
        for index in range {
            let Some(item) = state.row_item(index) else {
                break;
            };
            let mut cells = SmallVec::<[Cell; 8]>::new();
            cells.push(label.cell(&item, &glyphs));
            cells.extend(columns.cells(item.model));
            let mut row = Row::new(cells);
            if focused != Some(index) && selected.binary_search(&index).is_ok() {
                row = row.style(self.style.selected_style);
            }
            rows.push(row);
        }
        rows
    }

    #[inline]
    fn build_table<'s>(
        &self,
        rows: Vec<Row<'s>>,
        constraints: &[Constraint],
        block: Block<'s>,
        header: Option<Row<'s>>,
    ) -> Table<'s>
    where
        'a: 's,
    {
        let mut table = Table::new(rows, constraints.iter().copied())
            .style(self.style.block_style)
            .block(block)
            .row_highlight_style(self.style.highlight_style)
            .highlight_symbol(self.style.highlight_symbol)
            .highlight_spacing(HighlightSpacing::Always);
        if let Some(header) = header {
            table = table.header(header);
        }
        table
    }

    #[inline]
    fn render_scrollbar(
        area: Rect,
        buf: &mut Buffer,
        offset: usize,
        inner_height: usize,
        scroll_rows: usize,
    ) {
        let scroll_len = scroll_rows.saturating_add(1);
        let position = offset.min(scroll_len.saturating_sub(1));
        let mut scrollbar_state = ScrollbarState::new(scroll_len)
            .position(position)
            .viewport_content_length(inner_height);
        Scrollbar::default()
            .orientation(ScrollbarOrientation::VerticalRight)
            .render(area, buf, &mut scrollbar_state);
    }
}

impl<M, L, C> StatefulWidget for TreeListView<'_, M, L, C>
where
    M: Clone + Eq + Hash,
    L: TreeLabelRenderer<M>,
    C: TreeColumns<M>,
{
    type State = TreeListController<M, TableHost>;

    fn render(self, area: Rect, buf: &mut Buffer, state: &mut Self::State) {
        let header = self.columns.header();
        let header_height = u16::from(header.is_some());

        let mut block = self.block();
        if state.host().is_busy() {
            block = block.border_style(self.style.busy_style);
        }

        let inner_height = block.inner(area).height.saturating_sub(header_height) as usize;
        {
            // Commands already scrolled; only a resize may push focus off screen.
            let host = state.host_mut();
            let resized = host.viewport_height() != inner_height.max(1);
            host.set_scroll_policy(self.style.scroll_policy);
            host.set_viewport_height(inner_height);
            if resized {
                host.scroll_to_focus();
            }
        }

        let state: &TreeListController<M, TableHost> = state;
        let total_rows = state.object_count();
        let offset = state.host().top_index().min(total_rows);
        let range_end = (offset + inner_height).min(total_rows);
        let rows = self.build_rows(state, offset..range_end);

        // The table only sees the materialized window.
        let mut table_state = TableState::default();
        if let Some(focused) = state.host().focused_index()
            && (offset..range_end).contains(&focused)
        {
            table_state.select(Some(focused - offset));
        }

        let scroll_rows = total_rows.saturating_sub(inner_height);
        let (table_area, table_block, constraints, scrollbar_area) = if scroll_rows > 0 {
            let table_area = Rect {
                width: area.width.saturating_sub(1),
                ..area
            };
            let scrollbar_area = Rect {
                x: area.x + area.width.saturating_sub(1),
                y: area.y,
                width: 1,
                height: area.height,
            };
            let mut table_borders = self.style.borders;
            table_borders.remove(Borders::RIGHT);
            let table_block = block.borders(table_borders);
            let constraints = self
                .columns
                .constraints_for_area(table_block.inner(table_area));
            (table_area, table_block, constraints, Some(scrollbar_area))
        } else {
            let constraints = self.columns.constraints_for_area(block.inner(area));
            (area, block, constraints, None)
        };

        let table = self.build_table(rows, constraints.as_slice(), table_block, header);
        table.render(table_area, buf, &mut table_state);

        if let Some(scrollbar_area) = scrollbar_area {
            Self::render_scrollbar(scrollbar_area, buf, offset, inner_height, scroll_rows);
        }
    }
}
