use std::cmp::Ordering;

use ratatui::layout::{Constraint, Rect};
use ratatui::style::Style;
use ratatui::widgets::{Cell, Row};
use smallvec::SmallVec;

use crate::model::ColumnComparer;

/// Column layout and cell rendering for tree rows.
pub trait TreeColumns<M> {
    /// Returns the constraint for the label (tree) column.
    fn label_constraint(&self) -> Constraint;
    /// Returns constraints for the additional columns.
    fn other_constraints(&self) -> &[Constraint];
    /// Returns an optional header row for the table.
    fn header(&self) -> Option<Row<'_>> {
        None
    }
    /// Returns cells for the additional columns of a row.
    fn cells<'a>(&'a self, model: &'a M) -> SmallVec<[Cell<'a>; 8]>;
    /// Returns constraints for all columns based on the available area.
    fn constraints_for_area(&self, _area: Rect) -> SmallVec<[Constraint; 8]> {
        let mut constraints = SmallVec::<[Constraint; 8]>::new();
        constraints.push(self.label_constraint());
        constraints.extend_from_slice(self.other_constraints());
        constraints
    }
}

/// Function pointer type for rendering a single column cell.
pub type ColumnFn<M> = for<'a> fn(&'a M) -> Cell<'a>;

/// Function pointer type for ordering two models by one column.
pub type CompareFn<M> = fn(&M, &M) -> Ordering;

/// Column definition: header label, width constraint, cell renderer and sort key.
pub struct ColumnDef<M> {
    /// Header label for the column.
    pub header: &'static str,
    /// Width constraint for the column.
    pub constraint: Constraint,
    /// Renderer for the column cell.
    pub cell: ColumnFn<M>,
    /// Ascending comparison used when sorting by this column.
    pub compare: Option<CompareFn<M>>,
}

impl<M> Clone for ColumnDef<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for ColumnDef<M> {}

impl<M> ColumnDef<M> {
    /// Creates a new column definition.
    pub const fn new(header: &'static str, constraint: Constraint, cell: ColumnFn<M>) -> Self {
        Self {
            header,
            constraint,
            cell,
            compare: None,
        }
    }

    /// Makes the column sortable.
    #[must_use]
    pub const fn sortable(mut self, compare: CompareFn<M>) -> Self {
        self.compare = Some(compare);
        self
    }
}

/// Fixed-width column layout with optional header.
///
/// Column 0 is the tree label; columns `1..=N` are the extra columns. The layout doubles as
/// a [`ColumnComparer`] so the same definitions drive rendering and sorting.
pub struct SimpleColumns<const N: usize, M> {
    label_constraint: Constraint,
    label_header: &'static str,
    label_compare: Option<CompareFn<M>>,
    columns: [ColumnDef<M>; N],
    constraints: [Constraint; N],
    header_style: Style,
    show_header: bool,
}

impl<const N: usize, M> Clone for SimpleColumns<N, M> {
    fn clone(&self) -> Self {
        Self {
            label_constraint: self.label_constraint,
            label_header: self.label_header,
            label_compare: self.label_compare,
            columns: self.columns,
            constraints: self.constraints,
            header_style: self.header_style,
            show_header: self.show_header,
        }
    }
}

impl<const N: usize, M> SimpleColumns<N, M> {
    /// Creates a new fixed column layout.
    pub fn new(
        label_constraint: Constraint,
        label_header: &'static str,
        columns: [ColumnDef<M>; N],
    ) -> Self {
        let constraints = std::array::from_fn(|idx| columns[idx].constraint);
        Self {
            label_constraint,
            label_header,
            label_compare: None,
            columns,
            constraints,
            header_style: Style::default(),
            show_header: true,
        }
    }

    /// Sets the comparison used when sorting by the label column.
    #[must_use]
    pub const fn label_sortable(mut self, compare: CompareFn<M>) -> Self {
        self.label_compare = Some(compare);
        self
    }

    /// Sets the header row style.
    #[must_use]
    pub const fn header_style(mut self, style: Style) -> Self {
        self.header_style = style;
        self
    }

    /// Disables the header row.
    #[must_use]
    pub const fn without_header(mut self) -> Self {
        self.show_header = false;
        self
    }

    /// Total number of columns including the label column.
    pub const fn column_count(&self) -> usize {
        N + 1
    }
}

impl<const N: usize, M> TreeColumns<M> for SimpleColumns<N, M> {
    fn label_constraint(&self) -> Constraint {
        self.label_constraint
    }

    fn other_constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    fn header(&self) -> Option<Row<'_>> {
        if !self.show_header {
            return None;
        }

        let mut cells = SmallVec::<[Cell; 8]>::new();
        cells.push(Cell::from(self.label_header));
        for column in &self.columns {
            cells.push(Cell::from(column.header));
        }

        Some(Row::new(cells).style(self.header_style))
    }

    fn cells<'a>(&'a self, model: &'a M) -> SmallVec<[Cell<'a>; 8]> {
        let mut cells = SmallVec::<[Cell<'a>; 8]>::new();
        for column in &self.columns {
            cells.push((column.cell)(model));
        }
        cells
    }
}

impl<const N: usize, M> ColumnComparer<M> for SimpleColumns<N, M> {
    fn compare(&self, column: usize, a: &M, b: &M) -> Ordering {
        let compare = match column {
            0 => self.label_compare,
            _ => self.columns.get(column - 1).and_then(|def| def.compare),
        };
        compare.map_or(Ordering::Equal, |compare| compare(a, b))
    }
}
