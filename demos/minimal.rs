// Minimal example: a lazily expanded tree with a single label column, rendered headless.
use ratatui::layout::{Constraint, Rect};
use ratatui::prelude::Buffer;
use ratatui::widgets::StatefulWidget;

use tui_virtual_treelist::{
    FetchError, SimpleColumns, TreeLabelPrefix, TreeLabelProvider, TreeListController,
    TreeListView, TreeListViewStyle,
};

// Models are plain identity handles; here just names.
fn children_of(name: &&'static str) -> Result<Vec<&'static str>, FetchError> {
    Ok(match *name {
        "root" => vec!["alpha", "beta"],
        "alpha" => vec!["alpha.1", "alpha.2"],
        _ => Vec::new(),
    })
}

// Label provider: maps a model to the visible name.
struct Label;

impl TreeLabelProvider<&'static str> for Label {
    fn label_parts<'a>(&'a self, model: &'a &'static str) -> TreeLabelPrefix<'a> {
        TreeLabelPrefix::new(*model)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The controller owns the tree and the list host; it must live across frames.
    let mut controller = TreeListController::default();
    controller.set_can_expand_getter(|name: &&'static str| !name.contains('.') && *name != "beta");
    controller.set_children_getter(children_of);
    controller.set_roots(["root"])?;

    // Children are fetched on first expand.
    controller.expand(&"root")?;
    controller.expand(&"alpha")?;

    let label = Label;
    // Single-column layout: just the label, no header.
    let columns = SimpleColumns::<0, &'static str>::new(Constraint::Percentage(100), "", [])
        .without_header();

    let widget = TreeListView::new(&label, &columns, TreeListViewStyle::default());

    // Render into an in-memory buffer (no terminal required for the example).
    let area = Rect::new(0, 0, 40, 8);
    let mut buffer = Buffer::empty(area);
    widget.render(area, &mut buffer, &mut controller);

    for y in area.top()..area.bottom() {
        let line: String = (area.left()..area.right())
            .map(|x| buffer[(x, y)].symbol())
            .collect();
        println!("{line}");
    }
    Ok(())
}
