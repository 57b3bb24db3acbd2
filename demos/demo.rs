use std::cmp::Ordering;
use std::env;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
    MouseEventKind,
};
use crossterm::execute;
use log::{LevelFilter, info, warn};
use ratatui::layout::{Constraint, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::Cell;
use ratatui::{DefaultTerminal, Frame};
use simplelog::{Config, WriteLogger};

use tui_virtual_treelist::{
    ColumnDef, FetchError, NoFilter, SimpleColumns, SortOrder, TreeLabelPrefix,
    TreeLabelProvider, TreeListController, TreeListView, TreeListViewStyle,
};

/// A directory entry. Identity is the path; metadata is captured when the parent is read.
#[derive(Clone, Debug)]
struct Entry {
    path: PathBuf,
    name: String,
    is_dir: bool,
    size: u64,
    modified: String,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Entry {}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl Entry {
    fn read(path: PathBuf, name: String) -> io::Result<Self> {
        let metadata = fs::symlink_metadata(&path)?;
        Ok(Self {
            path,
            name,
            is_dir: metadata.is_dir(),
            size: metadata.len(),
            modified: format_modified(&metadata),
        })
    }

    fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }
}

fn read_children(entry: &Entry) -> Result<Vec<Entry>, FetchError> {
    let mut children = Vec::new();
    for dir_entry in fs::read_dir(&entry.path)? {
        let dir_entry = dir_entry?;
        let name = dir_entry.file_name().to_string_lossy().to_string();
        match Entry::read(dir_entry.path(), name) {
            Ok(child) => children.push(child),
            Err(err) => warn!("demo: skipping {}: {err}", dir_entry.path().display()),
        }
    }
    children.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    Ok(children)
}

struct Label;

impl TreeLabelProvider<Entry> for Label {
    fn label_parts<'a>(&'a self, model: &'a Entry) -> TreeLabelPrefix<'a> {
        let label = TreeLabelPrefix::new(model.name.as_str());
        if model.is_dir {
            label.with_prefix("/")
        } else {
            label
        }
    }
}

fn size_cell(model: &Entry) -> Cell<'_> {
    if model.is_dir {
        Cell::from("-")
    } else {
        Cell::from(format_size(model.size))
    }
}

fn modified_cell(model: &Entry) -> Cell<'_> {
    Cell::from(model.modified.as_str())
}

fn compare_names(a: &Entry, b: &Entry) -> Ordering {
    a.name.to_lowercase().cmp(&b.name.to_lowercase())
}

fn compare_sizes(a: &Entry, b: &Entry) -> Ordering {
    a.size.cmp(&b.size)
}

fn compare_modified(a: &Entry, b: &Entry) -> Ordering {
    a.modified.cmp(&b.modified)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn format_modified(metadata: &fs::Metadata) -> String {
    match metadata.modified() {
        Ok(time) => {
            let datetime: DateTime<Local> = DateTime::from(time);
            datetime.format("%Y-%m-%d %H:%M:%S").to_string()
        }
        Err(_) => "-".to_string(),
    }
}

/// Sort state cycled by the `s` key: column, then direction.
struct SortCycle {
    column: usize,
    order: SortOrder,
}

impl SortCycle {
    const fn new() -> Self {
        Self {
            column: 0,
            order: SortOrder::None,
        }
    }

    fn advance(&mut self, column_count: usize) -> (Option<usize>, SortOrder) {
        self.order = match self.order {
            SortOrder::None => SortOrder::Ascending,
            SortOrder::Ascending => SortOrder::Descending,
            SortOrder::Descending => {
                self.column = (self.column + 1) % column_count;
                SortOrder::Ascending
            }
        };
        (Some(self.column), self.order)
    }
}

struct App<'a> {
    controller: TreeListController<Entry>,
    columns: SimpleColumns<2, Entry>,
    style: TreeListViewStyle<'a>,
    label: Label,
    sort: SortCycle,
    hide_dotfiles: bool,
    area: Rect,
}

impl App<'_> {
    fn widget(&self) -> TreeListView<'_, Entry, Label, SimpleColumns<2, Entry>> {
        TreeListView::new(&self.label, &self.columns, self.style.clone())
    }

    fn render(&mut self, frame: &mut Frame) {
        self.area = frame.area();
        let widget = TreeListView::new(&self.label, &self.columns, self.style.clone());
        frame.render_stateful_widget(widget, self.area, &mut self.controller);
    }

    fn toggle_dotfiles(&mut self) {
        self.hide_dotfiles = !self.hide_dotfiles;
        if self.hide_dotfiles {
            self.controller
                .set_model_filter(Some(|entry: &Entry| !entry.is_hidden()));
        } else {
            self.controller.set_model_filter::<NoFilter>(None);
        }
        info!("demo: hide dotfiles = {}", self.hide_dotfiles);
    }

    fn cycle_sort(&mut self) {
        let (column, order) = self.sort.advance(self.columns.column_count());
        info!("demo: sort by column {column:?} {order:?}");
        self.controller.sort(column, order);
    }

    fn refresh_focused(&mut self) {
        let Some(entry) = self.controller.focused_object().cloned() else {
            return;
        };
        if let Err(err) = self.controller.refresh_objects(&[entry]) {
            warn!("demo: refresh failed: {err}");
        }
    }

    fn click(&mut self, column: u16, row: u16) {
        let Some(hit) = self.widget().hit_test(self.area, &self.controller, column, row) else {
            return;
        };
        if hit.on_expander {
            if let Err(err) = self.controller.toggle_row(hit.row) {
                warn!("demo: toggle failed: {err}");
            }
        } else if let Some(entry) = self.controller.get_nth_object(hit.row).cloned() {
            self.controller.select_object(&entry);
        }
    }
}

fn run_app(mut terminal: DefaultTerminal, mut app: App<'_>) -> io::Result<()> {
    loop {
        if let Err(err) = app.controller.process_pending_refreshes() {
            warn!("demo: background refresh failed: {err}");
        }
        terminal.draw(|frame| app.render(frame))?;

        if !event::poll(Duration::from_millis(200))? {
            continue;
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Char('s') => app.cycle_sort(),
                KeyCode::Char('.') => app.toggle_dotfiles(),
                KeyCode::Char('r') => app.refresh_focused(),
                KeyCode::Char('R') => {
                    if let Err(err) = app.controller.rebuild_all(true) {
                        warn!("demo: rebuild failed: {err}");
                    }
                }
                _ => {
                    if let Err(err) = app.controller.handle_key(key) {
                        warn!("demo: {err}");
                    }
                }
            },
            Event::Mouse(mouse) if mouse.kind == MouseEventKind::Down(MouseButton::Left) => {
                app.click(mouse.column, mouse.row);
            }
            _ => {}
        }
    }

    Ok(())
}

fn main() -> io::Result<()> {
    let root = env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("."), PathBuf::from);
    if !root.is_dir() {
        eprintln!("Path is not a directory: {}", root.display());
        return Ok(());
    }
    let root = root.canonicalize()?;

    if let Ok(file) = File::create(Path::new("demo.log")) {
        let _ = WriteLogger::init(LevelFilter::Debug, Config::default(), file);
    }

    let mut controller = TreeListController::default();
    controller.set_can_expand_getter(|entry: &Entry| entry.is_dir);
    controller.set_children_getter(read_children);
    controller.on_branch_event(|event| {
        info!("demo: {:?} {}", event.kind(), event.model().path.display());
    });

    let columns = SimpleColumns::new(
        Constraint::Fill(1),
        "Name",
        [
            ColumnDef::new("Size", Constraint::Length(10), size_cell).sortable(compare_sizes),
            ColumnDef::new("Modified", Constraint::Length(19), modified_cell)
                .sortable(compare_modified),
        ],
    )
    .label_sortable(compare_names)
    .header_style(
        Style::default()
            .fg(Color::Rgb(229, 201, 133))
            .add_modifier(Modifier::BOLD),
    );
    controller.set_column_comparer(columns.clone());

    let name = root.display().to_string();
    let root_entry = Entry::read(root, name)?;
    if let Err(err) = controller.set_roots([root_entry.clone()]) {
        warn!("demo: {err}");
    }
    if let Err(err) = controller.expand(&root_entry) {
        warn!("demo: {err}");
    }
    controller.select_object(&root_entry);

    let style = TreeListViewStyle {
        title: Some(Line::from(
            " q quit | s sort | . dotfiles | r refresh | R rebuild ",
        )),
        block_style: Style::default()
            .fg(Color::Rgb(221, 227, 235))
            .bg(Color::Rgb(24, 28, 36)),
        border_style: Style::default().fg(Color::Rgb(92, 110, 140)),
        highlight_style: Style::default()
            .fg(Color::Rgb(255, 255, 255))
            .bg(Color::Rgb(52, 66, 96))
            .add_modifier(Modifier::BOLD),
        selected_style: Style::default().fg(Color::Rgb(136, 192, 208)),
        busy_style: Style::default().fg(Color::Rgb(235, 203, 139)),
        ..TreeListViewStyle::default()
    };

    let app = App {
        controller,
        columns,
        style,
        label: Label,
        sort: SortCycle::new(),
        hide_dotfiles: false,
        area: Rect::default(),
    };

    let terminal = ratatui::init();
    execute!(io::stdout(), EnableMouseCapture)?;
    let result = run_app(terminal, app);
    execute!(io::stdout(), DisableMouseCapture)?;
    ratatui::restore();
    result
}
