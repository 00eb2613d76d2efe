// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use mesa_app::{
    Column, ColumnLayout, ColumnPref, ColumnType, EntityTableManager, ExportFormat, ExportJob,
    ExportScope, FetchOutcome, FetchRequest, GridLayout, GroupOption, MAX_VISIBLE_PAGE_LINKS,
    NoticeLevel, PAGE_SIZE_CHOICES, PageLink, RequestToken, Row, RowActionKind, ScopeKey,
    ServiceCall, SortDirection, Sticky, TableCommand, TableEvent, format_cell, format_total,
    plain_text,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use time::OffsetDateTime;

/// Layout widths are in pixels; one terminal cell stands in for eight.
const PIXELS_PER_CELL: u32 = 8;
const MIN_CELL_CHARS: u16 = 4;
const CHECKBOX_CHARS: u16 = 3;
const RESIZE_STEP: u32 = 40;
const STATUS_CLEAR_AFTER: Duration = Duration::from_secs(4);

/// Host services behind the table: backend calls, file export, and
/// preference persistence.
pub trait AppRuntime {
    fn execute(&mut self, call: &ServiceCall) -> FetchOutcome;
    fn save_export(&mut self, job: &ExportJob) -> Result<PathBuf>;
    fn save_group_by(&mut self, option: Option<&GroupOption>) -> Result<()>;
    fn save_column_prefs(&mut self, prefs: &[ColumnPref]) -> Result<()>;

    fn preferred_export_format(&mut self) -> ExportFormat {
        ExportFormat::Xlsx
    }

    /// Runs `request` and reports the outcome on `tx`. The default runs it
    /// inline; runtimes with a shareable backend move it to a worker thread.
    fn spawn_fetch(&mut self, request: FetchRequest, tx: Sender<InternalEvent>) -> Result<()> {
        let outcome = self.execute(&request.call);
        tx.send(InternalEvent::Fetched {
            token: request.token,
            outcome,
        })
        .map_err(|_| anyhow::anyhow!("fetch event channel closed"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InternalEvent {
    ClearStatus {
        token: u64,
    },
    Fetched {
        token: RequestToken,
        outcome: FetchOutcome,
    },
}

/// One screen line of the grid body.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BodyLine {
    Group { key: String },
    SubGroup { parent: String, key: String },
    Row { scope: ScopeKey, index: usize },
    Footer(ScopeKey),
    Message { scope: ScopeKey, text: &'static str },
}

impl BodyLine {
    fn scope(&self) -> ScopeKey {
        match self {
            Self::Group { key } => ScopeKey::Group(key.clone()),
            Self::SubGroup { parent, key } => ScopeKey::SubGroup {
                parent: parent.clone(),
                key: key.clone(),
            },
            Self::Row { scope, .. } | Self::Footer(scope) | Self::Message { scope, .. } => {
                scope.clone()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
enum Overlay {
    #[default]
    None,
    Search(String),
    GroupPicker {
        cursor: usize,
    },
    ColumnChooser {
        cursor: usize,
    },
    Export {
        format: ExportFormat,
        scope: ExportScope,
    },
    Detail(Row),
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyIntent {
    Quit,
    MoveCursor(isize),
    JumpFirst,
    JumpLast,
    MoveColumn(isize),
    ShiftColumn(isize),
    Activate,
    ToggleSelect,
    ToggleSelectAll,
    CycleSort,
    TogglePin,
    PinRight,
    HideColumn,
    ShowAllColumns,
    Widen,
    Narrow,
    PreviousPage,
    NextPage,
    CyclePageSize,
    OpenSearch,
    OpenGroupPicker,
    ResetGroupBy,
    OpenColumnChooser,
    OpenExport,
    RowAction(RowActionKind),
    Refresh,
    Help,
}

#[derive(Debug, Clone, PartialEq, Default)]
struct ViewData {
    cursor: usize,
    column: usize,
    h_offset: usize,
    overlay: Overlay,
    status: Option<String>,
    status_token: u64,
}

pub fn run_app<R: AppRuntime>(manager: &mut EntityTableManager, runtime: &mut R) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let mut view_data = ViewData::default();
    let (internal_tx, internal_rx) = mpsc::channel();

    dispatch(
        manager,
        runtime,
        &mut view_data,
        &internal_tx,
        TableCommand::Init,
    );

    let mut result = Ok(());
    loop {
        process_internal_events(manager, runtime, &mut view_data, &internal_tx, &internal_rx);

        let layout = manager.layout().cloned().unwrap_or_default();
        let lines = body_lines(manager);
        clamp_view(&mut view_data, &lines, &layout);
        let width = terminal.size().map(|size| size.width).unwrap_or(80);
        scroll_to_focus(&mut view_data, &layout, width.saturating_sub(2));

        if let Err(error) =
            terminal.draw(|frame| render(frame, manager, &layout, &lines, &view_data))
        {
            result = Err(error).context("draw frame");
            break;
        }

        let has_event = event::poll(Duration::from_millis(120)).context("poll event")?;
        if has_event {
            match event::read().context("read event")? {
                Event::Key(key) => {
                    if handle_key_event(manager, runtime, &mut view_data, &internal_tx, key) {
                        break;
                    }
                }
                Event::Resize(_, _) => manager.columns_changed(),
                _ => {}
            }
        }
    }

    disable_raw_mode().context("disable raw mode")?;
    execute!(io::stdout(), terminal::LeaveAlternateScreen).context("leave alternate screen")?;
    result
}

fn process_internal_events<R: AppRuntime>(
    manager: &mut EntityTableManager,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    rx: &Receiver<InternalEvent>,
) {
    while let Ok(event) = rx.try_recv() {
        match event {
            InternalEvent::ClearStatus { token } if token == view_data.status_token => {
                view_data.status = None;
            }
            InternalEvent::ClearStatus { .. } => {}
            InternalEvent::Fetched { token, outcome } => {
                dispatch(
                    manager,
                    runtime,
                    view_data,
                    tx,
                    TableCommand::FetchCompleted { token, outcome },
                );
            }
        }
    }
}

fn dispatch<R: AppRuntime>(
    manager: &mut EntityTableManager,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    command: TableCommand,
) {
    let events = manager.dispatch(command);
    handle_table_events(manager, runtime, view_data, tx, events);
}

fn handle_table_events<R: AppRuntime>(
    manager: &mut EntityTableManager,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    events: Vec<TableEvent>,
) {
    let mut layout_changed = false;
    for event in events {
        match event {
            TableEvent::Fetch(request) => {
                let token = request.token;
                if let Err(error) = runtime.spawn_fetch(request, tx.clone()) {
                    dispatch(
                        manager,
                        runtime,
                        view_data,
                        tx,
                        TableCommand::FetchCompleted {
                            token,
                            outcome: FetchOutcome::Failed(format!("{error:#}")),
                        },
                    );
                }
            }
            TableEvent::ExportReady(job) => match runtime.save_export(&job) {
                Ok(path) => {
                    emit_status(
                        view_data,
                        tx,
                        format!("exported {} rows to {}", job.rows.len(), path.display()),
                    );
                }
                Err(error) => {
                    log::error!("export write failed: {error:#}");
                    emit_status(view_data, tx, format!("export failed: {error:#}"));
                }
            },
            TableEvent::Notify(notice) => {
                let prefix = match notice.level {
                    NoticeLevel::Warning => "warning",
                    NoticeLevel::Error => "error",
                };
                emit_status(view_data, tx, format!("{prefix}: {}", notice.message));
            }
            TableEvent::GroupByChanged(option) => {
                view_data.cursor = 0;
                if let Err(error) = runtime.save_group_by(option.as_ref()) {
                    log::warn!("save grouping preference: {error:#}");
                }
            }
            TableEvent::ColumnPinChanged { .. }
            | TableEvent::ColumnVisibilityChanged { .. }
            | TableEvent::ColumnOrderChanged(_)
            | TableEvent::ColumnResized { .. } => layout_changed = true,
            TableEvent::Action { kind, row } => handle_row_action(manager, view_data, tx, kind, row),
            TableEvent::SelectionChanged(ids) => {
                log::debug!("selection now holds {} rows", ids.len());
            }
            TableEvent::SelectionDataChanged(_) => {}
        }
    }

    if layout_changed && let Err(error) = runtime.save_column_prefs(&manager.column_prefs()) {
        log::warn!("save column layout: {error:#}");
    }
}

fn handle_row_action(
    manager: &EntityTableManager,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    kind: RowActionKind,
    row: Row,
) {
    if kind == RowActionKind::View {
        view_data.overlay = Overlay::Detail(row);
        return;
    }
    let id = row
        .get(manager.id_field())
        .map(plain_text)
        .unwrap_or_default();
    log::info!("row action {} on {id}", kind.as_str());
    emit_status(view_data, tx, format!("{} requested for row {id}", kind.as_str()));
}

fn schedule_status_clear(tx: &Sender<InternalEvent>, token: u64) {
    let sender = tx.clone();
    thread::spawn(move || {
        thread::sleep(STATUS_CLEAR_AFTER);
        let _ = sender.send(InternalEvent::ClearStatus { token });
    });
}

fn emit_status(view_data: &mut ViewData, tx: &Sender<InternalEvent>, message: impl Into<String>) {
    view_data.status = Some(message.into());
    view_data.status_token = view_data.status_token.saturating_add(1);
    schedule_status_clear(tx, view_data.status_token);
}

fn handle_key_event<R: AppRuntime>(
    manager: &mut EntityTableManager,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    if key.code == KeyCode::Char('q') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }

    match view_data.overlay.clone() {
        Overlay::None => {}
        Overlay::Search(buffer) => {
            handle_search_key(manager, runtime, view_data, tx, buffer, key);
            return false;
        }
        Overlay::GroupPicker { cursor } => {
            handle_group_picker_key(manager, runtime, view_data, tx, cursor, key);
            return false;
        }
        Overlay::ColumnChooser { cursor } => {
            handle_column_chooser_key(manager, runtime, view_data, tx, cursor, key);
            return false;
        }
        Overlay::Export { format, scope } => {
            handle_export_key(manager, runtime, view_data, tx, format, scope, key);
            return false;
        }
        Overlay::Detail(_) | Overlay::Help => {
            view_data.overlay = Overlay::None;
            return false;
        }
    }

    let Some(intent) = intent_for_key(key) else {
        return false;
    };
    match intent {
        KeyIntent::Quit => return true,
        KeyIntent::OpenSearch => {
            view_data.overlay = Overlay::Search(manager.filter().search_term.clone());
        }
        KeyIntent::OpenGroupPicker => {
            view_data.overlay = Overlay::GroupPicker { cursor: 0 };
        }
        KeyIntent::OpenColumnChooser => {
            view_data.overlay = Overlay::ColumnChooser { cursor: 0 };
        }
        KeyIntent::OpenExport => {
            view_data.overlay = Overlay::Export {
                format: runtime.preferred_export_format(),
                scope: ExportScope::VisibleColumns,
            };
        }
        KeyIntent::Help => view_data.overlay = Overlay::Help,
        intent => {
            let lines = body_lines(manager);
            if let Some(command) = command_for_intent(intent, manager, view_data, &lines) {
                dispatch(manager, runtime, view_data, tx, command);
            }
        }
    }
    false
}

fn handle_search_key<R: AppRuntime>(
    manager: &mut EntityTableManager,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    mut buffer: String,
    key: KeyEvent,
) {
    match key.code {
        KeyCode::Esc => view_data.overlay = Overlay::None,
        KeyCode::Enter => {
            view_data.overlay = Overlay::None;
            view_data.cursor = 0;
            dispatch(
                manager,
                runtime,
                view_data,
                tx,
                TableCommand::Search(buffer.trim().to_owned()),
            );
        }
        KeyCode::Backspace => {
            buffer.pop();
            view_data.overlay = Overlay::Search(buffer);
        }
        KeyCode::Char(ch) => {
            buffer.push(ch);
            view_data.overlay = Overlay::Search(buffer);
        }
        _ => {}
    }
}

fn handle_group_picker_key<R: AppRuntime>(
    manager: &mut EntityTableManager,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    cursor: usize,
    key: KeyEvent,
) {
    let shown = manager.selector().displayed().len();
    match key.code {
        KeyCode::Esc => view_data.overlay = Overlay::None,
        KeyCode::Down => {
            view_data.overlay = Overlay::GroupPicker {
                cursor: (cursor + 1).min(shown.saturating_sub(1)),
            };
        }
        KeyCode::Up => {
            view_data.overlay = Overlay::GroupPicker {
                cursor: cursor.saturating_sub(1),
            };
        }
        KeyCode::PageDown => {
            dispatch(
                manager,
                runtime,
                view_data,
                tx,
                TableCommand::LoadMoreGroupOptions,
            );
        }
        KeyCode::Delete => {
            view_data.overlay = Overlay::None;
            dispatch(manager, runtime, view_data, tx, TableCommand::RemoveGroupBy);
        }
        KeyCode::Enter => {
            let key = manager
                .selector()
                .displayed()
                .get(cursor)
                .map(|option| option.key().to_owned());
            view_data.overlay = Overlay::None;
            if let Some(key) = key {
                dispatch(
                    manager,
                    runtime,
                    view_data,
                    tx,
                    TableCommand::ToggleGroupOption(key),
                );
            }
        }
        KeyCode::Backspace => {
            let mut term = manager.selector().search_term().to_owned();
            term.pop();
            view_data.overlay = Overlay::GroupPicker { cursor: 0 };
            dispatch(
                manager,
                runtime,
                view_data,
                tx,
                TableCommand::SearchGroupOptions(term),
            );
        }
        KeyCode::Char(ch) => {
            let term = format!("{}{ch}", manager.selector().search_term());
            view_data.overlay = Overlay::GroupPicker { cursor: 0 };
            dispatch(
                manager,
                runtime,
                view_data,
                tx,
                TableCommand::SearchGroupOptions(term),
            );
        }
        _ => {}
    }
}

fn handle_column_chooser_key<R: AppRuntime>(
    manager: &mut EntityTableManager,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    cursor: usize,
    key: KeyEvent,
) {
    let count = manager.columns().columns().len();
    let command = match key.code {
        KeyCode::Esc | KeyCode::Char('c') => {
            view_data.overlay = Overlay::None;
            None
        }
        KeyCode::Char('j') | KeyCode::Down => {
            view_data.overlay = Overlay::ColumnChooser {
                cursor: (cursor + 1).min(count.saturating_sub(1)),
            };
            None
        }
        KeyCode::Char('k') | KeyCode::Up => {
            view_data.overlay = Overlay::ColumnChooser {
                cursor: cursor.saturating_sub(1),
            };
            None
        }
        KeyCode::Char(' ') | KeyCode::Enter => manager
            .columns()
            .columns()
            .get(cursor)
            .map(|column| TableCommand::ToggleColumn(column.field.clone())),
        KeyCode::Char('a') => Some(TableCommand::ShowAllColumns),
        KeyCode::Char('x') => Some(TableCommand::HideAllColumns),
        _ => None,
    };
    if let Some(command) = command {
        dispatch(manager, runtime, view_data, tx, command);
    }
}

fn handle_export_key<R: AppRuntime>(
    manager: &mut EntityTableManager,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    format: ExportFormat,
    scope: ExportScope,
    key: KeyEvent,
) {
    let position = ExportFormat::ALL
        .iter()
        .position(|candidate| *candidate == format)
        .unwrap_or(0);
    match key.code {
        KeyCode::Esc => view_data.overlay = Overlay::None,
        KeyCode::Char('j') | KeyCode::Down => {
            view_data.overlay = Overlay::Export {
                format: ExportFormat::ALL[(position + 1) % ExportFormat::ALL.len()],
                scope,
            };
        }
        KeyCode::Char('k') | KeyCode::Up => {
            let len = ExportFormat::ALL.len();
            view_data.overlay = Overlay::Export {
                format: ExportFormat::ALL[(position + len - 1) % len],
                scope,
            };
        }
        KeyCode::Tab => {
            let scope = match scope {
                ExportScope::AllColumns => ExportScope::VisibleColumns,
                ExportScope::VisibleColumns => ExportScope::AllColumns,
            };
            view_data.overlay = Overlay::Export { format, scope };
        }
        KeyCode::Enter => {
            view_data.overlay = Overlay::None;
            let now = OffsetDateTime::now_utc();
            dispatch(
                manager,
                runtime,
                view_data,
                tx,
                TableCommand::Export { scope, format, now },
            );
        }
        _ => {}
    }
}

fn intent_for_key(key: KeyEvent) -> Option<KeyIntent> {
    match (key.code, key.modifiers) {
        (KeyCode::Char('q'), KeyModifiers::NONE) => Some(KeyIntent::Quit),
        (KeyCode::Char('j'), _) | (KeyCode::Down, _) => Some(KeyIntent::MoveCursor(1)),
        (KeyCode::Char('k'), _) | (KeyCode::Up, _) => Some(KeyIntent::MoveCursor(-1)),
        (KeyCode::Char('d'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
            Some(KeyIntent::MoveCursor(10))
        }
        (KeyCode::Char('u'), modifiers) if modifiers.contains(KeyModifiers::CONTROL) => {
            Some(KeyIntent::MoveCursor(-10))
        }
        (KeyCode::Char('g'), _) | (KeyCode::Home, _) => Some(KeyIntent::JumpFirst),
        (KeyCode::Char('G'), _) | (KeyCode::End, _) => Some(KeyIntent::JumpLast),
        (KeyCode::Char('h'), _) | (KeyCode::Left, KeyModifiers::NONE) => {
            Some(KeyIntent::MoveColumn(-1))
        }
        (KeyCode::Char('l'), _) | (KeyCode::Right, KeyModifiers::NONE) => {
            Some(KeyIntent::MoveColumn(1))
        }
        (KeyCode::Char('H'), _) | (KeyCode::Left, KeyModifiers::SHIFT) => {
            Some(KeyIntent::ShiftColumn(-1))
        }
        (KeyCode::Char('L'), _) | (KeyCode::Right, KeyModifiers::SHIFT) => {
            Some(KeyIntent::ShiftColumn(1))
        }
        (KeyCode::Enter, _) => Some(KeyIntent::Activate),
        (KeyCode::Char(' '), _) => Some(KeyIntent::ToggleSelect),
        (KeyCode::Char('a'), KeyModifiers::NONE) => Some(KeyIntent::ToggleSelectAll),
        (KeyCode::Char('s'), KeyModifiers::NONE) => Some(KeyIntent::CycleSort),
        (KeyCode::Char('n'), KeyModifiers::NONE) => Some(KeyIntent::TogglePin),
        (KeyCode::Char('N'), _) => Some(KeyIntent::PinRight),
        (KeyCode::Char('c'), KeyModifiers::NONE) => Some(KeyIntent::HideColumn),
        (KeyCode::Char('C'), _) => Some(KeyIntent::ShowAllColumns),
        (KeyCode::Char('+'), _) | (KeyCode::Char('>'), _) => Some(KeyIntent::Widen),
        (KeyCode::Char('-'), _) | (KeyCode::Char('<'), _) => Some(KeyIntent::Narrow),
        (KeyCode::Char('['), _) | (KeyCode::PageUp, _) => Some(KeyIntent::PreviousPage),
        (KeyCode::Char(']'), _) | (KeyCode::PageDown, _) => Some(KeyIntent::NextPage),
        (KeyCode::Char('p'), KeyModifiers::NONE) => Some(KeyIntent::CyclePageSize),
        (KeyCode::Char('/'), _) => Some(KeyIntent::OpenSearch),
        (KeyCode::Char('v'), KeyModifiers::NONE) => Some(KeyIntent::OpenGroupPicker),
        (KeyCode::Char('V'), _) => Some(KeyIntent::ResetGroupBy),
        (KeyCode::Char('o'), KeyModifiers::NONE) => Some(KeyIntent::OpenColumnChooser),
        (KeyCode::Char('x'), KeyModifiers::NONE) => Some(KeyIntent::OpenExport),
        (KeyCode::Char('e'), KeyModifiers::NONE) => {
            Some(KeyIntent::RowAction(RowActionKind::Edit))
        }
        (KeyCode::Char('d'), KeyModifiers::NONE) => {
            Some(KeyIntent::RowAction(RowActionKind::Delete))
        }
        (KeyCode::Char('y'), KeyModifiers::NONE) => {
            Some(KeyIntent::RowAction(RowActionKind::Duplicate))
        }
        (KeyCode::Char('f'), KeyModifiers::NONE) => {
            Some(KeyIntent::RowAction(RowActionKind::File))
        }
        (KeyCode::Char('r'), KeyModifiers::NONE) => Some(KeyIntent::Refresh),
        (KeyCode::Char('?'), _) => Some(KeyIntent::Help),
        _ => None,
    }
}

/// Translates a cursor-relative intent into a manager command. Pure cursor
/// movement updates `view_data` and returns `None`.
fn command_for_intent(
    intent: KeyIntent,
    manager: &EntityTableManager,
    view_data: &mut ViewData,
    lines: &[BodyLine],
) -> Option<TableCommand> {
    let line = lines.get(view_data.cursor);
    let field = focused_field(manager, view_data);
    match intent {
        KeyIntent::MoveCursor(delta) => {
            view_data.cursor = offset_index(view_data.cursor, delta, lines.len());
            None
        }
        KeyIntent::JumpFirst => {
            view_data.cursor = 0;
            None
        }
        KeyIntent::JumpLast => {
            view_data.cursor = lines.len().saturating_sub(1);
            None
        }
        KeyIntent::MoveColumn(delta) => {
            let count = grid_columns(manager).len();
            view_data.column = offset_index(view_data.column, delta, count);
            None
        }
        KeyIntent::ShiftColumn(delta) => {
            let field = field?;
            let moved = manager
                .columns()
                .position(&field)
                .and_then(|index| index.checked_add_signed(delta))
                .and_then(|index| manager.columns().columns().get(index))
                .is_some_and(|target| manager.columns().can_reorder(&field, &target.field));
            if moved {
                view_data.column = offset_index(view_data.column, delta, usize::MAX);
            }
            Some(TableCommand::ShiftColumn { field, delta })
        }
        KeyIntent::Activate => match line? {
            BodyLine::Group { key } => Some(TableCommand::ToggleGroup(key.clone())),
            BodyLine::SubGroup { parent, key } => Some(TableCommand::ToggleSubGroup {
                parent: parent.clone(),
                key: key.clone(),
            }),
            BodyLine::Row { scope, index } => Some(TableCommand::RowAction {
                scope: scope.clone(),
                index: *index,
                kind: RowActionKind::View,
            }),
            BodyLine::Footer(_) | BodyLine::Message { .. } => None,
        },
        KeyIntent::ToggleSelect => match line? {
            BodyLine::Row { scope, index } => Some(TableCommand::ToggleRow {
                scope: scope.clone(),
                index: *index,
            }),
            other => Some(TableCommand::ToggleAll {
                scope: other.scope(),
            }),
        },
        KeyIntent::ToggleSelectAll => Some(TableCommand::ToggleAll {
            scope: line.map_or(ScopeKey::Flat, BodyLine::scope),
        }),
        KeyIntent::CycleSort => Some(TableCommand::CycleSort(field?)),
        KeyIntent::TogglePin => Some(TableCommand::TogglePin(field?)),
        KeyIntent::PinRight => {
            let field = field?;
            let sticky = match manager.columns().get(&field)?.sticky {
                Sticky::Right => Sticky::None,
                Sticky::Left | Sticky::None => Sticky::Right,
            };
            Some(TableCommand::Pin { field, sticky })
        }
        KeyIntent::HideColumn => Some(TableCommand::ToggleColumn(field?)),
        KeyIntent::ShowAllColumns => Some(TableCommand::ShowAllColumns),
        KeyIntent::Widen | KeyIntent::Narrow => {
            let field = field?;
            let current = manager.columns().resolved_width(manager.columns().get(&field)?);
            let width = if intent == KeyIntent::Widen {
                current.saturating_add(RESIZE_STEP)
            } else {
                current.saturating_sub(RESIZE_STEP)
            };
            Some(TableCommand::ResizeColumn { field, width })
        }
        KeyIntent::PreviousPage | KeyIntent::NextPage => {
            let scope = line.map_or(ScopeKey::Flat, BodyLine::scope);
            let window = manager.page(&scope)?.window();
            let page = if intent == KeyIntent::NextPage {
                window.current_page() + 1
            } else {
                window.current_page().checked_sub(1).filter(|page| *page >= 1)?
            };
            Some(TableCommand::GoToPage { scope, page })
        }
        KeyIntent::CyclePageSize => {
            let scope = line.map_or(ScopeKey::Flat, BodyLine::scope);
            let current = manager.page(&scope)?.window().items_per_page();
            let items_per_page = PAGE_SIZE_CHOICES
                .iter()
                .copied()
                .find(|size| *size > current)
                .unwrap_or(PAGE_SIZE_CHOICES[0]);
            Some(TableCommand::SetItemsPerPage {
                scope,
                items_per_page,
            })
        }
        KeyIntent::ResetGroupBy => Some(TableCommand::ResetGroupBy),
        KeyIntent::RowAction(kind) => match line? {
            BodyLine::Row { scope, index } => Some(TableCommand::RowAction {
                scope: scope.clone(),
                index: *index,
                kind,
            }),
            _ => None,
        },
        KeyIntent::Refresh => Some(TableCommand::LoadData),
        KeyIntent::Quit
        | KeyIntent::OpenSearch
        | KeyIntent::OpenGroupPicker
        | KeyIntent::OpenColumnChooser
        | KeyIntent::OpenExport
        | KeyIntent::Help => None,
    }
}

fn offset_index(current: usize, delta: isize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    current.saturating_add_signed(delta).min(len - 1)
}

/// Columns drawn in the grid, in the same order as the sticky layout.
fn grid_columns(manager: &EntityTableManager) -> Vec<&Column> {
    manager.columns().visible().collect()
}

fn focused_field(manager: &EntityTableManager, view_data: &ViewData) -> Option<String> {
    let columns = grid_columns(manager);
    columns
        .get(view_data.column.min(columns.len().saturating_sub(1)))
        .map(|column| column.field.clone())
}

/// Flattens the flat view or the group tree into screen lines.
fn body_lines(manager: &EntityTableManager) -> Vec<BodyLine> {
    let mut lines = Vec::new();
    let Some(option) = manager.group_by() else {
        push_page_lines(&mut lines, manager, ScopeKey::Flat);
        return lines;
    };

    if manager.groups().is_empty() {
        let text = if manager.is_loading() || manager.is_refreshing() {
            "loading groups…"
        } else {
            "no groups"
        };
        lines.push(BodyLine::Message {
            scope: ScopeKey::Flat,
            text,
        });
        return lines;
    }

    let nested = option.child.is_some();
    for group in manager.groups() {
        let key = group.group.key.clone();
        lines.push(BodyLine::Group { key: key.clone() });
        if !group.is_expanded() {
            continue;
        }
        if !nested {
            push_page_lines(&mut lines, manager, ScopeKey::Group(key));
            continue;
        }
        if group.sub_groups().is_empty() {
            lines.push(BodyLine::Message {
                scope: ScopeKey::Group(key.clone()),
                text: if group.is_loading_sub_groups() {
                    "loading…"
                } else {
                    "no sub-groups"
                },
            });
        }
        for sub in group.sub_groups() {
            lines.push(BodyLine::SubGroup {
                parent: key.clone(),
                key: sub.group.key.clone(),
            });
            if sub.is_expanded() {
                push_page_lines(
                    &mut lines,
                    manager,
                    ScopeKey::SubGroup {
                        parent: key.clone(),
                        key: sub.group.key.clone(),
                    },
                );
            }
        }
    }
    lines
}

fn push_page_lines(lines: &mut Vec<BodyLine>, manager: &EntityTableManager, scope: ScopeKey) {
    let Some(page) = manager.page(&scope) else {
        return;
    };
    if !page.is_loaded() {
        lines.push(BodyLine::Message {
            scope,
            text: "loading…",
        });
        return;
    }
    if page.rows().is_empty() {
        lines.push(BodyLine::Message {
            scope,
            text: "no rows",
        });
        return;
    }
    for index in 0..page.rows().len() {
        lines.push(BodyLine::Row {
            scope: scope.clone(),
            index,
        });
    }
    lines.push(BodyLine::Footer(scope));
}

fn clamp_view(view_data: &mut ViewData, lines: &[BodyLine], layout: &GridLayout) {
    view_data.cursor = view_data.cursor.min(lines.len().saturating_sub(1));
    view_data.column = view_data
        .column
        .min(layout.columns.len().saturating_sub(1));
}

fn cell_chars(column: &ColumnLayout) -> u16 {
    let chars = (column.width / PIXELS_PER_CELL).max(u32::from(MIN_CELL_CHARS));
    u16::try_from(chars).unwrap_or(u16::MAX)
}

/// Columns that fit in `available` cells: every pinned column, plus the
/// unpinned ones starting at `h_offset`. At least one unpinned column is
/// kept so horizontal scrolling never shows an empty middle.
fn visible_window(layout: &GridLayout, available: u16, h_offset: usize) -> Vec<(String, u16)> {
    let pinned_width: u16 = layout
        .columns
        .iter()
        .filter(|column| column.sticky != Sticky::None)
        .map(|column| cell_chars(column).saturating_add(1))
        .sum();
    let mut budget = available
        .saturating_sub(CHECKBOX_CHARS + 1)
        .saturating_sub(pinned_width);

    let mut middle = Vec::new();
    for column in layout
        .columns
        .iter()
        .filter(|column| column.sticky == Sticky::None)
        .skip(h_offset)
    {
        let width = cell_chars(column);
        if !middle.is_empty() && width > budget {
            break;
        }
        budget = budget.saturating_sub(width.saturating_add(1));
        middle.push((column.field.clone(), width));
    }

    let pinned = |sticky: Sticky| {
        layout
            .columns
            .iter()
            .filter(move |column| column.sticky == sticky)
            .map(|column| (column.field.clone(), cell_chars(column)))
    };
    pinned(Sticky::Left)
        .chain(middle)
        .chain(pinned(Sticky::Right))
        .collect()
}

fn scroll_to_focus(view_data: &mut ViewData, layout: &GridLayout, available: u16) {
    let middle: Vec<&str> = layout
        .columns
        .iter()
        .filter(|column| column.sticky == Sticky::None)
        .map(|column| column.field.as_str())
        .collect();
    view_data.h_offset = view_data.h_offset.min(middle.len().saturating_sub(1));
    let Some(focused) = layout.columns.get(view_data.column) else {
        return;
    };
    let Some(position) = middle.iter().position(|field| *field == focused.field) else {
        return;
    };
    if position < view_data.h_offset {
        view_data.h_offset = position;
        return;
    }
    while view_data.h_offset < position
        && !visible_window(layout, available, view_data.h_offset)
            .iter()
            .any(|(field, _)| *field == focused.field)
    {
        view_data.h_offset += 1;
    }
}

fn fit(text: &str, width: u16, right: bool) -> String {
    let width = usize::from(width);
    let count = text.chars().count();
    if count > width {
        if width == 0 {
            return String::new();
        }
        let mut clipped: String = text.chars().take(width - 1).collect();
        clipped.push('…');
        return clipped;
    }
    if right {
        format!("{text:>width$}")
    } else {
        format!("{text:<width$}")
    }
}

fn checkbox(all: bool, some: bool) -> &'static str {
    if all {
        "[x]"
    } else if some {
        "[-]"
    } else {
        "[ ]"
    }
}

fn action_glyph(kind: RowActionKind) -> &'static str {
    match kind {
        RowActionKind::View => "↵",
        RowActionKind::Edit => "e",
        RowActionKind::Delete => "d",
        RowActionKind::Duplicate => "y",
        RowActionKind::File => "f",
    }
}

fn cell_text(column: &Column, row: &Row) -> String {
    if column.kind == ColumnType::Actions {
        return column
            .actions
            .iter()
            .map(|kind| action_glyph(*kind))
            .collect::<Vec<_>>()
            .join(" ");
    }
    format_cell(column, row.get(&column.field))
}

fn header_label(manager: &EntityTableManager, column: &Column) -> String {
    let mut label = column.header.clone();
    if let Some(sort) = manager.sort()
        && sort.column == column.field
    {
        label.push_str(match sort.direction {
            SortDirection::Asc => " ↑",
            SortDirection::Desc => " ↓",
        });
    }
    match column.sticky {
        Sticky::Left => label.insert_str(0, "⇤ "),
        Sticky::Right => label.push_str(" ⇥"),
        Sticky::None => {}
    }
    label
}

fn header_line(
    manager: &EntityTableManager,
    window: &[(String, u16)],
    focused: Option<&str>,
) -> Line<'static> {
    let mut spans = vec![Span::styled(
        format!(
            "{} ",
            checkbox(
                manager.is_all_selected(&ScopeKey::Flat),
                manager.is_some_selected(&ScopeKey::Flat)
            )
        ),
        Style::default().add_modifier(Modifier::BOLD),
    )];
    for (field, width) in window {
        let Some(column) = manager.columns().get(field) else {
            continue;
        };
        let mut style = Style::default()
            .fg(Color::White)
            .add_modifier(Modifier::BOLD);
        if focused == Some(field.as_str()) {
            style = style.fg(Color::Cyan).add_modifier(Modifier::UNDERLINED);
        }
        spans.push(Span::styled(
            format!("{} ", fit(&header_label(manager, column), *width, false)),
            style,
        ));
    }
    Line::from(spans)
}

fn row_line(
    manager: &EntityTableManager,
    scope: &ScopeKey,
    row: &Row,
    window: &[(String, u16)],
    focused: Option<&str>,
    cursor: bool,
) -> Line<'static> {
    let shown: Vec<&str> = manager
        .display_columns(scope)
        .iter()
        .map(|column| column.field.as_str())
        .collect();
    let selected = manager.is_row_selected(row);
    let base = if cursor {
        Style::default().bg(Color::DarkGray)
    } else if selected {
        Style::default().fg(Color::Green)
    } else {
        Style::default()
    };

    let mark = if !selected && manager.is_checkbox_disabled(row) {
        "[·]"
    } else {
        checkbox(selected, false)
    };
    let mut spans = vec![Span::styled(format!("{mark} "), base)];
    for (field, width) in window {
        let Some(column) = manager.columns().get(field) else {
            continue;
        };
        let text = if shown.contains(&field.as_str()) {
            cell_text(column, row)
        } else {
            String::new()
        };
        let style = if cursor && focused == Some(field.as_str()) {
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD)
        } else {
            base
        };
        spans.push(Span::styled(
            format!("{} ", fit(&text, *width, column.kind.is_numeric())),
            style,
        ));
    }
    Line::from(spans)
}

fn pager_text(manager: &EntityTableManager, scope: &ScopeKey) -> String {
    let Some(page) = manager.page(scope) else {
        return String::new();
    };
    let window = page.window();
    let links = window
        .page_links(MAX_VISIBLE_PAGE_LINKS)
        .into_iter()
        .map(|link| match link {
            PageLink::Page(page) if page == window.current_page() => format!("[{page}]"),
            PageLink::Page(page) => page.to_string(),
            PageLink::Gap => "…".to_owned(),
        })
        .collect::<Vec<_>>()
        .join(" ");
    let range = window
        .item_range()
        .map(|(first, last)| format!("{first}-{last} of {}", window.total_items()))
        .unwrap_or_else(|| "0 items".to_owned());
    let mut text = format!(
        "{} {links} {} | {range} | {}/page",
        if window.has_previous() { "‹" } else { " " },
        if window.has_next() { "›" } else { " " },
        window.items_per_page()
    );

    let totals = manager
        .totals(scope)
        .into_iter()
        .filter_map(|(field, total)| {
            let column = manager.columns().get(&field)?;
            Some(format!("{}: {}", column.header, format_total(column, total)))
        })
        .collect::<Vec<_>>();
    if !totals.is_empty() {
        text.push_str(" | Σ ");
        text.push_str(&totals.join("  "));
    }
    text
}

fn group_header_text(manager: &EntityTableManager, line: &BodyLine) -> String {
    let scope = line.scope();
    let (label, expanded, indent) = match line {
        BodyLine::Group { key } => match manager.groups().iter().find(|g| g.group.key == *key) {
            Some(group) => (group.group.label.clone(), group.is_expanded(), ""),
            None => return String::new(),
        },
        BodyLine::SubGroup { parent, key } => {
            let sub = manager
                .groups()
                .iter()
                .find(|group| group.group.key == *parent)
                .and_then(|group| group.sub_groups().iter().find(|sub| sub.group.key == *key));
            match sub {
                Some(sub) => (sub.group.label.clone(), sub.is_expanded(), "  "),
                None => return String::new(),
            }
        }
        _ => return String::new(),
    };
    let marker = if expanded { "▾" } else { "▸" };
    let count = manager
        .page(&scope)
        .filter(|page| page.is_loaded())
        .map(|page| format!(" ({})", page.window().total_items()))
        .unwrap_or_default();
    format!(
        "{indent}{} {marker} {label}{count}",
        checkbox(
            manager.is_all_selected(&scope),
            manager.is_some_selected(&scope)
        )
    )
}

fn body_line(
    manager: &EntityTableManager,
    line: &BodyLine,
    window: &[(String, u16)],
    focused: Option<&str>,
    cursor: bool,
) -> Line<'static> {
    let highlight = |style: Style| {
        if cursor {
            style.bg(Color::DarkGray)
        } else {
            style
        }
    };
    match line {
        BodyLine::Row { scope, index } => match manager.rows(scope).get(*index) {
            Some(row) => row_line(manager, scope, row, window, focused, cursor),
            None => Line::from(String::new()),
        },
        BodyLine::Group { .. } => Line::from(Span::styled(
            group_header_text(manager, line),
            highlight(
                Style::default()
                    .fg(Color::Magenta)
                    .add_modifier(Modifier::BOLD),
            ),
        )),
        BodyLine::SubGroup { .. } => Line::from(Span::styled(
            group_header_text(manager, line),
            highlight(Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD)),
        )),
        BodyLine::Footer(scope) => Line::from(Span::styled(
            pager_text(manager, scope),
            highlight(Style::default().fg(Color::Gray)),
        )),
        BodyLine::Message { text, .. } => Line::from(Span::styled(
            format!("    {text}"),
            highlight(
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            ),
        )),
    }
}

fn table_title(manager: &EntityTableManager) -> String {
    let mut title = manager.entity_name().to_owned();
    if let Some(option) = manager.group_by() {
        let names = option
            .chain()
            .iter()
            .map(|option| option.name.as_str())
            .collect::<Vec<_>>()
            .join(" › ");
        title.push_str(&format!(" | by {names}"));
    }
    let search = &manager.filter().search_term;
    if !search.is_empty() {
        title.push_str(&format!(" | search: {search}"));
    }
    if !manager.selection().is_empty() {
        title.push_str(&format!(" | {} selected", manager.selection().len()));
    }
    if manager.is_refreshing() {
        title.push_str(" | refreshing…");
    }
    if manager.is_exporting() {
        title.push_str(" | exporting…");
    }
    title
}

fn status_text(view_data: &ViewData) -> String {
    let hints = "j/k h/l | enter open | space select | s sort | n/N pin | c/C/o cols | +/- width | [/] page p size | / search | v group | x export | ? help | q quit";
    match &view_data.status {
        Some(status) => format!("{status} | {hints}"),
        None => hints.to_owned(),
    }
}

fn render(
    frame: &mut ratatui::Frame<'_>,
    manager: &EntityTableManager,
    layout: &GridLayout,
    lines: &[BodyLine],
    view_data: &ViewData,
) {
    let areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)])
        .split(frame.area());

    let grid_area = areas[0];
    let inner_width = grid_area.width.saturating_sub(2);
    let window = visible_window(layout, inner_width, view_data.h_offset);
    let focused = layout
        .columns
        .get(view_data.column)
        .map(|column| column.field.as_str());

    let body_height = usize::from(grid_area.height.saturating_sub(3)).max(1);
    let top = view_data.cursor.saturating_sub(body_height - 1);
    let mut text = vec![header_line(manager, &window, focused)];
    if manager.is_loading() && lines.is_empty() {
        text.push(Line::from("    loading…"));
    }
    text.extend(
        lines
            .iter()
            .enumerate()
            .skip(top)
            .take(body_height)
            .map(|(index, line)| {
                body_line(manager, line, &window, focused, index == view_data.cursor)
            }),
    );
    let grid = Paragraph::new(text).block(
        Block::default()
            .title(table_title(manager))
            .borders(Borders::ALL),
    );
    frame.render_widget(grid, grid_area);

    let status = Paragraph::new(status_text(view_data))
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(status, areas[1]);

    match &view_data.overlay {
        Overlay::None => {}
        Overlay::Search(buffer) => {
            let area = centered_rect(50, 20, frame.area());
            frame.render_widget(Clear, area);
            let input = Paragraph::new(format!("{buffer}▏\n\nenter apply | esc cancel"))
                .block(Block::default().title("search").borders(Borders::ALL));
            frame.render_widget(input, area);
        }
        Overlay::GroupPicker { cursor } => {
            let area = centered_rect(50, 60, frame.area());
            frame.render_widget(Clear, area);
            let picker = Paragraph::new(render_group_picker_text(manager, *cursor)).block(
                Block::default()
                    .title("group by")
                    .borders(Borders::ALL)
                    .style(Style::default().fg(Color::Cyan)),
            );
            frame.render_widget(picker, area);
        }
        Overlay::ColumnChooser { cursor } => {
            let area = centered_rect(45, 70, frame.area());
            frame.render_widget(Clear, area);
            let chooser = Paragraph::new(render_column_chooser_text(manager, *cursor))
                .block(Block::default().title("columns").borders(Borders::ALL));
            frame.render_widget(chooser, area);
        }
        Overlay::Export { format, scope } => {
            let area = centered_rect(40, 40, frame.area());
            frame.render_widget(Clear, area);
            let menu = Paragraph::new(render_export_text(manager, *format, *scope))
                .block(Block::default().title("export").borders(Borders::ALL));
            frame.render_widget(menu, area);
        }
        Overlay::Detail(row) => {
            let area = centered_rect(60, 70, frame.area());
            frame.render_widget(Clear, area);
            let detail = Paragraph::new(render_detail_text(manager, row))
                .block(Block::default().title("row").borders(Borders::ALL));
            frame.render_widget(detail, area);
        }
        Overlay::Help => {
            let area = centered_rect(70, 70, frame.area());
            frame.render_widget(Clear, area);
            let help = Paragraph::new(help_overlay_text())
                .block(Block::default().title("help").borders(Borders::ALL));
            frame.render_widget(help, area);
        }
    }
}

fn render_group_picker_text(manager: &EntityTableManager, cursor: usize) -> String {
    let selector = manager.selector();
    let mut out = format!("filter: {}▏\n\n", selector.search_term());
    if !selector.is_loaded() {
        out.push_str("loading options…\n");
    }
    let displayed = selector.displayed();
    for (index, option) in displayed.iter().enumerate() {
        let pointer = if index == cursor { ">" } else { " " };
        let mark = if selector.is_selected(option) {
            "(•)"
        } else {
            "( )"
        };
        out.push_str(&format!("{pointer} {mark} {}\n", option.name));
    }
    if selector.filtered().len() > displayed.len() {
        out.push_str(&format!(
            "  … {} more (pgdn)\n",
            selector.filtered().len() - displayed.len()
        ));
    }
    out.push_str("\nenter toggle | del remove | type filter | esc close");
    out
}

fn render_column_chooser_text(manager: &EntityTableManager, cursor: usize) -> String {
    let mut out = String::new();
    for (index, column) in manager.columns().columns().iter().enumerate() {
        let pointer = if index == cursor { ">" } else { " " };
        let mark = if column.is_visible() { "[x]" } else { "[ ]" };
        let lock = if column.is_hideable() { "" } else { " (fixed)" };
        out.push_str(&format!("{pointer} {mark} {}{lock}\n", column.header));
    }
    out.push_str("\nspace toggle | a show all | x hide all | esc close");
    out
}

fn render_export_text(
    manager: &EntityTableManager,
    format: ExportFormat,
    scope: ExportScope,
) -> String {
    let mut out = String::new();
    for candidate in ExportFormat::ALL {
        let pointer = if candidate == format { ">" } else { " " };
        out.push_str(&format!("{pointer} {}\n", candidate.extension()));
    }
    let columns = match scope {
        ExportScope::AllColumns => "all columns",
        ExportScope::VisibleColumns => "visible columns",
    };
    let rows = if manager.selection().is_empty() {
        "all matching rows".to_owned()
    } else {
        format!("{} selected rows", manager.selection().len())
    };
    out.push_str(&format!("\n{columns}, {rows}\n"));
    out.push_str("\nj/k format | tab columns | enter export | esc cancel");
    out
}

fn render_detail_text(manager: &EntityTableManager, row: &Row) -> String {
    manager
        .columns()
        .columns()
        .iter()
        .filter(|column| !column.kind.is_structural())
        .map(|column| format!("{}: {}", column.header, cell_text(column, row)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn help_overlay_text() -> &'static str {
    "rows: j/k g/G ctrl+d/u | enter open group or row | space select | a select page\n\
pages: [/] or pgup/pgdn | p page size | r refresh\n\
columns: h/l focus | H/L move | s sort | n pin left | N pin right | c hide | C show all | o chooser | +/- width\n\
rows: e edit | d delete | y duplicate | f file\n\
grouping: v pick | V reset\n\
search: / | export: x\n\
quit: q or ctrl+q"
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
