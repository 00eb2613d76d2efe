// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use time::OffsetDateTime;

use crate::columns::{ColumnChange, ColumnPref, ColumnSet, GridLayout};
use crate::cross_ref::SubGroupLookup;
use crate::export::{
    DEFAULT_ENTITY_NAME, EXPORT_PAGE_SIZE, ExportJob, ExportPlan, ExportStyle, export_columns,
};
use crate::group_by::GroupBySelector;
use crate::ids::{RequestToken, RowId};
use crate::model::{
    Column, DEFAULT_ID_FIELD, DEFAULT_ITEMS_PER_PAGE, DataPage, DataQuery, ExportFormat,
    ExportScope, FilterState, GroupByParam, GroupOption, GroupValue, Row, RowActionKind,
    SortDirection, SortState, Sticky,
};
use crate::pagination::PageWindow;
use crate::selection::SelectionSet;
use crate::service::{FetchOutcome, ServiceCall};

#[derive(Debug, Clone, PartialEq)]
pub struct TableConfig {
    pub entity_name: String,
    pub component_id: Option<String>,
    pub id_field: String,
    pub items_per_page: usize,
    pub columns: Vec<Column>,
    pub default_group_by: Option<GroupOption>,
    pub export_style: ExportStyle,
    /// Rows whose value for any of these fields is missing, null, zero,
    /// false or empty get a disabled checkbox.
    pub selection_requires: Vec<String>,
}

impl TableConfig {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            entity_name: DEFAULT_ENTITY_NAME.to_owned(),
            component_id: None,
            id_field: DEFAULT_ID_FIELD.to_owned(),
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
            columns,
            default_group_by: None,
            export_style: ExportStyle::default(),
            selection_requires: Vec::new(),
        }
    }
}

/// Addresses one paginated row list: the flat view, a group, or a
/// sub-group inside a group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScopeKey {
    Flat,
    Group(String),
    SubGroup { parent: String, key: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub token: RequestToken,
    pub call: ServiceCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    fn warning(message: &str) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.to_owned(),
        }
    }

    fn error(message: &str) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.to_owned(),
        }
    }
}

const NO_COLUMNS_TO_EXPORT: &str = "No hay columnas para exportar";
const NO_ROWS_TO_EXPORT: &str = "No hay datos para exportar";
const EXPORT_FAILED: &str = "Error al exportar los datos";

#[derive(Debug, Clone, PartialEq)]
pub enum TableCommand {
    /// First command after construction: loads grouping options and data.
    Init,
    LoadData,
    SetScopeSelection {
        scope: ScopeKey,
        ids: BTreeSet<RowId>,
    },
    ToggleRow {
        scope: ScopeKey,
        index: usize,
    },
    ToggleAll {
        scope: ScopeKey,
    },
    Sort(Option<SortState>),
    /// Header click: ascending, then descending, then unsorted.
    CycleSort(String),
    SortOption {
        field: String,
        direction: Option<SortDirection>,
    },
    Search(String),
    SetFilters(BTreeMap<String, Value>),
    GroupBy(Option<GroupOption>),
    ToggleGroupOption(String),
    SearchGroupOptions(String),
    LoadMoreGroupOptions,
    ResetGroupBy,
    RemoveGroupBy,
    ToggleGroup(String),
    ToggleSubGroup {
        parent: String,
        key: String,
    },
    GoToPage {
        scope: ScopeKey,
        page: usize,
    },
    SetItemsPerPage {
        scope: ScopeKey,
        items_per_page: usize,
    },
    RowAction {
        scope: ScopeKey,
        index: usize,
        kind: RowActionKind,
    },
    Pin {
        field: String,
        sticky: Sticky,
    },
    TogglePin(String),
    ToggleColumn(String),
    ShowAllColumns,
    HideAllColumns,
    MoveColumn {
        dragged: String,
        target: String,
    },
    ShiftColumn {
        field: String,
        delta: isize,
    },
    ResizeColumn {
        field: String,
        width: u32,
    },
    MeasureColumn {
        field: String,
        width: u32,
    },
    ApplyColumnPrefs(Vec<ColumnPref>),
    Export {
        scope: ExportScope,
        format: ExportFormat,
        now: OffsetDateTime,
    },
    FetchCompleted {
        token: RequestToken,
        outcome: FetchOutcome,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableEvent {
    Fetch(FetchRequest),
    SelectionChanged(Vec<RowId>),
    SelectionDataChanged(Vec<Row>),
    Action { kind: RowActionKind, row: Row },
    ColumnPinChanged { field: String, sticky: Sticky },
    ColumnVisibilityChanged { field: String, visible: bool },
    ColumnOrderChanged(Vec<String>),
    ColumnResized { field: String, width: u32 },
    GroupByChanged(Option<GroupOption>),
    Notify(Notice),
    ExportReady(ExportJob),
}

impl From<ColumnChange> for TableEvent {
    fn from(change: ColumnChange) -> Self {
        match change {
            ColumnChange::Pinned { field, sticky } => Self::ColumnPinChanged { field, sticky },
            ColumnChange::Visibility { field, visible } => {
                Self::ColumnVisibilityChanged { field, visible }
            }
            ColumnChange::Order(order) => Self::ColumnOrderChanged(order),
            ColumnChange::Resized { field, width } => Self::ColumnResized { field, width },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageState {
    window: PageWindow,
    rows: Option<Vec<Row>>,
    loading: bool,
    token: Option<RequestToken>,
}

impl PageState {
    fn new(items_per_page: usize) -> Self {
        Self {
            window: PageWindow::new(items_per_page),
            ..Self::default()
        }
    }

    pub fn window(&self) -> &PageWindow {
        &self.window
    }

    pub fn rows(&self) -> &[Row] {
        self.rows.as_deref().unwrap_or_default()
    }

    pub fn is_loaded(&self) -> bool {
        self.rows.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Drops cached rows and forgets any in-flight request so its response
    /// is discarded.
    fn invalidate(&mut self) {
        self.rows = None;
        self.loading = false;
        self.token = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub key: String,
    pub label: String,
    pub dom_id: String,
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubGroupState {
    pub group: Group,
    page: PageState,
    expanded: bool,
}

impl SubGroupState {
    pub fn page(&self) -> &PageState {
        &self.page
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupState {
    pub group: Group,
    page: PageState,
    expanded: bool,
    sub_groups: Option<Vec<SubGroupState>>,
    sub_loading: bool,
    sub_token: Option<RequestToken>,
}

impl GroupState {
    pub fn page(&self) -> &PageState {
        &self.page
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn sub_groups(&self) -> &[SubGroupState] {
        self.sub_groups.as_deref().unwrap_or_default()
    }

    pub fn is_loading_sub_groups(&self) -> bool {
        self.sub_loading
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FetchScope {
    Page(ScopeKey),
    GroupList,
    SubGroupList(String),
    GroupOptions,
    Export,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingExport {
    token: RequestToken,
    scope: ExportScope,
    format: ExportFormat,
    now: OffsetDateTime,
    columns: Vec<Column>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityTableManager {
    entity_name: String,
    id_field: String,
    items_per_page: usize,
    export_style: ExportStyle,
    selection_requires: Vec<String>,
    columns: ColumnSet,
    selector: GroupBySelector,
    group_by: Option<GroupOption>,
    sort: Option<SortState>,
    filter: FilterState,
    selection: SelectionSet,
    flat: PageState,
    groups: Option<Vec<GroupState>>,
    groups_token: Option<RequestToken>,
    loading: bool,
    loaded_once: bool,
    awaiting_default: bool,
    options_token: Option<RequestToken>,
    pending_export: Option<PendingExport>,
    last_token: RequestToken,
    in_flight: BTreeMap<RequestToken, FetchScope>,
}

impl EntityTableManager {
    pub fn new(config: TableConfig) -> Self {
        let items_per_page = config.items_per_page.max(1);
        Self {
            entity_name: config.entity_name,
            id_field: config.id_field,
            items_per_page,
            export_style: config.export_style,
            selection_requires: config.selection_requires,
            columns: ColumnSet::new(config.columns),
            selector: GroupBySelector::new(config.component_id, config.default_group_by),
            group_by: None,
            sort: None,
            filter: FilterState::default(),
            selection: SelectionSet::new(),
            flat: PageState::new(items_per_page),
            groups: None,
            groups_token: None,
            loading: false,
            loaded_once: false,
            awaiting_default: false,
            options_token: None,
            pending_export: None,
            last_token: RequestToken::default(),
            in_flight: BTreeMap::new(),
        }
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    pub fn columns_changed(&mut self) {
        self.columns.schedule_layout();
    }

    pub fn layout(&mut self) -> Option<&GridLayout> {
        self.columns.layout()
    }

    pub fn selector(&self) -> &GroupBySelector {
        &self.selector
    }

    pub fn group_by(&self) -> Option<&GroupOption> {
        self.group_by.as_ref()
    }

    pub fn sort(&self) -> Option<&SortState> {
        self.sort.as_ref()
    }

    pub fn filter(&self) -> &FilterState {
        &self.filter
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn flat(&self) -> &PageState {
        &self.flat
    }

    pub fn groups(&self) -> &[GroupState] {
        self.groups.as_deref().unwrap_or_default()
    }

    pub fn is_loading(&self) -> bool {
        self.loading && !self.loaded_once
    }

    pub fn is_refreshing(&self) -> bool {
        self.loading && self.loaded_once
    }

    pub fn is_exporting(&self) -> bool {
        self.pending_export.is_some()
    }

    pub fn page(&self, scope: &ScopeKey) -> Option<&PageState> {
        match scope {
            ScopeKey::Flat => Some(&self.flat),
            ScopeKey::Group(key) => self.group(key).map(|group| &group.page),
            ScopeKey::SubGroup { parent, key } => self
                .group(parent)?
                .sub_groups()
                .iter()
                .find(|sub| sub.group.key == *key)
                .map(|sub| &sub.page),
        }
    }

    pub fn rows(&self, scope: &ScopeKey) -> &[Row] {
        self.page(scope).map(PageState::rows).unwrap_or_default()
    }

    /// Visible columns for `scope`. Group views hide the grouped field.
    pub fn display_columns(&self, scope: &ScopeKey) -> Vec<&Column> {
        let mut hidden = Vec::new();
        if let Some(option) = &self.group_by {
            if !matches!(scope, ScopeKey::Flat) {
                hidden.extend(option.hide_field.as_deref());
            }
            if matches!(scope, ScopeKey::SubGroup { .. })
                && let Some(child) = &option.child
            {
                hidden.extend(child.hide_field.as_deref());
            }
        }
        self.columns
            .visible()
            .filter(|column| !hidden.contains(&column.field.as_str()))
            .collect()
    }

    pub fn totals(&self, scope: &ScopeKey) -> Vec<(String, f64)> {
        self.columns.totals(self.rows(scope))
    }

    pub fn is_all_selected(&self, scope: &ScopeKey) -> bool {
        self.selection.covers(&self.selectable_ids(scope))
    }

    pub fn is_some_selected(&self, scope: &ScopeKey) -> bool {
        self.selection.partially_covers(&self.selectable_ids(scope))
    }

    pub fn is_row_selected(&self, row: &Row) -> bool {
        row.id(&self.id_field)
            .is_some_and(|id| self.selection.contains(id))
    }

    pub fn is_checkbox_disabled(&self, row: &Row) -> bool {
        self.selection_requires
            .iter()
            .any(|field| !row.get(field).is_some_and(is_truthy))
    }

    pub fn column_prefs(&self) -> Vec<ColumnPref> {
        self.columns.prefs()
    }

    pub fn dispatch(&mut self, command: TableCommand) -> Vec<TableEvent> {
        match command {
            TableCommand::Init => self.init(),
            TableCommand::LoadData => self.load_data(),
            TableCommand::SetScopeSelection { scope, ids } => {
                self.apply_selection_delta(&scope, &ids)
            }
            TableCommand::ToggleRow { scope, index } => self.toggle_row(&scope, index),
            TableCommand::ToggleAll { scope } => self.toggle_all(&scope),
            TableCommand::Sort(sort) => self.apply_sort_change(sort),
            TableCommand::CycleSort(field) => self.cycle_sort(&field),
            TableCommand::SortOption { field, direction } => {
                self.apply_sort_change(direction.map(|direction| SortState::new(field, direction)))
            }
            TableCommand::Search(term) => {
                self.filter.search_term = term;
                self.apply_filter_change()
            }
            TableCommand::SetFilters(filters) => {
                self.filter.filters = filters;
                self.apply_filter_change()
            }
            TableCommand::GroupBy(option) => {
                match &option {
                    Some(option) => self.selector.restore(option.clone()),
                    None => {
                        self.selector.remove_selection();
                    }
                }
                self.apply_group_by_change(option)
            }
            TableCommand::ToggleGroupOption(key) => match self.selector.toggle(&key) {
                Some(selected) => self.apply_group_by_change(selected),
                None => Vec::new(),
            },
            TableCommand::SearchGroupOptions(term) => {
                self.selector.search(&term);
                Vec::new()
            }
            TableCommand::LoadMoreGroupOptions => {
                self.selector.load_more();
                Vec::new()
            }
            TableCommand::ResetGroupBy => {
                self.selector.reset();
                self.apply_group_by_change(None)
            }
            TableCommand::RemoveGroupBy => {
                if self.selector.remove_selection() {
                    self.apply_group_by_change(None)
                } else {
                    Vec::new()
                }
            }
            TableCommand::ToggleGroup(key) => self.toggle_group(&key),
            TableCommand::ToggleSubGroup { parent, key } => self.toggle_sub_group(&parent, &key),
            TableCommand::GoToPage { scope, page } => self.go_to_page(&scope, page),
            TableCommand::SetItemsPerPage {
                scope,
                items_per_page,
            } => self.set_items_per_page(&scope, items_per_page),
            TableCommand::RowAction { scope, index, kind } => self
                .rows(&scope)
                .get(index)
                .map(|row| TableEvent::Action {
                    kind,
                    row: row.clone(),
                })
                .into_iter()
                .collect(),
            TableCommand::Pin { field, sticky } => column_events(self.columns.pin(&field, sticky)),
            TableCommand::TogglePin(field) => column_events(self.columns.toggle_pin(&field)),
            TableCommand::ToggleColumn(field) => {
                column_events(self.columns.toggle_visibility(&field))
            }
            TableCommand::ShowAllColumns => column_events(self.columns.set_all_visible(true)),
            TableCommand::HideAllColumns => column_events(self.columns.set_all_visible(false)),
            TableCommand::MoveColumn { dragged, target } => {
                column_events(self.columns.reorder(&dragged, &target))
            }
            TableCommand::ShiftColumn { field, delta } => {
                column_events(self.columns.shift(&field, delta))
            }
            TableCommand::ResizeColumn { field, width } => {
                column_events(self.columns.resize(&field, width))
            }
            TableCommand::MeasureColumn { field, width } => {
                self.columns.measure(&field, width);
                Vec::new()
            }
            TableCommand::ApplyColumnPrefs(prefs) => {
                self.columns.apply_prefs(&prefs);
                vec![TableEvent::ColumnOrderChanged(self.columns.order())]
            }
            TableCommand::Export { scope, format, now } => self.export(scope, format, now),
            TableCommand::FetchCompleted { token, outcome } => self.complete(token, outcome),
        }
    }

    fn init(&mut self) -> Vec<TableEvent> {
        let component_id = self.selector.component_id().map(str::to_owned);
        let has_default = self.selector.default_option().is_some();
        match (component_id, has_default) {
            (Some(component_id), true) => {
                self.awaiting_default = true;
                self.loading = true;
                vec![self.fetch_group_options(component_id)]
            }
            (None, true) => {
                let chosen = self.selector.options_failed();
                self.apply_group_by_change(chosen)
            }
            (Some(component_id), false) => {
                let mut events = self.load_data();
                events.push(self.fetch_group_options(component_id));
                events
            }
            (None, false) => {
                self.selector.options_failed();
                self.load_data()
            }
        }
    }

    fn fetch_group_options(&mut self, component_id: String) -> TableEvent {
        let token = self.issue(FetchScope::GroupOptions);
        self.options_token = Some(token);
        fetch(token, ServiceCall::GroupOptions { component_id })
    }

    // Grouped views fetch only the group list; group pages load on expansion.
    fn load_data(&mut self) -> Vec<TableEvent> {
        self.loading = true;
        match self.group_by.clone() {
            Some(option) => {
                let token = self.issue(FetchScope::GroupList);
                self.groups_token = Some(token);
                vec![fetch(
                    token,
                    ServiceCall::GroupValues {
                        endpoint: option.endpoint,
                        filters: self.filter.filters.clone(),
                        search_term: self.filter.search_term.clone(),
                    },
                )]
            }
            None => self.fetch_page(&ScopeKey::Flat).into_iter().collect(),
        }
    }

    fn issue(&mut self, scope: FetchScope) -> RequestToken {
        self.last_token = self.last_token.next();
        self.in_flight.insert(self.last_token, scope);
        self.last_token
    }

    fn fetch_page(&mut self, scope: &ScopeKey) -> Option<TableEvent> {
        let query = self.page_query(scope)?;
        let token = self.issue(FetchScope::Page(scope.clone()));
        let state = self.page_mut(scope)?;
        state.token = Some(token);
        state.loading = true;
        Some(fetch(token, ServiceCall::Data(query)))
    }

    fn page_query(&mut self, scope: &ScopeKey) -> Option<DataQuery> {
        let mut filters = self.filter.filters.clone();
        let group_by = match scope {
            ScopeKey::Flat => None,
            ScopeKey::Group(key) => {
                let option = self.group_by.as_ref()?;
                Some(GroupByParam {
                    field: option.field.clone(),
                    value: self.group(key)?.group.key.clone(),
                })
            }
            ScopeKey::SubGroup { parent, key } => {
                let option = self.group_by.as_ref()?;
                let child = option.child.as_ref()?;
                let parent_group = &self.group(parent)?.group;
                let parent_id = parent_group.id.as_deref().unwrap_or(&parent_group.key);
                filters.insert(option.field.clone(), id_value(parent_id));
                let sub = self
                    .group(parent)?
                    .sub_groups()
                    .iter()
                    .find(|sub| sub.group.key == *key)?;
                Some(GroupByParam {
                    field: child.field.clone(),
                    value: sub.group.id.clone().unwrap_or_else(|| sub.group.key.clone()),
                })
            }
        };
        let sort = self.sort.clone();
        let search_term = self.filter.search_term.clone();
        let window = &mut self.page_mut(scope)?.window;
        Some(DataQuery {
            filters,
            search_term,
            page: window.request_page(),
            page_size: window.items_per_page(),
            sort_column: sort.as_ref().map(|sort| sort.column.clone()),
            sort_direction: sort.map(|sort| sort.direction),
            group_by,
        })
    }

    fn group(&self, key: &str) -> Option<&GroupState> {
        self.groups().iter().find(|group| group.group.key == key)
    }

    fn group_mut(&mut self, key: &str) -> Option<&mut GroupState> {
        self.groups
            .as_mut()?
            .iter_mut()
            .find(|group| group.group.key == key)
    }

    fn page_mut(&mut self, scope: &ScopeKey) -> Option<&mut PageState> {
        match scope {
            ScopeKey::Flat => Some(&mut self.flat),
            ScopeKey::Group(key) => self.group_mut(key).map(|group| &mut group.page),
            ScopeKey::SubGroup { parent, key } => self
                .group_mut(parent)?
                .sub_groups
                .as_mut()?
                .iter_mut()
                .find(|sub| sub.group.key == *key)
                .map(|sub| &mut sub.page),
        }
    }

    fn scope_rows(&self, scope: &ScopeKey) -> Vec<(RowId, Row)> {
        self.rows(scope)
            .iter()
            .filter_map(|row| Some((row.id(&self.id_field)?, row.clone())))
            .collect()
    }

    fn scope_ids(&self, scope: &ScopeKey) -> Vec<RowId> {
        self.rows(scope)
            .iter()
            .filter_map(|row| row.id(&self.id_field))
            .collect()
    }

    fn selectable_ids(&self, scope: &ScopeKey) -> Vec<RowId> {
        self.rows(scope)
            .iter()
            .filter(|row| !self.is_checkbox_disabled(row))
            .filter_map(|row| row.id(&self.id_field))
            .collect()
    }

    /// `global = (global - visible) ∪ (ids ∩ visible)` for the rows `scope`
    /// shows right now.
    fn apply_selection_delta(
        &mut self,
        scope: &ScopeKey,
        ids: &BTreeSet<RowId>,
    ) -> Vec<TableEvent> {
        let visible = self.scope_rows(scope);
        if !self.selection.apply_selection_delta(&visible, ids) {
            log::debug!("selection update from {scope:?} left the selected ids unchanged");
        }
        self.selection_events()
    }

    fn selection_events(&self) -> Vec<TableEvent> {
        vec![
            TableEvent::SelectionChanged(self.selection.ids().iter().copied().collect()),
            TableEvent::SelectionDataChanged(self.selection.rows()),
        ]
    }

    fn toggle_row(&mut self, scope: &ScopeKey, index: usize) -> Vec<TableEvent> {
        let Some(row) = self.rows(scope).get(index) else {
            return Vec::new();
        };
        if self.is_checkbox_disabled(row) {
            log::debug!("row {index} of {scope:?} is not selectable");
            return Vec::new();
        }
        let Some(id) = row.id(&self.id_field) else {
            log::debug!("row {index} of {scope:?} has no readable id and cannot be selected");
            return Vec::new();
        };
        let mut ids: BTreeSet<RowId> = self
            .scope_ids(scope)
            .into_iter()
            .filter(|visible| self.selection.contains(*visible))
            .collect();
        if !ids.remove(&id) {
            ids.insert(id);
        }
        self.apply_selection_delta(scope, &ids)
    }

    fn toggle_all(&mut self, scope: &ScopeKey) -> Vec<TableEvent> {
        let ids = if self.is_all_selected(scope) {
            BTreeSet::new()
        } else {
            self.scope_ids(scope)
                .into_iter()
                .filter(|id| self.selection.contains(*id))
                .chain(self.selectable_ids(scope))
                .collect()
        };
        self.apply_selection_delta(scope, &ids)
    }

    fn cycle_sort(&mut self, field: &str) -> Vec<TableEvent> {
        if !self.columns.get(field).is_some_and(|column| column.sortable) {
            return Vec::new();
        }
        let next = match &self.sort {
            Some(sort) if sort.column == field => match sort.direction {
                SortDirection::Asc => Some(SortState::new(field, SortDirection::Desc)),
                SortDirection::Desc => None,
            },
            _ => Some(SortState::new(field, SortDirection::Asc)),
        };
        self.apply_sort_change(next)
    }

    /// Resets every page to 1, refetches what is on screen, and drops the
    /// cached rows of collapsed scopes so they reload when opened.
    fn apply_sort_change(&mut self, sort: Option<SortState>) -> Vec<TableEvent> {
        self.sort = sort;
        let mut scopes = Vec::new();

        self.flat.window.reset();
        if self.group_by.is_none() {
            scopes.push(ScopeKey::Flat);
        } else {
            self.flat.invalidate();
        }

        let has_child = self
            .group_by
            .as_ref()
            .is_some_and(|option| option.child.is_some());
        for group in self.groups.iter_mut().flatten() {
            group.page.window.reset();
            if group.expanded && !has_child {
                scopes.push(ScopeKey::Group(group.group.key.clone()));
            } else {
                group.page.invalidate();
            }
            for sub in group.sub_groups.iter_mut().flatten() {
                sub.page.window.reset();
                if group.expanded && sub.expanded {
                    scopes.push(ScopeKey::SubGroup {
                        parent: group.group.key.clone(),
                        key: sub.group.key.clone(),
                    });
                } else {
                    sub.page.invalidate();
                }
            }
        }

        scopes
            .iter()
            .filter_map(|scope| self.fetch_page(scope))
            .collect()
    }

    fn apply_filter_change(&mut self) -> Vec<TableEvent> {
        self.flat.window.reset();
        self.clear_groups();
        self.load_data()
    }

    fn clear_groups(&mut self) {
        self.groups = None;
        self.groups_token = None;
    }

    // The selection survives a grouping change.
    fn apply_group_by_change(&mut self, option: Option<GroupOption>) -> Vec<TableEvent> {
        self.awaiting_default = false;
        self.group_by = option.clone();
        self.clear_groups();
        self.flat.window.reset();
        self.flat.invalidate();
        let mut events = vec![TableEvent::GroupByChanged(option)];
        events.extend(self.load_data());
        events
    }

    fn toggle_group(&mut self, key: &str) -> Vec<TableEvent> {
        let Some(group) = self.group_mut(key) else {
            return Vec::new();
        };
        group.expanded = !group.expanded;
        if !group.expanded {
            return Vec::new();
        }
        let needs_subs = group.sub_groups.is_none() && !group.sub_loading;
        let needs_page = !group.page.is_loaded() && !group.page.loading;
        let parent_id = group
            .group
            .id
            .clone()
            .unwrap_or_else(|| group.group.key.clone());

        let Some(option) = self.group_by.clone() else {
            return Vec::new();
        };
        match option.child.as_deref() {
            Some(child) => {
                if !needs_subs {
                    return self.fetch_open_sub_groups(key);
                }
                let Some(lookup) = SubGroupLookup::resolve(&option, child) else {
                    log::warn!(
                        "no sub-group lookup for {:?} -> {:?}; group {key} stays empty",
                        option.field,
                        child.field
                    );
                    return Vec::new();
                };
                let token = self.issue(FetchScope::SubGroupList(key.to_owned()));
                if let Some(group) = self.group_mut(key) {
                    group.sub_loading = true;
                    group.sub_token = Some(token);
                }
                vec![fetch(
                    token,
                    ServiceCall::SubGroups {
                        lookup,
                        parent_id,
                        filters: self.filter.filters.clone(),
                        search_term: self.filter.search_term.clone(),
                    },
                )]
            }
            None if needs_page => self
                .fetch_page(&ScopeKey::Group(key.to_owned()))
                .into_iter()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Sub-groups left open while their parent was collapsed lose their rows
    /// on sort or paging changes; reload them when the parent opens again.
    fn fetch_open_sub_groups(&mut self, parent: &str) -> Vec<TableEvent> {
        let stale: Vec<ScopeKey> = self
            .group(parent)
            .map(|group| {
                group
                    .sub_groups()
                    .iter()
                    .filter(|sub| sub.expanded && !sub.page.is_loaded() && !sub.page.loading)
                    .map(|sub| ScopeKey::SubGroup {
                        parent: parent.to_owned(),
                        key: sub.group.key.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        stale
            .iter()
            .filter_map(|scope| self.fetch_page(scope))
            .collect()
    }

    fn toggle_sub_group(&mut self, parent: &str, key: &str) -> Vec<TableEvent> {
        let Some(sub) = self
            .group_mut(parent)
            .and_then(|group| group.sub_groups.as_mut())
            .and_then(|subs| subs.iter_mut().find(|sub| sub.group.key == key))
        else {
            return Vec::new();
        };
        sub.expanded = !sub.expanded;
        if !sub.expanded || sub.page.is_loaded() || sub.page.loading {
            return Vec::new();
        }
        self.fetch_page(&ScopeKey::SubGroup {
            parent: parent.to_owned(),
            key: key.to_owned(),
        })
        .into_iter()
        .collect()
    }

    fn go_to_page(&mut self, scope: &ScopeKey, page: usize) -> Vec<TableEvent> {
        let Some(state) = self.page_mut(scope) else {
            return Vec::new();
        };
        if let Err(error) = state.window.go_to_page(page) {
            log::debug!("ignoring page change for {scope:?}: {error:#}");
            return Vec::new();
        }
        self.refetch_if_shown(scope)
    }

    fn set_items_per_page(&mut self, scope: &ScopeKey, items_per_page: usize) -> Vec<TableEvent> {
        let Some(state) = self.page_mut(scope) else {
            return Vec::new();
        };
        state.window.set_items_per_page(items_per_page);
        self.refetch_if_shown(scope)
    }

    fn refetch_if_shown(&mut self, scope: &ScopeKey) -> Vec<TableEvent> {
        let shown = match scope {
            ScopeKey::Flat => self.group_by.is_none(),
            ScopeKey::Group(key) => self.group(key).is_some_and(|group| group.expanded),
            ScopeKey::SubGroup { parent, key } => self.group(parent).is_some_and(|group| {
                group.expanded
                    && group
                        .sub_groups()
                        .iter()
                        .any(|sub| sub.group.key == *key && sub.expanded)
            }),
        };
        if !shown {
            if let Some(state) = self.page_mut(scope) {
                state.invalidate();
            }
            return Vec::new();
        }
        self.fetch_page(scope).into_iter().collect()
    }

    fn export(
        &mut self,
        scope: ExportScope,
        format: ExportFormat,
        now: OffsetDateTime,
    ) -> Vec<TableEvent> {
        let columns = export_columns(&self.columns, scope);
        if columns.is_empty() {
            return vec![TableEvent::Notify(Notice::warning(NO_COLUMNS_TO_EXPORT))];
        }

        if !self.selection.is_empty() {
            let rows = self.selection.rows();
            return vec![self.export_ready(scope, format, now, &columns, &rows)];
        }

        let sort = self.sort.clone();
        let query = DataQuery {
            filters: self.filter.filters.clone(),
            search_term: self.filter.search_term.clone(),
            page: 1,
            page_size: EXPORT_PAGE_SIZE,
            sort_column: sort.as_ref().map(|sort| sort.column.clone()),
            sort_direction: sort.map(|sort| sort.direction),
            group_by: None,
        };
        let token = self.issue(FetchScope::Export);
        self.pending_export = Some(PendingExport {
            token,
            scope,
            format,
            now,
            columns,
        });
        vec![fetch(token, ServiceCall::Data(query))]
    }

    fn export_ready(
        &self,
        scope: ExportScope,
        format: ExportFormat,
        now: OffsetDateTime,
        columns: &[Column],
        rows: &[Row],
    ) -> TableEvent {
        if rows.is_empty() {
            return TableEvent::Notify(Notice::warning(NO_ROWS_TO_EXPORT));
        }
        let plan = ExportPlan {
            entity_name: &self.entity_name,
            scope,
            format,
            now,
            style: &self.export_style,
        };
        TableEvent::ExportReady(plan.build(columns, rows))
    }

    fn complete(&mut self, token: RequestToken, outcome: FetchOutcome) -> Vec<TableEvent> {
        let Some(scope) = self.in_flight.remove(&token) else {
            log::debug!("discarding response for unknown request {token:?}");
            return Vec::new();
        };
        if !self.is_latest(&scope, token) {
            log::debug!("discarding stale response {token:?} for {scope:?}");
            return Vec::new();
        }

        match (scope, outcome) {
            (FetchScope::Page(scope), FetchOutcome::Page(page)) => self.page_loaded(&scope, page),
            (FetchScope::GroupList, FetchOutcome::Groups(values)) => {
                self.groups_token = None;
                self.loading = false;
                self.loaded_once = true;
                self.groups = Some(build_groups(&values, self.items_per_page));
                Vec::new()
            }
            (FetchScope::SubGroupList(parent), FetchOutcome::Groups(values)) => {
                let items_per_page = self.items_per_page;
                if let Some(group) = self.group_mut(&parent) {
                    group.sub_loading = false;
                    group.sub_token = None;
                    group.sub_groups = Some(build_sub_groups(&parent, &values, items_per_page));
                }
                Vec::new()
            }
            (FetchScope::GroupOptions, FetchOutcome::Options(options)) => {
                self.options_token = None;
                let chosen = self.selector.options_loaded(options);
                self.finish_default(chosen)
            }
            (FetchScope::Export, FetchOutcome::Page(page)) => {
                let Some(pending) = self.pending_export.take() else {
                    return Vec::new();
                };
                vec![self.export_ready(
                    pending.scope,
                    pending.format,
                    pending.now,
                    &pending.columns,
                    &page.items,
                )]
            }
            (scope, FetchOutcome::Failed(message)) => self.fetch_failed(scope, &message),
            (scope, outcome) => {
                log::error!("response {outcome:?} does not fit request scope {scope:?}");
                self.fetch_failed(scope, "unexpected response shape")
            }
        }
    }

    fn is_latest(&self, scope: &FetchScope, token: RequestToken) -> bool {
        let latest = match scope {
            FetchScope::Page(key) => self.page(key).and_then(|state| state.token),
            FetchScope::GroupList => self.groups_token,
            FetchScope::SubGroupList(parent) => self.group(parent).and_then(|group| group.sub_token),
            FetchScope::GroupOptions => self.options_token,
            FetchScope::Export => self.pending_export.as_ref().map(|pending| pending.token),
        };
        latest == Some(token)
    }

    fn page_loaded(&mut self, scope: &ScopeKey, page: DataPage) -> Vec<TableEvent> {
        let Some(state) = self.page_mut(scope) else {
            return Vec::new();
        };
        let requested = state.window.current_page();
        state.loading = false;
        state.token = None;
        state.window.set_total_items(page.total_items);
        if state.window.current_page() != requested {
            log::debug!(
                "page {requested} of {scope:?} is past the end; loading page {}",
                state.window.current_page()
            );
            return self.fetch_page(scope).into_iter().collect();
        }
        state.rows = Some(page.items);

        if *scope == ScopeKey::Flat {
            self.loading = false;
            self.loaded_once = true;
        }
        let loaded = self.scope_rows(scope);
        self.selection.refresh_cache(&loaded);
        self.columns.schedule_layout();
        Vec::new()
    }

    fn finish_default(&mut self, chosen: Option<GroupOption>) -> Vec<TableEvent> {
        if !self.awaiting_default {
            return Vec::new();
        }
        self.apply_group_by_change(chosen)
    }

    fn fetch_failed(&mut self, scope: FetchScope, message: &str) -> Vec<TableEvent> {
        log::error!("fetch for {scope:?} failed: {message}");
        match scope {
            FetchScope::Page(key) => {
                if let Some(state) = self.page_mut(&key) {
                    state.loading = false;
                    state.token = None;
                }
                if key == ScopeKey::Flat {
                    self.loading = false;
                }
                Vec::new()
            }
            FetchScope::GroupList => {
                self.groups_token = None;
                self.loading = false;
                Vec::new()
            }
            FetchScope::SubGroupList(parent) => {
                if let Some(group) = self.group_mut(&parent) {
                    group.sub_loading = false;
                    group.sub_token = None;
                }
                Vec::new()
            }
            FetchScope::GroupOptions => {
                self.options_token = None;
                let chosen = self.selector.options_failed();
                self.finish_default(chosen)
            }
            FetchScope::Export => {
                self.pending_export = None;
                vec![TableEvent::Notify(Notice::error(EXPORT_FAILED))]
            }
        }
    }
}

fn fetch(token: RequestToken, call: ServiceCall) -> TableEvent {
    TableEvent::Fetch(FetchRequest { token, call })
}

fn column_events(changes: Vec<ColumnChange>) -> Vec<TableEvent> {
    changes.into_iter().map(TableEvent::from).collect()
}

fn id_value(id: &str) -> Value {
    id.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(id.to_owned()))
}

fn group_key(value: &GroupValue, index: usize) -> String {
    value
        .id
        .as_deref()
        .filter(|id| !id.is_empty())
        .or(value.name.as_deref().filter(|name| !name.is_empty()))
        .map(str::to_owned)
        .unwrap_or_else(|| format!("grupo-{index}"))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn group_label(value: &GroupValue, key: &str) -> String {
    value
        .name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(key)
        .to_owned()
}

fn build_groups(values: &[GroupValue], items_per_page: usize) -> Vec<GroupState> {
    let mut seen = BTreeSet::new();
    let mut groups = Vec::with_capacity(values.len());
    for (index, value) in values.iter().enumerate() {
        let key = group_key(value, index);
        if !seen.insert(key.clone()) {
            log::warn!("skipping group {index}: key {key:?} is already in use");
            continue;
        }
        groups.push(GroupState {
            group: Group {
                label: group_label(value, &key),
                dom_id: format!("{}-{index}", sanitize(&key, '-', "grupo")),
                id: value.id.clone(),
                key,
            },
            page: PageState::new(items_per_page),
            expanded: false,
            sub_groups: None,
            sub_loading: false,
            sub_token: None,
        });
    }
    groups
}

fn build_sub_groups(
    parent: &str,
    values: &[GroupValue],
    items_per_page: usize,
) -> Vec<SubGroupState> {
    let mut seen = BTreeSet::new();
    let mut subs = Vec::with_capacity(values.len());
    for (index, value) in values.iter().enumerate() {
        let suffix = value
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| index.to_string());
        let key = format!("{parent}_sub_{suffix}");
        if !seen.insert(key.clone()) {
            log::warn!("skipping sub-group {index} of {parent}: key {key:?} is already in use");
            continue;
        }
        subs.push(SubGroupState {
            group: Group {
                label: group_label(value, &suffix),
                dom_id: format!(
                    "subgroup_{}_{index}_{}",
                    sanitize(parent, '_', "grupo"),
                    sanitize(&suffix, '_', "sub")
                ),
                id: value.id.clone(),
                key,
            },
            page: PageState::new(items_per_page),
            expanded: false,
        });
    }
    subs
}

/// Lowercase ASCII identifier: accents folded, other characters replaced by
/// `separator`, runs collapsed, edges trimmed.
fn sanitize(raw: &str, separator: char, fallback: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars().map(fold_accent) {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            out.push(ch);
        } else if !out.ends_with(separator) {
            out.push(separator);
        }
    }
    let trimmed = out.trim_matches(separator);
    if trimmed.is_empty() {
        fallback.to_owned()
    } else {
        trimmed.to_owned()
    }
}

fn fold_accent(ch: char) -> char {
    match ch {
        'á' | 'à' | 'ä' | 'â' | 'Á' | 'À' | 'Ä' | 'Â' => 'a',
        'é' | 'è' | 'ë' | 'ê' | 'É' | 'È' | 'Ë' | 'Ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' | 'Í' | 'Ì' | 'Ï' | 'Î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' | 'Ó' | 'Ò' | 'Ö' | 'Ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' | 'Ú' | 'Ù' | 'Ü' | 'Û' => 'u',
        'ñ' | 'Ñ' => 'n',
        'ç' | 'Ç' => 'c',
        other => other,
    }
}
