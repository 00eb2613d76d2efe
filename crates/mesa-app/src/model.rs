// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::ids::RowId;

pub const DEFAULT_ID_FIELD: &str = "id";
pub const DEFAULT_ITEMS_PER_PAGE: usize = 10;
pub const PAGE_SIZE_CHOICES: [usize; 4] = [5, 10, 20, 50];

/// One record as delivered by the backend. Opaque apart from the id field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    /// Looks up a field, following dots into nested objects.
    pub fn get(&self, path: &str) -> Option<&Value> {
        if let Some(value) = self.0.get(path) {
            return Some(value);
        }
        let mut parts = path.split('.');
        let mut current = self.0.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn id(&self, id_field: &str) -> Option<RowId> {
        self.get(id_field).and_then(RowId::from_value)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Row {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColumnType {
    #[serde(rename = "checkbox")]
    Checkbox,
    #[default]
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "date")]
    Date,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "currency")]
    Currency,
    #[serde(rename = "acciones", alias = "actions")]
    Actions,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "objetivo-estado", alias = "goal-status")]
    GoalStatus,
    #[serde(rename = "objetivo-monetario", alias = "goal-amount")]
    GoalAmount,
}

impl ColumnType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Checkbox => "checkbox",
            Self::Text => "text",
            Self::Date => "date",
            Self::Number => "number",
            Self::Currency => "currency",
            Self::Actions => "acciones",
            Self::Boolean => "boolean",
            Self::Image => "image",
            Self::GoalStatus => "objetivo-estado",
            Self::GoalAmount => "objetivo-monetario",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "checkbox" => Some(Self::Checkbox),
            "text" => Some(Self::Text),
            "date" => Some(Self::Date),
            "number" => Some(Self::Number),
            "currency" => Some(Self::Currency),
            "acciones" | "actions" => Some(Self::Actions),
            "boolean" => Some(Self::Boolean),
            "image" => Some(Self::Image),
            "objetivo-estado" | "goal-status" => Some(Self::GoalStatus),
            "objetivo-monetario" | "goal-amount" => Some(Self::GoalAmount),
            _ => None,
        }
    }

    /// Columns that carry UI chrome rather than data. Never exported.
    pub const fn is_structural(self) -> bool {
        matches!(self, Self::Checkbox | Self::Actions | Self::Image)
    }

    pub const fn default_width(self) -> u32 {
        match self {
            Self::Checkbox => 50,
            Self::Actions => 100,
            Self::Date => 120,
            Self::Number | Self::Currency => 100,
            _ => 150,
        }
    }

    pub const fn groups_digits_by_default(self) -> bool {
        matches!(self, Self::Number | Self::Currency | Self::GoalAmount)
    }

    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Number | Self::Currency | Self::GoalAmount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sticky {
    Left,
    #[default]
    None,
    Right,
}

impl Sticky {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::None => "none",
            Self::Right => "right",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "left" => Some(Self::Left),
            "none" => Some(Self::None),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowActionKind {
    View,
    Edit,
    Delete,
    Duplicate,
    File,
}

impl RowActionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Duplicate => "duplicate",
            Self::File => "file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub field: String,
    pub header: String,
    #[serde(rename = "type", default)]
    pub kind: ColumnType,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub sticky: Sticky,
    #[serde(default)]
    pub pinable: Option<bool>,
    #[serde(default)]
    pub hideable: Option<bool>,
    #[serde(default)]
    pub visible: Option<bool>,
    #[serde(default)]
    pub resizable: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_length")]
    pub width: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_length")]
    pub min_width: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_length")]
    pub max_width: Option<u32>,
    #[serde(default)]
    pub align: Option<Align>,
    #[serde(default)]
    pub actions: Vec<RowActionKind>,
    #[serde(default)]
    pub decimal_places: Option<u8>,
    #[serde(default)]
    pub use_grouping: Option<bool>,
    #[serde(default)]
    pub totalizable: bool,
}

impl Column {
    pub fn new(field: impl Into<String>, header: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            field: field.into(),
            header: header.into(),
            kind,
            sortable: false,
            sticky: Sticky::None,
            pinable: None,
            hideable: None,
            visible: None,
            resizable: None,
            width: None,
            min_width: None,
            max_width: None,
            align: None,
            actions: Vec::new(),
            decimal_places: None,
            use_grouping: None,
            totalizable: false,
        }
    }

    pub fn with_sticky(mut self, sticky: Sticky) -> Self {
        self.sticky = sticky;
        self
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    pub fn with_min_width(mut self, width: u32) -> Self {
        self.min_width = Some(width);
        self
    }

    pub fn with_max_width(mut self, width: u32) -> Self {
        self.max_width = Some(width);
        self
    }

    pub fn with_sortable(mut self, sortable: bool) -> Self {
        self.sortable = sortable;
        self
    }

    pub fn with_pinable(mut self, pinable: bool) -> Self {
        self.pinable = Some(pinable);
        self
    }

    pub fn with_hideable(mut self, hideable: bool) -> Self {
        self.hideable = Some(hideable);
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = Some(visible);
        self
    }

    pub fn with_resizable(mut self, resizable: bool) -> Self {
        self.resizable = Some(resizable);
        self
    }

    pub fn with_actions(mut self, actions: Vec<RowActionKind>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_decimal_places(mut self, places: u8) -> Self {
        self.decimal_places = Some(places);
        self
    }

    pub fn with_totalizable(mut self, totalizable: bool) -> Self {
        self.totalizable = totalizable;
        self
    }

    /// Writes the implicit defaults into the descriptor so later reads see
    /// concrete values.
    pub fn fill_defaults(&mut self) {
        self.pinable.get_or_insert(self.kind != ColumnType::Actions);
        self.hideable.get_or_insert(true);
        self.visible.get_or_insert(true);
        self.resizable.get_or_insert(false);
        self.use_grouping
            .get_or_insert(self.kind.groups_digits_by_default());
    }

    pub fn is_pinable(&self) -> bool {
        self.kind != ColumnType::Actions && self.pinable.unwrap_or(true)
    }

    pub fn is_hideable(&self) -> bool {
        self.hideable.unwrap_or(true)
    }

    pub fn is_visible(&self) -> bool {
        self.visible.unwrap_or(true)
    }

    pub fn is_resizable(&self) -> bool {
        self.resizable.unwrap_or(false)
    }

    pub fn groups_digits(&self) -> bool {
        self.use_grouping
            .unwrap_or_else(|| self.kind.groups_digits_by_default())
    }
}

fn deserialize_length<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => number
            .as_f64()
            .filter(|value| *value >= 0.0)
            .map(|value| Some(value.round() as u32))
            .ok_or_else(|| de::Error::custom(format!("invalid column width {number}"))),
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            let digits = trimmed.strip_suffix("px").unwrap_or(trimmed).trim();
            digits
                .parse::<f64>()
                .ok()
                .filter(|value| *value >= 0.0)
                .map(|value| Some(value.round() as u32))
                .ok_or_else(|| {
                    de::Error::custom(format!(
                        "invalid column width {text:?}; use a number or a pixel value like \"120px\""
                    ))
                })
        }
        Some(other) => Err(de::Error::custom(format!(
            "invalid column width {other}; use a number or a pixel value like \"120px\""
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    pub const fn flipped(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortState {
    pub column: String,
    pub direction: SortDirection,
}

impl SortState {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterState {
    pub search_term: String,
    pub filters: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupOption {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub field: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide_field: Option<String>,
    #[serde(
        default,
        rename = "childGroupBy",
        skip_serializing_if = "Option::is_none"
    )]
    pub child: Option<Box<GroupOption>>,
}

impl GroupOption {
    pub fn new(
        name: impl Into<String>,
        field: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            field: field.into(),
            endpoint: endpoint.into(),
            hide_field: None,
            child: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_hide_field(mut self, field: impl Into<String>) -> Self {
        self.hide_field = Some(field.into());
        self
    }

    pub fn with_child(mut self, child: GroupOption) -> Self {
        self.child = Some(Box::new(child));
        self
    }

    /// Stable identity for selection comparisons and persistence.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.field)
    }

    /// The grouping chain this option describes, outermost first.
    pub fn chain(&self) -> Vec<&GroupOption> {
        let mut chain = vec![self];
        if let Some(child) = &self.child {
            chain.push(child);
        }
        chain
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupValue {
    #[serde(default, deserialize_with = "deserialize_group_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl GroupValue {
    pub fn new(id: Option<&str>, name: Option<&str>) -> Self {
        Self {
            id: id.map(str::to_owned),
            name: name.map(str::to_owned),
        }
    }
}

fn deserialize_group_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        Some(Value::Bool(flag)) => Some(flag.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupByParam {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQuery {
    pub filters: BTreeMap<String, Value>,
    pub search_term: String,
    pub page: usize,
    pub page_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_direction: Option<SortDirection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by: Option<GroupByParam>,
}

impl DataQuery {
    pub fn sort(&self) -> Option<SortState> {
        match (&self.sort_column, self.sort_direction) {
            (Some(column), Some(direction)) => Some(SortState::new(column.clone(), direction)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPage {
    #[serde(default)]
    pub items: Vec<Row>,
    #[serde(default)]
    pub total_items: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Xlsx,
    Csv,
    Json,
}

impl ExportFormat {
    pub const ALL: [Self; 3] = [Self::Xlsx, Self::Csv, Self::Json];

    pub const fn extension(self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "xlsx" | "excel" => Some(Self::Xlsx),
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportScope {
    #[serde(rename = "allColumns")]
    AllColumns,
    #[serde(rename = "visibleColumns")]
    VisibleColumns,
}

impl ExportScope {
    pub const fn file_label(self) -> &'static str {
        match self {
            Self::AllColumns => "completa",
            Self::VisibleColumns => "visibles",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Column, ColumnType, DataPage, GroupOption, GroupValue, Row, Sticky};
    use crate::RowId;
    use anyhow::Result;
    use serde_json::json;

    #[test]
    fn row_get_follows_dotted_paths() -> Result<()> {
        let row: Row = serde_json::from_value(json!({
            "id": 3,
            "cliente": {"nombre": "Acme", "codigo": "C-1"},
            "a.b": "literal"
        }))?;
        assert_eq!(row.get("cliente.nombre"), Some(&json!("Acme")));
        assert_eq!(row.get("a.b"), Some(&json!("literal")));
        assert_eq!(row.get("cliente.missing"), None);
        assert_eq!(row.id("id"), Some(RowId::new(3)));
        Ok(())
    }

    #[test]
    fn column_defaults_depend_on_type() {
        let mut actions = Column::new("acciones", "Acciones", ColumnType::Actions);
        actions.fill_defaults();
        assert_eq!(actions.pinable, Some(false));
        assert_eq!(actions.hideable, Some(true));
        assert_eq!(actions.visible, Some(true));
        assert_eq!(actions.resizable, Some(false));
        assert_eq!(actions.use_grouping, Some(false));

        let mut amount = Column::new("importe", "Importe", ColumnType::Currency);
        amount.fill_defaults();
        assert_eq!(amount.pinable, Some(true));
        assert_eq!(amount.use_grouping, Some(true));
    }

    #[test]
    fn explicit_column_flags_survive_defaults() {
        let mut column = Column::new("nombre", "Nombre", ColumnType::Text)
            .with_hideable(false)
            .with_visible(false)
            .with_resizable(true);
        column.fill_defaults();
        assert!(!column.is_hideable());
        assert!(!column.is_visible());
        assert!(column.is_resizable());
    }

    #[test]
    fn column_deserializes_wire_names_and_pixel_widths() -> Result<()> {
        let column: Column = serde_json::from_value(json!({
            "field": "fecha",
            "header": "Fecha",
            "type": "date",
            "sticky": "left",
            "width": "120px",
            "minWidth": 80,
            "decimalPlaces": 2
        }))?;
        assert_eq!(column.kind, ColumnType::Date);
        assert_eq!(column.sticky, Sticky::Left);
        assert_eq!(column.width, Some(120));
        assert_eq!(column.min_width, Some(80));
        assert_eq!(column.decimal_places, Some(2));

        let actions: Column = serde_json::from_value(json!({
            "field": "acciones",
            "header": "",
            "type": "acciones",
            "actions": ["view", "delete"]
        }))?;
        assert_eq!(actions.kind, ColumnType::Actions);
        assert_eq!(actions.actions.len(), 2);
        Ok(())
    }

    #[test]
    fn column_width_rejects_garbage() {
        let error = serde_json::from_value::<Column>(json!({
            "field": "x",
            "header": "X",
            "width": "wide"
        }))
        .expect_err("non-numeric width should fail");
        assert!(error.to_string().contains("invalid column width"));
    }

    #[test]
    fn group_value_accepts_numeric_and_string_ids() -> Result<()> {
        let numeric: GroupValue = serde_json::from_value(json!({"id": 12, "name": "Norte"}))?;
        assert_eq!(numeric.id.as_deref(), Some("12"));
        let text: GroupValue = serde_json::from_value(json!({"id": "N-1"}))?;
        assert_eq!(text.id.as_deref(), Some("N-1"));
        assert_eq!(text.name, None);
        Ok(())
    }

    #[test]
    fn group_option_reads_child_group_by() -> Result<()> {
        let option: GroupOption = serde_json::from_value(json!({
            "id": "7",
            "name": "Equipos",
            "field": "idEquipoVenta",
            "endpoint": "incentive-team",
            "childGroupBy": {"name": "Agentes", "field": "idAgente", "endpoint": "incentive-agent"}
        }))?;
        assert_eq!(option.key(), "7");
        let chain = option.chain();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].field, "idAgente");
        Ok(())
    }

    #[test]
    fn data_page_reads_total_items() -> Result<()> {
        let page: DataPage =
            serde_json::from_value(json!({"items": [{"id": 1}], "totalItems": 45}))?;
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total_items, 45);
        Ok(())
    }
}
