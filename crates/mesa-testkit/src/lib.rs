// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, bail};
use mesa_app::{
    Column, ColumnType, DataPage, DataQuery, DataService, EntityTableManager, GroupOption,
    GroupService, GroupValue, Row, RowActionKind, SortDirection, Sticky, SubGroupLookup,
    TableCommand, TableEvent, numeric_value,
};
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use time::macros::{datetime, format_description};
use time::{Date, Duration, Month, OffsetDateTime, Time};

const TEAMS: [&str; 4] = ["Norte", "Sur", "Levante", "Centro"];

const AGENTS: [&str; 10] = [
    "Lucía Ortega",
    "Mateo Ibarra",
    "Carmen Soler",
    "Hugo Navarro",
    "Elena Prieto",
    "Pablo Cuesta",
    "Marta Rey",
    "Diego Lozano",
    "Irene Vidal",
    "Álvaro Gil",
];

const INCENTIVES: [&str; 3] = ["Campaña verano", "Fidelización", "Captación"];

const CLIENT_PREFIXES: [&str; 8] = [
    "Talleres",
    "Distribuciones",
    "Comercial",
    "Suministros",
    "Construcciones",
    "Farmacia",
    "Ferretería",
    "Transportes",
];

const CLIENT_NAMES: [&str; 12] = [
    "Almeida",
    "Bermejo",
    "Castillo",
    "Durán",
    "Esteban",
    "Fuentes",
    "Garrido",
    "Herrera",
    "Iglesias",
    "Jiménez",
    "Molina",
    "Pascual",
];

const REJECTION_REASONS: [&str; 6] = [
    "Documentación incompleta",
    "Firma ausente",
    "Precio fuera de tarifa",
    "Cliente duplicado",
    "Cobertura no disponible",
    "Error de facturación",
];

#[derive(Debug, Clone)]
struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    fn new(seed: u64) -> Self {
        let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
        if state == 0 {
            state = 0xA409_3822_299F_31D0;
        }
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);

        let mut x = self.state;
        x ^= x >> 13;
        x ^= x << 7;
        x ^= x >> 17;
        x
    }

    fn int_n(&mut self, n: usize) -> usize {
        if n <= 1 {
            return 0;
        }
        (self.next_u64() % (n as u64)) as usize
    }

    fn bool(&mut self) -> bool {
        (self.next_u64() & 1) == 1
    }
}

/// Seeded generator of sales-rejection rows.
#[derive(Debug, Clone)]
pub struct RejectionFaker {
    rng: DeterministicRng,
    next_id: i64,
}

impl RejectionFaker {
    pub fn new(seed: u64) -> Self {
        let normalized = if seed == 0 { 1 } else { seed };
        Self {
            rng: DeterministicRng::new(normalized),
            next_id: 1,
        }
    }

    pub fn rejection(&mut self) -> Row {
        let id = self.next_id;
        self.next_id += 1;

        let agent = self.rng.int_n(AGENTS.len());
        let team = agent % TEAMS.len();
        let incentive = self.rng.int_n(INCENTIVES.len());
        let cents = self.int_range(1_500, 950_000);
        let client = format!(
            "{} {}",
            self.pick(&CLIENT_PREFIXES),
            self.pick(&CLIENT_NAMES)
        );
        let reason = self.pick(&REJECTION_REASONS);

        let mut fields = Map::new();
        fields.insert("id".to_owned(), json!(id));
        fields.insert("cliente".to_owned(), json!(client));
        fields.insert("idEquipoVenta".to_owned(), json!(team + 1));
        fields.insert("equipo".to_owned(), json!(TEAMS[team]));
        fields.insert("idAgente".to_owned(), json!(agent + 1));
        fields.insert("agente".to_owned(), json!(AGENTS[agent]));
        fields.insert("idIncentivo".to_owned(), json!(incentive + 1));
        fields.insert("incentivo".to_owned(), json!(INCENTIVES[incentive]));
        fields.insert("motivo".to_owned(), json!(reason));
        fields.insert("importe".to_owned(), json!(cents as f64 / 100.0));
        fields.insert("unidades".to_owned(), json!(self.int_range(1, 40)));
        fields.insert("fecha".to_owned(), json!(self.timestamp_in(2025)));
        fields.insert("revisado".to_owned(), json!(self.rng.bool()));
        Row::new(fields)
    }

    pub fn rejections(&mut self, count: usize) -> Vec<Row> {
        (0..count).map(|_| self.rejection()).collect()
    }

    fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
        items[self.rng.int_n(items.len())]
    }

    fn int_range(&mut self, min: i64, max: i64) -> i64 {
        if max <= min {
            return min;
        }
        let span = max - min + 1;
        min + (self.rng.next_u64() % (span as u64)) as i64
    }

    /// `YYYY-MM-DDTHH:MM:SS` without offset, as the backends send it.
    fn timestamp_in(&mut self, year: i32) -> String {
        let start = Date::from_calendar_date(year, Month::January, 1)
            .map(|date| date.with_time(Time::MIDNIGHT).assume_utc())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let seconds = self.int_range(0, 364 * 24 * 3600);
        let moment = start + Duration::seconds(seconds);
        moment
            .format(format_description!(
                "[year]-[month]-[day]T[hour]:[minute]:[second]"
            ))
            .unwrap_or_default()
    }
}

pub fn demo_columns() -> Vec<Column> {
    let data = |field: &str, header: &str, kind: ColumnType| {
        Column::new(field, header, kind).with_sortable(true)
    };
    vec![
        data("id", "Id", ColumnType::Number)
            .with_sticky(Sticky::Left)
            .with_width(60)
            .with_hideable(false),
        data("cliente", "Cliente", ColumnType::Text)
            .with_sticky(Sticky::Left)
            .with_width(180)
            .with_resizable(true),
        data("equipo", "Equipo", ColumnType::Text),
        data("agente", "Agente", ColumnType::Text).with_resizable(true),
        data("incentivo", "Incentivo", ColumnType::Text),
        data("motivo", "Motivo", ColumnType::Text)
            .with_width(200)
            .with_resizable(true)
            .with_min_width(120),
        data("fecha", "Fecha", ColumnType::Date),
        data("importe", "Importe", ColumnType::Currency).with_totalizable(true),
        data("unidades", "Unidades", ColumnType::Number).with_totalizable(true),
        data("revisado", "Revisado", ColumnType::Boolean).with_visible(false),
        Column::new("acciones", "Acciones", ColumnType::Actions)
            .with_sticky(Sticky::Right)
            .with_actions(vec![
                RowActionKind::View,
                RowActionKind::Edit,
                RowActionKind::Delete,
            ]),
    ]
}

pub fn demo_group_options() -> Vec<GroupOption> {
    vec![
        GroupOption::new("Equipos", "idEquipoVenta", "incentive-team")
            .with_id("equipos")
            .with_hide_field("equipo"),
        GroupOption::new("Agentes", "idAgente", "incentive-agent")
            .with_id("agentes")
            .with_hide_field("agente"),
        GroupOption::new("Incentivos", "idIncentivo", "incentive")
            .with_id("incentivos")
            .with_hide_field("incentivo"),
        GroupOption::new("Motivo", "motivo", "rejection-reason")
            .with_id("motivos")
            .with_hide_field("motivo"),
    ]
}

/// Field pair `(id field, label field)` used for each cross-reference
/// dimension in the demo rows.
fn dimension_fields(dimension: mesa_app::Dimension) -> (&'static str, &'static str) {
    match dimension {
        mesa_app::Dimension::Team => ("idEquipoVenta", "equipo"),
        mesa_app::Dimension::Agent => ("idAgente", "agente"),
        mesa_app::Dimension::Incentive => ("idIncentivo", "incentivo"),
    }
}

/// In-memory implementation of both service traits over a fixed row set.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows: Vec<Row>,
    options: Vec<GroupOption>,
    fail_data: AtomicBool,
    data_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(rows: Vec<Row>, options: Vec<GroupOption>) -> Self {
        Self {
            rows,
            options,
            fail_data: AtomicBool::new(false),
            data_calls: AtomicUsize::new(0),
        }
    }

    pub fn demo(seed: u64, count: usize) -> Self {
        Self::new(
            RejectionFaker::new(seed).rejections(count),
            demo_group_options(),
        )
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn set_fail_data(&self, fail: bool) {
        self.fail_data.store(fail, AtomicOrdering::SeqCst);
    }

    pub fn data_calls(&self) -> usize {
        self.data_calls.load(AtomicOrdering::SeqCst)
    }

    fn matching(&self, filters: &BTreeMap<String, Value>, search_term: &str) -> Vec<&Row> {
        let needle = search_term.trim().to_lowercase();
        self.rows
            .iter()
            .filter(|row| {
                filters.iter().all(|(field, expected)| {
                    row.get(field)
                        .is_some_and(|actual| same_value(actual, expected))
                })
            })
            .filter(|row| {
                needle.is_empty()
                    || row.fields().values().any(|value| {
                        value
                            .as_str()
                            .is_some_and(|text| text.to_lowercase().contains(&needle))
                    })
            })
            .collect()
    }

    fn distinct(rows: &[&Row], id_field: &str, label_field: &str) -> Vec<GroupValue> {
        let mut seen = BTreeSet::new();
        let mut values = Vec::new();
        for row in rows {
            let Some(id) = row.get(id_field).map(text_of) else {
                continue;
            };
            if !seen.insert(id.clone()) {
                continue;
            }
            let label = row.get(label_field).map(text_of).unwrap_or_else(|| id.clone());
            values.push(GroupValue::new(Some(&id), Some(&label)));
        }
        values.sort_by(|left, right| left.name.cmp(&right.name));
        values
    }
}

impl DataService for MemoryBackend {
    fn get_data(&self, query: &DataQuery) -> Result<DataPage> {
        self.data_calls.fetch_add(1, AtomicOrdering::SeqCst);
        if self.fail_data.load(AtomicOrdering::SeqCst) {
            bail!("in-memory backend configured to fail data requests");
        }

        let mut rows = self.matching(&query.filters, &query.search_term);
        if let Some(group_by) = &query.group_by {
            let expected = Value::String(group_by.value.clone());
            rows.retain(|row| {
                row.get(&group_by.field)
                    .is_some_and(|actual| same_value(actual, &expected))
            });
        }
        if let Some(sort) = query.sort() {
            rows.sort_by(|left, right| {
                let ordering = compare_values(left.get(&sort.column), right.get(&sort.column));
                match sort.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        let total_items = rows.len();
        let page_size = query.page_size.max(1);
        let start = query.page.saturating_sub(1).saturating_mul(page_size);
        let items = rows
            .into_iter()
            .skip(start)
            .take(page_size)
            .cloned()
            .collect();
        Ok(DataPage { items, total_items })
    }
}

impl GroupService for MemoryBackend {
    fn group_options(&self, component_id: &str) -> Result<Vec<GroupOption>> {
        if component_id.trim().is_empty() {
            bail!("component id is empty; set [table] component_id in the config");
        }
        Ok(self.options.clone())
    }

    fn group_values(
        &self,
        endpoint: &str,
        filters: &BTreeMap<String, Value>,
        search_term: &str,
    ) -> Result<Vec<GroupValue>> {
        let option = self
            .options
            .iter()
            .find(|option| option.endpoint == endpoint)
            .with_context(|| format!("no grouping option uses endpoint {endpoint:?}"))?;
        let label_field = option.hide_field.as_deref().unwrap_or(&option.field);
        let rows = self.matching(filters, search_term);
        Ok(Self::distinct(&rows, &option.field, label_field))
    }

    fn sub_groups(
        &self,
        lookup: SubGroupLookup,
        parent_id: &str,
        filters: &BTreeMap<String, Value>,
        search_term: &str,
    ) -> Result<Vec<GroupValue>> {
        let (parent, child) = lookup.edge();
        let (parent_field, _) = dimension_fields(parent);
        let (child_field, child_label) = dimension_fields(child);
        let mut filters = filters.clone();
        filters.insert(parent_field.to_owned(), Value::String(parent_id.to_owned()));
        let rows = self.matching(&filters, search_term);
        Ok(Self::distinct(&rows, child_field, child_label))
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Loose equality: `7` matches `"7"`.
fn same_value(actual: &Value, expected: &Value) -> bool {
    actual == expected || text_of(actual) == text_of(expected)
}

fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(left), Some(right)) => match (left, right) {
            (Value::Number(_), Value::Number(_)) => numeric_value(left)
                .partial_cmp(&numeric_value(right))
                .unwrap_or(Ordering::Equal),
            _ => text_of(left).to_lowercase().cmp(&text_of(right).to_lowercase()),
        },
    }
}

/// Runs every fetch the manager asks for against `backend`, synchronously,
/// until no request is left. Returns the non-fetch events in order.
pub fn drive<B>(
    manager: &mut EntityTableManager,
    backend: &B,
    events: Vec<TableEvent>,
) -> Vec<TableEvent>
where
    B: DataService + GroupService + ?Sized,
{
    let mut queue: VecDeque<TableEvent> = events.into();
    let mut emitted = Vec::new();
    while let Some(event) = queue.pop_front() {
        match event {
            TableEvent::Fetch(request) => {
                let outcome = request.call.execute(backend);
                queue.extend(manager.dispatch(TableCommand::FetchCompleted {
                    token: request.token,
                    outcome,
                }));
            }
            other => emitted.push(other),
        }
    }
    emitted
}

/// Dispatches `command` and drives the resulting fetches to completion.
pub fn run<B>(
    manager: &mut EntityTableManager,
    backend: &B,
    command: TableCommand,
) -> Vec<TableEvent>
where
    B: DataService + GroupService + ?Sized,
{
    let events = manager.dispatch(command);
    drive(manager, backend, events)
}

pub fn temp_db_path() -> Result<(tempfile::TempDir, PathBuf)> {
    let dir = tempfile::tempdir().context("create temp dir")?;
    let db_path = dir.path().join("mesa.db");
    Ok((dir, db_path))
}

pub fn fixture_datetime() -> OffsetDateTime {
    datetime!(2025-03-14 09:30 UTC)
}

#[cfg(test)]
mod tests {
    use super::{MemoryBackend, RejectionFaker, demo_columns, demo_group_options};
    use anyhow::Result;
    use mesa_app::{
        DataQuery, DataService, GroupByParam, GroupService, SortDirection, SubGroupLookup,
    };
    use serde_json::json;
    use std::collections::BTreeMap;

    fn query(page: usize, page_size: usize) -> DataQuery {
        DataQuery {
            filters: BTreeMap::new(),
            search_term: String::new(),
            page,
            page_size,
            sort_column: None,
            sort_direction: None,
            group_by: None,
        }
    }

    #[test]
    fn same_seed_same_rows() {
        let left = RejectionFaker::new(42).rejections(5);
        let right = RejectionFaker::new(42).rejections(5);
        assert_eq!(left, right);

        let other = RejectionFaker::new(43).rejections(5);
        assert_ne!(left, other);
    }

    #[test]
    fn rejection_rows_are_consistent() {
        let mut faker = RejectionFaker::new(7);
        for (index, row) in faker.rejections(50).iter().enumerate() {
            assert_eq!(row.get("id"), Some(&json!(index as i64 + 1)));
            let team = row.get("idEquipoVenta").and_then(|value| value.as_i64());
            assert!(team.is_some_and(|team| (1..=4).contains(&team)));
            let when = row.get("fecha").and_then(|value| value.as_str());
            assert!(when.is_some_and(|when| when.starts_with("2025-") && when.contains('T')));
        }
    }

    #[test]
    fn demo_fixtures_cover_every_column_kind_used_by_grid() {
        let columns = demo_columns();
        assert!(columns.iter().any(|column| column.field == "acciones"));
        assert_eq!(demo_group_options().len(), 4);
    }

    #[test]
    fn paging_and_totals() -> Result<()> {
        let backend = MemoryBackend::demo(1, 23);
        let page = backend.get_data(&query(3, 10))?;
        assert_eq!(page.total_items, 23);
        assert_eq!(page.items.len(), 3);
        assert_eq!(backend.data_calls(), 1);
        Ok(())
    }

    #[test]
    fn sorting_numbers_descending() -> Result<()> {
        let backend = MemoryBackend::demo(2, 30);
        let mut sorted = query(1, 30);
        sorted.sort_column = Some("importe".to_owned());
        sorted.sort_direction = Some(SortDirection::Desc);
        let page = backend.get_data(&sorted)?;
        let amounts: Vec<f64> = page
            .items
            .iter()
            .filter_map(|row| row.get("importe").and_then(|value| value.as_f64()))
            .collect();
        assert!(amounts.windows(2).all(|pair| pair[0] >= pair[1]));
        Ok(())
    }

    #[test]
    fn group_param_and_filters_restrict_rows() -> Result<()> {
        let backend = MemoryBackend::demo(3, 60);
        let mut grouped = query(1, 100);
        grouped.group_by = Some(GroupByParam {
            field: "idEquipoVenta".to_owned(),
            value: "2".to_owned(),
        });
        let page = backend.get_data(&grouped)?;
        assert!(page.total_items > 0);
        assert!(
            page.items
                .iter()
                .all(|row| row.get("idEquipoVenta") == Some(&json!(2)))
        );
        Ok(())
    }

    #[test]
    fn group_values_and_sub_groups() -> Result<()> {
        let backend = MemoryBackend::demo(4, 80);
        let teams = backend.group_values("incentive-team", &BTreeMap::new(), "")?;
        assert_eq!(teams.len(), 4);
        assert!(teams.iter().all(|team| team.name.is_some()));

        let agents = backend.sub_groups(SubGroupLookup::TeamAgents, "1", &BTreeMap::new(), "")?;
        assert!(!agents.is_empty());
        assert!(agents.len() < 10);

        let error = backend
            .group_values("unknown", &BTreeMap::new(), "")
            .expect_err("unknown endpoint should fail");
        assert!(error.to_string().contains("unknown"));
        Ok(())
    }

    #[test]
    fn failing_data_reports_error() {
        let backend = MemoryBackend::demo(5, 5);
        backend.set_fail_data(true);
        let error = backend
            .get_data(&query(1, 10))
            .expect_err("configured to fail");
        assert!(error.to_string().contains("fail"));
    }
}
