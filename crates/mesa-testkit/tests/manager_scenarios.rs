// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use mesa_app::{
    EntityTableManager, ExportFormat, ExportScope, GroupOption, NoticeLevel, ScopeKey,
    SortDirection, SortState, TableCommand, TableConfig, TableEvent, numeric_value,
};
use mesa_testkit::{MemoryBackend, demo_columns, fixture_datetime, run};

fn manager() -> EntityTableManager {
    let mut config = TableConfig::new(demo_columns());
    config.entity_name = "Rechazos".to_owned();
    config.component_id = Some("rechazos".to_owned());
    EntityTableManager::new(config)
}

#[test]
fn init_loads_first_page_and_options() {
    let backend = MemoryBackend::demo(11, 23);
    let mut manager = manager();
    run(&mut manager, &backend, TableCommand::Init);

    assert_eq!(manager.flat().rows().len(), 10);
    assert_eq!(manager.flat().window().total_pages(), 3);
    assert!(manager.selector().is_loaded());
    // Four fetched options plus the synthesized "Equipos - Incentivos".
    assert_eq!(manager.selector().options().len(), 5);
    assert_eq!(manager.selector().options()[0].name, "Equipos - Incentivos");
}

#[test]
fn last_page_is_partial() {
    let backend = MemoryBackend::demo(11, 23);
    let mut manager = manager();
    run(&mut manager, &backend, TableCommand::Init);
    run(
        &mut manager,
        &backend,
        TableCommand::GoToPage {
            scope: ScopeKey::Flat,
            page: 3,
        },
    );
    assert_eq!(manager.flat().rows().len(), 3);
    assert_eq!(manager.flat().window().item_range(), Some((21, 23)));
}

#[test]
fn selection_spans_groups_and_survives_regrouping() {
    let backend = MemoryBackend::demo(12, 60);
    let mut manager = manager();
    run(&mut manager, &backend, TableCommand::Init);
    run(
        &mut manager,
        &backend,
        TableCommand::ToggleAll {
            scope: ScopeKey::Flat,
        },
    );
    assert_eq!(manager.selection().len(), 10);

    run(
        &mut manager,
        &backend,
        TableCommand::ToggleGroupOption("equipos".to_owned()),
    );
    assert_eq!(manager.groups().len(), 4);
    assert_eq!(manager.selection().len(), 10);

    let key = manager.groups()[0].group.key.clone();
    run(&mut manager, &backend, TableCommand::ToggleGroup(key.clone()));
    let scope = ScopeKey::Group(key);
    assert!(!manager.rows(&scope).is_empty());
    let shown: Vec<_> = manager
        .display_columns(&scope)
        .iter()
        .map(|column| column.field.clone())
        .collect();
    assert!(!shown.contains(&"equipo".to_owned()));

    run(&mut manager, &backend, TableCommand::ToggleRow { scope, index: 0 });
    let selected = manager.selection().len();
    assert!(selected == 9 || selected == 11, "got {selected}");
}

#[test]
fn compound_grouping_expands_into_sub_groups() {
    let backend = MemoryBackend::demo(13, 80);
    let mut manager = manager();
    run(&mut manager, &backend, TableCommand::Init);
    let compound = manager.selector().options()[0].key().to_owned();
    run(&mut manager, &backend, TableCommand::ToggleGroupOption(compound));

    let parent = manager.groups()[0].group.key.clone();
    run(&mut manager, &backend, TableCommand::ToggleGroup(parent.clone()));
    let subs = manager.groups()[0].sub_groups();
    assert!(!subs.is_empty());
    let sub_key = subs[0].group.key.clone();
    assert!(sub_key.starts_with(&format!("{parent}_sub_")));

    run(
        &mut manager,
        &backend,
        TableCommand::ToggleSubGroup {
            parent: parent.clone(),
            key: sub_key.clone(),
        },
    );
    let scope = ScopeKey::SubGroup {
        parent,
        key: sub_key,
    };
    let rows = manager.rows(&scope);
    assert!(!rows.is_empty());
    let team = rows[0].get("idEquipoVenta").cloned();
    assert!(rows.iter().all(|row| row.get("idEquipoVenta").cloned() == team));
    let incentive = rows[0].get("idIncentivo").cloned();
    assert!(rows.iter().all(|row| row.get("idIncentivo").cloned() == incentive));
}

#[test]
fn sorting_while_parent_is_closed_reloads_open_sub_group() {
    let backend = MemoryBackend::demo(13, 80);
    let mut manager = manager();
    run(&mut manager, &backend, TableCommand::Init);
    let compound = manager.selector().options()[0].key().to_owned();
    run(&mut manager, &backend, TableCommand::ToggleGroupOption(compound));

    let parent = manager.groups()[0].group.key.clone();
    run(&mut manager, &backend, TableCommand::ToggleGroup(parent.clone()));
    let sub_key = manager.groups()[0].sub_groups()[0].group.key.clone();
    run(
        &mut manager,
        &backend,
        TableCommand::ToggleSubGroup {
            parent: parent.clone(),
            key: sub_key.clone(),
        },
    );
    let scope = ScopeKey::SubGroup {
        parent: parent.clone(),
        key: sub_key,
    };
    let shown = manager.rows(&scope).len();
    assert!(shown > 0);

    run(&mut manager, &backend, TableCommand::ToggleGroup(parent.clone()));
    run(
        &mut manager,
        &backend,
        TableCommand::Sort(Some(SortState::new("importe", SortDirection::Desc))),
    );
    assert!(manager.rows(&scope).is_empty());

    let calls = backend.data_calls();
    run(&mut manager, &backend, TableCommand::ToggleGroup(parent));
    assert_eq!(backend.data_calls(), calls + 1);
    let amounts: Vec<f64> = manager
        .rows(&scope)
        .iter()
        .filter_map(|row| row.get("importe").and_then(numeric_value))
        .collect();
    assert_eq!(amounts.len(), shown);
    assert!(amounts.windows(2).all(|pair| pair[0] >= pair[1]));
}

#[test]
fn filters_apply_to_group_list_and_pages() {
    let backend = MemoryBackend::demo(15, 60);
    let mut manager = manager();
    run(&mut manager, &backend, TableCommand::Init);
    let team = manager
        .selector()
        .options()
        .iter()
        .find(|option| option.name == "Equipos")
        .cloned()
        .expect("demo offers team grouping");
    run(&mut manager, &backend, TableCommand::GroupBy(Some(team)));
    let key = manager.groups()[0].group.key.clone();
    run(&mut manager, &backend, TableCommand::ToggleGroup(key));
    assert!(manager.groups()[0].is_expanded());

    let agent = manager.groups()[0].page().rows()[0]
        .get("idAgente")
        .cloned()
        .expect("demo rows carry an agent");
    let filters = [("idAgente".to_owned(), agent.clone())].into_iter().collect();
    run(&mut manager, &backend, TableCommand::SetFilters(filters));

    assert!(!manager.groups().is_empty());
    assert!(manager.groups().iter().all(|group| !group.is_expanded()));
    let key = manager.groups()[0].group.key.clone();
    run(&mut manager, &backend, TableCommand::ToggleGroup(key));
    let rows = manager.groups()[0].page().rows();
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|row| row.get("idAgente") == Some(&agent)));
}

#[test]
fn export_without_selection_pulls_every_row() {
    let backend = MemoryBackend::demo(14, 37);
    let mut manager = manager();
    run(&mut manager, &backend, TableCommand::Init);
    let calls_before = backend.data_calls();

    let events = run(
        &mut manager,
        &backend,
        TableCommand::Export {
            scope: ExportScope::VisibleColumns,
            format: ExportFormat::Csv,
            now: fixture_datetime(),
        },
    );
    assert_eq!(backend.data_calls(), calls_before + 1);
    let [TableEvent::ExportReady(job)] = events.as_slice() else {
        panic!("expected one export job, got {events:?}");
    };
    assert_eq!(job.rows.len(), 37);
    assert!(!job.headers.contains(&"Acciones".to_owned()));
    assert!(!job.headers.contains(&"Revisado".to_owned()));
    assert_eq!(
        job.file_stem,
        "exportacion_rechazos_visibles_2025-03-14-09-30"
    );
}

#[test]
fn failed_export_fetch_notifies_error() {
    let backend = MemoryBackend::demo(15, 5);
    let mut manager = manager();
    run(&mut manager, &backend, TableCommand::Init);
    backend.set_fail_data(true);

    let events = run(
        &mut manager,
        &backend,
        TableCommand::Export {
            scope: ExportScope::AllColumns,
            format: ExportFormat::Xlsx,
            now: fixture_datetime(),
        },
    );
    assert!(matches!(
        events.as_slice(),
        [TableEvent::Notify(notice)] if notice.level == NoticeLevel::Error
    ));
    assert_eq!(manager.flat().rows().len(), 5);
}

#[test]
fn default_grouping_without_component_applies_immediately() {
    let backend = MemoryBackend::demo(16, 20);
    let mut config = TableConfig::new(demo_columns());
    config.default_group_by = Some(
        GroupOption::new("Agentes", "idAgente", "incentive-agent").with_hide_field("agente"),
    );
    let mut manager = EntityTableManager::new(config);

    let events = run(&mut manager, &backend, TableCommand::Init);
    assert!(matches!(events.first(), Some(TableEvent::GroupByChanged(Some(_)))));
    assert!(!manager.groups().is_empty());
    assert!(manager.flat().rows().is_empty());
}

#[test]
fn search_narrows_rows() {
    let backend = MemoryBackend::demo(17, 50);
    let mut manager = manager();
    run(&mut manager, &backend, TableCommand::Init);
    run(
        &mut manager,
        &backend,
        TableCommand::Search("firma".to_owned()),
    );
    let total = manager.flat().window().total_items();
    assert!(total < 50);
    assert!(manager.flat().rows().iter().all(|row| {
        row.fields()
            .values()
            .filter_map(|value| value.as_str())
            .any(|text| text.to_lowercase().contains("firma"))
    }));
}
