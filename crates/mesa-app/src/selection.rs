// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::{BTreeMap, BTreeSet};

use crate::ids::RowId;
use crate::model::Row;

/// Selection that spans every page and group of the table.
///
/// Each table instance only ever sees its own rows, so updates arrive as a
/// delta scoped to the visible ids: ids outside that scope are never touched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectionSet {
    ids: BTreeSet<RowId>,
    rows: BTreeMap<RowId, Row>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> &BTreeSet<RowId> {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: RowId) -> bool {
        self.ids.contains(&id)
    }

    /// Cached row objects for the selected ids, in id order. Ids selected
    /// before their row was ever loaded are skipped.
    pub fn rows(&self) -> Vec<Row> {
        self.ids
            .iter()
            .filter_map(|id| self.rows.get(id).cloned())
            .collect()
    }

    /// `global = (global - visible) ∪ (selected ∩ visible)`.
    ///
    /// `visible` holds the rows the reporting table currently shows; its
    /// row objects refresh the cache. Returns whether the id set changed.
    pub fn apply_selection_delta(
        &mut self,
        visible: &[(RowId, Row)],
        selected: &BTreeSet<RowId>,
    ) -> bool {
        let before = self.ids.clone();
        for (id, row) in visible {
            if selected.contains(id) {
                self.ids.insert(*id);
                self.rows.insert(*id, row.clone());
            } else {
                self.ids.remove(id);
                self.rows.remove(id);
            }
        }
        before != self.ids
    }

    /// Refreshes cached objects of already-selected ids from a freshly
    /// loaded page. Never changes membership.
    pub fn refresh_cache(&mut self, loaded: &[(RowId, Row)]) {
        for (id, row) in loaded {
            if self.ids.contains(id) {
                self.rows.insert(*id, row.clone());
            }
        }
    }

    pub fn covers(&self, visible: &[RowId]) -> bool {
        !visible.is_empty() && visible.iter().all(|id| self.ids.contains(id))
    }

    pub fn partially_covers(&self, visible: &[RowId]) -> bool {
        let hits = visible.iter().filter(|id| self.ids.contains(id)).count();
        hits > 0 && hits < visible.len()
    }
}

#[cfg(test)]
mod tests {
    use super::SelectionSet;
    use crate::{Row, RowId};
    use serde_json::json;
    use std::collections::BTreeSet;

    fn row(id: i64) -> (RowId, Row) {
        let row = Row::from_value(json!({"id": id, "nombre": format!("fila {id}")}))
            .expect("object row");
        (RowId::new(id), row)
    }

    fn ids(values: &[i64]) -> BTreeSet<RowId> {
        values.iter().copied().map(RowId::new).collect()
    }

    #[test]
    fn select_all_on_page_keeps_selection_from_other_pages() {
        let mut selection = SelectionSet::new();
        selection.apply_selection_delta(&[row(1)], &ids(&[1]));
        selection.apply_selection_delta(&[row(4)], &ids(&[4]));

        let visible = vec![row(1), row(2), row(3)];
        selection.apply_selection_delta(&visible, &ids(&[1, 2, 3]));

        assert_eq!(selection.ids(), &ids(&[1, 2, 3, 4]));
    }

    #[test]
    fn deselecting_visible_row_leaves_hidden_rows_alone() {
        let mut selection = SelectionSet::new();
        selection.apply_selection_delta(&[row(1), row(2)], &ids(&[1, 2]));
        selection.apply_selection_delta(&[row(8)], &ids(&[8]));

        let changed = selection.apply_selection_delta(&[row(1), row(2)], &ids(&[2]));

        assert!(changed);
        assert_eq!(selection.ids(), &ids(&[2, 8]));
        assert_eq!(selection.rows().len(), 2);
    }

    #[test]
    fn unchanged_delta_reports_no_change() {
        let mut selection = SelectionSet::new();
        selection.apply_selection_delta(&[row(5)], &ids(&[5]));
        assert!(!selection.apply_selection_delta(&[row(5)], &ids(&[5])));
    }

    #[test]
    fn refresh_cache_replaces_selected_rows_only() {
        let mut selection = SelectionSet::new();
        selection.apply_selection_delta(&[row(1)], &ids(&[1]));

        let updated = Row::from_value(json!({"id": 1, "nombre": "renombrada"})).expect("row");
        selection.refresh_cache(&[(RowId::new(1), updated.clone()), row(2)]);

        assert_eq!(selection.rows(), vec![updated]);
        assert!(!selection.contains(RowId::new(2)));
    }

    #[test]
    fn header_checkbox_states() {
        let mut selection = SelectionSet::new();
        let page = [RowId::new(1), RowId::new(2)];
        assert!(!selection.covers(&page));
        assert!(!selection.partially_covers(&page));

        selection.apply_selection_delta(&[row(1)], &ids(&[1]));
        assert!(selection.partially_covers(&page));

        selection.apply_selection_delta(&[row(2)], &ids(&[2]));
        assert!(selection.covers(&page));
        assert!(!selection.partially_covers(&page));
    }
}
