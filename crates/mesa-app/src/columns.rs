// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{Column, ColumnType, Row, Sticky};

/// Width reserved at the right edge for the column-chooser control.
pub const CONTROL_SLOT_WIDTH: u32 = 40;
pub const MIN_RESIZE_WIDTH: u32 = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnChange {
    Pinned { field: String, sticky: Sticky },
    Visibility { field: String, visible: bool },
    Order(Vec<String>),
    Resized { field: String, width: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    pub field: String,
    pub width: u32,
    pub sticky: Sticky,
    /// Distance from the pinned edge. `None` for unpinned columns.
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GridLayout {
    pub columns: Vec<ColumnLayout>,
}

impl GridLayout {
    pub fn get(&self, field: &str) -> Option<&ColumnLayout> {
        self.columns.iter().find(|column| column.field == field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPref {
    pub field: String,
    pub sticky: Sticky,
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
}

/// Ordered column descriptors plus the derived sticky layout.
///
/// Pinned columns are always contiguous: every left-pinned column precedes
/// every unpinned one, which precedes every right-pinned one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnSet {
    columns: Vec<Column>,
    measured: BTreeMap<String, u32>,
    layout: Option<GridLayout>,
    layout_scheduled: bool,
}

impl ColumnSet {
    pub fn new(columns: Vec<Column>) -> Self {
        let mut columns = columns;
        for column in &mut columns {
            column.fill_defaults();
        }
        let mut set = Self {
            columns: partition_by_sticky(columns),
            measured: BTreeMap::new(),
            layout: None,
            layout_scheduled: true,
        };
        set.layout();
        set
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn get(&self, field: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.field == field)
    }

    pub fn position(&self, field: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.field == field)
    }

    pub fn visible(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|column| column.is_visible())
    }

    #[cfg(test)]
    fn visible_fields(&self) -> Vec<String> {
        self.visible().map(|column| column.field.clone()).collect()
    }

    pub fn order(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| column.field.clone())
            .collect()
    }

    /// Sets the pin state and moves the column to the end of its new block.
    pub fn pin(&mut self, field: &str, sticky: Sticky) -> Vec<ColumnChange> {
        let Some(index) = self.position(field) else {
            return Vec::new();
        };
        if !self.columns[index].is_pinable() && sticky != Sticky::None {
            return Vec::new();
        }
        if self.columns[index].sticky == sticky {
            return Vec::new();
        }

        let mut column = self.columns.remove(index);
        column.sticky = sticky;
        let left = self.count_sticky(Sticky::Left);
        let unpinned = self.count_sticky(Sticky::None);
        let target = match sticky {
            Sticky::Left => left,
            Sticky::None => left + unpinned,
            Sticky::Right => self.columns.len(),
        };
        self.columns.insert(target, column);
        self.schedule_layout();

        vec![
            ColumnChange::Pinned {
                field: field.to_owned(),
                sticky,
            },
            ColumnChange::Order(self.order()),
        ]
    }

    /// Header pin button: unpinned goes left, any pinned state unpins.
    pub fn toggle_pin(&mut self, field: &str) -> Vec<ColumnChange> {
        let Some(column) = self.get(field) else {
            return Vec::new();
        };
        let next = match column.sticky {
            Sticky::None => Sticky::Left,
            Sticky::Left | Sticky::Right => Sticky::None,
        };
        self.pin(field, next)
    }

    pub fn toggle_visibility(&mut self, field: &str) -> Vec<ColumnChange> {
        let Some(index) = self.position(field) else {
            return Vec::new();
        };
        let visible = !self.columns[index].is_visible();
        self.set_visibility_at(index, visible).into_iter().collect()
    }

    pub fn set_all_visible(&mut self, visible: bool) -> Vec<ColumnChange> {
        (0..self.columns.len())
            .filter_map(|index| self.set_visibility_at(index, visible))
            .collect()
    }

    fn set_visibility_at(&mut self, index: usize, visible: bool) -> Option<ColumnChange> {
        let column = &mut self.columns[index];
        if !column.is_hideable() || column.is_visible() == visible {
            return None;
        }
        column.visible = Some(visible);
        let change = ColumnChange::Visibility {
            field: column.field.clone(),
            visible,
        };
        self.schedule_layout();
        Some(change)
    }

    /// Drag-and-drop is allowed within one pin block; two unpinned columns
    /// may always swap.
    pub fn can_reorder(&self, dragged: &str, target: &str) -> bool {
        match (self.get(dragged), self.get(target)) {
            (Some(dragged), Some(target)) => dragged.sticky == target.sticky,
            _ => false,
        }
    }

    /// Removes the dragged column and inserts it at the target's index.
    /// Drops across pin blocks leave the order untouched.
    pub fn reorder(&mut self, dragged: &str, target: &str) -> Vec<ColumnChange> {
        if dragged == target || !self.can_reorder(dragged, target) {
            return Vec::new();
        }
        let (Some(from), Some(to)) = (self.position(dragged), self.position(target)) else {
            return Vec::new();
        };
        let column = self.columns.remove(from);
        self.columns.insert(to, column);
        self.schedule_layout();
        vec![ColumnChange::Order(self.order())]
    }

    /// Moves a column one slot left (`-1`) or right (`1`) inside its pin block.
    pub fn shift(&mut self, field: &str, delta: isize) -> Vec<ColumnChange> {
        let Some(index) = self.position(field) else {
            return Vec::new();
        };
        let target = index as isize + delta;
        if target < 0 || target as usize >= self.columns.len() {
            return Vec::new();
        }
        let target_field = self.columns[target as usize].field.clone();
        self.reorder(field, &target_field)
    }

    /// Sets an explicit width, clamped to `[min_width or 50, max_width]`.
    /// Non-resizable columns refuse.
    pub fn resize(&mut self, field: &str, width: u32) -> Vec<ColumnChange> {
        let Some(index) = self.position(field) else {
            return Vec::new();
        };
        let column = &mut self.columns[index];
        if !column.is_resizable() || !column.is_visible() {
            return Vec::new();
        }
        let min = column.min_width.unwrap_or(MIN_RESIZE_WIDTH);
        let max = column.max_width.unwrap_or(u32::MAX).max(min);
        let width = width.clamp(min, max);
        column.width = Some(width);
        self.measured.remove(field);
        self.schedule_layout();
        vec![ColumnChange::Resized {
            field: field.to_owned(),
            width,
        }]
    }

    /// Records a rendered width. Zero means the column has not been laid
    /// out yet.
    pub fn measure(&mut self, field: &str, width: u32) {
        if self.measured.get(field) != Some(&width) {
            self.measured.insert(field.to_owned(), width);
            self.schedule_layout();
        }
    }

    /// Rendered width when known, else declared width, else min width, else
    /// a per-type default.
    pub fn resolved_width(&self, column: &Column) -> u32 {
        if let Some(width) = self.measured.get(&column.field).copied()
            && width > 0
        {
            return width;
        }
        column
            .width
            .filter(|width| *width > 0)
            .or(column.min_width.filter(|width| *width > 0))
            .unwrap_or_else(|| column.kind.default_width())
    }

    fn sticky_left_offset(&self, index: usize) -> u32 {
        self.columns
            .iter()
            .take(index)
            .filter(|column| column.is_visible() && column.sticky == Sticky::Left)
            .map(|column| self.resolved_width(column))
            .sum()
    }

    fn sticky_right_offset(&self, index: usize) -> u32 {
        CONTROL_SLOT_WIDTH
            + self
                .columns
                .iter()
                .skip(index + 1)
                .filter(|column| column.is_visible() && column.sticky == Sticky::Right)
                .map(|column| self.resolved_width(column))
                .sum::<u32>()
    }

    pub fn schedule_layout(&mut self) {
        self.layout_scheduled = true;
    }

    #[cfg(test)]
    fn is_layout_scheduled(&self) -> bool {
        self.layout_scheduled
    }

    /// Recomputes the sticky layout when scheduled. If any visible column
    /// reports a zero rendered width the recompute is skipped, the previous
    /// layout is kept and the schedule stays pending.
    pub fn layout(&mut self) -> Option<&GridLayout> {
        if self.layout_scheduled {
            let unmeasured = self
                .visible()
                .any(|column| self.measured.get(&column.field) == Some(&0));
            if !unmeasured {
                self.layout = Some(self.compute_layout());
                self.layout_scheduled = false;
            }
        }
        self.layout.as_ref()
    }

    fn compute_layout(&self) -> GridLayout {
        let columns = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, column)| column.is_visible())
            .map(|(index, column)| ColumnLayout {
                field: column.field.clone(),
                width: self.resolved_width(column),
                sticky: column.sticky,
                offset: match column.sticky {
                    Sticky::Left => Some(self.sticky_left_offset(index)),
                    Sticky::Right => Some(self.sticky_right_offset(index)),
                    Sticky::None => None,
                },
            })
            .collect();
        GridLayout { columns }
    }

    pub fn totals(&self, rows: &[Row]) -> Vec<(String, f64)> {
        self.visible()
            .filter(|column| {
                column.totalizable
                    && matches!(column.kind, ColumnType::Number | ColumnType::Currency)
            })
            .map(|column| {
                let sum = rows
                    .iter()
                    .filter_map(|row| row.get(&column.field))
                    .filter_map(crate::format::numeric_value)
                    .sum();
                (column.field.clone(), sum)
            })
            .collect()
    }

    pub fn prefs(&self) -> Vec<ColumnPref> {
        self.columns
            .iter()
            .map(|column| ColumnPref {
                field: column.field.clone(),
                sticky: column.sticky,
                visible: column.is_visible(),
                width: column.width,
            })
            .collect()
    }

    /// Restores saved order, pins, visibility and widths. Unknown fields in
    /// `prefs` are ignored; columns missing from `prefs` keep their relative
    /// order after the known ones.
    pub fn apply_prefs(&mut self, prefs: &[ColumnPref]) {
        let mut remaining = std::mem::take(&mut self.columns);
        let mut ordered = Vec::with_capacity(remaining.len());
        for pref in prefs {
            let Some(index) = remaining.iter().position(|column| column.field == pref.field)
            else {
                continue;
            };
            let mut column = remaining.remove(index);
            if column.is_pinable() || pref.sticky == Sticky::None {
                column.sticky = pref.sticky;
            }
            if column.is_hideable() {
                column.visible = Some(pref.visible);
            }
            if column.is_resizable()
                && let Some(width) = pref.width
            {
                column.width = Some(width);
            }
            ordered.push(column);
        }
        ordered.extend(remaining);
        self.columns = partition_by_sticky(ordered);
        self.schedule_layout();
    }

    fn count_sticky(&self, sticky: Sticky) -> usize {
        self.columns
            .iter()
            .filter(|column| column.sticky == sticky)
            .count()
    }
}

fn partition_by_sticky(columns: Vec<Column>) -> Vec<Column> {
    let mut left = Vec::new();
    let mut unpinned = Vec::new();
    let mut right = Vec::new();
    for column in columns {
        match column.sticky {
            Sticky::Left => left.push(column),
            Sticky::None => unpinned.push(column),
            Sticky::Right => right.push(column),
        }
    }
    left.extend(unpinned);
    left.extend(right);
    left
}

#[cfg(test)]
mod tests {
    use super::{CONTROL_SLOT_WIDTH, ColumnChange, ColumnPref, ColumnSet};
    use crate::{Column, ColumnType, Row, Sticky};
    use serde_json::json;

    fn text(field: &str) -> Column {
        Column::new(field, field.to_uppercase(), ColumnType::Text)
    }

    fn fields(set: &ColumnSet) -> Vec<&str> {
        set.columns()
            .iter()
            .map(|column| column.field.as_str())
            .collect()
    }

    #[test]
    fn construction_partitions_pin_blocks() {
        let set = ColumnSet::new(vec![
            text("a"),
            text("b").with_sticky(Sticky::Right),
            text("c").with_sticky(Sticky::Left),
            text("d"),
        ]);
        assert_eq!(fields(&set), vec!["c", "a", "d", "b"]);
    }

    #[test]
    fn pinning_left_moves_column_next_to_existing_left_block() {
        let mut set = ColumnSet::new(vec![
            text("a").with_sticky(Sticky::Left).with_width(100),
            text("b"),
            text("c").with_width(80),
        ]);

        let changes = set.pin("c", Sticky::Left);

        assert_eq!(fields(&set), vec!["a", "c", "b"]);
        assert_eq!(
            changes,
            vec![
                ColumnChange::Pinned {
                    field: "c".to_owned(),
                    sticky: Sticky::Left,
                },
                ColumnChange::Order(vec!["a".to_owned(), "c".to_owned(), "b".to_owned()]),
            ]
        );
        let layout = set.layout().expect("layout computed");
        assert_eq!(layout.get("a").and_then(|column| column.offset), Some(0));
        assert_eq!(layout.get("c").and_then(|column| column.offset), Some(100));
        assert_eq!(layout.get("b").and_then(|column| column.offset), None);
    }

    #[test]
    fn pinning_right_and_unpinning_keep_blocks_contiguous() {
        let mut set = ColumnSet::new(vec![
            text("a").with_sticky(Sticky::Left),
            text("b"),
            text("c"),
            text("d").with_sticky(Sticky::Right),
        ]);

        set.pin("b", Sticky::Right);
        assert_eq!(fields(&set), vec!["a", "c", "d", "b"]);

        set.pin("a", Sticky::None);
        assert_eq!(fields(&set), vec!["c", "a", "d", "b"]);
    }

    #[test]
    fn toggle_pin_cycles_between_left_and_none() {
        let mut set = ColumnSet::new(vec![text("a"), text("b").with_sticky(Sticky::Right)]);

        set.toggle_pin("a");
        assert_eq!(set.get("a").map(|column| column.sticky), Some(Sticky::Left));
        set.toggle_pin("a");
        assert_eq!(set.get("a").map(|column| column.sticky), Some(Sticky::None));
        set.toggle_pin("b");
        assert_eq!(set.get("b").map(|column| column.sticky), Some(Sticky::None));
    }

    #[test]
    fn actions_and_non_pinable_columns_refuse_pinning() {
        let mut set = ColumnSet::new(vec![
            Column::new("acciones", "", ColumnType::Actions),
            text("fijo").with_pinable(false),
        ]);
        assert!(set.pin("acciones", Sticky::Left).is_empty());
        assert!(set.toggle_pin("fijo").is_empty());
    }

    #[test]
    fn drop_across_pin_blocks_is_ignored() {
        let mut set = ColumnSet::new(vec![
            text("a").with_sticky(Sticky::Left),
            text("b"),
            text("c"),
        ]);
        assert!(!set.can_reorder("b", "a"));
        assert!(set.reorder("b", "a").is_empty());
        assert_eq!(fields(&set), vec!["a", "b", "c"]);
    }

    #[test]
    fn drop_within_block_splices_to_target_index() {
        let mut set = ColumnSet::new(vec![text("a"), text("b"), text("c"), text("d")]);
        let changes = set.reorder("a", "c");
        assert_eq!(fields(&set), vec!["b", "c", "a", "d"]);
        assert_eq!(changes.len(), 1);

        set.reorder("d", "b");
        assert_eq!(fields(&set), vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn shift_stops_at_pin_boundary() {
        let mut set = ColumnSet::new(vec![text("a").with_sticky(Sticky::Left), text("b")]);
        assert!(set.shift("b", -1).is_empty());
        assert!(set.shift("b", 1).is_empty());
        assert_eq!(fields(&set), vec!["a", "b"]);
    }

    #[test]
    fn only_hideable_columns_toggle_visibility() {
        let mut set = ColumnSet::new(vec![text("a").with_hideable(false), text("b")]);
        assert!(set.toggle_visibility("a").is_empty());
        assert_eq!(
            set.toggle_visibility("b"),
            vec![ColumnChange::Visibility {
                field: "b".to_owned(),
                visible: false,
            }]
        );
        assert_eq!(set.visible_fields(), vec!["a".to_owned()]);

        let restored = set.set_all_visible(true);
        assert_eq!(restored.len(), 1);
        assert_eq!(set.visible_fields().len(), 2);
    }

    #[test]
    fn resize_clamps_to_bounds_and_requires_flag() {
        let mut set = ColumnSet::new(vec![
            text("a").with_resizable(true).with_min_width(70).with_max_width(200),
            text("b"),
            text("c").with_resizable(true),
        ]);

        set.resize("a", 10);
        assert_eq!(set.get("a").and_then(|column| column.width), Some(70));
        set.resize("a", 900);
        assert_eq!(set.get("a").and_then(|column| column.width), Some(200));
        assert!(set.resize("b", 300).is_empty());
        set.resize("c", 20);
        assert_eq!(set.get("c").and_then(|column| column.width), Some(50));
    }

    #[test]
    fn resolved_width_precedence() {
        let mut set = ColumnSet::new(vec![
            text("a").with_width(90).with_min_width(60),
            text("b").with_min_width(60),
            Column::new("c", "C", ColumnType::Date),
            Column::new("d", "D", ColumnType::Checkbox),
        ]);
        set.measure("a", 133);
        let widths = set
            .columns()
            .iter()
            .map(|column| set.resolved_width(column))
            .collect::<Vec<_>>();
        assert_eq!(widths, vec![133, 60, 120, 50]);
    }

    #[test]
    fn right_offsets_include_control_slot() {
        let mut set = ColumnSet::new(vec![
            text("a"),
            text("b").with_sticky(Sticky::Right).with_width(70),
            text("c").with_sticky(Sticky::Right).with_width(90),
        ]);
        let layout = set.layout().expect("layout");
        assert_eq!(
            layout.get("b").and_then(|column| column.offset),
            Some(CONTROL_SLOT_WIDTH + 90)
        );
        assert_eq!(
            layout.get("c").and_then(|column| column.offset),
            Some(CONTROL_SLOT_WIDTH)
        );
    }

    #[test]
    fn hidden_columns_do_not_contribute_offsets() {
        let mut set = ColumnSet::new(vec![
            text("a").with_sticky(Sticky::Left).with_width(100),
            text("b").with_sticky(Sticky::Left).with_width(60),
            text("c").with_sticky(Sticky::Left).with_width(80),
        ]);
        set.toggle_visibility("b");
        let layout = set.layout().expect("layout");
        assert_eq!(layout.get("c").and_then(|column| column.offset), Some(100));
        assert!(layout.get("b").is_none());
    }

    #[test]
    fn layout_waits_for_unmeasured_columns() {
        let mut set = ColumnSet::new(vec![
            text("a").with_sticky(Sticky::Left).with_width(100),
            text("b").with_sticky(Sticky::Left),
        ]);
        assert!(!set.is_layout_scheduled());

        set.measure("a", 0);
        set.pin("b", Sticky::None);
        let stale = set.layout().cloned().expect("previous layout kept");
        assert_eq!(stale.get("b").map(|column| column.sticky), Some(Sticky::Left));
        assert!(set.is_layout_scheduled());

        set.measure("a", 100);
        let fresh = set.layout().expect("layout recomputed");
        assert_eq!(fresh.get("b").map(|column| column.sticky), Some(Sticky::None));
        assert!(!set.is_layout_scheduled());
    }

    #[test]
    fn totals_sum_totalizable_numeric_columns() {
        let set = ColumnSet::new(vec![
            Column::new("importe", "Importe", ColumnType::Currency).with_totalizable(true),
            Column::new("unidades", "Unidades", ColumnType::Number),
            text("nombre").with_totalizable(true),
        ]);
        let rows = vec![
            Row::from_value(json!({"importe": 10.5, "unidades": 1})).expect("row"),
            Row::from_value(json!({"importe": "4.5", "unidades": 2})).expect("row"),
        ];
        assert_eq!(set.totals(&rows), vec![("importe".to_owned(), 15.0)]);
    }

    #[test]
    fn prefs_restore_order_pins_and_visibility() {
        let mut set = ColumnSet::new(vec![
            text("a"),
            text("b").with_resizable(true),
            text("c"),
            text("nuevo"),
        ]);
        set.apply_prefs(&[
            ColumnPref {
                field: "c".to_owned(),
                sticky: Sticky::None,
                visible: false,
                width: None,
            },
            ColumnPref {
                field: "b".to_owned(),
                sticky: Sticky::Left,
                visible: true,
                width: Some(210),
            },
            ColumnPref {
                field: "gone".to_owned(),
                sticky: Sticky::Right,
                visible: true,
                width: None,
            },
            ColumnPref {
                field: "a".to_owned(),
                sticky: Sticky::None,
                visible: true,
                width: None,
            },
        ]);
        assert_eq!(fields(&set), vec!["b", "c", "a", "nuevo"]);
        assert_eq!(set.get("b").and_then(|column| column.width), Some(210));
        assert_eq!(set.visible_fields(), vec!["b", "a", "nuevo"]);
        assert_eq!(set.prefs()[0].sticky, Sticky::Left);
    }
}
