// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use time::OffsetDateTime;
use time::macros::format_description;

use crate::columns::ColumnSet;
use crate::format::format_cell;
use crate::model::{Column, ExportFormat, ExportScope, Row};

/// Page size used to pull every matching row in one request when nothing is
/// selected.
pub const EXPORT_PAGE_SIZE: usize = 999_999;
pub const DEFAULT_ENTITY_NAME: &str = "datos";
pub const DEFAULT_HEADER_BACKGROUND: &str = "#3f51b5";
pub const DEFAULT_HEADER_TEXT: &str = "#ffffff";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportStyle {
    pub header_background: String,
    pub header_text: String,
}

impl Default for ExportStyle {
    fn default() -> Self {
        Self {
            header_background: DEFAULT_HEADER_BACKGROUND.to_owned(),
            header_text: DEFAULT_HEADER_TEXT.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportJob {
    pub file_stem: String,
    pub format: ExportFormat,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub style: ExportStyle,
}

impl ExportJob {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.file_stem, self.format.extension())
    }
}

/// Data columns for `scope`, never the checkbox, actions, or image columns.
pub fn export_columns(columns: &ColumnSet, scope: ExportScope) -> Vec<Column> {
    columns
        .columns()
        .iter()
        .filter(|column| !column.kind.is_structural())
        .filter(|column| scope == ExportScope::AllColumns || column.is_visible())
        .cloned()
        .collect()
}

/// `exportacion_<entity>_<completa|visibles>_<YYYY-MM-DD-HH-MM>`.
pub fn file_stem(entity_name: &str, scope: ExportScope, now: OffsetDateTime) -> String {
    let entity = entity_name
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase();
    let entity = if entity.is_empty() {
        DEFAULT_ENTITY_NAME.to_owned()
    } else {
        entity
    };
    let stamp = now
        .format(format_description!(
            "[year]-[month]-[day]-[hour]-[minute]"
        ))
        .unwrap_or_default();
    format!("exportacion_{entity}_{}_{stamp}", scope.file_label())
}

pub struct ExportPlan<'a> {
    pub entity_name: &'a str,
    pub scope: ExportScope,
    pub format: ExportFormat,
    pub now: OffsetDateTime,
    pub style: &'a ExportStyle,
}

impl ExportPlan<'_> {
    pub fn build(&self, columns: &[Column], rows: &[Row]) -> ExportJob {
        let headers = columns.iter().map(|column| column.header.clone()).collect();
        let rows = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|column| format_cell(column, row.get(&column.field)))
                    .collect()
            })
            .collect();
        ExportJob {
            file_stem: file_stem(self.entity_name, self.scope, self.now),
            format: self.format,
            headers,
            rows,
            style: self.style.clone(),
        }
    }
}
