// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

//! Writes prepared [`ExportJob`]s to disk as XLSX, CSV, or JSON.

use anyhow::{Context, Result, bail};
use mesa_app::{ExportFormat, ExportJob, ExportStyle};
use rust_xlsxwriter::{Color, Format, FormatBorder, Workbook};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const CSV_DELIMITER: u8 = b';';
const SHEET_NAME: &str = "Datos";
const MIN_COLUMN_WIDTH: usize = 8;
const MAX_COLUMN_WIDTH: usize = 60;

/// Writes `job` into `dir` and returns the path of the new file.
pub fn write_export(job: &ExportJob, dir: &Path) -> Result<PathBuf> {
    if job.headers.is_empty() {
        bail!("export has no columns -- show at least one data column");
    }
    fs::create_dir_all(dir)
        .with_context(|| format!("create export directory {}", dir.display()))?;

    let path = dir.join(job.file_name());
    match job.format {
        ExportFormat::Xlsx => write_xlsx(job, &path)?,
        ExportFormat::Csv => write_csv(job, &path)?,
        ExportFormat::Json => write_json(job, &path)?,
    }
    log::info!(
        "exported {} rows x {} columns to {}",
        job.rows.len(),
        job.headers.len(),
        path.display()
    );
    Ok(path)
}

fn write_xlsx(job: &ExportJob, path: &Path) -> Result<()> {
    let header = header_format(&job.style)?;
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME).context("name worksheet")?;

    for (col, title) in job.headers.iter().enumerate() {
        let col = sheet_column(col)?;
        sheet
            .write_string_with_format(0, col, title, &header)
            .with_context(|| format!("write header {title:?}"))?;
    }
    for (index, cells) in job.rows.iter().enumerate() {
        let row = u32::try_from(index + 1).context("too many rows for a worksheet")?;
        for (col, value) in cells.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            sheet
                .write_string(row, sheet_column(col)?, value)
                .with_context(|| format!("write cell {row}:{col}"))?;
        }
    }
    for (col, width) in column_widths(job).into_iter().enumerate() {
        sheet
            .set_column_width(sheet_column(col)?, width as f64)
            .context("size column")?;
    }
    sheet.set_freeze_panes(1, 0).context("freeze header row")?;

    workbook
        .save(path)
        .with_context(|| format!("save workbook {}", path.display()))
}

fn header_format(style: &ExportStyle) -> Result<Format> {
    let background = parse_hex_color(&style.header_background)
        .context("export.header_background")?;
    let text = parse_hex_color(&style.header_text).context("export.header_text")?;
    Ok(Format::new()
        .set_bold()
        .set_background_color(Color::RGB(background))
        .set_font_color(Color::RGB(text))
        .set_border(FormatBorder::Thin))
}

fn sheet_column(index: usize) -> Result<u16> {
    u16::try_from(index).context("too many columns for a worksheet")
}

/// Character widths that fit the longest cell of each column.
fn column_widths(job: &ExportJob) -> Vec<usize> {
    job.headers
        .iter()
        .enumerate()
        .map(|(col, title)| {
            job.rows
                .iter()
                .filter_map(|cells| cells.get(col))
                .map(|value| value.chars().count())
                .chain(std::iter::once(title.chars().count()))
                .max()
                .unwrap_or(0)
                .saturating_add(2)
                .clamp(MIN_COLUMN_WIDTH, MAX_COLUMN_WIDTH)
        })
        .collect()
}

/// Parses `#rrggbb` or `rrggbb`.
pub fn parse_hex_color(value: &str) -> Result<u32> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid color {value:?} -- use a hex value like \"#3f51b5\"");
    }
    u32::from_str_radix(hex, 16).with_context(|| format!("invalid color {value:?}"))
}

// Spreadsheet apps in Spanish locales expect ';' and need the BOM to pick UTF-8.
fn write_csv(job: &ExportJob, path: &Path) -> Result<()> {
    let mut file = BufWriter::new(
        File::create(path).with_context(|| format!("create {}", path.display()))?,
    );
    file.write_all(UTF8_BOM).context("write byte order mark")?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(CSV_DELIMITER)
        .from_writer(file);
    writer
        .write_record(&job.headers)
        .context("write CSV header")?;
    for cells in &job.rows {
        writer.write_record(cells).context("write CSV row")?;
    }
    writer
        .flush()
        .with_context(|| format!("flush {}", path.display()))
}

fn write_json(job: &ExportJob, path: &Path) -> Result<()> {
    let records: Vec<Value> = job
        .rows
        .iter()
        .map(|cells| {
            let record: Map<String, Value> = job
                .headers
                .iter()
                .zip(cells)
                .map(|(title, value)| (title.clone(), Value::String(value.clone())))
                .collect();
            Value::Object(record)
        })
        .collect();

    let file = BufWriter::new(
        File::create(path).with_context(|| format!("create {}", path.display()))?,
    );
    serde_json::to_writer_pretty(file, &records)
        .with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::{column_widths, parse_hex_color};
    use mesa_app::{ExportFormat, ExportJob, ExportStyle};

    #[test]
    fn parses_hex_colors() {
        assert_eq!(parse_hex_color("#3f51b5").expect("color"), 0x3f51b5);
        assert_eq!(parse_hex_color("FFFFFF").expect("color"), 0xffffff);
        let error = parse_hex_color("indigo").expect_err("named colors are rejected");
        assert!(error.to_string().contains("#3f51b5"));
    }

    #[test]
    fn widths_fit_longest_cell_within_bounds() {
        let job = ExportJob {
            file_stem: "x".to_owned(),
            format: ExportFormat::Xlsx,
            headers: vec!["Id".to_owned(), "Motivo".to_owned()],
            rows: vec![vec!["1".to_owned(), "x".repeat(100)]],
            style: ExportStyle::default(),
        };
        assert_eq!(column_widths(&job), vec![8, 60]);
    }
}
