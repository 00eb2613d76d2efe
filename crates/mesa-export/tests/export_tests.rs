// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::Result;
use mesa_app::{ExportFormat, ExportJob, ExportStyle};
use mesa_export::write_export;
use serde_json::Value;
use std::fs;

fn job(format: ExportFormat) -> ExportJob {
    ExportJob {
        file_stem: "exportacion_rechazos_visibles_2025-03-14-09-30".to_owned(),
        format,
        headers: vec!["Cliente".to_owned(), "Importe".to_owned()],
        rows: vec![
            vec!["Acme; S.A.".to_owned(), "1.234,50 €".to_owned()],
            vec!["Pérez".to_owned(), String::new()],
        ],
        style: ExportStyle::default(),
    }
}

#[test]
fn csv_has_bom_and_semicolons() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_export(&job(ExportFormat::Csv), dir.path())?;
    assert_eq!(
        path.file_name().and_then(|name| name.to_str()),
        Some("exportacion_rechazos_visibles_2025-03-14-09-30.csv")
    );

    let bytes = fs::read(&path)?;
    assert!(bytes.starts_with(b"\xEF\xBB\xBF"));
    let text = String::from_utf8(bytes[3..].to_vec())?;
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines[0], "Cliente;Importe");
    assert_eq!(lines[1], "\"Acme; S.A.\";1.234,50 €");
    assert_eq!(lines[2], "Pérez;");
    Ok(())
}

#[test]
fn json_is_an_array_of_records() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_export(&job(ExportFormat::Json), dir.path())?;
    let parsed: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    let records = parsed.as_array().expect("array");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["Cliente"], "Acme; S.A.");
    assert_eq!(records[1]["Importe"], "");
    Ok(())
}

#[test]
fn xlsx_is_a_zip_container() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let nested = dir.path().join("exports");
    let path = write_export(&job(ExportFormat::Xlsx), &nested)?;
    assert!(path.starts_with(&nested));
    let bytes = fs::read(&path)?;
    assert!(bytes.starts_with(b"PK"));
    Ok(())
}

#[test]
fn bad_header_color_is_reported() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut job = job(ExportFormat::Xlsx);
    job.style.header_background = "blue".to_owned();
    let error = write_export(&job, dir.path()).expect_err("named color should fail");
    assert!(format!("{error:#}").contains("export.header_background"));
    Ok(())
}

#[test]
fn empty_headers_are_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut job = job(ExportFormat::Csv);
    job.headers.clear();
    let error = write_export(&job, dir.path()).expect_err("no columns should fail");
    assert!(error.to_string().contains("no columns"));
    Ok(())
}
