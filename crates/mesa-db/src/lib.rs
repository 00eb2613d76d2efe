// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

//! SQLite-backed preferences: the grouping dimension and column layout each
//! table was left in, plus a few global settings.

use anyhow::{Context, Result, anyhow, bail};
use mesa_app::{ColumnPref, ExportFormat, GroupOption, Sticky};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const APP_NAME: &str = "mesa";

const REQUIRED_SCHEMA: &[(&str, &[&str])] = &[
    ("settings", &["key", "value", "updated_at"]),
    (
        "group_by_prefs",
        &["component_id", "option_json", "updated_at"],
    ),
    (
        "column_prefs",
        &[
            "table_id",
            "position",
            "field",
            "sticky",
            "visible",
            "width",
            "updated_at",
        ],
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    LastExportFormat,
}

impl SettingKey {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LastExportFormat => "export.last_format",
        }
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let printable = path.to_string_lossy().to_string();
        validate_db_path(&printable)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create database directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open database at {}", path.display()))?;
        configure_connection(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        configure_connection(&conn)?;
        Ok(Self { conn })
    }

    pub fn raw_connection(&self) -> &Connection {
        &self.conn
    }

    pub fn bootstrap(&self) -> Result<()> {
        if has_user_tables(&self.conn)? {
            validate_schema(&self.conn)?;
        } else {
            self.conn
                .execute_batch(include_str!("sql/schema.sql"))
                .context("create schema")?;
        }
        Ok(())
    }

    pub fn get_setting_raw(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("load setting {key}"))
    }

    pub fn put_setting_raw(&self, key: &str, value: &str) -> Result<()> {
        let now = now_rfc3339()?;
        self.conn
            .execute(
                "
                INSERT INTO settings (key, value, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                  value = excluded.value,
                  updated_at = excluded.updated_at
                ",
                params![key, value, now],
            )
            .with_context(|| format!("upsert setting {key}"))?;
        Ok(())
    }

    pub fn get_last_export_format(&self) -> Result<Option<ExportFormat>> {
        let key = SettingKey::LastExportFormat;
        self.get_setting_raw(key.as_str())?
            .map(|value| {
                ExportFormat::parse(&value).ok_or_else(|| {
                    anyhow!(
                        "setting `{}` has invalid value `{value}`; export again to overwrite it",
                        key.as_str()
                    )
                })
            })
            .transpose()
    }

    pub fn put_last_export_format(&self, format: ExportFormat) -> Result<()> {
        self.put_setting_raw(SettingKey::LastExportFormat.as_str(), format.extension())
    }

    /// Last grouping chosen for `component_id`, if any.
    pub fn get_group_by(&self, component_id: &str) -> Result<Option<GroupOption>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT option_json FROM group_by_prefs WHERE component_id = ?",
                params![component_id],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("load grouping for {component_id}"))?;

        raw.map(|json| {
            serde_json::from_str(&json).with_context(|| {
                format!(
                    "saved grouping for {component_id} is unreadable; clear it with the remove-grouping key"
                )
            })
        })
        .transpose()
    }

    /// Saves `option` for `component_id`; `None` forgets the saved choice.
    pub fn put_group_by(&self, component_id: &str, option: Option<&GroupOption>) -> Result<()> {
        let Some(option) = option else {
            self.conn
                .execute(
                    "DELETE FROM group_by_prefs WHERE component_id = ?",
                    params![component_id],
                )
                .with_context(|| format!("clear grouping for {component_id}"))?;
            return Ok(());
        };

        let json = serde_json::to_string(option).context("serialize grouping option")?;
        let now = now_rfc3339()?;
        self.conn
            .execute(
                "
                INSERT INTO group_by_prefs (component_id, option_json, updated_at)
                VALUES (?, ?, ?)
                ON CONFLICT(component_id) DO UPDATE SET
                  option_json = excluded.option_json,
                  updated_at = excluded.updated_at
                ",
                params![component_id, json, now],
            )
            .with_context(|| format!("save grouping for {component_id}"))?;
        Ok(())
    }

    pub fn get_column_prefs(&self, table_id: &str) -> Result<Vec<ColumnPref>> {
        let mut stmt = self
            .conn
            .prepare(
                "
                SELECT field, sticky, visible, width
                FROM column_prefs
                WHERE table_id = ?
                ORDER BY position ASC
                ",
            )
            .context("prepare column prefs query")?;
        let rows = stmt
            .query_map(params![table_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            })
            .with_context(|| format!("query column prefs for {table_id}"))?;

        let mut prefs = Vec::new();
        for row in rows {
            let (field, sticky, visible, width) =
                row.with_context(|| format!("read column prefs for {table_id}"))?;
            let sticky = Sticky::parse(&sticky).ok_or_else(|| {
                anyhow!("column `{field}` has invalid pin `{sticky}` in saved layout")
            })?;
            let width = width
                .map(u32::try_from)
                .transpose()
                .with_context(|| format!("column `{field}` has an invalid saved width"))?;
            prefs.push(ColumnPref {
                field,
                sticky,
                visible,
                width,
            });
        }
        Ok(prefs)
    }

    /// Replaces the saved layout of `table_id` with `prefs`, in order.
    pub fn put_column_prefs(&mut self, table_id: &str, prefs: &[ColumnPref]) -> Result<()> {
        let now = now_rfc3339()?;
        let tx = self
            .conn
            .transaction()
            .context("begin column prefs transaction")?;
        tx.execute(
            "DELETE FROM column_prefs WHERE table_id = ?",
            params![table_id],
        )
        .with_context(|| format!("clear column prefs for {table_id}"))?;

        let mut seen = BTreeSet::new();
        for (position, pref) in prefs.iter().enumerate() {
            if !seen.insert(pref.field.as_str()) {
                log::warn!("duplicate column `{}` in layout for {table_id}", pref.field);
                continue;
            }
            let position = i64::try_from(position).context("column position overflow")?;
            tx.execute(
                "
                INSERT INTO column_prefs
                  (table_id, position, field, sticky, visible, width, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
                params![
                    table_id,
                    position,
                    pref.field,
                    pref.sticky.as_str(),
                    pref.visible,
                    pref.width.map(i64::from),
                    now
                ],
            )
            .with_context(|| format!("save column `{}` for {table_id}", pref.field))?;
        }
        tx.commit().context("commit column prefs")
    }

    pub fn clear_column_prefs(&self, table_id: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM column_prefs WHERE table_id = ?",
                params![table_id],
            )
            .with_context(|| format!("clear column prefs for {table_id}"))?;
        Ok(())
    }
}

pub fn default_db_path() -> Result<PathBuf> {
    if let Some(override_path) = env::var_os("MESA_DB_PATH") {
        return Ok(PathBuf::from(override_path));
    }

    let data_root = dirs::data_local_dir().ok_or_else(|| {
        anyhow!("cannot resolve data directory; set MESA_DB_PATH to a writable database path")
    })?;

    let app_dir = data_root.join(APP_NAME);
    fs::create_dir_all(&app_dir)
        .with_context(|| format!("create data directory {}", app_dir.display()))?;
    Ok(app_dir.join("mesa.db"))
}

pub fn validate_db_path(path: &str) -> Result<()> {
    if path.is_empty() {
        bail!("database path must not be empty");
    }
    if path == ":memory:" {
        return Ok(());
    }

    if let Some(index) = path.find("://")
        && index > 0
    {
        let scheme = &path[..index];
        if scheme.chars().all(char::is_alphabetic) {
            bail!(
                "database path {path:?} looks like a URI ({scheme}://); pass a filesystem path instead"
            );
        }
    }

    if path.starts_with("file:") {
        bail!("database path {path:?} uses file: URI syntax; pass a plain filesystem path");
    }

    if path.contains('?') {
        bail!(
            "database path {path:?} contains '?'; remove query parameters and use a plain file path"
        );
    }

    Ok(())
}

fn has_user_tables(conn: &Connection) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "
            SELECT COUNT(*)
            FROM sqlite_master
            WHERE type = 'table'
              AND name NOT LIKE 'sqlite_%'
            ",
            [],
            |row| row.get(0),
        )
        .context("count user tables")?;
    Ok(count > 0)
}

fn validate_schema(conn: &Connection) -> Result<()> {
    for (table, required_columns) in REQUIRED_SCHEMA {
        let columns = table_columns(conn, table)?;
        if columns.is_empty() {
            bail!(
                "database is missing table `{table}`; point storage.db_path at a mesa preferences file or a new path"
            );
        }

        let missing: Vec<&str> = required_columns
            .iter()
            .copied()
            .filter(|column| !columns.contains(*column))
            .collect();
        if !missing.is_empty() {
            bail!(
                "table `{table}` is missing columns: {}; delete the preferences file to recreate it",
                missing.join(", ")
            );
        }
    }
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<BTreeSet<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("inspect columns for {table}"))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .with_context(|| format!("query column info for {table}"))?;

    rows.collect::<rusqlite::Result<BTreeSet<_>>>()
        .with_context(|| format!("collect columns for {table}"))
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )
    .context("configure sqlite pragmas")
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("format current timestamp")
}

#[cfg(test)]
mod tests {
    use super::{SettingKey, Store};
    use anyhow::Result;
    use mesa_app::ExportFormat;

    #[test]
    fn export_format_setting_round_trips() -> Result<()> {
        let store = Store::open_memory()?;
        store.bootstrap()?;

        assert_eq!(store.get_last_export_format()?, None);
        store.put_last_export_format(ExportFormat::Csv)?;
        assert_eq!(store.get_last_export_format()?, Some(ExportFormat::Csv));
        Ok(())
    }

    #[test]
    fn invalid_export_format_is_actionable() -> Result<()> {
        let store = Store::open_memory()?;
        store.bootstrap()?;

        store.put_setting_raw(SettingKey::LastExportFormat.as_str(), "pdf")?;
        let error = store
            .get_last_export_format()
            .expect_err("unknown format should be rejected");
        assert!(error.to_string().contains("export again"));
        Ok(())
    }
}
