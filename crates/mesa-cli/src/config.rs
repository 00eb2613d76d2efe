// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use log::LevelFilter;
use mesa_app::{
    Column, DEFAULT_ENTITY_NAME, DEFAULT_ID_FIELD, DEFAULT_ITEMS_PER_PAGE, ExportStyle,
    PAGE_SIZE_CHOICES,
};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const CONFIG_VERSION: i64 = 2;
const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
const DEFAULT_TIMEOUT: &str = "30s";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub table: Table,
    #[serde(default)]
    pub export: Export,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub log: Log,
}

fn default_version() -> i64 {
    CONFIG_VERSION
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Server {
    pub base_url: Option<String>,
    pub entity: Option<String>,
    pub token: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Table {
    pub entity_name: Option<String>,
    pub component_id: Option<String>,
    pub id_field: Option<String>,
    pub items_per_page: Option<usize>,
    #[serde(default)]
    pub selection_requires: Vec<String>,
    #[serde(default)]
    pub columns: Vec<Column>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Export {
    pub directory: Option<String>,
    pub header_background: Option<String>,
    pub header_text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Storage {
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Log {
    pub level: Option<String>,
    pub file: Option<String>,
}

impl Config {
    pub fn default_path() -> Result<PathBuf> {
        if let Some(path) = env::var_os("MESA_CONFIG_PATH") {
            return Ok(PathBuf::from(path));
        }

        let config_root = dirs::config_dir().ok_or_else(|| {
            anyhow!("cannot resolve config directory; set MESA_CONFIG_PATH to the config file")
        })?;

        let app_dir = config_root.join(mesa_db::APP_NAME);
        fs::create_dir_all(&app_dir)
            .with_context(|| format!("create config directory {}", app_dir.display()))?;
        Ok(app_dir.join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default_config());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let value: toml::Value = toml::from_str(&raw)
            .with_context(|| format!("parse TOML config {}", path.display()))?;

        let version = value
            .get("version")
            .and_then(toml::Value::as_integer)
            .ok_or_else(|| {
                anyhow!(
                    "config file {} is not versioned. Add `version = 2` and put values under [server], [table], [export], [storage], and [log]",
                    path.display()
                )
            })?;

        if version != CONFIG_VERSION {
            bail!(
                "unsupported config version {} in {}; expected version = 2",
                version,
                path.display()
            );
        }

        let config: Config = value
            .try_into()
            .with_context(|| format!("decode config {}", path.display()))?;
        config.validate(path)?;
        Ok(config)
    }

    fn default_config() -> Self {
        Self {
            version: CONFIG_VERSION,
            ..Self::default()
        }
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if let Some(db_path) = &self.storage.db_path {
            mesa_db::validate_db_path(db_path)?;
        }

        if let Some(timeout) = &self.server.timeout {
            let parsed = parse_duration(timeout)?;
            if parsed <= Duration::ZERO {
                bail!(
                    "server.timeout in {} must be positive, got {}",
                    path.display(),
                    timeout
                );
            }
        }

        if let Some(items) = self.table.items_per_page
            && !PAGE_SIZE_CHOICES.contains(&items)
        {
            bail!(
                "table.items_per_page in {} must be one of {:?}, got {}",
                path.display(),
                PAGE_SIZE_CHOICES,
                items
            );
        }

        if let Some(level) = &self.log.level {
            parse_level(level)?;
        }

        for color in [&self.export.header_background, &self.export.header_text]
            .into_iter()
            .flatten()
        {
            mesa_export::parse_hex_color(color)
                .with_context(|| format!("[export] colours in {}", path.display()))?;
        }

        let mut seen = Vec::new();
        for column in &self.table.columns {
            if seen.contains(&column.field.as_str()) {
                bail!(
                    "table.columns in {} defines field {:?} twice; each column needs a unique field",
                    path.display(),
                    column.field
                );
            }
            seen.push(column.field.as_str());
        }

        Ok(())
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.storage.db_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => mesa_db::default_db_path(),
        }
    }

    pub fn base_url(&self) -> &str {
        self.server
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }

    pub fn entity(&self) -> Result<&str> {
        self.server
            .entity
            .as_deref()
            .map(str::trim)
            .filter(|entity| !entity.is_empty())
            .ok_or_else(|| {
                anyhow!("server.entity is not set -- name the REST collection, e.g. entity = \"rechazos\"")
            })
    }

    pub fn token(&self) -> Option<String> {
        self.server
            .token
            .clone()
            .filter(|token| !token.trim().is_empty())
    }

    pub fn timeout(&self) -> Result<Duration> {
        parse_duration(self.server.timeout.as_deref().unwrap_or(DEFAULT_TIMEOUT))
    }

    pub fn entity_name(&self) -> &str {
        self.table
            .entity_name
            .as_deref()
            .or(self.server.entity.as_deref())
            .unwrap_or(DEFAULT_ENTITY_NAME)
    }

    pub fn component_id(&self) -> Option<&str> {
        self.table.component_id.as_deref()
    }

    pub fn id_field(&self) -> &str {
        self.table.id_field.as_deref().unwrap_or(DEFAULT_ID_FIELD)
    }

    pub fn items_per_page(&self) -> usize {
        self.table.items_per_page.unwrap_or(DEFAULT_ITEMS_PER_PAGE)
    }

    pub fn selection_requires(&self) -> &[String] {
        &self.table.selection_requires
    }

    pub fn columns(&self) -> &[Column] {
        &self.table.columns
    }

    pub fn export_style(&self) -> ExportStyle {
        let defaults = ExportStyle::default();
        ExportStyle {
            header_background: self
                .export
                .header_background
                .clone()
                .unwrap_or(defaults.header_background),
            header_text: self
                .export
                .header_text
                .clone()
                .unwrap_or(defaults.header_text),
        }
    }

    pub fn export_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.export.directory {
            return Ok(PathBuf::from(dir));
        }
        dirs::download_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| {
                anyhow!("cannot resolve a download directory; set [export].directory in the config")
            })
    }

    pub fn log_level(&self) -> Result<LevelFilter> {
        parse_level(self.log.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL))
    }

    pub fn log_file(&self) -> Result<PathBuf> {
        if let Some(file) = &self.log.file {
            return Ok(PathBuf::from(file));
        }
        let data_root = dirs::data_local_dir().ok_or_else(|| {
            anyhow!("cannot resolve data directory; set [log].file in the config")
        })?;
        Ok(data_root
            .join(mesa_db::APP_NAME)
            .join(format!("{}.log", mesa_db::APP_NAME)))
    }

    pub fn example_config(path: &Path) -> String {
        format!(
            "# mesa config\n# Place this file at: {}\n\nversion = 2\n\n[server]\nbase_url = \"{}\"\nentity = \"rechazos\"\n# token = \"...\"\ntimeout = \"{}\"\n\n[table]\nentity_name = \"rechazos\"\ncomponent_id = \"rechazos\"\nid_field = \"{}\"\nitems_per_page = {}\n# Rows missing any of these fields cannot be selected\n# selection_requires = [\"latitud\", \"longitud\"]\n\n[[table.columns]]\nfield = \"id\"\nheader = \"Id\"\ntype = \"number\"\nsortable = true\nsticky = \"left\"\nwidth = 60\n\n[[table.columns]]\nfield = \"cliente\"\nheader = \"Cliente\"\nsortable = true\nresizable = true\n\n[[table.columns]]\nfield = \"importe\"\nheader = \"Importe\"\ntype = \"currency\"\nsortable = true\ntotalizable = true\n\n[export]\n# Optional. Default is the platform download directory\n# directory = \"/absolute/path/to/exports\"\nheader_background = \"#3f51b5\"\nheader_text = \"#ffffff\"\n\n[storage]\n# Optional. Default is platform data dir (for example ~/.local/share/mesa/mesa.db)\n# db_path = \"/absolute/path/to/mesa.db\"\n\n[log]\nlevel = \"{}\"\n# file = \"/absolute/path/to/mesa.log\"\n",
            path.display(),
            DEFAULT_BASE_URL,
            DEFAULT_TIMEOUT,
            DEFAULT_ID_FIELD,
            DEFAULT_ITEMS_PER_PAGE,
            DEFAULT_LOG_LEVEL,
        )
    }
}

fn parse_level(raw: &str) -> Result<LevelFilter> {
    LevelFilter::from_str(raw.trim()).map_err(|_| {
        anyhow!("invalid log.level {raw:?}; use one of: off, error, warn, info, debug, trace")
    })
}

fn parse_duration(raw: &str) -> Result<Duration> {
    if let Some(value) = raw.strip_suffix("ms") {
        let millis: u64 = value
            .parse()
            .with_context(|| format!("invalid timeout duration {raw:?}"))?;
        return Ok(Duration::from_millis(millis));
    }
    if let Some(value) = raw.strip_suffix('s') {
        let secs: u64 = value
            .parse()
            .with_context(|| format!("invalid timeout duration {raw:?}"))?;
        return Ok(Duration::from_secs(secs));
    }
    if let Some(value) = raw.strip_suffix('m') {
        let mins: u64 = value
            .parse()
            .with_context(|| format!("invalid timeout duration {raw:?}"))?;
        return Ok(Duration::from_secs(mins * 60));
    }

    bail!("invalid duration {raw:?}; use one of: <N>ms, <N>s, <N>m (for example 500ms or 30s)")
}
