// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod config;
mod runtime;

use anyhow::{Context, Result, bail};
use config::Config;
use mesa_app::{Backend, EntityTableManager, TableCommand, TableConfig};
use mesa_db::Store;
use runtime::TableRuntime;
use simplelog::WriteLogger;
use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEMO_SEED: u64 = 20_250_314;
const DEMO_ROWS: usize = 137;
const DEMO_COMPONENT_ID: &str = "rechazos";

fn main() {
    if let Err(error) = run() {
        log::error!("{error:#}");
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_cli_args(env::args().skip(1), Config::default_path()?)?;
    if options.show_help {
        print_help();
        return Ok(());
    }

    if options.print_config_path {
        println!("{}", options.config_path.display());
        return Ok(());
    }

    if options.print_example {
        print!("{}", Config::example_config(&options.config_path));
        return Ok(());
    }

    let config = Config::load(&options.config_path).with_context(|| {
        format!(
            "load config {}; run `mesa --print-example-config` to generate a v2 template",
            options.config_path.display()
        )
    })?;

    let db_path = if options.demo {
        PathBuf::from(":memory:")
    } else {
        config.db_path()?
    };
    if options.print_db_path {
        println!("{}", db_path.display());
        return Ok(());
    }

    init_logging(&config)?;
    log::info!("starting with config {}", options.config_path.display());

    let mut store = Store::open(&db_path).with_context(|| {
        format!(
            "open database {} -- if this path is wrong, set [storage].db_path or MESA_DB_PATH",
            db_path.display()
        )
    })?;
    store.bootstrap()?;

    let (backend, mut table) = if options.demo {
        demo_table(&config)
    } else {
        live_table(&config)?
    };
    let export_dir = config.export_dir()?;
    if options.check_only {
        return Ok(());
    }

    let table_id = table
        .component_id
        .clone()
        .unwrap_or_else(|| table.entity_name.clone());
    if let Some(component_id) = &table.component_id
        && let Some(saved) = store.get_group_by(component_id)?
    {
        table.default_group_by = Some(saved);
    }
    let prefs = store.get_column_prefs(&table_id)?;

    let component_id = table.component_id.clone();
    let mut manager = EntityTableManager::new(table);
    if !prefs.is_empty() {
        manager.dispatch(TableCommand::ApplyColumnPrefs(prefs));
    }

    let mut runtime = TableRuntime::new(backend, &mut store, table_id, component_id, export_dir);
    mesa_tui::run_app(&mut manager, &mut runtime)
}

fn table_config(config: &Config, columns: Vec<mesa_app::Column>) -> TableConfig {
    let mut table = TableConfig::new(columns);
    table.entity_name = config.entity_name().to_owned();
    table.component_id = config.component_id().map(str::to_owned);
    table.id_field = config.id_field().to_owned();
    table.items_per_page = config.items_per_page();
    table.selection_requires = config.selection_requires().to_vec();
    table.export_style = config.export_style();
    table
}

fn demo_table(config: &Config) -> (Arc<dyn Backend>, TableConfig) {
    let backend = mesa_testkit::MemoryBackend::demo(DEMO_SEED, DEMO_ROWS);
    let mut table = table_config(config, mesa_testkit::demo_columns());
    table.entity_name = "rechazos".to_owned();
    table.component_id = Some(DEMO_COMPONENT_ID.to_owned());
    table.id_field = mesa_app::DEFAULT_ID_FIELD.to_owned();
    (Arc::new(backend), table)
}

fn live_table(config: &Config) -> Result<(Arc<dyn Backend>, TableConfig)> {
    if config.columns().is_empty() {
        bail!(
            "table.columns is empty -- add [[table.columns]] entries (see `mesa --print-example-config`) or run with --demo"
        );
    }
    let client = mesa_client::Client::new(config.base_url(), config.entity()?, config.timeout()?)
        .with_context(|| "invalid [server] config; fix base_url/entity/timeout values")?
        .with_token(config.token());
    client.ping().with_context(|| {
        format!(
            "cannot query {}/{}; check the server is up and [server] is correct",
            client.base_url(),
            client.entity()
        )
    })?;
    Ok((
        Arc::new(client),
        table_config(config, config.columns().to_vec()),
    ))
}

fn init_logging(config: &Config) -> Result<()> {
    let level = config.log_level()?;
    let file = open_log_file(&config.log_file()?)?;
    WriteLogger::init(level, simplelog::Config::default(), file).context("install logger")
}

fn open_log_file(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {} -- set [log].file", path.display()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    config_path: PathBuf,
    print_config_path: bool,
    print_db_path: bool,
    demo: bool,
    print_example: bool,
    check_only: bool,
    show_help: bool,
}

fn parse_cli_args<I, S>(args: I, default_config_path: PathBuf) -> Result<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = CliOptions {
        config_path: default_config_path,
        print_config_path: false,
        print_db_path: false,
        demo: false,
        print_example: false,
        check_only: false,
        show_help: false,
    };

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a file path"))?;
                options.config_path = PathBuf::from(value.as_ref());
            }
            "--print-config-path" => {
                options.print_config_path = true;
            }
            "--print-path" => {
                options.print_db_path = true;
            }
            "--print-example-config" => {
                options.print_example = true;
            }
            "--demo" => {
                options.demo = true;
            }
            "--check" => {
                options.check_only = true;
            }
            "--help" | "-h" => {
                options.show_help = true;
            }
            unknown => {
                return Err(anyhow::anyhow!(
                    "unknown argument {unknown:?}; run with --help to see supported options"
                ));
            }
        }
    }

    Ok(options)
}

fn print_help() {
    println!("mesa - paginated, groupable entity tables in the terminal");
    println!("  --config <path>          Use a specific config path");
    println!("  --print-config-path      Print resolved config path");
    println!("  --print-path             Print resolved database path");
    println!("  --print-example-config   Print a v2 config template");
    println!("  --demo                   Browse generated rejection records (in-memory)");
    println!("  --check                  Validate config, database, and server, then exit");
    println!("  --help                   Show this help");
}

#[cfg(test)]
mod tests {
    use super::{CliOptions, demo_table, live_table, parse_cli_args, table_config};
    use crate::config::Config;
    use anyhow::Result;
    use std::path::PathBuf;

    fn default_options_path() -> PathBuf {
        PathBuf::from("/tmp/mesa-config.toml")
    }

    fn load(content: &str) -> Result<(tempfile::TempDir, Config)> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.toml");
        std::fs::write(&path, content)?;
        let config = Config::load(&path)?;
        Ok((temp, config))
    }

    #[test]
    fn parse_cli_args_defaults_to_provided_config_path() -> Result<()> {
        let options = parse_cli_args(Vec::<String>::new(), default_options_path())?;
        assert_eq!(
            options,
            CliOptions {
                config_path: default_options_path(),
                print_config_path: false,
                print_db_path: false,
                demo: false,
                print_example: false,
                check_only: false,
                show_help: false,
            }
        );
        Ok(())
    }

    #[test]
    fn parse_cli_args_sets_config_path_override() -> Result<()> {
        let options = parse_cli_args(
            vec!["--config", "/custom/config.toml"],
            default_options_path(),
        )?;
        assert_eq!(options.config_path, PathBuf::from("/custom/config.toml"));
        Ok(())
    }

    #[test]
    fn parse_cli_args_errors_for_missing_config_value() {
        let error = parse_cli_args(vec!["--config"], default_options_path())
            .expect_err("missing config value should fail");
        assert!(error.to_string().contains("--config requires a file path"));
    }

    #[test]
    fn parse_cli_args_errors_for_unknown_argument() {
        let error = parse_cli_args(vec!["--wat"], default_options_path())
            .expect_err("unknown arg should fail");
        let message = error.to_string();
        assert!(message.contains("unknown argument"));
        assert!(message.contains("--help"));
    }

    #[test]
    fn parse_cli_args_sets_flags() -> Result<()> {
        let options = parse_cli_args(
            vec!["--demo", "--print-path", "--check", "-h"],
            default_options_path(),
        )?;
        assert!(options.demo);
        assert!(options.print_db_path);
        assert!(options.check_only);
        assert!(options.show_help);
        assert!(!options.print_config_path);
        assert!(!options.print_example);
        Ok(())
    }

    #[test]
    fn table_config_follows_config_values() -> Result<()> {
        let (_temp, config) = load(
            "version = 2\n[table]\nentity_name = \"Incidencias\"\ncomponent_id = \"inc\"\nid_field = \"codigo\"\nitems_per_page = 50\nselection_requires = [\"activo\"]\n[export]\nheader_text = \"#000000\"\n",
        )?;
        let table = table_config(&config, Vec::new());
        assert_eq!(table.entity_name, "Incidencias");
        assert_eq!(table.component_id.as_deref(), Some("inc"));
        assert_eq!(table.id_field, "codigo");
        assert_eq!(table.items_per_page, 50);
        assert_eq!(table.selection_requires, vec!["activo".to_owned()]);
        assert_eq!(table.export_style.header_text, "#000000");
        Ok(())
    }

    #[test]
    fn demo_table_uses_generated_columns() -> Result<()> {
        let (_temp, config) = load("version = 2\n")?;
        let (_backend, table) = demo_table(&config);
        assert_eq!(table.component_id.as_deref(), Some("rechazos"));
        assert!(table.columns.iter().any(|column| column.field == "importe"));
        Ok(())
    }

    #[test]
    fn live_table_requires_columns() -> Result<()> {
        let (_temp, config) = load("version = 2\n[server]\nentity = \"rechazos\"\n")?;
        let error = match live_table(&config) {
            Ok(_) => panic!("config without columns should fail"),
            Err(error) => error,
        };
        assert!(error.to_string().contains("[[table.columns]]"));
        Ok(())
    }
}
