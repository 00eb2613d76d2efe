// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result};
use mesa_app::{
    Backend, ColumnPref, ExportFormat, ExportJob, FetchOutcome, FetchRequest, GroupOption,
    ServiceCall,
};
use mesa_db::Store;
use mesa_tui::InternalEvent;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread;

/// Runs backend calls on worker threads and persists preferences and
/// exports through the local store.
pub struct TableRuntime<'a> {
    backend: Arc<dyn Backend>,
    store: &'a mut Store,
    table_id: String,
    component_id: Option<String>,
    export_dir: PathBuf,
}

impl<'a> TableRuntime<'a> {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: &'a mut Store,
        table_id: impl Into<String>,
        component_id: Option<String>,
        export_dir: PathBuf,
    ) -> Self {
        Self {
            backend,
            store,
            table_id: table_id.into(),
            component_id,
            export_dir,
        }
    }
}

impl mesa_tui::AppRuntime for TableRuntime<'_> {
    fn execute(&mut self, call: &ServiceCall) -> FetchOutcome {
        call.execute(self.backend.as_ref())
    }

    fn spawn_fetch(&mut self, request: FetchRequest, tx: Sender<InternalEvent>) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        thread::Builder::new()
            .name(format!("mesa-fetch-{}", request.token.get()))
            .spawn(move || {
                let outcome = request.call.execute(backend.as_ref());
                // The UI may already be gone; nothing left to deliver to.
                let _ = tx.send(InternalEvent::Fetched {
                    token: request.token,
                    outcome,
                });
            })
            .context("spawn fetch worker")?;
        Ok(())
    }

    fn save_export(&mut self, job: &ExportJob) -> Result<PathBuf> {
        let path = mesa_export::write_export(job, &self.export_dir).with_context(|| {
            format!(
                "write export to {} -- check [export].directory",
                self.export_dir.display()
            )
        })?;
        if let Err(error) = self.store.put_last_export_format(job.format) {
            log::warn!("remember export format: {error:#}");
        }
        Ok(path)
    }

    fn save_group_by(&mut self, option: Option<&GroupOption>) -> Result<()> {
        match &self.component_id {
            Some(component_id) => self.store.put_group_by(component_id, option),
            None => Ok(()),
        }
    }

    fn save_column_prefs(&mut self, prefs: &[ColumnPref]) -> Result<()> {
        self.store.put_column_prefs(&self.table_id, prefs)
    }

    fn preferred_export_format(&mut self) -> ExportFormat {
        match self.store.get_last_export_format() {
            Ok(format) => format.unwrap_or(ExportFormat::Xlsx),
            Err(error) => {
                log::warn!("read last export format: {error:#}");
                ExportFormat::Xlsx
            }
        }
    }
}
