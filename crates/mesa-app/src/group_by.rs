// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::cross_ref::{COMPOUND_OPTIONS, Dimension};
use crate::model::GroupOption;

pub const OPTIONS_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupBySelector {
    component_id: Option<String>,
    default_option: Option<GroupOption>,
    options: Vec<GroupOption>,
    search_term: String,
    shown: usize,
    selected: Option<GroupOption>,
    loaded: bool,
}

impl GroupBySelector {
    pub fn new(component_id: Option<String>, default_option: Option<GroupOption>) -> Self {
        Self {
            component_id: component_id.filter(|id| !id.trim().is_empty()),
            default_option,
            options: Vec::new(),
            search_term: String::new(),
            shown: OPTIONS_PAGE_SIZE,
            selected: None,
            loaded: false,
        }
    }

    pub fn component_id(&self) -> Option<&str> {
        self.component_id.as_deref()
    }

    pub fn default_option(&self) -> Option<&GroupOption> {
        self.default_option.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn options(&self) -> &[GroupOption] {
        &self.options
    }

    pub fn selected(&self) -> Option<&GroupOption> {
        self.selected.as_ref()
    }

    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    pub fn is_selected(&self, option: &GroupOption) -> bool {
        self.selected
            .as_ref()
            .is_some_and(|selected| selected.key() == option.key())
    }

    /// Installs the fetched options, adds compound options and applies the
    /// default. Returns the default selection to announce, if any.
    pub fn options_loaded(&mut self, options: Vec<GroupOption>) -> Option<GroupOption> {
        self.options = options;
        add_compound_options(&mut self.options);
        if let Some(default) = &self.default_option
            && default.child.is_some()
            && !self
                .options
                .iter()
                .any(|option| option.key() == default.key())
        {
            self.options.insert(0, default.clone());
        }
        self.finish_loading()
    }

    /// Fetch failed (or there is nothing to fetch): offer only the default.
    pub fn options_failed(&mut self) -> Option<GroupOption> {
        self.options = self.default_option.iter().cloned().collect();
        self.finish_loading()
    }

    fn finish_loading(&mut self) -> Option<GroupOption> {
        self.loaded = true;
        self.search_term.clear();
        self.shown = OPTIONS_PAGE_SIZE;
        let chosen = self.match_default()?;
        self.selected = Some(chosen.clone());
        Some(chosen)
    }

    fn match_default(&self) -> Option<GroupOption> {
        let default = self.default_option.as_ref()?;
        if default.child.is_some() {
            return Some(default.clone());
        }

        let default_last = last_segment(&default.field);
        let found = self.options.iter().find(|option| {
            default.id.is_some() && option.id == default.id
                || !default.field.is_empty() && option.field == default.field
                || !default.field.is_empty()
                    && !option.field.is_empty()
                    && last_segment(&option.field) == default_last
        });
        if found.is_none() {
            log::warn!(
                "default grouping {:?} matches none of the {} available options",
                default.key(),
                self.options.len()
            );
        }
        found.cloned()
    }

    /// Selects the option with `key`, or clears the selection when it is
    /// already selected. Returns the new selection, or `None` for an
    /// unknown key.
    pub fn toggle(&mut self, key: &str) -> Option<Option<GroupOption>> {
        let option = self.options.iter().find(|option| option.key() == key)?;
        if self.is_selected(option) {
            self.selected = None;
        } else {
            self.selected = Some(option.clone());
        }
        Some(self.selected.clone())
    }

    /// Restores a remembered selection without going through the default.
    pub fn restore(&mut self, option: GroupOption) {
        if option.child.is_some() && !self.options.iter().any(|o| o.key() == option.key()) {
            self.options.insert(0, option.clone());
        }
        self.selected = Some(option);
    }

    /// Case-insensitive name filter; resets incremental paging.
    pub fn search(&mut self, term: &str) {
        self.search_term = term.to_owned();
        self.shown = OPTIONS_PAGE_SIZE;
    }

    pub fn filtered(&self) -> Vec<&GroupOption> {
        let needle = self.search_term.to_lowercase();
        self.options
            .iter()
            .filter(|option| needle.is_empty() || option.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn displayed(&self) -> Vec<&GroupOption> {
        let mut filtered = self.filtered();
        filtered.truncate(self.shown);
        filtered
    }

    /// Reveals the next page of options. Returns whether anything was added.
    pub fn load_more(&mut self) -> bool {
        let available = self.filtered().len();
        if self.shown >= available {
            return false;
        }
        self.shown += OPTIONS_PAGE_SIZE;
        true
    }

    /// Clears selection and search. Always announces `None`.
    pub fn reset(&mut self) {
        self.selected = None;
        self.search_term.clear();
        self.shown = OPTIONS_PAGE_SIZE;
    }

    pub fn remove_selection(&mut self) -> bool {
        self.selected.take().is_some()
    }
}

fn last_segment(field: &str) -> &str {
    field.rsplit('.').next().unwrap_or(field)
}

fn add_compound_options(options: &mut Vec<GroupOption>) {
    for (name, parent_dim, child_dim) in COMPOUND_OPTIONS {
        let parent = options
            .iter()
            .find(|option| Dimension::of(option) == Some(*parent_dim));
        let child = options
            .iter()
            .find(|option| Dimension::of(option) == Some(*child_dim));
        let (Some(parent), Some(child)) = (parent, child) else {
            continue;
        };

        let exists = options.iter().any(|option| {
            option.name == *name
                || option.field == parent.field
                    && option
                        .child
                        .as_ref()
                        .is_some_and(|nested| nested.field == child.field)
        });
        if exists {
            continue;
        }

        let mut nested = child.clone();
        nested.child = None;
        let compound = GroupOption {
            id: Some(format!("combined-{}-{}", parent.key(), child.key())),
            name: (*name).to_owned(),
            field: parent.field.clone(),
            endpoint: parent.endpoint.clone(),
            hide_field: parent.hide_field.clone(),
            child: Some(Box::new(nested)),
        };
        options.insert(0, compound);
    }
}
