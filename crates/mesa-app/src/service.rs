// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::Value;

use crate::cross_ref::SubGroupLookup;
use crate::model::{DataPage, DataQuery, GroupOption, GroupValue};

pub trait DataService {
    fn get_data(&self, query: &DataQuery) -> Result<DataPage>;
}

pub trait GroupService {
    fn group_options(&self, component_id: &str) -> Result<Vec<GroupOption>>;

    fn group_values(
        &self,
        endpoint: &str,
        filters: &BTreeMap<String, Value>,
        search_term: &str,
    ) -> Result<Vec<GroupValue>>;

    fn sub_groups(
        &self,
        lookup: SubGroupLookup,
        parent_id: &str,
        filters: &BTreeMap<String, Value>,
        search_term: &str,
    ) -> Result<Vec<GroupValue>>;
}

/// Everything a table needs from its backend, shareable across worker
/// threads.
pub trait Backend: DataService + GroupService + Send + Sync {}

impl<T> Backend for T where T: DataService + GroupService + Send + Sync {}

/// A backend call described as data, so the reducer can emit it and a
/// runtime can execute it wherever it likes.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceCall {
    Data(DataQuery),
    GroupOptions {
        component_id: String,
    },
    GroupValues {
        endpoint: String,
        filters: BTreeMap<String, Value>,
        search_term: String,
    },
    SubGroups {
        lookup: SubGroupLookup,
        parent_id: String,
        filters: BTreeMap<String, Value>,
        search_term: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Page(DataPage),
    Groups(Vec<GroupValue>),
    Options(Vec<GroupOption>),
    Failed(String),
}

impl ServiceCall {
    /// Runs the call, folding any error into [`FetchOutcome::Failed`].
    pub fn execute<B>(&self, backend: &B) -> FetchOutcome
    where
        B: DataService + GroupService + ?Sized,
    {
        let result = match self {
            Self::Data(query) => backend.get_data(query).map(FetchOutcome::Page),
            Self::GroupOptions { component_id } => backend
                .group_options(component_id)
                .map(FetchOutcome::Options),
            Self::GroupValues {
                endpoint,
                filters,
                search_term,
            } => backend
                .group_values(endpoint, filters, search_term)
                .map(FetchOutcome::Groups),
            Self::SubGroups {
                lookup,
                parent_id,
                filters,
                search_term,
            } => backend
                .sub_groups(*lookup, parent_id, filters, search_term)
                .map(FetchOutcome::Groups),
        };
        result.unwrap_or_else(|error| FetchOutcome::Failed(format!("{error:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::{DataService, FetchOutcome, GroupService, ServiceCall};
    use crate::{DataPage, DataQuery, GroupOption, GroupValue, SubGroupLookup};
    use anyhow::{Result, anyhow};
    use serde_json::Value;
    use std::collections::BTreeMap;

    struct Broken;

    impl DataService for Broken {
        fn get_data(&self, _query: &DataQuery) -> Result<DataPage> {
            Err(anyhow!("connection refused").context("query rechazos"))
        }
    }

    impl GroupService for Broken {
        fn group_options(&self, _component_id: &str) -> Result<Vec<GroupOption>> {
            Ok(vec![GroupOption::new("Equipos", "idEquipoVenta", "incentive-team")])
        }

        fn group_values(
            &self,
            _endpoint: &str,
            _filters: &BTreeMap<String, Value>,
            _search_term: &str,
        ) -> Result<Vec<GroupValue>> {
            Ok(Vec::new())
        }

        fn sub_groups(
            &self,
            lookup: SubGroupLookup,
            parent_id: &str,
            _filters: &BTreeMap<String, Value>,
            _search_term: &str,
        ) -> Result<Vec<GroupValue>> {
            Ok(vec![GroupValue::new(Some(parent_id), Some(lookup.path()))])
        }
    }

    #[test]
    fn errors_fold_into_failed_outcome_with_context_chain() {
        let query = DataQuery {
            filters: BTreeMap::new(),
            search_term: String::new(),
            page: 1,
            page_size: 10,
            sort_column: None,
            sort_direction: None,
            group_by: None,
        };
        let outcome = ServiceCall::Data(query).execute(&Broken);
        assert_eq!(
            outcome,
            FetchOutcome::Failed("query rechazos: connection refused".to_owned())
        );
    }

    #[test]
    fn sub_group_call_forwards_lookup() {
        let call = ServiceCall::SubGroups {
            lookup: SubGroupLookup::TeamAgents,
            parent_id: "7".to_owned(),
            filters: BTreeMap::new(),
            search_term: String::new(),
        };
        assert_eq!(
            call.execute(&Broken),
            FetchOutcome::Groups(vec![GroupValue::new(Some("7"), Some("team-agents"))])
        );
    }
}
