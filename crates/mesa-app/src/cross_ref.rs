// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use crate::model::GroupOption;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dimension {
    Team,
    Agent,
    Incentive,
}

impl Dimension {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Team => "team",
            Self::Agent => "agent",
            Self::Incentive => "incentive",
        }
    }

    /// Classifies an option by its field or endpoint name.
    pub fn of(option: &GroupOption) -> Option<Self> {
        match (option.field.as_str(), option.endpoint.as_str()) {
            ("idEquipoVenta", _) | (_, "incentive-team") => Some(Self::Team),
            ("idAgente", _) | (_, "incentive-agent" | "monthly-goal-agent") => Some(Self::Agent),
            ("idIncentivo", _) | (_, "incentive") => Some(Self::Incentive),
            _ => None,
        }
    }
}

/// Backend lookup returning the child groups under one parent value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubGroupLookup {
    TeamAgents,
    AgentTeams,
    TeamIncentives,
    IncentiveTeams,
    AgentIncentives,
    IncentiveAgents,
}

impl SubGroupLookup {
    pub const ALL: [Self; 6] = [
        Self::TeamAgents,
        Self::AgentTeams,
        Self::TeamIncentives,
        Self::IncentiveTeams,
        Self::AgentIncentives,
        Self::IncentiveAgents,
    ];

    /// URL segment of the lookup under `group-by/`.
    pub const fn path(self) -> &'static str {
        match self {
            Self::TeamAgents => "team-agents",
            Self::AgentTeams => "agent-teams",
            Self::TeamIncentives => "team-incentives",
            Self::IncentiveTeams => "incentive-team",
            Self::AgentIncentives => "agent-incentives",
            Self::IncentiveAgents => "incentive-agents",
        }
    }

    pub const fn edge(self) -> (Dimension, Dimension) {
        match self {
            Self::TeamAgents => (Dimension::Team, Dimension::Agent),
            Self::AgentTeams => (Dimension::Agent, Dimension::Team),
            Self::TeamIncentives => (Dimension::Team, Dimension::Incentive),
            Self::IncentiveTeams => (Dimension::Incentive, Dimension::Team),
            Self::AgentIncentives => (Dimension::Agent, Dimension::Incentive),
            Self::IncentiveAgents => (Dimension::Incentive, Dimension::Agent),
        }
    }

    pub fn for_edge(parent: Dimension, child: Dimension) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|lookup| lookup.edge() == (parent, child))
    }

    /// Lookup for a parent/child option pair, if the pair is supported.
    pub fn resolve(parent: &GroupOption, child: &GroupOption) -> Option<Self> {
        Self::for_edge(Dimension::of(parent)?, Dimension::of(child)?)
    }
}

/// Compound options synthesized when both halves exist among the fetched
/// options: `(name, parent dimension, child dimension)`.
pub const COMPOUND_OPTIONS: &[(&str, Dimension, Dimension)] =
    &[("Equipos - Incentivos", Dimension::Team, Dimension::Incentive)];

#[cfg(test)]
mod tests {
    use super::{Dimension, SubGroupLookup};
    use crate::GroupOption;

    fn option(field: &str, endpoint: &str) -> GroupOption {
        GroupOption::new(field, field, endpoint)
    }

    #[test]
    fn dimension_matches_field_or_endpoint() {
        assert_eq!(
            Dimension::of(&option("idEquipoVenta", "x")),
            Some(Dimension::Team)
        );
        assert_eq!(
            Dimension::of(&option("otro", "monthly-goal-agent")),
            Some(Dimension::Agent)
        );
        assert_eq!(
            Dimension::of(&option("otro", "incentive")),
            Some(Dimension::Incentive)
        );
        assert_eq!(Dimension::of(&option("idCliente", "client")), None);
    }

    #[test]
    fn every_ordered_pair_of_distinct_dimensions_has_a_lookup() {
        let all = [Dimension::Team, Dimension::Agent, Dimension::Incentive];
        for parent in all {
            for child in all {
                let lookup = SubGroupLookup::for_edge(parent, child);
                assert_eq!(lookup.is_some(), parent != child, "{parent:?} -> {child:?}");
            }
        }
    }

    #[test]
    fn resolve_rejects_unknown_dimensions() {
        let team = option("idEquipoVenta", "incentive-team");
        let client = option("idCliente", "client");
        assert_eq!(SubGroupLookup::resolve(&team, &client), None);
        assert_eq!(
            SubGroupLookup::resolve(&team, &option("idAgente", "incentive-agent")),
            Some(SubGroupLookup::TeamAgents)
        );
    }
}
