//! Relevance filters over incoming statements.
//!
//! Filters are pure: they take statements by value and return the ones that
//! pass, in their original order. A prior or model filter whose agent set is
//! empty passes everything.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::ontology::Ontology;
use crate::statement::{Agent, EntityKey, RawStatement, UniqueStatement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceFilter {
    /// Every agent carries a non-`TEXT` grounding.
    Grounding,
    /// At least one agent is related to a prior agent.
    PriorOne,
    /// Every agent is related to a prior agent.
    PriorAll,
    /// At least one agent is already in the model.
    ModelOne,
    /// Every agent is already in the model.
    ModelAll,
}

impl RelevanceFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            RelevanceFilter::Grounding => "grounding",
            RelevanceFilter::PriorOne => "prior_one",
            RelevanceFilter::PriorAll => "prior_all",
            RelevanceFilter::ModelOne => "model_one",
            RelevanceFilter::ModelAll => "model_all",
        }
    }
}

impl fmt::Display for RelevanceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown relevance filter `{0}` (expected grounding, prior_one, prior_all, model_one or model_all)")]
pub struct UnknownFilter(pub String);

impl FromStr for RelevanceFilter {
    type Err = UnknownFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "grounding" => Ok(RelevanceFilter::Grounding),
            "prior_one" => Ok(RelevanceFilter::PriorOne),
            "prior_all" => Ok(RelevanceFilter::PriorAll),
            "model_one" => Ok(RelevanceFilter::ModelOne),
            "model_all" => Ok(RelevanceFilter::ModelAll),
            _ => Err(UnknownFilter(s.to_string())),
        }
    }
}

/// Statements with an agent list a filter can inspect.
pub trait HasAgents {
    fn agents(&self) -> &[Agent];
}

impl HasAgents for RawStatement {
    fn agents(&self) -> &[Agent] {
        RawStatement::agents(self)
    }
}

impl HasAgents for UniqueStatement {
    fn agents(&self) -> &[Agent] {
        UniqueStatement::agents(self)
    }
}

/// Stateless agents keyed by entity identity.
#[derive(Debug, Clone, Default)]
pub struct AgentSet {
    agents: BTreeMap<EntityKey, Agent>,
}

impl AgentSet {
    /// Every agent of every statement, with state stripped.
    pub fn from_statements<'a, S: HasAgents + 'a>(stmts: impl IntoIterator<Item = &'a S>) -> Self {
        stmts
            .into_iter()
            .flat_map(|s| s.agents().iter().cloned())
            .collect()
    }

    pub fn insert(&mut self, agent: &Agent) {
        self.agents
            .entry(agent.entity_key())
            .or_insert_with(|| agent.stateless());
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Same entity as some member.
    pub fn contains(&self, agent: &Agent) -> bool {
        self.agents.contains_key(&agent.entity_key())
    }

    /// Same entity as, or an is-a relative of, some member.
    pub fn has_related<O: Ontology + ?Sized>(&self, agent: &Agent, ontology: &O) -> bool {
        self.contains(agent)
            || self
                .agents
                .values()
                .any(|member| agents_related(agent, member, ontology))
    }
}

impl FromIterator<Agent> for AgentSet {
    fn from_iter<I: IntoIterator<Item = Agent>>(iter: I) -> Self {
        let mut set = AgentSet::default();
        for agent in iter {
            set.insert(&agent);
        }
        set
    }
}

/// Same entity, or one is a kind of the other. State is ignored.
pub fn agents_related<O: Ontology + ?Sized>(a: &Agent, b: &Agent, ontology: &O) -> bool {
    if a.entity_key() == b.entity_key() {
        return true;
    }
    match (a.is_grounded() && b.is_grounded(), a.primary_grounding(), b.primary_grounding()) {
        (true, Some(ga), Some(gb)) => ontology.is_a(&ga, &gb) || ontology.is_a(&gb, &ga),
        _ => false,
    }
}

/// Agent sets the prior and model filters test against.
#[derive(Debug, Clone, Default)]
pub struct RelevanceContext {
    pub prior: AgentSet,
    pub model: AgentSet,
}

impl RelevanceContext {
    fn passes<S: HasAgents, O: Ontology + ?Sized>(
        &self,
        stmt: &S,
        filter: RelevanceFilter,
        ontology: &O,
    ) -> bool {
        let agents = stmt.agents();
        match filter {
            RelevanceFilter::Grounding => agents.iter().all(Agent::is_grounded),
            RelevanceFilter::PriorOne if !self.prior.is_empty() => {
                agents.iter().any(|a| self.prior.has_related(a, ontology))
            }
            RelevanceFilter::PriorAll if !self.prior.is_empty() => {
                agents.iter().all(|a| self.prior.has_related(a, ontology))
            }
            RelevanceFilter::ModelOne if !self.model.is_empty() => {
                agents.iter().any(|a| self.model.contains(a))
            }
            RelevanceFilter::ModelAll if !self.model.is_empty() => {
                agents.iter().all(|a| self.model.contains(a))
            }
            _ => true,
        }
    }

    /// Statements that pass every filter, in input order.
    pub fn apply<S: HasAgents, O: Ontology + ?Sized>(
        &self,
        stmts: Vec<S>,
        filters: &[RelevanceFilter],
        ontology: &O,
    ) -> Vec<S> {
        if filters.is_empty() {
            return stmts;
        }
        let before = stmts.len();
        let kept: Vec<S> = stmts
            .into_iter()
            .filter(|s| filters.iter().all(|f| self.passes(s, *f, ontology)))
            .collect();
        tracing::debug!(before, after = kept.len(), "applied relevance filters");
        kept
    }
}
