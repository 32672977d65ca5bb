//! Statement data model
//!
//! Raw statements are assertions exactly as an extraction run produced them:
//! a relation kind, an ordered tuple of agents and a single evidence record.
//! Unique statements are the deduplicated representatives, one per
//! fingerprint. Links connect the two layers:
//!
//! ```text
//!   RawStatement ──EvidenceLink──► UniqueStatement ──SupportLink──► UniqueStatement
//!   (one evidence)  (many-to-one)   (content only)    (specific → general)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::digest::{self, Fingerprint};

/// Identifier of a raw statement instance.
pub type RawId = Uuid;

/// Namespace holding the surface text an agent was read from.
pub const TEXT_NAMESPACE: &str = "TEXT";

/// Namespaces consulted, in order, when choosing the grounding an agent is
/// looked up with in the ontology.
pub const GROUNDING_PRIORITY: [&str; 7] = ["HGNC", "UP", "FPLX", "CHEBI", "GO", "MESH", "PUBCHEM"];

// ============================================================================
// Statement kinds
// ============================================================================

/// Relation kinds a statement can assert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    Phosphorylation,
    Dephosphorylation,
    Ubiquitination,
    Deubiquitination,
    Acetylation,
    Deacetylation,
    Methylation,
    Demethylation,
    Activation,
    Inhibition,
    IncreaseAmount,
    DecreaseAmount,
    Translocation,
    Complex,
}

/// Number of agents a statement kind accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn admits(self, count: usize) -> bool {
        match self {
            Arity::Exactly(n) => count == n,
            Arity::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

impl StatementKind {
    pub const ALL: [StatementKind; 14] = [
        StatementKind::Phosphorylation,
        StatementKind::Dephosphorylation,
        StatementKind::Ubiquitination,
        StatementKind::Deubiquitination,
        StatementKind::Acetylation,
        StatementKind::Deacetylation,
        StatementKind::Methylation,
        StatementKind::Demethylation,
        StatementKind::Activation,
        StatementKind::Inhibition,
        StatementKind::IncreaseAmount,
        StatementKind::DecreaseAmount,
        StatementKind::Translocation,
        StatementKind::Complex,
    ];

    pub fn arity(self) -> Arity {
        match self {
            StatementKind::Translocation => Arity::Exactly(1),
            StatementKind::Complex => Arity::AtLeast(2),
            _ => Arity::Exactly(2),
        }
    }

    /// Symmetric kinds ignore agent order.
    pub fn is_symmetric(self) -> bool {
        matches!(self, StatementKind::Complex)
    }

    /// Stable wire name; part of every fingerprint.
    pub fn as_str(self) -> &'static str {
        match self {
            StatementKind::Phosphorylation => "Phosphorylation",
            StatementKind::Dephosphorylation => "Dephosphorylation",
            StatementKind::Ubiquitination => "Ubiquitination",
            StatementKind::Deubiquitination => "Deubiquitination",
            StatementKind::Acetylation => "Acetylation",
            StatementKind::Deacetylation => "Deacetylation",
            StatementKind::Methylation => "Methylation",
            StatementKind::Demethylation => "Demethylation",
            StatementKind::Activation => "Activation",
            StatementKind::Inhibition => "Inhibition",
            StatementKind::IncreaseAmount => "IncreaseAmount",
            StatementKind::DecreaseAmount => "DecreaseAmount",
            StatementKind::Translocation => "Translocation",
            StatementKind::Complex => "Complex",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Agents
// ============================================================================

/// A `(namespace, identifier)` pair naming an entity in some database.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Grounding {
    pub namespace: String,
    pub id: String,
}

impl Grounding {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    /// Parse `NS:ID`. Only the first colon separates, so `CHEBI:CHEBI:15422`
    /// keeps its prefixed identifier.
    pub fn parse(text: &str) -> Option<Self> {
        let (namespace, id) = text.trim().split_once(':')?;
        if namespace.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(namespace, id))
    }
}

impl fmt::Display for Grounding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

fn default_true() -> bool {
    true
}

/// A post-translational modification state of an agent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModCondition {
    pub mod_type: String,
    #[serde(default)]
    pub residue: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default = "default_true")]
    pub is_modified: bool,
}

impl ModCondition {
    pub fn new(mod_type: impl Into<String>) -> Self {
        Self {
            mod_type: mod_type.into(),
            residue: None,
            position: None,
            is_modified: true,
        }
    }

    pub fn at(mut self, residue: impl Into<String>, position: impl Into<String>) -> Self {
        self.residue = Some(residue.into());
        self.position = Some(position.into());
        self
    }

    pub fn unmodified(mut self) -> Self {
        self.is_modified = false;
        self
    }
}

/// Binding state of an agent with a partner, named by the partner's entity key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BoundCondition {
    pub partner: String,
    #[serde(default = "default_true")]
    pub is_bound: bool,
}


/// Identity of the entity an agent denotes, independent of its state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKey {
    /// Sorted non-`TEXT` groundings.
    Grounded(Vec<Grounding>),
    /// No usable grounding; the name stands in.
    Ungrounded(String),
}

impl EntityKey {
    pub fn canonical(&self) -> String {
        match self {
            EntityKey::Grounded(refs) => {
                let parts: Vec<String> = refs.iter().map(ToString::to_string).collect();
                format!("g:{}", parts.join("|"))
            }
            EntityKey::Ungrounded(name) => format!("u:{name}"),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// A participant in a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    #[serde(default)]
    pub db_refs: BTreeMap<String, String>,
    #[serde(default)]
    pub mods: Vec<ModCondition>,
    #[serde(default)]
    pub bound_conditions: Vec<BoundCondition>,
    #[serde(default)]
    pub location: Option<String>,
}

impl Agent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db_refs: BTreeMap::new(),
            mods: Vec::new(),
            bound_conditions: Vec::new(),
            location: None,
        }
    }

    pub fn with_ref(mut self, namespace: impl Into<String>, id: impl Into<String>) -> Self {
        self.db_refs.insert(namespace.into(), id.into());
        self
    }

    pub fn with_mod(mut self, condition: ModCondition) -> Self {
        self.mods.push(condition);
        self
    }

    pub fn bound_to(mut self, partner: impl Into<String>, is_bound: bool) -> Self {
        self.bound_conditions.push(BoundCondition {
            partner: partner.into(),
            is_bound,
        });
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    fn identity_refs(&self) -> impl Iterator<Item = (&String, &String)> {
        self.db_refs
            .iter()
            .filter(|(ns, id)| ns.as_str() != TEXT_NAMESPACE && !id.is_empty())
    }

    pub fn is_grounded(&self) -> bool {
        self.identity_refs().next().is_some()
    }

    pub fn entity_key(&self) -> EntityKey {
        let refs: Vec<Grounding> = self
            .identity_refs()
            .map(|(ns, id)| Grounding::new(ns.clone(), id.clone()))
            .collect();
        if refs.is_empty() {
            EntityKey::Ungrounded(self.name.clone())
        } else {
            EntityKey::Grounded(refs)
        }
    }

    /// The grounding used for ontology lookups.
    pub fn primary_grounding(&self) -> Option<Grounding> {
        for ns in GROUNDING_PRIORITY {
            if let Some(id) = self.db_refs.get(ns).filter(|id| !id.is_empty()) {
                return Some(Grounding::new(ns, id.clone()));
            }
        }
        self.identity_refs()
            .next()
            .map(|(ns, id)| Grounding::new(ns.clone(), id.clone()))
    }

    /// The same entity with its state stripped.
    pub fn stateless(&self) -> Agent {
        Agent {
            name: self.name.clone(),
            db_refs: self.db_refs.clone(),
            mods: Vec::new(),
            bound_conditions: Vec::new(),
            location: None,
        }
    }
}

// ============================================================================
// Evidence and origin
// ============================================================================

/// Provenance of one extracted assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub source_api: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Evidence {
    pub fn new(source_api: impl Into<String>) -> Self {
        Self {
            source_api: source_api.into(),
            source_id: None,
            text: None,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Content digest of this evidence record.
    pub fn digest(&self) -> Fingerprint {
        digest::evidence_digest(self)
    }
}

/// Which part of a document was read. Ordered from least to most complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextType {
    Title,
    Abstract,
    FullText,
}

/// Where a raw statement came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Produced by a reading engine over a document.
    Reading {
        document_id: String,
        reader: String,
        reader_version: String,
        text_type: TextType,
    },
    /// Imported from a curated database.
    Database { name: String },
    #[default]
    Unspecified,
}

impl Origin {
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Origin::Reading { document_id, .. } => Some(document_id),
            _ => None,
        }
    }
}

// ============================================================================
// Raw statements
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatementError {
    #[error("{kind} takes {expected} agent(s), got {actual}")]
    Arity {
        kind: StatementKind,
        expected: Arity,
        actual: usize,
    },
    #[error("agent {position} of {kind} has neither a name nor a grounding")]
    EmptyAgent { kind: StatementKind, position: usize },
}

/// An assertion as extracted, with exactly one evidence record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStatementRecord", into = "RawStatementRecord")]
pub struct RawStatement {
    id: RawId,
    kind: StatementKind,
    agents: Vec<Agent>,
    evidence: Evidence,
    origin: Origin,
    created_at: DateTime<Utc>,
}

/// Serialized shape of a raw statement; ids and timestamps may be omitted.
#[derive(Serialize, Deserialize)]
struct RawStatementRecord {
    #[serde(default)]
    id: Option<RawId>,
    kind: StatementKind,
    agents: Vec<Agent>,
    evidence: Evidence,
    #[serde(default)]
    origin: Origin,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

impl From<RawStatement> for RawStatementRecord {
    fn from(stmt: RawStatement) -> Self {
        Self {
            id: Some(stmt.id),
            kind: stmt.kind,
            agents: stmt.agents,
            evidence: stmt.evidence,
            origin: stmt.origin,
            created_at: Some(stmt.created_at),
        }
    }
}

impl TryFrom<RawStatementRecord> for RawStatement {
    type Error = StatementError;

    fn try_from(record: RawStatementRecord) -> Result<Self, Self::Error> {
        let mut stmt = RawStatement::new(record.kind, record.agents, record.evidence)?;
        stmt.origin = record.origin;
        if let Some(id) = record.id {
            stmt.id = id;
        }
        if let Some(created_at) = record.created_at {
            stmt.created_at = created_at;
        }
        Ok(stmt)
    }
}

impl RawStatement {
    /// Validate agent count and content for `kind`.
    pub fn new(
        kind: StatementKind,
        agents: Vec<Agent>,
        evidence: Evidence,
    ) -> Result<Self, StatementError> {
        let arity = kind.arity();
        if !arity.admits(agents.len()) {
            return Err(StatementError::Arity {
                kind,
                expected: arity,
                actual: agents.len(),
            });
        }
        if let Some(position) = agents
            .iter()
            .position(|a| a.name.trim().is_empty() && !a.is_grounded())
        {
            return Err(StatementError::EmptyAgent { kind, position });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            agents,
            evidence,
            origin: Origin::Unspecified,
            created_at: Utc::now(),
        })
    }

    pub fn with_id(mut self, id: RawId) -> Self {
        self.id = id;
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn id(&self) -> RawId {
        self.id
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn evidence(&self) -> &Evidence {
        &self.evidence
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn fingerprint(&self) -> Fingerprint {
        digest::fingerprint(self.kind, &self.agents)
    }
}

// ============================================================================
// Unique statements and links
// ============================================================================

/// Deduplicated representative of every raw statement sharing a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueStatement {
    fingerprint: Fingerprint,
    kind: StatementKind,
    agents: Vec<Agent>,
}

impl UniqueStatement {
    pub fn from_raw(raw: &RawStatement) -> Self {
        Self {
            fingerprint: raw.fingerprint(),
            kind: raw.kind,
            agents: raw.agents.clone(),
        }
    }

    pub(crate) fn with_fingerprint(fingerprint: Fingerprint, raw: &RawStatement) -> Self {
        Self {
            fingerprint,
            kind: raw.kind,
            agents: raw.agents.clone(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn arity(&self) -> usize {
        self.agents.len()
    }
}

impl fmt::Display for UniqueStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.agents.iter().map(|a| a.name.as_str()).collect();
        write!(f, "{}({})", self.kind, names.join(", "))
    }
}

/// Raw statement → unique statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EvidenceLink {
    pub raw_id: RawId,
    pub fingerprint: Fingerprint,
}

/// `from` refines `to`: the more specific statement supports the more general one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupportLink {
    pub from: Fingerprint,
    pub to: Fingerprint,
}

impl Ord for SupportLink {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.from, self.to).cmp(&(other.from, other.to))
    }
}

impl PartialOrd for SupportLink {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
