//! Preassembly core: statement deduplication and refinement linking.
//!
//! ```text
//!   raw statements ──distill──► per-document canonical copies
//!         │
//!         ▼ fingerprint (SHA-256 of kind + agent identity and state)
//!   ┌───────────────┐   EvidenceLink   ┌──────────────────┐
//!   │ RawStatement  │ ───────────────► │ UniqueStatement  │ ◄─┐
//!   └───────────────┘   many-to-one    └──────────────────┘   │ SupportLink
//!                                              │ refines       │ (specific →
//!                                              └───────────────┘  general)
//! ```
//!
//! Everything here is storage-free. The corpus store drives the same
//! functions batch by batch; [`process`] runs them over one in-memory slice.
//!
//! Every operation that consults the ontology takes it as an argument.

pub mod assemble;
pub mod dedup;
pub mod digest;
pub mod distill;
pub mod filter;
pub mod incremental;
pub mod ontology;
pub mod refinement;
pub mod statement;

pub use assemble::{process, top_level, Corpus};
pub use dedup::{deduplicate, Deduplicated};
pub use digest::{fingerprint, Fingerprint, FingerprintParseError, FINGERPRINT_PREFIX};
pub use distill::{distill, distill_ids, DistillStats, Distillable, ReaderPreference};
pub use filter::{AgentSet, HasAgents, RelevanceContext, RelevanceFilter, UnknownFilter};
pub use incremental::{link_increment, reconcile, supplement, Increment};
pub use ontology::{CachedOntology, EmptyOntology, Hierarchy, IsAEdge, Ontology, OntologyError};
pub use refinement::{compare, link, link_across, link_pair, PairRelation};
pub use statement::{
    Agent, Arity, BoundCondition, EntityKey, Evidence, EvidenceLink, Grounding, ModCondition,
    Origin, RawId, RawStatement, StatementError, StatementKind, SupportLink, TextType,
    UniqueStatement,
};
