//! Refinement linking: which unique statements are more specific versions
//! of which others.
//!
//! ```text
//!   Phosphorylation(BRAF, MAP2K1@S222)      (most specific)
//!        │ refines
//!        ▼
//!   Phosphorylation(RAF, MAP2K1)            (FPLX family, no site)
//! ```
//!
//! The relation is evaluated by one pure function of two statement contents
//! and the ontology ([`compare`]). Nothing about the rest of the corpus or
//! the order of insertion enters it, which is what lets the incremental path
//! split the pair space into `stored × new` and `new × new`.
//!
//! Statements can only refine one another inside the same `(kind, arity)`
//! bucket, so pairs are enumerated per bucket and in parallel.

use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use crate::ontology::Ontology;
use crate::statement::{Agent, ModCondition, StatementKind, SupportLink, UniqueStatement};

/// How two statements relate under refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairRelation {
    Unrelated,
    /// The first statement refines the second.
    Refines,
    /// The second statement refines the first.
    RefinedBy,
    /// Each refines the other; no link is emitted for such pairs.
    Mutual,
}

/// Statements in different buckets never refine one another.
pub type BucketKey = (StatementKind, usize);

pub fn bucket_key(stmt: &UniqueStatement) -> BucketKey {
    (stmt.kind(), stmt.arity())
}

// ============================================================================
// Agent refinement
// ============================================================================

fn mod_refines(specific: &ModCondition, general: &ModCondition) -> bool {
    specific.mod_type == general.mod_type
        && specific.is_modified == general.is_modified
        && (general.residue.is_none() || specific.residue == general.residue)
        && (general.position.is_none() || specific.position == general.position)
}

/// Whether `a` names the same entity as `b`, or a kind of it.
fn entity_refines<O: Ontology + ?Sized>(a: &Agent, b: &Agent, ontology: &O) -> bool {
    if a.entity_key() == b.entity_key() {
        return true;
    }
    if !a.is_grounded() || !b.is_grounded() {
        return false;
    }
    match (a.primary_grounding(), b.primary_grounding()) {
        (Some(pa), Some(pb)) => ontology.is_a(&pa, &pb),
        _ => false,
    }
}

/// Agent `a` equals or refines agent `b`: same entity or an is-a child of
/// it, carrying at least the state `b` carries.
pub fn agent_refines<O: Ontology + ?Sized>(a: &Agent, b: &Agent, ontology: &O) -> bool {
    if !entity_refines(a, b, ontology) {
        return false;
    }
    let mods = b
        .mods
        .iter()
        .all(|g| a.mods.iter().any(|s| mod_refines(s, g)));
    let bound = b
        .bound_conditions
        .iter()
        .all(|g| a.bound_conditions.contains(g));
    let location = b.location.is_none() || a.location == b.location;
    mods && bound && location
}

// ============================================================================
// Statement refinement
// ============================================================================

/// Whether a perfect matching exists in the bipartite graph `edges`, where
/// `edges[i]` lists the right-hand vertices left vertex `i` may take.
fn has_perfect_matching(edges: &[Vec<usize>], right: usize) -> bool {
    fn augment(
        u: usize,
        edges: &[Vec<usize>],
        seen: &mut [bool],
        owner: &mut [Option<usize>],
    ) -> bool {
        for &v in &edges[u] {
            if seen[v] {
                continue;
            }
            seen[v] = true;
            if owner[v].map_or(true, |w| augment(w, edges, seen, owner)) {
                owner[v] = Some(u);
                return true;
            }
        }
        false
    }

    if edges.len() != right {
        return false;
    }
    let mut owner = vec![None; right];
    (0..edges.len()).all(|u| {
        let mut seen = vec![false; right];
        augment(u, edges, &mut seen, &mut owner)
    })
}

/// Whether statement `a` equals or refines statement `b` member by member.
///
/// Ordered kinds compare positionally. Symmetric kinds look for a
/// one-to-one assignment of `a`'s members onto `b`'s.
pub fn statement_refines<O: Ontology + ?Sized>(
    a: &UniqueStatement,
    b: &UniqueStatement,
    ontology: &O,
) -> bool {
    if bucket_key(a) != bucket_key(b) {
        return false;
    }
    if !a.kind().is_symmetric() {
        return a
            .agents()
            .iter()
            .zip(b.agents())
            .all(|(x, y)| agent_refines(x, y, ontology));
    }

    let edges: Vec<Vec<usize>> = a
        .agents()
        .iter()
        .map(|x| {
            b.agents()
                .iter()
                .enumerate()
                .filter(|(_, y)| agent_refines(x, y, ontology))
                .map(|(j, _)| j)
                .collect()
        })
        .collect();
    has_perfect_matching(&edges, b.arity())
}

/// Relation between two unique statements.
pub fn compare<O: Ontology + ?Sized>(
    a: &UniqueStatement,
    b: &UniqueStatement,
    ontology: &O,
) -> PairRelation {
    if a.fingerprint() == b.fingerprint() || bucket_key(a) != bucket_key(b) {
        return PairRelation::Unrelated;
    }
    match (
        statement_refines(a, b, ontology),
        statement_refines(b, a, ontology),
    ) {
        (true, true) => PairRelation::Mutual,
        (true, false) => PairRelation::Refines,
        (false, true) => PairRelation::RefinedBy,
        (false, false) => PairRelation::Unrelated,
    }
}

/// The support link between `a` and `b`, if exactly one refines the other.
pub fn link_pair<O: Ontology + ?Sized>(
    a: &UniqueStatement,
    b: &UniqueStatement,
    ontology: &O,
) -> Option<SupportLink> {
    match compare(a, b, ontology) {
        PairRelation::Refines => Some(SupportLink {
            from: a.fingerprint(),
            to: b.fingerprint(),
        }),
        PairRelation::RefinedBy => Some(SupportLink {
            from: b.fingerprint(),
            to: a.fingerprint(),
        }),
        PairRelation::Mutual => {
            tracing::debug!(a = %a.fingerprint(), b = %b.fingerprint(), "mutual refinement suppressed");
            None
        }
        PairRelation::Unrelated => None,
    }
}

// ============================================================================
// Corpus-level linking
// ============================================================================

/// Group statements by `(kind, arity)`.
pub fn bucket<'a>(
    unique: impl IntoIterator<Item = &'a UniqueStatement>,
) -> BTreeMap<BucketKey, Vec<&'a UniqueStatement>> {
    let mut buckets: BTreeMap<BucketKey, Vec<&'a UniqueStatement>> = BTreeMap::new();
    for stmt in unique {
        buckets.entry(bucket_key(stmt)).or_default().push(stmt);
    }
    buckets
}

fn union(mut a: BTreeSet<SupportLink>, b: BTreeSet<SupportLink>) -> BTreeSet<SupportLink> {
    a.extend(b);
    a
}

/// All support links among `unique`.
pub fn link<'a, O: Ontology + ?Sized>(
    unique: impl IntoIterator<Item = &'a UniqueStatement>,
    ontology: &O,
) -> BTreeSet<SupportLink> {
    let buckets = bucket(unique);
    let links = buckets
        .par_iter()
        .flat_map(|(_, members)| {
            (0..members.len()).into_par_iter().map(move |i| {
                members[i + 1..]
                    .iter()
                    .filter_map(|other| link_pair(members[i], other, ontology))
                    .collect::<BTreeSet<_>>()
            })
        })
        .reduce(BTreeSet::new, union);

    tracing::debug!(buckets = buckets.len(), links = links.len(), "linked statements");
    links
}

/// Support links between `existing` and `new` statements, in either
/// direction. Pairs within `existing` are never examined.
pub fn link_across<'a, 'b, O: Ontology + ?Sized>(
    existing: impl IntoIterator<Item = &'a UniqueStatement>,
    new: impl IntoIterator<Item = &'b UniqueStatement>,
    ontology: &O,
) -> BTreeSet<SupportLink> {
    let new_buckets = bucket(new);
    if new_buckets.is_empty() {
        return BTreeSet::new();
    }
    let existing: Vec<&UniqueStatement> = existing.into_iter().collect();

    existing
        .par_iter()
        .map(|old| match new_buckets.get(&bucket_key(old)) {
            Some(candidates) => candidates
                .iter()
                .filter_map(|fresh| link_pair(old, fresh, ontology))
                .collect::<BTreeSet<_>>(),
            None => BTreeSet::new(),
        })
        .reduce(BTreeSet::new, union)
}
