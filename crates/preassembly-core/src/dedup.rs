//! Deduplication: group raw statements by fingerprint.
//!
//! The grouping is a partition, so it runs as a rayon fold/reduce: every
//! worker builds a partial [`Deduplicated`] over its slice, and partials
//! merge by union. The representative of a group is the member with the
//! smallest raw id, which makes the result independent of worker order.

use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use crate::digest::Fingerprint;
use crate::statement::{EvidenceLink, RawId, RawStatement, UniqueStatement};

/// Unique statements and the evidence links that attach raw statements to them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deduplicated {
    pub unique: BTreeMap<Fingerprint, UniqueStatement>,
    pub evidence_links: BTreeSet<EvidenceLink>,
}

/// Partial grouping, remembering which raw id each unique statement was
/// copied from so that merges can keep the smallest.
#[derive(Default)]
struct Partial {
    groups: BTreeMap<Fingerprint, (RawId, UniqueStatement)>,
    links: BTreeSet<EvidenceLink>,
}

impl Partial {
    fn add(mut self, raw: &RawStatement) -> Self {
        let fingerprint = raw.fingerprint();
        self.links.insert(EvidenceLink {
            raw_id: raw.id(),
            fingerprint,
        });
        match self.groups.get(&fingerprint) {
            Some((rep, _)) if *rep <= raw.id() => {}
            _ => {
                self.groups.insert(
                    fingerprint,
                    (raw.id(), UniqueStatement::with_fingerprint(fingerprint, raw)),
                );
            }
        }
        self
    }

    fn merge(mut self, other: Partial) -> Self {
        for (fingerprint, (rep, unique)) in other.groups {
            match self.groups.get(&fingerprint) {
                Some((mine, _)) if *mine <= rep => {}
                _ => {
                    self.groups.insert(fingerprint, (rep, unique));
                }
            }
        }
        self.links.extend(other.links);
        self
    }
}

/// Group `raws` by fingerprint.
///
/// Every raw statement yields exactly one evidence link; raw statements that
/// share an id (re-ingested copies) collapse onto one link.
pub fn deduplicate(raws: &[RawStatement]) -> Deduplicated {
    let partial = raws
        .par_iter()
        .fold(Partial::default, Partial::add)
        .reduce(Partial::default, Partial::merge);

    let unique = partial
        .groups
        .into_iter()
        .map(|(fingerprint, (_, unique))| (fingerprint, unique))
        .collect();

    Deduplicated {
        unique,
        evidence_links: partial.links,
    }
}

impl Deduplicated {
    pub fn is_empty(&self) -> bool {
        self.unique.is_empty()
    }

    /// Fold another grouping into this one. Statements already present keep
    /// their content; only evidence grows.
    pub fn merge(&mut self, other: Deduplicated) {
        for (fingerprint, unique) in other.unique {
            self.unique.entry(fingerprint).or_insert(unique);
        }
        self.evidence_links.extend(other.evidence_links);
    }
}
