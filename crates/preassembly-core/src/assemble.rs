//! In-memory assembly: the full deduplicate-and-link pipeline without a
//! storage backend.

use std::collections::{BTreeMap, BTreeSet};

use crate::dedup::deduplicate;
use crate::digest::Fingerprint;
use crate::incremental::{self, Increment};
use crate::ontology::Ontology;
use crate::refinement::link;
use crate::statement::{EvidenceLink, RawId, RawStatement, SupportLink, UniqueStatement};

/// Unique statements with both kinds of links.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    pub unique: BTreeMap<Fingerprint, UniqueStatement>,
    pub evidence_links: BTreeSet<EvidenceLink>,
    pub support_links: BTreeSet<SupportLink>,
}

/// Deduplicate and link `raws` from scratch.
pub fn process<O: Ontology + ?Sized>(raws: &[RawStatement], ontology: &O) -> Corpus {
    let dedup = deduplicate(raws);
    let support_links = link(dedup.unique.values(), ontology);
    tracing::info!(
        raw = raws.len(),
        unique = dedup.unique.len(),
        links = support_links.len(),
        "processed statements"
    );
    Corpus {
        unique: dedup.unique,
        evidence_links: dedup.evidence_links,
        support_links,
    }
}

/// Unique statements no other statement refines: the most specific ones.
pub fn top_level<'a>(
    unique: &'a BTreeMap<Fingerprint, UniqueStatement>,
    support_links: &BTreeSet<SupportLink>,
) -> Vec<&'a UniqueStatement> {
    let refined: BTreeSet<Fingerprint> = support_links.iter().map(|l| l.to).collect();
    unique
        .iter()
        .filter(|(fingerprint, _)| !refined.contains(fingerprint))
        .map(|(_, stmt)| stmt)
        .collect()
}

impl Corpus {
    pub fn process<O: Ontology + ?Sized>(raws: &[RawStatement], ontology: &O) -> Self {
        process(raws, ontology)
    }

    /// Fold `new_raw` in, returning what was added.
    pub fn supplement<O: Ontology + ?Sized>(
        &mut self,
        new_raw: &[RawStatement],
        ontology: &O,
    ) -> Increment {
        let increment = incremental::supplement(&self.unique, new_raw, ontology);
        self.apply(increment.clone());
        increment
    }

    /// Union an increment into the corpus. Existing statements are never replaced.
    pub fn apply(&mut self, increment: Increment) {
        for (fingerprint, stmt) in increment.new_unique {
            self.unique.entry(fingerprint).or_insert(stmt);
        }
        self.evidence_links.extend(increment.evidence_links);
        self.support_links.extend(increment.support_links);
    }

    pub fn is_empty(&self) -> bool {
        self.unique.is_empty()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&UniqueStatement> {
        self.unique.get(fingerprint)
    }

    /// Raw statements that are evidence for `fingerprint`.
    pub fn evidence_for(&self, fingerprint: &Fingerprint) -> Vec<RawId> {
        self.evidence_links
            .iter()
            .filter(|l| l.fingerprint == *fingerprint)
            .map(|l| l.raw_id)
            .collect()
    }

    /// The more general statements `fingerprint` supports.
    pub fn supports(&self, fingerprint: &Fingerprint) -> Vec<Fingerprint> {
        self.support_links
            .range(
                SupportLink {
                    from: *fingerprint,
                    to: Fingerprint::from_bytes([0; 32]),
                }..,
            )
            .take_while(|l| l.from == *fingerprint)
            .map(|l| l.to)
            .collect()
    }

    /// The more specific statements that support `fingerprint`.
    pub fn supported_by(&self, fingerprint: &Fingerprint) -> Vec<Fingerprint> {
        self.support_links
            .iter()
            .filter(|l| l.to == *fingerprint)
            .map(|l| l.from)
            .collect()
    }

    pub fn top_level(&self) -> Vec<&UniqueStatement> {
        top_level(&self.unique, &self.support_links)
    }
}
