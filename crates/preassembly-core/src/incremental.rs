//! Incremental merge: fold new raw statements into an already-linked corpus.
//!
//! ```text
//!            stored                 new
//!   stored │ never recomputed │ link_across │
//!   new    │   link_across    │    link     │
//! ```
//!
//! Fingerprints are the only identity key across old and new data: a new raw
//! statement whose fingerprint is already stored contributes an evidence
//! link to the stored statement and nothing else.

use std::collections::{BTreeMap, BTreeSet};

use crate::dedup::{deduplicate, Deduplicated};
use crate::digest::Fingerprint;
use crate::ontology::Ontology;
use crate::refinement::{link, link_across};
use crate::statement::{EvidenceLink, RawStatement, SupportLink, UniqueStatement};

/// Everything a supplement adds to a corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Increment {
    /// Statements whose fingerprint the corpus has not seen before.
    pub new_unique: BTreeMap<Fingerprint, UniqueStatement>,
    /// One link per new raw statement, to a new or an existing statement.
    pub evidence_links: BTreeSet<EvidenceLink>,
    pub support_links: BTreeSet<SupportLink>,
}

impl Increment {
    pub fn is_empty(&self) -> bool {
        self.new_unique.is_empty() && self.evidence_links.is_empty() && self.support_links.is_empty()
    }
}

/// Drop groups whose fingerprint is already known, keeping their evidence.
pub fn reconcile(dedup: Deduplicated, is_known: impl Fn(&Fingerprint) -> bool) -> Increment {
    let Deduplicated {
        unique,
        evidence_links,
    } = dedup;
    let new_unique = unique
        .into_iter()
        .filter(|(fingerprint, _)| !is_known(fingerprint))
        .collect();
    Increment {
        new_unique,
        evidence_links,
        support_links: BTreeSet::new(),
    }
}

/// Support links contributed by `new`: within it and against `existing`.
pub fn link_increment<'a, O: Ontology + ?Sized>(
    existing: impl IntoIterator<Item = &'a UniqueStatement>,
    new: &BTreeMap<Fingerprint, UniqueStatement>,
    ontology: &O,
) -> BTreeSet<SupportLink> {
    let mut links = link(new.values(), ontology);
    links.extend(link_across(existing, new.values(), ontology));
    links
}

/// Compute the increment that `new_raw` adds to the corpus holding `existing`.
pub fn supplement<O: Ontology + ?Sized>(
    existing: &BTreeMap<Fingerprint, UniqueStatement>,
    new_raw: &[RawStatement],
    ontology: &O,
) -> Increment {
    let mut increment = reconcile(deduplicate(new_raw), |fp| existing.contains_key(fp));
    increment.support_links = link_increment(existing.values(), &increment.new_unique, ontology);
    tracing::debug!(
        raw = new_raw.len(),
        unique = increment.new_unique.len(),
        links = increment.support_links.len(),
        "computed increment"
    );
    increment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::Hierarchy;
    use crate::statement::{Agent, Evidence, Grounding, StatementKind};

    fn phos(kinase: Agent, source: &str) -> RawStatement {
        RawStatement::new(
            StatementKind::Phosphorylation,
            vec![kinase, Agent::new("MAP2K1").with_ref("HGNC", "6840")],
            Evidence::new(source),
        )
        .unwrap()
    }

    fn braf() -> Agent {
        Agent::new("BRAF").with_ref("HGNC", "1097")
    }

    fn raf() -> Agent {
        Agent::new("RAF").with_ref("FPLX", "RAF")
    }

    #[test]
    fn known_fingerprints_only_gain_evidence() {
        let ont = Hierarchy::default();
        let old = deduplicate(&[phos(braf(), "reach")]).unique;
        let inc = supplement(&old, &[phos(braf(), "sparser")], &ont);
        assert!(inc.new_unique.is_empty());
        assert_eq!(inc.evidence_links.len(), 1);
        assert!(old.contains_key(&inc.evidence_links.iter().next().unwrap().fingerprint));
        assert!(inc.support_links.is_empty());
    }

    #[test]
    fn new_statements_link_against_stored_ones() {
        let ont = Hierarchy::from_edges([(
            Grounding::new("HGNC", "1097"),
            Grounding::new("FPLX", "RAF"),
        )]);
        let old = deduplicate(&[phos(raf(), "reach")]).unique;
        let inc = supplement(&old, &[phos(braf(), "sparser")], &ont);
        assert_eq!(inc.new_unique.len(), 1);
        let link = inc.support_links.iter().next().unwrap();
        assert!(inc.new_unique.contains_key(&link.from));
        assert!(old.contains_key(&link.to));
    }

    #[test]
    fn empty_supplement_is_empty() {
        let old = deduplicate(&[phos(raf(), "reach")]).unique;
        assert!(supplement(&old, &[], &Hierarchy::default()).is_empty());
    }
}
