//! In-memory corpus tables shared by both backends.
//!
//! Writes go through [`Tables::check`] first, which inspects a whole batch
//! against the current state without touching it. Only a batch that passes
//! is handed to [`Tables::apply`], so a rejected batch leaves no trace.

use preassembly_core::{
    EvidenceLink, Fingerprint, RawId, RawStatement, SupportLink, UniqueStatement,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};

use crate::backend::{CorpusBatch, CorpusCounts, RawFilter};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Tables {
    pub raw: BTreeMap<RawId, RawStatement>,
    pub unique: BTreeMap<Fingerprint, UniqueStatement>,
    /// Raw id → fingerprint of the unique statement it is evidence for.
    pub evidence: BTreeMap<RawId, Fingerprint>,
    pub support: BTreeSet<SupportLink>,
}

impl Tables {
    /// Rows of `rows` whose id is not stored yet, first occurrence only.
    pub fn new_raw<'a>(&self, rows: &'a [RawStatement]) -> Vec<&'a RawStatement> {
        let mut seen = BTreeSet::new();
        rows.iter()
            .filter(|r| !self.raw.contains_key(&r.id()) && seen.insert(r.id()))
            .collect()
    }

    pub fn insert_raw<'a>(&mut self, rows: impl IntoIterator<Item = &'a RawStatement>) {
        for row in rows {
            self.raw.entry(row.id()).or_insert_with(|| row.clone());
        }
    }

    pub fn select_raw(&self, filter: &RawFilter, after: Option<RawId>, limit: usize) -> Vec<RawStatement> {
        self.raw
            .range((after.map_or(Unbounded, Excluded), Unbounded))
            .map(|(_, r)| r)
            .filter(|r| filter.matches(r, self.evidence.contains_key(&r.id())))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn fetch_raw(&self, ids: &BTreeSet<RawId>) -> Vec<RawStatement> {
        ids.iter().filter_map(|id| self.raw.get(id)).cloned().collect()
    }

    pub fn existing_fingerprints(&self, candidates: &BTreeSet<Fingerprint>) -> BTreeSet<Fingerprint> {
        candidates
            .iter()
            .filter(|fp| self.unique.contains_key(fp))
            .copied()
            .collect()
    }

    pub fn linked_raw_ids(&self, ids: &BTreeSet<RawId>) -> BTreeSet<RawId> {
        ids.iter()
            .filter(|id| self.evidence.contains_key(id))
            .copied()
            .collect()
    }

    pub fn select_unique(&self, after: Option<Fingerprint>, limit: usize) -> Vec<UniqueStatement> {
        self.unique
            .range((after.map_or(Unbounded, Excluded), Unbounded))
            .map(|(_, stmt)| stmt)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn evidence_links(&self) -> Vec<EvidenceLink> {
        self.evidence
            .iter()
            .map(|(raw_id, fingerprint)| EvidenceLink {
                raw_id: *raw_id,
                fingerprint: *fingerprint,
            })
            .collect()
    }

    pub fn counts(&self) -> CorpusCounts {
        CorpusCounts {
            raw: self.raw.len(),
            unique: self.unique.len(),
            evidence_links: self.evidence.len(),
            support_links: self.support.len(),
        }
    }

    /// Reject a batch that would leave the tables inconsistent.
    pub fn check(&self, batch: &CorpusBatch) -> Result<()> {
        let mut incoming: BTreeSet<Fingerprint> = BTreeSet::new();
        for stmt in &batch.unique {
            let fingerprint = preassembly_core::fingerprint(stmt.kind(), stmt.agents());
            if fingerprint != stmt.fingerprint() {
                return Err(StoreError::Integrity(format!(
                    "unique statement {} does not match its content",
                    stmt.fingerprint()
                )));
            }
            incoming.insert(fingerprint);
        }
        let known = |fp: &Fingerprint| self.unique.contains_key(fp) || incoming.contains(fp);

        let mut linked: BTreeMap<RawId, Fingerprint> = BTreeMap::new();
        for link in &batch.evidence_links {
            if !self.raw.contains_key(&link.raw_id) {
                return Err(StoreError::Integrity(format!(
                    "evidence link from unknown raw statement {}",
                    link.raw_id
                )));
            }
            if !known(&link.fingerprint) {
                return Err(StoreError::Integrity(format!(
                    "evidence link to unknown unique statement {}",
                    link.fingerprint
                )));
            }
            let previous = self
                .evidence
                .get(&link.raw_id)
                .or_else(|| linked.get(&link.raw_id));
            if previous.map_or(false, |fp| *fp != link.fingerprint) {
                return Err(StoreError::Integrity(format!(
                    "raw statement {} is already evidence for another statement",
                    link.raw_id
                )));
            }
            linked.insert(link.raw_id, link.fingerprint);
        }

        let incoming_support: BTreeSet<SupportLink> = batch.support_links.iter().copied().collect();
        for link in &batch.support_links {
            if link.from == link.to {
                return Err(StoreError::Integrity(format!(
                    "self support link on {}",
                    link.from
                )));
            }
            if !known(&link.from) || !known(&link.to) {
                return Err(StoreError::Integrity(format!(
                    "support link {} -> {} has an unknown endpoint",
                    link.from, link.to
                )));
            }
            let reverse = SupportLink {
                from: link.to,
                to: link.from,
            };
            if self.support.contains(&reverse) || incoming_support.contains(&reverse) {
                return Err(StoreError::Integrity(format!(
                    "support links {} <-> {} would form a cycle",
                    link.from, link.to
                )));
            }
        }
        Ok(())
    }

    /// Apply a checked batch.
    pub fn apply(&mut self, batch: CorpusBatch) {
        for stmt in batch.unique {
            self.unique.entry(stmt.fingerprint()).or_insert(stmt);
        }
        for link in batch.evidence_links {
            self.evidence.insert(link.raw_id, link.fingerprint);
        }
        self.support.extend(batch.support_links);
    }
}
