//! The persistence boundary the corpus manager drives.

use chrono::{DateTime, Utc};
use preassembly_core::{EvidenceLink, Fingerprint, RawId, RawStatement, SupportLink, UniqueStatement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::Result;

/// Predicate for raw statement selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawFilter {
    /// Only raw statements without an evidence link.
    pub unlinked_only: bool,
    /// Only raw statements created strictly after this instant.
    pub created_after: Option<DateTime<Utc>>,
}

impl RawFilter {
    pub fn unlinked() -> Self {
        Self {
            unlinked_only: true,
            created_after: None,
        }
    }

    pub fn matches(&self, raw: &RawStatement, linked: bool) -> bool {
        if self.unlinked_only && linked {
            return false;
        }
        match self.created_after {
            Some(after) => raw.created_at() > after,
            None => true,
        }
    }
}

/// Rows written together by one [`CorpusBackend::commit`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusBatch {
    pub unique: Vec<UniqueStatement>,
    pub evidence_links: Vec<EvidenceLink>,
    pub support_links: Vec<SupportLink>,
}

impl CorpusBatch {
    pub fn is_empty(&self) -> bool {
        self.unique.is_empty() && self.evidence_links.is_empty() && self.support_links.is_empty()
    }
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusCounts {
    pub raw: usize,
    pub unique: usize,
    pub evidence_links: usize,
    pub support_links: usize,
}

/// Batch-insert, bulk-select and existence queries over the corpus tables.
///
/// Selections are in key order and page by key: pass the last key of one
/// page as `after` to get the next, so a full scan visits each row once.
pub trait CorpusBackend: Send + Sync {
    /// Insert raw statements atomically. Ids already present are skipped;
    /// returns how many were new.
    fn insert_raw(&self, rows: &[RawStatement]) -> Result<usize>;

    fn raw_count(&self) -> Result<usize>;

    /// Up to `limit` raw statements matching `filter` with an id greater
    /// than `after`, ordered by id.
    fn select_raw(&self, filter: &RawFilter, after: Option<RawId>, limit: usize) -> Result<Vec<RawStatement>>;

    /// The raw statements with these ids that exist, ordered by id.
    fn fetch_raw(&self, ids: &BTreeSet<RawId>) -> Result<Vec<RawStatement>>;

    /// The subset of `candidates` already stored as unique statements.
    fn existing_fingerprints(&self, candidates: &BTreeSet<Fingerprint>) -> Result<BTreeSet<Fingerprint>>;

    /// The subset of `ids` that already have an evidence link.
    fn linked_raw_ids(&self, ids: &BTreeSet<RawId>) -> Result<BTreeSet<RawId>>;

    fn unique_count(&self) -> Result<usize>;

    /// Up to `limit` unique statements with a fingerprint greater than
    /// `after`, ordered by fingerprint.
    fn select_unique(&self, after: Option<Fingerprint>, limit: usize) -> Result<Vec<UniqueStatement>>;

    fn select_evidence_links(&self) -> Result<Vec<EvidenceLink>>;

    fn select_support_links(&self) -> Result<Vec<SupportLink>>;

    /// Write a batch completely or not at all. Unique statements whose
    /// fingerprint is already stored are skipped; the first writer wins.
    fn commit(&self, batch: CorpusBatch) -> Result<()>;

    fn counts(&self) -> Result<CorpusCounts> {
        Ok(CorpusCounts {
            raw: self.raw_count()?,
            unique: self.unique_count()?,
            evidence_links: self.select_evidence_links()?.len(),
            support_links: self.select_support_links()?.len(),
        })
    }
}
