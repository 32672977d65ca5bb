//! Volatile backend for tests and one-shot assembly runs.

use parking_lot::RwLock;
use preassembly_core::{EvidenceLink, Fingerprint, RawId, RawStatement, SupportLink, UniqueStatement};
use std::collections::BTreeSet;

use crate::backend::{CorpusBackend, CorpusBatch, CorpusCounts, RawFilter};
use crate::error::Result;
use crate::tables::Tables;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CorpusBackend for MemoryBackend {
    fn insert_raw(&self, rows: &[RawStatement]) -> Result<usize> {
        let mut tables = self.tables.write();
        let fresh = tables.new_raw(rows);
        let inserted = fresh.len();
        tables.insert_raw(fresh);
        Ok(inserted)
    }

    fn raw_count(&self) -> Result<usize> {
        Ok(self.tables.read().raw.len())
    }

    fn select_raw(&self, filter: &RawFilter, after: Option<RawId>, limit: usize) -> Result<Vec<RawStatement>> {
        Ok(self.tables.read().select_raw(filter, after, limit))
    }

    fn fetch_raw(&self, ids: &BTreeSet<RawId>) -> Result<Vec<RawStatement>> {
        Ok(self.tables.read().fetch_raw(ids))
    }

    fn existing_fingerprints(&self, candidates: &BTreeSet<Fingerprint>) -> Result<BTreeSet<Fingerprint>> {
        Ok(self.tables.read().existing_fingerprints(candidates))
    }

    fn linked_raw_ids(&self, ids: &BTreeSet<RawId>) -> Result<BTreeSet<RawId>> {
        Ok(self.tables.read().linked_raw_ids(ids))
    }

    fn unique_count(&self) -> Result<usize> {
        Ok(self.tables.read().unique.len())
    }

    fn select_unique(&self, after: Option<Fingerprint>, limit: usize) -> Result<Vec<UniqueStatement>> {
        Ok(self.tables.read().select_unique(after, limit))
    }

    fn select_evidence_links(&self) -> Result<Vec<EvidenceLink>> {
        Ok(self.tables.read().evidence_links())
    }

    fn select_support_links(&self) -> Result<Vec<SupportLink>> {
        Ok(self.tables.read().support.iter().copied().collect())
    }

    fn commit(&self, batch: CorpusBatch) -> Result<()> {
        let mut tables = self.tables.write();
        tables.check(&batch)?;
        tables.apply(batch);
        Ok(())
    }

    fn counts(&self) -> Result<CorpusCounts> {
        Ok(self.tables.read().counts())
    }
}
