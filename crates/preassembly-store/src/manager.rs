//! Corpus creation and supplementation over a [`CorpusBackend`].
//!
//! Both operations share one fold-in path:
//!
//! ```text
//!   plan   page raw statements (batch_size at a time) into compact summaries,
//!          distill per document, keep the unlinked survivors
//!   batch  fetch → filter → deduplicate → reconcile against stored fingerprints
//!          → link new×new and stored×new (stored paged) → commit
//! ```
//!
//! Each batch is committed on its own, so statements folded in by earlier
//! batches are "stored" for later ones. The result equals deduplicating and
//! linking everything at once; the batch size only bounds memory.

use chrono::{DateTime, Utc};
use preassembly_core::{
    deduplicate, distill_ids, link, link_across, reconcile, AgentSet, Corpus, Distillable,
    Fingerprint, Ontology, Origin, RawId, RawStatement, RelevanceContext, RelevanceFilter,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::backend::{CorpusBackend, CorpusBatch, RawFilter};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};

/// What one create or supplement run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusReport {
    pub batches: usize,
    /// Unlinked raw statements the run looked at.
    pub considered: usize,
    /// Dropped as per-document duplicates of another raw statement.
    pub distilled_out: usize,
    /// Rejected by a relevance filter; they stay unlinked.
    pub filtered: usize,
    /// Raw statements that received an evidence link.
    pub folded: usize,
    pub new_unique: usize,
    pub evidence_links: usize,
    pub support_links: usize,
}

/// Just enough of a raw statement to distill it.
struct RawSummary {
    id: RawId,
    fingerprint: Fingerprint,
    origin: Origin,
    linked: bool,
    eligible: bool,
}

impl Distillable for RawSummary {
    fn raw_id(&self) -> RawId {
        self.id
    }

    fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    fn origin(&self) -> &Origin {
        &self.origin
    }

    fn is_linked(&self) -> bool {
        self.linked
    }
}

pub struct CorpusManager<B, O> {
    backend: B,
    ontology: O,
    config: StoreConfig,
    prior: AgentSet,
}

impl<B: CorpusBackend, O: Ontology> CorpusManager<B, O> {
    pub fn new(backend: B, ontology: O, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            ontology,
            config,
            prior: AgentSet::default(),
        })
    }

    /// Agents the prior relevance filters compare against.
    pub fn with_prior(mut self, prior: AgentSet) -> Self {
        self.prior = prior;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Add raw statements to the store without linking them.
    pub fn ingest(&self, raws: &[RawStatement]) -> Result<usize> {
        let inserted = self.backend.insert_raw(raws)?;
        tracing::info!(offered = raws.len(), inserted, "ingested raw statements");
        Ok(inserted)
    }

    /// Build the corpus from every raw statement in the store.
    pub fn create_corpus(&self) -> Result<CorpusReport> {
        let unique = self.backend.unique_count()?;
        if unique > 0 {
            return Err(StoreError::CorpusExists { unique });
        }
        tracing::info!(raw = self.backend.raw_count()?, "creating corpus");
        self.run(RawFilter::unlinked())
    }

    /// Fold every raw statement without an evidence link into the corpus.
    pub fn supplement_corpus(&self) -> Result<CorpusReport> {
        tracing::info!(unique = self.backend.unique_count()?, "supplementing corpus");
        self.run(RawFilter::unlinked())
    }

    /// Like [`supplement_corpus`](Self::supplement_corpus), restricted to raw
    /// statements created after `after`.
    pub fn supplement_since(&self, after: DateTime<Utc>) -> Result<CorpusReport> {
        tracing::info!(%after, "supplementing corpus");
        self.run(RawFilter {
            unlinked_only: true,
            created_after: Some(after),
        })
    }

    /// Materialise the stored unique statements and links.
    pub fn load_corpus(&self) -> Result<Corpus> {
        let mut corpus = Corpus::default();
        let mut after = None;
        loop {
            let page = self.backend.select_unique(after, self.config.batch_size)?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.fingerprint());
            corpus
                .unique
                .extend(page.into_iter().map(|stmt| (stmt.fingerprint(), stmt)));
        }
        corpus.evidence_links = self.backend.select_evidence_links()?.into_iter().collect();
        corpus.support_links = self.backend.select_support_links()?.into_iter().collect();
        Ok(corpus)
    }

    fn run(&self, filter: RawFilter) -> Result<CorpusReport> {
        if self.config.workers == 0 {
            return self.fold_in(filter);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()?;
        pool.install(|| self.fold_in(filter))
    }

    fn fold_in(&self, filter: RawFilter) -> Result<CorpusReport> {
        let mut report = CorpusReport::default();
        let pending = self.plan(&filter, &mut report)?;

        let relevance = RelevanceContext {
            prior: self.prior.clone(),
            model: self.model_agents()?,
        };

        for (index, chunk) in pending.chunks(self.config.batch_size).enumerate() {
            self.fold_batch(chunk, &relevance, &mut report)
                .map_err(|source| {
                    tracing::warn!(batch = index, error = %source, "batch failed; stopping");
                    StoreError::BatchFailed {
                        batch: index,
                        source: Box::new(source),
                    }
                })?;
            report.batches += 1;
            tracing::debug!(
                batch = index,
                folded = report.folded,
                unique = report.new_unique,
                links = report.support_links,
                "committed batch"
            );
        }

        tracing::info!(
            batches = report.batches,
            folded = report.folded,
            unique = report.new_unique,
            links = report.support_links,
            distilled_out = report.distilled_out,
            filtered = report.filtered,
            "corpus updated"
        );
        Ok(report)
    }

    /// Ids of the raw statements to fold in, in id order.
    fn plan(&self, filter: &RawFilter, report: &mut CorpusReport) -> Result<Vec<RawId>> {
        // Distillation needs linked statements too, to see which facts a
        // document already contributed.
        let scan = if self.config.distill {
            RawFilter::default()
        } else {
            *filter
        };

        let mut summaries = Vec::new();
        let mut after = None;
        loop {
            let page = self.backend.select_raw(&scan, after, self.config.batch_size)?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.id());
            let ids: BTreeSet<RawId> = page.iter().map(RawStatement::id).collect();
            let linked = self.backend.linked_raw_ids(&ids)?;
            summaries.extend(page.iter().map(|raw| {
                let is_linked = linked.contains(&raw.id());
                RawSummary {
                    id: raw.id(),
                    fingerprint: raw.fingerprint(),
                    origin: raw.origin().clone(),
                    linked: is_linked,
                    eligible: filter.matches(raw, is_linked),
                }
            }));
        }

        let eligible: Vec<RawId> = summaries
            .iter()
            .filter(|s| s.eligible)
            .map(|s| s.id)
            .collect();
        report.considered = eligible.len();

        if !self.config.distill {
            return Ok(eligible);
        }
        let (kept, stats) = distill_ids(&summaries, &self.config.reader_preference);
        let pending: Vec<RawId> = eligible.into_iter().filter(|id| kept.contains(id)).collect();
        report.distilled_out = report.considered - pending.len();
        tracing::debug!(
            documents = stats.documents,
            considered = report.considered,
            pending = pending.len(),
            "planned fold-in"
        );
        Ok(pending)
    }

    fn model_agents(&self) -> Result<AgentSet> {
        let wants_model = self
            .config
            .filters
            .iter()
            .any(|f| matches!(f, RelevanceFilter::ModelOne | RelevanceFilter::ModelAll));
        let mut model = AgentSet::default();
        if !wants_model {
            return Ok(model);
        }
        let mut after = None;
        loop {
            let page = self.backend.select_unique(after, self.config.batch_size)?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.fingerprint());
            for stmt in &page {
                for agent in stmt.agents() {
                    model.insert(agent);
                }
            }
        }
        Ok(model)
    }

    fn fold_batch(
        &self,
        ids: &[RawId],
        relevance: &RelevanceContext,
        report: &mut CorpusReport,
    ) -> Result<()> {
        let raws = self.backend.fetch_raw(&ids.iter().copied().collect())?;
        let fetched = raws.len();
        let raws = relevance.apply(raws, &self.config.filters, &self.ontology);
        let filtered = fetched - raws.len();
        if raws.is_empty() {
            report.filtered += filtered;
            return Ok(());
        }

        let dedup = deduplicate(&raws);
        let candidates: BTreeSet<Fingerprint> = dedup.unique.keys().copied().collect();
        let known = self.backend.existing_fingerprints(&candidates)?;
        let increment = reconcile(dedup, |fp| known.contains(fp));

        let mut support_links = BTreeSet::new();
        if !increment.new_unique.is_empty() {
            support_links = link(increment.new_unique.values(), &self.ontology);
            let mut after = None;
            loop {
                let page = self.backend.select_unique(after, self.config.batch_size)?;
                let Some(last) = page.last() else {
                    break;
                };
                after = Some(last.fingerprint());
                support_links.extend(link_across(
                    &page,
                    increment.new_unique.values(),
                    &self.ontology,
                ));
            }
        }

        let batch = CorpusBatch {
            unique: increment.new_unique.into_values().collect(),
            evidence_links: increment.evidence_links.into_iter().collect(),
            support_links: support_links.into_iter().collect(),
        };
        let (unique, evidence, support) = (
            batch.unique.len(),
            batch.evidence_links.len(),
            batch.support_links.len(),
        );
        self.backend.commit(batch)?;

        report.filtered += filtered;
        report.folded += raws.len();
        report.new_unique += unique;
        report.evidence_links += evidence;
        report.support_links += support;
        Ok(())
    }
}
