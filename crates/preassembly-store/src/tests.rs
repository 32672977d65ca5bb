//! Tests for the corpus store backends and manager

use super::*;
use crate::file::{frame, WalRecord};
use preassembly_core::{
    process, Agent, EmptyOntology, Evidence, EvidenceLink, Fingerprint, Grounding, Hierarchy,
    Origin, RawId, RawStatement, RelevanceFilter, StatementKind, SupportLink, TextType,
    UniqueStatement,
};
use std::collections::BTreeSet;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;
use uuid::Uuid;

fn kinase(idx: usize) -> Agent {
    match idx {
        0 => Agent::new("BRAF").with_ref("HGNC", "1097"),
        1 => Agent::new("ARAF").with_ref("HGNC", "646"),
        2 => Agent::new("RAF").with_ref("FPLX", "RAF"),
        _ => Agent::new("MAP3K1").with_ref("HGNC", "6848"),
    }
}

fn raw(id: u128, kinase_idx: usize, reader: &str, doc: &str) -> RawStatement {
    RawStatement::new(
        StatementKind::Phosphorylation,
        vec![kinase(kinase_idx), Agent::new("MAP2K1").with_ref("HGNC", "6840")],
        Evidence::new(reader).with_text(format!("{doc} sentence")),
    )
    .unwrap()
    .with_id(Uuid::from_u128(id))
    .with_origin(Origin::Reading {
        document_id: doc.to_string(),
        reader: reader.to_string(),
        reader_version: "1.0".to_string(),
        text_type: TextType::Abstract,
    })
}

fn hierarchy() -> Hierarchy {
    Hierarchy::from_edges([
        (Grounding::new("HGNC", "1097"), Grounding::new("FPLX", "RAF")),
        (Grounding::new("HGNC", "646"), Grounding::new("FPLX", "RAF")),
    ])
}

/// Raw statements spread over documents so that nothing is distilled away.
fn sample() -> Vec<RawStatement> {
    (0..12u128)
        .map(|i| raw(i + 1, (i % 4) as usize, "reach", &format!("pmid:{i}")))
        .collect()
}

fn no_distill(batch_size: usize) -> StoreConfig {
    StoreConfig {
        batch_size,
        distill: false,
        ..StoreConfig::default()
    }
}

fn unique_of(stmt: &RawStatement) -> UniqueStatement {
    UniqueStatement::from_raw(stmt)
}

/// A batch that folds `stmt` in as its own unique statement.
fn batch_of(stmt: &RawStatement) -> CorpusBatch {
    CorpusBatch {
        unique: vec![unique_of(stmt)],
        evidence_links: vec![EvidenceLink {
            raw_id: stmt.id(),
            fingerprint: stmt.fingerprint(),
        }],
        support_links: vec![],
    }
}

fn wal_len(dir: &std::path::Path) -> u64 {
    std::fs::metadata(dir.join("corpus.wal")).unwrap().len()
}

// ============================================================================
// Backends
// ============================================================================

#[test]
fn test_rejected_batch_leaves_no_trace() {
    let backend = MemoryBackend::new();
    let stmt = raw(1, 0, "reach", "pmid:1");
    backend.insert_raw(&[stmt.clone()]).unwrap();

    let bad = CorpusBatch {
        unique: vec![unique_of(&stmt)],
        evidence_links: vec![
            EvidenceLink {
                raw_id: stmt.id(),
                fingerprint: stmt.fingerprint(),
            },
            EvidenceLink {
                raw_id: Uuid::from_u128(99),
                fingerprint: stmt.fingerprint(),
            },
        ],
        support_links: vec![],
    };
    let err = backend.commit(bad).unwrap_err();
    assert!(matches!(err, StoreError::Integrity(_)));

    let counts = backend.counts().unwrap();
    assert_eq!(counts.unique, 0);
    assert_eq!(counts.evidence_links, 0);
}

#[test]
fn test_links_need_known_endpoints() {
    let backend = MemoryBackend::new();
    let a = raw(1, 0, "reach", "pmid:1");
    let b = raw(2, 2, "reach", "pmid:1");
    backend.insert_raw(&[a.clone(), b.clone()]).unwrap();

    let dangling = CorpusBatch {
        unique: vec![unique_of(&a)],
        evidence_links: vec![],
        support_links: vec![SupportLink {
            from: a.fingerprint(),
            to: b.fingerprint(),
        }],
    };
    assert!(backend.commit(dangling).is_err());

    let self_link = CorpusBatch {
        unique: vec![unique_of(&a)],
        evidence_links: vec![],
        support_links: vec![SupportLink {
            from: a.fingerprint(),
            to: a.fingerprint(),
        }],
    };
    assert!(backend.commit(self_link).is_err());
}

#[test]
fn test_first_writer_wins_and_raw_maps_once() {
    let backend = MemoryBackend::new();
    let first = raw(1, 0, "reach", "pmid:1");
    let renamed = {
        let mut agents = first.agents().to_vec();
        agents[0].name = "B-Raf".into();
        RawStatement::new(first.kind(), agents, Evidence::new("sparser"))
            .unwrap()
            .with_id(Uuid::from_u128(2))
    };
    assert_eq!(first.fingerprint(), renamed.fingerprint());
    backend.insert_raw(&[first.clone(), renamed.clone()]).unwrap();

    for stmt in [&first, &renamed] {
        backend
            .commit(CorpusBatch {
                unique: vec![unique_of(stmt)],
                evidence_links: vec![EvidenceLink {
                    raw_id: stmt.id(),
                    fingerprint: stmt.fingerprint(),
                }],
                support_links: vec![],
            })
            .unwrap();
    }
    let stored = backend.select_unique(None, 10).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].agents()[0].name, "BRAF");
    assert_eq!(backend.select_evidence_links().unwrap().len(), 2);

    let other = raw(3, 2, "reach", "pmid:1");
    backend.insert_raw(&[other.clone()]).unwrap();
    let relink = CorpusBatch {
        unique: vec![unique_of(&other)],
        evidence_links: vec![EvidenceLink {
            raw_id: first.id(),
            fingerprint: other.fingerprint(),
        }],
        support_links: vec![],
    };
    assert!(matches!(backend.commit(relink), Err(StoreError::Integrity(_))));
}

#[test]
fn test_insert_raw_skips_known_ids() {
    let backend = MemoryBackend::new();
    let stmts = sample();
    assert_eq!(backend.insert_raw(&stmts).unwrap(), stmts.len());
    assert_eq!(backend.insert_raw(&stmts[..3]).unwrap(), 0);
    assert_eq!(backend.raw_count().unwrap(), stmts.len());

    let page = backend
        .select_raw(&RawFilter::unlinked(), Some(Uuid::from_u128(2)), 3)
        .unwrap();
    let ids: Vec<u128> = page.iter().map(|r| r.id().as_u128()).collect();
    assert_eq!(ids, vec![3, 4, 5]);
}

#[test]
fn test_paging_by_key_visits_each_row_once() {
    let backend = MemoryBackend::new();
    let stmts = sample();
    backend.insert_raw(&stmts).unwrap();
    // Link every third statement so the unlinked filter leaves gaps.
    for stmt in stmts.iter().step_by(3) {
        backend.commit(batch_of(stmt)).unwrap();
    }

    let mut seen = Vec::new();
    let mut after = None;
    loop {
        let page = backend.select_raw(&RawFilter::unlinked(), after, 2).unwrap();
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.id());
        seen.extend(page.iter().map(|r| r.id().as_u128()));
    }
    let expected: Vec<u128> = (1..=12).filter(|i| (i - 1) % 3 != 0).collect();
    assert_eq!(seen, expected);

    let mut fingerprints = Vec::new();
    let mut after = None;
    loop {
        let page = backend.select_unique(after, 1).unwrap();
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.fingerprint());
        fingerprints.push(last.fingerprint());
    }
    let stored: Vec<_> = backend
        .select_unique(None, usize::MAX)
        .unwrap()
        .iter()
        .map(UniqueStatement::fingerprint)
        .collect();
    assert_eq!(fingerprints.len(), 4);
    assert_eq!(fingerprints, stored);
}

// ============================================================================
// File backend durability
// ============================================================================

#[test]
fn test_file_backend_recovers_committed_batches() {
    let dir = tempdir().unwrap();
    let stmt = raw(1, 0, "reach", "pmid:1");
    {
        let backend = FileBackend::open(dir.path()).unwrap();
        backend.insert_raw(&[stmt.clone()]).unwrap();
        backend
            .commit(CorpusBatch {
                unique: vec![unique_of(&stmt)],
                evidence_links: vec![EvidenceLink {
                    raw_id: stmt.id(),
                    fingerprint: stmt.fingerprint(),
                }],
                support_links: vec![],
            })
            .unwrap();
    }

    let backend = FileBackend::open(dir.path()).unwrap();
    let counts = backend.counts().unwrap();
    assert_eq!(counts.raw, 1);
    assert_eq!(counts.unique, 1);
    assert_eq!(counts.evidence_links, 1);
    assert_eq!(backend.fetch_raw(&[stmt.id()].into()).unwrap(), vec![stmt]);
}

#[test]
fn test_torn_batch_is_ignored_on_recovery() {
    let dir = tempdir().unwrap();
    let stmt = raw(1, 0, "reach", "pmid:1");
    {
        let backend = FileBackend::open(dir.path()).unwrap();
        backend.insert_raw(&[stmt.clone()]).unwrap();
    }

    // A batch that never reached its commit marker, then half a record.
    let torn = frame(&[
        WalRecord::Begin {
            batch: 2,
            timestamp: 0,
        },
        WalRecord::Unique {
            batch: 2,
            stmt: unique_of(&stmt),
        },
        WalRecord::Evidence {
            batch: 2,
            link: EvidenceLink {
                raw_id: stmt.id(),
                fingerprint: stmt.fingerprint(),
            },
        },
    ])
    .unwrap();
    let wal_path = dir.path().join("corpus.wal");
    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&wal_path).unwrap();
        file.write_all(&torn).unwrap();
        file.write_all(&[7, 0, 0]).unwrap();
    }

    let backend = FileBackend::open(dir.path()).unwrap();
    let counts = backend.counts().unwrap();
    assert_eq!(counts.raw, 1);
    assert_eq!(counts.unique, 0);
    assert_eq!(counts.evidence_links, 0);

    // The store stays writable, and the next batch does not reuse the torn id.
    backend
        .commit(CorpusBatch {
            unique: vec![unique_of(&stmt)],
            evidence_links: vec![EvidenceLink {
                raw_id: stmt.id(),
                fingerprint: stmt.fingerprint(),
            }],
            support_links: vec![],
        })
        .unwrap();
    drop(backend);

    let backend = FileBackend::open(dir.path()).unwrap();
    assert_eq!(backend.counts().unwrap().unique, 1);
    assert_eq!(backend.counts().unwrap().evidence_links, 1);
}

#[test]
fn test_checkpoint_compacts_log() {
    let dir = tempdir().unwrap();
    let stmts = sample();
    {
        let backend = FileBackend::open(dir.path()).unwrap();
        let manager = CorpusManager::new(backend, hierarchy(), no_distill(5)).unwrap();
        manager.ingest(&stmts[..8]).unwrap();
        manager.create_corpus().unwrap();
        manager.backend().checkpoint().unwrap();
        assert_eq!(std::fs::metadata(dir.path().join("corpus.wal")).unwrap().len(), 0);

        manager.ingest(&stmts[8..]).unwrap();
        manager.supplement_corpus().unwrap();
    }

    let backend = FileBackend::open(dir.path()).unwrap();
    let manager = CorpusManager::new(backend, hierarchy(), no_distill(5)).unwrap();
    let corpus = manager.load_corpus().unwrap();
    assert_eq!(corpus, process(&stmts, &hierarchy()));
}

#[test]
fn test_failed_append_is_rolled_back() {
    // Nothing written, a cut length header, and a cut record body.
    for limit in [0, 2, 9, 60] {
        let dir = tempdir().unwrap();
        let first = raw(1, 0, "reach", "pmid:1");
        let failed = raw(2, 2, "reach", "pmid:1");
        let after = raw(3, 3, "reach", "pmid:1");
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend
                .insert_raw(&[first.clone(), failed.clone(), after.clone()])
                .unwrap();
            backend.commit(batch_of(&first)).unwrap();
            let before = wal_len(dir.path());

            backend.fail_next_append_after(limit);
            let err = backend.commit(batch_of(&failed)).unwrap_err();
            assert!(matches!(err, StoreError::Io(_)), "limit {limit}");
            assert_eq!(wal_len(dir.path()), before, "limit {limit}");
            assert_eq!(backend.unique_count().unwrap(), 1);

            backend.commit(batch_of(&after)).unwrap();
        }

        let backend = FileBackend::open(dir.path()).unwrap();
        let candidates = BTreeSet::from([first.fingerprint(), failed.fingerprint(), after.fingerprint()]);
        let stored = backend.existing_fingerprints(&candidates).unwrap();
        assert_eq!(
            stored,
            BTreeSet::from([first.fingerprint(), after.fingerprint()]),
            "limit {limit}"
        );
        assert_eq!(backend.counts().unwrap().evidence_links, 2);
    }
}

#[test]
fn test_rows_left_under_a_reused_batch_id_are_dropped() {
    let dir = tempdir().unwrap();
    let kept = raw(1, 0, "reach", "pmid:1");
    let ghost = raw(2, 2, "reach", "pmid:1");
    {
        let backend = FileBackend::open(dir.path()).unwrap();
        backend.insert_raw(&[kept.clone(), ghost.clone()]).unwrap();

        // An unfinished write that claimed the id the next commit will use.
        let stray = frame(&[
            WalRecord::Begin {
                batch: 2,
                timestamp: 0,
            },
            WalRecord::Unique {
                batch: 2,
                stmt: unique_of(&ghost),
            },
        ])
        .unwrap();
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("corpus.wal"))
            .unwrap();
        file.write_all(&stray).unwrap();
        drop(file);

        backend.commit(batch_of(&kept)).unwrap();
    }

    let backend = FileBackend::open(dir.path()).unwrap();
    let stored = backend.select_unique(None, 10).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].fingerprint(), kept.fingerprint());
}

#[test]
fn test_oversized_length_header_is_a_torn_tail() {
    let dir = tempdir().unwrap();
    let stmt = raw(1, 0, "reach", "pmid:1");
    let before = {
        let backend = FileBackend::open(dir.path()).unwrap();
        backend.insert_raw(&[stmt.clone()]).unwrap();
        backend.commit(batch_of(&stmt)).unwrap();
        wal_len(dir.path())
    };
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("corpus.wal"))
            .unwrap();
        file.write_all(&[0xff, 0xff, 0xff, 0xff, 1, 2, 3]).unwrap();
    }

    let later = raw(2, 2, "reach", "pmid:2");
    {
        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(wal_len(dir.path()), before);
        assert_eq!(backend.counts().unwrap().unique, 1);
        assert_eq!(backend.counts().unwrap().evidence_links, 1);

        backend.insert_raw(&[later.clone()]).unwrap();
        backend.commit(batch_of(&later)).unwrap();
    }

    let backend = FileBackend::open(dir.path()).unwrap();
    let counts = backend.counts().unwrap();
    assert_eq!(counts.raw, 2);
    assert_eq!(counts.unique, 2);
    assert_eq!(counts.evidence_links, 2);
}

// ============================================================================
// Corpus manager
// ============================================================================

#[test]
fn test_create_twice_is_an_error() {
    let manager = CorpusManager::new(MemoryBackend::new(), hierarchy(), no_distill(4)).unwrap();
    manager.ingest(&sample()).unwrap();
    manager.create_corpus().unwrap();
    let err = manager.create_corpus().unwrap_err();
    assert!(matches!(err, StoreError::CorpusExists { .. }));
}

#[test]
fn test_batch_size_does_not_change_the_corpus() {
    let stmts = sample();
    let expected = process(&stmts, &hierarchy());
    for batch_size in [1, 2, 5, 100] {
        let manager =
            CorpusManager::new(MemoryBackend::new(), hierarchy(), no_distill(batch_size)).unwrap();
        manager.ingest(&stmts).unwrap();
        let report = manager.create_corpus().unwrap();
        assert_eq!(report.batches, stmts.len().div_ceil(batch_size));
        assert_eq!(report.folded, stmts.len());
        assert_eq!(manager.load_corpus().unwrap(), expected, "batch_size {batch_size}");
    }
}

#[test]
fn test_supplement_folds_only_new_statements() {
    let stmts = sample();
    let manager = CorpusManager::new(MemoryBackend::new(), hierarchy(), no_distill(3)).unwrap();
    manager.ingest(&stmts[..9]).unwrap();
    let created = manager.create_corpus().unwrap();
    assert_eq!(created.folded, 9);

    manager.ingest(&stmts[9..]).unwrap();
    let supplemented = manager.supplement_corpus().unwrap();
    assert_eq!(supplemented.considered, 3);
    assert_eq!(supplemented.new_unique, 0);

    let idle = manager.supplement_corpus().unwrap();
    assert_eq!(idle.considered, 0);
    assert_eq!(idle.batches, 0);

    let corpus = manager.load_corpus().unwrap();
    let expected = process(&stmts, &hierarchy());
    assert_eq!(corpus.evidence_links, expected.evidence_links);
    assert_eq!(corpus.support_links, expected.support_links);
}

#[test]
fn test_distillation_keeps_one_copy_per_document() {
    let stmts = vec![
        raw(1, 0, "sparser", "pmid:1"),
        raw(2, 0, "reach", "pmid:1"),
        raw(3, 0, "reach", "pmid:2"),
    ];
    let config = StoreConfig {
        batch_size: 2,
        ..StoreConfig::default()
    };
    let manager = CorpusManager::new(MemoryBackend::new(), EmptyOntology, config).unwrap();
    manager.ingest(&stmts).unwrap();
    let report = manager.create_corpus().unwrap();
    assert_eq!(report.considered, 3);
    assert_eq!(report.distilled_out, 1);

    let linked: Vec<u128> = manager
        .backend()
        .select_evidence_links()
        .unwrap()
        .iter()
        .map(|l| l.raw_id.as_u128())
        .collect();
    assert_eq!(linked, vec![2, 3]);

    // Copies of already-linked facts from the same document are dropped,
    // including the one that lost the first round.
    manager.ingest(&[raw(4, 0, "reach", "pmid:2")]).unwrap();
    let report = manager.supplement_corpus().unwrap();
    assert_eq!(report.considered, 2);
    assert_eq!(report.distilled_out, 2);
    assert_eq!(report.folded, 0);
    assert_eq!(manager.backend().select_evidence_links().unwrap().len(), 2);
}

#[test]
fn test_model_filter_uses_stored_agents() {
    let config = StoreConfig {
        batch_size: 10,
        distill: false,
        filters: vec![RelevanceFilter::ModelAll],
        ..StoreConfig::default()
    };
    let manager = CorpusManager::new(MemoryBackend::new(), hierarchy(), config).unwrap();
    manager.ingest(&[raw(1, 0, "reach", "pmid:1")]).unwrap();
    // An empty model disables the filter.
    assert_eq!(manager.create_corpus().unwrap().folded, 1);

    manager
        .ingest(&[raw(2, 0, "sparser", "pmid:2"), raw(3, 3, "reach", "pmid:3")])
        .unwrap();
    let report = manager.supplement_corpus().unwrap();
    assert_eq!(report.folded, 1);
    assert_eq!(report.filtered, 1);
}

/// Memory backend whose commits start failing after a set number succeed.
struct FlakyBackend {
    inner: MemoryBackend,
    commits_left: AtomicUsize,
}

impl CorpusBackend for FlakyBackend {
    fn insert_raw(&self, rows: &[RawStatement]) -> Result<usize> {
        self.inner.insert_raw(rows)
    }
    fn raw_count(&self) -> Result<usize> {
        self.inner.raw_count()
    }
    fn select_raw(&self, filter: &RawFilter, after: Option<RawId>, limit: usize) -> Result<Vec<RawStatement>> {
        self.inner.select_raw(filter, after, limit)
    }
    fn fetch_raw(&self, ids: &BTreeSet<RawId>) -> Result<Vec<RawStatement>> {
        self.inner.fetch_raw(ids)
    }
    fn existing_fingerprints(&self, candidates: &BTreeSet<Fingerprint>) -> Result<BTreeSet<Fingerprint>> {
        self.inner.existing_fingerprints(candidates)
    }
    fn linked_raw_ids(&self, ids: &BTreeSet<RawId>) -> Result<BTreeSet<RawId>> {
        self.inner.linked_raw_ids(ids)
    }
    fn unique_count(&self) -> Result<usize> {
        self.inner.unique_count()
    }
    fn select_unique(&self, after: Option<Fingerprint>, limit: usize) -> Result<Vec<UniqueStatement>> {
        self.inner.select_unique(after, limit)
    }
    fn select_evidence_links(&self) -> Result<Vec<EvidenceLink>> {
        self.inner.select_evidence_links()
    }
    fn select_support_links(&self) -> Result<Vec<SupportLink>> {
        self.inner.select_support_links()
    }
    fn commit(&self, batch: CorpusBatch) -> Result<()> {
        let left = self.commits_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.commits_left.store(left - 1, Ordering::SeqCst);
        self.inner.commit(batch)
    }
}

#[test]
fn test_failed_batch_is_reported_and_absent() {
    let backend = FlakyBackend {
        inner: MemoryBackend::new(),
        commits_left: AtomicUsize::new(1),
    };
    let manager = CorpusManager::new(backend, hierarchy(), no_distill(4)).unwrap();
    let stmts = sample();
    manager.ingest(&stmts).unwrap();

    let err = manager.create_corpus().unwrap_err();
    assert!(matches!(err, StoreError::BatchFailed { batch: 1, .. }));
    assert_eq!(manager.backend().select_evidence_links().unwrap().len(), 4);

    // Once the backend recovers, supplementing picks up where it stopped.
    manager.backend().commits_left.store(usize::MAX, Ordering::SeqCst);
    manager.supplement_corpus().unwrap();
    assert_eq!(manager.load_corpus().unwrap(), process(&stmts, &hierarchy()));
}

#[test]
fn test_config_defaults_and_validation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"batch_size": 250, "filters": ["grounding"]}"#).unwrap();
    let config = StoreConfig::load(&path).unwrap();
    assert_eq!(config.batch_size, 250);
    assert!(config.distill);
    assert_eq!(config.filters, vec![RelevanceFilter::Grounding]);

    std::fs::write(&path, r#"{"batch_size": 0}"#).unwrap();
    assert!(matches!(StoreConfig::load(&path), Err(StoreError::Config(_))));

    let manager = CorpusManager::new(MemoryBackend::new(), EmptyOntology, StoreConfig {
        workers: 2,
        ..no_distill(3)
    })
    .unwrap();
    manager.ingest(&sample()).unwrap();
    assert_eq!(manager.create_corpus().unwrap().folded, 12);
}
