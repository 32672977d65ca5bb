//! Durable directory backend: snapshot + write-ahead log.
//!
//! ```text
//!   <dir>/snapshot.bin   bincode image of every table at the last checkpoint
//!   <dir>/corpus.wal     framed records appended since then:
//!
//!   [len u32 LE][bincode WalRecord] ...
//!
//!   Begin{7} Raw.. Unique.. Evidence.. Support.. Commit{7}   applied on open
//!   Begin{8} Unique.. Evidence..                              torn: ignored
//! ```
//!
//! Every write is one batch: the records are framed into a single buffer,
//! appended, and synced before the in-memory tables change. A failed append
//! is cut back off the log. On open, only batches that reached their commit
//! marker are replayed, and any partial record at the tail is cut off.

use parking_lot::{Mutex, RwLock};
use preassembly_core::{
    EvidenceLink, Fingerprint, RawId, RawStatement, SupportLink, UniqueStatement,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::{CorpusBackend, CorpusBatch, CorpusCounts, RawFilter};
use crate::error::Result;
use crate::tables::Tables;

const WAL_FILE: &str = "corpus.wal";
const SNAPSHOT_FILE: &str = "snapshot.bin";

// ============================================================================
// Write-Ahead Log
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum WalRecord {
    Begin { batch: u64, timestamp: i64 },
    Raw { batch: u64, stmt: RawStatement },
    Unique { batch: u64, stmt: UniqueStatement },
    Evidence { batch: u64, link: EvidenceLink },
    Support { batch: u64, link: SupportLink },
    Commit { batch: u64 },
}

impl WalRecord {
    fn batch(&self) -> u64 {
        match self {
            WalRecord::Begin { batch, .. }
            | WalRecord::Raw { batch, .. }
            | WalRecord::Unique { batch, .. }
            | WalRecord::Evidence { batch, .. }
            | WalRecord::Support { batch, .. }
            | WalRecord::Commit { batch } => *batch,
        }
    }
}

pub(crate) fn frame(records: &[WalRecord]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    for record in records {
        let data = bincode::serialize(record)?;
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&data);
    }
    Ok(buf)
}

/// Batches recovered from a log, plus where its valid prefix ends.
struct Replay {
    committed: Vec<(u64, Vec<WalRecord>)>,
    torn: usize,
    last_batch: u64,
    valid_len: u64,
}

struct WriteAheadLog {
    file: Mutex<File>,
    path: PathBuf,
    /// Set when a failed append could not be rolled back; the log then
    /// refuses writes until the store is reopened and replayed.
    poisoned: AtomicBool,
    #[cfg(test)]
    fail_after: Mutex<Option<usize>>,
}

impl WriteAheadLog {
    fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            poisoned: AtomicBool::new(false),
            #[cfg(test)]
            fail_after: Mutex::new(None),
        })
    }

    /// Append `bytes` and sync. On failure the log is cut back to its
    /// previous length, so a batch is never left half-written.
    fn append(&self, bytes: &[u8]) -> std::io::Result<()> {
        if self.poisoned.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                ErrorKind::Other,
                "write-ahead log is unusable after a failed rollback; reopen the store",
            ));
        }
        let mut file = self.file.lock();
        let start = file.metadata()?.len();
        let written = self
            .write_frames(&mut file, bytes)
            .and_then(|()| file.sync_data());
        if let Err(err) = written {
            match file.set_len(start).and_then(|()| file.sync_data()) {
                Ok(()) => {
                    tracing::warn!(path = %self.path.display(), error = %err, "append failed; log rolled back")
                }
                Err(rollback) => {
                    self.poisoned.store(true, Ordering::SeqCst);
                    tracing::error!(
                        path = %self.path.display(),
                        error = %err,
                        rollback = %rollback,
                        "append failed and could not be rolled back; refusing further writes"
                    );
                }
            }
            return Err(err);
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn write_frames(&self, file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
        file.write_all(bytes)
    }

    #[cfg(test)]
    fn write_frames(&self, file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
        match self.fail_after.lock().take() {
            Some(limit) if limit < bytes.len() => {
                file.write_all(&bytes[..limit])?;
                Err(std::io::Error::new(ErrorKind::Other, "injected write failure"))
            }
            _ => file.write_all(bytes),
        }
    }

    fn replay(&self) -> std::io::Result<Replay> {
        let mut file = self.file.lock();
        let file_len = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;

        let mut open: BTreeMap<u64, Vec<WalRecord>> = BTreeMap::new();
        let mut committed = Vec::new();
        let mut abandoned = 0;
        let mut last_batch = 0;
        let mut valid_len = 0u64;

        loop {
            let mut len_bytes = [0u8; 4];
            match file.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_bytes) as u64;
            if len > file_len.saturating_sub(valid_len + 4) {
                // A length running past the end is a torn or corrupt tail.
                break;
            }

            let mut data = vec![0u8; len as usize];
            match file.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let record: WalRecord = match bincode::deserialize(&data) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(path = %self.path.display(), offset = valid_len, error = %err, "undecodable log record; ignoring the rest of the log");
                    break;
                }
            };
            valid_len += 4 + len;

            let batch = record.batch();
            last_batch = last_batch.max(batch);
            match record {
                WalRecord::Begin { .. } => {
                    // Rows left under this id by an earlier, unfinished write
                    // never belong to the batch that starts here.
                    if open.insert(batch, Vec::new()).is_some() {
                        abandoned += 1;
                    }
                }
                WalRecord::Commit { .. } => {
                    let records = open.remove(&batch).unwrap_or_default();
                    committed.push((batch, records));
                }
                other => open.entry(batch).or_default().push(other),
            }
        }

        Ok(Replay {
            committed,
            torn: open.len() + abandoned,
            last_batch,
            valid_len,
        })
    }

    fn truncate_to(&self, len: u64) -> std::io::Result<()> {
        let file = self.file.lock();
        file.set_len(len)?;
        file.sync_data()
    }
}

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Serialize, Deserialize)]
struct Snapshot {
    last_batch: u64,
    tables: Tables,
}

fn read_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let tmp = path.with_extension("bin.tmp");
    let data = bincode::serialize(snapshot)?;
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&data)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ============================================================================
// File backend
// ============================================================================

pub struct FileBackend {
    dir: PathBuf,
    wal: WriteAheadLog,
    tables: RwLock<Tables>,
    last_batch: Mutex<u64>,
}

impl FileBackend {
    /// Open (or create) the store in `dir` and recover its committed state.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let (mut last_batch, mut tables) = match read_snapshot(&dir.join(SNAPSHOT_FILE))? {
            Some(snapshot) => (snapshot.last_batch, snapshot.tables),
            None => (0, Tables::default()),
        };

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE))?;
        let replay = wal.replay()?;
        let file_len = wal.file.lock().metadata()?.len();
        if replay.valid_len < file_len {
            tracing::warn!(
                path = %dir.display(),
                discarded = file_len - replay.valid_len,
                "truncating partial record at end of log"
            );
            wal.truncate_to(replay.valid_len)?;
        }
        if replay.torn > 0 {
            tracing::warn!(path = %dir.display(), batches = replay.torn, "ignoring uncommitted batches");
        }

        let replayed = replay.committed.len();
        for (_, records) in replay.committed {
            apply_records(&mut tables, records);
        }
        last_batch = last_batch.max(replay.last_batch);

        tracing::info!(
            path = %dir.display(),
            replayed,
            raw = tables.raw.len(),
            unique = tables.unique.len(),
            "opened corpus store"
        );

        Ok(Self {
            dir,
            wal,
            tables: RwLock::new(tables),
            last_batch: Mutex::new(last_batch),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Make the next log append write only `bytes` bytes and then fail.
    #[cfg(test)]
    pub(crate) fn fail_next_append_after(&self, bytes: usize) {
        *self.wal.fail_after.lock() = Some(bytes);
    }

    /// Write a snapshot of the committed state and empty the log.
    pub fn checkpoint(&self) -> Result<()> {
        let tables = self.tables.read();
        let last_batch = *self.last_batch.lock();
        write_snapshot(
            &self.dir.join(SNAPSHOT_FILE),
            &Snapshot {
                last_batch,
                tables: tables.clone(),
            },
        )?;
        self.wal.truncate_to(0)?;
        tracing::info!(path = %self.dir.display(), last_batch, "checkpointed corpus store");
        Ok(())
    }

    /// Log `records` as one batch. The tables lock must be held for writing.
    fn log_batch(&self, body: impl FnOnce(u64) -> Vec<WalRecord>) -> Result<()> {
        let mut last_batch = self.last_batch.lock();
        let batch = *last_batch + 1;
        let mut records = vec![WalRecord::Begin {
            batch,
            timestamp: chrono::Utc::now().timestamp(),
        }];
        records.extend(body(batch));
        records.push(WalRecord::Commit { batch });
        let bytes = frame(&records)?;
        // Claimed before writing, so a failed append never hands its id on.
        *last_batch = batch;
        self.wal.append(&bytes)?;
        Ok(())
    }
}

fn apply_records(tables: &mut Tables, records: Vec<WalRecord>) {
    let mut batch = CorpusBatch::default();
    let mut raw = Vec::new();
    for record in records {
        match record {
            WalRecord::Raw { stmt, .. } => raw.push(stmt),
            WalRecord::Unique { stmt, .. } => batch.unique.push(stmt),
            WalRecord::Evidence { link, .. } => batch.evidence_links.push(link),
            WalRecord::Support { link, .. } => batch.support_links.push(link),
            WalRecord::Begin { .. } | WalRecord::Commit { .. } => {}
        }
    }
    tables.insert_raw(&raw);
    tables.apply(batch);
}

impl CorpusBackend for FileBackend {
    fn insert_raw(&self, rows: &[RawStatement]) -> Result<usize> {
        let mut tables = self.tables.write();
        let fresh = tables.new_raw(rows);
        if fresh.is_empty() {
            return Ok(0);
        }
        self.log_batch(|batch| {
            fresh
                .iter()
                .map(|stmt| WalRecord::Raw {
                    batch,
                    stmt: (*stmt).clone(),
                })
                .collect()
        })?;
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
        self.log_batch(|id| {
            let unique = batch
                .unique
                .iter()
                .filter(|stmt| !tables.unique.contains_key(&stmt.fingerprint()))
                .map(|stmt| WalRecord::Unique {
                    batch: id,
                    stmt: stmt.clone(),
                });
            let evidence = batch
                .evidence_links
                .iter()
                .map(|link| WalRecord::Evidence { batch: id, link: *link });
            let support = batch
                .support_links
                .iter()
                .map(|link| WalRecord::Support { batch: id, link: *link });
            unique.chain(evidence).chain(support).collect()
        })?;
        tables.apply(batch);
        Ok(())
    }

    fn counts(&self) -> Result<CorpusCounts> {
        Ok(self.tables.read().counts())
    }
}
