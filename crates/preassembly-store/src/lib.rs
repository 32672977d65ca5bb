//! Preassembly corpus store
//!
//! Batch-oriented persistence for preassembled corpora:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        CORPUS STORE                              │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  raw statements ──► ┌───────────────┐     ┌──────────────────┐   │
//! │   (ingest)          │    Corpus     │────►│  CorpusBackend   │   │
//! │                     │    Manager    │     │  ├ MemoryBackend │   │
//! │  ontology ────────► │ create /      │     │  └ FileBackend   │   │
//! │                     │ supplement    │     │     snapshot.bin │   │
//! │                     └───────────────┘     │     corpus.wal   │   │
//! │                                           └──────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **Atomic batches**: a batch of unique statements and links is written
//!   completely or not at all
//! - **First writer wins**: fingerprints are the identity key; a stored unique
//!   statement is never replaced
//! - **Batch-size independent**: batching bounds memory and never changes
//!   the resulting corpus

pub mod backend;
pub mod config;
pub mod error;
pub mod file;
pub mod manager;
pub mod memory;
mod tables;

#[cfg(test)]
mod tests;

pub use backend::{CorpusBackend, CorpusBatch, CorpusCounts, RawFilter};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use file::FileBackend;
pub use manager::{CorpusManager, CorpusReport};
pub use memory::MemoryBackend;
