use preassembly_core::{ReaderPreference, RelevanceFilter};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, StoreError};

/// Configuration for corpus creation and supplementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Raw statements read, deduplicated and committed per batch.
    pub batch_size: usize,
    /// Reader order used when distilling per-document duplicates.
    pub reader_preference: ReaderPreference,
    /// Collapse per-document duplicates before folding statements in.
    pub distill: bool,
    /// Rayon worker threads; 0 uses the rayon default.
    pub workers: usize,
    /// Relevance filters applied to incoming raw statements.
    pub filters: Vec<RelevanceFilter>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            reader_preference: ReaderPreference::default(),
            distill: true,
            workers: 0,
            filters: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Read a JSON config file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: StoreConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(StoreError::Config("batch_size must be at least 1".into()));
        }
        Ok(())
    }
}
