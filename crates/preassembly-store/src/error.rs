use preassembly_core::OntologyError;

/// Errors raised by corpus storage and the corpus manager.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ontology error: {0}")]
    Ontology(#[from] OntologyError),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("corpus already holds {unique} unique statements; supplement it instead")]
    CorpusExists { unique: usize },

    #[error("batch {batch} failed and was not committed: {source}")]
    BatchFailed {
        batch: usize,
        #[source]
        source: Box<StoreError>,
    },

    #[error("worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
