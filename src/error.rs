//! Error types shared across the extraction, storage and search layers.
//!
//! Each component has its own error enum. Caller-facing errors can be
//! bucketed with [`ErrorKind`] so a front end can tell bad input, a missing or
//! disabled session, and a genuine fault apart without parsing messages.

use thiserror::Error;
use uuid::Uuid;

/// Coarse classification of a failure, for rendering responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request itself was malformed (bad image, bad identifier, bad parameter).
    BadInput,
    /// The addressed resource does not exist.
    NotFound,
    /// The resource exists but the operation is refused.
    Forbidden,
    /// The service could not do its job (model missing, store unreachable).
    Fault,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("face recognition model is not loaded")]
    ModelNotReady,

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("face extraction failed: {0}")]
    ExtractionFailed(String),
}

impl ExtractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::InvalidImage(_) => ErrorKind::BadInput,
            ExtractError::ModelNotReady | ExtractError::ExtractionFailed(_) => ErrorKind::Fault,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),

    #[cfg(feature = "postgres")]
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("embedding has {actual} dimensions, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding contains non-finite values")]
    InvalidVector,

    #[error("store connection lock poisoned")]
    LockPoisoned,

    #[error("store misconfigured: {0}")]
    Misconfigured(String),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("storage I/O error for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error("catalog postgres error: {0}")]
    Postgres(#[from] postgres::Error),

    #[cfg(feature = "postgres")]
    #[error("catalog connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("catalog connection lock poisoned")]
    LockPoisoned,

    #[error("catalog misconfigured: {0}")]
    Misconfigured(String),
}

/// Faults that abort a whole indexing run. Per-photo problems are reported
/// on the batch report instead.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("face recognition model is not loaded")]
    ModelNotReady,

    #[error("failed to scan session photos: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IndexError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Fault
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error("search is not enabled for session {0}")]
    SearchNotEnabled(Uuid),

    #[error(transparent)]
    Extraction(ExtractError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl From<ExtractError> for SearchError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::InvalidImage(msg) => SearchError::InvalidImage(msg),
            other => SearchError::Extraction(other),
        }
    }
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::InvalidInput(_) | SearchError::InvalidImage(_) => ErrorKind::BadInput,
            SearchError::SessionNotFound(_) => ErrorKind::NotFound,
            SearchError::SearchNotEnabled(_) => ErrorKind::Forbidden,
            SearchError::Extraction(e) => e.kind(),
            SearchError::Store(_) | SearchError::Catalog(_) | SearchError::Index(_) => {
                ErrorKind::Fault
            }
        }
    }
}
