//! Indexing: storage keys in, one stored embedding per photo out.
//!
//! A bad photo never stops a batch. Every per-photo problem ends up on the
//! report; only faults that make the whole run pointless (no model, storage
//! unreachable) come back as errors.

pub mod keys;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

use crate::config::IndexingConfig;
use crate::db::{Database, UpsertAction};
use crate::error::{ExtractError, IndexError, StorageError, StoreError};
use crate::faces::{normalize, EmbeddingExtractor};
use crate::storage::{ObjectStorage, SessionLayout};

pub use keys::{has_image_extension, photo_id_from_storage_key, validate_photo_id};

/// Why a single photo was not indexed.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum IndexFailure {
    #[error("invalid photo id: {0}")]
    InvalidPhotoId(String),

    #[error("no face detected")]
    NoFace,

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("store error: {0}")]
    Store(String),
}

impl From<ExtractError> for IndexFailure {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::InvalidImage(msg) => IndexFailure::InvalidImage(msg),
            other => IndexFailure::Extraction(other.to_string()),
        }
    }
}

impl From<StorageError> for IndexFailure {
    fn from(e: StorageError) -> Self {
        IndexFailure::Storage(e.to_string())
    }
}

impl From<StoreError> for IndexFailure {
    fn from(e: StoreError) -> Self {
        IndexFailure::Store(e.to_string())
    }
}

/// Result of indexing one photo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoIndexOutcome {
    pub photo_id: String,
    pub confidence: Option<f32>,
    pub faces_detected: usize,
    pub action: Option<UpsertAction>,
    pub error: Option<IndexFailure>,
}

impl PhotoIndexOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    fn failed(photo_id: &str, faces_detected: usize, error: IndexFailure) -> Self {
        Self {
            photo_id: photo_id.to_string(),
            confidence: None,
            faces_detected,
            action: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoError {
    pub photo_id: String,
    pub reason: IndexFailure,
}

impl std::fmt::Display for PhotoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.photo_id, self.reason)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub indexed: usize,
    pub failed: usize,
    pub errors: Vec<PhotoError>,
}

/// Progress events sent while a batch runs.
#[derive(Debug, Clone)]
pub enum IndexProgress {
    Started {
        session_id: Uuid,
        total: usize,
    },
    Processing {
        current: usize,
        total: usize,
        photo_id: String,
    },
    Indexed {
        photo_id: String,
        confidence: Option<f32>,
    },
    Failed {
        photo_id: String,
        reason: IndexFailure,
    },
    Completed {
        indexed: usize,
        failed: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    NotIndexed,
    Indexing,
    Indexed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Index photos not yet stored, leave the rest alone.
    Incremental,
    /// Drop the session's embeddings and rebuild from storage.
    Force,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionIndexReport {
    pub session_id: Uuid,
    /// Image keys found in storage
    pub scanned: usize,
    /// Unstored photos left for a later run because of the per-run cap
    pub capped: usize,
    /// Photos already stored and therefore not reprocessed
    pub skipped: usize,
    /// Embeddings removed before a forced rebuild
    pub deleted: usize,
    pub indexed: usize,
    pub failed: usize,
    pub errors: Vec<PhotoError>,
    pub state: IndexState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub indexed: bool,
    pub count: usize,
    pub last_indexed: Option<String>,
    pub state: IndexState,
}

pub struct IndexingOrchestrator {
    extractor: Arc<dyn EmbeddingExtractor>,
    db: Arc<Database>,
    storage: Arc<dyn ObjectStorage>,
    layout: SessionLayout,
    config: IndexingConfig,
    // Best effort only: two runs for the same session may overlap, and the
    // store's upsert keeps that safe.
    states: Mutex<HashMap<Uuid, IndexState>>,
}

impl IndexingOrchestrator {
    pub fn new(
        extractor: Arc<dyn EmbeddingExtractor>,
        db: Arc<Database>,
        storage: Arc<dyn ObjectStorage>,
        layout: SessionLayout,
        config: IndexingConfig,
    ) -> Self {
        Self {
            extractor,
            db,
            storage,
            layout,
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Extract, normalize and store the embedding of one photo.
    pub fn index_one(&self, photo_id: &str, session_id: &Uuid, image_bytes: &[u8]) -> PhotoIndexOutcome {
        if let Err(e) = validate_photo_id(photo_id) {
            return PhotoIndexOutcome::failed(photo_id, 0, e);
        }

        let face = match self.extractor.extract_single(image_bytes) {
            Ok(Some(face)) => face,
            Ok(None) => {
                tracing::warn!(photo_id, "No face detected in photo");
                return PhotoIndexOutcome::failed(photo_id, 0, IndexFailure::NoFace);
            }
            Err(e) => return PhotoIndexOutcome::failed(photo_id, 0, e.into()),
        };

        let vector = normalize(&face.vector);

        match self.db.upsert(photo_id, session_id, &vector, Some(face.confidence)) {
            Ok(action) => {
                tracing::debug!(photo_id, %session_id, ?action, "Stored embedding");
                PhotoIndexOutcome {
                    photo_id: photo_id.to_string(),
                    confidence: Some(face.confidence),
                    faces_detected: 1,
                    action: Some(action),
                    error: None,
                }
            }
            Err(e) => PhotoIndexOutcome::failed(photo_id, 1, e.into()),
        }
    }

    /// Fetch a photo from object storage, then [`index_one`](Self::index_one).
    pub fn index_one_from_storage(&self, photo_id: &str, session_id: &Uuid, key: &str) -> PhotoIndexOutcome {
        match self.storage.get(key) {
            Ok(bytes) => self.index_one(photo_id, session_id, &bytes),
            Err(e) => {
                tracing::warn!(photo_id, key, error = %e, "Failed to fetch photo");
                PhotoIndexOutcome::failed(photo_id, 0, e.into())
            }
        }
    }

    /// Index `(photo_id, storage_key)` pairs in order.
    pub fn index_batch(&self, session_id: &Uuid, photos: &[(String, String)]) -> BatchReport {
        self.index_batch_with_progress(session_id, photos, None)
    }

    pub fn index_batch_with_progress(
        &self,
        session_id: &Uuid,
        photos: &[(String, String)],
        progress: Option<&mpsc::Sender<IndexProgress>>,
    ) -> BatchReport {
        let total = photos.len();
        let send = |event: IndexProgress| {
            if let Some(tx) = progress {
                let _ = tx.send(event);
            }
        };

        send(IndexProgress::Started {
            session_id: *session_id,
            total,
        });

        let mut report = BatchReport::default();

        for (i, (photo_id, key)) in photos.iter().enumerate() {
            send(IndexProgress::Processing {
                current: i + 1,
                total,
                photo_id: photo_id.clone(),
            });

            let outcome = self.index_one_from_storage(photo_id, session_id, key);
            match outcome.error {
                None => {
                    report.indexed += 1;
                    send(IndexProgress::Indexed {
                        photo_id: photo_id.clone(),
                        confidence: outcome.confidence,
                    });
                }
                Some(reason) => {
                    report.failed += 1;
                    tracing::warn!(photo_id = %photo_id, %reason, "Failed to index photo");
                    send(IndexProgress::Failed {
                        photo_id: photo_id.clone(),
                        reason: reason.clone(),
                    });
                    report.errors.push(PhotoError {
                        photo_id: photo_id.clone(),
                        reason,
                    });
                }
            }

            if (i + 1) % 10 == 0 {
                tracing::info!(%session_id, done = i + 1, total, "Indexing progress");
            }
        }

        tracing::info!(
            %session_id,
            indexed = report.indexed,
            failed = report.failed,
            "Batch indexing completed"
        );

        send(IndexProgress::Completed {
            indexed: report.indexed,
            failed: report.failed,
        });

        report
    }

    /// Image keys for a session, from the first configured prefix that has any.
    pub fn scan_session(&self, session_id: &Uuid) -> Result<Vec<String>, StorageError> {
        for prefix in self.layout.prefixes_for(session_id) {
            let keys: Vec<String> = self
                .storage
                .list(&prefix)?
                .into_iter()
                .filter(|k| has_image_extension(k, &self.config.image_extensions))
                .collect();

            if !keys.is_empty() {
                tracing::info!(%session_id, prefix = %prefix, photos = keys.len(), "Found session photos");
                return Ok(keys);
            }
            tracing::debug!(%session_id, prefix = %prefix, "No photos under prefix");
        }

        tracing::info!(%session_id, "No photos found for session");
        Ok(Vec::new())
    }

    /// `(count > 0, count)` for the session's stored embeddings.
    pub fn check_indexed(&self, session_id: &Uuid) -> Result<(bool, usize), StoreError> {
        let count = self.db.count(session_id)?;
        Ok((count > 0, count))
    }

    /// Scan storage and index the session's photos, up to the per-run cap.
    pub fn index_session(&self, session_id: &Uuid, mode: IndexMode) -> Result<SessionIndexReport, IndexError> {
        if !self.extractor.is_ready() {
            tracing::error!(%session_id, "Face model not loaded, cannot index");
            return Err(IndexError::ModelNotReady);
        }

        tracing::info!(%session_id, ?mode, "Starting session indexing");
        self.set_state(session_id, IndexState::Indexing);

        let result = self.run_session(session_id, mode);
        match &result {
            Ok(report) => self.set_state(session_id, report.state),
            Err(e) => {
                tracing::error!(%session_id, error = %e, "Session indexing failed");
                self.set_state(session_id, IndexState::Failed);
            }
        }
        result
    }

    fn run_session(&self, session_id: &Uuid, mode: IndexMode) -> Result<SessionIndexReport, IndexError> {
        let deleted = match mode {
            IndexMode::Force => self.db.delete_session(session_id)?,
            IndexMode::Incremental => 0,
        };

        let keys = self.scan_session(session_id)?;
        let scanned = keys.len();

        let mut errors = Vec::new();
        let mut skipped = 0;
        let mut pending = Vec::new();

        for key in keys {
            let Some(photo_id) = photo_id_from_storage_key(&key) else {
                errors.push(PhotoError {
                    photo_id: key.clone(),
                    reason: IndexFailure::InvalidPhotoId(format!("cannot derive photo id from {}", key)),
                });
                continue;
            };

            if self.db.contains(&photo_id, session_id)? {
                skipped += 1;
                continue;
            }
            pending.push((photo_id, key));
        }

        if skipped > 0 {
            tracing::info!(%session_id, skipped, "Skipping already indexed photos");
        }

        // The cap applies to unstored photos so later runs pick up the rest
        let cap = self.config.max_photos_per_run;
        let capped = pending.len().saturating_sub(cap);
        if capped > 0 {
            tracing::warn!(%session_id, pending = pending.len(), cap, "Too many photos, limiting this run");
            pending.truncate(cap);
        }

        let key_failures = errors.len();
        let batch = self.index_batch(session_id, &pending);
        errors.extend(batch.errors);

        let failed = batch.failed + key_failures;
        let count = self.db.count(session_id)?;
        let state = if count > 0 {
            IndexState::Indexed
        } else if failed > 0 {
            IndexState::Failed
        } else {
            IndexState::NotIndexed
        };

        tracing::info!(
            %session_id,
            scanned,
            indexed = batch.indexed,
            skipped,
            failed,
            "Session indexing finished"
        );

        Ok(SessionIndexReport {
            session_id: *session_id,
            scanned,
            capped,
            skipped,
            deleted,
            indexed: batch.indexed,
            failed,
            errors,
            state,
        })
    }

    /// Current state of a session. Without a run in this process, it is
    /// inferred from what the store holds.
    pub fn session_state(&self, session_id: &Uuid) -> Result<IndexState, StoreError> {
        if let Some(state) = self.known_state(session_id) {
            return Ok(state);
        }
        let (indexed, _) = self.check_indexed(session_id)?;
        Ok(if indexed {
            IndexState::Indexed
        } else {
            IndexState::NotIndexed
        })
    }

    pub fn session_status(&self, session_id: &Uuid) -> Result<SessionStatus, StoreError> {
        let stats = self.db.session_stats(session_id)?;
        let state = match self.known_state(session_id) {
            Some(state) => state,
            None if stats.count > 0 => IndexState::Indexed,
            None => IndexState::NotIndexed,
        };

        Ok(SessionStatus {
            session_id: *session_id,
            indexed: stats.count > 0,
            count: stats.count,
            last_indexed: stats.last_indexed,
            state,
        })
    }

    /// Remove every stored embedding of the session.
    pub fn delete_session(&self, session_id: &Uuid) -> Result<usize, StoreError> {
        let deleted = self.db.delete_session(session_id)?;
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        tracing::info!(%session_id, deleted, "Deleted session embeddings");
        Ok(deleted)
    }

    fn known_state(&self, session_id: &Uuid) -> Option<IndexState> {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .copied()
    }

    fn set_state(&self, session_id: &Uuid, state: IndexState) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(*session_id, state);
    }
}
