//! Selfie search within one photo session.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::catalog::{Catalog, CatalogIndex};
use crate::config::SearchConfig;
use crate::db::{Database, Neighbor};
use crate::error::SearchError;
use crate::faces::normalize::is_unit;
use crate::faces::{normalize, EmbeddingExtractor};
use crate::indexing::{IndexMode, IndexingOrchestrator, PhotoError};

/// A stored photo that matched the selfie, with catalog metadata attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoMatch {
    pub photo_id: String,
    pub similarity: f32,
    pub confidence: Option<f32>,
    pub file_name: Option<String>,
    pub display_name: Option<String>,
    pub preview_path: Option<String>,
    pub original_path: Option<String>,
}

/// How a well-formed search ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SearchOutcome {
    Matches(Vec<PhotoMatch>),
    /// Indexed photos exist but none cleared the threshold.
    NoMatches,
    /// The selfie had no usable face.
    NoFaceDetected,
    /// Auto-indexing found nothing in storage for the session.
    NoPhotosInSession,
    /// Auto-indexing ran but stored nothing.
    IndexingFailed { failed: usize, errors: Vec<PhotoError> },
}

impl SearchOutcome {
    pub fn message(&self) -> String {
        match self {
            SearchOutcome::Matches(matches) => format!("Found {} matching photos", matches.len()),
            SearchOutcome::NoMatches => "No photos matched above the similarity threshold".to_string(),
            SearchOutcome::NoFaceDetected => "No face detected in the uploaded image".to_string(),
            SearchOutcome::NoPhotosInSession => "No photos found in this session".to_string(),
            SearchOutcome::IndexingFailed { failed, .. } => {
                format!("Indexing produced no usable photos ({} failed)", failed)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub outcome: SearchOutcome,
    pub message: String,
    pub elapsed_ms: u64,
    /// Embeddings stored for the session when the query ran
    pub indexed_count: usize,
    pub threshold: f32,
    pub limit: usize,
}

impl SearchResult {
    /// Matches in descending similarity; empty for every non-match outcome.
    pub fn matches(&self) -> &[PhotoMatch] {
        match &self.outcome {
            SearchOutcome::Matches(matches) => matches,
            _ => &[],
        }
    }
}

pub struct SearchOrchestrator {
    catalog: Arc<dyn Catalog>,
    extractor: Arc<dyn EmbeddingExtractor>,
    db: Arc<Database>,
    indexer: Arc<IndexingOrchestrator>,
    default_threshold: f32,
    config: SearchConfig,
}

impl SearchOrchestrator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        extractor: Arc<dyn EmbeddingExtractor>,
        db: Arc<Database>,
        indexer: Arc<IndexingOrchestrator>,
        default_threshold: f32,
        config: SearchConfig,
    ) -> Self {
        Self {
            catalog,
            extractor,
            db,
            indexer,
            default_threshold,
            config,
        }
    }

    /// Find the session's photos showing the face in `selfie`.
    ///
    /// A session that has never been indexed is indexed first, inline, so the
    /// first search can take as long as a full indexing run.
    pub fn search(
        &self,
        session_id: &Uuid,
        selfie: &[u8],
        threshold: Option<f32>,
        limit: Option<usize>,
    ) -> Result<SearchResult, SearchError> {
        let started = Instant::now();
        let threshold = self.resolve_threshold(threshold)?;
        let limit = self.resolve_limit(limit)?;

        let session = self
            .catalog
            .find_session(session_id)?
            .ok_or(SearchError::SessionNotFound(*session_id))?;
        if !session.search_enabled {
            return Err(SearchError::SearchNotEnabled(*session_id));
        }

        let finish = |outcome: SearchOutcome, indexed_count: usize| {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            tracing::info!(
                %session_id,
                indexed_count,
                threshold,
                elapsed_ms,
                outcome = %outcome.message(),
                "Search finished"
            );
            SearchResult {
                message: outcome.message(),
                outcome,
                elapsed_ms,
                indexed_count,
                threshold,
                limit,
            }
        };

        self.extractor.validate_upload(selfie)?;
        let Some(face) = self.extractor.extract_single(selfie)? else {
            let count = self.db.count(session_id)?;
            return Ok(finish(SearchOutcome::NoFaceDetected, count));
        };

        // A zero embedding has no direction to compare against
        let query = normalize(&face.vector);
        if !is_unit(&query) {
            tracing::warn!(%session_id, "Selfie embedding is degenerate, treating as no face");
            let count = self.db.count(session_id)?;
            return Ok(finish(SearchOutcome::NoFaceDetected, count));
        }

        let mut count = self.db.count(session_id)?;
        if count == 0 {
            tracing::info!(%session_id, "Session not indexed yet, indexing before search");
            let report = self.indexer.index_session(session_id, IndexMode::Incremental)?;

            if report.scanned == 0 {
                return Ok(finish(SearchOutcome::NoPhotosInSession, 0));
            }

            count = self.db.count(session_id)?;
            if count == 0 {
                return Ok(finish(
                    SearchOutcome::IndexingFailed {
                        failed: report.failed,
                        errors: report.errors,
                    },
                    0,
                ));
            }
        }

        let neighbors = self.db.query_nearest(session_id, &query, threshold, limit)?;
        if neighbors.is_empty() {
            return Ok(finish(SearchOutcome::NoMatches, count));
        }

        let matches = self.attach_metadata(session_id, neighbors)?;
        if matches.is_empty() {
            return Ok(finish(SearchOutcome::NoMatches, count));
        }

        Ok(finish(SearchOutcome::Matches(matches), count))
    }

    fn resolve_threshold(&self, threshold: Option<f32>) -> Result<f32, SearchError> {
        let threshold = threshold.unwrap_or(self.default_threshold);
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(SearchError::InvalidInput(format!(
                "threshold must be between 0.0 and 1.0, got {}",
                threshold
            )));
        }
        Ok(threshold)
    }

    fn resolve_limit(&self, limit: Option<usize>) -> Result<usize, SearchError> {
        let limit = limit.unwrap_or(self.config.default_limit);
        if limit == 0 || limit > self.config.max_limit {
            return Err(SearchError::InvalidInput(format!(
                "limit must be between 1 and {}, got {}",
                self.config.max_limit, limit
            )));
        }
        Ok(limit)
    }

    /// Join store hits with the catalog. Hits the catalog does not know are
    /// dropped.
    fn attach_metadata(&self, session_id: &Uuid, neighbors: Vec<Neighbor>) -> Result<Vec<PhotoMatch>, SearchError> {
        let index = CatalogIndex::new(self.catalog.photos_for_session(session_id)?);

        let mut matches: Vec<PhotoMatch> = neighbors
            .into_iter()
            .filter_map(|hit| match index.lookup(&hit.photo_id) {
                Some(meta) => Some(PhotoMatch {
                    photo_id: meta.photo_id.clone(),
                    similarity: hit.similarity,
                    confidence: hit.confidence,
                    file_name: meta.file_name.clone(),
                    display_name: meta.display_name.clone(),
                    preview_path: meta.preview_path.clone(),
                    original_path: meta.original_path.clone(),
                }),
                None => {
                    tracing::debug!(%session_id, photo_id = %hit.photo_id, "No catalog entry for match, dropping");
                    None
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(matches)
    }
}
