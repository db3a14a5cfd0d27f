mod schema;
pub mod embeddings;
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
pub mod postgres_schema;

use uuid::Uuid;

pub use embeddings::{EmbeddingRecord, Neighbor, SessionStats, UpsertAction};
pub use schema::{MIGRATIONS, SCHEMA};

use crate::config::DatabaseConfig;
#[cfg(feature = "postgres")]
use crate::config::DatabaseType;
use crate::error::StoreError;
use embeddings::validate_vector;

/// Macro to dispatch a method call to the active backend variant.
macro_rules! dispatch {
    // No arguments beyond self
    ($self:expr, $method:ident()) => {
        match &$self.inner {
            DatabaseInner::Sqlite(db) => db.$method(),
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(db) => db.$method(),
        }
    };
    // With arguments
    ($self:expr, $method:ident($($arg:expr),+ $(,)?)) => {
        match &$self.inner {
            DatabaseInner::Sqlite(db) => db.$method($($arg),+),
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(db) => db.$method($($arg),+),
        }
    };
}

enum DatabaseInner {
    Sqlite(sqlite::SqliteDb),
    #[cfg(feature = "postgres")]
    Postgres(postgres::PgDb),
}

/// Persistent embedding store keyed by `(photo_id, session_id)`.
///
/// Every vector written or queried must have exactly [`Database::dimension`]
/// finite components. Vectors are expected to be unit length already; the
/// store does not renormalize them.
pub struct Database {
    inner: DatabaseInner,
    dimension: usize,
}

impl Database {
    /// Open a database connection based on the provided configuration.
    pub fn open(config: &DatabaseConfig, dimension: usize) -> Result<Self, StoreError> {
        #[cfg(feature = "postgres")]
        {
            if config.backend == DatabaseType::Postgresql {
                let url = config.postgresql_url.as_deref().ok_or_else(|| {
                    StoreError::Misconfigured("PostgreSQL URL not configured".to_string())
                })?;
                let pool_size = config.pool_size.unwrap_or(10);
                let pg = postgres::PgDb::open(url, pool_size, dimension)?;
                return Ok(Self {
                    inner: DatabaseInner::Postgres(pg),
                    dimension,
                });
            }
        }

        let db = sqlite::SqliteDb::open(&config.sqlite_path)?;
        Ok(Self {
            inner: DatabaseInner::Sqlite(db),
            dimension,
        })
    }

    /// An in-memory SQLite store, already initialized.
    pub fn in_memory(dimension: usize) -> Result<Self, StoreError> {
        let db = Self {
            inner: DatabaseInner::Sqlite(sqlite::SqliteDb::open_in_memory()?),
            dimension,
        };
        db.initialize()?;
        Ok(db)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.inner {
            DatabaseInner::Sqlite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            DatabaseInner::Postgres(_) => "postgresql",
        }
    }

    /// Create tables and indexes if they do not exist.
    pub fn initialize(&self) -> Result<(), StoreError> {
        dispatch!(self, initialize())
    }

    pub fn ping(&self) -> Result<(), StoreError> {
        dispatch!(self, ping())
    }

    /// Insert or replace the embedding for a photo in a session.
    pub fn upsert(
        &self,
        photo_id: &str,
        session_id: &Uuid,
        embedding: &[f32],
        confidence: Option<f32>,
    ) -> Result<UpsertAction, StoreError> {
        validate_vector(embedding, self.dimension)?;
        dispatch!(self, upsert(photo_id, session_id, embedding, confidence))
    }

    /// Stored photos in `session_id` whose similarity to `query` is at least
    /// `threshold`, best first, at most `limit` of them.
    pub fn query_nearest(
        &self,
        session_id: &Uuid,
        query: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<Neighbor>, StoreError> {
        validate_vector(query, self.dimension)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        dispatch!(self, query_nearest(session_id, query, threshold, limit))
    }

    pub fn count(&self, session_id: &Uuid) -> Result<usize, StoreError> {
        dispatch!(self, count(session_id))
    }

    pub fn total_count(&self) -> Result<usize, StoreError> {
        dispatch!(self, total_count())
    }

    pub fn contains(&self, photo_id: &str, session_id: &Uuid) -> Result<bool, StoreError> {
        dispatch!(self, contains(photo_id, session_id))
    }

    pub fn get(&self, photo_id: &str, session_id: &Uuid) -> Result<Option<EmbeddingRecord>, StoreError> {
        dispatch!(self, get(photo_id, session_id))
    }

    pub fn session_stats(&self, session_id: &Uuid) -> Result<SessionStats, StoreError> {
        dispatch!(self, session_stats(session_id))
    }

    /// Remove every embedding of a session. Returns how many rows went.
    pub fn delete_session(&self, session_id: &Uuid) -> Result<usize, StoreError> {
        dispatch!(self, delete_session(session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::normalize::normalize;
    use tempfile::tempdir;

    const DIM: usize = 8;

    fn unit(seed: &[f32]) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[..seed.len()].copy_from_slice(seed);
        normalize(&v)
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let db = Database::in_memory(DIM).unwrap();
        let session = Uuid::new_v4();
        let v = unit(&[1.0, 0.0]);

        assert_eq!(db.upsert("p1", &session, &v, Some(0.9)).unwrap(), UpsertAction::Inserted);
        assert_eq!(db.upsert("p1", &session, &v, Some(0.9)).unwrap(), UpsertAction::Updated);
        assert_eq!(db.count(&session).unwrap(), 1);
    }

    #[test]
    fn test_upsert_replaces_vector() {
        let db = Database::in_memory(DIM).unwrap();
        let session = Uuid::new_v4();
        let first = unit(&[1.0, 0.0]);
        let second = unit(&[0.0, 1.0]);

        db.upsert("p1", &session, &first, None).unwrap();
        db.upsert("p1", &session, &second, Some(0.7)).unwrap();

        let record = db.get("p1", &session).unwrap().unwrap();
        assert_eq!(record.embedding, second);
        assert_eq!(record.confidence, Some(0.7));
    }

    #[test]
    fn test_sessions_are_isolated() {
        let db = Database::in_memory(DIM).unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let v = unit(&[1.0, 1.0]);

        db.upsert("p1", &a, &v, None).unwrap();
        db.upsert("p1", &b, &v, None).unwrap();
        db.upsert("p2", &b, &v, None).unwrap();

        assert_eq!(db.count(&a).unwrap(), 1);
        assert_eq!(db.count(&b).unwrap(), 2);

        let hits = db.query_nearest(&a, &v, 0.0, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].photo_id, "p1");
    }

    #[test]
    fn test_query_nearest_orders_and_limits() {
        let db = Database::in_memory(DIM).unwrap();
        let session = Uuid::new_v4();
        db.upsert("exact", &session, &unit(&[1.0, 0.0]), None).unwrap();
        db.upsert("close", &session, &unit(&[1.0, 0.3]), None).unwrap();
        db.upsert("far", &session, &unit(&[0.0, 1.0]), None).unwrap();

        let query = unit(&[1.0, 0.0]);
        let hits = db.query_nearest(&session, &query, -1.0, 10).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.photo_id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "close", "far"]);
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
        assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));

        let top = db.query_nearest(&session, &query, -1.0, 2).unwrap();
        assert_eq!(top.len(), 2);
        assert!(db.query_nearest(&session, &query, -1.0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_raising_threshold_never_adds_results() {
        let db = Database::in_memory(DIM).unwrap();
        let session = Uuid::new_v4();
        for (i, y) in [0.0, 0.2, 0.5, 1.0, 3.0].iter().enumerate() {
            db.upsert(&format!("p{i}"), &session, &unit(&[1.0, *y]), None).unwrap();
        }
        let query = unit(&[1.0, 0.0]);

        let mut previous = usize::MAX;
        for threshold in [0.0, 0.3, 0.6, 0.9, 0.99] {
            let hits = db.query_nearest(&session, &query, threshold, 100).unwrap();
            assert!(hits.iter().all(|h| h.similarity >= threshold));
            assert!(hits.len() <= previous);
            previous = hits.len();
        }
    }

    #[test]
    fn test_rejects_wrong_dimension() {
        let db = Database::in_memory(DIM).unwrap();
        let session = Uuid::new_v4();
        assert!(matches!(
            db.upsert("p1", &session, &[1.0, 0.0], None),
            Err(StoreError::DimensionMismatch { expected: DIM, actual: 2 })
        ));
        assert!(matches!(
            db.query_nearest(&session, &[1.0; 3], 0.5, 10),
            Err(StoreError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_delete_session() {
        let db = Database::in_memory(DIM).unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let v = unit(&[0.5, 0.5]);
        db.upsert("p1", &a, &v, None).unwrap();
        db.upsert("p2", &a, &v, None).unwrap();
        db.upsert("p3", &b, &v, None).unwrap();

        assert_eq!(db.delete_session(&a).unwrap(), 2);
        assert_eq!(db.count(&a).unwrap(), 0);
        assert_eq!(db.count(&b).unwrap(), 1);
        assert_eq!(db.delete_session(&a).unwrap(), 0);
        assert_eq!(db.total_count().unwrap(), 1);
    }

    #[test]
    fn test_session_stats_and_contains() {
        let db = Database::in_memory(DIM).unwrap();
        let session = Uuid::new_v4();

        let empty = db.session_stats(&session).unwrap();
        assert_eq!(empty.count, 0);
        assert!(empty.last_indexed.is_none());

        db.upsert("p1", &session, &unit(&[1.0]), None).unwrap();
        assert!(db.contains("p1", &session).unwrap());
        assert!(!db.contains("p2", &session).unwrap());

        let stats = db.session_stats(&session).unwrap();
        assert_eq!(stats.count, 1);
        assert!(stats.last_indexed.is_some());
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempdir().unwrap();
        let config = DatabaseConfig {
            sqlite_path: dir.path().join("nested").join("embeddings.db"),
            ..DatabaseConfig::default()
        };
        let session = Uuid::new_v4();

        {
            let db = Database::open(&config, DIM).unwrap();
            db.initialize().unwrap();
            db.upsert("p1", &session, &unit(&[1.0]), Some(0.8)).unwrap();
        }

        let db = Database::open(&config, DIM).unwrap();
        db.initialize().unwrap();
        assert_eq!(db.count(&session).unwrap(), 1);
        db.ping().unwrap();
    }
}
