//! PostgreSQL backend implementation.
//!
//! Vectors are stored in a pgvector column and ranked with the cosine
//! distance operator `<=>`. Parameters cross the wire as text and are cast
//! server-side, which keeps the client free of pgvector type bindings.

use postgres::NoTls;
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use uuid::Uuid;

use super::embeddings::{
    parse_vector_literal, vector_literal, EmbeddingRecord, Neighbor, SessionStats, UpsertAction,
};
use super::postgres_schema::postgres_schema;
use crate::error::StoreError;

pub struct PgDb {
    pool: Pool<PostgresConnectionManager<NoTls>>,
    dimension: usize,
}

impl PgDb {
    pub fn open(url: &str, pool_size: u32, dimension: usize) -> Result<Self, StoreError> {
        let manager = PostgresConnectionManager::new(url.parse()?, NoTls);
        let pool = Pool::builder().max_size(pool_size).build(manager)?;
        Ok(Self { pool, dimension })
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        let mut client = self.pool.get()?;
        client.batch_execute(&postgres_schema(self.dimension))?;
        Ok(())
    }

    pub fn ping(&self) -> Result<(), StoreError> {
        let mut client = self.pool.get()?;
        client.query_one("SELECT 1", &[])?;
        Ok(())
    }

    pub fn upsert(
        &self,
        photo_id: &str,
        session_id: &Uuid,
        embedding: &[f32],
        confidence: Option<f32>,
    ) -> Result<UpsertAction, StoreError> {
        let mut client = self.pool.get()?;
        let row = client.query_one(
            r#"
            INSERT INTO face_embeddings (photo_id, session_id, embedding, confidence)
            VALUES ($1, $2::text::uuid, $3::text::vector, $4)
            ON CONFLICT (photo_id, session_id) DO UPDATE SET
                embedding = EXCLUDED.embedding,
                confidence = EXCLUDED.confidence,
                updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
            &[
                &photo_id,
                &session_id.to_string(),
                &vector_literal(embedding),
                &confidence,
            ],
        )?;

        let inserted: bool = row.get(0);
        Ok(if inserted {
            UpsertAction::Inserted
        } else {
            UpsertAction::Updated
        })
    }

    pub fn query_nearest(
        &self,
        session_id: &Uuid,
        query: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let mut client = self.pool.get()?;

        // The session filter runs after the shared HNSW scan. Iterative scans
        // (pgvector 0.8+) keep going until enough session rows are found.
        if let Err(e) = client.batch_execute("SET hnsw.iterative_scan = relaxed_order") {
            tracing::debug!(error = %e, "hnsw.iterative_scan unavailable, session recall bounded by ef_search");
        }

        let rows = client.query(
            r#"
            SELECT photo_id,
                   (1 - (embedding <=> $2::text::vector))::real AS similarity,
                   confidence
            FROM face_embeddings
            WHERE session_id = $1::text::uuid
              AND 1 - (embedding <=> $2::text::vector) >= $3
            ORDER BY embedding <=> $2::text::vector
            LIMIT $4
            "#,
            &[
                &session_id.to_string(),
                &vector_literal(query),
                &(threshold as f64),
                &(limit as i64),
            ],
        )?;

        let mut neighbors: Vec<Neighbor> = rows
            .iter()
            .map(|row| Neighbor {
                photo_id: row.get(0),
                similarity: row.get(1),
                confidence: row.get(2),
            })
            .collect();

        // relaxed_order can return rows slightly out of order
        neighbors.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(neighbors)
    }

    pub fn count(&self, session_id: &Uuid) -> Result<usize, StoreError> {
        let mut client = self.pool.get()?;
        let row = client.query_one(
            "SELECT COUNT(*) FROM face_embeddings WHERE session_id = $1::text::uuid",
            &[&session_id.to_string()],
        )?;
        let count: i64 = row.get(0);
        Ok(count as usize)
    }

    pub fn total_count(&self) -> Result<usize, StoreError> {
        let mut client = self.pool.get()?;
        let row = client.query_one("SELECT COUNT(*) FROM face_embeddings", &[])?;
        let count: i64 = row.get(0);
        Ok(count as usize)
    }

    pub fn contains(&self, photo_id: &str, session_id: &Uuid) -> Result<bool, StoreError> {
        let mut client = self.pool.get()?;
        let row = client.query_one(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM face_embeddings
                WHERE photo_id = $1 AND session_id = $2::text::uuid
            )
            "#,
            &[&photo_id, &session_id.to_string()],
        )?;
        Ok(row.get(0))
    }

    pub fn get(&self, photo_id: &str, session_id: &Uuid) -> Result<Option<EmbeddingRecord>, StoreError> {
        let mut client = self.pool.get()?;
        let row = client.query_opt(
            r#"
            SELECT id, photo_id, embedding::text, confidence, created_at::text
            FROM face_embeddings
            WHERE photo_id = $1 AND session_id = $2::text::uuid
            "#,
            &[&photo_id, &session_id.to_string()],
        )?;

        let Some(row) = row else {
            return Ok(None);
        };

        let text: String = row.get(2);
        let embedding = parse_vector_literal(&text).ok_or(StoreError::InvalidVector)?;

        Ok(Some(EmbeddingRecord {
            id: row.get(0),
            photo_id: row.get(1),
            session_id: *session_id,
            embedding,
            confidence: row.get(3),
            created_at: row.get(4),
        }))
    }

    pub fn session_stats(&self, session_id: &Uuid) -> Result<SessionStats, StoreError> {
        let mut client = self.pool.get()?;
        let row = client.query_one(
            r#"
            SELECT COUNT(*), MAX(COALESCE(updated_at, created_at))::text
            FROM face_embeddings
            WHERE session_id = $1::text::uuid
            "#,
            &[&session_id.to_string()],
        )?;
        let count: i64 = row.get(0);
        Ok(SessionStats {
            count: count as usize,
            last_indexed: row.get(1),
        })
    }

    pub fn delete_session(&self, session_id: &Uuid) -> Result<usize, StoreError> {
        let mut client = self.pool.get()?;
        let deleted = client.execute(
            "DELETE FROM face_embeddings WHERE session_id = $1::text::uuid",
            &[&session_id.to_string()],
        )?;
        Ok(deleted as usize)
    }
}
