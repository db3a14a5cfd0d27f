//! SQLite backend implementation.
//!
//! SQLite has no vector operators, so nearest-neighbor queries load the
//! session's rows and rank them in-process. Sessions are small (hundreds of
//! photos), which keeps this cheap.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::embeddings::{
    bytes_to_embedding, embedding_to_bytes, EmbeddingRecord, Neighbor, SessionStats, UpsertAction,
};
use super::schema::{MIGRATIONS, SCHEMA};
use crate::error::StoreError;
use crate::faces::normalize::cosine_similarity;

pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA)?;
        for migration in MIGRATIONS {
            let _ = conn.execute(migration, []);
        }
        Ok(())
    }

    pub fn ping(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    pub fn upsert(
        &self,
        photo_id: &str,
        session_id: &Uuid,
        embedding: &[f32],
        confidence: Option<f32>,
    ) -> Result<UpsertAction, StoreError> {
        let session = session_id.to_string();
        let bytes = embedding_to_bytes(embedding);

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM face_embeddings WHERE photo_id = ? AND session_id = ?)",
            params![photo_id, session],
            |row| row.get(0),
        )?;

        tx.execute(
            r#"
            INSERT INTO face_embeddings (photo_id, session_id, embedding, embedding_dim, confidence)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (photo_id, session_id) DO UPDATE SET
                embedding = excluded.embedding,
                embedding_dim = excluded.embedding_dim,
                confidence = excluded.confidence,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![photo_id, session, bytes, embedding.len() as i64, confidence],
        )?;

        tx.commit()?;

        Ok(if exists {
            UpsertAction::Updated
        } else {
            UpsertAction::Inserted
        })
    }

    pub fn query_nearest(
        &self,
        session_id: &Uuid,
        query: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT photo_id, embedding, confidence FROM face_embeddings WHERE session_id = ?",
        )?;

        let rows = stmt.query_map([session_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Option<f64>>(2)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (photo_id, bytes, confidence) = row?;
            let similarity = cosine_similarity(query, &bytes_to_embedding(&bytes));
            if similarity >= threshold {
                results.push(Neighbor {
                    photo_id,
                    similarity,
                    confidence: confidence.map(|c| c as f32),
                });
            }
        }

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);

        Ok(results)
    }

    pub fn count(&self, session_id: &Uuid) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM face_embeddings WHERE session_id = ?",
            [session_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn total_count(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM face_embeddings", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn contains(&self, photo_id: &str, session_id: &Uuid) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM face_embeddings WHERE photo_id = ? AND session_id = ?)",
            params![photo_id, session_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn get(&self, photo_id: &str, session_id: &Uuid) -> Result<Option<EmbeddingRecord>, StoreError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                r#"
                SELECT id, photo_id, embedding, confidence, created_at
                FROM face_embeddings
                WHERE photo_id = ? AND session_id = ?
                "#,
                params![photo_id, session_id.to_string()],
                |row| {
                    let bytes: Vec<u8> = row.get(2)?;
                    let confidence: Option<f64> = row.get(3)?;
                    Ok(EmbeddingRecord {
                        id: row.get(0)?,
                        photo_id: row.get(1)?,
                        session_id: *session_id,
                        embedding: bytes_to_embedding(&bytes),
                        confidence: confidence.map(|c| c as f32),
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn session_stats(&self, session_id: &Uuid) -> Result<SessionStats, StoreError> {
        let conn = self.lock()?;
        let (count, last_indexed): (i64, Option<String>) = conn.query_row(
            r#"
            SELECT COUNT(*), MAX(COALESCE(updated_at, created_at))
            FROM face_embeddings
            WHERE session_id = ?
            "#,
            [session_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(SessionStats {
            count: count as usize,
            last_indexed,
        })
    }

    pub fn delete_session(&self, session_id: &Uuid) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM face_embeddings WHERE session_id = ?",
            [session_id.to_string()],
        )?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(db: &SqliteDb) -> Vec<String> {
        let conn = db.lock().unwrap();
        let mut stmt = conn.prepare("PRAGMA table_info(face_embeddings)").unwrap();
        stmt.query_map([], |row| row.get::<_, String>(1))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_migrations_add_updated_at_once() {
        let db = SqliteDb::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.initialize().unwrap();

        let cols = columns(&db);
        assert_eq!(cols.iter().filter(|c| c.as_str() == "updated_at").count(), 1);
    }

    #[test]
    fn test_migrations_upgrade_legacy_table() {
        let db = SqliteDb::open_in_memory().unwrap();
        db.lock().unwrap().execute_batch(SCHEMA).unwrap();
        assert!(!columns(&db).contains(&"updated_at".to_string()));

        db.initialize().unwrap();
        assert!(columns(&db).contains(&"updated_at".to_string()));
    }
}
