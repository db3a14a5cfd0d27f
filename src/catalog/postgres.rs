use postgres::NoTls;
use r2d2::Pool;
use r2d2_postgres::PostgresConnectionManager;
use uuid::Uuid;

use super::{PhotoCatalog, PhotoMetadata, SessionDirectory, SessionInfo};
use crate::error::CatalogError;

/// Catalog read from the platform's PostgreSQL database.
pub struct PgCatalog {
    pool: Pool<PostgresConnectionManager<NoTls>>,
}

impl PgCatalog {
    pub fn open(url: &str) -> Result<Self, CatalogError> {
        let manager = PostgresConnectionManager::new(url.parse()?, NoTls);
        let pool = Pool::builder().max_size(4).build(manager)?;
        Ok(Self { pool })
    }
}

impl SessionDirectory for PgCatalog {
    fn find_session(&self, session_id: &Uuid) -> Result<Option<SessionInfo>, CatalogError> {
        let mut client = self.pool.get()?;
        let row = client.query_opt(
            "SELECT name, facepass_enabled FROM photo_sessions WHERE id::text = $1",
            &[&session_id.to_string()],
        )?;

        Ok(row.map(|row| {
            let enabled: Option<bool> = row.get(1);
            SessionInfo {
                id: *session_id,
                name: row.get(0),
                search_enabled: enabled.unwrap_or(false),
            }
        }))
    }
}

impl PhotoCatalog for PgCatalog {
    fn photos_for_session(&self, session_id: &Uuid) -> Result<Vec<PhotoMetadata>, CatalogError> {
        let mut client = self.pool.get()?;
        let rows = client.query(
            r#"
            SELECT id::text, file_name, display_name, preview_path, file_path
            FROM photos
            WHERE session_id::text = $1
            ORDER BY id
            "#,
            &[&session_id.to_string()],
        )?;

        Ok(rows
            .iter()
            .map(|row| PhotoMetadata {
                photo_id: row.get(0),
                file_name: row.get(1),
                display_name: row.get(2),
                preview_path: row.get(3),
                original_path: row.get(4),
            })
            .collect())
    }
}
