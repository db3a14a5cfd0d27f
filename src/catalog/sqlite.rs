use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{PhotoCatalog, PhotoMetadata, SessionDirectory, SessionInfo};
use crate::error::CatalogError;

/// Catalog read from a SQLite file with `photo_sessions` and `photos` tables.
pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    /// Open read-only. The catalog belongs to another system and is never
    /// written from here.
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CatalogError> {
        self.conn.lock().map_err(|_| CatalogError::LockPoisoned)
    }
}

impl SessionDirectory for SqliteCatalog {
    fn find_session(&self, session_id: &Uuid) -> Result<Option<SessionInfo>, CatalogError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT name, facepass_enabled FROM photo_sessions WHERE lower(id) = ?",
                [session_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<bool>>(1)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(name, enabled)| SessionInfo {
            id: *session_id,
            name,
            search_enabled: enabled.unwrap_or(false),
        }))
    }
}

impl PhotoCatalog for SqliteCatalog {
    fn photos_for_session(&self, session_id: &Uuid) -> Result<Vec<PhotoMetadata>, CatalogError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, file_name, display_name, preview_path, file_path
            FROM photos
            WHERE lower(session_id) = ?
            ORDER BY id
            "#,
        )?;

        let photos = stmt
            .query_map([session_id.to_string()], |row| {
                Ok(PhotoMetadata {
                    photo_id: row.get(0)?,
                    file_name: row.get(1)?,
                    display_name: row.get(2)?,
                    preview_path: row.get(3)?,
                    original_path: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(photos)
    }
}
