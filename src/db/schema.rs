pub const SCHEMA: &str = r#"
-- Face embeddings: one row per (photo, session)
CREATE TABLE IF NOT EXISTS face_embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id TEXT NOT NULL,
    session_id TEXT NOT NULL,
    embedding BLOB NOT NULL,          -- f32 little-endian, unit length
    embedding_dim INTEGER NOT NULL,
    confidence REAL,                  -- detector score, NULL for legacy rows
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (photo_id, session_id)
);

CREATE INDEX IF NOT EXISTS idx_face_embeddings_session ON face_embeddings(session_id);
"#;

/// Statements applied after [`SCHEMA`]; failures are ignored so they can be
/// re-run against databases that already have them. `updated_at` came after
/// the first release, so it is added here for every database.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE face_embeddings ADD COLUMN updated_at TEXT",
];
