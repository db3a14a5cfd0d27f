/// PostgreSQL + pgvector schema for a given embedding dimension.
pub fn postgres_schema(dimension: usize) -> String {
    format!(
        r#"
CREATE EXTENSION IF NOT EXISTS vector;

CREATE TABLE IF NOT EXISTS face_embeddings (
    id BIGSERIAL PRIMARY KEY,
    photo_id VARCHAR(255) NOT NULL,
    session_id UUID NOT NULL,
    embedding vector({dimension}) NOT NULL,
    confidence REAL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ,
    CONSTRAINT uq_face_embeddings_photo_session UNIQUE (photo_id, session_id)
);

CREATE INDEX IF NOT EXISTS idx_face_embeddings_session ON face_embeddings(session_id);

-- Cosine operator class: similarity is 1 - (embedding <=> query)
CREATE INDEX IF NOT EXISTS idx_face_embeddings_hnsw
    ON face_embeddings USING hnsw (embedding vector_cosine_ops);
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_uses_dimension() {
        let schema = postgres_schema(512);
        assert!(schema.contains("vector(512)"));
        assert!(schema.contains("vector_cosine_ops"));
    }
}
