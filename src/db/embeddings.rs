//! Embedding records and the helpers shared by both store backends.

use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;

/// One face embedding as stored for a photo in a session.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub id: i64,
    pub photo_id: String,
    pub session_id: Uuid,
    pub embedding: Vec<f32>,
    pub confidence: Option<f32>,
    pub created_at: String,
}

/// A stored photo close to a query vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub photo_id: String,
    /// `1 - cosine_distance(query, stored)`
    pub similarity: f32,
    pub confidence: Option<f32>,
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Inserted,
    Updated,
}

/// Per-session totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub count: usize,
    /// Timestamp of the most recent insert or update, as the store formats it
    pub last_indexed: Option<String>,
}

/// Reject vectors the store cannot hold or compare meaningfully.
pub(crate) fn validate_vector(vector: &[f32], expected_dim: usize) -> Result<(), StoreError> {
    if vector.len() != expected_dim {
        return Err(StoreError::DimensionMismatch {
            expected: expected_dim,
            actual: vector.len(),
        });
    }

    if vector.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidVector);
    }

    Ok(())
}

/// Convert f32 slice to little-endian bytes for BLOB storage
pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to f32 vector
pub(crate) fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Render a vector in pgvector's text form: `[0.1,0.2,...]`
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
pub(crate) fn vector_literal(embedding: &[f32]) -> String {
    let parts: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Parse pgvector's text form back into a vector
#[cfg_attr(not(feature = "postgres"), allow(dead_code))]
pub(crate) fn parse_vector_literal(text: &str) -> Option<Vec<f32>> {
    let inner = text.trim().strip_prefix('[')?.strip_suffix(']')?;
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    inner
        .split(',')
        .map(|part| part.trim().parse::<f32>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_conversion() {
        let original = vec![1.5, -2.3, 0.0, 100.0];
        let bytes = embedding_to_bytes(&original);
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytes_to_embedding(&bytes), original);
    }

    #[test]
    fn test_vector_literal_parses_back() {
        let v = vec![0.25, -1.0, 3.5];
        let text = vector_literal(&v);
        assert_eq!(text, "[0.25,-1,3.5]");
        assert_eq!(parse_vector_literal(&text), Some(v));
        assert_eq!(parse_vector_literal("[]"), Some(vec![]));
        assert_eq!(parse_vector_literal("0.1,0.2"), None);
    }

    #[test]
    fn test_validate_vector() {
        assert!(validate_vector(&[0.0; 4], 4).is_ok());
        assert!(matches!(
            validate_vector(&[0.0; 3], 4),
            Err(StoreError::DimensionMismatch { expected: 4, actual: 3 })
        ));
        assert!(matches!(
            validate_vector(&[0.0, f32::NAN], 2),
            Err(StoreError::InvalidVector)
        ));
    }
}
