//! Vector normalization and similarity.
//!
//! Stored and query embeddings are both unit length, so cosine similarity,
//! `1 - cosine_distance`, and the dot product agree.

/// Tolerance used when checking whether a vector is already unit length.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-4;

/// Euclidean (L2) norm of a vector.
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale a vector to unit L2 norm.
///
/// An all-zero vector cannot be normalized; it is returned unchanged and a
/// warning is logged. Such an embedding is almost certainly useless, but it is
/// the caller's call whether to keep it.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = l2_norm(vector);

    if norm > 0.0 && norm.is_finite() {
        tracing::debug!(norm, "Embedding normalized");
        vector.iter().map(|x| x / norm).collect()
    } else {
        tracing::warn!(norm, dim = vector.len(), "Degenerate embedding, cannot normalize");
        vector.to_vec()
    }
}

/// Whether `vector` has unit L2 norm, within [`UNIT_NORM_TOLERANCE`].
pub fn is_unit(vector: &[f32]) -> bool {
    (l2_norm(vector) - 1.0).abs() <= UNIT_NORM_TOLERANCE
}

/// Cosine similarity between two vectors, in `[-1, 1]`.
///
/// Returns 0.0 for mismatched lengths or a zero vector on either side.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

/// `1 - cosine_similarity`, matching pgvector's `<=>` operator.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_produces_unit_vector() {
        let v = vec![3.0, 4.0, 0.0, -12.0];
        let n = normalize(&v);
        assert!((l2_norm(&n) - 1.0).abs() < 1e-6);
        assert!(is_unit(&n));
        // Direction is preserved
        assert!((n[0] / n[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_is_unchanged() {
        let v = vec![0.0; 8];
        let n = normalize(&v);
        assert_eq!(n, v);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let v: Vec<f32> = (1..=512).map(|i| (i as f32).sin()).collect();
        let once = normalize(&v);
        let twice = normalize(&once);
        for (a, b) in once.iter().zip(twice.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_self_and_orthogonal_similarity() {
        let a = normalize(&[1.0, 2.0, 3.0]);
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);

        let x = vec![1.0, 0.0, 0.0];
        let y = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&x, &y).abs() < 1e-6);
        assert!((cosine_distance(&x, &y) - 1.0).abs() < 1e-6);

        let neg = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&x, &neg) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
