pub mod detector;
pub mod extractor;
pub mod image;
pub mod normalize;

pub use extractor::{EmbeddingExtractor, FaceEmbedding, OnnxExtractor};
pub use normalize::{cosine_similarity, normalize};
