//! Embedding extraction: image bytes in, one embedding per detected face out.

use anyhow::Result;

use super::detector::FaceModel;
use super::image::{check_upload, decode, ImageLimits};
use crate::config::FacesConfig;
use crate::error::ExtractError;

/// One detected face's signature.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceEmbedding {
    /// Raw model output; not guaranteed to be unit length.
    pub vector: Vec<f32>,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Turns image bytes into face embeddings.
///
/// Implementations are shared by every request, so they must be usable from
/// several threads at once.
pub trait EmbeddingExtractor: Send + Sync {
    /// Whether the underlying model loaded successfully.
    fn is_ready(&self) -> bool;

    /// Reject a client upload before extraction. Stored photos skip this.
    fn validate_upload(&self, _image_bytes: &[u8]) -> Result<(), ExtractError> {
        Ok(())
    }

    /// Every face found in the image, in detector order. No face is `Ok(vec![])`.
    fn extract(&self, image_bytes: &[u8]) -> Result<Vec<FaceEmbedding>, ExtractError>;

    /// The first detected face, or `None` when there is none.
    ///
    /// Extra faces (a stranger in the background of a selfie) are tolerated:
    /// the first one is used and a warning is logged.
    fn extract_single(&self, image_bytes: &[u8]) -> Result<Option<FaceEmbedding>, ExtractError> {
        let mut faces = self.extract(image_bytes)?;

        if faces.len() > 1 {
            tracing::warn!(faces = faces.len(), "Multiple faces detected, using first face");
        }

        if faces.is_empty() {
            tracing::info!("No face detected in image");
            return Ok(None);
        }

        Ok(Some(faces.swap_remove(0)))
    }
}

/// Production extractor backed by the ONNX face models.
pub struct OnnxExtractor {
    model: Option<FaceModel>,
    limits: ImageLimits,
}

impl OnnxExtractor {
    /// Load the models now. Fails if they cannot be downloaded or loaded.
    pub fn load(config: &FacesConfig) -> Result<Self> {
        let model = FaceModel::load(config)?;
        Ok(Self {
            model: Some(model),
            limits: ImageLimits::from(config),
        })
    }

    /// Load the models, or keep running without them if that fails.
    ///
    /// The failure is logged and the extractor reports `is_ready() == false`,
    /// so health checks and index status still work.
    pub fn load_or_unloaded(config: &FacesConfig) -> Self {
        match Self::load(config) {
            Ok(extractor) => extractor,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load face models");
                Self::unloaded(config)
            }
        }
    }

    /// An extractor with no model; every extraction fails with `ModelNotReady`.
    pub fn unloaded(config: &FacesConfig) -> Self {
        Self {
            model: None,
            limits: ImageLimits::from(config),
        }
    }
}

impl EmbeddingExtractor for OnnxExtractor {
    fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    fn validate_upload(&self, image_bytes: &[u8]) -> Result<(), ExtractError> {
        check_upload(image_bytes, &self.limits)
    }

    fn extract(&self, image_bytes: &[u8]) -> Result<Vec<FaceEmbedding>, ExtractError> {
        let model = self.model.as_ref().ok_or(ExtractError::ModelNotReady)?;

        let img = decode(image_bytes)?;
        let faces = model.detect(&img)?;

        tracing::debug!(faces = faces.len(), "Extracted face embeddings");

        Ok(faces
            .into_iter()
            .map(|face| FaceEmbedding {
                vector: face.embedding,
                confidence: face.confidence,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedExtractor(Vec<FaceEmbedding>);

    impl EmbeddingExtractor for FixedExtractor {
        fn is_ready(&self) -> bool {
            true
        }

        fn extract(&self, _image_bytes: &[u8]) -> Result<Vec<FaceEmbedding>, ExtractError> {
            Ok(self.0.clone())
        }
    }

    fn face(x: f32, confidence: f32) -> FaceEmbedding {
        FaceEmbedding {
            vector: vec![x, 0.0],
            confidence,
        }
    }

    #[test]
    fn test_single_face_none_when_empty() {
        let extractor = FixedExtractor(vec![]);
        assert_eq!(extractor.extract_single(b"img").unwrap(), None);
    }

    #[test]
    fn test_single_face_takes_first_of_many() {
        let extractor = FixedExtractor(vec![face(1.0, 0.7), face(2.0, 0.99)]);
        let first = extractor.extract_single(b"img").unwrap().unwrap();
        assert_eq!(first, face(1.0, 0.7));
    }

    #[test]
    fn test_upload_limits_apply_without_model() {
        use image::{ImageFormat, Rgb, RgbImage};
        use std::io::Cursor;

        let png = |w, h| {
            let mut buf = Cursor::new(Vec::new());
            RgbImage::from_pixel(w, h, Rgb([0, 0, 0]))
                .write_to(&mut buf, ImageFormat::Png)
                .unwrap();
            buf.into_inner()
        };

        let extractor = OnnxExtractor::unloaded(&FacesConfig::default());
        assert!(extractor.validate_upload(&png(640, 480)).is_ok());
        assert!(matches!(
            extractor.validate_upload(&png(6000, 20)),
            Err(ExtractError::InvalidImage(_))
        ));
        // The stored-photo path never sees these limits
        assert!(FixedExtractor(vec![]).validate_upload(&png(6000, 20)).is_ok());
    }

    #[test]
    fn test_unloaded_extractor_reports_not_ready() {
        let extractor = OnnxExtractor::unloaded(&FacesConfig::default());
        assert!(!extractor.is_ready());
        assert!(matches!(
            extractor.extract(b"anything"),
            Err(ExtractError::ModelNotReady)
        ));
        assert!(matches!(
            extractor.extract_single(b"anything"),
            Err(ExtractError::ModelNotReady)
        ));
    }
}
