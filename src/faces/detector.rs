//! ONNX face detection (UltraFace) and face embedding (ArcFace).

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::FacesConfig;
use crate::error::ExtractError;

const DETECTION_MODEL_FILE: &str = "ultraface-320.onnx";
const DETECTION_MODEL_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx";

const EMBEDDING_MODEL_FILE: &str = "arcface-resnet100.onnx";
const EMBEDDING_MODEL_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/arcface/model/arcfaceresnet100-11-int8.onnx";

/// Face bounding box in original image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A detected face with bounding box and embedding
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
    pub confidence: f32,
}

/// The two loaded ONNX sessions. Immutable after construction; the sessions
/// sit behind mutexes because `Session::run` needs exclusive access.
pub struct FaceModel {
    detection: Mutex<Session>,
    embedding: Mutex<Session>,
    detection_threshold: f32,
}

fn extraction_failed(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::ExtractionFailed(e.to_string())
}

/// Download a model file if it doesn't exist
fn ensure_model(models_dir: &Path, filename: &str, url: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(models_dir)?;
    let model_path = models_dir.join(filename);

    if !model_path.exists() {
        tracing::info!(model = %filename, "Downloading model...");
        let response = ureq::get(url)
            .call()
            .map_err(|e| anyhow!("Failed to download model {}: {}", filename, e))?;

        // Write to a temp name first so a partial download is never picked up
        let partial = model_path.with_extension("onnx.part");
        let mut file = std::fs::File::create(&partial)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        std::fs::rename(&partial, &model_path)?;
        tracing::info!(model = %filename, path = ?model_path, "Model downloaded");
    }

    Ok(model_path)
}

fn load_session(path: &Path, intra_threads: usize) -> Result<Session> {
    let session = Session::builder()
        .map_err(|e| anyhow!("{}", e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| anyhow!("{}", e))?
        .with_intra_threads(intra_threads)
        .map_err(|e| anyhow!("{}", e))?
        .commit_from_file(path)
        .map_err(|e| anyhow!("{}", e))
        .with_context(|| format!("Failed to load model {:?}", path))?;
    Ok(session)
}

impl FaceModel {
    /// Load both models, downloading them into `models_dir` if needed.
    pub fn load(config: &FacesConfig) -> Result<Self> {
        let detection_path =
            ensure_model(&config.models_dir, DETECTION_MODEL_FILE, DETECTION_MODEL_URL)?;
        let embedding_path =
            ensure_model(&config.models_dir, EMBEDDING_MODEL_FILE, EMBEDDING_MODEL_URL)?;

        let detection = load_session(&detection_path, config.intra_threads)?;
        let embedding = load_session(&embedding_path, config.intra_threads)?;

        tracing::info!(models_dir = ?config.models_dir, "Face models loaded");

        Ok(Self {
            detection: Mutex::new(detection),
            embedding: Mutex::new(embedding),
            detection_threshold: config.detection_threshold,
        })
    }

    /// Detect every face in `img` and compute its raw (unnormalized) embedding.
    pub fn detect(&self, img: &DynamicImage) -> Result<Vec<DetectedFace>, ExtractError> {
        let face_boxes = {
            let mut session = self
                .detection
                .lock()
                .map_err(|e| extraction_failed(format!("detection model lock: {}", e)))?;
            run_ultraface_detection(&mut session, img, self.detection_threshold)?
        };

        if face_boxes.is_empty() {
            return Ok(Vec::new());
        }

        let mut session = self
            .embedding
            .lock()
            .map_err(|e| extraction_failed(format!("embedding model lock: {}", e)))?;

        let (orig_width, orig_height) = img.dimensions();
        let mut detected_faces = Vec::with_capacity(face_boxes.len());

        for (bbox, confidence) in face_boxes {
            if bbox.width <= 0 || bbox.height <= 0 {
                continue;
            }

            let face_crop = crop_face(img, &bbox, orig_width, orig_height);
            let embedding = run_arcface_embedding(&mut session, &face_crop)?;

            detected_faces.push(DetectedFace {
                bbox,
                embedding,
                confidence,
            });
        }

        Ok(detected_faces)
    }
}

/// Run UltraFace detection model
fn run_ultraface_detection(
    session: &mut Session,
    img: &DynamicImage,
    confidence_threshold: f32,
) -> Result<Vec<(BoundingBox, f32)>, ExtractError> {
    const INPUT_WIDTH: u32 = 320;
    const INPUT_HEIGHT: u32 = 240;
    const NMS_THRESHOLD: f32 = 0.3;

    let (orig_width, orig_height) = img.dimensions();

    let resized = img.resize_exact(INPUT_WIDTH, INPUT_HEIGHT, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    // NCHW, normalized to roughly [-1, 1]
    let plane = (INPUT_HEIGHT * INPUT_WIDTH) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = y as usize * INPUT_WIDTH as usize + x as usize;
        input_data[idx] = (pixel[0] as f32 - 127.0) / 128.0;
        input_data[plane + idx] = (pixel[1] as f32 - 127.0) / 128.0;
        input_data[2 * plane + idx] = (pixel[2] as f32 - 127.0) / 128.0;
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize],
        input_data.into_boxed_slice(),
    ))
    .map_err(extraction_failed)?;

    let outputs = session
        .run(ort::inputs!["input" => input_tensor])
        .map_err(extraction_failed)?;

    let scores_value = outputs
        .get("scores")
        .ok_or_else(|| extraction_failed("no scores output"))?;
    let boxes_value = outputs
        .get("boxes")
        .ok_or_else(|| extraction_failed("no boxes output"))?;

    let (scores_shape, scores_data) = scores_value
        .try_extract_tensor::<f32>()
        .map_err(extraction_failed)?;
    let (_boxes_shape, boxes_data) = boxes_value
        .try_extract_tensor::<f32>()
        .map_err(extraction_failed)?;

    // scores: [1, anchors, 2] (background, face); boxes: [1, anchors, 4] normalized x1,y1,x2,y2
    let num_anchors = scores_shape.get(1).copied().unwrap_or(0).max(0) as usize;
    if scores_data.len() < num_anchors * 2 || boxes_data.len() < num_anchors * 4 {
        return Err(extraction_failed("detector output shape mismatch"));
    }

    let mut face_boxes = Vec::new();

    for i in 0..num_anchors {
        let confidence = scores_data[i * 2 + 1];

        if confidence > confidence_threshold {
            let x1 = (boxes_data[i * 4] * orig_width as f32) as i32;
            let y1 = (boxes_data[i * 4 + 1] * orig_height as f32) as i32;
            let x2 = (boxes_data[i * 4 + 2] * orig_width as f32) as i32;
            let y2 = (boxes_data[i * 4 + 3] * orig_height as f32) as i32;

            let bbox = BoundingBox {
                x: x1.max(0),
                y: y1.max(0),
                width: (x2 - x1).max(1),
                height: (y2 - y1).max(1),
            };

            face_boxes.push((bbox, confidence));
        }
    }

    Ok(nms(face_boxes, NMS_THRESHOLD))
}

/// Non-maximum suppression to remove overlapping detections
fn nms(mut boxes: Vec<(BoundingBox, f32)>, threshold: f32) -> Vec<(BoundingBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<(BoundingBox, f32)> = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }

        keep.push(boxes[i]);

        for j in (i + 1)..boxes.len() {
            if !suppressed[j] && compute_iou(&boxes[i].0, &boxes[j].0) > threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection over Union between two bounding boxes
fn compute_iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = ((x2 - x1).max(0) * (y2 - y1).max(0)) as f32;
    let area_a = (a.width * a.height) as f32;
    let area_b = (b.width * b.height) as f32;
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Crop face region from image with 20% padding
fn crop_face(img: &DynamicImage, bbox: &BoundingBox, img_width: u32, img_height: u32) -> DynamicImage {
    let padding_x = (bbox.width as f32 * 0.2) as i32;
    let padding_y = (bbox.height as f32 * 0.2) as i32;

    let x = ((bbox.x - padding_x).max(0) as u32).min(img_width.saturating_sub(1));
    let y = ((bbox.y - padding_y).max(0) as u32).min(img_height.saturating_sub(1));
    let w = ((bbox.width + padding_x * 2) as u32).min(img_width - x);
    let h = ((bbox.height + padding_y * 2) as u32).min(img_height - y);

    img.crop_imm(x, y, w.max(1), h.max(1))
}

/// Run ArcFace embedding model on a face crop
fn run_arcface_embedding(session: &mut Session, face_img: &DynamicImage) -> Result<Vec<f32>, ExtractError> {
    const INPUT_SIZE: u32 = 112;

    let resized = face_img.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = y as usize * INPUT_SIZE as usize + x as usize;
        // ArcFace normalization: (pixel - 127.5) / 127.5
        input_data[idx] = (pixel[0] as f32 - 127.5) / 127.5;
        input_data[plane + idx] = (pixel[1] as f32 - 127.5) / 127.5;
        input_data[2 * plane + idx] = (pixel[2] as f32 - 127.5) / 127.5;
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input_data.into_boxed_slice(),
    ))
    .map_err(extraction_failed)?;

    // ArcFace ONNX model uses "data" as input name
    let outputs = session
        .run(ort::inputs!["data" => input_tensor])
        .map_err(extraction_failed)?;

    let embedding_output = outputs
        .iter()
        .next()
        .ok_or_else(|| extraction_failed("no embedding output"))?;

    let (_shape, embedding_data) = embedding_output
        .1
        .try_extract_tensor::<f32>()
        .map_err(extraction_failed)?;

    Ok(embedding_data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou() {
        let a = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        let b = BoundingBox { x: 0, y: 0, width: 10, height: 10 };
        assert!((compute_iou(&a, &b) - 1.0).abs() < 0.001);

        let c = BoundingBox { x: 20, y: 20, width: 10, height: 10 };
        assert!((compute_iou(&a, &c) - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let boxes = vec![
            (BoundingBox { x: 0, y: 0, width: 10, height: 10 }, 0.8),
            (BoundingBox { x: 1, y: 1, width: 10, height: 10 }, 0.95),
            (BoundingBox { x: 50, y: 50, width: 10, height: 10 }, 0.75),
        ];

        let kept = nms(boxes, 0.3);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].1 - 0.95).abs() < f32::EPSILON);
        assert_eq!(kept[1].0.x, 50);
    }

    #[test]
    fn test_crop_stays_inside_image() {
        let img = DynamicImage::new_rgb8(100, 80);
        let bbox = BoundingBox { x: 90, y: 70, width: 30, height: 30 };
        let crop = crop_face(&img, &bbox, 100, 80);
        let (w, h) = crop.dimensions();
        assert!(w >= 1 && w <= 100);
        assert!(h >= 1 && h <= 80);
    }
}
