//! Decoding uploaded or stored image bytes into pixels.

use image::{DynamicImage, ImageReader};
use std::io::Cursor;

use crate::config::FacesConfig;
use crate::error::ExtractError;

/// Size limits for uploaded selfies.
#[derive(Debug, Clone, Copy)]
pub struct ImageLimits {
    pub max_bytes: usize,
    pub min_dimension: u32,
    pub max_dimension: u32,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self::from(&FacesConfig::default())
    }
}

impl From<&FacesConfig> for ImageLimits {
    fn from(config: &FacesConfig) -> Self {
        Self {
            max_bytes: config.max_image_bytes,
            min_dimension: config.min_image_dimension,
            max_dimension: config.max_image_dimension,
        }
    }
}

/// Convert EXIF orientation value (1-8) to rotation degrees (0, 90, 180, 270)
fn exif_orientation_to_degrees(orientation: u32) -> u32 {
    match orientation {
        6 => 90,  // Rotate 90 CW
        3 => 180, // Rotate 180
        8 => 270, // Rotate 90 CCW
        _ => 0,   // Normal (1) or mirrored variants
    }
}

/// Read the EXIF orientation from image bytes, as rotation degrees.
fn read_exif_rotation(bytes: &[u8]) -> u32 {
    let mut reader = Cursor::new(bytes);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(e) => e,
        Err(_) => return 0,
    };

    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .map(exif_orientation_to_degrees)
        .unwrap_or(0)
}

/// Check uploaded bytes against `limits` without decoding the pixels.
///
/// Only client uploads go through here. Stored session photos are camera
/// originals of any size and are decoded as they are.
pub fn check_upload(bytes: &[u8], limits: &ImageLimits) -> Result<(), ExtractError> {
    if bytes.is_empty() {
        return Err(ExtractError::InvalidImage("empty file".to_string()));
    }

    if bytes.len() > limits.max_bytes {
        return Err(ExtractError::InvalidImage(format!(
            "file too large: {} bytes (max {})",
            bytes.len(),
            limits.max_bytes
        )));
    }

    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ExtractError::InvalidImage(e.to_string()))?
        .into_dimensions()
        .map_err(|e| ExtractError::InvalidImage(e.to_string()))?;

    if width > limits.max_dimension || height > limits.max_dimension {
        return Err(ExtractError::InvalidImage(format!(
            "image dimensions too large: {}x{} (max {}x{})",
            width, height, limits.max_dimension, limits.max_dimension
        )));
    }
    if width < limits.min_dimension || height < limits.min_dimension {
        return Err(ExtractError::InvalidImage(format!(
            "image dimensions too small: {}x{} (min {}x{})",
            width, height, limits.min_dimension, limits.min_dimension
        )));
    }

    Ok(())
}

/// Decode bytes into an upright image.
///
/// Every rejection is an [`ExtractError::InvalidImage`]: the bytes came from a
/// client or a stored photo, and a bad file is not a service fault.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ExtractError> {
    if bytes.is_empty() {
        return Err(ExtractError::InvalidImage("empty file".to_string()));
    }

    let img = image::load_from_memory(bytes)
        .map_err(|e| ExtractError::InvalidImage(e.to_string()))?;

    let img = match read_exif_rotation(bytes) {
        90 => img.rotate90(),
        180 => img.rotate180(),
        270 => img.rotate270(),
        _ => img,
    };

    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageFormat, Rgb, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_decode_valid_png() {
        let img = decode(&png_bytes(64, 48)).unwrap();
        assert_eq!(img.dimensions(), (64, 48));
    }

    #[test]
    fn test_decode_ignores_upload_limits() {
        let img = decode(&png_bytes(6000, 20)).unwrap();
        assert_eq!(img.dimensions(), (6000, 20));
    }

    #[test]
    fn test_rejects_empty_and_garbage() {
        let limits = ImageLimits::default();
        assert!(matches!(decode(&[]), Err(ExtractError::InvalidImage(_))));
        assert!(matches!(
            decode(b"definitely not an image"),
            Err(ExtractError::InvalidImage(_))
        ));
        assert!(matches!(check_upload(&[], &limits), Err(ExtractError::InvalidImage(_))));
        assert!(matches!(
            check_upload(b"definitely not an image", &limits),
            Err(ExtractError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_upload_rejects_out_of_range_dimensions() {
        let limits = ImageLimits {
            max_bytes: 1024 * 1024,
            min_dimension: 10,
            max_dimension: 100,
        };
        assert!(check_upload(&png_bytes(5, 50), &limits).is_err());
        assert!(check_upload(&png_bytes(200, 50), &limits).is_err());
        assert!(check_upload(&png_bytes(50, 50), &limits).is_ok());
    }

    #[test]
    fn test_upload_rejects_default_oversize() {
        let err = check_upload(&png_bytes(6000, 20), &ImageLimits::default()).unwrap_err();
        assert!(err.to_string().contains("6000x20"));
    }

    #[test]
    fn test_upload_rejects_oversized_file() {
        let bytes = png_bytes(64, 64);
        let limits = ImageLimits {
            max_bytes: bytes.len() - 1,
            ..ImageLimits::default()
        };
        assert!(check_upload(&bytes, &limits).is_err());
    }

    #[test]
    fn test_orientation_mapping() {
        assert_eq!(exif_orientation_to_degrees(1), 0);
        assert_eq!(exif_orientation_to_degrees(3), 180);
        assert_eq!(exif_orientation_to_degrees(6), 90);
        assert_eq!(exif_orientation_to_degrees(8), 270);
        assert_eq!(read_exif_rotation(&png_bytes(16, 16)), 0);
    }
}
