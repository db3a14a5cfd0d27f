//! Photo identifiers and storage keys.

use uuid::Uuid;

use super::IndexFailure;

pub const MAX_PHOTO_ID_LEN: usize = 255;

/// Check that a photo identifier can be stored and later joined against the
/// catalog.
pub fn validate_photo_id(photo_id: &str) -> Result<(), IndexFailure> {
    let len = photo_id.chars().count();
    if len == 0 || len > MAX_PHOTO_ID_LEN {
        return Err(IndexFailure::InvalidPhotoId(format!(
            "photo id must be 1-{} characters, got {}",
            MAX_PHOTO_ID_LEN, len
        )));
    }

    if photo_id.chars().any(|c| c.is_control() || c == '/') {
        return Err(IndexFailure::InvalidPhotoId(format!(
            "photo id {:?} contains a control character or '/'",
            photo_id
        )));
    }

    Ok(())
}

/// Derive a photo identifier from the file name part of a storage key.
///
/// `production/photos/<session>/previews/1769586652601-3880_ht29.jpg` gives
/// `1769586652601-3880_ht29`. Accepted forms are timestamp-hash tokens, UUIDs,
/// and any other token longer than five characters.
pub fn photo_id_from_storage_key(key: &str) -> Option<String> {
    let file_name = key.rsplit('/').next()?;
    let token = file_name.split('.').next()?;

    if token.contains('-') && token.len() > 10 {
        return Some(token.to_string());
    }

    if Uuid::parse_str(token).is_ok() || token.len() > 5 {
        return Some(token.to_string());
    }

    tracing::warn!(key, token, "Photo id too short, skipping");
    None
}

/// Whether the key's extension is one of `extensions` (case-insensitive).
pub fn has_image_extension(key: &str, extensions: &[String]) -> bool {
    let file_name = key.rsplit('/').next().unwrap_or(key);
    match file_name.rsplit_once('.') {
        Some((_, ext)) => extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_photo_id_from_storage_key() {
        assert_eq!(
            photo_id_from_storage_key("production/photos/s/previews/1769586652601-3880_ht29.jpg"),
            Some("1769586652601-3880_ht29".to_string())
        );

        let id = Uuid::new_v4().to_string();
        assert_eq!(photo_id_from_storage_key(&format!("s/previews/{id}.png")), Some(id));

        assert_eq!(
            photo_id_from_storage_key("s/IMG_0001.JPG"),
            Some("IMG_0001".to_string())
        );
        assert_eq!(photo_id_from_storage_key("s/a.jpg"), None);
        assert_eq!(photo_id_from_storage_key("s/.hidden.jpg"), None);
    }

    #[test]
    fn test_validate_photo_id() {
        assert!(validate_photo_id("IMG_0001").is_ok());
        assert!(validate_photo_id("").is_err());
        assert!(validate_photo_id(&"x".repeat(256)).is_err());
        assert!(validate_photo_id(&"x".repeat(255)).is_ok());
        assert!(validate_photo_id("a/b").is_err());
        assert!(validate_photo_id("a\nb").is_err());
    }

    #[test]
    fn test_has_image_extension() {
        let exts = vec!["jpg".to_string(), "png".to_string()];
        assert!(has_image_extension("a/b/photo.JPG", &exts));
        assert!(has_image_extension("photo.png", &exts));
        assert!(!has_image_extension("a/b/notes.txt", &exts));
        assert!(!has_image_extension("a.jpg/README", &exts));
    }
}
