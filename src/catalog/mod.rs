//! Read-only view of the photo sessions and photos owned by the wider
//! platform. Sessions say whether face search is enabled; photos carry the
//! display metadata attached to search results.

#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::CatalogConfig;
#[cfg(feature = "postgres")]
use crate::config::DatabaseType;
use crate::error::CatalogError;

pub use sqlite::SqliteCatalog;

/// Extensions stripped when comparing photo identifiers.
const KNOWN_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "bmp", "tiff", "tif", "heic", "gif"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub name: Option<String>,
    pub search_enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhotoMetadata {
    pub photo_id: String,
    pub file_name: Option<String>,
    pub display_name: Option<String>,
    pub preview_path: Option<String>,
    pub original_path: Option<String>,
}

pub trait SessionDirectory: Send + Sync {
    fn find_session(&self, session_id: &Uuid) -> Result<Option<SessionInfo>, CatalogError>;
}

pub trait PhotoCatalog: Send + Sync {
    fn photos_for_session(&self, session_id: &Uuid) -> Result<Vec<PhotoMetadata>, CatalogError>;
}

/// Both halves of the catalog, as the search path needs them.
pub trait Catalog: SessionDirectory + PhotoCatalog {}

impl<T: SessionDirectory + PhotoCatalog> Catalog for T {}

/// Open the configured catalog backend.
pub fn open_catalog(config: &CatalogConfig) -> Result<Arc<dyn Catalog>, CatalogError> {
    #[cfg(feature = "postgres")]
    {
        if config.backend == DatabaseType::Postgresql {
            let url = config
                .postgresql_url
                .as_deref()
                .ok_or_else(|| CatalogError::Misconfigured("PostgreSQL URL not configured".to_string()))?;
            return Ok(Arc::new(postgres::PgCatalog::open(url)?));
        }
    }

    Ok(Arc::new(SqliteCatalog::open(&config.sqlite_path)?))
}

/// Strip trailing image extensions, case-insensitively and repeatedly, so
/// `IMG_01.JPG` and `IMG_01.jpg.webp` both become `IMG_01`.
pub fn strip_known_extensions(name: &str) -> &str {
    let mut current = name;
    while let Some((stem, ext)) = current.rsplit_once('.') {
        if stem.is_empty() || !KNOWN_EXTENSIONS.iter().any(|k| k.eq_ignore_ascii_case(ext)) {
            break;
        }
        current = stem;
    }
    current
}

/// Lookup table from normalized identifier to catalog entry.
///
/// Each photo is reachable by its catalog id and by its file name. Where the
/// two collide across photos, the catalog id wins.
pub struct CatalogIndex {
    photos: Vec<PhotoMetadata>,
    by_key: HashMap<String, usize>,
}

impl CatalogIndex {
    pub fn new(photos: Vec<PhotoMetadata>) -> Self {
        let mut by_key = HashMap::new();

        for (idx, photo) in photos.iter().enumerate() {
            by_key.insert(strip_known_extensions(&photo.photo_id).to_string(), idx);
        }
        for (idx, photo) in photos.iter().enumerate() {
            if let Some(file_name) = &photo.file_name {
                by_key
                    .entry(strip_known_extensions(file_name).to_string())
                    .or_insert(idx);
            }
        }

        Self { photos, by_key }
    }

    pub fn lookup(&self, photo_id: &str) -> Option<&PhotoMetadata> {
        self.by_key
            .get(strip_known_extensions(photo_id))
            .map(|&idx| &self.photos[idx])
    }

    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(id: &str, file_name: Option<&str>) -> PhotoMetadata {
        PhotoMetadata {
            photo_id: id.to_string(),
            file_name: file_name.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_strip_known_extensions() {
        assert_eq!(strip_known_extensions("abc.jpg"), "abc");
        assert_eq!(strip_known_extensions("abc.JPG"), "abc");
        assert_eq!(strip_known_extensions("abc.jpg.webp"), "abc");
        assert_eq!(strip_known_extensions("abc.txt"), "abc.txt");
        assert_eq!(strip_known_extensions("1700000000-a1b2c3"), "1700000000-a1b2c3");
        assert_eq!(strip_known_extensions(".jpg"), ".jpg");
    }

    #[test]
    fn test_index_matches_id_and_file_name() {
        let index = CatalogIndex::new(vec![
            photo("p-1", Some("1700000000-aaaa.jpg")),
            photo("p-2.png", None),
        ]);

        assert_eq!(index.len(), 2);
        assert_eq!(index.lookup("p-1").unwrap().photo_id, "p-1");
        assert_eq!(index.lookup("1700000000-aaaa").unwrap().photo_id, "p-1");
        assert_eq!(index.lookup("1700000000-aaaa.webp").unwrap().photo_id, "p-1");
        assert_eq!(index.lookup("p-2").unwrap().photo_id, "p-2.png");
        assert!(index.lookup("unknown").is_none());
    }

    #[test]
    fn test_catalog_id_wins_over_file_name() {
        let index = CatalogIndex::new(vec![
            photo("a", Some("b.jpg")),
            photo("b", None),
        ]);
        assert_eq!(index.lookup("b").unwrap().photo_id, "b");
    }
}
