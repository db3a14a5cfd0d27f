use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Placeholder substituted with the session UUID in storage prefix templates.
pub const SESSION_PLACEHOLDER: &str = "{session_id}";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub faces: FacesConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[default]
    Sqlite,
    Postgresql,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseType,

    #[serde(default = "default_db_path")]
    pub sqlite_path: PathBuf,

    #[serde(default)]
    pub postgresql_url: Option<String>,

    #[serde(default)]
    pub pool_size: Option<u32>,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facepass")
        .join("embeddings.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseType::default(),
            sqlite_path: default_db_path(),
            postgresql_url: None,
            pool_size: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacesConfig {
    /// Where the ONNX models live (downloaded on first start if missing)
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    /// Minimum detector score for a face to be kept
    #[serde(default = "default_detection_threshold")]
    pub detection_threshold: f32,

    /// Default minimum cosine similarity for a search match
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    #[serde(default = "default_min_image_dimension")]
    pub min_image_dimension: u32,

    #[serde(default = "default_max_image_dimension")]
    pub max_image_dimension: u32,
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("facepass/models")
}

fn default_detection_threshold() -> f32 {
    0.6
}

fn default_similarity_threshold() -> f32 {
    0.5
}

fn default_embedding_dimension() -> usize {
    512
}

fn default_intra_threads() -> usize {
    4
}

fn default_max_image_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_min_image_dimension() -> u32 {
    10
}

fn default_max_image_dimension() -> u32 {
    4096
}

impl Default for FacesConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            detection_threshold: default_detection_threshold(),
            similarity_threshold: default_similarity_threshold(),
            embedding_dimension: default_embedding_dimension(),
            intra_threads: default_intra_threads(),
            max_image_bytes: default_max_image_bytes(),
            min_image_dimension: default_min_image_dimension(),
            max_image_dimension: default_max_image_dimension(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the object store
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    /// Prefix templates tried in order when scanning a session.
    /// Each must contain `{session_id}`.
    #[serde(default = "default_session_prefixes")]
    pub session_prefixes: Vec<String>,
}

fn default_storage_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("facepass/objects")
}

fn default_session_prefixes() -> Vec<String> {
    vec![
        "production/photos/{session_id}/previews/".to_string(),
        "production/photos/{session_id}/".to_string(),
    ]
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            session_prefixes: default_session_prefixes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Photos processed per indexing run; the rest wait for the next run
    #[serde(default = "default_max_photos_per_run")]
    pub max_photos_per_run: usize,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

fn default_max_photos_per_run() -> usize {
    500
}

fn default_image_extensions() -> Vec<String> {
    vec![
        "jpg".to_string(),
        "jpeg".to_string(),
        "png".to_string(),
        "webp".to_string(),
        "bmp".to_string(),
        "tiff".to_string(),
    ]
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_photos_per_run: default_max_photos_per_run(),
            image_extensions: default_image_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

fn default_limit() -> usize {
    50
}

fn default_max_limit() -> usize {
    1000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

/// Connection settings for the external, read-only session and photo catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub backend: DatabaseType,

    #[serde(default = "default_catalog_path")]
    pub sqlite_path: PathBuf,

    #[serde(default)]
    pub postgresql_url: Option<String>,
}

fn default_catalog_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facepass")
        .join("catalog.db")
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseType::default(),
            sqlite_path: default_catalog_path(),
            postgresql_url: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            faces: FacesConfig::default(),
            storage: StorageConfig::default(),
            indexing: IndexingConfig::default(),
            search: SearchConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, honouring `FACEPASS_CONFIG`.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from an explicit path. A missing file is created with defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {:?}", path))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse config file {:?}", path))?
        } else {
            let config = Config::default();
            config.save_to(path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("faces.detection_threshold", self.faces.detection_threshold),
            ("faces.similarity_threshold", self.faces.similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{} must be between 0.0 and 1.0, got {}", name, value);
            }
        }

        if self.faces.embedding_dimension == 0 {
            bail!("faces.embedding_dimension must be positive");
        }

        if self.faces.min_image_dimension > self.faces.max_image_dimension {
            bail!("faces.min_image_dimension exceeds faces.max_image_dimension");
        }

        if self.storage.session_prefixes.is_empty() {
            bail!("storage.session_prefixes must list at least one prefix");
        }

        if let Some(bad) = self
            .storage
            .session_prefixes
            .iter()
            .find(|p| !p.contains(SESSION_PLACEHOLDER))
        {
            bail!("storage prefix {:?} does not contain {}", bad, SESSION_PLACEHOLDER);
        }

        if self.search.max_limit == 0 || self.search.default_limit == 0 {
            bail!("search limits must be positive");
        }

        if self.search.default_limit > self.search.max_limit {
            bail!("search.default_limit exceeds search.max_limit");
        }

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("facepass")
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("FACEPASS_CONFIG") {
            return PathBuf::from(path);
        }

        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.faces.embedding_dimension, 512);
        assert!((config.faces.similarity_threshold - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [faces]
            similarity_threshold = 0.42

            [storage]
            session_prefixes = ["staging/photos/{session_id}/"]
            "#,
        )
        .unwrap();

        assert!((config.faces.similarity_threshold - 0.42).abs() < f32::EPSILON);
        assert_eq!(config.faces.embedding_dimension, 512);
        assert_eq!(config.storage.session_prefixes.len(), 1);
        assert_eq!(config.indexing.max_photos_per_run, 500);
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.faces.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_prefix_without_placeholder() {
        let mut config = Config::default();
        config.storage.session_prefixes = vec!["production/photos/".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.search.default_limit, 50);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.storage.session_prefixes, config.storage.session_prefixes);
    }
}
