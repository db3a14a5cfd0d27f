//! Object storage holding session photos.
//!
//! Photos are addressed by `/`-separated keys, S3 style. The only backend
//! shipped here maps keys onto a directory tree.

use std::path::{Component, Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::{StorageConfig, SESSION_PLACEHOLDER};
use crate::error::StorageError;

pub trait ObjectStorage: Send + Sync {
    /// Keys starting with `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Full contents of the object at `key`.
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Object storage rooted at a local directory.
pub struct LocalObjectStorage {
    root: PathBuf,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to a path under the root, refusing anything that could
    /// escape it.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe || key.contains('\\') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

impl ObjectStorage for LocalObjectStorage {
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // Walk the deepest directory the prefix names, then filter by the
        // full prefix so partial file names behave like S3.
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let dir = self.resolve(dir_part)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&dir).follow_links(false) {
            let entry = entry.map_err(|e| StorageError::Io {
                key: prefix.to_string(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(key) = self.key_for(entry.path()) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(key)?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            _ => StorageError::Io {
                key: key.to_string(),
                source: e,
            },
        })
    }
}

/// Where a session's photos may live, in order of preference.
#[derive(Debug, Clone)]
pub struct SessionLayout {
    templates: Vec<String>,
}

impl SessionLayout {
    pub fn new(templates: Vec<String>) -> Self {
        Self { templates }
    }

    pub fn prefixes_for(&self, session_id: &Uuid) -> Vec<String> {
        let id = session_id.to_string();
        self.templates
            .iter()
            .map(|t| t.replace(SESSION_PLACEHOLDER, &id))
            .collect()
    }
}

impl From<&StorageConfig> for SessionLayout {
    fn from(config: &StorageConfig) -> Self {
        Self::new(config.session_prefixes.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn touch(root: &Path, key: &str, contents: &[u8]) {
        let path = root.join(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_list_by_prefix() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "photos/s1/previews/b.jpg", b"b");
        touch(dir.path(), "photos/s1/previews/a.jpg", b"a");
        touch(dir.path(), "photos/s1/original.jpg", b"o");
        touch(dir.path(), "photos/s2/previews/c.jpg", b"c");

        let storage = LocalObjectStorage::new(dir.path());
        assert_eq!(
            storage.list("photos/s1/previews/").unwrap(),
            vec!["photos/s1/previews/a.jpg", "photos/s1/previews/b.jpg"]
        );
        assert_eq!(storage.list("photos/s1/").unwrap().len(), 3);
        assert_eq!(storage.list("photos/s1/previews/a").unwrap().len(), 1);
        assert!(storage.list("photos/missing/").unwrap().is_empty());
    }

    #[test]
    fn test_get() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "k/v.bin", b"payload");
        let storage = LocalObjectStorage::new(dir.path());

        assert_eq!(storage.get("k/v.bin").unwrap(), b"payload");
        assert!(matches!(storage.get("k/none.bin"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let storage = LocalObjectStorage::new(dir.path());

        assert!(matches!(storage.get("../etc/passwd"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(storage.get("/etc/passwd"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(storage.list("a/../../"), Err(StorageError::InvalidKey(_))));
    }

    #[test]
    fn test_session_layout() {
        let layout = SessionLayout::new(vec![
            "production/photos/{session_id}/previews/".to_string(),
            "production/photos/{session_id}/".to_string(),
        ]);
        let id = Uuid::new_v4();
        let prefixes = layout.prefixes_for(&id);
        assert_eq!(prefixes[0], format!("production/photos/{id}/previews/"));
        assert_eq!(prefixes[1], format!("production/photos/{id}/"));
    }
}
