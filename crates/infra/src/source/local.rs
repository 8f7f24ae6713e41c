use std::fs;
use std::path::{Component, Path, PathBuf};

use serde_json::Value as JsonValue;
use tracing::debug;
use walkdir::WalkDir;

use summarizer_core::{ContainerId, Item, ItemId, ItemMetadata};

use super::{ItemFetcher, ItemLister, SourceError};

/// Lists and reads documents from a local directory tree.
///
/// Item ids are paths relative to the root, with `/` separators.
#[derive(Debug, Clone)]
pub struct LocalFolderSource {
    root: PathBuf,
    extensions: Vec<String>,
}

impl LocalFolderSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: vec!["pdf".to_string(), "zip".to_string()],
        }
    }

    /// Replace the accepted file extensions (case-insensitive, without dot).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The container id under which this folder is processed.
    pub fn container_id(&self) -> Result<ContainerId, SourceError> {
        ContainerId::new(self.root.to_string_lossy())
            .map_err(|e| SourceError::unavailable(e.to_string()))
    }

    fn extension_of(path: &Path) -> Option<String> {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    fn accepts(&self, path: &Path) -> bool {
        Self::extension_of(path).is_some_and(|ext| self.extensions.contains(&ext))
    }

    fn relative_id(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    /// Resolve an item id back to a path, refusing anything outside the root.
    fn resolve(&self, id: &ItemId) -> Result<PathBuf, SourceError> {
        let rel = Path::new(id.as_str());
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(SourceError::NotFound(id.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn is_container(&self, id: &ItemId) -> bool {
        self.container_id()
            .map(|c| c.as_str() == id.as_str())
            .unwrap_or(false)
    }
}

fn media_type_for(ext: Option<&str>) -> &'static str {
    match ext {
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

impl ItemLister for LocalFolderSource {
    fn list(&self, container: &ContainerId) -> Result<Vec<Item>, SourceError> {
        let own = self.container_id()?;
        if container != &own {
            return Err(SourceError::NotFound(container.to_string()));
        }
        if !self.root.is_dir() {
            return Err(SourceError::unavailable(format!(
                "not a directory: {}",
                self.root.display()
            )));
        }

        let mut items = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|e| SourceError::unavailable(e.to_string()))?;
            if !entry.file_type().is_file() || !self.accepts(entry.path()) {
                continue;
            }
            let Some(rel) = self.relative_id(entry.path()) else {
                continue;
            };
            let size = entry
                .metadata()
                .map_err(|e| SourceError::unavailable(e.to_string()))?
                .len();
            let ext = Self::extension_of(entry.path());
            let id = ItemId::new(rel.clone()).map_err(|e| SourceError::unavailable(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();

            items.push(
                Item::new(id, name, rel)
                    .with_size(size)
                    .with_media_type(media_type_for(ext.as_deref()))
                    .with_source_metadata(
                        "local_path",
                        JsonValue::String(entry.path().to_string_lossy().into_owned()),
                    ),
            );
        }

        debug!(root = %self.root.display(), count = items.len(), "scanned local folder");
        Ok(items)
    }
}

impl ItemFetcher for LocalFolderSource {
    fn fetch(&self, id: &ItemId) -> Result<Vec<u8>, SourceError> {
        let path = self.resolve(id)?;
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SourceError::NotFound(id.to_string()),
            _ => SourceError::Io(e),
        })
    }

    fn info(&self, id: &ItemId) -> Result<ItemMetadata, SourceError> {
        if self.is_container(id) {
            let name = self
                .root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.root.to_string_lossy().into_owned());
            return Ok(ItemMetadata {
                id: id.clone(),
                name,
                media_type: Some("inode/directory".to_string()),
                size: None,
            });
        }

        let path = self.resolve(id)?;
        let meta = fs::metadata(&path).map_err(|_| SourceError::NotFound(id.to_string()))?;
        let ext = Self::extension_of(&path);
        Ok(ItemMetadata {
            id: id.clone(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            media_type: Some(media_type_for(ext.as_deref()).to_string()),
            size: Some(meta.len()),
        })
    }
}
