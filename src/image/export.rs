//! The unpacked `docker save` layout
//!
//! `manifest.json` is an array whose first entry names the image config
//! file, its repository tags, and its layers in overlay order. Layers come
//! in two shapes:
//! - legacy: `<layer_id>/layer.tar`, the whole `<layer_id>/` directory is the unit
//! - blob: `blobs/sha256/<hex>`, the blob file itself is the unit

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ImageError;

/// Name of the export's manifest file.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Legacy repository/tag index, present in older exports.
pub const REPOSITORIES_FILE: &str = "repositories";

const LEGACY_LAYER_FILE: &str = "layer.tar";

/// One entry of `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    /// Relative path of the image config file
    #[serde(rename = "Config")]
    pub config: String,
    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Option<Vec<String>>,
    /// Relative layer paths, base layer first
    #[serde(rename = "Layers")]
    pub layers: Vec<String>,
}

/// A layer of an exported image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    /// Content identifier, used as the cache key
    pub id: String,
    /// Relative path of the layer's content inside the export
    pub content: PathBuf,
}

impl ExportManifest {
    /// Parse `manifest.json` bytes, taking the first listed image.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ImageError> {
        let mut entries: Vec<ExportManifest> =
            serde_json::from_slice(bytes).map_err(|source| ImageError::Manifest {
                file: MANIFEST_FILE.to_string(),
                source,
            })?;
        if entries.is_empty() {
            return Err(ImageError::EmptyManifest(MANIFEST_FILE.to_string()));
        }
        Ok(entries.swap_remove(0))
    }

    /// Load the manifest from an unpacked export.
    pub fn load(export_dir: &Path) -> Result<Self, ImageError> {
        let bytes = fs::read(export_dir.join(MANIFEST_FILE))?;
        Self::from_slice(&bytes)
    }

    /// Layers in overlay order.
    pub fn layers(&self) -> Result<Vec<Layer>, ImageError> {
        self.layers.iter().map(|l| Layer::from_manifest_path(l)).collect()
    }

    /// Residual metadata files (config, manifest, tag index) present in
    /// `export_dir`, as relative paths.
    pub fn metadata_files(&self, export_dir: &Path) -> Result<Vec<PathBuf>, ImageError> {
        let config = checked_relative(&self.config)?;
        let mut files = vec![config, PathBuf::from(MANIFEST_FILE)];
        if export_dir.join(REPOSITORIES_FILE).is_file() {
            files.push(PathBuf::from(REPOSITORIES_FILE));
        }
        Ok(files)
    }
}

impl Layer {
    /// Derive the layer unit from a `Layers` entry.
    pub fn from_manifest_path(entry: &str) -> Result<Self, ImageError> {
        let path = checked_relative(entry)?;
        let invalid = || ImageError::InvalidLayer(path.clone());

        let file_name = path.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty());

        let (id, content) = match parent {
            Some(dir) if file_name == LEGACY_LAYER_FILE => {
                let id = dir.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
                (id.to_string(), dir.to_path_buf())
            }
            _ => (file_name.to_string(), path.clone()),
        };

        let id = id.strip_suffix(".tar").unwrap_or(&id).to_string();
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !safe {
            return Err(invalid());
        }

        Ok(Self { id, content })
    }
}

/// Reject absolute paths and `..` so archive selectors stay inside the export.
fn checked_relative(entry: &str) -> Result<PathBuf, ImageError> {
    let path = PathBuf::from(entry);
    let ok = !entry.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if ok {
        Ok(path)
    } else {
        Err(ImageError::InvalidLayer(path))
    }
}
