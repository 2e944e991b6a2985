//! Container image handling
//!
//! - Image references with tag defaulting
//! - The unpacked `docker save` layout and its layer list
//! - The local image runtime used to inspect and export images

mod export;
mod runtime;

pub use export::{ExportManifest, Layer, MANIFEST_FILE, REPOSITORIES_FILE};
pub use runtime::{CliRuntime, ImageRuntime};

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Tag applied when a reference names neither a tag nor a digest.
pub const DEFAULT_TAG: &str = "latest";

/// Errors from image inspection, export and layout parsing.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("invalid image reference '{0}'")]
    InvalidReference(String),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The runtime failed; `stderr` is its own diagnostic, passed through.
    #[error("{program} {action} {image} failed: {stderr}")]
    ToolFailed {
        program: String,
        action: String,
        image: String,
        stderr: String,
    },

    #[error("{program} printed an unusable image id '{output}'")]
    BadImageId { program: String, output: String },

    #[error("failed to unpack image export: {0}")]
    Unpack(#[source] io::Error),

    #[error("invalid {file}: {source}")]
    Manifest {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} lists no images")]
    EmptyManifest(String),

    #[error("unsupported layer path '{}'", .0.display())]
    InvalidLayer(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A local image reference: a name plus a tag or digest.
///
/// `myimage` and `myimage:latest` parse to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Repository name, possibly with registry and namespace
    pub name: String,
    /// Tag (always set unless a digest is given)
    pub tag: Option<String>,
    /// Digest (e.g. "sha256:abc...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference, appending the default tag when none is given.
    pub fn parse(reference: &str) -> Result<Self, ImageError> {
        let reference = reference.trim();
        let invalid = || ImageError::InvalidReference(reference.to_string());
        if reference.is_empty() || reference.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        let (name_tag, digest) = match reference.split_once('@') {
            Some((name, digest)) if digest.contains(':') => (name, Some(digest.to_string())),
            Some(_) => return Err(invalid()),
            None => (reference, None),
        };

        // A colon only starts a tag after the last slash; before it, it is a registry port.
        let tag_start = name_tag
            .rfind(':')
            .filter(|&colon| name_tag.rfind('/').map_or(true, |slash| colon > slash));
        let (name, tag) = match tag_start {
            Some(colon) => (&name_tag[..colon], Some(name_tag[colon + 1..].to_string())),
            None => (name_tag, None),
        };

        if name.is_empty() || tag.as_deref() == Some("") {
            return Err(invalid());
        }

        let tag = match (&tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Self {
            name: name.to_string(),
            tag,
            digest,
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
