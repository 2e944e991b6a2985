//! Files attached to a job
//!
//! A staged file pairs the name the job opens it under with the download
//! filename backing it, plus transfer/caching flags. Order matters: a file's
//! position is its index in the input template.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::{self, CacheError, CacheStore};

/// Open-name directory every image archive is exposed under.
pub const IMAGE_DIR: &str = "shared/image";

/// Open name of the startup script.
pub const SCRIPT_OPEN_NAME: &str = "shared/boinc_app";

/// Errors from staging extra input files.
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("unknown file flag '{0}' (expected sticky, no_delete or gzip)")]
    UnknownFlag(String),

    #[error("invalid input file spec '{0}' (expected OPEN_NAME=PATH[:flag,...])")]
    InvalidSpec(String),

    #[error("failed to read input file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Transfer and caching flags understood by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFlag {
    /// Keep in the client's cache across jobs
    Sticky,
    /// Never garbage-collect on the server
    NoDelete,
    /// Transfer compressed; decompressed before the job sees it
    Gzip,
}

impl FileFlag {
    /// Element name in the input template.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFlag::Sticky => "sticky",
            FileFlag::NoDelete => "no_delete",
            FileFlag::Gzip => "gzip",
        }
    }

    /// Flags carried by every image archive.
    pub fn image_archive() -> BTreeSet<FileFlag> {
        [FileFlag::Sticky, FileFlag::NoDelete, FileFlag::Gzip]
            .into_iter()
            .collect()
    }
}

impl fmt::Display for FileFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileFlag {
    type Err = StagingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sticky" => Ok(FileFlag::Sticky),
            "no_delete" | "nodelete" => Ok(FileFlag::NoDelete),
            "gzip" => Ok(FileFlag::Gzip),
            other => Err(StagingError::UnknownFlag(other.to_string())),
        }
    }
}

/// One file the job receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFile {
    /// Logical name inside the job's slot directory
    pub open_name: String,
    /// Download filename in the cache store
    pub backing: String,
    /// Flags, rendered in a fixed order
    pub flags: BTreeSet<FileFlag>,
}

impl StagedFile {
    pub fn new(open_name: impl Into<String>, backing: impl Into<String>) -> Self {
        Self {
            open_name: open_name.into(),
            backing: backing.into(),
            flags: BTreeSet::new(),
        }
    }

    pub fn with_flags(mut self, flags: impl IntoIterator<Item = FileFlag>) -> Self {
        self.flags.extend(flags);
        self
    }

    /// An image archive (layer or metadata), exposed under [`IMAGE_DIR`].
    pub fn image_archive(backing: &str) -> Self {
        Self::new(format!("{}/{}", IMAGE_DIR, backing), backing)
            .with_flags(FileFlag::image_archive())
    }
}

/// An extra file supplied by the user: `OPEN_NAME=PATH[:flag,flag]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub open_name: String,
    pub path: PathBuf,
    pub flags: BTreeSet<FileFlag>,
}

impl FromStr for InputFile {
    type Err = StagingError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || StagingError::InvalidSpec(spec.to_string());
        let (open_name, rest) = spec.split_once('=').ok_or_else(invalid)?;

        // A trailing ":a,b" is a flag list only if every item parses as a flag.
        let (path, flags) = match rest.rsplit_once(':') {
            Some((path, list)) if !path.is_empty() => {
                match list.split(',').map(FileFlag::from_str).collect::<Result<BTreeSet<_>, _>>() {
                    Ok(flags) => (path, flags),
                    Err(_) => (rest, BTreeSet::new()),
                }
            }
            _ => (rest, BTreeSet::new()),
        };

        if open_name.is_empty() || path.is_empty() || Path::new(open_name).is_absolute() {
            return Err(invalid());
        }

        Ok(Self {
            open_name: open_name.to_string(),
            path: PathBuf::from(path),
            flags,
        })
    }
}

impl InputFile {
    /// Copy the file into the store under a content-addressed name.
    pub fn stage(&self, store: &dyn CacheStore) -> Result<StagedFile, StagingError> {
        let content = fs::read(&self.path).map_err(|source| StagingError::Read {
            path: self.path.clone(),
            source,
        })?;
        let basename = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "input".to_string());
        let backing = cache::content_filename("input", &content, Some(&basename));

        stage_bytes(store, &backing, &content)?;
        Ok(StagedFile::new(&self.open_name, backing).with_flags(self.flags.iter().copied()))
    }
}

/// Write `content` under `name` unless the store already has it.
pub fn stage_bytes(store: &dyn CacheStore, name: &str, content: &[u8]) -> Result<(), CacheError> {
    if !store.exists(name)? {
        let path = store.path_for(name)?;
        cache::commit_bytes(&path, content)?;
        tracing::debug!(name, bytes = content.len(), "Staged file");
    }
    Ok(())
}
