//! Content-addressed download cache.
//!
//! Every staged file has a deterministic name derived from a content id
//! (`layer_<id>.tar`, `image_<id>.tar`, ...). A file present under its final
//! name is authoritative: writes go to a temporary file in the destination
//! directory and are persisted without clobbering, so a final name never
//! refers to a partial write. Two runs racing on the same name both do the
//! work; the first to persist wins and the content is identical either way.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use boinc_project::{DirHier, ProjectError};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

/// Permission bits of committed entries.
#[cfg(unix)]
const ENTRY_MODE: u32 = 0o644;

/// Errors from cache lookups and commits.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cannot resolve cache path for {name}: {source}")]
    Resolve {
        name: String,
        #[source]
        source: ProjectError,
    },

    /// A cache path exists but is not a readable regular file.
    #[error("cache entry {} is unusable: {reason}", .path.display())]
    Inconsistent { path: PathBuf, reason: String },

    #[error("failed to write cache entry {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Resolves deterministic filenames to locations in a shared store.
pub trait CacheStore: Send + Sync {
    /// Location of `name` in the store (parents exist).
    fn path_for(&self, name: &str) -> Result<PathBuf, CacheError>;

    /// Whether `name` is already staged.
    fn exists(&self, name: &str) -> Result<bool, CacheError> {
        let path = self.path_for(name)?;
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(true),
            Ok(_) => Err(CacheError::Inconsistent {
                path,
                reason: "not a regular file".to_string(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Inconsistent {
                path,
                reason: e.to_string(),
            }),
        }
    }
}

/// A single flat directory.
#[derive(Debug, Clone)]
pub struct FlatStore {
    root: PathBuf,
}

impl FlatStore {
    /// Open (and create) a flat store at `root`.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CacheStore for FlatStore {
    fn path_for(&self, name: &str) -> Result<PathBuf, CacheError> {
        Ok(self.root.join(name))
    }
}

impl CacheStore for DirHier {
    fn path_for(&self, name: &str) -> Result<PathBuf, CacheError> {
        self.resolve(name).map_err(|source| CacheError::Resolve {
            name: name.to_string(),
            source,
        })
    }
}

/// Cache filename for an image's residual metadata archive.
pub fn image_filename(image_id: &str) -> String {
    format!("image_{}.tar", image_id)
}

/// Cache filename for a layer archive.
pub fn layer_filename(layer_id: &str) -> String {
    format!("layer_{}.tar", layer_id)
}

/// Content-addressed filename for arbitrary bytes: `<prefix>_<sha256>[_<suffix>]`.
pub fn content_filename(prefix: &str, content: &[u8], suffix: Option<&str>) -> String {
    let digest = hex::encode(Sha256::digest(content));
    match suffix {
        Some(suffix) => format!("{}_{}_{}", prefix, digest, suffix),
        None => format!("{}_{}", prefix, digest),
    }
}

/// Path of the gzip sibling of `path` (`x.tar` -> `x.tar.gz`).
pub fn gz_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".gz");
    PathBuf::from(name)
}

/// Outcome of a [`commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// This call wrote the entry
    Written,
    /// Another writer got there first; our copy was discarded
    AlreadyPresent,
}

/// A cache entry being written under a temporary name.
///
/// Nothing is visible under the final name until [`PendingEntry::finish`];
/// dropping an unfinished entry removes the temporary file.
#[derive(Debug)]
pub struct PendingEntry {
    temp: NamedTempFile,
    path: PathBuf,
}

impl PendingEntry {
    /// Start writing the entry that will live at `path`.
    pub fn begin(path: &Path) -> Result<Self, CacheError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let temp = NamedTempFile::new_in(dir).map_err(|source| CacheError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            temp,
            path: path.to_path_buf(),
        })
    }

    /// Final location of the entry.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Handle for writing the contents.
    pub fn file(&self) -> &File {
        self.temp.as_file()
    }

    /// Fresh read handle on what has been written so far, positioned at the start.
    pub fn reopen(&self) -> Result<File, CacheError> {
        self.temp.reopen().map_err(|e| self.write_err(e))
    }

    /// Sync and persist under the final name, without clobbering.
    pub fn finish(self) -> Result<Commit, CacheError> {
        self.file().sync_all().map_err(|e| self.write_err(e))?;

        // Temp files are created 0600; the project's web server must be able to serve these.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            self.file()
                .set_permissions(fs::Permissions::from_mode(ENTRY_MODE))
                .map_err(|e| self.write_err(e))?;
        }

        let Self { temp, path } = self;
        match temp.persist_noclobber(&path) {
            Ok(_) => Ok(Commit::Written),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %path.display(), "Cache entry appeared concurrently");
                Ok(Commit::AlreadyPresent)
            }
            Err(e) => Err(CacheError::Write {
                path,
                source: e.error,
            }),
        }
    }

    fn write_err(&self, source: io::Error) -> CacheError {
        CacheError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

/// Atomically create `path` from whatever `write` produces.
///
/// Existing entries are never replaced.
pub fn commit<F>(path: &Path, write: F) -> Result<Commit, CacheError>
where
    F: FnOnce(&mut BufWriter<&File>) -> io::Result<()>,
{
    let pending = PendingEntry::begin(path)?;
    {
        let mut writer = BufWriter::new(pending.file());
        write(&mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| pending.write_err(e))?;
    }
    pending.finish()
}

/// [`commit`] a byte buffer.
pub fn commit_bytes(path: &Path, bytes: &[u8]) -> Result<Commit, CacheError> {
    commit(path, |w| w.write_all(bytes))
}
