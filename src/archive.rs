//! Archive extraction from an unpacked image export.
//!
//! Each call produces one uncompressed tar and its gzip sibling for a single
//! unit of the export (one layer, or the residual metadata). Paths inside the
//! archive are relative to the export root so that extracting all archives
//! into one directory reproduces the export. Entries are written in sorted
//! order with ownership and timestamps stripped.
//!
//! Commit order is gzip first, tar last: the `.tar` is what the cache checks,
//! so its presence implies the sibling is complete too.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder, HeaderMode};
use walkdir::WalkDir;

use crate::cache::{self, CacheError, Commit, PendingEntry};

/// Errors from archive creation and inspection.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive source missing: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("failed to archive {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("{member} not found in {}", .archive.display())]
    MemberMissing { archive: PathBuf, member: String },
}

/// What to put in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// One layer's content (directory or blob), relative to the export root
    Layer(PathBuf),
    /// Residual metadata files, relative to the export root
    Metadata(Vec<PathBuf>),
}

impl Selector {
    fn roots(&self) -> Vec<&Path> {
        match self {
            Selector::Layer(path) => vec![path.as_path()],
            Selector::Metadata(files) => files.iter().map(PathBuf::as_path).collect(),
        }
    }
}

/// Files produced by [`extract`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivePaths {
    pub tar: PathBuf,
    pub gz: PathBuf,
    /// Whether the tar was written by this call or by a concurrent writer
    pub commit: Commit,
}

/// Archive the selected part of `source_dir` into `dest` and `dest.gz`.
pub fn extract(source_dir: &Path, selector: &Selector, dest: &Path) -> Result<ArchivePaths, ArchiveError> {
    for root in selector.roots() {
        let full = source_dir.join(root);
        if full.symlink_metadata().is_err() {
            return Err(ArchiveError::MissingSource(full));
        }
    }

    let tar = PendingEntry::begin(dest)?;
    write_tar(source_dir, selector, tar.file())?;

    let gz = cache::gz_sibling(dest);
    let mut contents = tar.reopen()?;
    cache::commit(&gz, |w| compress(&mut contents, w))?;

    let commit = tar.finish()?;
    tracing::debug!(archive = %dest.display(), ?commit, "Created archive");

    Ok(ArchivePaths {
        tar: dest.to_path_buf(),
        gz,
        commit,
    })
}

fn write_tar(source_dir: &Path, selector: &Selector, out: &File) -> Result<(), ArchiveError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| ArchiveError::Io { path, source }
    };

    let mut builder = Builder::new(BufWriter::new(out));
    builder.mode(HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    for root in selector.roots() {
        let walk = WalkDir::new(source_dir.join(root))
            .follow_links(false)
            .sort_by_file_name();
        for entry in walk {
            let entry = entry?;
            let rel = entry
                .path()
                .strip_prefix(source_dir)
                .map_err(|_| ArchiveError::MissingSource(entry.path().to_path_buf()))?;
            builder
                .append_path_with_name(entry.path(), rel)
                .map_err(io_err(entry.path()))?;
        }
    }

    let mut writer = builder.into_inner().map_err(io_err(source_dir))?;
    writer.flush().map_err(io_err(source_dir))?;
    Ok(())
}

fn compress<R: Read, W: Write>(input: &mut R, output: W) -> io::Result<()> {
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(input, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}

/// Read one member out of an existing tar archive.
pub fn read_member(archive: &Path, member: &str) -> Result<Vec<u8>, ArchiveError> {
    let io_err = |source| ArchiveError::Io {
        path: archive.to_path_buf(),
        source,
    };
    let file = File::open(archive).map_err(io_err)?;
    let mut tar = tar::Archive::new(file);

    for entry in tar.entries().map_err(io_err)? {
        let mut entry = entry.map_err(io_err)?;
        let path = entry.path().map_err(io_err)?.into_owned();
        let name = path.strip_prefix(".").unwrap_or(&path);
        if name == Path::new(member) {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes).map_err(io_err)?;
            return Ok(bytes);
        }
    }

    Err(ArchiveError::MemberMissing {
        archive: archive.to_path_buf(),
        member: member.to_string(),
    })
}
