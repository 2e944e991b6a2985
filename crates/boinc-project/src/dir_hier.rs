//! Download hierarchy path resolution
//!
//! BOINC fans download files out over hashed subdirectories. The project's
//! `bin/dir_hier_path <name>` tool prints the absolute path a file with the
//! given name must live at; this is the only place that knows the fan-out.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ProjectError;

/// Relative location of the resolver inside a project directory.
pub const DIR_HIER_PATH_TOOL: &str = "bin/dir_hier_path";

/// Resolves download filenames through a project's `dir_hier_path`.
#[derive(Debug, Clone)]
pub struct DirHier {
    project_dir: PathBuf,
}

impl DirHier {
    /// Create a resolver for the project rooted at `project_dir`.
    pub fn new(project_dir: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let project_dir = project_dir.as_ref().to_path_buf();
        if !project_dir.is_dir() {
            return Err(ProjectError::ProjectNotFound(project_dir));
        }
        Ok(Self { project_dir })
    }

    /// Project root this resolver runs tools in.
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Resolve `name` to its download path.
    ///
    /// The parent directory is created if missing, so the caller can write
    /// to the returned path directly.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ProjectError> {
        let output = Command::new(self.project_dir.join(DIR_HIER_PATH_TOOL))
            .arg(name)
            .current_dir(&self.project_dir)
            .output()
            .map_err(|source| ProjectError::Spawn {
                tool: DIR_HIER_PATH_TOOL.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProjectError::ToolFailed {
                tool: DIR_HIER_PATH_TOOL.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let printed = stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .ok_or_else(|| ProjectError::EmptyOutput {
                tool: DIR_HIER_PATH_TOOL.to_string(),
                name: name.to_string(),
            })?;

        let path = PathBuf::from(printed);
        let path = if path.is_absolute() {
            path
        } else {
            self.project_dir.join(path)
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::trace!(name, path = %path.display(), "Resolved download path");
        Ok(path)
    }
}
