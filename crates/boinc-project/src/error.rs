//! Error types for project tool invocations.

use std::io;
use std::path::PathBuf;

/// Errors from resolving paths inside a project.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("project directory not found: {0}")]
    ProjectNotFound(PathBuf),

    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} printed no path for {name}")]
    EmptyOutput { tool: String, name: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from submitting work.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("invalid create_work option '{0}'")]
    InvalidOption(String),

    #[error("failed to read input template: {0}")]
    Template(#[source] io::Error),

    #[error("failed to run create_work: {0}")]
    Spawn(#[source] io::Error),

    /// create_work rejected the work unit; `stderr` is passed through verbatim.
    #[error("create_work exited with {status}: {stderr}")]
    Rejected { status: String, stderr: String },

    #[error("create_work returned no job identifier")]
    NoJobId,
}
