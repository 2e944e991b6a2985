//! Top-level error taxonomy and exit codes
//!
//! Module errors are folded into [`PackageError`] together with the
//! [`Stage`] they occurred in. External tool diagnostics are carried as-is.

use std::fmt;
use std::io;

use boinc_project::SubmitError;

use crate::archive::ArchiveError;
use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::image::ImageError;
use crate::staging::StagingError;
use crate::template::TemplateError;

/// Stable process exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    /// Bad flags or configuration
    Config = 1,
    /// Image runtime, archiving or project tool failure
    ExternalTool = 2,
    /// A cache entry exists but is unusable
    CacheInconsistency = 3,
    /// create_work rejected the job
    Submission = 4,
    /// Run abandoned on request
    Interrupted = 80,
}

impl ExitCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

/// Pipeline stage an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Creating the per-run scratch directory
    Scratch,
    Inspect,
    Export,
    LayerExtraction,
    MetadataExtraction,
    Inputs,
    Script,
    Template,
    Submit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Scratch => "scratch directory",
            Stage::Inspect => "inspect",
            Stage::Export => "export",
            Stage::LayerExtraction => "layer extraction",
            Stage::MetadataExtraction => "metadata extraction",
            Stage::Inputs => "input staging",
            Stage::Script => "script",
            Stage::Template => "template",
            Stage::Submit => "submit",
        })
    }
}

/// Boxed module error carried by [`PackageError::ExternalTool`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from a packaging run
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("{stage} failed: {source}")]
    ExternalTool {
        stage: Stage,
        #[source]
        source: BoxError,
    },

    #[error("{stage} failed: {source}")]
    CacheInconsistency {
        stage: Stage,
        #[source]
        source: CacheError,
    },

    #[error("submit failed: {0}")]
    Submission(#[from] SubmitError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{stage} failed: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: io::Error,
    },
}

impl PackageError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            PackageError::ExternalTool { .. } | PackageError::Io { .. } => ExitCode::ExternalTool,
            PackageError::CacheInconsistency { .. } => ExitCode::CacheInconsistency,
            PackageError::Submission(_) => ExitCode::Submission,
            PackageError::Config(_) => ExitCode::Config,
        }
    }

    /// Stage the error is attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PackageError::ExternalTool { stage, .. }
            | PackageError::CacheInconsistency { stage, .. }
            | PackageError::Io { stage, .. } => Some(*stage),
            PackageError::Submission(_) => Some(Stage::Submit),
            PackageError::Config(_) => None,
        }
    }

    pub fn io(stage: Stage, source: io::Error) -> Self {
        PackageError::Io { stage, source }
    }

    pub fn cache(stage: Stage, source: CacheError) -> Self {
        match source {
            CacheError::Inconsistent { .. } => PackageError::CacheInconsistency { stage, source },
            other => PackageError::ExternalTool {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn image(stage: Stage, source: ImageError) -> Self {
        PackageError::ExternalTool {
            stage,
            source: Box::new(source),
        }
    }

    pub fn archive(stage: Stage, source: ArchiveError) -> Self {
        match source {
            ArchiveError::Cache(inner) => Self::cache(stage, inner),
            other => PackageError::ExternalTool {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn staging(stage: Stage, source: StagingError) -> Self {
        match source {
            StagingError::Cache(inner) => Self::cache(stage, inner),
            other => PackageError::ExternalTool {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn template(source: TemplateError) -> Self {
        PackageError::ExternalTool {
            stage: Stage::Template,
            source: Box::new(source),
        }
    }
}
