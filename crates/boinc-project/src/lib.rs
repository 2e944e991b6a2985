//! BOINC project collaborators
//!
//! The packaging pipeline only needs two things from a BOINC project:
//! a way to resolve a download filename to its location in the project's
//! download hierarchy, and a way to submit a finished work unit. Both are
//! provided here as thin wrappers around the project's own tools
//! (`bin/dir_hier_path` and `bin/create_work`).

pub mod dir_hier;
pub mod error;
pub mod options;
pub mod submit;

pub use dir_hier::DirHier;
pub use error::{ProjectError, SubmitError};
pub use options::JobOptions;
pub use submit::{CreateWork, RecordingSubmitter, Submission, Submitter};

/// Default application name for submitted work.
pub const DEFAULT_APPNAME: &str = "boinc2docker";
