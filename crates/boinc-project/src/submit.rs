//! Work submission
//!
//! - Submitter trait: hand a finished input template and its backing files
//!   to the scheduler, get a job identifier back
//! - CreateWork: runs the project's `bin/create_work`
//! - RecordingSubmitter: in-process submitter for tests

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use crate::error::SubmitError;
use crate::options::JobOptions;

/// Relative location of the submission tool inside a project directory.
pub const CREATE_WORK_TOOL: &str = "bin/create_work";

/// Submits a packaged work unit to the scheduler.
pub trait Submitter: Send + Sync {
    /// Submit `files` (download filenames, in template order) under
    /// `appname` using the input template at `template`.
    ///
    /// Returns the scheduler's identifier for the new job.
    fn submit(
        &self,
        appname: &str,
        options: &JobOptions,
        template: &Path,
        files: &[String],
    ) -> Result<String, SubmitError>;
}

/// Submitter backed by `bin/create_work`.
#[derive(Debug, Clone)]
pub struct CreateWork {
    project_dir: PathBuf,
}

impl CreateWork {
    /// Create a submitter for the project rooted at `project_dir`.
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    /// Build the full argument list for one submission.
    pub fn build_args(
        appname: &str,
        options: &JobOptions,
        template: &Path,
        files: &[String],
    ) -> Vec<String> {
        let mut args = vec![
            "--appname".to_string(),
            appname.to_string(),
            "--wu_template".to_string(),
            template.to_string_lossy().to_string(),
        ];
        args.extend(options.to_args());
        args.extend(files.iter().cloned());
        args
    }
}

impl Submitter for CreateWork {
    fn submit(
        &self,
        appname: &str,
        options: &JobOptions,
        template: &Path,
        files: &[String],
    ) -> Result<String, SubmitError> {
        options.validate()?;

        // Name the work unit up front so a silent create_work still yields an id.
        let mut options = options.clone();
        let wu_name = options
            .wu_name
            .get_or_insert_with(|| generate_wu_name(appname))
            .clone();
        let args = Self::build_args(appname, &options, template, files);

        tracing::debug!(appname, files = files.len(), "Running create_work");
        let output = Command::new(self.project_dir.join(CREATE_WORK_TOOL))
            .args(&args)
            .current_dir(&self.project_dir)
            .output()
            .map_err(SubmitError::Spawn)?;

        if !output.status.success() {
            return Err(SubmitError::Rejected {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // create_work may stay silent on success; the work unit name is the id then.
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() {
            Ok(wu_name)
        } else {
            Ok(stdout)
        }
    }
}

/// Unique work unit name for `appname`.
pub fn generate_wu_name(appname: &str) -> String {
    format!("{}_{}", appname, uuid::Uuid::new_v4().simple())
}

/// A submission captured by [`RecordingSubmitter`].
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub appname: String,
    pub options: JobOptions,
    /// Template contents at submission time
    pub template: String,
    pub files: Vec<String>,
}

/// Submitter that records submissions instead of running a tool.
#[derive(Debug, Default)]
pub struct RecordingSubmitter {
    submissions: Mutex<Vec<Submission>>,
    reject_with: Option<String>,
}

impl RecordingSubmitter {
    /// Create a submitter that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a submitter that rejects every submission with `stderr`.
    pub fn rejecting(stderr: &str) -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
            reject_with: Some(stderr.to_string()),
        }
    }

    /// All submissions so far, in order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

impl Submitter for RecordingSubmitter {
    fn submit(
        &self,
        appname: &str,
        options: &JobOptions,
        template: &Path,
        files: &[String],
    ) -> Result<String, SubmitError> {
        options.validate()?;
        if let Some(ref stderr) = self.reject_with {
            return Err(SubmitError::Rejected {
                status: "exit status: 1".to_string(),
                stderr: stderr.clone(),
            });
        }

        // Templates live in scratch space, so keep the contents rather than the path.
        let template = std::fs::read_to_string(template).map_err(SubmitError::Template)?;
        let mut submissions = self
            .submissions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let job_id = options
            .wu_name
            .clone()
            .unwrap_or_else(|| format!("{}_{}", appname, submissions.len()));
        submissions.push(Submission {
            appname: appname.to_string(),
            options: options.clone(),
            template,
            files: files.to_vec(),
        });
        Ok(job_id)
    }
}
