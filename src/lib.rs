//! boinc2docker - package local container images as BOINC jobs
//!
//! A container image and a command become a work unit whose input files are
//! content-addressed, per-layer archives shared across every job that uses
//! the same layers, plus a startup script that reassembles and runs the
//! image inside the volunteer's VM.

pub mod archive;
pub mod cache;
pub mod command;
pub mod config;
pub mod error;
pub mod image;
pub mod pipeline;
pub mod script;
pub mod signal;
pub mod staging;
pub mod template;

pub use cache::{CacheStore, FlatStore};
pub use command::Command;
pub use config::{Settings, StoreTarget};
pub use error::{ExitCode, PackageError, Stage};
pub use image::{CliRuntime, ImageReference, ImageRuntime};
pub use pipeline::{JobRequest, Outcome, Packager, PackagerConfig, State};
pub use staging::{FileFlag, InputFile, StagedFile};
pub use template::InputTemplate;
