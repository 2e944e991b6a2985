//! Packaging orchestration
//!
//! One run turns an image and a command into a submitted job:
//! - Inspect the image and look up its metadata archive in the cache
//! - On a miss, export the image into scratch space
//! - Archive every layer not yet in the cache, then the residual metadata
//! - Render and stage the startup script and any extra input files
//! - Write the input template and submit
//!
//! Cancellation is checked at every state boundary and before every layer.
//! The scratch directory is removed on every exit path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use boinc_project::{JobOptions, Submitter};
use rayon::prelude::*;
use tempfile::TempDir;

use crate::archive::{self, Selector};
use crate::cache::{self, CacheStore};
use crate::command::Command;
use crate::config::Settings;
use crate::error::{PackageError, Stage};
use crate::image::{ExportManifest, ImageReference, ImageRuntime, Layer, MANIFEST_FILE};
use crate::script::{self, ScriptConfig, DEFAULT_SHARED_DIR};
use crate::signal::SignalState;
use crate::staging::{self, InputFile, StagedFile, SCRIPT_OPEN_NAME};
use crate::template::InputTemplate;

/// Progress of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    /// The image's metadata archive (and every layer) is already cached
    CacheHit,
    /// The image must be exported from the runtime
    NeedExport,
    LayersStaged,
    ScriptBuilt,
    ManifestBuilt,
    Submitted,
    CleanedUp,
}

/// What to package.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub image: ImageReference,
    pub command: Command,
    pub entrypoint: Option<String>,
    pub prerun: Vec<String>,
    pub postrun: Vec<String>,
    /// Extra files attached ahead of the startup script
    pub input_files: Vec<InputFile>,
    pub appname: String,
    pub options: JobOptions,
}

impl JobRequest {
    pub fn new(image: ImageReference, command: Command) -> Self {
        Self {
            image,
            command,
            entrypoint: None,
            prerun: Vec::new(),
            postrun: Vec::new(),
            input_files: Vec::new(),
            appname: boinc_project::DEFAULT_APPNAME.to_string(),
            options: JobOptions::default(),
        }
    }
}

/// Knobs that do not change what is packaged.
#[derive(Debug, Clone)]
pub struct PackagerConfig {
    /// Shared directory inside the VM
    pub shared_dir: String,
    pub diagnostics: bool,
    /// Archive missing layers on scoped worker threads
    pub parallel_layers: bool,
    /// Parent of the scratch directory (system temp dir when unset)
    pub scratch_root: Option<PathBuf>,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            shared_dir: DEFAULT_SHARED_DIR.to_string(),
            diagnostics: true,
            parallel_layers: false,
            scratch_root: None,
        }
    }
}

impl From<&Settings> for PackagerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            shared_dir: settings.shared_dir.clone(),
            diagnostics: settings.diagnostics,
            parallel_layers: settings.parallel_layers,
            scratch_root: settings.scratch_root.clone(),
        }
    }
}

/// Result of a run that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Submitted {
        job_id: String,
        /// Attached files in template order
        staged: Vec<StagedFile>,
    },
    /// Cancellation was requested; nothing was submitted
    Interrupted { at: State },
}

/// Per-run scratch directory, removed on drop.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
}

impl ScratchDir {
    pub fn new(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("boinc2docker_");
        let dir = match root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(Self { dir: Some(dir) })
    }

    pub fn path(&self) -> &Path {
        self.dir.as_ref().map_or_else(|| Path::new(""), |d| d.path())
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => tracing::debug!(scratch = %path.display(), "Removed scratch directory"),
                Err(e) => {
                    tracing::warn!(scratch = %path.display(), error = %e, "Failed to remove scratch directory")
                }
            }
        }
    }
}

/// Why a run stopped early.
enum Stop {
    Interrupted,
    Failed(PackageError),
}

impl From<PackageError> for Stop {
    fn from(err: PackageError) -> Self {
        Stop::Failed(err)
    }
}

/// Mutable state of one run.
struct Progress {
    state: State,
    export_dir: Option<PathBuf>,
}

/// Runs packaging jobs against injected collaborators.
pub struct Packager {
    runtime: Arc<dyn ImageRuntime>,
    store: Arc<dyn CacheStore>,
    submitter: Arc<dyn Submitter>,
    cancel: Arc<SignalState>,
    config: PackagerConfig,
}

impl Packager {
    pub fn new(
        runtime: Arc<dyn ImageRuntime>,
        store: Arc<dyn CacheStore>,
        submitter: Arc<dyn Submitter>,
        cancel: Arc<SignalState>,
        config: PackagerConfig,
    ) -> Self {
        Self {
            runtime,
            store,
            submitter,
            cancel,
            config,
        }
    }

    /// Package and submit one job.
    ///
    /// Returns [`Outcome::Interrupted`] instead of an error when cancellation
    /// was requested, including when the failure was caused by the
    /// interrupt itself (e.g. the runtime being killed mid-export). A
    /// submission failure is always reported as such.
    pub fn run(&self, request: &JobRequest) -> Result<Outcome, PackageError> {
        if self.cancel.is_cancel_requested() {
            return Ok(Outcome::Interrupted { at: State::Init });
        }
        let scratch = ScratchDir::new(self.config.scratch_root.as_deref())
            .map_err(|e| PackageError::io(Stage::Scratch, e))?;

        let mut progress = Progress {
            state: State::Init,
            export_dir: None,
        };
        let result = self.package(request, scratch.path(), &mut progress);
        drop(scratch);
        tracing::debug!(state = ?State::CleanedUp, "Run finished");

        match result {
            Ok((job_id, staged)) => Ok(Outcome::Submitted { job_id, staged }),
            Err(Stop::Interrupted) => {
                tracing::warn!(at = ?progress.state, "Interrupted, nothing submitted");
                Ok(Outcome::Interrupted { at: progress.state })
            }
            Err(Stop::Failed(err))
                if self.cancel.is_cancel_requested() && err.stage() != Some(Stage::Submit) =>
            {
                tracing::warn!(at = ?progress.state, error = %err, "Interrupted, nothing submitted");
                Ok(Outcome::Interrupted { at: progress.state })
            }
            Err(Stop::Failed(err)) => Err(err),
        }
    }

    fn package(
        &self,
        request: &JobRequest,
        scratch: &Path,
        progress: &mut Progress,
    ) -> Result<(String, Vec<StagedFile>), Stop> {
        // 1. Inspect and look up the image
        let image_id = self
            .runtime
            .image_id(&request.image)
            .map_err(|e| PackageError::image(Stage::Inspect, e))?;
        let image_name = cache::image_filename(&image_id);
        let image_cached = self
            .store
            .exists(&image_name)
            .map_err(|e| PackageError::cache(Stage::Inspect, e))?;

        let mut manifest = None;
        if image_cached {
            tracing::info!(image = %request.image, id = %short(&image_id), "Image already packaged, reading existing info");
            let cached = self.read_cached_manifest(&image_name)?;
            let layers = cached.layers().map_err(|e| PackageError::image(Stage::Inspect, e))?;
            if self.missing_layers(&layers)?.is_empty() {
                manifest = Some(cached);
            } else {
                tracing::warn!(image = %request.image, "Layer archives missing from cache, re-exporting");
            }
        }

        // 2. Export when anything is missing
        let manifest = match manifest {
            Some(cached) => {
                self.advance(progress, State::CacheHit)?;
                cached
            }
            None => {
                self.advance(progress, State::NeedExport)?;
                tracing::info!(image = %request.image, "Exporting image");
                let export_dir = scratch.join("export");
                fs::create_dir_all(&export_dir).map_err(|e| PackageError::io(Stage::Export, e))?;
                self.runtime
                    .export(&request.image, &export_dir)
                    .map_err(|e| PackageError::image(Stage::Export, e))?;
                let exported =
                    ExportManifest::load(&export_dir).map_err(|e| PackageError::image(Stage::Export, e))?;
                progress.export_dir = Some(export_dir);
                exported
            }
        };
        let layers = manifest
            .layers()
            .map_err(|e| PackageError::image(Stage::LayerExtraction, e))?;

        // 3. Layers, then residual metadata
        let layer_names = self.stage_layers(&layers, progress.export_dir.as_deref())?;
        self.stage_metadata(&manifest, &image_name, progress.export_dir.as_deref())?;
        self.advance(progress, State::LayersStaged)?;

        // 4. Extra inputs and the startup script
        let mut staged = Vec::new();
        for input in &request.input_files {
            let file = input
                .stage(self.store.as_ref())
                .map_err(|e| PackageError::staging(Stage::Inputs, e))?;
            staged.push(file);
        }

        let mut archives = layer_names;
        archives.push(image_name);
        let script_name = self.stage_script(request, &archives)?;
        staged.push(StagedFile::new(SCRIPT_OPEN_NAME, script_name));
        staged.extend(archives.iter().map(|name| StagedFile::image_archive(name)));
        self.advance(progress, State::ScriptBuilt)?;

        // 5. Input template
        let template = InputTemplate::build(&staged);
        let template_path = template.write_to(scratch).map_err(PackageError::template)?;
        self.advance(progress, State::ManifestBuilt)?;

        // 6. Submit; no cancellation past this point
        tracing::info!(appname = %request.appname, files = staged.len(), "Submitting job");
        let job_id = self
            .submitter
            .submit(&request.appname, &request.options, &template_path, &template.backing_files())
            .map_err(PackageError::from)?;
        progress.state = State::Submitted;
        tracing::info!(job = %job_id, "Submitted");

        Ok((job_id, staged))
    }

    fn read_cached_manifest(&self, image_name: &str) -> Result<ExportManifest, PackageError> {
        let path = self
            .store
            .path_for(image_name)
            .map_err(|e| PackageError::cache(Stage::Inspect, e))?;
        let bytes = archive::read_member(&path, MANIFEST_FILE).map_err(|e| match e {
            archive::ArchiveError::Cache(inner) => PackageError::cache(Stage::Inspect, inner),
            other => PackageError::cache(
                Stage::Inspect,
                cache::CacheError::Inconsistent {
                    path: path.clone(),
                    reason: other.to_string(),
                },
            ),
        })?;
        ExportManifest::from_slice(&bytes).map_err(|e| {
            PackageError::cache(
                Stage::Inspect,
                cache::CacheError::Inconsistent {
                    path: path.clone(),
                    reason: e.to_string(),
                },
            )
        })
    }

    fn missing_layers<'l>(&self, layers: &'l [Layer]) -> Result<Vec<&'l Layer>, PackageError> {
        let mut missing = Vec::new();
        for layer in layers {
            let name = cache::layer_filename(&layer.id);
            if !self
                .store
                .exists(&name)
                .map_err(|e| PackageError::cache(Stage::LayerExtraction, e))?
            {
                missing.push(layer);
            }
        }
        Ok(missing)
    }

    /// Archive every uncached layer; returns all layer filenames in order.
    fn stage_layers(&self, layers: &[Layer], export_dir: Option<&Path>) -> Result<Vec<String>, Stop> {
        let names = layers.iter().map(|l| cache::layer_filename(&l.id)).collect();
        let missing = self.missing_layers(layers)?;
        if missing.is_empty() {
            return Ok(names);
        }
        let export_dir = export_dir.ok_or_else(|| {
            PackageError::cache(
                Stage::LayerExtraction,
                cache::CacheError::Inconsistent {
                    path: PathBuf::from(cache::layer_filename(&missing[0].id)),
                    reason: "layer archive disappeared from the cache during the run".to_string(),
                },
            )
        })?;

        if self.config.parallel_layers && missing.len() > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(layer_workers(missing.len()))
                .thread_name(|i| format!("boinc2docker-layer-{}", i))
                .build()
                .map_err(|e| {
                    let err = io::Error::new(io::ErrorKind::Other, e.to_string());
                    PackageError::io(Stage::LayerExtraction, err)
                })?;
            // Returns only once every worker is done, so none outlives the scratch dir.
            pool.install(|| {
                missing
                    .par_iter()
                    .map(|layer| self.extract_layer(export_dir, layer))
                    .collect::<Result<Vec<()>, Stop>>()
            })?;
        } else {
            for layer in missing {
                self.extract_layer(export_dir, layer)?;
            }
        }
        Ok(names)
    }

    fn extract_layer(&self, export_dir: &Path, layer: &Layer) -> Result<(), Stop> {
        self.check_cancel()?;
        let name = cache::layer_filename(&layer.id);
        let dest = self
            .store
            .path_for(&name)
            .map_err(|e| PackageError::cache(Stage::LayerExtraction, e))?;

        tracing::info!(layer = %short(&layer.id), "Creating input file for layer");
        archive::extract(export_dir, &Selector::Layer(layer.content.clone()), &dest)
            .map_err(|e| PackageError::archive(Stage::LayerExtraction, e))?;
        Ok(())
    }

    fn stage_metadata(
        &self,
        manifest: &ExportManifest,
        image_name: &str,
        export_dir: Option<&Path>,
    ) -> Result<(), Stop> {
        let Some(export_dir) = export_dir else {
            return Ok(());
        };
        let cached = self
            .store
            .exists(image_name)
            .map_err(|e| PackageError::cache(Stage::MetadataExtraction, e))?;
        if cached {
            return Ok(());
        }
        self.check_cancel()?;

        let files = manifest
            .metadata_files(export_dir)
            .map_err(|e| PackageError::image(Stage::MetadataExtraction, e))?;
        let dest = self
            .store
            .path_for(image_name)
            .map_err(|e| PackageError::cache(Stage::MetadataExtraction, e))?;

        tracing::info!(archive = image_name, "Creating input file for image");
        archive::extract(export_dir, &Selector::Metadata(files), &dest)
            .map_err(|e| PackageError::archive(Stage::MetadataExtraction, e))?;
        Ok(())
    }

    fn stage_script(&self, request: &JobRequest, archives: &[String]) -> Result<String, PackageError> {
        let config = ScriptConfig {
            image: request.image.clone(),
            entrypoint: request.entrypoint.clone(),
            command: request.command.clone(),
            prerun: request.prerun.clone(),
            postrun: request.postrun.clone(),
            archives: archives.to_vec(),
            shared_dir: self.config.shared_dir.clone(),
            diagnostics: self.config.diagnostics,
        };
        let rendered = script::render(&config);
        let name = cache::content_filename("boinc_app", rendered.as_bytes(), None);
        staging::stage_bytes(self.store.as_ref(), &name, rendered.as_bytes())
            .map_err(|e| PackageError::cache(Stage::Script, e))?;
        Ok(name)
    }

    fn check_cancel(&self) -> Result<(), Stop> {
        if self.cancel.is_cancel_requested() {
            Err(Stop::Interrupted)
        } else {
            Ok(())
        }
    }

    fn advance(&self, progress: &mut Progress, next: State) -> Result<(), Stop> {
        self.check_cancel()?;
        tracing::debug!(from = ?progress.state, to = ?next, "State transition");
        progress.state = next;
        Ok(())
    }
}

/// Worker count for archiving `missing` layers: one per layer, capped at the
/// machine's parallelism.
fn layer_workers(missing: usize) -> usize {
    let cap = std::thread::available_parallelism().map_or(4, |n| n.get());
    missing.clamp(1, cap)
}

/// First 12 characters of an id, for log lines.
fn short(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
