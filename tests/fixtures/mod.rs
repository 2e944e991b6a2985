//! Test fixtures for packaging runs
//!
//! - FakeRuntime: an image runtime that writes a synthetic `docker save`
//!   layout and counts how often it was asked to
//! - Workspace: a temp dir holding a flat store and a scratch root
//! - CancellingStore: a store that requests cancellation when a given name
//!   is first looked up

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use boinc2docker::cache::CacheError;
use boinc2docker::image::ImageError;
use boinc2docker::signal::SignalState;
use boinc2docker::{
    CacheStore, FlatStore, ImageReference, ImageRuntime, JobRequest, Packager, PackagerConfig,
};
use boinc_project::Submitter;
use tempfile::TempDir;

pub const IMAGE_ID: &str = "4e2f1a0c9b8d7e6f5a4b3c2d1e0f9a8b7c6d5e4f3a2b1c0d9e8f7a6b5c4d3e2f";

/// Export shape to synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `<id>/layer.tar` + `<image_id>.json`
    Legacy,
    /// `blobs/sha256/<hex>` + `index.json` + `oci-layout`
    Blob,
}

/// When the fake runtime should request cancellation.
#[derive(Debug, Clone)]
pub enum ExportBehavior {
    Normal,
    /// Fail like a runtime killed by the interrupt
    CancelAndFail(Arc<SignalState>),
    /// Finish the export, then request cancellation
    CancelAfter(Arc<SignalState>),
    /// Fail with this stderr
    Fail(String),
}

pub struct FakeRuntime {
    pub image_id: String,
    pub layers: Vec<(String, Vec<u8>)>,
    pub layout: Layout,
    pub behavior: ExportBehavior,
    exports: AtomicUsize,
    inspected: Mutex<Vec<String>>,
}

impl FakeRuntime {
    pub fn new(layout: Layout) -> Self {
        Self {
            image_id: IMAGE_ID.to_string(),
            layers: vec![
                ("aaa111".to_string(), b"base layer".to_vec()),
                ("bbb222".to_string(), b"app layer".to_vec()),
                ("ccc333".to_string(), b"config layer".to_vec()),
            ],
            layout,
            behavior: ExportBehavior::Normal,
            exports: AtomicUsize::new(0),
            inspected: Mutex::new(Vec::new()),
        }
    }

    pub fn legacy() -> Self {
        Self::new(Layout::Legacy)
    }

    /// Replace the layers, keeping the given overlay order.
    pub fn with_layers(mut self, ids: &[&str]) -> Self {
        self.layers = ids
            .iter()
            .map(|id| (id.to_string(), format!("content of {}", id).into_bytes()))
            .collect();
        self
    }

    pub fn with_behavior(mut self, behavior: ExportBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn exports(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }

    /// References passed to `image_id`, as rendered.
    pub fn inspected(&self) -> Vec<String> {
        self.inspected.lock().unwrap().clone()
    }

    /// Layer ids in overlay order.
    pub fn layer_ids(&self) -> Vec<String> {
        self.layers.iter().map(|(id, _)| id.clone()).collect()
    }

    fn write_export(&self, dest: &Path) -> std::io::Result<()> {
        let (config, layer_paths): (String, Vec<String>) = match self.layout {
            Layout::Legacy => {
                for (id, content) in &self.layers {
                    fs::create_dir_all(dest.join(id))?;
                    fs::write(dest.join(id).join("layer.tar"), content)?;
                    fs::write(dest.join(id).join("json"), format!("{{\"id\":\"{}\"}}", id))?;
                    fs::write(dest.join(id).join("VERSION"), "1.0")?;
                }
                fs::write(dest.join("repositories"), "{\"app\":{\"latest\":\"x\"}}")?;
                (
                    format!("{}.json", self.image_id),
                    self.layers.iter().map(|(id, _)| format!("{}/layer.tar", id)).collect(),
                )
            }
            Layout::Blob => {
                let blobs = dest.join("blobs/sha256");
                fs::create_dir_all(&blobs)?;
                for (id, content) in &self.layers {
                    fs::write(blobs.join(id), content)?;
                }
                fs::write(dest.join("index.json"), "{\"schemaVersion\":2}")?;
                fs::write(dest.join("oci-layout"), "{\"imageLayoutVersion\":\"1.0.0\"}")?;
                (
                    format!("blobs/sha256/{}", self.image_id),
                    self.layers.iter().map(|(id, _)| format!("blobs/sha256/{}", id)).collect(),
                )
            }
        };

        fs::write(dest.join(&config), "{\"architecture\":\"amd64\"}")?;
        let manifest = serde_json::json!([{
            "Config": config,
            "RepoTags": ["app:latest"],
            "Layers": layer_paths,
        }]);
        fs::write(dest.join("manifest.json"), manifest.to_string())
    }
}

impl ImageRuntime for FakeRuntime {
    fn image_id(&self, image: &ImageReference) -> Result<String, ImageError> {
        self.inspected.lock().unwrap().push(image.to_string());
        Ok(self.image_id.clone())
    }

    fn export(&self, image: &ImageReference, dest: &Path) -> Result<(), ImageError> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        let failed = |stderr: &str| ImageError::ToolFailed {
            program: "docker".to_string(),
            action: "save".to_string(),
            image: image.to_string(),
            stderr: stderr.to_string(),
        };
        match &self.behavior {
            ExportBehavior::Normal => self.write_export(dest)?,
            ExportBehavior::CancelAndFail(state) => {
                self.write_export(dest)?;
                state.request_cancel();
                return Err(failed("signal: interrupt"));
            }
            ExportBehavior::CancelAfter(state) => {
                self.write_export(dest)?;
                state.request_cancel();
            }
            ExportBehavior::Fail(stderr) => return Err(failed(stderr)),
        }
        Ok(())
    }
}

pub struct CancellingStore {
    inner: Arc<FlatStore>,
    prefix: String,
    cancel: Arc<SignalState>,
}

impl CacheStore for CancellingStore {
    fn path_for(&self, name: &str) -> Result<PathBuf, CacheError> {
        if name.starts_with(&self.prefix) {
            self.cancel.request_cancel();
        }
        self.inner.path_for(name)
    }
}

/// Temp dir with a flat store and a scratch root.
pub struct Workspace {
    pub temp: TempDir,
    pub store: Arc<FlatStore>,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FlatStore::new(temp.path().join("download")).unwrap());
        Self { temp, store }
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.temp.path().join("scratch")
    }

    pub fn config(&self) -> PackagerConfig {
        PackagerConfig {
            scratch_root: Some(self.scratch_root()),
            ..PackagerConfig::default()
        }
    }

    pub fn packager(
        &self,
        runtime: Arc<dyn ImageRuntime>,
        submitter: Arc<dyn Submitter>,
        cancel: Arc<SignalState>,
    ) -> Packager {
        self.packager_with(runtime, submitter, cancel, self.config())
    }

    pub fn packager_with(
        &self,
        runtime: Arc<dyn ImageRuntime>,
        submitter: Arc<dyn Submitter>,
        cancel: Arc<SignalState>,
        config: PackagerConfig,
    ) -> Packager {
        let store: Arc<dyn CacheStore> = self.store.clone();
        Packager::new(runtime, store, submitter, cancel, config)
    }

    /// Packager whose store requests cancellation on the first lookup of a
    /// name starting with `prefix`.
    pub fn packager_cancelling_at(
        &self,
        prefix: &str,
        runtime: Arc<dyn ImageRuntime>,
        submitter: Arc<dyn Submitter>,
        cancel: Arc<SignalState>,
    ) -> Packager {
        let store = Arc::new(CancellingStore {
            inner: self.store.clone(),
            prefix: prefix.to_string(),
            cancel: cancel.clone(),
        });
        Packager::new(runtime, store, submitter, cancel, self.config())
    }

    /// Sorted filenames in the store.
    pub fn store_files(&self) -> Vec<String> {
        list(self.store.root())
    }

    /// Entries left under the scratch root.
    pub fn scratch_entries(&self) -> Vec<String> {
        if self.scratch_root().exists() {
            list(&self.scratch_root())
        } else {
            Vec::new()
        }
    }

    pub fn read(&self, name: &str) -> Vec<u8> {
        fs::read(self.store.root().join(name)).unwrap()
    }
}

pub fn list(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

pub fn request(image: &str) -> JobRequest {
    JobRequest::new(
        ImageReference::parse(image).unwrap(),
        boinc2docker::Command::from("echo hello"),
    )
}

/// Member names of a tar archive, directories without trailing slash.
pub fn tar_members(path: &Path) -> Vec<String> {
    let mut archive = tar::Archive::new(fs::File::open(path).unwrap());
    archive
        .entries()
        .unwrap()
        .map(|e| {
            let name = e.unwrap().path().unwrap().to_string_lossy().to_string();
            name.trim_end_matches('/').to_string()
        })
        .collect()
}
