//! Typed settings built from the merged layers

use std::fs;
use std::path::{Path, PathBuf};

use boinc_project::JobOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;

/// Host config location relative to the user config dir
const HOST_CONFIG: &str = "boinc2docker/config.toml";

/// Project config filename, looked up in the project directory
pub const PROJECT_CONFIG: &str = "boinc2docker.toml";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", .path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {}: {message}", .path.display())]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Origin of a configuration layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Host,
    Project,
    Cli,
}

/// A contributing layer with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// SHA-256 of the raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Where packaged files are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreTarget {
    /// A BOINC project; files are fanned out with `bin/dir_hier_path`
    Project(PathBuf),
    /// A single flat directory, no submission tooling
    Download(PathBuf),
}

/// Effective settings for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub project_dir: Option<PathBuf>,
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    pub appname: String,
    /// Local image runtime program
    pub runtime: String,
    /// Shared directory inside the VM
    pub shared_dir: String,
    pub diagnostics: bool,
    pub parallel_layers: bool,
    /// Parent of the per-run scratch directory (system temp dir when unset)
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
    /// Default create_work options; CLI flags override per key
    #[serde(default)]
    pub create_work: JobOptions,

    /// Layers that contributed, in precedence order
    #[serde(skip)]
    pub sources: Vec<ConfigSource>,
}

impl Settings {
    /// Default host config path (`~/.config/boinc2docker/config.toml`).
    pub fn host_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(HOST_CONFIG))
    }

    /// Build settings from defaults, an optional host file and CLI overrides.
    ///
    /// The project file is read from whichever `project_dir` the host and
    /// CLI layers settle on, and slots in between them.
    pub fn load(host_config: Option<&Path>, cli_overrides: Option<Value>) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = host_config.filter(|p| p.exists()) {
            let (value, digest) = load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Host,
                path: Some(path.to_path_buf()),
                digest: Some(digest),
            });
        }

        let provisional = merge_layers(layers.iter().cloned().chain(cli_overrides.clone()));
        let project_file = provisional
            .get("project_dir")
            .and_then(Value::as_str)
            .map(|dir| Path::new(dir).join(PROJECT_CONFIG))
            .filter(|p| p.exists());

        if let Some(path) = project_file {
            let (value, digest) = load_toml_file(&path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Project,
                path: Some(path),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let mut settings: Settings = serde_json::from_value(merge_layers(layers))?;
        settings.sources = sources;
        settings.validate()?;

        for source in &settings.sources {
            tracing::debug!(origin = ?source.origin, path = ?source.path, "Config layer");
        }
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.appname.trim().is_empty() {
            return Err(ConfigError::ValidationError("appname must not be empty".to_string()));
        }
        if self.runtime.trim().is_empty() {
            return Err(ConfigError::ValidationError("runtime must not be empty".to_string()));
        }
        if !self.shared_dir.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "shared_dir must be an absolute path, got '{}'",
                self.shared_dir
            )));
        }
        if self.project_dir.is_some() && self.download_dir.is_some() {
            return Err(ConfigError::ValidationError(
                "project_dir and download_dir are mutually exclusive".to_string(),
            ));
        }
        self.create_work
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// The configured store, or an error when none is set.
    pub fn store_target(&self) -> Result<StoreTarget, ConfigError> {
        match (&self.project_dir, &self.download_dir) {
            (Some(dir), None) => Ok(StoreTarget::Project(dir.clone())),
            (None, Some(dir)) => Ok(StoreTarget::Download(dir.clone())),
            _ => Err(ConfigError::ValidationError(
                "set project_dir (or --project-dir) or download_dir (or --download-dir)".to_string(),
            )),
        }
    }
}

/// Load and parse a TOML file, returning the value and digest
fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
    let bytes = fs::read(path).map_err(|source| ConfigError::IoError {
        path: path.to_path_buf(),
        source,
    })?;
    let digest = hex::encode(Sha256::digest(&bytes));

    let parse_error = |message: String| ConfigError::ParseError {
        path: path.to_path_buf(),
        message,
    };
    let contents = String::from_utf8(bytes).map_err(|e| parse_error(format!("invalid UTF-8: {}", e)))?;
    let table: toml::Value = toml::from_str(&contents).map_err(|e| parse_error(e.to_string()))?;

    Ok((toml_to_json(table), digest))
}

/// Convert TOML Value to JSON Value
fn toml_to_json(toml: toml::Value) -> Value {
    match toml {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i.into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(arr) => Value::Array(arr.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => {
            Value::Object(table.into_iter().map(|(k, v)| (k, toml_to_json(v))).collect())
        }
    }
}
