//! Layered configuration
//!
//! Four layers, later wins:
//! 1. Built-in defaults
//! 2. Host config (~/.config/boinc2docker/config.toml, or --config)
//! 3. Project config (<project_dir>/boinc2docker.toml)
//! 4. CLI flags

mod defaults;
mod merge;
mod settings;

pub use defaults::BuiltinDefaults;
pub use merge::{deep_merge, merge_layers};
pub use settings::{ConfigError, ConfigOrigin, ConfigSource, Settings, StoreTarget, PROJECT_CONFIG};
