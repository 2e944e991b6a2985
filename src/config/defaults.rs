//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};

use crate::script::DEFAULT_SHARED_DIR;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Application jobs are submitted under (default: "boinc2docker")
    pub appname: String,

    /// Local image runtime program (default: "docker")
    pub runtime: String,

    /// Shared directory inside the VM (default: "/root/shared")
    pub shared_dir: String,

    /// Emit diagnostics in the startup script (default: true)
    pub diagnostics: bool,

    /// Extract layers concurrently (default: false)
    pub parallel_layers: bool,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            appname: boinc_project::DEFAULT_APPNAME.to_string(),
            runtime: "docker".to_string(),
            shared_dir: DEFAULT_SHARED_DIR.to_string(),
            diagnostics: true,
            parallel_layers: false,
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "appname": self.appname,
            "runtime": self.runtime,
            "shared_dir": self.shared_dir,
            "diagnostics": self.diagnostics,
            "parallel_layers": self.parallel_layers,
        })
    }
}
