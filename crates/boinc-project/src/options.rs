//! create_work job options
//!
//! Typed versions of the `bin/create_work` flags that matter for
//! container jobs, plus a passthrough map for everything else.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SubmitError;

/// Flags that are owned by the packager and may not be passed through.
const RESERVED: &[&str] = &["appname", "wu_template"];

/// Options forwarded to `create_work`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Work unit name (generated when absent)
    pub wu_name: Option<String>,
    /// Result template, relative to the project directory
    pub result_template: Option<String>,
    pub batch: Option<u64>,
    pub priority: Option<i64>,
    pub target_nresults: Option<u32>,
    pub min_quorum: Option<u32>,
    pub max_error_results: Option<u32>,
    pub max_total_results: Option<u32>,
    pub max_success_results: Option<u32>,
    /// Deadline in seconds
    pub delay_bound: Option<f64>,
    pub rsc_fpops_est: Option<f64>,
    pub rsc_fpops_bound: Option<f64>,
    pub rsc_memory_bound: Option<f64>,
    pub rsc_disk_bound: Option<f64>,
    /// Any other `--key value` pair, emitted in key order
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl JobOptions {
    /// Check passthrough keys are plain option names and not reserved.
    pub fn validate(&self) -> Result<(), SubmitError> {
        for key in self.extra.keys() {
            let well_formed = !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if !well_formed || RESERVED.contains(&key.as_str()) {
                return Err(SubmitError::InvalidOption(key.clone()));
            }
        }
        Ok(())
    }

    /// Render as `create_work` arguments (without appname/template).
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |flag: &str, value: Option<String>| {
            if let Some(value) = value {
                args.push(format!("--{}", flag));
                args.push(value);
            }
        };

        push("wu_name", self.wu_name.clone());
        push("result_template", self.result_template.clone());
        push("batch", self.batch.map(|v| v.to_string()));
        push("priority", self.priority.map(|v| v.to_string()));
        push("target_nresults", self.target_nresults.map(|v| v.to_string()));
        push("min_quorum", self.min_quorum.map(|v| v.to_string()));
        push("max_error_results", self.max_error_results.map(|v| v.to_string()));
        push("max_total_results", self.max_total_results.map(|v| v.to_string()));
        push("max_success_results", self.max_success_results.map(|v| v.to_string()));
        push("delay_bound", self.delay_bound.map(|v| v.to_string()));
        push("rsc_fpops_est", self.rsc_fpops_est.map(|v| v.to_string()));
        push("rsc_fpops_bound", self.rsc_fpops_bound.map(|v| v.to_string()));
        push("rsc_memory_bound", self.rsc_memory_bound.map(|v| v.to_string()));
        push("rsc_disk_bound", self.rsc_disk_bound.map(|v| v.to_string()));
        for (key, value) in &self.extra {
            push(key.as_str(), Some(value.clone()));
        }

        args
    }
}
