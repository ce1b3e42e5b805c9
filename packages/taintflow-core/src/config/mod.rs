//! Analysis configuration
//!
//! Everything the pipeline needs to run: search roots, model documents,
//! rule configuration, fixpoint tuning, and the cache directory for
//! persisted state. Loadable from a JSON document.

use crate::errors::{Result, TaintflowError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Ordered search roots; earlier roots shadow later ones
    pub source_roots: Vec<PathBuf>,

    /// Roots holding declaration-only stubs
    #[serde(default)]
    pub stub_roots: Vec<PathBuf>,

    /// Taint model documents (`.pysa`-style)
    #[serde(default)]
    pub model_paths: Vec<PathBuf>,

    /// Rules file; built-in rules apply when absent
    #[serde(default)]
    pub rules_path: Option<PathBuf>,

    /// Restrict the analysis to these rule codes
    #[serde(default)]
    pub rule_filter: Option<Vec<u32>>,

    /// Cache directory for the stub snapshot and the persisted model heap
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_widen_depth")]
    pub widen_depth: usize,

    #[serde(default = "default_expensive_ms")]
    pub expensive_callable_ms: u64,

    /// Worker count; zero means one per CPU
    #[serde(default)]
    pub workers: usize,
}

fn default_max_iterations() -> u32 {
    100
}

fn default_widen_depth() -> usize {
    4
}

fn default_expensive_ms() -> u64 {
    500
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            source_roots: Vec::new(),
            stub_roots: Vec::new(),
            model_paths: Vec::new(),
            rules_path: None,
            rule_filter: None,
            cache_dir: None,
            max_iterations: default_max_iterations(),
            widen_depth: default_widen_depth(),
            expensive_callable_ms: default_expensive_ms(),
            workers: 0,
        }
    }
}

impl AnalysisConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TaintflowError::config(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.widen_depth, 4);
        assert!(config.effective_workers() >= 1);
    }

    #[test]
    fn test_from_json() {
        let config = AnalysisConfig::from_json(
            r#"{
                "source_roots": ["/repo/src"],
                "model_paths": ["/repo/taint/models.pysa"],
                "rule_filter": [5001],
                "max_iterations": 30
            }"#,
        )
        .unwrap();

        assert_eq!(config.source_roots, vec![PathBuf::from("/repo/src")]);
        assert_eq!(config.rule_filter, Some(vec![5001]));
        assert_eq!(config.max_iterations, 30);
        assert_eq!(config.widen_depth, 4);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        assert!(matches!(
            AnalysisConfig::from_json("not json"),
            Err(TaintflowError::Config(_))
        ));
    }
}
