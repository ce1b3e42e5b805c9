//! Taint rules
//!
//! A rule names the source kinds and sink kinds whose meeting constitutes
//! an issue, with the diagnostic code to report it under. Rules load from a
//! JSON document; a small built-in set covers the classic injection
//! classes.

use crate::errors::{Result, TaintflowError};
use crate::features::taint::{SinkKind, SourceKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// One user-configured flow rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaintRule {
    pub name: String,
    pub code: u32,
    pub sources: Vec<SourceKind>,
    pub sinks: Vec<SinkKind>,

    /// `{source}` and `{sink}` placeholders are substituted when an issue
    /// is rendered.
    pub message_format: String,
}

impl TaintRule {
    pub fn matches(&self, source: &SourceKind, sink: &SinkKind) -> bool {
        self.sources.contains(source) && self.sinks.contains(sink)
    }

    pub fn render_message(&self, source: &SourceKind, sink: &SinkKind) -> String {
        self.message_format
            .replace("{source}", source.as_str())
            .replace("{sink}", sink.as_str())
    }
}

/// The active rule surface
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<TaintRule>,
}

impl RuleSet {
    /// Built-in rules for the classic injection classes
    pub fn default_rules() -> Self {
        let rule = |name: &str, code: u32, sources: &[&str], sinks: &[&str]| TaintRule {
            name: name.to_string(),
            code,
            sources: sources.iter().map(|s| SourceKind::new(*s)).collect(),
            sinks: sinks.iter().map(|s| SinkKind::new(*s)).collect(),
            message_format: format!("{name}: data from {{source}} may reach {{sink}}"),
        };
        Self {
            rules: vec![
                rule(
                    "Possible remote code execution",
                    5001,
                    &["UserControlled"],
                    &["RemoteCodeExecution", "CodeExecution"],
                ),
                rule(
                    "Possible shell injection",
                    5002,
                    &["UserControlled"],
                    &["Shell"],
                ),
                rule(
                    "Possible SQL injection",
                    5005,
                    &["UserControlled"],
                    &["SqlInjection"],
                ),
            ],
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TaintflowError::config(e.to_string()))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Restrict to the given codes; `None` keeps everything.
    pub fn filtered(&self, codes: Option<&[u32]>) -> RuleSet {
        match codes {
            None => self.clone(),
            Some(codes) => RuleSet {
                rules: self
                    .rules
                    .iter()
                    .filter(|r| codes.contains(&r.code))
                    .cloned()
                    .collect(),
            },
        }
    }

    /// Source kinds reachable by any remaining rule
    pub fn used_source_kinds(&self) -> BTreeSet<SourceKind> {
        self.rules
            .iter()
            .flat_map(|r| r.sources.iter().cloned())
            .collect()
    }

    /// Sink kinds reachable by any remaining rule
    pub fn used_sink_kinds(&self) -> BTreeSet<SinkKind> {
        self.rules
            .iter()
            .flat_map(|r| r.sinks.iter().cloned())
            .collect()
    }

    /// Rules matching a (source, sink) pair
    pub fn matching(&self, source: &SourceKind, sink: &SinkKind) -> Vec<&TaintRule> {
        self.rules
            .iter()
            .filter(|r| r.matches(source, sink))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
