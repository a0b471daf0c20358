//! Tenant configuration: which tables back an index and how its fields are typed
//!
//! Loaded from TOML, YAML or JSON depending on the file extension.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::context::{QueryContext, TableSource};
use crate::error::{Result, TranslateError};
use crate::mapping::TypeMapping;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Index name to tenant mapping
    #[serde(default)]
    pub mapping: BTreeMap<String, IndexMapping>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMapping {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<TableSource>,
    /// Legacy single-table form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default)]
    pub ignore_total_hits: bool,
    #[serde(default)]
    pub ignore_sum_other_doc_count: bool,
    #[serde(default)]
    pub type_mapping: BTreeMap<String, TypeMapping>,
}

impl IndexMapping {
    /// Explicit sources, else the legacy `database`/`table` pair
    pub fn table_sources(&self) -> Vec<TableSource> {
        if !self.sources.is_empty() {
            return self.sources.clone();
        }
        match &self.table {
            Some(table) => vec![TableSource::new(self.database.as_deref(), table)],
            None => Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| TranslateError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        let config = Self::parse(&content, extension)
            .map_err(|e| TranslateError::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), indices = config.mapping.len(), "loaded configuration");
        Ok(config)
    }

    /// Parse configuration text in the format named by `extension`
    pub fn parse(content: &str, extension: &str) -> std::result::Result<Self, String> {
        match extension {
            "toml" => toml::from_str(content).map_err(|e| e.to_string()),
            "yaml" | "yml" => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            "json" => serde_json::from_str(content).map_err(|e| e.to_string()),
            other => Err(format!("unsupported config format {:?}", other)),
        }
    }

    pub fn query_context(&self, index: &str) -> Result<QueryContext> {
        let mapping = self
            .mapping
            .get(index)
            .ok_or_else(|| TranslateError::Config(format!("no such index {:?}", index)))?;

        Ok(QueryContext {
            index: index.to_string(),
            sources: mapping.table_sources(),
            ignore_total_hits: mapping.ignore_total_hits,
            ignore_sum_other_doc_count: mapping.ignore_sum_other_doc_count,
            type_mapping: mapping.type_mapping.clone(),
            now: None,
        })
    }

    /// Human-readable problems per index; empty when the config is usable
    pub fn lint(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            issues.push(format!("logging.format must be \"pretty\" or \"json\" (got {:?})", self.logging.format));
        }
        for (index, mapping) in &self.mapping {
            if mapping.table_sources().is_empty() {
                issues.push(format!("{}: no table sources", index));
            }
            if !mapping.sources.is_empty() && mapping.table.is_some() {
                issues.push(format!("{}: both sources and table are set; table is ignored", index));
            }
            for (pattern, tm) in &mapping.type_mapping {
                if tm.type_name.trim().is_empty() {
                    issues.push(format!("{}: typeMapping {:?} has no type", index, pattern));
                }
            }
        }
        issues
    }
}
