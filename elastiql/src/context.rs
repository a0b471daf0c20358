//! Per-request translation context

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mapping::TypeMapping;

/// A table the request reads from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub table: String,
}

impl TableSource {
    pub fn new(database: Option<&str>, table: &str) -> Self {
        Self {
            database: database.map(str::to_string),
            table: table.to_string(),
        }
    }
}

/// Everything the translator knows about the tenant behind one request
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    /// Index name reported back in `_index`
    pub index: String,
    pub sources: Vec<TableSource>,
    pub ignore_total_hits: bool,
    pub ignore_sum_other_doc_count: bool,
    pub type_mapping: BTreeMap<String, TypeMapping>,
    /// Fixed instant used for date math; the wall clock when unset
    pub now: Option<DateTime<Utc>>,
}

impl QueryContext {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            ..Default::default()
        }
    }

    pub fn with_source(mut self, database: Option<&str>, table: &str) -> Self {
        self.sources.push(TableSource::new(database, table));
        self
    }

    pub fn with_mapping(mut self, pattern: &str, mapping: TypeMapping) -> Self {
        self.type_mapping.insert(pattern.to_string(), mapping);
        self
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn with_ignore_total_hits(mut self, ignore: bool) -> Self {
        self.ignore_total_hits = ignore;
        self
    }

    pub fn with_ignore_sum_other_doc_count(mut self, ignore: bool) -> Self {
        self.ignore_sum_other_doc_count = ignore;
        self
    }

    /// Skipping the total count also skips `sum_other_doc_count`
    pub fn skip_sum_other_doc_count(&self) -> bool {
        self.ignore_sum_other_doc_count || self.ignore_total_hits
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignore_total_hits_implies_sum_other() {
        let ctx = QueryContext::new("logs").with_ignore_total_hits(true);
        assert!(ctx.skip_sum_other_doc_count());

        let ctx = QueryContext::new("logs");
        assert!(!ctx.skip_sum_other_doc_count());
    }

    #[test]
    fn test_table_source_deserialize() {
        let src: TableSource = serde_json::from_str(r#"{"table":"t"}"#).unwrap();
        assert_eq!(src, TableSource::new(None, "t"));
    }
}
