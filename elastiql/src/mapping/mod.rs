//! Tenant type mappings and field-name resolution
//!
//! A type mapping is keyed by a dotted field pattern which may contain `*`
//! wildcards. Exact keys win; otherwise the longest matching pattern is used.

pub mod datashape;
pub mod format;

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::context::QueryContext;
use crate::naming::{DEFAULT_SOURCE, SOURCE_ALIAS_PREFIX};

/// Declared type of a field pattern. The compact form is a bare type name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawTypeMapping")]
pub struct TypeMapping {
    #[serde(rename = "type")]
    pub type_name: String,
    /// Sub-field name to text-search mode, e.g. `raw -> keyword-ignore-case`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTypeMapping {
    Compact(String),
    Extended {
        #[serde(rename = "type")]
        type_name: String,
        #[serde(default)]
        fields: BTreeMap<String, String>,
    },
}

impl From<RawTypeMapping> for TypeMapping {
    fn from(raw: RawTypeMapping) -> Self {
        match raw {
            RawTypeMapping::Compact(type_name) => TypeMapping {
                type_name,
                fields: BTreeMap::new(),
            },
            RawTypeMapping::Extended { type_name, fields } => TypeMapping { type_name, fields },
        }
    }
}

impl TypeMapping {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, sub_field: &str, mode: &str) -> Self {
        self.fields.insert(sub_field.to_string(), mode.to_string());
        self
    }
}

/// Match `text` against a pattern where `*` matches any run of characters.
/// A pattern without `*` only matches itself.
pub fn match_wildcard(text: &str, pattern: &str) -> bool {
    if text == pattern {
        return true;
    }
    if !pattern.contains('*') {
        return false;
    }

    let body: Vec<String> = pattern.split('*').map(regex::escape).collect();
    match Regex::new(&format!("^{}$", body.join(".*"))) {
        Ok(re) => re.is_match(text),
        Err(_) => false,
    }
}

/// Look up the mapping for a dotted key
pub fn map_type<'a>(
    key: &str,
    mapping: &'a BTreeMap<String, TypeMapping>,
) -> Option<&'a TypeMapping> {
    if let Some(tm) = mapping.get(key) {
        return Some(tm);
    }

    let mut best: Option<(&str, &TypeMapping)> = None;
    for (pattern, tm) in mapping {
        if !match_wildcard(key, pattern) {
            continue;
        }
        if best.map_or(true, |(p, _)| pattern.len() > p.len()) {
            best = Some((pattern, tm));
        }
    }
    best.map(|(_, tm)| tm).filter(|tm| !tm.type_name.is_empty())
}

/// Mapped type name for a dotted key, if any
pub fn type_of<'a>(key: &str, mapping: &'a BTreeMap<String, TypeMapping>) -> Option<&'a str> {
    map_type(key, mapping).map(|tm| tm.type_name.as_str())
}

/// A resolved field reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    /// Source alias, `$source` when unset
    pub source: Option<String>,
    pub fields: Vec<String>,
    /// Sub-field that selected a text-search mode (`keyword`, `raw`, ...)
    pub sub_field: Option<String>,
    /// Dotted path used for type lookups
    pub key: String,
}

impl FieldRef {
    /// Resolve a dotted field name against the tenant mapping
    pub fn resolve(ctx: &QueryContext, name: &str) -> Self {
        let parts: Vec<&str> = name.split('.').collect();
        Self::resolve_parts(ctx, &parts)
    }

    pub fn resolve_parts<S: AsRef<str>>(ctx: &QueryContext, parts: &[S]) -> Self {
        let mut fields: Vec<String> = Vec::with_capacity(parts.len());
        let mut sub_field = None;

        for (i, part) in parts.iter().enumerate() {
            let field = part.as_ref().trim_start_matches('@');

            if i + 1 == parts.len() && i > 0 {
                let prefix = fields.join(".");
                match map_type(&prefix, &ctx.type_mapping) {
                    Some(tm) if tm.fields.contains_key(field) => {
                        sub_field = Some(field.to_string());
                        break;
                    }
                    None if field == "keyword" => {
                        sub_field = Some(field.to_string());
                        break;
                    }
                    _ => {}
                }
            }
            fields.push(field.to_string());
        }

        let key = fields.join(".");
        let mut source = None;
        for (pattern, tm) in &ctx.type_mapping {
            if tm.type_name == "list" && key.starts_with(&format!("{}.", pattern)) {
                let depth = pattern.split('.').count();
                source = Some(format!("{}{}", SOURCE_ALIAS_PREFIX, pattern));
                fields.drain(..depth);
                break;
            }
        }

        Self {
            source,
            fields,
            sub_field,
            key,
        }
    }

    /// A column of an already materialized row set
    pub fn raw(source: &str, fields: &[&str]) -> Self {
        Self {
            source: Some(source.to_string()),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            sub_field: None,
            key: fields.join("."),
        }
    }

    /// Same field with an extra path segment (`location` -> `location.lat`)
    pub fn child(&self, name: &str) -> Self {
        let mut child = self.clone();
        child.fields.push(name.to_string());
        child.key = format!("{}.{}", self.key, name);
        child
    }

    pub fn source_name(&self) -> &str {
        self.source.as_deref().unwrap_or(DEFAULT_SOURCE)
    }

    /// Text-search mode or storage type of the field, empty when unmapped
    pub fn field_type(&self, ctx: &QueryContext) -> String {
        match (map_type(&self.key, &ctx.type_mapping), &self.sub_field) {
            (Some(tm), Some(sub)) => tm.fields.get(sub).cloned().unwrap_or_default(),
            (Some(tm), None) => tm.type_name.clone(),
            (None, Some(sub)) if sub == "keyword" => "keyword".to_string(),
            (None, _) => String::new(),
        }
    }

    /// `$source:<prefix>` alias and the path it is taken from, for list fields
    pub fn list_alias(&self) -> Option<(String, Vec<String>)> {
        let source = self.source.as_deref()?;
        let prefix = source.strip_prefix(SOURCE_ALIAS_PREFIX)?;
        let mut path = vec![DEFAULT_SOURCE.to_string()];
        path.extend(prefix.split('.').map(str::to_string));
        Some((source.to_string(), path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> QueryContext {
        QueryContext::new("test")
            .with_mapping("u_*", TypeMapping::new("text"))
            .with_mapping("u_date_*", TypeMapping::new("datetime"))
            .with_mapping(
                "field.*",
                TypeMapping::new("text")
                    .with_field("keyword", "keyword")
                    .with_field("raw", "keyword-ignore-case"),
            )
            .with_mapping("items", TypeMapping::new("list"))
    }

    #[test]
    fn test_match_wildcard() {
        assert!(match_wildcard("u_date_test", "u_*"));
        assert!(match_wildcard("abc", "abc"));
        assert!(!match_wildcard("abcd", "abc"));
        assert!(match_wildcard("a.b.c", "a.*.c"));
        assert!(!match_wildcard("a+b", "a.b*"));
    }

    #[test]
    fn test_longest_pattern_wins() {
        let ctx = ctx();
        assert_eq!(type_of("u_date_test", &ctx.type_mapping), Some("datetime"));
        assert_eq!(type_of("u_other", &ctx.type_mapping), Some("text"));
        assert_eq!(type_of("other", &ctx.type_mapping), None);
    }

    #[test]
    fn test_resolve_sub_field() {
        let ctx = ctx();
        let f = FieldRef::resolve(&ctx, "field.test.raw");
        assert_eq!(f.fields, vec!["field", "test"]);
        assert_eq!(f.sub_field.as_deref(), Some("raw"));
        assert_eq!(f.field_type(&ctx), "keyword-ignore-case");

        let f = FieldRef::resolve(&ctx, "field.test");
        assert_eq!(f.field_type(&ctx), "text");
    }

    #[test]
    fn test_resolve_unmapped_keyword() {
        let ctx = ctx();
        let f = FieldRef::resolve(&ctx, "@host.keyword");
        assert_eq!(f.fields, vec!["host"]);
        assert_eq!(f.field_type(&ctx), "keyword");
    }

    #[test]
    fn test_resolve_list_field() {
        let ctx = ctx();
        let f = FieldRef::resolve(&ctx, "items.name");
        assert_eq!(f.source.as_deref(), Some("$source:items"));
        assert_eq!(f.fields, vec!["name"]);
        let (alias, path) = f.list_alias().unwrap();
        assert_eq!(alias, "$source:items");
        assert_eq!(path, vec!["$source", "items"]);
    }

    #[test]
    fn test_deserialize_compact_and_extended() {
        let m: BTreeMap<String, TypeMapping> = serde_json::from_str(
            r#"{"ts":"datetime","msg":{"type":"text","fields":{"raw":"keyword"}}}"#,
        )
        .unwrap();
        assert_eq!(m["ts"], TypeMapping::new("datetime"));
        assert_eq!(m["msg"].fields["raw"], "keyword");
    }
}
