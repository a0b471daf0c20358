//! `_search` request body

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::aggs::{parse_aggregations, Aggregations};
use crate::context::QueryContext;
use crate::error::{Result, TranslateError};
use crate::mapping::FieldRef;
use crate::query::Query;
use crate::sql::{Expr, Order, OrderBy};

/// Hit count tracked exactly unless told otherwise
pub const DEFAULT_TRACK_TOTAL_HITS: u64 = 10_000;

/// Page size when the request has none
pub const DEFAULT_SIZE: usize = 10;

/// Accepted for compatibility, without effect on the translation
const IGNORED_KEYS: &[&str] = &[
    "batched_reduce_size",
    "docvalue_fields",
    "explain",
    "highlight",
    "indices_boost",
    "min_score",
    "preference",
    "profile",
    "seq_no_primary_term",
    "stored_fields",
    "terminate_after",
    "timeout",
    "track_scores",
];

const UNSUPPORTED_KEYS: &[&str] = &[
    "collapse",
    "knn",
    "pit",
    "post_filter",
    "rescore",
    "runtime_mappings",
    "script_fields",
    "search_after",
    "slice",
    "suggest",
];

/// One entry of `sort`
#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    pub field: String,
    pub order: Order,
    pub format: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SortSpec {
    Order(String),
    Options {
        #[serde(default)]
        order: Option<String>,
        #[serde(default)]
        format: Option<String>,
    },
}

impl SortField {
    /// Decode `"field"`, `{"field": "asc"}` or `{"field": {"order": .., "format": ..}}`
    pub fn from_value(value: &Value) -> Result<Self> {
        let (field, spec) = match value {
            Value::String(field) => (field.clone(), None),
            Value::Object(map) => match map.len() {
                0 => return Err(TranslateError::malformed("sort-field without field-name")),
                1 => {
                    let (field, spec) = map.iter().next().ok_or_else(|| {
                        TranslateError::malformed("sort-field without field-name")
                    })?;
                    let spec: SortSpec = serde_json::from_value(spec.clone())
                        .map_err(|e| TranslateError::malformed(format!("invalid sort on {:?}: {}", field, e)))?;
                    (field.clone(), Some(spec))
                }
                _ => return Err(TranslateError::malformed("sort-field should only contain a single value")),
            },
            _ => return Err(TranslateError::malformed("sort-field should be a string or an object")),
        };

        let (order, format) = match spec {
            None => (None, None),
            Some(SortSpec::Order(order)) => (Some(order), None),
            Some(SortSpec::Options { order, format }) => (order, format),
        };
        let order = match order {
            Some(text) => {
                Order::parse(&text).ok_or_else(|| TranslateError::malformed(format!("invalid sort order {:?}", text)))?
            }
            None => Order::Desc,
        };
        Ok(Self { field, order, format })
    }

    /// A single sort entry or a list of them. Score and index order sort
    /// nothing since every hit scores the same.
    pub fn parse_list(value: &Value) -> Result<Vec<Self>> {
        let items = match value {
            Value::Array(items) => items.iter().map(Self::from_value).collect::<Result<Vec<_>>>()?,
            single => vec![Self::from_value(single)?],
        };
        Ok(items
            .into_iter()
            .filter(|s| {
                let constant = s.field == "_score" || s.field == "_doc";
                if constant {
                    tracing::debug!(field = %s.field, "dropping sort on a constant");
                }
                !constant
            })
            .collect())
    }

    pub fn order_by(&self, ctx: &QueryContext) -> OrderBy {
        OrderBy::new(Expr::Field(FieldRef::resolve(ctx, &self.field)), Some(self.order))
    }
}

/// Which parts of a hit end up in `_source`
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFilter {
    pub enabled: bool,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl Default for SourceFilter {
    fn default() -> Self {
        Self {
            enabled: true,
            includes: Vec::new(),
            excludes: Vec::new(),
        }
    }
}

fn pattern_list(value: Option<&Value>) -> Result<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(text)) => Ok(text.split(',').map(|s| s.trim().to_string()).collect()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| TranslateError::malformed(format!("unknown value {} for _source", item)))
            })
            .collect(),
        Some(other) => Err(TranslateError::malformed(format!("unknown value {} for _source", other))),
    }
}

impl SourceFilter {
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(enabled) => Ok(Self {
                enabled: *enabled,
                ..Default::default()
            }),
            Value::String(_) | Value::Array(_) => Ok(Self {
                includes: pattern_list(Some(value))?,
                ..Default::default()
            }),
            Value::Object(map) => Ok(Self {
                includes: pattern_list(map.get("includes").or_else(|| map.get("include")))?,
                excludes: pattern_list(map.get("excludes").or_else(|| map.get("exclude")))?,
                ..Default::default()
            }),
            other => Err(TranslateError::malformed(format!("unknown value {} for _source", other))),
        }
    }

    pub fn is_filtered(&self) -> bool {
        !self.includes.is_empty() || !self.excludes.is_empty()
    }
}

/// One entry of `fields`: a dotted glob with an optional output format
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ProjectedField {
    Name(String),
    Options {
        field: String,
        #[serde(default)]
        format: Option<String>,
    },
}

impl ProjectedField {
    pub fn field(&self) -> &str {
        match self {
            ProjectedField::Name(field) | ProjectedField::Options { field, .. } => field,
        }
    }

    pub fn format(&self) -> Option<&str> {
        match self {
            ProjectedField::Name(_) => None,
            ProjectedField::Options { format, .. } => format.as_deref(),
        }
    }
}

/// `track_total_hits`: `limit == None` counts exactly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackTotalHits {
    pub enabled: bool,
    pub limit: Option<u64>,
}

impl Default for TrackTotalHits {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: Some(DEFAULT_TRACK_TOTAL_HITS),
        }
    }
}

impl TrackTotalHits {
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(true) => Ok(Self {
                enabled: true,
                limit: None,
            }),
            Value::Bool(false) => Ok(Self {
                enabled: false,
                limit: None,
            }),
            Value::Number(n) => match n.as_i64() {
                Some(limit) if limit > 0 => Ok(Self {
                    enabled: true,
                    limit: Some(limit as u64),
                }),
                _ => Err(TranslateError::malformed(format!("invalid track_total_hits value {}", n))),
            },
            other => Err(TranslateError::malformed(format!("invalid track_total_hits {}", other))),
        }
    }
}

/// A decoded `_search` body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    pub from: Option<usize>,
    pub size: Option<usize>,
    pub aggs: Aggregations,
    pub sort: Vec<SortField>,
    pub query: Option<Query>,
    pub version: bool,
    pub source: SourceFilter,
    pub fields: Vec<ProjectedField>,
    pub track_total_hits: TrackTotalHits,
}

fn count(key: &str, value: &Value) -> Result<usize> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| TranslateError::malformed(format!("{} should be a non-negative integer", key)))
}

impl SearchRequest {
    pub fn from_value(value: &Value) -> Result<Self> {
        let map: &Map<String, Value> = value
            .as_object()
            .ok_or_else(|| TranslateError::malformed("search request should be an object"))?;

        let mut request = SearchRequest::default();
        for (key, body) in map {
            match key.as_str() {
                "from" => request.from = Some(count(key, body)?),
                "size" => request.size = Some(count(key, body)?),
                "aggs" | "aggregations" => request.aggs = parse_aggregations(body)?,
                "sort" => request.sort = SortField::parse_list(body)?,
                "query" => request.query = Some(Query::from_value(body)?),
                "version" => request.version = body.as_bool().unwrap_or(false),
                "_source" => request.source = SourceFilter::from_value(body)?,
                "fields" => {
                    request.fields = serde_json::from_value(body.clone())
                        .map_err(|e| TranslateError::malformed(format!("invalid fields: {}", e)))?
                }
                "track_total_hits" => request.track_total_hits = TrackTotalHits::from_value(body)?,
                other if IGNORED_KEYS.contains(&other) => {
                    tracing::warn!(key = other, "ignoring search request option");
                }
                other if UNSUPPORTED_KEYS.contains(&other) => {
                    return Err(TranslateError::unsupported(format!("search option {:?}", other)));
                }
                other => return Err(TranslateError::malformed(format!("unknown key {:?} in search request", other))),
            }
        }
        Ok(request)
    }

    pub fn effective_size(&self) -> usize {
        self.size.unwrap_or(DEFAULT_SIZE)
    }

    pub fn effective_from(&self) -> usize {
        self.from.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_forms() {
        let sort = SortField::parse_list(&json!([
            {"ts": {"order": "asc", "format": "epoch_millis"}},
            {"host": "asc"},
            "level",
            "_score"
        ]))
        .unwrap();
        assert_eq!(sort.len(), 3);
        assert_eq!(sort[0].order, Order::Asc);
        assert_eq!(sort[0].format.as_deref(), Some("epoch_millis"));
        assert_eq!(sort[1].order, Order::Asc);
        assert_eq!(sort[2].order, Order::Desc);
    }

    #[test]
    fn test_sort_single_value() {
        let err = SortField::from_value(&json!({"a": "asc", "b": "desc"})).unwrap_err();
        assert_eq!(err.to_string(), "malformed request: sort-field should only contain a single value");
        assert!(SortField::from_value(&json!({})).is_err());
        assert!(SortField::from_value(&json!({"a": "up"})).is_err());
    }

    #[test]
    fn test_source_filter() {
        assert!(!SourceFilter::from_value(&json!(false)).unwrap().enabled);
        assert_eq!(SourceFilter::from_value(&json!("a, b")).unwrap().includes, vec!["a", "b"]);
        let filter = SourceFilter::from_value(&json!({"includes": ["a*"], "excludes": "a.secret"})).unwrap();
        assert_eq!(filter.includes, vec!["a*"]);
        assert_eq!(filter.excludes, vec!["a.secret"]);
        assert!(SourceFilter::from_value(&json!(3)).is_err());
    }

    #[test]
    fn test_track_total_hits() {
        assert_eq!(TrackTotalHits::default().limit, Some(10_000));
        assert_eq!(TrackTotalHits::from_value(&json!(true)).unwrap().limit, None);
        assert!(!TrackTotalHits::from_value(&json!(false)).unwrap().enabled);
        assert_eq!(TrackTotalHits::from_value(&json!(5)).unwrap().limit, Some(5));
        assert!(TrackTotalHits::from_value(&json!(0)).is_err());
        assert!(TrackTotalHits::from_value(&json!(-1)).is_err());
    }

    #[test]
    fn test_request_keys() {
        let request = SearchRequest::from_value(&json!({
            "size": 0,
            "timeout": "10s",
            "fields": ["a.*", {"field": "ts", "format": "date"}],
            "query": {"match_all": {}},
            "aggregations": {"n": {"value_count": {"field": "a"}}}
        }))
        .unwrap();
        assert_eq!(request.effective_size(), 0);
        assert_eq!(request.fields[1].format(), Some("date"));
        assert!(request.aggs.contains_key("n"));

        let err = SearchRequest::from_value(&json!({"search_after": [1]})).unwrap_err();
        assert!(matches!(err, TranslateError::Unsupported(_)));
        let err = SearchRequest::from_value(&json!({"bogus": 1})).unwrap_err();
        assert!(matches!(err, TranslateError::Malformed(_)));
    }
}
