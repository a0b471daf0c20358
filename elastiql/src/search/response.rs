//! Elasticsearch-shaped search responses rebuilt from the engine result

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::request::{SearchRequest, TrackTotalHits};
use crate::aggs::pipeline::run_pipelines;
use crate::aggs::process::total_count;
use crate::aggs::{pre_process, process_aggregations, SubAggregations};
use crate::context::QueryContext;
use crate::datum::Datum;
use crate::error::{Result, TranslateError};
use crate::mapping::format::{format_out, format_out_raw, is_date_format};
use crate::mapping::{match_wildcard, type_of, FieldRef};
use crate::naming::{HITS, SOURCE_ALIAS_PREFIX};

const SCORE: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub took: u64,
    pub timed_out: bool,
    #[serde(rename = "_shards")]
    pub shards: ShardStats,
    pub hits: HitsResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<SubAggregations>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    pub total: u32,
    pub successful: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl Default for ShardStats {
    fn default() -> Self {
        Self {
            total: 1,
            successful: 1,
            skipped: 0,
            failed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HitsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<TotalHits>,
    pub max_score: Option<f64>,
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalHits {
    pub value: i64,
    pub relation: String,
}

impl TotalHits {
    /// `eq` when the count is exact, `gte` when it reached the tracking limit
    fn new(total: i64, track: TrackTotalHits) -> Option<Self> {
        if !track.enabled {
            return None;
        }
        match track.limit {
            Some(limit) if total > limit as i64 => Some(Self {
                value: limit as i64,
                relation: "gte".to_string(),
            }),
            _ if track.limit.is_none() || total >= 0 => Some(Self {
                value: total,
                relation: "eq".to_string(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_type")]
    pub doc_type: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score")]
    pub score: f64,
    #[serde(rename = "_version", skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(rename = "_source", skip_serializing_if = "Option::is_none")]
    pub source: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Vec<Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Value>,
}

/// Render one stored value with the output format mapped for its key
fn format_value(ctx: &QueryContext, key: &str, value: &Value, explicit: Option<&str>) -> Value {
    let format = explicit.or_else(|| type_of(key, &ctx.type_mapping));
    let datum = match (Datum::from_json(value), format) {
        // the engine hands timestamps over as text
        (Datum::String(text), Some(format)) if is_date_format(format) => {
            match Datum::String(text.clone()).as_timestamp() {
                Some(ts) => Datum::Timestamp(ts),
                None => Datum::String(text),
            }
        }
        (datum, _) => datum,
    };
    match explicit {
        Some(format) => format_out_raw(datum, format).to_json(),
        None => format_out(ctx, key, datum).to_json(),
    }
}

/// Values of all dotted paths matching `pattern`, one glob per segment
fn find_values(record: &Map<String, Value>, pattern: &str) -> Vec<(String, Value)> {
    fn walk(record: &Map<String, Value>, segments: &[&str], prefix: &str, found: &mut Vec<(String, Value)>) {
        let Some((first, rest)) = segments.split_first() else {
            return;
        };
        for (key, value) in record {
            if !match_wildcard(key, first) {
                continue;
            }
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            match (rest.is_empty(), value) {
                (true, _) => found.push((path, value.clone())),
                (false, Value::Object(inner)) => walk(inner, rest, &path, found),
                (false, _) => {}
            }
        }
    }

    let segments: Vec<&str> = pattern.split('.').collect();
    let mut found = Vec::new();
    walk(record, &segments, "", &mut found);
    found
}

/// A flat column named `a.b`, else `b` inside the object `a`
fn lookup_path<'a>(record: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    if let Some(value) = record.get(key) {
        return Some(value);
    }
    let (first, rest) = key.split_once('.')?;
    match record.get(first)? {
        Value::Object(inner) => lookup_path(inner, rest),
        _ => None,
    }
}

fn hit_id(record: &Map<String, Value>) -> String {
    let mut hasher = Sha256::new();
    Datum::from_json(&Value::Object(record.clone())).hash_into(&mut hasher);
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn hit_rows(result: &Map<String, Value>) -> Result<Vec<&Map<String, Value>>> {
    let invalid = || TranslateError::shape(HITS, "should contain an array of records");
    let rows: Vec<&Value> = match result.get(HITS) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(single)) if single.is_empty() => Vec::new(),
        Some(Value::Array(rows)) => rows.iter().collect(),
        Some(single) if single.is_object() => vec![single],
        Some(_) => return Err(invalid()),
    };
    rows.into_iter().map(|row| row.as_object().ok_or_else(invalid)).collect()
}

impl SearchRequest {
    fn hit(&self, ctx: &QueryContext, row: &Map<String, Value>) -> Hit {
        let mut record: Map<String, Value> = row
            .iter()
            .filter(|(key, _)| !key.starts_with(SOURCE_ALIAS_PREFIX))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let sort = self
            .sort
            .iter()
            .map(|s| {
                let key = FieldRef::resolve(ctx, &s.field).key;
                let value = lookup_path(&record, &key).cloned().unwrap_or(Value::Null);
                match Datum::from_json(&value).as_timestamp() {
                    Some(ts) => Value::from(ts.timestamp_millis()),
                    None => value,
                }
            })
            .collect();

        for (key, value) in record.iter_mut() {
            *value = format_value(ctx, key, value, None);
        }

        let mut fields = BTreeMap::new();
        for projected in &self.fields {
            for (key, value) in find_values(&record, projected.field()) {
                let value = format_value(ctx, &key, &value, projected.format());
                fields.insert(key, vec![value]);
            }
        }

        let source = if !self.source.enabled {
            None
        } else if self.source.is_filtered() {
            let includes = &self.source.includes;
            let excludes = &self.source.excludes;
            Some(
                record
                    .iter()
                    .filter(|(key, _)| includes.is_empty() || includes.iter().any(|p| match_wildcard(key, p)))
                    .filter(|(key, _)| !excludes.iter().any(|p| match_wildcard(key, p)))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            )
        } else {
            Some(record.clone())
        };

        Hit {
            index: ctx.index.clone(),
            doc_type: "_doc".to_string(),
            id: hit_id(&record),
            score: SCORE,
            version: self.version.then_some(1),
            source,
            fields,
            sort,
        }
    }

    /// Rebuild the Elasticsearch response from the engine result
    pub fn convert_result(&self, ctx: &QueryContext, result: &Map<String, Value>) -> Result<SearchResponse> {
        let total = total_count(result)?;
        let hits: Vec<Hit> = hit_rows(result)?
            .into_iter()
            .map(|row| self.hit(ctx, row))
            .collect();
        tracing::debug!(total, hits = hits.len(), "converted hits");

        let aggregations = if self.aggs.is_empty() {
            None
        } else {
            let root = pre_process(result)?;
            let mut aggregations = process_aggregations(ctx, &self.aggs, Some(&root), total)?;
            run_pipelines(&self.aggs, &mut aggregations)?;
            tracing::debug!(count = aggregations.len(), "converted aggregations");
            Some(aggregations)
        };

        Ok(SearchResponse {
            took: 0,
            timed_out: false,
            shards: ShardStats::default(),
            hits: HitsResponse {
                total: TotalHits::new(total, self.track_total_hits),
                max_score: (!hits.is_empty()).then_some(SCORE),
                hits,
            },
            aggregations,
        })
    }
}
