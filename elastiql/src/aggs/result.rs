//! Elasticsearch-shaped aggregation results

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::context::QueryContext;
use crate::datum::Datum;
use crate::literal::rfc3339_nano;
use crate::mapping::format::{format_out_raw, is_date_format};
use crate::mapping::type_of;

pub type SubAggregations = BTreeMap<String, AggResult>;

/// Result of one named aggregation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AggResult {
    Metric(MetricValue),
    GeoCentroid(GeoCentroidValue),
    Single(SingleBucket),
    Multi(MultiBuckets),
    Mapped(MappedBuckets),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricValue {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_as_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl MetricValue {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            value_as_string: None,
            meta: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoLocation {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoCentroidValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    pub count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// A bucket aggregation that always yields exactly one bucket (`filter`)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SingleBucket {
    pub doc_count: i64,
    #[serde(flatten)]
    pub sub_aggs: SubAggregations,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Ordered buckets identified by a key
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MultiBuckets {
    pub buckets: Vec<KeyedBucket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum_other_doc_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_count_error_upper_bound: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Buckets addressed by name (`filters`)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappedBuckets {
    pub buckets: BTreeMap<String, SingleBucket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyedBucket {
    pub key: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_as_string: Option<String>,
    pub doc_count: i64,
    #[serde(flatten)]
    pub sub_aggs: SubAggregations,
}

impl KeyedBucket {
    /// Build a bucket for a group key.
    ///
    /// Booleans key as `0`/`1` and timestamps as epoch milliseconds. The
    /// textual key comes from the explicit `format`, else from the date
    /// format mapped for `field`, else from the type default.
    pub fn new(
        ctx: &QueryContext,
        key: &Datum,
        field: Option<&str>,
        format: Option<&str>,
        doc_count: i64,
        sub_aggs: SubAggregations,
    ) -> Self {
        Self {
            key: key_json(key),
            key_as_string: key_text(ctx, key, field, format),
            doc_count,
            sub_aggs,
        }
    }

    /// Value used by `bucket_sort` and `bucket_script` for a path such as
    /// `_count`, `_key` or `<metric>[.value]`
    pub fn path_value(&self, path: &str) -> Option<Value> {
        match path {
            "_count" => Some(Value::from(self.doc_count)),
            "_key" => Some(self.key.clone()),
            _ => metric_path_value(&self.sub_aggs, path),
        }
    }
}

pub(crate) fn metric_path_value(sub_aggs: &SubAggregations, path: &str) -> Option<Value> {
    let (name, property) = match path.split_once('.') {
        Some((name, property)) => (name, property),
        None => (path, "value"),
    };
    match (sub_aggs.get(name)?, property) {
        (AggResult::Metric(metric), "value") => Some(metric.value.clone()),
        (AggResult::GeoCentroid(centroid), "count") => Some(Value::from(centroid.count)),
        (AggResult::Single(bucket), "doc_count") => Some(Value::from(bucket.doc_count)),
        _ => None,
    }
}

fn key_json(key: &Datum) -> Value {
    match key {
        Datum::Bool(b) => Value::from(i64::from(*b)),
        Datum::Timestamp(ts) => Value::from(ts.timestamp_millis()),
        other => other.to_json(),
    }
}

fn key_text(ctx: &QueryContext, key: &Datum, field: Option<&str>, format: Option<&str>) -> Option<String> {
    let format = match format.filter(|f| !f.is_empty()) {
        Some(explicit) => Some(explicit),
        None => field
            .and_then(|f| type_of(f, &ctx.type_mapping))
            .filter(|f| is_date_format(f)),
    };

    if let Some(format) = format {
        if let Datum::String(text) = format_out_raw(key.clone(), format) {
            return Some(text);
        }
    }

    match key {
        Datum::Bool(true) => Some("true".to_string()),
        Datum::Bool(false) => Some("false".to_string()),
        Datum::Timestamp(ts) => Some(rfc3339_nano(ts)),
        _ => None,
    }
}

impl AggResult {
    pub fn set_meta(&mut self, meta: Option<Value>) {
        let slot = match self {
            AggResult::Metric(m) => &mut m.meta,
            AggResult::GeoCentroid(g) => &mut g.meta,
            AggResult::Single(s) => &mut s.meta,
            AggResult::Multi(m) => &mut m.meta,
            AggResult::Mapped(m) => &mut m.meta,
        };
        *slot = meta;
    }

    /// Sub-aggregation maps of every bucket held by this result
    pub fn bucket_aggs_mut(&mut self) -> Vec<&mut SubAggregations> {
        match self {
            AggResult::Single(s) => vec![&mut s.sub_aggs],
            AggResult::Multi(m) => m.buckets.iter_mut().map(|b| &mut b.sub_aggs).collect(),
            AggResult::Mapped(m) => m.buckets.values_mut().map(|b| &mut b.sub_aggs).collect(),
            AggResult::Metric(_) | AggResult::GeoCentroid(_) => Vec::new(),
        }
    }
}
