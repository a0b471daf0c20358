//! Pipeline aggregations and the post-pass that runs them
//!
//! Pipelines operate on decoded results only. Within one level they run in
//! a fixed order: bucket aggregations first (so nested pipelines see their
//! final input), then `bucket_script`, then any other pipeline, and
//! `bucket_sort` last.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::result::{metric_path_value, AggResult, KeyedBucket, MetricValue, SingleBucket, SubAggregations};
use super::{Aggregation, AggregationKind, Aggregations, PipelineAgg, PipelineAggregation};
use crate::error::{Result, TranslateError};
use crate::sql::Order;

/// `params.<a> + params.<b>`, the only script shape understood
const ADDITION: &str = r"^\s*params\.(\w+)\s*\+\s*params\.(\w+)\s*$";

#[derive(Debug, Clone, PartialEq)]
pub struct BucketScript {
    pub buckets_path: BTreeMap<String, String>,
    pub left: String,
    pub right: String,
}

#[derive(Deserialize)]
struct BucketScriptOptions {
    buckets_path: BTreeMap<String, String>,
    script: Value,
    #[serde(default)]
    gap_policy: Option<String>,
}

fn script_source(script: &Value) -> Option<&str> {
    match script {
        Value::String(source) => Some(source),
        Value::Object(map) => map.get("source").or_else(|| map.get("inline")).and_then(Value::as_str),
        _ => None,
    }
}

impl BucketScript {
    pub(super) fn parse(body: &Value) -> Result<Self> {
        let options: BucketScriptOptions = super::options("bucket_script", body)?;
        if let Some(policy) = options.gap_policy.as_deref().filter(|p| *p != "skip") {
            tracing::warn!(gap_policy = policy, "bucket_script always skips gaps");
        }

        let source = script_source(&options.script)
            .ok_or_else(|| TranslateError::malformed("bucket_script requires a script"))?;
        let addition = Regex::new(ADDITION).map_err(|e| TranslateError::malformed(e.to_string()))?;
        let captures = addition
            .captures(source)
            .ok_or_else(|| TranslateError::unsupported(format!("bucket_script {:?}", source)))?;

        Ok(Self {
            buckets_path: options.buckets_path,
            left: captures[1].to_string(),
            right: captures[2].to_string(),
        })
    }

    fn path(&self, param: &str) -> Result<&str> {
        self.buckets_path
            .get(param)
            .map(String::as_str)
            .ok_or_else(|| TranslateError::Resolution(format!("script parameter {:?} has no buckets_path", param)))
    }

    /// Sum of both operands, `None` when either one is missing in the bucket
    fn evaluate(&self, lookup: impl Fn(&str) -> Option<Value>) -> Result<Option<f64>> {
        let mut sum = 0.0;
        for param in [&self.left, &self.right] {
            let path = self.path(param)?;
            let value = lookup(path)
                .ok_or_else(|| TranslateError::Resolution(format!("buckets_path {:?} not found", path)))?;
            match value.as_f64() {
                Some(number) => sum += number,
                None => return Ok(None),
            }
        }
        Ok(Some(sum))
    }
}

impl PipelineAggregation for BucketScript {
    fn process(&self, name: &str, data: &mut AggResult) -> Result<()> {
        let write = |sub_aggs: &mut SubAggregations, value: Option<f64>| {
            if let Some(value) = value {
                sub_aggs.insert(name.to_string(), AggResult::Metric(MetricValue::new(Value::from(value))));
            }
        };

        match data {
            AggResult::Multi(multi) => {
                for bucket in &mut multi.buckets {
                    let value = self.evaluate(|path| bucket.path_value(path))?;
                    write(&mut bucket.sub_aggs, value);
                }
            }
            AggResult::Mapped(mapped) => {
                for bucket in mapped.buckets.values_mut() {
                    let value = self.evaluate(|path| single_path_value(bucket, path))?;
                    write(&mut bucket.sub_aggs, value);
                }
            }
            AggResult::Single(bucket) => {
                let value = self.evaluate(|path| single_path_value(bucket, path))?;
                write(&mut bucket.sub_aggs, value);
            }
            AggResult::Metric(_) | AggResult::GeoCentroid(_) => {
                return Err(TranslateError::Resolution(format!(
                    "bucket_script {:?} must be nested in a bucket aggregation",
                    name
                )))
            }
        }
        Ok(())
    }
}

fn single_path_value(bucket: &SingleBucket, path: &str) -> Option<Value> {
    match path {
        "_count" => Some(Value::from(bucket.doc_count)),
        _ => metric_path_value(&bucket.sub_aggs, path),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketSort {
    pub sort: Vec<(String, Order)>,
    pub from: usize,
    pub size: Option<usize>,
}

#[derive(Deserialize)]
struct BucketSortOptions {
    #[serde(default)]
    sort: Option<Value>,
    #[serde(default)]
    from: usize,
    #[serde(default)]
    size: Option<usize>,
}

impl BucketSort {
    pub(super) fn parse(body: &Value) -> Result<Self> {
        let options: BucketSortOptions = super::options("bucket_sort", body)?;
        let entries = match options.sort {
            None => Vec::new(),
            Some(Value::Array(items)) => items,
            Some(single) => vec![single],
        };

        let mut sort = Vec::new();
        for entry in &entries {
            match entry {
                Value::String(path) => sort.push((path.clone(), Order::Asc)),
                Value::Object(map) if map.len() == 1 => {
                    for (path, spec) in map {
                        let order = match spec {
                            Value::String(order) => Some(order.as_str()),
                            Value::Object(inner) => inner.get("order").and_then(Value::as_str),
                            _ => None,
                        };
                        let order = match order {
                            Some(text) => Order::parse(text)
                                .ok_or_else(|| TranslateError::malformed(format!("invalid order {:?}", text)))?,
                            None => Order::Asc,
                        };
                        sort.push((path.clone(), order));
                    }
                }
                _ => return Err(TranslateError::malformed("sort-field should only contain a single value")),
            }
        }
        Ok(Self {
            sort,
            from: options.from,
            size: options.size,
        })
    }

    fn compare(&self, a: &KeyedBucket, b: &KeyedBucket) -> Ordering {
        for (path, order) in &self.sort {
            let ordering = match (a.path_value(path), b.path_value(path)) {
                (Some(x), Some(y)) if !x.is_null() && !y.is_null() => {
                    let ordering = compare_values(&x, &y);
                    match order {
                        Order::Asc => ordering,
                        Order::Desc => ordering.reverse(),
                    }
                }
                // gaps sort last whatever the direction
                (x, y) => {
                    let missing = |v: &Option<Value>| v.as_ref().map_or(true, Value::is_null);
                    missing(&x).cmp(&missing(&y))
                }
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or_default(), y.as_f64().unwrap_or_default());
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

impl PipelineAggregation for BucketSort {
    fn process(&self, name: &str, data: &mut AggResult) -> Result<()> {
        let AggResult::Multi(multi) = data else {
            return Err(TranslateError::unsupported(format!(
                "bucket_sort {:?} outside a multi-bucket aggregation",
                name
            )));
        };

        for (path, _) in &self.sort {
            if let Some(bucket) = multi.buckets.first() {
                if bucket.path_value(path).is_none() {
                    return Err(TranslateError::Resolution(format!("buckets_path {:?} not found", path)));
                }
            }
        }

        // sort_by is stable, equal buckets keep their decoded order
        multi.buckets.sort_by(|a, b| self.compare(a, b));
        let end = self
            .size
            .map_or(multi.buckets.len(), |size| self.from.saturating_add(size));
        multi.buckets.truncate(end);
        let from = self.from.min(multi.buckets.len());
        multi.buckets.drain(..from);
        Ok(())
    }
}

/// Rank of an aggregation in the post-pass, lower runs first
fn rank(agg: &Aggregation) -> Option<u8> {
    match &agg.kind {
        AggregationKind::Metric(_) => None,
        AggregationKind::Bucket(_) => Some(0),
        AggregationKind::Pipeline(PipelineAgg::BucketScript(_)) => Some(1),
        AggregationKind::Pipeline(PipelineAgg::BucketSort(_)) => Some(3),
    }
}

fn ordered(aggs: &Aggregations) -> Vec<(&String, &Aggregation)> {
    let mut ordered: Vec<_> = aggs.iter().filter_map(|(name, agg)| Some((rank(agg)?, name, agg))).collect();
    // stable on top of the name order of the map
    ordered.sort_by_key(|(rank, _, _)| *rank);
    ordered.into_iter().map(|(_, name, agg)| (name, agg)).collect()
}

/// Run the pipelines nested in the decoded top-level aggregations
pub fn run_pipelines(aggs: &Aggregations, results: &mut SubAggregations) -> Result<()> {
    for (name, agg) in ordered(aggs) {
        match &agg.kind {
            AggregationKind::Pipeline(_) => {
                return Err(TranslateError::unsupported(format!(
                    "top-level pipeline aggregation {:?}",
                    name
                )))
            }
            _ => {
                if let Some(result) = results.get_mut(name) {
                    apply(&agg.aggs, result)?;
                }
            }
        }
    }
    Ok(())
}

/// Run the pipelines of `aggs` against the result of their enclosing bucket
fn apply(aggs: &Aggregations, data: &mut AggResult) -> Result<()> {
    for (name, agg) in ordered(aggs) {
        match &agg.kind {
            AggregationKind::Pipeline(pipeline) => {
                tracing::trace!(pipeline = %name, "running pipeline aggregation");
                pipeline.as_dyn().process(name, data)?;
            }
            _ => {
                for sub_aggs in data.bucket_aggs_mut() {
                    if let Some(child) = sub_aggs.get_mut(name) {
                        apply(&agg.aggs, child)?;
                    }
                }
            }
        }
    }
    Ok(())
}
