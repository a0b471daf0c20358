//! Aggregation DSL
//!
//! An aggregation request is parsed into a tree of [`Aggregation`] nodes.
//! The tree is consulted twice: once to generate the SQL sub-selects
//! ([`generate`]) and once to rebuild the Elasticsearch result from the
//! engine output ([`process`]). Pipeline aggregations only take part in
//! the second pass ([`pipeline`]).

mod date_histogram;
mod filter;
pub mod generate;
mod geotile;
mod histogram;
mod metric;
pub mod pipeline;
pub mod process;
pub mod result;
mod terms;
mod top_hits;

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub use date_histogram::{CalendarUnit, DateHistogram, Interval};
pub use filter::{Filter, Filters};
pub use generate::{GenerateContext, Generator};
pub use geotile::GeotileGrid;
pub use histogram::Histogram;
pub use metric::{Metric, MetricKind};
pub use pipeline::{BucketScript, BucketSort};
pub use process::{pre_process, process_aggregations, GroupResults, ProcessContext};
pub use result::{AggResult, SubAggregations};
pub use terms::{MultiTerms, Terms, TermsOrder};
pub use top_hits::TopHits;

use crate::error::{Result, TranslateError};
use crate::sql::Select;

/// Named sibling aggregations, iterated in name order
pub type Aggregations = BTreeMap<String, Aggregation>;

/// Aggregation names that exist in Elasticsearch but have no translation
const UNSUPPORTED: &[&str] = &[
    "adjacency_matrix",
    "auto_date_histogram",
    "avg_bucket",
    "boxplot",
    "bucket_selector",
    "children",
    "composite",
    "cumulative_sum",
    "date_range",
    "derivative",
    "diversified_sampler",
    "extended_stats",
    "geo_bounds",
    "geo_distance",
    "geohash_grid",
    "global",
    "ip_range",
    "matrix_stats",
    "max_bucket",
    "median_absolute_deviation",
    "min_bucket",
    "missing",
    "moving_fn",
    "nested",
    "parent",
    "percentile_ranks",
    "percentiles",
    "range",
    "rare_terms",
    "reverse_nested",
    "sampler",
    "scripted_metric",
    "serial_diff",
    "significant_terms",
    "significant_text",
    "stats",
    "stats_bucket",
    "string_stats",
    "sum_bucket",
    "t_test",
    "top_metrics",
    "variable_width_histogram",
    "weighted_avg",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub kind: AggregationKind,
    pub aggs: Aggregations,
    /// Echoed verbatim inside the aggregation's result
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregationKind {
    Metric(Metric),
    Bucket(BucketAgg),
    Pipeline(PipelineAgg),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BucketAgg {
    Terms(Terms),
    MultiTerms(MultiTerms),
    Histogram(Histogram),
    DateHistogram(DateHistogram),
    Filter(Filter),
    Filters(Filters),
    GeotileGrid(GeotileGrid),
    TopHits(TopHits),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineAgg {
    BucketScript(BucketScript),
    BucketSort(BucketSort),
}

/// Aggregations that partition documents into buckets
pub trait BucketAggregation {
    /// Emit the sub-selects for this bucket level
    fn transform(&self, c: GenerateContext<'_>) -> Result<Vec<(String, Select)>>;

    /// Rebuild this aggregation's result from the decoded group tree
    fn process(&self, c: &ProcessContext<'_>) -> Result<AggResult>;
}

/// Aggregations computed from the decoded results of their siblings
pub trait PipelineAggregation {
    fn process(&self, name: &str, data: &mut AggResult) -> Result<()>;
}

impl BucketAgg {
    pub fn as_dyn(&self) -> &dyn BucketAggregation {
        match self {
            BucketAgg::Terms(a) => a,
            BucketAgg::MultiTerms(a) => a,
            BucketAgg::Histogram(a) => a,
            BucketAgg::DateHistogram(a) => a,
            BucketAgg::Filter(a) => a,
            BucketAgg::Filters(a) => a,
            BucketAgg::GeotileGrid(a) => a,
            BucketAgg::TopHits(a) => a,
        }
    }
}

impl PipelineAgg {
    pub fn as_dyn(&self) -> &dyn PipelineAggregation {
        match self {
            PipelineAgg::BucketScript(a) => a,
            PipelineAgg::BucketSort(a) => a,
        }
    }
}

/// Deserialize aggregation options, naming the aggregation on failure
pub(crate) fn options<T: DeserializeOwned>(kind: &str, body: &Value) -> Result<T> {
    serde_json::from_value(body.clone())
        .map_err(|e| TranslateError::malformed(format!("invalid {} aggregation: {}", kind, e)))
}

impl AggregationKind {
    /// Decode the body of the aggregation keyword `name`. `None` when the
    /// keyword is not an aggregation type at all.
    fn parse(name: &str, body: &Value) -> Result<Option<Self>> {
        use AggregationKind::{Bucket, Pipeline};

        let kind = match name {
            "min" | "max" | "avg" | "sum" | "cardinality" | "value_count" | "geo_centroid" => {
                AggregationKind::Metric(Metric::parse(name, body)?)
            }
            "terms" => Bucket(BucketAgg::Terms(Terms::parse(body)?)),
            "multi_terms" => Bucket(BucketAgg::MultiTerms(MultiTerms::parse(body)?)),
            "histogram" => Bucket(BucketAgg::Histogram(options(name, body)?)),
            "date_histogram" => Bucket(BucketAgg::DateHistogram(DateHistogram::parse(body)?)),
            "filter" => Bucket(BucketAgg::Filter(Filter::parse(body)?)),
            "filters" => Bucket(BucketAgg::Filters(Filters::parse(body)?)),
            "geotile_grid" => Bucket(BucketAgg::GeotileGrid(options(name, body)?)),
            "top_hits" => Bucket(BucketAgg::TopHits(TopHits::parse(body)?)),
            "bucket_script" => Pipeline(PipelineAgg::BucketScript(BucketScript::parse(body)?)),
            "bucket_sort" => Pipeline(PipelineAgg::BucketSort(BucketSort::parse(body)?)),
            other if UNSUPPORTED.contains(&other) => {
                return Err(TranslateError::unsupported(format!("aggregation {:?}", other)))
            }
            _ => return Ok(None),
        };
        Ok(Some(kind))
    }
}

impl Aggregation {
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| TranslateError::malformed("aggregation should be an object"))?;

        let mut aggs = Aggregations::new();
        let mut meta = None;
        let mut kinds = Vec::new();

        for (field, body) in map {
            match field.as_str() {
                "aggs" | "aggregations" => aggs = parse_aggregations(body)?,
                "meta" => meta = Some(body.clone()),
                name => match AggregationKind::parse(name, body)? {
                    Some(kind) => kinds.push((name, kind)),
                    None => return Err(TranslateError::malformed(format!("invalid field {:?}", name))),
                },
            }
        }

        if kinds.len() > 1 {
            let names: Vec<&str> = kinds.iter().map(|(name, _)| *name).collect();
            return Err(TranslateError::malformed(format!(
                "multiple aggregations are not allowed: {}",
                names.join(",")
            )));
        }
        let (_, kind) = kinds
            .pop()
            .ok_or_else(|| TranslateError::malformed("aggregation type is missing"))?;

        Ok(Self { kind, aggs, meta })
    }
}

/// Decode an `aggs` object into named aggregations
pub fn parse_aggregations(value: &Value) -> Result<Aggregations> {
    let map: &Map<String, Value> = value
        .as_object()
        .ok_or_else(|| TranslateError::malformed("aggregations should be an object"))?;
    map.iter()
        .map(|(name, body)| Ok((name.clone(), Aggregation::from_value(body)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_nested() {
        let aggs = parse_aggregations(&json!({
            "category": {
                "terms": {"field": "category"},
                "meta": {"k": 1},
                "aggs": {"avgPrice": {"avg": {"field": "price"}}}
            }
        }))
        .unwrap();

        let category = &aggs["category"];
        assert!(matches!(category.kind, AggregationKind::Bucket(BucketAgg::Terms(_))));
        assert_eq!(category.meta, Some(json!({"k": 1})));
        assert!(matches!(
            category.aggs["avgPrice"].kind,
            AggregationKind::Metric(Metric { kind: MetricKind::Avg, .. })
        ));
    }

    #[test]
    fn test_multiple_kinds_rejected() {
        let err = Aggregation::from_value(&json!({
            "avg": {"field": "a"},
            "sum": {"field": "a"}
        }))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed request: multiple aggregations are not allowed: avg,sum"
        );
    }

    #[test]
    fn test_unknown_and_unsupported() {
        let err = Aggregation::from_value(&json!({"bogus": {}})).unwrap_err();
        assert!(matches!(err, TranslateError::Malformed(_)));

        let err = Aggregation::from_value(&json!({"percentiles": {"field": "a"}})).unwrap_err();
        assert!(matches!(err, TranslateError::Unsupported(_)));

        let err = Aggregation::from_value(&json!({"meta": {}})).unwrap_err();
        assert!(matches!(err, TranslateError::Malformed(_)));
    }
}
