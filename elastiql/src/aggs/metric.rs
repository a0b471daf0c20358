//! Single-value metric aggregations

use serde::Deserialize;
use serde_json::{json, Value};

use super::generate::GenerateContext;
use super::process::ProcessContext;
use super::result::{AggResult, GeoCentroidValue, GeoLocation, MetricValue};
use crate::datum::Datum;
use crate::error::{Result, TranslateError};
use crate::literal::rfc3339_nano;
use crate::mapping::FieldRef;
use crate::query::{LAT_EXT, LON_EXT};
use crate::sql::{Expr, UnaryOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Min,
    Max,
    Avg,
    Sum,
    Cardinality,
    ValueCount,
    GeoCentroid,
}

impl MetricKind {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "min" => MetricKind::Min,
            "max" => MetricKind::Max,
            "avg" => MetricKind::Avg,
            "sum" => MetricKind::Sum,
            "cardinality" => MetricKind::Cardinality,
            "value_count" => MetricKind::ValueCount,
            "geo_centroid" => MetricKind::GeoCentroid,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub kind: MetricKind,
    pub field: String,
}

#[derive(Deserialize)]
struct MetricOptions {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    script: Option<Value>,
    #[serde(default)]
    missing: Option<Value>,
}

impl Metric {
    pub(super) fn parse(name: &str, body: &Value) -> Result<Self> {
        let kind = MetricKind::from_name(name)
            .ok_or_else(|| TranslateError::malformed(format!("invalid field {:?}", name)))?;
        let options: MetricOptions = super::options(name, body)?;

        if options.script.is_some() {
            return Err(TranslateError::unsupported(format!("script in {} aggregation", name)));
        }
        if options.missing.is_some() {
            tracing::warn!(aggregation = name, "missing value is accepted but not applied");
        }
        let field = options
            .field
            .filter(|f| !f.is_empty())
            .ok_or_else(|| TranslateError::malformed(format!("{} aggregation requires a field", name)))?;

        Ok(Self { kind, field })
    }

    pub(super) fn transform(&self, name: &str, c: &mut GenerateContext<'_>) -> Result<()> {
        let field = FieldRef::resolve(c.ctx(), &self.field);
        let expr = |function: &str| Expr::function(function, vec![Expr::Field(field.clone())]);

        match self.kind {
            MetricKind::Min => c.add_projection(name, expr("MIN")),
            MetricKind::Max => c.add_projection(name, expr("MAX")),
            MetricKind::Avg => c.add_projection(name, expr("AVG")),
            MetricKind::Sum => c.add_projection(name, expr("SUM")),
            MetricKind::ValueCount => c.add_projection(name, expr("COUNT")),
            // COUNT(DISTINCT ..) does not combine with other aggregates
            MetricKind::Cardinality => c.add_demoted(
                name,
                Expr::function(
                    "COUNT",
                    vec![Expr::unary(UnaryOp::Distinct, Expr::Field(field.clone()))],
                ),
            ),
            MetricKind::GeoCentroid => {
                let lat = Expr::Field(field.child(LAT_EXT));
                let lon = Expr::Field(field.child(LON_EXT));
                c.add_projection(
                    name,
                    Expr::Object(vec![
                        ("lat".to_string(), Expr::function("AVG", vec![lat.clone()])),
                        ("lon".to_string(), Expr::function("AVG", vec![lon])),
                        ("count".to_string(), Expr::function("COUNT", vec![lat])),
                    ]),
                )
            }
        };
        Ok(())
    }

    pub(super) fn process(&self, c: &ProcessContext<'_>) -> Result<AggResult> {
        let value = c.value().cloned().unwrap_or_default();

        let result = match self.kind {
            MetricKind::Min | MetricKind::Max => match value.as_timestamp() {
                Some(ts) if matches!(value, Datum::Timestamp(_)) || is_datetime(c, &self.field) => {
                    AggResult::Metric(MetricValue {
                        value: json!(ts.timestamp_millis() as f64),
                        value_as_string: Some(rfc3339_nano(&ts)),
                        meta: None,
                    })
                }
                _ => AggResult::Metric(MetricValue::new(float(c, &value)?)),
            },
            MetricKind::Avg | MetricKind::Sum => AggResult::Metric(MetricValue::new(float(c, &value)?)),
            MetricKind::ValueCount => AggResult::Metric(MetricValue::new(json!(integer(c, &value)?.unwrap_or(0)))),
            MetricKind::Cardinality => AggResult::Metric(MetricValue::new(json!(integer(c, &value)?.unwrap_or(0)))),
            MetricKind::GeoCentroid => AggResult::GeoCentroid(centroid(c, &value)?),
        };
        Ok(result)
    }
}

fn is_datetime(c: &ProcessContext<'_>, field: &str) -> bool {
    FieldRef::resolve(c.ctx, field).field_type(c.ctx) == "datetime"
}

fn float(c: &ProcessContext<'_>, value: &Datum) -> Result<Value> {
    match value {
        Datum::Null => Ok(Value::Null),
        other => other
            .as_f64()
            .map(|f| json!(f))
            .ok_or_else(|| TranslateError::shape(c.name, format!("expected a number, got {}", other.to_json()))),
    }
}

fn integer(c: &ProcessContext<'_>, value: &Datum) -> Result<Option<i64>> {
    match value {
        Datum::Null => Ok(None),
        other => other
            .as_i64()
            .map(Some)
            .ok_or_else(|| TranslateError::shape(c.name, format!("expected a count, got {}", other.to_json()))),
    }
}

fn centroid(c: &ProcessContext<'_>, value: &Datum) -> Result<GeoCentroidValue> {
    let Some(fields) = value.as_struct() else {
        if value.is_null() {
            return Ok(GeoCentroidValue {
                location: None,
                count: 0,
                meta: None,
            });
        }
        return Err(TranslateError::shape(c.name, "geo_centroid should be a struct"));
    };

    let count = fields.get("count").and_then(Datum::as_i64).unwrap_or(0);
    let lat = fields.get("lat").and_then(Datum::as_f64);
    let lon = fields.get("lon").and_then(Datum::as_f64);
    let location = match (lat, lon) {
        (Some(lat), Some(lon)) if count > 0 => Some(GeoLocation { lat, lon }),
        _ => None,
    };
    Ok(GeoCentroidValue {
        location,
        count,
        meta: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggs::{parse_aggregations, process_aggregations, pre_process, GenerateContext, Generator};
    use crate::context::QueryContext;
    use crate::mapping::TypeMapping;
    use crate::sql::print_select;
    use serde_json::json;

    fn generate(ctx: &QueryContext, aggs: Value) -> Vec<(String, String)> {
        let aggs = parse_aggregations(&aggs).unwrap();
        let gen = Generator::new(ctx);
        GenerateContext::root(&gen, &aggs)
            .transform()
            .unwrap()
            .into_iter()
            .map(|(alias, select)| (alias, print_select(&select, false)))
            .collect()
    }

    #[test]
    fn test_metrics_share_one_select() {
        let ctx = QueryContext::new("i");
        let queries = generate(
            &ctx,
            json!({"lo": {"min": {"field": "price"}}, "hi": {"max": {"field": "price"}}}),
        );
        assert_eq!(
            queries,
            vec![(
                "$bucket:%0".to_string(),
                r#"SELECT MAX("$source"."price") AS "hi", MIN("$source"."price") AS "lo" FROM "$source""#
                    .to_string()
            )]
        );
    }

    #[test]
    fn test_cardinality_is_demoted() {
        let ctx = QueryContext::new("i");
        let queries = generate(
            &ctx,
            json!({"avg": {"avg": {"field": "price"}}, "users": {"cardinality": {"field": "user"}}}),
        );
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].0, "$bucket:%0");
        assert_eq!(
            queries[1],
            (
                "$bucket:%1".to_string(),
                r#"SELECT COUNT(DISTINCT "$source"."user") AS "users", FALSE AS "$dummy$" FROM "$source""#
                    .to_string()
            )
        );
    }

    #[test]
    fn test_lone_cardinality_is_promoted() {
        let ctx = QueryContext::new("i");
        let queries = generate(&ctx, json!({"users": {"cardinality": {"field": "user"}}}));
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].0, "$bucket:%0");
    }

    #[test]
    fn test_field_is_required() {
        let err = parse_aggregations(&json!({"a": {"avg": {}}})).unwrap_err();
        assert!(matches!(err, TranslateError::Malformed(_)));
        let err = parse_aggregations(&json!({"a": {"avg": {"script": "x"}}})).unwrap_err();
        assert!(matches!(err, TranslateError::Unsupported(_)));
    }

    #[test]
    fn test_process_metrics() {
        let ctx = QueryContext::new("i").with_mapping("ts", TypeMapping::new("datetime"));
        let aggs = parse_aggregations(&json!({
            "avg": {"avg": {"field": "price"}},
            "users": {"cardinality": {"field": "user"}},
            "first": {"min": {"field": "ts"}},
            "where": {"geo_centroid": {"field": "loc"}}
        }))
        .unwrap();
        let root = pre_process(
            json!({
                "$total_count": 4,
                "$bucket:%0": {"avg": 2, "first": "2022-06-25T00:00:00Z", "where": {"lat": 1.5, "lon": 2.5, "count": 4}}
            })
            .as_object()
            .unwrap(),
        )
        .unwrap();

        let results = process_aggregations(&ctx, &aggs, Some(&root), 4).unwrap();
        assert_eq!(
            serde_json::to_value(&results).unwrap(),
            json!({
                "avg": {"value": 2.0},
                "users": {"value": 0},
                "first": {"value": 1_656_115_200_000.0, "value_as_string": "2022-06-25T00:00:00Z"},
                "where": {"location": {"lat": 1.5, "lon": 2.5}, "count": 4}
            })
        );
    }

    #[test]
    fn test_process_empty_centroid() {
        let ctx = QueryContext::new("i");
        let aggs = parse_aggregations(&json!({"where": {"geo_centroid": {"field": "loc"}}})).unwrap();
        let results = process_aggregations(&ctx, &aggs, None, 0).unwrap();
        assert_eq!(serde_json::to_value(&results).unwrap(), json!({"where": {"count": 0}}));
    }
}
