//! `filter` and `filters` single-bucket aggregations

use serde_json::Value;

use super::generate::GenerateContext;
use super::process::ProcessContext;
use super::result::{AggResult, MappedBuckets, SingleBucket};
use super::BucketAggregation;
use crate::datum::Datum;
use crate::error::{Result, TranslateError};
use crate::naming::DOC_COUNT;
use crate::query::Query;
use crate::sql::{Expr, Select};

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub query: Query,
}

impl Filter {
    pub(super) fn parse(body: &Value) -> Result<Self> {
        Ok(Self {
            query: Query::from_value(body)?,
        })
    }
}

impl BucketAggregation for Filter {
    fn transform(&self, mut c: GenerateContext<'_>) -> Result<Vec<(String, Select)>> {
        let predicate = self.query.expression(c.ctx())?;
        c.and_query(predicate).add_doc_count(false);
        c.transform()
    }

    fn process(&self, c: &ProcessContext<'_>) -> Result<AggResult> {
        let group = c.single();
        let doc_count = match group {
            Some(group) => group.doc_count(c.name)?,
            // folded into the enclosing select as `<name>:$doc_count`
            None => c
                .column(&format!("{}:{}", c.name, DOC_COUNT))
                .and_then(Datum::as_i64)
                .unwrap_or(0),
        };

        Ok(AggResult::Single(SingleBucket {
            doc_count,
            sub_aggs: c.sub_result(group, doc_count)?,
            meta: None,
        }))
    }
}

/// Named filters, each counted in its own sub-select
#[derive(Debug, Clone, PartialEq)]
pub struct Filters {
    pub filters: Vec<(String, Query)>,
}

impl Filters {
    pub(super) fn parse(body: &Value) -> Result<Self> {
        let map = body
            .as_object()
            .ok_or_else(|| TranslateError::malformed("filters aggregation should be an object"))?;
        for key in ["other_bucket", "other_bucket_key"] {
            if map.contains_key(key) {
                return Err(TranslateError::unsupported(format!("{} in filters aggregation", key)));
            }
        }

        let filters = match map.get("filters") {
            Some(Value::Object(named)) => named
                .iter()
                .map(|(name, query)| Ok((name.clone(), Query::from_value(query)?)))
                .collect::<Result<Vec<_>>>()?,
            Some(Value::Array(_)) => return Err(TranslateError::unsupported("anonymous filters")),
            _ => return Err(TranslateError::malformed("filters aggregation requires named filters")),
        };
        Ok(Self { filters })
    }
}

impl BucketAggregation for Filters {
    fn transform(&self, c: GenerateContext<'_>) -> Result<Vec<(String, Select)>> {
        let mut queries = Vec::new();
        for (i, (name, query)) in self.filters.iter().enumerate() {
            // every clause is an independent builder
            let mut clause = if i == 0 { c.clone() } else { c.fork() };
            let predicate = query.expression(c.ctx())?;
            clause
                .and_query(predicate)
                .add_group_expr(Expr::lit(name.as_str()))
                .add_doc_count(false);
            queries.extend(clause.transform()?);
        }
        Ok(queries)
    }

    fn process(&self, c: &ProcessContext<'_>) -> Result<AggResult> {
        let groups = c.groups();
        let mut result = MappedBuckets::default();

        for (name, _) in &self.filters {
            let group = groups.and_then(|g| {
                g.groups
                    .iter()
                    .find(|group| group.key_values.first().and_then(Datum::as_str) == Some(name.as_str()))
            });
            let doc_count = match group {
                Some(group) => group.doc_count(c.name)?,
                None => 0,
            };
            result.buckets.insert(
                name.clone(),
                SingleBucket {
                    doc_count,
                    sub_aggs: c.sub_result(group, doc_count)?,
                    meta: None,
                },
            );
        }
        Ok(AggResult::Mapped(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggs::{parse_aggregations, pre_process, process_aggregations, Generator};
    use crate::context::QueryContext;
    use crate::sql::print_select;
    use serde_json::json;

    #[test]
    fn test_filter_sql() {
        let ctx = QueryContext::new("i");
        let aggs = parse_aggregations(&json!({"bucketTShirts": {"filter": {"term": {"type": "t-shirt"}}}})).unwrap();
        let gen = Generator::new(&ctx);
        let queries = GenerateContext::root(&gen, &aggs).transform().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].0, "$bucket:bucketTShirts%0");
        assert_eq!(
            print_select(&queries[0].1, false),
            r#"SELECT COUNT(*) AS "$doc_count", FALSE AS "$dummy$" FROM "$source" WHERE ("$source"."type" = 't-shirt')"#
        );
    }

    #[test]
    fn test_filters_fan_out() {
        let ctx = QueryContext::new("i");
        let aggs = parse_aggregations(&json!({
            "f": {
                "filters": {"filters": {"errors": {"term": {"level": "error"}}, "warnings": {"term": {"level": "warn"}}}},
                "aggs": {"avg": {"avg": {"field": "took"}}}
            }
        }))
        .unwrap();
        let gen = Generator::new(&ctx);
        let queries = GenerateContext::root(&gen, &aggs).transform().unwrap();
        let aliases: Vec<&str> = queries.iter().map(|(a, _)| a.as_str()).collect();
        assert_eq!(aliases, vec!["$bucket:f%0", "$bucket:f%1"]);

        let first = print_select(&queries[0].1, false);
        let second = print_select(&queries[1].1, false);
        assert!(first.starts_with(r#"SELECT 'errors' AS "$key:f%0", COUNT(*) AS "$doc_count", AVG("$source"."took") AS "avg""#));
        assert!(first.contains("'error'"));
        assert!(!first.contains("'warn'"));
        assert!(second.starts_with(r#"SELECT 'warnings' AS "$key:f%0""#));
        assert!(second.contains("'warn'"));
        assert!(!second.contains("'error'"));
    }

    #[test]
    fn test_filters_unsupported_forms() {
        let err = parse_aggregations(&json!({"f": {"filters": {"filters": [{"match_all": {}}]}}})).unwrap_err();
        assert!(matches!(err, TranslateError::Unsupported(_)));
        let err = parse_aggregations(&json!({"f": {"filters": {"filters": {}, "other_bucket": true}}})).unwrap_err();
        assert!(matches!(err, TranslateError::Unsupported(_)));
    }

    #[test]
    fn test_process_filters() {
        let ctx = QueryContext::new("i");
        let aggs = parse_aggregations(&json!({
            "f": {"filters": {"filters": {"errors": {"term": {"level": "error"}}, "warnings": {"term": {"level": "warn"}}}}}
        }))
        .unwrap();
        let root = pre_process(
            json!({
                "$total_count": 9,
                "$bucket:f%0": [{"$key:f%0": "errors", "$doc_count": 4}],
                "$bucket:f%1": []
            })
            .as_object()
            .unwrap(),
        )
        .unwrap();
        let results = process_aggregations(&ctx, &aggs, Some(&root), 9).unwrap();
        assert_eq!(
            serde_json::to_value(&results).unwrap(),
            json!({"f": {"buckets": {"errors": {"doc_count": 4}, "warnings": {"doc_count": 0}}}})
        );
    }

    #[test]
    fn test_process_filter_under_terms() {
        let ctx = QueryContext::new("i");
        let aggs = parse_aggregations(&json!({
            "t": {"terms": {"field": "host"}, "aggs": {"slow": {"filter": {"range": {"took": {"gte": 100}}}}}}
        }))
        .unwrap();
        let root = pre_process(
            json!({
                "$total_count": 3,
                "$bucket:t%0": [{"$key:t%0": "a", "$doc_count": 3}],
                "$bucket:t:slow%0": [{"$key:t%0": "a", "$doc_count": 1}]
            })
            .as_object()
            .unwrap(),
        )
        .unwrap();
        let results = process_aggregations(&ctx, &aggs, Some(&root), 3).unwrap();
        let value = serde_json::to_value(&results).unwrap();
        assert_eq!(value["t"]["buckets"][0]["slow"], json!({"doc_count": 1}));
    }
}
