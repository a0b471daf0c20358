//! `terms` and `multi_terms` bucket aggregations

use serde::Deserialize;
use serde_json::Value;

use super::generate::{effective_size, GenerateContext, GROUP_BY_LIMIT};
use super::process::{truncate, GroupResults, ProcessContext};
use super::result::{AggResult, KeyedBucket, MultiBuckets};
use super::BucketAggregation;
use crate::datum::Datum;
use crate::error::{Result, TranslateError};
use crate::mapping::FieldRef;
use crate::sql::{Expr, Order, Select};

/// Bucket ordering as a list of `(_count | _key, direction)` pairs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermsOrder(pub Vec<(String, Order)>);

impl TermsOrder {
    /// Accepts `{"_count": "asc"}` as well as a list of such objects
    pub fn parse(value: &Value) -> Result<Self> {
        let entries: Vec<&serde_json::Map<String, Value>> = match value {
            Value::Object(map) => vec![map],
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_object()
                        .ok_or_else(|| TranslateError::malformed("order entries should be objects"))
                })
                .collect::<Result<_>>()?,
            _ => return Err(TranslateError::malformed("order should be an object or a list")),
        };

        let mut order = Vec::new();
        for entry in entries {
            for (key, direction) in entry {
                let direction = direction
                    .as_str()
                    .and_then(Order::parse)
                    .ok_or_else(|| TranslateError::malformed(format!("invalid order {} for {:?}", direction, key)))?;
                order.push((key.clone(), direction));
            }
        }
        Ok(Self(order))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Add the orderings to the context; `keys` are the group expressions
    pub(super) fn apply(&self, c: &mut GenerateContext<'_>, keys: &[Expr]) {
        for (key, order) in &self.0 {
            match key.as_str() {
                "_count" => {
                    c.add_ordering(Expr::count_star(), *order);
                }
                "_key" | "_term" => {
                    for expr in keys {
                        c.add_ordering(expr.clone(), *order);
                    }
                }
                other => tracing::warn!(bucket = %c.bucket, key = other, "ignoring unsupported bucket order"),
            }
        }
    }
}

fn order_option(value: Option<&Value>) -> Result<TermsOrder> {
    value.map(TermsOrder::parse).transpose().map(Option::unwrap_or_default)
}

/// `parent doc_count - Σ bucket doc_count`, unless disabled for the tenant
pub(super) fn sum_other_doc_count(c: &ProcessContext<'_>, bucket_total: i64) -> Option<i64> {
    (!c.ctx.skip_sum_other_doc_count() && c.doc_count > 0).then(|| c.doc_count - bucket_total)
}

fn reject_unsupported(kind: &str, options: &serde_json::Map<String, Value>) -> Result<()> {
    for key in ["script", "include", "exclude"] {
        if options.contains_key(key) {
            return Err(TranslateError::unsupported(format!("{} in {} aggregation", key, kind)));
        }
    }
    for key in ["missing", "min_doc_count", "shard_size", "execution_hint", "collect_mode"] {
        if options.contains_key(key) {
            tracing::warn!(aggregation = kind, option = key, "option is accepted but not applied");
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Terms {
    pub field: String,
    pub size: Option<usize>,
    pub order: TermsOrder,
    pub format: Option<String>,
}

#[derive(Deserialize)]
struct TermsOptions {
    field: String,
    #[serde(default)]
    size: Option<usize>,
    #[serde(default)]
    format: Option<String>,
}

impl Terms {
    pub(super) fn parse(body: &Value) -> Result<Self> {
        let map = body
            .as_object()
            .ok_or_else(|| TranslateError::malformed("terms aggregation should be an object"))?;
        reject_unsupported("terms", map)?;
        let options: TermsOptions = super::options("terms", body)?;
        Ok(Self {
            field: options.field,
            size: options.size,
            order: order_option(map.get("order"))?,
            format: options.format,
        })
    }

    /// Keys of datetime fields may arrive as text
    fn key(&self, c: &ProcessContext<'_>, key: &Datum) -> Datum {
        let field = FieldRef::resolve(c.ctx, &self.field);
        match key.as_timestamp() {
            Some(ts) if field.field_type(c.ctx) == "datetime" => Datum::Timestamp(ts),
            _ => key.clone(),
        }
    }
}

impl BucketAggregation for Terms {
    fn transform(&self, mut c: GenerateContext<'_>) -> Result<Vec<(String, Select)>> {
        let key = Expr::Field(FieldRef::resolve(c.ctx(), &self.field));
        c.add_group_expr(key.clone()).add_doc_count(false);

        if self.order.is_empty() {
            c.add_ordering(Expr::count_star(), Order::Desc);
        } else {
            self.order.apply(&mut c, &[key]);
        }
        c.set_size(effective_size(self.size));
        c.transform()
    }

    fn process(&self, c: &ProcessContext<'_>) -> Result<AggResult> {
        let mut buckets = Vec::new();
        let mut total = 0;

        if let Some(groups) = c.groups() {
            for group in truncate(&groups.groups, effective_size(self.size)) {
                let key = single_key(c, group, "terms")?;
                let doc_count = group.doc_count(c.name)?;
                let sub_aggs = c.sub_result(Some(group), doc_count)?;
                buckets.push(KeyedBucket::new(
                    c.ctx,
                    &self.key(c, key),
                    Some(&self.field),
                    self.format.as_deref(),
                    doc_count,
                    sub_aggs,
                ));
                total += doc_count;
            }
        }

        Ok(AggResult::Multi(MultiBuckets {
            buckets,
            sum_other_doc_count: sum_other_doc_count(c, total),
            doc_count_error_upper_bound: Some(0),
            meta: None,
        }))
    }
}

pub(super) fn single_key<'a>(c: &ProcessContext<'_>, group: &'a GroupResults, kind: &str) -> Result<&'a Datum> {
    match group.key_values.as_slice() {
        [key] => Ok(key),
        other => Err(TranslateError::shape(
            c.name,
            format!("key-value count is {}, which is invalid for a {} aggregation", other.len(), kind),
        )),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiTerms {
    pub fields: Vec<String>,
    pub size: Option<usize>,
    pub order: TermsOrder,
}

#[derive(Deserialize)]
struct MultiTermsOptions {
    terms: Vec<MultiTermField>,
    #[serde(default)]
    size: Option<usize>,
}

#[derive(Deserialize)]
struct MultiTermField {
    field: String,
    #[serde(default)]
    missing: Option<Value>,
}

impl MultiTerms {
    pub(super) fn parse(body: &Value) -> Result<Self> {
        let map = body
            .as_object()
            .ok_or_else(|| TranslateError::malformed("multi_terms aggregation should be an object"))?;
        reject_unsupported("multi_terms", map)?;
        let options: MultiTermsOptions = super::options("multi_terms", body)?;
        if options.terms.len() < 2 {
            return Err(TranslateError::malformed("multi_terms requires at least two terms"));
        }
        if options.terms.iter().any(|t| t.missing.is_some()) {
            tracing::warn!("missing value in multi_terms is accepted but not applied");
        }
        Ok(Self {
            fields: options.terms.into_iter().map(|t| t.field).collect(),
            size: options.size,
            order: order_option(map.get("order"))?,
        })
    }
}

impl BucketAggregation for MultiTerms {
    fn transform(&self, mut c: GenerateContext<'_>) -> Result<Vec<(String, Select)>> {
        let keys: Vec<Expr> = self
            .fields
            .iter()
            .map(|f| Expr::Field(FieldRef::resolve(c.ctx(), f)))
            .collect();
        for key in &keys {
            c.add_group_expr(key.clone());
        }
        c.add_doc_count(false);

        if self.order.is_empty() {
            c.add_ordering(Expr::count_star(), Order::Desc);
        } else {
            self.order.apply(&mut c, &keys);
        }

        let size = if c.nesting_level() == 1 {
            effective_size(self.size)
        } else {
            GROUP_BY_LIMIT
        };
        c.set_size(size);
        c.transform()
    }

    fn process(&self, c: &ProcessContext<'_>) -> Result<AggResult> {
        let mut buckets = Vec::new();
        let mut total = 0;

        if let Some(groups) = c.groups() {
            for group in truncate(&groups.groups, effective_size(self.size)) {
                if group.key_values.len() != self.fields.len() {
                    return Err(TranslateError::shape(
                        c.name,
                        format!("expected {} key values, got {}", self.fields.len(), group.key_values.len()),
                    ));
                }
                let doc_count = group.doc_count(c.name)?;
                let sub_aggs = c.sub_result(Some(group), doc_count)?;

                let text: Vec<String> = group
                    .key_values
                    .iter()
                    .map(|v| match v {
                        Datum::String(s) => s.clone(),
                        other => other.to_json().to_string(),
                    })
                    .collect();
                buckets.push(KeyedBucket {
                    key: Value::Array(group.key_values.iter().map(Datum::to_json).collect()),
                    key_as_string: Some(text.join("|")),
                    doc_count,
                    sub_aggs,
                });
                total += doc_count;
            }
        }

        Ok(AggResult::Multi(MultiBuckets {
            buckets,
            sum_other_doc_count: sum_other_doc_count(c, total),
            doc_count_error_upper_bound: None,
            meta: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggs::{parse_aggregations, pre_process, process_aggregations, Generator};
    use crate::context::QueryContext;
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

    fn nested_request() -> Value {
        json!({
            "category": {
                "terms": {"field": "category"},
                "aggs": {
                    "product": {
                        "terms": {"field": "product"},
                        "aggs": {"avgPrice": {"avg": {"field": "price"}}}
                    }
                }
            }
        })
    }

    #[test]
    fn test_nested_terms_sql() {
        let ctx = QueryContext::new("i");
        let queries = generate(&ctx, nested_request());
        assert_eq!(queries.len(), 2);

        assert_eq!(queries[0].0, "$bucket:category%0");
        assert_eq!(
            queries[0].1,
            concat!(
                r#"SELECT "$source"."category" AS "$key:category%0", COUNT(*) AS "$doc_count" "#,
                r#"FROM "$source" GROUP BY "$source"."category" ORDER BY "$doc_count" DESC LIMIT 10"#
            )
        );

        assert_eq!(queries[1].0, "$bucket:category:product%0");
        assert_eq!(
            queries[1].1,
            concat!(
                r#"SELECT "$source"."category" AS "$key:category%0", "$source"."product" AS "$key:category:product%0", "#,
                r#"COUNT(*) AS "$doc_count", AVG("$source"."price") AS "avgPrice" FROM "$source" "#,
                r#"WHERE ("$source"."category" IN (SELECT "$selection"."$key:category%0" FROM "$bucket:category%0" AS "$selection")) "#,
                r#"GROUP BY "$source"."category", "$source"."product" "#,
                r#"HAVING (ROW_NUMBER() OVER (PARTITION BY "$source"."category" ORDER BY COUNT(*) DESC) <= 10) "#,
                r#"ORDER BY "$doc_count" DESC"#
            )
        );
    }

    #[test]
    fn test_order_by_key() {
        let ctx = QueryContext::new("i");
        let queries = generate(
            &ctx,
            json!({"t": {"terms": {"field": "f", "size": 3, "order": [{"_key": "asc"}]}}}),
        );
        assert!(queries[0].1.ends_with(r#"ORDER BY "$key:t%0" ASC LIMIT 3"#));
    }

    #[test]
    fn test_invalid_order() {
        let err = parse_aggregations(&json!({"t": {"terms": {"field": "f", "order": {"_count": "up"}}}})).unwrap_err();
        assert!(matches!(err, TranslateError::Malformed(_)));
        let err = parse_aggregations(&json!({"t": {"terms": {"field": "f", "include": "a.*"}}})).unwrap_err();
        assert!(matches!(err, TranslateError::Unsupported(_)));
    }

    #[test]
    fn test_process_nested_terms() {
        let ctx = QueryContext::new("i");
        let aggs = parse_aggregations(&nested_request()).unwrap();
        let root = pre_process(
            json!({
                "$total_count": 12,
                "$bucket:category%0": [
                    {"$key:category%0": "a", "$doc_count": 6},
                    {"$key:category%0": "b", "$doc_count": 4}
                ],
                "$bucket:category:product%0": [
                    {"$key:category%0": "a", "$key:category:product%0": "x", "$doc_count": 5, "avgPrice": 1.5},
                    {"$key:category%0": "a", "$key:category:product%0": "y", "$doc_count": 1, "avgPrice": 2},
                    {"$key:category%0": "b", "$key:category:product%0": "x", "$doc_count": 4, "avgPrice": 3}
                ]
            })
            .as_object()
            .unwrap(),
        )
        .unwrap();

        let results = process_aggregations(&ctx, &aggs, Some(&root), 12).unwrap();
        let value = serde_json::to_value(&results).unwrap();
        assert_eq!(value["category"]["sum_other_doc_count"], json!(2));
        assert_eq!(value["category"]["doc_count_error_upper_bound"], json!(0));

        let a = &value["category"]["buckets"][0];
        assert_eq!(a["key"], json!("a"));
        assert_eq!(a["doc_count"], json!(6));
        assert_eq!(a["product"]["sum_other_doc_count"], json!(0));
        assert_eq!(a["product"]["buckets"][1]["key"], json!("y"));
        assert_eq!(a["product"]["buckets"][1]["avgPrice"]["value"], json!(2.0));
    }

    #[test]
    fn test_sum_other_doc_count_disabled() {
        let ctx = QueryContext::new("i").with_ignore_sum_other_doc_count(true);
        let aggs = parse_aggregations(&json!({"t": {"terms": {"field": "f", "size": 1}}})).unwrap();
        let root = pre_process(
            json!({
                "$total_count": 5,
                "$bucket:t%0": [{"$key:t%0": "a", "$doc_count": 3}, {"$key:t%0": "b", "$doc_count": 2}]
            })
            .as_object()
            .unwrap(),
        )
        .unwrap();
        let results = process_aggregations(&ctx, &aggs, Some(&root), 5).unwrap();
        let value = serde_json::to_value(&results).unwrap();
        assert_eq!(value["t"]["buckets"].as_array().unwrap().len(), 1);
        assert!(value["t"].get("sum_other_doc_count").is_none());
    }

    #[test]
    fn test_multi_terms() {
        let ctx = QueryContext::new("i");
        let request = json!({"pair": {"multi_terms": {"terms": [{"field": "a"}, {"field": "b"}]}}});
        let queries = generate(&ctx, request.clone());
        assert!(queries[0].1.starts_with(
            r#"SELECT "$source"."a" AS "$key:pair%0", "$source"."b" AS "$key:pair%1", COUNT(*) AS "$doc_count""#
        ));

        let aggs = parse_aggregations(&request).unwrap();
        let root = pre_process(
            json!({
                "$total_count": 3,
                "$bucket:pair%0": [{"$key:pair%0": "x", "$key:pair%1": 7, "$doc_count": 3}]
            })
            .as_object()
            .unwrap(),
        )
        .unwrap();
        let results = process_aggregations(&ctx, &aggs, Some(&root), 3).unwrap();
        assert_eq!(
            serde_json::to_value(&results["pair"]).unwrap(),
            json!({
                "buckets": [{"key": ["x", 7], "key_as_string": "x|7", "doc_count": 3}],
                "sum_other_doc_count": 0
            })
        );
    }
}
