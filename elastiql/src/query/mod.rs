//! Elasticsearch Query DSL
//!
//! A query object is decoded by switching on its keys: every supported
//! keyword maps to one variant, every known-but-unsupported keyword fails
//! with [`TranslateError::Unsupported`]. Several keys in one object are
//! ANDed.

pub mod text;

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::context::QueryContext;
use crate::error::{Result, TranslateError};
use crate::literal::Literal;
use crate::mapping::format::format_in;
use crate::mapping::FieldRef;
use crate::query_string::{self, DefaultOperator};
use crate::sql::{BinaryOp, Expr, UnaryOp};
use text::{text_match, translate_like, TextValue, MODE_KEYWORD_IGNORE_CASE};

pub const LAT_EXT: &str = "lat";
pub const LON_EXT: &str = "lon";

/// Query keywords that are recognized but cannot be translated
const UNSUPPORTED: &[&str] = &[
    "boosting",
    "dis_max",
    "function_score",
    "intervals",
    "match_bool_prefix",
    "match_phrase_prefix",
    "combined_fields",
    "multi_match",
    "simple_query_string",
    "geo_distance",
    "geo_polygon",
    "geo_shape",
    "shape",
    "nested",
    "has_child",
    "has_parent",
    "parent_id",
    "span_containing",
    "span_field_masking",
    "span_first",
    "span_multi",
    "span_near",
    "span_not",
    "span_or",
    "span_term",
    "span_within",
    "distance_feature",
    "more_like_this",
    "percolate",
    "rank_feature",
    "script",
    "script_score",
    "wrapper",
    "pinned",
    "fuzzy",
    "prefix",
    "regexp",
    "terms_set",
    "ids",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Bool(BoolQuery),
    /// `constant_score.filter`; scoring is constant anyway
    ConstantScore(Vec<Query>),
    Match(BTreeMap<String, MatchField>),
    MatchPhrase(BTreeMap<String, MatchField>),
    Term(TermQuery),
    Terms(TermsQuery),
    Range(BTreeMap<String, RangeQuery>),
    Exists(ExistsQuery),
    Wildcard(BTreeMap<String, WildcardQuery>),
    QueryString(QueryStringQuery),
    GeoBoundingBox(BTreeMap<String, GeoBounds>),
    MatchAll,
    MatchNone,
    /// An object holding several query keywords
    All(Vec<Query>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub filter: Vec<Query>,
    pub should: Vec<Query>,
    pub must_not: Vec<Query>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchField {
    pub query: Value,
    pub operator: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MatchOptions {
    query: Value,
    #[serde(default)]
    operator: Option<String>,
    #[serde(default)]
    fuzziness: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermQuery {
    pub field: String,
    pub value: Literal,
    pub case_insensitive: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct TermOptions {
    value: Value,
    #[serde(default)]
    case_insensitive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermsQuery {
    pub field: String,
    pub values: Vec<Literal>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RangeQuery {
    #[serde(default)]
    pub gt: Option<Value>,
    #[serde(default)]
    pub gte: Option<Value>,
    #[serde(default)]
    pub lt: Option<Value>,
    #[serde(default)]
    pub lte: Option<Value>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub time_zone: Option<String>,
    // Legacy syntax still produced by older clients
    #[serde(default)]
    pub from: Option<Value>,
    #[serde(default)]
    pub to: Option<Value>,
    #[serde(default)]
    pub include_lower: Option<bool>,
    #[serde(default)]
    pub include_upper: Option<bool>,
}

impl RangeQuery {
    /// Fold `from`/`to` into the comparison bounds
    fn normalize(mut self) -> Self {
        if self.gt.is_none() && self.gte.is_none() && self.lt.is_none() && self.lte.is_none() {
            if let Some(from) = self.from.take().filter(|v| !v.is_null()) {
                if self.include_lower == Some(false) {
                    self.gt = Some(from);
                } else {
                    self.gte = Some(from);
                }
            }
            if let Some(to) = self.to.take().filter(|v| !v.is_null()) {
                if self.include_upper == Some(false) {
                    self.lt = Some(to);
                } else {
                    self.lte = Some(to);
                }
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExistsQuery {
    pub field: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WildcardQuery {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub wildcard: Option<String>,
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default)]
    pub rewrite: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryStringQuery {
    pub query: String,
    #[serde(default)]
    pub default_field: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub default_operator: Option<String>,
}

/// A point given as `{lat, lon}`, `[lon, lat]` or `"lat,lon"`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum GeoPoint {
    Object { lat: f64, lon: f64 },
    Array([f64; 2]),
    Text(String),
}

impl GeoPoint {
    pub fn lat_lon(&self) -> Result<(f64, f64)> {
        match self {
            GeoPoint::Object { lat, lon } => Ok((*lat, *lon)),
            GeoPoint::Array([lon, lat]) => Ok((*lat, *lon)),
            GeoPoint::Text(text) => {
                let mut parts = text.split(',').map(|p| p.trim().parse::<f64>());
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(Ok(lat)), Some(Ok(lon)), None) => Ok((lat, lon)),
                    _ => Err(TranslateError::malformed(format!("invalid geo point {:?}", text))),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeoBounds {
    pub top_left: GeoPoint,
    pub bottom_right: GeoPoint,
}

impl GeoBounds {
    /// `lat <= top AND lon >= left AND lat >= bottom AND lon <= right`
    pub fn expression(&self, ctx: &QueryContext, field: &str) -> Result<Expr> {
        let base = FieldRef::resolve(ctx, field);
        let lat = || Expr::Field(base.child(LAT_EXT));
        let lon = || Expr::Field(base.child(LON_EXT));
        let (top, left) = self.top_left.lat_lon()?;
        let (bottom, right) = self.bottom_right.lat_lon()?;

        Ok(Expr::and_all([
            Expr::binary(BinaryOp::Le, lat(), Expr::lit(top)),
            Expr::binary(BinaryOp::Ge, lon(), Expr::lit(left)),
            Expr::binary(BinaryOp::Ge, lat(), Expr::lit(bottom)),
            Expr::binary(BinaryOp::Le, lon(), Expr::lit(right)),
        ])
        .unwrap_or_else(|| Expr::lit(true)))
    }
}

fn object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| TranslateError::malformed(format!("{} should be an object", what)))
}

/// A single query or an array of queries
fn query_list(value: &Value) -> Result<Vec<Query>> {
    match value {
        Value::Array(items) => items.iter().map(Query::from_value).collect(),
        other => Ok(vec![Query::from_value(other)?]),
    }
}

fn match_fields(value: &Value, what: &str) -> Result<BTreeMap<String, MatchField>> {
    let mut fields = BTreeMap::new();
    for (name, spec) in object(value, what)? {
        let field = match spec {
            Value::Object(_) => {
                let options: MatchOptions = serde_json::from_value(spec.clone())?;
                if options.fuzziness.is_some() {
                    tracing::warn!(field = %name, "fuzziness is accepted but not applied");
                }
                MatchField {
                    query: options.query,
                    operator: options.operator,
                }
            }
            scalar => MatchField {
                query: scalar.clone(),
                operator: None,
            },
        };
        fields.insert(name.clone(), field);
    }
    Ok(fields)
}

impl Query {
    /// Decode one query object
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = object(value, "query")?;
        let mut parts = Vec::with_capacity(map.len());
        for (key, body) in map {
            parts.push(Self::from_keyword(key, body)?);
        }
        match parts.len() {
            0 => Ok(Query::MatchAll),
            1 => Ok(parts.remove(0)),
            _ => Ok(Query::All(parts)),
        }
    }

    fn from_keyword(key: &str, body: &Value) -> Result<Self> {
        match key {
            "bool" => {
                let mut b = BoolQuery::default();
                for (clause, queries) in object(body, "bool")? {
                    match clause.as_str() {
                        "must" => b.must = query_list(queries)?,
                        "filter" => b.filter = query_list(queries)?,
                        "should" => b.should = query_list(queries)?,
                        "must_not" => b.must_not = query_list(queries)?,
                        "minimum_should_match" | "boost" | "_name" => {}
                        other => {
                            return Err(TranslateError::malformed(format!(
                                "unknown bool clause {:?}",
                                other
                            )))
                        }
                    }
                }
                Ok(Query::Bool(b))
            }
            "constant_score" => {
                let filter = object(body, "constant_score")?
                    .get("filter")
                    .map(query_list)
                    .transpose()?
                    .unwrap_or_default();
                Ok(Query::ConstantScore(filter))
            }
            "match" => Ok(Query::Match(match_fields(body, "match")?)),
            "match_phrase" => Ok(Query::MatchPhrase(match_fields(body, "match_phrase")?)),
            "term" => {
                let map = object(body, "term")?;
                if map.len() != 1 {
                    return Err(TranslateError::malformed("term supports only a single field"));
                }
                let Some((field, spec)) = map.iter().next() else {
                    return Err(TranslateError::malformed("term supports only a single field"));
                };
                let (value, case_insensitive) = match spec {
                    Value::Object(_) => {
                        let options: TermOptions = serde_json::from_value(spec.clone())?;
                        (Literal::from_json(&options.value)?, options.case_insensitive)
                    }
                    scalar => (Literal::from_json(scalar)?, false),
                };
                Ok(Query::Term(TermQuery {
                    field: field.clone(),
                    value,
                    case_insensitive,
                }))
            }
            "terms" => {
                let mut found = None;
                for (field, values) in object(body, "terms")? {
                    if field == "boost" {
                        continue;
                    }
                    let Value::Array(items) = values else {
                        return Err(TranslateError::malformed("field should contain an array of strings"));
                    };
                    if found.is_some() {
                        return Err(TranslateError::malformed("terms supports only a single field"));
                    }
                    if items.is_empty() {
                        return Err(TranslateError::malformed(format!("terms on {:?} without values", field)));
                    }
                    let values = items.iter().map(Literal::from_json).collect::<Result<Vec<_>>>()?;
                    found = Some(TermsQuery {
                        field: field.clone(),
                        values,
                    });
                }
                found
                    .map(Query::Terms)
                    .ok_or_else(|| TranslateError::malformed("terms without a field"))
            }
            "range" => {
                let mut ranges = BTreeMap::new();
                for (field, spec) in object(body, "range")? {
                    let range: RangeQuery = serde_json::from_value(spec.clone())?;
                    if range.time_zone.is_some() {
                        tracing::warn!(field = %field, "range time_zone is ignored");
                    }
                    ranges.insert(field.clone(), range.normalize());
                }
                Ok(Query::Range(ranges))
            }
            "exists" => Ok(Query::Exists(serde_json::from_value(body.clone())?)),
            "wildcard" => {
                let mut fields = BTreeMap::new();
                for (field, spec) in object(body, "wildcard")? {
                    let wc = match spec {
                        Value::String(pattern) => WildcardQuery {
                            value: Some(pattern.clone()),
                            ..Default::default()
                        },
                        other => serde_json::from_value(other.clone())?,
                    };
                    fields.insert(field.clone(), wc);
                }
                Ok(Query::Wildcard(fields))
            }
            "query_string" => Ok(Query::QueryString(serde_json::from_value(body.clone())?)),
            "geo_bounding_box" => {
                let mut boxes = BTreeMap::new();
                for (field, spec) in object(body, "geo_bounding_box")? {
                    if matches!(field.as_str(), "validation_method" | "type" | "ignore_unmapped" | "boost") {
                        continue;
                    }
                    boxes.insert(field.clone(), serde_json::from_value(spec.clone())?);
                }
                Ok(Query::GeoBoundingBox(boxes))
            }
            "match_all" => Ok(Query::MatchAll),
            "match_none" => Ok(Query::MatchNone),
            other if UNSUPPORTED.contains(&other) => Err(TranslateError::unsupported(other)),
            other => Err(TranslateError::unsupported(format!("query {:?}", other))),
        }
    }

    /// Predicate for the WHERE clause; `None` when the query does not
    /// restrict anything.
    pub fn expression(&self, ctx: &QueryContext) -> Result<Option<Expr>> {
        match self {
            Query::Bool(b) => b.expression(ctx),
            Query::ConstantScore(filter) => list_expression(ctx, filter, BinaryOp::And),
            Query::Match(fields) => {
                let mut exprs = Vec::with_capacity(fields.len());
                for (field, m) in fields {
                    exprs.push(match_expression(ctx, field, m, false)?);
                }
                Ok(Expr::and_all(exprs))
            }
            Query::MatchPhrase(fields) => {
                let mut exprs = Vec::with_capacity(fields.len());
                for (field, m) in fields {
                    exprs.push(match_expression(ctx, field, m, true)?);
                }
                Ok(Expr::and_all(exprs))
            }
            Query::Term(t) => t.expression(ctx).map(Some),
            Query::Terms(t) => {
                let field = FieldRef::resolve(ctx, &t.field);
                let mut values = Vec::with_capacity(t.values.len());
                let mut flags = Vec::new();
                for v in &t.values {
                    match v {
                        Literal::Bool(b) if !flags.contains(b) => flags.push(*b),
                        Literal::Bool(_) => {}
                        other => values.push(format_in(ctx, &field.key, other.clone())?),
                    }
                }

                let mut exprs = Vec::with_capacity(flags.len() + 1);
                if !values.is_empty() {
                    exprs.push(Expr::binary(
                        BinaryOp::In,
                        Expr::Field(field.clone()),
                        Expr::LiteralList(values),
                    ));
                }
                for flag in flags {
                    exprs.push(field_equals(ctx, field.clone(), Literal::Bool(flag))?);
                }
                Ok(Expr::join(BinaryOp::Or, exprs))
            }
            Query::Range(ranges) => {
                let mut exprs = Vec::new();
                for (field, range) in ranges {
                    exprs.extend(range_expressions(ctx, field, range)?);
                }
                Ok(Expr::and_all(exprs))
            }
            Query::Exists(e) => Ok(Some(Expr::unary(
                UnaryOp::IsNotMissing,
                Expr::Field(FieldRef::resolve(ctx, &e.field)),
            ))),
            Query::Wildcard(fields) => {
                let mut exprs = Vec::with_capacity(fields.len());
                for (field, wc) in fields {
                    exprs.push(wildcard_expression(ctx, field, wc)?);
                }
                Ok(Expr::and_all(exprs))
            }
            Query::QueryString(qs) => qs.expression(ctx),
            Query::GeoBoundingBox(boxes) => {
                let mut exprs = Vec::with_capacity(boxes.len());
                for (field, bounds) in boxes {
                    exprs.push(bounds.expression(ctx, field)?);
                }
                Ok(Expr::and_all(exprs))
            }
            Query::MatchAll => Ok(Some(Expr::lit(true))),
            Query::MatchNone => Ok(Some(Expr::lit(false))),
            Query::All(queries) => list_expression(ctx, queries, BinaryOp::And),
        }
    }
}

fn list_expression(ctx: &QueryContext, queries: &[Query], op: BinaryOp) -> Result<Option<Expr>> {
    let mut exprs = Vec::with_capacity(queries.len());
    for q in queries {
        if let Some(e) = q.expression(ctx)? {
            exprs.push(e);
        }
    }
    Ok(Expr::join(op, exprs))
}

impl BoolQuery {
    pub fn expression(&self, ctx: &QueryContext) -> Result<Option<Expr>> {
        let mut exprs = Vec::new();
        exprs.extend(list_expression(ctx, &self.must, BinaryOp::And)?);
        exprs.extend(list_expression(ctx, &self.filter, BinaryOp::And)?);
        exprs.extend(list_expression(ctx, &self.should, BinaryOp::Or)?);
        if let Some(e) = list_expression(ctx, &self.must_not, BinaryOp::And)? {
            exprs.push(Expr::not(e));
        }
        Ok(Expr::and_all(exprs))
    }
}

/// Booleans test the field itself; everything else compares with `=`
fn field_equals(ctx: &QueryContext, field: FieldRef, value: Literal) -> Result<Expr> {
    match value {
        Literal::Bool(true) => Ok(Expr::Field(field)),
        Literal::Bool(false) => Ok(Expr::not(Expr::Field(field))),
        other => {
            let value = format_in(ctx, &field.key, other)?;
            Ok(Expr::binary(BinaryOp::Eq, Expr::Field(field), Expr::Literal(value)))
        }
    }
}

impl TermQuery {
    pub fn expression(&self, ctx: &QueryContext) -> Result<Expr> {
        let field = FieldRef::resolve(ctx, &self.field);
        match &self.value {
            Literal::String(s)
                if self.case_insensitive || field.field_type(ctx) == MODE_KEYWORD_IGNORE_CASE =>
            {
                Ok(Expr::binary(
                    BinaryOp::Eq,
                    Expr::function("LOWER", vec![Expr::Field(field)]),
                    Expr::lit(s.to_lowercase().as_str()),
                ))
            }
            value => field_equals(ctx, field, value.clone()),
        }
    }
}

/// `match` splits its text into words joined by the operator (OR unless
/// `and`); `match_phrase` matches the text as one unit.
fn match_expression(ctx: &QueryContext, name: &str, m: &MatchField, phrase: bool) -> Result<Expr> {
    let field = FieldRef::resolve(ctx, name);
    let Value::String(text) = &m.query else {
        return field_equals(ctx, field, Literal::from_json(&m.query)?);
    };

    let words: Vec<&str> = if phrase {
        vec![text.as_str()]
    } else {
        text.split_whitespace().collect()
    };

    let op = match m.operator.as_deref() {
        Some(op) if op.eq_ignore_ascii_case("and") => BinaryOp::And,
        _ => BinaryOp::Or,
    };

    let mut exprs = Vec::with_capacity(words.len());
    for word in words {
        exprs.push(match text_match(ctx, &field, TextValue::Phrase(word)) {
            Some(e) => e,
            None => field_equals(ctx, field.clone(), Literal::String(word.to_string()))?,
        });
    }
    Ok(Expr::join(op, exprs).unwrap_or_else(|| Expr::lit(false)))
}

fn range_expressions(ctx: &QueryContext, name: &str, range: &RangeQuery) -> Result<Vec<Expr>> {
    let field = FieldRef::resolve(ctx, name);
    let bounds = [
        (BinaryOp::Ge, &range.gte),
        (BinaryOp::Gt, &range.gt),
        (BinaryOp::Le, &range.lte),
        (BinaryOp::Lt, &range.lt),
    ];

    let mut exprs = Vec::new();
    for (op, bound) in bounds {
        let Some(value) = bound.as_ref().filter(|v| !v.is_null()) else {
            continue;
        };
        let value = match Literal::from_json(value)? {
            Literal::Bool(flag) => {
                exprs.push(bool_bound(&field, op, flag));
                continue;
            }
            other => format_in(ctx, &field.key, other)?,
        };
        exprs.push(Expr::binary(op, Expr::Field(field.clone()), Expr::Literal(value)));
    }
    Ok(exprs)
}

/// A range bound on a boolean field, with `false < true`
fn bool_bound(field: &FieldRef, op: BinaryOp, flag: bool) -> Expr {
    let is_true = || Expr::Field(field.clone());
    let is_false = || Expr::not(Expr::Field(field.clone()));
    match (op, flag) {
        (BinaryOp::Ge, true) | (BinaryOp::Gt, false) => is_true(),
        (BinaryOp::Le, false) | (BinaryOp::Lt, true) => is_false(),
        (BinaryOp::Gt, true) | (BinaryOp::Lt, false) => Expr::lit(false),
        _ => Expr::lit(true),
    }
}

fn wildcard_expression(ctx: &QueryContext, name: &str, wc: &WildcardQuery) -> Result<Expr> {
    if let Some(rewrite) = wc.rewrite.as_deref().filter(|r| *r != "constant_score") {
        return Err(TranslateError::unsupported(format!("wildcard rewrite {:?}", rewrite)));
    }

    // JSON objects are unordered, so "last one wins" cannot be honored
    let pattern = match (&wc.value, &wc.wildcard) {
        (Some(v), Some(w)) if v != w => {
            return Err(TranslateError::unsupported("wildcard with conflicting value and wildcard"))
        }
        (Some(v), _) | (None, Some(v)) => v,
        (None, None) => return Err(TranslateError::unsupported("wildcard without a value")),
    };

    let op = if wc.case_insensitive {
        BinaryOp::ILike
    } else {
        BinaryOp::Like
    };
    Ok(Expr::binary(
        op,
        Expr::Field(FieldRef::resolve(ctx, name)),
        Expr::lit(translate_like(pattern).as_str()),
    ))
}

impl QueryStringQuery {
    pub fn expression(&self, ctx: &QueryContext) -> Result<Option<Expr>> {
        let default_op = self
            .default_operator
            .as_deref()
            .map(DefaultOperator::parse)
            .unwrap_or(DefaultOperator::Or);

        let fields: Vec<String> = match (&self.fields, &self.default_field) {
            (Some(fields), _) if !fields.is_empty() => fields.clone(),
            (_, Some(field)) if field != "*" => vec![field.clone()],
            _ => Vec::new(),
        };
        query_string::translate(ctx, &self.query, &fields, default_op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::TypeMapping;
    use crate::sql::print_expr;
    use serde_json::json;

    fn ctx() -> QueryContext {
        QueryContext::new("test")
            .with_mapping("timestamp", TypeMapping::new("datetime"))
            .with_mapping(
                "title",
                TypeMapping::new("text")
                    .with_field("keyword", "keyword")
                    .with_field("raw", "keyword-ignore-case"),
            )
    }

    fn sql(query: Value) -> String {
        let q = Query::from_value(&query).unwrap();
        print_expr(&q.expression(&ctx()).unwrap().unwrap())
    }

    #[test]
    fn test_term() {
        assert_eq!(
            sql(json!({"term": {"type": "t-shirt"}})),
            r#"("$source"."type" = 't-shirt')"#
        );
        assert_eq!(
            sql(json!({"term": {"type": {"value": "T-Shirt", "case_insensitive": true}}})),
            r#"(LOWER("$source"."type") = 't-shirt')"#
        );
    }

    #[test]
    fn test_boolean_term() {
        assert_eq!(sql(json!({"term": {"flag": true}})), r#""$source"."flag""#);
        assert_eq!(sql(json!({"term": {"flag": false}})), r#"(NOT "$source"."flag")"#);
    }

    #[test]
    fn test_term_single_field() {
        let err = Query::from_value(&json!({"term": {"a": 1, "b": 2}})).unwrap_err();
        assert!(err.to_string().contains("single field"));
    }

    #[test]
    fn test_terms() {
        assert_eq!(
            sql(json!({"terms": {"status": ["a", "b"], "boost": 1.0}})),
            r#"("$source"."status" IN ('a','b'))"#
        );
        let err = Query::from_value(&json!({"terms": {"status": "a"}})).unwrap_err();
        assert!(err.to_string().contains("array of strings"));
    }

    #[test]
    fn test_terms_booleans() {
        assert_eq!(sql(json!({"terms": {"flag": [true]}})), r#""$source"."flag""#);
        assert_eq!(sql(json!({"terms": {"flag": [false, false]}})), r#"(NOT "$source"."flag")"#);
        assert_eq!(
            sql(json!({"terms": {"flag": [true, false]}})),
            r#"("$source"."flag" OR (NOT "$source"."flag"))"#
        );
        assert_eq!(
            sql(json!({"terms": {"flag": [1, true]}})),
            r#"(("$source"."flag" IN (1)) OR "$source"."flag")"#
        );
    }

    #[test]
    fn test_terms_empty() {
        let err = Query::from_value(&json!({"terms": {"flag": []}})).unwrap_err();
        assert!(matches!(err, TranslateError::Malformed(_)));
    }

    #[test]
    fn test_range_booleans() {
        assert_eq!(sql(json!({"range": {"flag": {"gte": true}}})), r#""$source"."flag""#);
        assert_eq!(sql(json!({"range": {"flag": {"lt": true}}})), r#"(NOT "$source"."flag")"#);
        assert_eq!(sql(json!({"range": {"flag": {"gt": true}}})), "FALSE");
        assert_eq!(sql(json!({"range": {"flag": {"lte": true}}})), "TRUE");
    }

    #[test]
    fn test_bool() {
        let q = json!({"bool": {
            "must": {"term": {"a": 1}},
            "filter": [{"term": {"b": 2}}],
            "should": [{"term": {"c": 3}}, {"term": {"d": 4}}],
            "must_not": [{"exists": {"field": "e"}}]
        }});
        assert_eq!(
            sql(q),
            r#"(((("$source"."a" = 1) AND ("$source"."b" = 2)) AND (("$source"."c" = 3) OR ("$source"."d" = 4))) AND (NOT ("$source"."e" IS NOT MISSING)))"#
        );
    }

    #[test]
    fn test_empty_bool() {
        let q = Query::from_value(&json!({"bool": {}})).unwrap();
        assert_eq!(q.expression(&ctx()).unwrap(), None);
    }

    #[test]
    fn test_range() {
        assert_eq!(
            sql(json!({"range": {"timestamp": {"gte": "2022-06-01T00:00:00Z", "lt": "2022-06-02T00:00:00Z"}}})),
            r#"(("$source"."timestamp" >= `2022-06-01T00:00:00Z`) AND ("$source"."timestamp" < `2022-06-02T00:00:00Z`))"#
        );
        assert_eq!(
            sql(json!({"range": {"n": {"from": 1, "to": 5, "include_upper": false}}})),
            r#"(("$source"."n" >= 1) AND ("$source"."n" < 5))"#
        );
    }

    #[test]
    fn test_match() {
        assert_eq!(
            sql(json!({"match": {"title.keyword": "Hello"}})),
            r#"("$source"."title" = 'Hello')"#
        );
        assert_eq!(
            sql(json!({"match": {"msg": {"query": "a b", "operator": "and"}}})),
            r#"(("$source"."msg" ~ '(^|[ \t])(?i)a([ \t]|$)') AND ("$source"."msg" ~ '(^|[ \t])(?i)b([ \t]|$)'))"#
        );
        assert_eq!(
            sql(json!({"match_phrase": {"msg": "a.b c"}})),
            r#"("$source"."msg" ~ '(^|[ \t])(?i)a\.b c([ \t]|$)')"#
        );
    }

    #[test]
    fn test_wildcard() {
        assert_eq!(
            sql(json!({"wildcard": {"user": {"value": "ki*y", "rewrite": "constant_score"}}})),
            r#"("$source"."user" LIKE 'ki%y')"#
        );
        assert_eq!(
            sql(json!({"wildcard": {"user": {"wildcard": "k?", "case_insensitive": true}}})),
            r#"("$source"."user" ILIKE 'k_')"#
        );

        let conflicting = Query::from_value(&json!({"wildcard": {"user": {"value": "a*", "wildcard": "b*"}}})).unwrap();
        assert!(matches!(
            conflicting.expression(&ctx()),
            Err(TranslateError::Unsupported(_))
        ));

        let rewrite = Query::from_value(&json!({"wildcard": {"user": {"value": "a*", "rewrite": "scoring_boolean"}}})).unwrap();
        assert!(matches!(rewrite.expression(&ctx()), Err(TranslateError::Unsupported(_))));
    }

    #[test]
    fn test_geo_bounding_box() {
        assert_eq!(
            sql(json!({"geo_bounding_box": {"pin": {
                "top_left": {"lat": 40.73, "lon": -74.1},
                "bottom_right": [-71.12, 40.01]
            }}})),
            r#"(((("$source"."pin"."lat" <= 40.73) AND ("$source"."pin"."lon" >= -74.1)) AND ("$source"."pin"."lat" >= 40.01)) AND ("$source"."pin"."lon" <= -71.12))"#
        );
    }

    #[test]
    fn test_query_string_fields() {
        assert_eq!(
            sql(json!({"query_string": {"query": "foo", "fields": ["a", "b"]}})),
            r#"(("$source"."a" ~ '(^|[ \t])(?i)foo([ \t]|$)') OR ("$source"."b" ~ '(^|[ \t])(?i)foo([ \t]|$)'))"#
        );
        assert_eq!(
            sql(json!({"query_string": {"query": "*", "analyze_wildcard": true}})),
            "TRUE"
        );
    }

    #[test]
    fn test_match_all_none_and_multiple_keys() {
        assert_eq!(sql(json!({"match_all": {}})), "TRUE");
        assert_eq!(sql(json!({"match_none": {}})), "FALSE");
        assert_eq!(
            sql(json!({"exists": {"field": "a"}, "term": {"b": "x"}})),
            r#"(("$source"."a" IS NOT MISSING) AND ("$source"."b" = 'x'))"#
        );
    }

    #[test]
    fn test_unsupported() {
        for keyword in ["fuzzy", "nested", "script", "span_term", "prefix"] {
            let err = Query::from_value(&json!({ keyword: {} })).unwrap_err();
            assert_eq!(err.to_string(), format!("unsupported element: {}", keyword));
        }
        assert!(matches!(
            Query::from_value(&json!({"made_up": {}})),
            Err(TranslateError::Unsupported(_))
        ));
    }
}
