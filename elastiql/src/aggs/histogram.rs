//! Fixed-width numeric `histogram`

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::Value;

use super::generate::GenerateContext;
use super::process::ProcessContext;
use super::result::{AggResult, KeyedBucket, MultiBuckets};
use super::terms::{single_key, sum_other_doc_count, TermsOrder};
use super::BucketAggregation;
use crate::datum::Datum;
use crate::error::{Result, TranslateError};
use crate::mapping::FieldRef;
use crate::sql::{BinaryOp, Expr, Order, Select};

/// Upper bound on the number of bins handed to `WIDTH_BUCKET`
const BUCKETS: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct HardBounds {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl HardBounds {
    fn contains(&self, key: f64) -> bool {
        self.min.map_or(true, |min| key >= min) && self.max.map_or(true, |max| key <= max)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Histogram {
    pub field: String,
    pub interval: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default)]
    pub keyed: bool,
    #[serde(default)]
    pub extended_bounds: Option<Bounds>,
    #[serde(default)]
    pub hard_bounds: Option<HardBounds>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default, deserialize_with = "deserialize_order")]
    pub order: TermsOrder,
    #[serde(default)]
    pub min_doc_count: Option<i64>,
    #[serde(default)]
    pub missing: Option<Value>,
}

fn deserialize_order<'de, D>(deserializer: D) -> std::result::Result<TermsOrder, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    TermsOrder::parse(&value).map_err(serde::de::Error::custom)
}

impl Histogram {
    /// `interval * WIDTH_BUCKET(field + interval/2, offset, offset + n*interval, n) - interval`
    fn key_expr(&self, c: &GenerateContext<'_>) -> Expr {
        let field = Expr::Field(FieldRef::resolve(c.ctx(), &self.field));
        let width_bucket = Expr::function(
            "WIDTH_BUCKET",
            vec![
                Expr::binary(BinaryOp::Add, field, Expr::lit(self.interval / 2.0)),
                Expr::lit(self.offset),
                Expr::lit(self.offset + BUCKETS * self.interval),
                Expr::lit(BUCKETS),
            ],
        );
        Expr::binary(
            BinaryOp::Sub,
            Expr::binary(BinaryOp::Mul, Expr::lit(self.interval), width_bucket),
            Expr::lit(self.interval),
        )
    }

    /// Multiple of `interval` that `key_expr` yields for `value`
    fn key_index(&self, value: f64) -> i64 {
        ((value + self.interval / 2.0 - self.offset) / self.interval).floor() as i64
    }

    fn validate(&self) -> Result<()> {
        if self.interval.is_nan() || self.interval <= 0.0 {
            return Err(TranslateError::malformed("invalid interval"));
        }
        if self.offset < 0.0 || self.offset >= self.interval {
            return Err(TranslateError::malformed("invalid offset"));
        }
        if self.keyed {
            return Err(TranslateError::unsupported("keyed histogram aggregation"));
        }
        if self.missing.is_some() || self.min_doc_count.is_some() {
            tracing::warn!(field = %self.field, "histogram missing/min_doc_count are accepted but not applied");
        }
        Ok(())
    }

    fn bucket(&self, c: &ProcessContext<'_>, key: f64, doc_count: i64, group: Option<&super::GroupResults>) -> Result<KeyedBucket> {
        let sub_aggs = c.sub_result(group, doc_count)?;
        Ok(KeyedBucket::new(
            c.ctx,
            &Datum::Float(key),
            Some(&self.field),
            self.format.as_deref(),
            doc_count,
            sub_aggs,
        ))
    }
}

impl BucketAggregation for Histogram {
    fn transform(&self, mut c: GenerateContext<'_>) -> Result<Vec<(String, Select)>> {
        self.validate()?;
        let key = self.key_expr(&c);

        c.add_group_expr(key.clone());
        if self.order.is_empty() {
            c.add_ordering(key.clone(), Order::Asc);
        } else {
            self.order.apply(&mut c, std::slice::from_ref(&key));
        }
        c.add_doc_count(false);

        if let Some(bounds) = &self.hard_bounds {
            if let Some(min) = bounds.min {
                c.and_query(Some(Expr::binary(BinaryOp::Ge, key.clone(), Expr::lit(min))));
            }
            if let Some(max) = bounds.max {
                c.and_query(Some(Expr::binary(BinaryOp::Le, key.clone(), Expr::lit(max))));
            }
        }
        c.transform()
    }

    fn process(&self, c: &ProcessContext<'_>) -> Result<AggResult> {
        let mut buckets = Vec::new();
        let mut total = 0;

        if let Some(groups) = c.groups() {
            for group in &groups.groups {
                let key = single_key(c, group, "histogram")?;
                let key = key
                    .as_f64()
                    .ok_or_else(|| TranslateError::shape(c.name, format!("invalid histogram key {}", key.to_json())))?;
                if self.hard_bounds.is_some_and(|b| !b.contains(key)) {
                    continue;
                }
                let doc_count = group.doc_count(c.name)?;
                buckets.push(self.bucket(c, key, doc_count, Some(group))?);
                total += doc_count;
            }
        }

        if let Some(bounds) = self.extended_bounds {
            let first = self.key_index(bounds.min);
            let last = self.key_index(bounds.max);
            if last.saturating_sub(first) >= BUCKETS as i64 {
                return Err(TranslateError::malformed(format!(
                    "extended_bounds of {:?} span more than {} buckets",
                    c.name, BUCKETS
                )));
            }
            let present: BTreeSet<i64> = buckets
                .iter()
                .filter_map(|b| b.key.as_f64())
                .map(|k| (k / self.interval).round() as i64)
                .collect();
            for index in first..=last {
                if !present.contains(&index) {
                    buckets.push(self.bucket(c, index as f64 * self.interval, 0, None)?);
                }
            }
            buckets.sort_by(|a, b| {
                let a = a.key.as_f64().unwrap_or_default();
                let b = b.key.as_f64().unwrap_or_default();
                a.total_cmp(&b)
            });
        }

        Ok(AggResult::Multi(MultiBuckets {
            buckets,
            sum_other_doc_count: sum_other_doc_count(c, total),
            doc_count_error_upper_bound: None,
            meta: None,
        }))
    }
}
