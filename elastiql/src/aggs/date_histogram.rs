//! `date_histogram` over fixed or calendar intervals

use chrono::{DateTime, TimeZone, Utc};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::digit1,
    combinator::{all_consuming, map_res},
    sequence::pair,
    IResult,
};
use serde::Deserialize;
use serde_json::Value;

use super::generate::GenerateContext;
use super::process::{GroupResults, ProcessContext};
use super::result::{AggResult, KeyedBucket, MultiBuckets};
use super::terms::{single_key, TermsOrder};
use super::{AggregationKind, BucketAgg, BucketAggregation};
use crate::context::QueryContext;
use crate::date_math::parse_date_math;
use crate::datum::Datum;
use crate::error::{Result, TranslateError};
use crate::literal::Literal;
use crate::mapping::FieldRef;
use crate::naming::DOC_COUNT;
use crate::sql::{BinaryOp, Expr, Order, Select};

/// Calendar-aware interval units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl CalendarUnit {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(match text {
            "minute" | "1m" => CalendarUnit::Minute,
            "hour" | "1h" => CalendarUnit::Hour,
            "day" | "1d" => CalendarUnit::Day,
            "week" | "1w" => CalendarUnit::Week,
            "month" | "1M" => CalendarUnit::Month,
            "quarter" | "1q" => CalendarUnit::Quarter,
            "year" | "1y" => CalendarUnit::Year,
            _ => return Err(TranslateError::malformed(format!("invalid calendar interval {:?}", text))),
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CalendarUnit::Minute => "m",
            CalendarUnit::Hour => "h",
            CalendarUnit::Day => "d",
            CalendarUnit::Week => "w",
            CalendarUnit::Month => "M",
            CalendarUnit::Quarter => "q",
            CalendarUnit::Year => "y",
        }
    }

    fn sql_unit(self) -> &'static str {
        match self {
            CalendarUnit::Minute => "MINUTE",
            CalendarUnit::Hour => "HOUR",
            CalendarUnit::Day => "DAY",
            CalendarUnit::Week => "WEEK(SUNDAY)",
            CalendarUnit::Month => "MONTH",
            CalendarUnit::Quarter => "QUARTER",
            CalendarUnit::Year => "YEAR",
        }
    }

    /// Length in milliseconds, for units of constant length
    fn fixed_millis(self) -> Option<i64> {
        match self {
            CalendarUnit::Minute => Some(60_000),
            CalendarUnit::Hour => Some(3_600_000),
            CalendarUnit::Day => Some(86_400_000),
            CalendarUnit::Week | CalendarUnit::Month | CalendarUnit::Quarter | CalendarUnit::Year => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    /// Whole seconds
    Fixed(i64),
    Calendar(CalendarUnit),
}

fn fixed_parts(input: &str) -> IResult<&str, (i64, &str)> {
    all_consuming(pair(
        map_res(digit1, str::parse),
        alt((tag("ms"), tag("s"), tag("m"), tag("h"), tag("d"))),
    ))(input)
}

/// Parse a fixed interval such as `30s` or `12h` into seconds
pub fn parse_fixed_interval(text: &str) -> Result<i64> {
    let invalid = || TranslateError::malformed(format!("invalid fixed interval {:?}", text));
    let (_, (n, unit)) = fixed_parts(text).map_err(|_| invalid())?;
    let millis = match unit {
        "ms" => Some(n),
        "s" => n.checked_mul(1_000),
        "m" => n.checked_mul(60_000),
        "h" => n.checked_mul(3_600_000),
        _ => n.checked_mul(86_400_000),
    }
    .ok_or_else(invalid)?;
    if millis <= 0 || millis % 1_000 != 0 {
        return Err(invalid());
    }
    Ok(millis / 1_000)
}

impl Interval {
    fn step_millis(self) -> Result<i64> {
        match self {
            Interval::Fixed(secs) => Ok(secs * 1_000),
            Interval::Calendar(unit) => unit.fixed_millis().ok_or_else(|| {
                TranslateError::unsupported(format!("extended bounds with calendar interval {:?}", unit.as_str()))
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DateBounds {
    #[serde(default)]
    pub min: Option<Value>,
    #[serde(default)]
    pub max: Option<Value>,
}

/// Bound given as epoch milliseconds or as a date (math) string
fn bound_millis(ctx: &QueryContext, value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| TranslateError::malformed(format!("invalid date bound {}", n))),
        Value::String(text) => match DateTime::parse_from_rfc3339(text) {
            Ok(ts) => Ok(ts.timestamp_millis()),
            Err(_) => Ok(parse_date_math(text, ctx.now())?.timestamp_millis()),
        },
        other => Err(TranslateError::malformed(format!("invalid date bound {}", other))),
    }
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| TranslateError::malformed(format!("timestamp {} out of range", ms)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateHistogram {
    pub field: String,
    pub interval: Interval,
    pub format: Option<String>,
    pub order: TermsOrder,
    pub hard_bounds: Option<DateBounds>,
    pub extended_bounds: Option<DateBounds>,
}

#[derive(Deserialize)]
struct DateHistogramOptions {
    field: String,
    #[serde(default)]
    interval: Option<String>,
    #[serde(default)]
    fixed_interval: Option<String>,
    #[serde(default)]
    calendar_interval: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    keyed: bool,
    #[serde(default)]
    hard_bounds: Option<DateBounds>,
    #[serde(default)]
    extended_bounds: Option<DateBounds>,
    #[serde(default)]
    order: Option<Value>,
}

impl DateHistogram {
    pub(super) fn parse(body: &Value) -> Result<Self> {
        let options: DateHistogramOptions = super::options("date_histogram", body)?;
        if options.keyed {
            return Err(TranslateError::unsupported("keyed date_histogram aggregation"));
        }
        if let Some(map) = body.as_object() {
            for key in ["time_zone", "offset", "missing", "min_doc_count"] {
                if map.contains_key(key) {
                    tracing::warn!(option = key, "date_histogram option is accepted but not applied");
                }
            }
        }

        let interval = match (&options.fixed_interval, &options.calendar_interval, &options.interval) {
            (Some(_), Some(_), _) => {
                return Err(TranslateError::malformed(
                    "fixed_interval and calendar_interval are mutually exclusive",
                ))
            }
            (Some(fixed), None, _) => Interval::Fixed(parse_fixed_interval(fixed)?),
            (None, Some(calendar), _) => Interval::Calendar(CalendarUnit::parse(calendar)?),
            (None, None, Some(legacy)) => match CalendarUnit::parse(legacy) {
                Ok(unit) if parse_fixed_interval(legacy).is_err() => Interval::Calendar(unit),
                _ => Interval::Fixed(parse_fixed_interval(legacy)?),
            },
            (None, None, None) => {
                return Err(TranslateError::malformed("required either calendar or fixed interval"))
            }
        };

        Ok(Self {
            field: options.field,
            interval,
            format: options.format,
            order: options.order.as_ref().map(TermsOrder::parse).transpose()?.unwrap_or_default(),
            hard_bounds: options.hard_bounds,
            extended_bounds: options.extended_bounds,
        })
    }

    fn key_expr(&self, ctx: &QueryContext) -> Expr {
        let field = Expr::Field(FieldRef::resolve(ctx, &self.field));
        match self.interval {
            Interval::Fixed(secs) => Expr::function("TIME_BUCKET", vec![field, Expr::lit(secs)]),
            Interval::Calendar(unit) => {
                Expr::function("DATE_TRUNC", vec![Expr::Text(unit.sql_unit().to_string()), field])
            }
        }
    }

    /// Literal comparable with the bucket key
    fn key_literal(&self, ms: i64) -> Result<Expr> {
        Ok(match self.interval {
            Interval::Fixed(_) => Expr::lit(ms.div_euclid(1_000)),
            Interval::Calendar(_) => Expr::Literal(Literal::Timestamp(timestamp(ms)?)),
        })
    }

    fn key_millis(&self, c: &ProcessContext<'_>, key: &Datum) -> Result<i64> {
        let millis = match self.interval {
            // TIME_BUCKET yields epoch seconds
            Interval::Fixed(_) => key.as_i64().map(|secs| secs * 1_000),
            Interval::Calendar(_) => key.as_timestamp().map(|ts| ts.timestamp_millis()),
        };
        millis.ok_or_else(|| TranslateError::shape(c.name, format!("unexpected date_histogram key {}", key.to_json())))
    }

    fn bucket(&self, c: &ProcessContext<'_>, ms: i64, doc_count: i64, group: Option<&GroupResults>) -> Result<KeyedBucket> {
        let sub_aggs = c.sub_result(group, doc_count)?;
        Ok(KeyedBucket::new(
            c.ctx,
            &Datum::Timestamp(timestamp(ms)?),
            Some(&self.field),
            self.format.as_deref(),
            doc_count,
            sub_aggs,
        ))
    }
}

impl BucketAggregation for DateHistogram {
    fn transform(&self, mut c: GenerateContext<'_>) -> Result<Vec<(String, Select)>> {
        let ctx = c.ctx();
        let key = self.key_expr(ctx);

        if let Some(bounds) = &self.hard_bounds {
            if let Some(min) = &bounds.min {
                let min = self.key_literal(bound_millis(ctx, min)?)?;
                c.and_query(Some(Expr::binary(BinaryOp::Ge, key.clone(), min)));
            }
            if let Some(max) = &bounds.max {
                let max = self.key_literal(bound_millis(ctx, max)?)?;
                c.and_query(Some(Expr::binary(BinaryOp::Le, key.clone(), max)));
            }
        }

        c.add_group_expr(key.clone());
        if self.order.is_empty() {
            c.add_ordering(key.clone(), Order::Asc);
        } else {
            self.order.apply(&mut c, std::slice::from_ref(&key));
        }
        c.add_doc_count(false);

        // plain `filter` children become filtered counts of this select
        for (name, agg) in c.aggs() {
            let AggregationKind::Bucket(BucketAgg::Filter(filter)) = &agg.kind else {
                continue;
            };
            if !agg.aggs.is_empty() {
                continue;
            }
            let count = Expr::Function {
                name: "COUNT".to_string(),
                args: vec![Expr::star()],
                filter: filter.query.expression(ctx)?.map(Box::new),
            };
            c.add_projection(format!("{}:{}", name, DOC_COUNT), count);
            c.skip(name);
        }

        c.transform()
    }

    fn process(&self, c: &ProcessContext<'_>) -> Result<AggResult> {
        let hard_bounds = match &self.hard_bounds {
            Some(bounds) => Some((
                bounds.min.as_ref().map(|v| bound_millis(c.ctx, v)).transpose()?,
                bounds.max.as_ref().map(|v| bound_millis(c.ctx, v)).transpose()?,
            )),
            None => None,
        };

        let mut buckets: Vec<(i64, KeyedBucket)> = Vec::new();
        if let Some(groups) = c.groups() {
            for group in &groups.groups {
                let ms = self.key_millis(c, single_key(c, group, "date_histogram")?)?;
                if let Some((min, max)) = hard_bounds {
                    if min.is_some_and(|min| ms < min) || max.is_some_and(|max| ms > max) {
                        continue;
                    }
                }
                let doc_count = group.doc_count(c.name)?;
                buckets.push((ms, self.bucket(c, ms, doc_count, Some(group))?));
            }
        }

        if let Some(DateBounds {
            min: Some(min),
            max: Some(max),
        }) = &self.extended_bounds
        {
            let step = self.interval.step_millis()?;
            let min = bound_millis(c.ctx, min)?;
            let max = bound_millis(c.ctx, max)?;

            let mut ms = min - min.rem_euclid(step);
            while ms <= max {
                if !buckets.iter().any(|(key, _)| *key == ms) {
                    buckets.push((ms, self.bucket(c, ms, 0, None)?));
                }
                ms += step;
            }
            buckets.sort_by_key(|(key, _)| *key);
        }

        Ok(AggResult::Multi(MultiBuckets {
            buckets: buckets.into_iter().map(|(_, bucket)| bucket).collect(),
            ..Default::default()
        }))
    }
}
