//! Value conversion between request/response formats and storage types

use chrono::{DateTime, TimeZone, Timelike, Utc};

use super::type_of;
use crate::context::QueryContext;
use crate::date_math::parse_date_math;
use crate::datum::Datum;
use crate::error::{Result, TranslateError};
use crate::literal::Literal;

/// Convert a request literal into the representation stored for `key`
pub fn format_in(ctx: &QueryContext, key: &str, value: Literal) -> Result<Literal> {
    let Some(format) = type_of(key, &ctx.type_mapping) else {
        return Ok(value);
    };

    match format {
        "datetime" => match value {
            Literal::String(text) => {
                if let Ok(ts) = DateTime::parse_from_rfc3339(&text) {
                    return Ok(Literal::Timestamp(ts.with_timezone(&Utc)));
                }
                parse_date_math(&text, ctx.now())
                    .map(Literal::Timestamp)
                    .map_err(|_| {
                        TranslateError::malformed(format!("invalid datetime {:?} for {:?}", text, key))
                    })
            }
            other => Ok(other),
        },
        "unix_seconds" => epoch_in(key, format, value, 1_000_000_000),
        "unix_milli_seconds" => epoch_in(key, format, value, 1_000_000),
        "unix_micro_seconds" => epoch_in(key, format, value, 1_000),
        "unix_nano_seconds" => {
            let value = match value {
                Literal::Float(f) if f.is_finite() => Literal::Int(f as i64),
                other => other,
            };
            epoch_in(key, format, value, 1)
        }
        _ => Ok(value),
    }
}

fn epoch_in(key: &str, format: &str, value: Literal, nanos_per_unit: i64) -> Result<Literal> {
    let n = match value {
        Literal::Timestamp(_) => return Ok(value),
        Literal::Int(i) => i,
        Literal::String(ref s) => s.trim().parse::<i64>().map_err(|_| {
            TranslateError::malformed(format!("invalid {} {:?} for {:?}", format, s, key))
        })?,
        other => {
            return Err(TranslateError::malformed(format!(
                "invalid source-type for {}: {}",
                format, other
            )))
        }
    };

    let nanos = n.saturating_mul(nanos_per_unit);
    // storage keeps microsecond precision
    let nanos = (nanos / 1_000) * 1_000;
    Ok(Literal::Timestamp(Utc.timestamp_nanos(nanos)))
}

/// Render a stored value using the output format declared for `key`
pub fn format_out(ctx: &QueryContext, key: &str, value: Datum) -> Datum {
    match type_of(key, &ctx.type_mapping) {
        Some(format) => format_out_raw(value, format),
        None if matches!(value, Datum::Timestamp(_)) => format_out_raw(value, "datetime"),
        None => value,
    }
}

/// Render a value using a named (Elasticsearch or storage) format
pub fn format_out_raw(value: Datum, format: &str) -> Datum {
    if format.is_empty() {
        return value;
    }

    match value {
        Datum::List(items) => Datum::List(
            items
                .into_iter()
                .map(|item| format_out_raw(item, format))
                .collect(),
        ),
        Datum::Timestamp(ts) => format_timestamp(&ts, format),
        Datum::Int(ms) if is_date_format(format) => match Utc.timestamp_millis_opt(ms).single() {
            Some(ts) => format_timestamp(&ts, format),
            None => Datum::Int(ms),
        },
        other => other,
    }
}

const DATE_FORMATS: &[&str] = &[
    "basic_date",
    "basic_date_time",
    "basic_date_time_no_millis",
    "basic_time",
    "basic_time_no_millis",
    "basic_t_time",
    "basic_t_time_no_millis",
    "date",
    "strict_date",
    "date_hour",
    "strict_date_hour",
    "date_hour_minute",
    "strict_date_hour_minute",
    "date_hour_minute_second",
    "strict_date_hour_minute_second",
    "date_hour_minute_second_fraction",
    "strict_date_hour_minute_second_fraction",
    "date_hour_minute_second_millis",
    "strict_date_hour_minute_second_millis",
    "date_time",
    "strict_date_time",
    "date_time_no_millis",
    "strict_date_time_no_millis",
    "datetime",
    "epoch_second",
    "epoch_millis",
    "unix_seconds",
    "unix_milli_seconds",
    "unix_micro_seconds",
    "unix_nano_seconds",
];

pub fn is_date_format(format: &str) -> bool {
    DATE_FORMATS.contains(&format)
}

fn format_timestamp(ts: &DateTime<Utc>, format: &str) -> Datum {
    let text = |pattern: &str| Datum::String(ts.format(pattern).to_string());
    let with_frac = |pattern: &str, digits: usize, suffix: &str| {
        Datum::String(format!("{}{}{}", ts.format(pattern), fraction(ts, digits), suffix))
    };

    match format {
        "basic_date" => text("%Y%m%d"),
        "basic_date_time" => with_frac("%Y%m%dT%H:%M:%S", 3, "Z"),
        "basic_date_time_no_millis" => text("%Y%m%dT%H:%M:%SZ"),
        "basic_time" => with_frac("%H:%M:%S", 3, "Z"),
        "basic_time_no_millis" => text("%H:%M:%SZ"),
        "basic_t_time" => with_frac("T%H:%M:%S", 3, "Z"),
        "basic_t_time_no_millis" => text("T%H:%M:%SZ"),
        "date" | "strict_date" => text("%Y-%m-%d"),
        "date_hour" | "strict_date_hour" => text("%Y-%m-%dT%H"),
        "date_hour_minute" | "strict_date_hour_minute" => text("%Y-%m-%dT%H:%M"),
        "date_hour_minute_second" | "strict_date_hour_minute_second" => text("%Y-%m-%dT%H:%M:%S"),
        "date_hour_minute_second_fraction"
        | "strict_date_hour_minute_second_fraction"
        | "date_hour_minute_second_millis"
        | "strict_date_hour_minute_second_millis" => with_frac("%Y-%m-%dT%H:%M:%S", 3, ""),
        "date_time" | "strict_date_time" => with_frac("%Y-%m-%dT%H:%M:%S", 3, "Z"),
        "date_time_no_millis" | "strict_date_time_no_millis" => text("%Y-%m-%dT%H:%M:%SZ"),
        "datetime" => {
            let frac = fraction(ts, 9);
            let frac = if frac.is_empty() { ".000".to_string() } else { frac };
            Datum::String(format!("{}{}Z", ts.format("%Y-%m-%dT%H:%M:%S"), frac))
        }
        "epoch_second" | "unix_seconds" => Datum::Int(ts.timestamp()),
        "epoch_millis" | "unix_milli_seconds" => Datum::Int(ts.timestamp_millis()),
        "unix_micro_seconds" => Datum::Int(ts.timestamp_micros()),
        "unix_nano_seconds" => ts
            .timestamp_nanos_opt()
            .map(Datum::Int)
            .unwrap_or(Datum::Null),
        _ => with_frac("%Y-%m-%dT%H:%M:%S", 9, "Z"),
    }
}

/// Fractional seconds with at most `digits` digits, trailing zeros trimmed.
/// Empty when the fraction is zero.
fn fraction(ts: &DateTime<Utc>, digits: usize) -> String {
    let nanos = format!("{:09}", ts.nanosecond() % 1_000_000_000);
    let frac = nanos[..digits.min(9)].trim_end_matches('0');
    if frac.is_empty() {
        String::new()
    } else {
        format!(".{}", frac)
    }
}
