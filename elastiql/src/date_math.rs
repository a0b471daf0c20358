//! Elasticsearch date math (`now-1d/d`, `2022-01-01||+1M/M`)

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while_m_n},
    character::complete::{char, digit0, digit1, one_of},
    combinator::{all_consuming, map, map_res, opt, value},
    multi::many0,
    sequence::{pair, preceded, tuple},
    IResult,
};

use crate::error::{Result, TranslateError};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Add(i64, char),
    Round(char),
}

#[derive(Debug, Clone, PartialEq)]
enum Anchor {
    Now,
    Date(NaiveDate, NaiveTime),
}

fn number(input: &str) -> IResult<&str, u32> {
    map_res(take_while_m_n(1, 2, |c: char| c.is_ascii_digit()), str::parse)(input)
}

fn date_sep(input: &str) -> IResult<&str, char> {
    one_of("-.")(input)
}

fn time_part(input: &str) -> IResult<&str, NaiveTime> {
    let (input, hour) = number(input)?;
    let (input, minute) = opt(preceded(char(':'), number))(input)?;
    let (input, second) = opt(preceded(char(':'), number))(input)?;
    let (input, frac) = opt(preceded(char('.'), digit1))(input)?;

    let nanos = frac
        .map(|f: &str| {
            let digits: String = f.chars().take(9).collect();
            format!("{:0<9}", digits).parse::<u32>().unwrap_or(0)
        })
        .unwrap_or(0);

    match NaiveTime::from_hms_nano_opt(hour, minute.unwrap_or(0), second.unwrap_or(0), nanos) {
        Some(t) => Ok((input, t)),
        None => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        ))),
    }
}

fn date_anchor(input: &str) -> IResult<&str, Anchor> {
    let (input, (year, _, month, _, day)) = tuple((
        map_res(take_while_m_n(4, 4, |c: char| c.is_ascii_digit()), str::parse::<i32>),
        date_sep,
        number,
        date_sep,
        number,
    ))(input)?;
    let (input, time) = opt(preceded(one_of("T "), time_part))(input)?;
    let (input, _) = tag("||")(input)?;

    match NaiveDate::from_ymd_opt(year, month, day) {
        Some(date) => Ok((input, Anchor::Date(date, time.unwrap_or(NaiveTime::MIN)))),
        None => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        ))),
    }
}

fn anchor(input: &str) -> IResult<&str, Anchor> {
    alt((value(Anchor::Now, tag("now")), date_anchor))(input)
}

fn unit(input: &str) -> IResult<&str, char> {
    one_of("yMwdhHms")(input)
}

fn adjust_op(input: &str) -> IResult<&str, Op> {
    map(
        tuple((one_of("+-"), digit0, unit)),
        |(sign, digits, unit): (char, &str, char)| {
            let n = if digits.is_empty() {
                1
            } else {
                digits.parse::<i64>().unwrap_or(1)
            };
            Op::Add(if sign == '-' { -n } else { n }, unit)
        },
    )(input)
}

fn round_op(input: &str) -> IResult<&str, Op> {
    map(preceded(char('/'), unit), Op::Round)(input)
}

fn expression(input: &str) -> IResult<&str, (Anchor, Vec<Op>)> {
    all_consuming(pair(anchor, many0(alt((adjust_op, round_op)))))(input)
}

fn adjust(t: DateTime<Utc>, n: i64, unit: char) -> Option<DateTime<Utc>> {
    let months = |count: i64| {
        let m = Months::new(count.unsigned_abs() as u32);
        if count >= 0 {
            t.checked_add_months(m)
        } else {
            t.checked_sub_months(m)
        }
    };
    match unit {
        'y' => months(n * 12),
        'M' => months(n),
        'w' => t.checked_add_signed(Duration::days(7 * n)),
        'd' => t.checked_add_signed(Duration::days(n)),
        'h' | 'H' => t.checked_add_signed(Duration::hours(n)),
        'm' => t.checked_add_signed(Duration::minutes(n)),
        's' => t.checked_add_signed(Duration::seconds(n)),
        _ => None,
    }
}

fn round(t: DateTime<Utc>, unit: char) -> Option<DateTime<Utc>> {
    let d = t.date_naive();
    let at = |date: Option<NaiveDate>, h: u32, m: u32, s: u32| {
        date.and_then(|date| date.and_hms_opt(h, m, s))
            .map(|naive| Utc.from_utc_datetime(&naive))
    };
    let time = t.time();
    match unit {
        'y' => at(NaiveDate::from_ymd_opt(d.year(), 1, 1), 0, 0, 0),
        'M' => at(NaiveDate::from_ymd_opt(d.year(), d.month(), 1), 0, 0, 0),
        // weeks start on sunday
        'w' => at(
            d.checked_sub_signed(Duration::days(d.weekday().num_days_from_sunday() as i64)),
            0,
            0,
            0,
        ),
        'd' => at(Some(d), 0, 0, 0),
        'h' | 'H' => at(Some(d), time.hour(), 0, 0),
        'm' => at(Some(d), time.hour(), time.minute(), 0),
        's' => at(Some(d), time.hour(), time.minute(), time.second()),
        _ => None,
    }
}

/// Evaluate a date-math expression relative to `now`
pub fn parse_date_math(text: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let invalid = || TranslateError::malformed(format!("invalid date math {:?}", text));

    let (_, (anchor, ops)) = expression(text.trim()).map_err(|_| invalid())?;
    let mut t = match anchor {
        Anchor::Now => now,
        Anchor::Date(date, time) => Utc.from_utc_datetime(&date.and_time(time)),
    };

    for op in ops {
        t = match op {
            Op::Add(n, unit) => adjust(t, n, unit),
            Op::Round(unit) => round(t, unit),
        }
        .ok_or_else(invalid)?;
    }

    tracing::trace!(input = text, resolved = %t, "date math");
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 6, 25, 12, 34, 56).unwrap()
    }

    fn eval(text: &str) -> String {
        parse_date_math(text, now()).unwrap().to_rfc3339()
    }

    #[test]
    fn test_now() {
        assert_eq!(eval("now"), "2022-06-25T12:34:56+00:00");
    }

    #[test]
    fn test_adjust_round_add() {
        assert_eq!(eval("now-1d/d+10m"), "2022-06-24T00:10:00+00:00");
        assert_eq!(eval("now+1h"), "2022-06-25T13:34:56+00:00");
        assert_eq!(eval("now-M"), "2022-05-25T12:34:56+00:00");
        assert_eq!(eval("now/y"), "2022-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_round_week_to_sunday() {
        // 2022-06-25 is a saturday
        assert_eq!(eval("now/w"), "2022-06-19T00:00:00+00:00");
    }

    #[test]
    fn test_date_anchor() {
        assert_eq!(eval("2021.3.4||"), "2021-03-04T00:00:00+00:00");
        assert_eq!(eval("2021-03-04T10:11||+1d"), "2021-03-05T10:11:00+00:00");
        assert_eq!(eval("2021-03-04 10:11:12.5||/m"), "2021-03-04T10:11:00+00:00");
    }

    #[test]
    fn test_invalid() {
        assert!(parse_date_math("yesterday", now()).is_err());
        assert!(parse_date_math("now-1x", now()).is_err());
        assert!(parse_date_math("2021-13-01||", now()).is_err());
    }
}
