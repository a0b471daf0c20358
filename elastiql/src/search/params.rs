//! URI search parameters (`?q=...&size=...`) layered over a request body

use serde_json::{json, Value};

use super::request::{SearchRequest, SortField, TrackTotalHits};
use crate::error::{Result, TranslateError};
use crate::query::Query;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UriParams {
    pub q: Option<String>,
    pub df: Option<String>,
    pub default_operator: Option<String>,
    pub size: Option<usize>,
    pub from: Option<usize>,
    pub sort: Option<String>,
    pub track_total_hits: Option<String>,
}

fn number(key: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| TranslateError::malformed(format!("{} should be a non-negative integer, got {:?}", key, value)))
}

impl UriParams {
    /// Parse a query string such as `q=user:kimchy&size=5`. A leading `?`
    /// is allowed.
    pub fn parse(query: &str) -> Result<Self> {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut params = UriParams::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "q" => params.q = Some(value),
                "df" => params.df = Some(value),
                "default_operator" => params.default_operator = Some(value),
                "size" => params.size = Some(number("size", &value)?),
                "from" => params.from = Some(number("from", &value)?),
                "sort" => params.sort = Some(value),
                "track_total_hits" => params.track_total_hits = Some(value),
                other => tracing::debug!(param = other, "ignoring search parameter"),
            }
        }
        Ok(params)
    }

    /// Apply the parameters; they take precedence over the body
    pub fn apply(self, mut request: SearchRequest) -> Result<SearchRequest> {
        if let Some(q) = self.q {
            let mut body = json!({ "query": q });
            if let Some(df) = self.df {
                body["default_field"] = Value::String(df);
            }
            if let Some(op) = self.default_operator {
                body["default_operator"] = Value::String(op);
            }
            if request.query.is_some() {
                tracing::debug!("q parameter replaces the body query");
            }
            request.query = Some(Query::from_value(&json!({ "query_string": body }))?);
        }
        if let Some(size) = self.size {
            request.size = Some(size);
        }
        if let Some(from) = self.from {
            request.from = Some(from);
        }
        if let Some(sort) = self.sort {
            request.sort = parse_sort(&sort)?;
        }
        if let Some(track) = self.track_total_hits {
            let value = match track.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                other => Value::from(other.parse::<i64>().map_err(|_| {
                    TranslateError::malformed(format!("invalid track_total_hits {:?}", other))
                })?),
            };
            request.track_total_hits = TrackTotalHits::from_value(&value)?;
        }
        Ok(request)
    }
}

/// `field:order` pairs separated by commas
fn parse_sort(text: &str) -> Result<Vec<SortField>> {
    text.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((field, order)) => SortField::from_value(&json!({ field: order })),
            None => SortField::from_value(&Value::String(entry.to_string())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Order;

    #[test]
    fn test_parse() {
        let params = UriParams::parse("?q=user%3Akimchy&size=5&from=10&pretty=true").unwrap();
        assert_eq!(params.q.as_deref(), Some("user:kimchy"));
        assert_eq!(params.size, Some(5));
        assert_eq!(params.from, Some(10));
        assert!(UriParams::parse("size=-1").is_err());
    }

    #[test]
    fn test_apply_overrides_body() {
        let request = SearchRequest::from_value(&json!({"size": 1, "query": {"match_all": {}}})).unwrap();
        let params = UriParams::parse("q=error&df=message&size=3&sort=ts:asc,host&track_total_hits=false").unwrap();
        let request = params.apply(request).unwrap();

        assert_eq!(request.size, Some(3));
        assert!(matches!(request.query, Some(Query::QueryString(ref qs)) if qs.default_field.as_deref() == Some("message")));
        assert_eq!(request.sort.len(), 2);
        assert_eq!((request.sort[0].field.as_str(), request.sort[0].order), ("ts", Order::Asc));
        assert_eq!(request.sort[1].order, Order::Desc);
        assert!(!request.track_total_hits.enabled);
    }

    #[test]
    fn test_invalid_track_total_hits() {
        let params = UriParams::parse("track_total_hits=lots").unwrap();
        assert!(params.apply(SearchRequest::default()).is_err());
    }
}
