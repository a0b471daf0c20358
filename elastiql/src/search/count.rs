//! `_count` API: the total of a query without hits or aggregations

use serde::Serialize;
use serde_json::{Map, Value};

use super::response::ShardStats;
use super::sql::{count_select, source_select};
use crate::aggs::process::total_count;
use crate::context::QueryContext;
use crate::error::{Result, TranslateError};
use crate::naming::{DEFAULT_SOURCE, TOTAL_COUNT};
use crate::query::Query;
use crate::sql::{Expr, Projection, Select};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountRequest {
    pub query: Option<Query>,
}

impl CountRequest {
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| TranslateError::malformed("count request should be an object"))?;
        let mut request = CountRequest::default();
        for (key, body) in map {
            match key.as_str() {
                "query" => request.query = Some(Query::from_value(body)?),
                other => return Err(TranslateError::malformed(format!("unknown key {:?} in count request", other))),
            }
        }
        Ok(request)
    }

    pub fn to_sql(&self, ctx: &QueryContext) -> Result<Select> {
        Ok(Select {
            with: vec![(DEFAULT_SOURCE.to_string(), source_select(ctx, self.query.as_ref())?)],
            projection: vec![Projection::aliased(Expr::Select(Box::new(count_select(None))), TOTAL_COUNT)],
            ..Default::default()
        })
    }

    pub fn convert_result(&self, result: &Map<String, Value>) -> Result<CountResponse> {
        let count = total_count(result)?;
        if count < 0 {
            return Err(TranslateError::shape(TOTAL_COUNT, "missing from count result"));
        }
        Ok(CountResponse {
            count,
            shards: ShardStats::default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountResponse {
    pub count: i64,
    #[serde(rename = "_shards")]
    pub shards: ShardStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::print_select;
    use serde_json::json;

    #[test]
    fn test_count_sql() {
        let ctx = QueryContext::new("logs").with_source(None, "logs");
        let request = CountRequest::from_value(&json!({"query": {"term": {"level": "error"}}})).unwrap();
        let sql = print_select(&request.to_sql(&ctx).unwrap(), false);
        assert_eq!(
            sql,
            concat!(
                r#"WITH "$source" AS (SELECT * FROM "logs" AS "$source" WHERE ("$source"."level" = 'error')) "#,
                r#"SELECT (SELECT COUNT(*) FROM "$source") AS "$total_count""#
            )
        );
    }

    #[test]
    fn test_count_keys() {
        assert!(CountRequest::from_value(&json!({})).unwrap().query.is_none());
        assert!(CountRequest::from_value(&json!({"size": 0})).is_err());
    }

    #[test]
    fn test_convert_count() {
        let request = CountRequest::default();
        let result = json!({"$total_count": [{"_1": 42}]});
        let response = request.convert_result(result.as_object().unwrap()).unwrap();
        assert_eq!(
            serde_json::to_value(response).unwrap(),
            json!({"count": 42, "_shards": {"total": 1, "successful": 1, "skipped": 0, "failed": 0}})
        );
        assert!(request.convert_result(&Map::new()).is_err());
    }
}
