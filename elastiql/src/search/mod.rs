//! Search and count requests: body parsing, SQL assembly and result decoding

mod count;
mod params;
mod request;
mod response;
mod sql;

use serde_json::Value;

pub use count::{CountRequest, CountResponse};
pub use params::UriParams;
pub use request::{
    ProjectedField, SearchRequest, SortField, SourceFilter, TrackTotalHits, DEFAULT_SIZE,
    DEFAULT_TRACK_TOTAL_HITS,
};
pub use response::{Hit, HitsResponse, SearchResponse, ShardStats, TotalHits};
pub use sql::{count_select, source_select};

use crate::context::QueryContext;
use crate::error::{Result, TranslateError};
use crate::sql::print_select;

/// Translate a `_search` body into PartiQL text
pub fn translate(ctx: &QueryContext, body: &Value, pretty: bool) -> Result<String> {
    let request = SearchRequest::from_value(body)?;
    let sql = print_select(&request.to_sql(ctx)?, pretty);
    tracing::debug!(index = %ctx.index, sql = %sql, "translated search request");
    Ok(sql)
}

/// Decode an engine result for the `_search` body it answers
pub fn convert(ctx: &QueryContext, body: &Value, result: &Value) -> Result<Value> {
    let request = SearchRequest::from_value(body)?;
    let result = result
        .as_object()
        .ok_or_else(|| TranslateError::shape("", "result should be an object"))?;
    let response = request.convert_result(ctx, result)?;
    Ok(serde_json::to_value(response)?)
}

/// Translate a `_count` body into PartiQL text
pub fn count_sql(ctx: &QueryContext, body: &Value, pretty: bool) -> Result<String> {
    let request = CountRequest::from_value(body)?;
    let sql = print_select(&request.to_sql(ctx)?, pretty);
    tracing::debug!(index = %ctx.index, sql = %sql, "translated count request");
    Ok(sql)
}

/// Decode an engine result into a `_count` response
pub fn convert_count(result: &Value) -> Result<Value> {
    let result = result
        .as_object()
        .ok_or_else(|| TranslateError::shape("", "result should be an object"))?;
    let response = CountRequest::default().convert_result(result)?;
    Ok(serde_json::to_value(response)?)
}
