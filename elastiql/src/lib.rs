//! Elasticsearch Query DSL to PartiQL translation
//!
//! A `_search` body (query, sort, paging and aggregations) becomes one
//! `WITH ... SELECT` statement whose columns follow a fixed naming scheme:
//!
//! - `$total_count` and `$hits` for the hit count and the hit window
//! - `$bucket:<path>%<i>` for every bucket aggregation, a CTE re-projected
//!   under the same alias
//! - `$key:<path>%<i>` for the group keys inside those CTEs
//! - `$doc_count` for per-group document counts
//!
//! The same scheme drives the way back: an engine result keyed by these
//! aliases is decoded into the Elasticsearch response JSON.
//!
//! ```ignore
//! let ctx = QueryContext::new("logs").with_source(Some("db"), "logs");
//! let sql = elastiql::search::translate(&ctx, &body, true)?;
//! let response = elastiql::search::convert(&ctx, &body, &engine_result)?;
//! ```

pub mod aggs;
pub mod config;
pub mod context;
pub mod date_math;
pub mod datum;
pub mod error;
pub mod literal;
pub mod mapping;
pub mod naming;
pub mod query;
pub mod query_string;
pub mod search;
pub mod sql;

pub use config::Config;
pub use context::{QueryContext, TableSource};
pub use error::{Result, TranslateError};
pub use search::{SearchRequest, SearchResponse};
