//! Lucene-style query strings
//!
//! Terms, phrases, `/regex/`, wildcards, `field:` prefixes, groups, ranges
//! (`[a TO b}`), comparisons (`>=10`), `+`/`-`/`NOT` modifiers and
//! `AND`/`OR`/`&&`/`||`. Boosts (`^2`) and fuzziness (`~1`) are accepted
//! and ignored.

mod compile;
mod lexer;
mod parser;

pub use compile::compile;
pub use parser::{parse, CompareOp, DefaultOperator, FieldExpr, QsExpr, QsValue};

use crate::context::QueryContext;
use crate::error::Result;
use crate::sql::{BinaryOp, Expr};

/// Translate a query string. Every default field is tried and the results
/// are ORed. An empty query yields `None`.
pub fn translate(
    ctx: &QueryContext,
    query: &str,
    default_fields: &[String],
    default_op: DefaultOperator,
) -> Result<Option<Expr>> {
    let Some(parsed) = parse(query, default_op)? else {
        return Ok(None);
    };
    tracing::trace!(query, ?parsed, "parsed query string");

    if default_fields.is_empty() {
        return compile(ctx, &parsed, &[]).map(Some);
    }

    let mut exprs = Vec::with_capacity(default_fields.len());
    for field in default_fields {
        let parts: Vec<String> = field.split('.').map(str::to_string).collect();
        exprs.push(compile(ctx, &parsed, &parts)?);
    }
    Ok(Expr::join(BinaryOp::Or, exprs))
}
