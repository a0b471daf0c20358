//! Assemble the single `WITH ... SELECT` statement for a search
//!
//! Every part of the response reads from the same `$source` CTE, so hits,
//! the total and all aggregations observe one snapshot of the data.

use super::request::SearchRequest;
use crate::aggs::{GenerateContext, Generator};
use crate::context::QueryContext;
use crate::error::{Result, TranslateError};
use crate::naming::{DEFAULT_SOURCE, HITS, NESTED_ALIAS, TOTAL_COUNT};
use crate::query::Query;
use crate::sql::{Expr, FromItem, Projection, Select};

/// `SELECT * FROM <tables> AS "$source" WHERE <query>`
pub fn source_select(ctx: &QueryContext, query: Option<&Query>) -> Result<Select> {
    if ctx.sources.is_empty() {
        return Err(TranslateError::Config(format!("index {:?} has no table sources", ctx.index)));
    }
    let where_ = match query {
        Some(query) => query.expression(ctx)?,
        None => None,
    };

    let mut select = Select {
        projection: vec![Projection::new(Expr::star())],
        from: vec![FromItem::Tables(ctx.sources.clone())],
        where_,
        ..Default::default()
    };
    select.attach_list_aliases();
    Ok(select)
}

/// `SELECT COUNT(*) FROM "$source"`, optionally reading no further than
/// `limit + 1` rows
pub fn count_select(limit: Option<u64>) -> Select {
    let from = match limit {
        Some(limit) => FromItem::SubSelect {
            select: Box::new(Select {
                limit: Some(limit.saturating_add(1) as usize),
                ..Select::star_from(DEFAULT_SOURCE)
            }),
            alias: NESTED_ALIAS.to_string(),
        },
        None => FromItem::source(DEFAULT_SOURCE),
    };
    Select {
        projection: vec![Projection::new(Expr::count_star())],
        from: vec![from],
        ..Default::default()
    }
}

impl SearchRequest {
    /// Build the statement answering this request
    pub fn to_sql(&self, ctx: &QueryContext) -> Result<Select> {
        let mut with = vec![(DEFAULT_SOURCE.to_string(), source_select(ctx, self.query.as_ref())?)];
        let mut projection = Vec::new();

        let total = if ctx.ignore_total_hits {
            Expr::lit(-1)
        } else {
            let limit = self
                .track_total_hits
                .limit
                .filter(|_| ctx.ignore_sum_other_doc_count);
            Expr::Select(Box::new(count_select(limit)))
        };
        projection.push(Projection::aliased(total, TOTAL_COUNT));

        let size = self.effective_size();
        if size > 0 {
            let hits = Select {
                order_by: self.sort.iter().map(|s| s.order_by(ctx)).collect(),
                limit: Some(size),
                offset: Some(self.effective_from()),
                ..Select::star_from(DEFAULT_SOURCE)
            };
            projection.push(Projection::aliased(Expr::Select(Box::new(hits)), HITS));
        }

        let gen = Generator::new(ctx);
        for (alias, select) in GenerateContext::root(&gen, &self.aggs).transform()? {
            tracing::trace!(bucket = %alias, "adding aggregation sub-select");
            projection.push(Projection::aliased(
                Expr::Select(Box::new(Select::star_from(&alias))),
                alias.clone(),
            ));
            with.push((alias, select));
        }

        Ok(Select {
            with,
            projection,
            ..Default::default()
        })
    }
}
