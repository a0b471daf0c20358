//! `top_hits`: the first documents of every enclosing bucket
//!
//! Rows are numbered per parent group with a window function and filtered
//! on that number. Only the SQL side exists; results cannot be decoded.

use serde::Deserialize;
use serde_json::Value;

use super::generate::GenerateContext;
use super::process::ProcessContext;
use super::result::AggResult;
use super::BucketAggregation;
use crate::error::{Result, TranslateError};
use crate::mapping::FieldRef;
use crate::naming::{DEFAULT_SOURCE, NESTED_ALIAS, ROW_NUMBER};
use crate::search::SortField;
use crate::sql::{BinaryOp, Expr, FromItem, Projection, Select};

const DEFAULT_SIZE: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct TopHits {
    pub size: usize,
    pub sort: Vec<SortField>,
}

#[derive(Deserialize)]
struct TopHitsOptions {
    #[serde(default)]
    size: Option<usize>,
    #[serde(default)]
    from: Option<usize>,
    #[serde(default)]
    sort: Option<Value>,
}

impl TopHits {
    pub(super) fn parse(body: &Value) -> Result<Self> {
        let options: TopHitsOptions = super::options("top_hits", body)?;
        if options.from.is_some_and(|from| from > 0) {
            return Err(TranslateError::unsupported("from in top_hits aggregation"));
        }
        let sort = match &options.sort {
            Some(sort) => SortField::parse_list(sort)?,
            None => Vec::new(),
        };
        Ok(Self {
            size: options.size.unwrap_or(DEFAULT_SIZE),
            sort,
        })
    }
}

impl BucketAggregation for TopHits {
    fn transform(&self, c: GenerateContext<'_>) -> Result<Vec<(String, Select)>> {
        if !c.aggs().is_empty() {
            return Err(TranslateError::malformed("top_hits aggregation cannot have sub-aggregations"));
        }

        let ctx = c.ctx();
        let parent_groups = c.parent_groups();
        let row_number = Expr::Over {
            function: Box::new(Expr::function("ROW_NUMBER", Vec::new())),
            partition_by: parent_groups.iter().map(|g| g.expr.clone()).collect(),
            order_by: self.sort.iter().map(|s| s.order_by(ctx)).collect(),
        };

        let mut projection = vec![Projection::new(Expr::star())];
        projection.extend(parent_groups.iter().cloned());
        projection.push(Projection::aliased(row_number, ROW_NUMBER));

        let mut numbered = Select {
            projection,
            from: vec![FromItem::source(DEFAULT_SOURCE)],
            where_: c.where_clause(),
            ..Default::default()
        };
        numbered.attach_list_aliases();

        let select = Select {
            projection: vec![Projection::new(Expr::star())],
            from: vec![FromItem::SubSelect {
                select: Box::new(numbered),
                alias: NESTED_ALIAS.to_string(),
            }],
            where_: Some(Expr::binary(
                BinaryOp::Le,
                Expr::Field(FieldRef::raw(NESTED_ALIAS, &[ROW_NUMBER])),
                Expr::lit(self.size as i64),
            )),
            ..Default::default()
        };
        Ok(vec![(c.alias(), select)])
    }

    fn process(&self, _c: &ProcessContext<'_>) -> Result<AggResult> {
        Err(TranslateError::unsupported("decoding top_hits results"))
    }
}
