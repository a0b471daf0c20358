//! `geotile_grid`: documents bucketed by the map tile containing their point
//!
//! Keys are `zoom/x/y` strings computed by the engine's `GEO_TILE_ES`.

use serde::Deserialize;

use super::generate::{effective_size, GenerateContext, GROUP_BY_LIMIT};
use super::process::{truncate, ProcessContext};
use super::result::{AggResult, KeyedBucket, MultiBuckets};
use super::terms::single_key;
use super::BucketAggregation;
use crate::error::{Result, TranslateError};
use crate::mapping::FieldRef;
use crate::query::{GeoBounds, LAT_EXT, LON_EXT};
use crate::sql::{Expr, Order, Select};

const MAX_PRECISION: u32 = 29;

fn default_precision() -> u32 {
    7
}

/// Map tiles at a zoom level, keyed `"<zoom>/<x>/<y>"`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GeotileGrid {
    pub field: String,
    #[serde(default = "default_precision")]
    pub precision: u32,
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub bounds: Option<GeoBounds>,
}

impl BucketAggregation for GeotileGrid {
    fn transform(&self, mut c: GenerateContext<'_>) -> Result<Vec<(String, Select)>> {
        if self.precision > MAX_PRECISION {
            return Err(TranslateError::malformed(format!(
                "invalid geotile_grid precision of {}, must be between 0 and {}",
                self.precision, MAX_PRECISION
            )));
        }

        let field = FieldRef::resolve(c.ctx(), &self.field);
        let key = Expr::function(
            "GEO_TILE_ES",
            vec![
                Expr::Field(field.child(LAT_EXT)),
                Expr::Field(field.child(LON_EXT)),
                Expr::lit(i64::from(self.precision)),
            ],
        );
        if let Some(bounds) = &self.bounds {
            let inside = bounds.expression(c.ctx(), &self.field)?;
            c.and_query(Some(inside));
        }

        c.add_group_expr(key)
            .add_doc_count(false)
            .add_ordering(Expr::count_star(), Order::Desc);
        c.set_size(if c.nesting_level() > 1 {
            GROUP_BY_LIMIT
        } else {
            effective_size(self.size)
        });
        c.transform()
    }

    fn process(&self, c: &ProcessContext<'_>) -> Result<AggResult> {
        let mut buckets = Vec::new();
        if let Some(groups) = c.groups() {
            for group in truncate(&groups.groups, effective_size(self.size)) {
                let key = single_key(c, group, "geotile_grid")?;
                let doc_count = group.doc_count(c.name)?;
                let sub_aggs = c.sub_result(Some(group), doc_count)?;
                buckets.push(KeyedBucket::new(c.ctx, key, None, None, doc_count, sub_aggs));
            }
        }
        Ok(AggResult::Multi(MultiBuckets {
            buckets,
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggs::{parse_aggregations, pre_process, process_aggregations, Generator};
    use crate::context::QueryContext;
    use crate::sql::print_select;
    use serde_json::json;

    #[test]
    fn test_geotile_sql() {
        let ctx = QueryContext::new("i");
        let aggs = parse_aggregations(&json!({"tiles": {"geotile_grid": {"field": "loc", "precision": 8}}})).unwrap();
        let gen = Generator::new(&ctx);
        let queries = GenerateContext::root(&gen, &aggs).transform().unwrap();
        assert_eq!(
            print_select(&queries[0].1, false),
            concat!(
                r#"SELECT GEO_TILE_ES("$source"."loc"."lat","$source"."loc"."lon",8) AS "$key:tiles%0", "#,
                r#"COUNT(*) AS "$doc_count" FROM "$source" "#,
                r#"GROUP BY GEO_TILE_ES("$source"."loc"."lat","$source"."loc"."lon",8) "#,
                r#"ORDER BY "$doc_count" DESC LIMIT 10"#
            )
        );
    }

    #[test]
    fn test_bounds_restrict_documents() {
        let ctx = QueryContext::new("i");
        let aggs = parse_aggregations(&json!({"tiles": {"geotile_grid": {
            "field": "loc",
            "bounds": {"top_left": {"lat": 10, "lon": 0}, "bottom_right": {"lat": 0, "lon": 10}}
        }}}))
        .unwrap();
        let gen = Generator::new(&ctx);
        let queries = GenerateContext::root(&gen, &aggs).transform().unwrap();
        let sql = print_select(&queries[0].1, false);
        assert!(sql.contains(r#"("$source"."loc"."lat" <= 10)"#), "{}", sql);
        assert!(sql.contains(r#"("$source"."loc"."lon" <= 10)"#), "{}", sql);
    }

    #[test]
    fn test_precision_range() {
        let ctx = QueryContext::new("i");
        let aggs = parse_aggregations(&json!({"tiles": {"geotile_grid": {"field": "loc", "precision": 30}}})).unwrap();
        let gen = Generator::new(&ctx);
        let err = GenerateContext::root(&gen, &aggs).transform().unwrap_err();
        assert!(matches!(err, TranslateError::Malformed(_)));
    }

    #[test]
    fn test_process_tiles() {
        let ctx = QueryContext::new("i");
        let aggs = parse_aggregations(&json!({"tiles": {"geotile_grid": {"field": "loc", "size": 1}}})).unwrap();
        let root = pre_process(
            json!({
                "$total_count": 5,
                "$bucket:tiles%0": [
                    {"$key:tiles%0": "7/64/63", "$doc_count": 4},
                    {"$key:tiles%0": "7/65/63", "$doc_count": 1}
                ]
            })
            .as_object()
            .unwrap(),
        )
        .unwrap();
        let results = process_aggregations(&ctx, &aggs, Some(&root), 5).unwrap();
        assert_eq!(
            serde_json::to_value(&results).unwrap(),
            json!({"tiles": {"buckets": [{"key": "7/64/63", "doc_count": 4}]}})
        );
    }
}
