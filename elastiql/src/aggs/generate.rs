//! SQL generation for the aggregation tree
//!
//! Each bucket aggregation gets its own [`GenerateContext`]. The context
//! collects group keys, projections and orderings and finally emits one
//! `$bucket:<path>%<n>` sub-select per independent GROUP BY, followed by the
//! sub-selects of its nested buckets.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use super::{AggregationKind, Aggregations};
use crate::context::QueryContext;
use crate::error::Result;
use crate::mapping::FieldRef;
use crate::naming::{bucket_alias, key_alias, DEFAULT_SOURCE, DOC_COUNT, DUMMY_ALIAS, SELECTION_ALIAS};
use crate::sql::{BinaryOp, Expr, FromItem, Order, OrderBy, Projection, Select};

/// Nested levels are never truncated below this many groups per parent
pub const GROUP_BY_LIMIT: usize = 10_000;

/// Requested size with the Elasticsearch default of 10
pub fn effective_size(size: Option<usize>) -> usize {
    size.unwrap_or(10)
}

/// Shared state of one generation pass
pub struct Generator<'a> {
    pub ctx: &'a QueryContext,
    indexes: RefCell<BTreeMap<String, usize>>,
}

impl<'a> Generator<'a> {
    pub fn new(ctx: &'a QueryContext) -> Self {
        Self {
            ctx,
            indexes: RefCell::new(BTreeMap::new()),
        }
    }

    /// Next free `%<n>` suffix for a bucket path
    pub fn next_index(&self, bucket: &str) -> usize {
        let mut indexes = self.indexes.borrow_mut();
        let next = indexes.entry(bucket.to_string()).or_insert(0);
        let index = *next;
        *next += 1;
        index
    }
}

/// What a nested context needs to know about the bucket enclosing it
#[derive(Debug, Clone)]
struct ParentScope {
    bucket: String,
    index: usize,
    groups: Vec<Projection>,
}

/// Builder state for one bucket level. Cloning yields an independent
/// builder: all accumulated lists are deep-copied.
#[derive(Clone)]
pub struct GenerateContext<'a> {
    gen: &'a Generator<'a>,
    parent: Option<ParentScope>,
    pub bucket: String,
    index: usize,
    aggs: &'a Aggregations,
    skip: BTreeSet<String>,
    query: Option<Expr>,
    size: usize,
    group_exprs: Vec<Projection>,
    projections: Vec<Projection>,
    demoted: Vec<Projection>,
    order_by: Vec<OrderBy>,
    nesting_level: usize,
}

impl<'a> GenerateContext<'a> {
    /// Context of the top-level aggregations
    pub fn root(gen: &'a Generator<'a>, aggs: &'a Aggregations) -> Self {
        Self {
            gen,
            parent: None,
            bucket: String::new(),
            index: gen.next_index(""),
            aggs,
            skip: BTreeSet::new(),
            query: None,
            size: 0,
            group_exprs: Vec::new(),
            projections: Vec::new(),
            demoted: Vec::new(),
            order_by: Vec::new(),
            nesting_level: 0,
        }
    }

    /// Context of the bucket aggregation `name` nested in this one
    fn child(&self, name: &str, aggs: &'a Aggregations) -> Self {
        let bucket = if self.bucket.is_empty() {
            name.to_string()
        } else {
            format!("{}:{}", self.bucket, name)
        };
        Self {
            gen: self.gen,
            parent: Some(ParentScope {
                bucket: self.bucket.clone(),
                index: self.index,
                groups: self.all_groups(),
            }),
            index: self.gen.next_index(&bucket),
            bucket,
            aggs,
            skip: BTreeSet::new(),
            query: self.query.clone(),
            size: 0,
            group_exprs: Vec::new(),
            projections: Vec::new(),
            demoted: Vec::new(),
            order_by: Vec::new(),
            nesting_level: self.nesting_level + 1,
        }
    }

    /// Independent copy emitting under a fresh index of the same path
    pub fn fork(&self) -> Self {
        let mut fork = self.clone();
        fork.index = self.gen.next_index(&self.bucket);
        fork
    }

    pub fn ctx(&self) -> &'a QueryContext {
        self.gen.ctx
    }

    pub fn aggs(&self) -> &'a Aggregations {
        self.aggs
    }

    pub fn nesting_level(&self) -> usize {
        self.nesting_level
    }

    pub fn alias(&self) -> String {
        bucket_alias(&self.bucket, self.index)
    }

    pub fn and_query(&mut self, expr: Option<Expr>) -> &mut Self {
        if let Some(expr) = expr {
            self.query = Some(match self.query.take() {
                Some(query) => Expr::and(query, expr),
                None => expr,
            });
        }
        self
    }

    pub fn add_group_expr(&mut self, expr: Expr) -> &mut Self {
        let alias = key_alias(&self.bucket, self.group_exprs.len());
        self.group_exprs.push(Projection::aliased(expr, alias));
        self
    }

    pub fn add_projection(&mut self, alias: impl Into<String>, expr: Expr) -> &mut Self {
        self.projections.push(Projection::aliased(expr, alias));
        self
    }

    /// A projection that cannot share the GROUP BY with the others
    pub fn add_demoted(&mut self, alias: impl Into<String>, expr: Expr) -> &mut Self {
        self.demoted.push(Projection::aliased(expr, alias));
        self
    }

    pub fn add_ordering(&mut self, expr: Expr, order: Order) -> &mut Self {
        self.order_by.push(OrderBy::new(expr, Some(order)));
        self
    }

    /// `COUNT(*) AS "$doc_count"`, optionally ordered by descending count
    pub fn add_doc_count(&mut self, sort: bool) -> &mut Self {
        self.add_projection(DOC_COUNT, Expr::count_star());
        if sort {
            self.add_ordering(Expr::count_star(), Order::Desc);
        }
        self
    }

    pub fn set_size(&mut self, size: usize) -> &mut Self {
        self.size = size;
        self
    }

    /// Exclude a sub-aggregation that was folded into this level
    pub fn skip(&mut self, name: &str) -> &mut Self {
        self.skip.insert(name.to_string());
        self
    }

    /// Group keys of all enclosing levels followed by this level's own
    pub fn all_groups(&self) -> Vec<Projection> {
        let mut groups = self
            .parent
            .as_ref()
            .map(|p| p.groups.clone())
            .unwrap_or_default();
        groups.extend(self.group_exprs.iter().cloned());
        groups
    }

    pub fn parent_groups(&self) -> &[Projection] {
        self.parent.as_ref().map(|p| p.groups.as_slice()).unwrap_or(&[])
    }

    /// Restrict a nested level to the groups its parent actually kept
    pub fn parent_filter(&self) -> Option<Expr> {
        let parent = self.parent.as_ref().filter(|_| self.nesting_level > 1)?;
        in_filter(&parent.groups, &bucket_alias(&parent.bucket, parent.index))
    }

    /// Effective WHERE clause of this level
    pub fn where_clause(&self) -> Option<Expr> {
        match (self.parent_filter(), self.query.clone()) {
            (Some(filter), Some(query)) => Some(Expr::and(filter, query)),
            (filter, query) => filter.or(query),
        }
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    /// Generate the sub-selects of this level and everything below it
    pub fn transform(mut self) -> Result<Vec<(String, Select)>> {
        let mut sub_queries = Vec::new();
        let aggs = self.aggs;
        for (name, agg) in aggs {
            if self.skip.contains(name) {
                continue;
            }
            match &agg.kind {
                AggregationKind::Metric(metric) => metric.transform(name, &mut self)?,
                AggregationKind::Bucket(bucket) => {
                    let child = self.child(name, &agg.aggs);
                    sub_queries.extend(bucket.as_dyn().transform(child)?);
                }
                AggregationKind::Pipeline(_) => {}
            }
        }

        if self.projections.is_empty() && !self.demoted.is_empty() {
            let first = self.demoted.remove(0);
            self.projections.push(first);
        }

        let groups = self.all_groups();
        let where_ = self.where_clause();
        let main_alias = self.alias();
        let mut queries = Vec::new();

        if !self.projections.is_empty() {
            let mut projection = groups.clone();
            projection.extend(self.projections.iter().cloned());
            let mut select = self.grouped_select(projection, &groups, where_.clone());
            self.apply_size(&mut select);

            for order in &self.order_by {
                let aliased = select
                    .projection
                    .iter()
                    .find(|p| p.expr == order.expr)
                    .and_then(|p| p.alias.as_deref());
                select.order_by.push(match aliased {
                    Some(alias) => OrderBy::new(Expr::ident(alias), order.order),
                    None => order.clone(),
                });
            }

            tracing::trace!(bucket = %main_alias, "generated bucket select");
            queries.push((main_alias.clone(), select));
        }

        let demoted = std::mem::take(&mut self.demoted);
        for projection in demoted {
            let mut where_ = where_.clone();
            if self.size > 0 && !self.group_exprs.is_empty() {
                // only the groups the main select kept
                if let Some(own) = in_filter(&groups, &main_alias) {
                    where_ = Some(match where_ {
                        Some(w) => Expr::and(own, w),
                        None => own,
                    });
                }
            }
            let mut all = groups.clone();
            all.push(projection);
            let select = self.grouped_select(all, &groups, where_);
            let alias = bucket_alias(&self.bucket, self.gen.next_index(&self.bucket));
            tracing::trace!(bucket = %alias, "generated demoted select");
            queries.push((alias, select));
        }

        queries.extend(sub_queries);
        Ok(queries)
    }

    fn grouped_select(&self, mut projection: Vec<Projection>, groups: &[Projection], where_: Option<Expr>) -> Select {
        if projection.len() == 1 {
            projection.push(Projection::aliased(Expr::lit(false), DUMMY_ALIAS));
        }
        let mut select = Select {
            projection,
            from: vec![FromItem::source(DEFAULT_SOURCE)],
            where_,
            group_by: groups.iter().map(|g| g.expr.clone()).collect(),
            ..Default::default()
        };
        select.attach_list_aliases();
        select
    }

    fn apply_size(&self, select: &mut Select) {
        if self.size == 0 {
            return;
        }
        let parent_groups = self.parent_groups();
        if self.nesting_level > 1 && !parent_groups.is_empty() {
            let row_number = Expr::Over {
                function: Box::new(Expr::function("ROW_NUMBER", Vec::new())),
                partition_by: parent_groups.iter().map(|g| g.expr.clone()).collect(),
                order_by: self.order_by.clone(),
            };
            select.having = Some(Expr::binary(BinaryOp::Le, row_number, Expr::lit(self.size as i64)));
        } else {
            select.limit = Some(self.size);
        }
    }
}

/// `<keys> IN (SELECT <aliases> FROM "<source>" AS "$selection")`
pub fn in_filter(groups: &[Projection], source: &str) -> Option<Expr> {
    let selection = |p: &Projection| {
        let alias = p.alias.as_deref().unwrap_or_default();
        Expr::Field(FieldRef::raw(SELECTION_ALIAS, &[alias]))
    };

    let (keys, selected) = match groups {
        [] => return None,
        [single] => (single.expr.clone(), selection(single)),
        many => {
            let named = |f: &dyn Fn(&Projection) -> Expr| {
                Expr::Object(
                    many.iter()
                        .map(|p| (p.alias.clone().unwrap_or_default(), f(p)))
                        .collect(),
                )
            };
            (named(&|p| p.expr.clone()), named(&selection))
        }
    };

    let select = Select {
        projection: vec![Projection::new(selected)],
        from: vec![FromItem::source_as(source, SELECTION_ALIAS)],
        ..Default::default()
    };
    Some(Expr::binary(BinaryOp::In, keys, Expr::Select(Box::new(select))))
}
