//! Rebuild the aggregation tree from the flat engine result
//!
//! Every `$bucket:<path>%<n>` entry of the result is a list of rows (or one
//! row) whose `$key:<prefix>%<i>` columns identify the group at each level of
//! `<path>`. Rows are folded into a tree of [`GroupResults`], deduplicating
//! groups by a hash of their key values and keeping first-seen order.

use std::collections::{BTreeMap, HashMap};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::result::SubAggregations;
use super::{Aggregation, AggregationKind, Aggregations};
use crate::context::QueryContext;
use crate::datum::Datum;
use crate::error::{Result, TranslateError};
use crate::naming::{
    key_group_name, key_groups, split_with_prefix, BUCKET_PREFIX, DOC_COUNT, DUMMY_ALIAS,
    KEY_PREFIX, TOTAL_COUNT,
};

/// A nested aggregation: grouped buckets or a single ungrouped bucket
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GroupNode {
    Map(GroupResultMap),
    Group(GroupResults),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupResultMap {
    #[serde(skip)]
    pub key_columns: Vec<String>,
    #[serde(rename = "$groups$")]
    pub groups: Vec<GroupResults>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupResults {
    #[serde(rename = "$keys$", skip_serializing_if = "Vec::is_empty")]
    pub key_values: Vec<Datum>,
    #[serde(rename = "$results$", skip_serializing_if = "BTreeMap::is_empty")]
    pub results: BTreeMap<String, Datum>,
    #[serde(rename = "$nested$", skip_serializing_if = "BTreeMap::is_empty")]
    pub nested: BTreeMap<String, GroupNode>,
}

impl GroupResultMap {
    fn new(key_columns: Vec<String>) -> Self {
        Self {
            key_columns,
            ..Default::default()
        }
    }

    fn group_for(&mut self, row: &Map<String, Value>) -> &mut GroupResults {
        let key_values: Vec<Datum> = self
            .key_columns
            .iter()
            .map(|col| row.get(col).map(Datum::from_json).unwrap_or_default())
            .collect();

        let mut hasher = Sha256::new();
        for value in &key_values {
            value.hash_into(&mut hasher);
        }
        let hash = URL_SAFE_NO_PAD.encode(hasher.finalize());

        let position = match self.index.get(&hash) {
            Some(position) => *position,
            None => {
                self.groups.push(GroupResults {
                    key_values,
                    ..Default::default()
                });
                self.index.insert(hash, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        &mut self.groups[position]
    }
}

impl GroupResults {
    /// Document count of the group. Groups the engine reported without a
    /// count have been back-filled by [`pre_process`].
    pub fn doc_count(&self, bucket: &str) -> Result<i64> {
        match self.results.get(DOC_COUNT) {
            None | Some(Datum::Null) => Ok(0),
            Some(value) => value
                .as_i64()
                .ok_or_else(|| TranslateError::shape(bucket, format!("{} has invalid type", DOC_COUNT))),
        }
    }

    fn child_group(&mut self, part: &str, bucket: &str) -> Result<&mut GroupResults> {
        let node = self
            .nested
            .entry(part.to_string())
            .or_insert_with(|| GroupNode::Group(GroupResults::default()));
        match node {
            GroupNode::Group(group) => Ok(group),
            GroupNode::Map(_) => Err(TranslateError::shape(
                bucket,
                format!("{:?} is both grouped and ungrouped", part),
            )),
        }
    }

    fn child_map(&mut self, part: &str, columns: &[String], bucket: &str) -> Result<&mut GroupResultMap> {
        let node = self
            .nested
            .entry(part.to_string())
            .or_insert_with(|| GroupNode::Map(GroupResultMap::new(columns.to_vec())));
        match node {
            GroupNode::Map(map) => Ok(map),
            GroupNode::Group(_) => Err(TranslateError::shape(
                bucket,
                format!("{:?} is both grouped and ungrouped", part),
            )),
        }
    }

    /// Give groups without `$doc_count` the sum of their first grouped child
    fn backfill_doc_counts(&mut self) {
        for node in self.nested.values_mut() {
            match node {
                GroupNode::Map(map) => map.groups.iter_mut().for_each(GroupResults::backfill_doc_counts),
                GroupNode::Group(group) => group.backfill_doc_counts(),
            }
        }

        if self.results.contains_key(DOC_COUNT) {
            return;
        }
        let child_total = self.nested.values().find_map(|node| match node {
            GroupNode::Map(map) => Some(
                map.groups
                    .iter()
                    .filter_map(|g| g.results.get(DOC_COUNT).and_then(Datum::as_i64))
                    .sum::<i64>(),
            ),
            GroupNode::Group(_) => None,
        });
        if let Some(total) = child_total {
            self.results.insert(DOC_COUNT.to_string(), Datum::Int(total));
        }
    }
}

/// Total hit count as reported by the engine: a number, a one-row list or
/// a one-column struct
pub fn total_count(result: &Map<String, Value>) -> Result<i64> {
    fn scalar(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::Array(rows) if rows.len() == 1 => scalar(&rows[0]),
            Value::Object(columns) if columns.len() == 1 => columns.values().next().and_then(scalar),
            _ => None,
        }
    }

    match result.get(TOTAL_COUNT) {
        None | Some(Value::Null) => Ok(-1),
        Some(value) => scalar(value)
            .ok_or_else(|| TranslateError::shape(TOTAL_COUNT, "expected a single count")),
    }
}

/// Fold the flat engine result into the group tree. The root carries the
/// total hit count as its `$doc_count` and the results of top-level metrics.
pub fn pre_process(result: &Map<String, Value>) -> Result<GroupResults> {
    let mut root = GroupResults::default();
    root.results
        .insert(DOC_COUNT.to_string(), Datum::Int(total_count(result)?));

    // sorted names put outer buckets before the inner ones
    let mut names: Vec<&String> = result.keys().collect();
    names.sort();

    for combined in names {
        let Some((bucket, _)) = split_with_prefix(BUCKET_PREFIX, combined) else {
            continue;
        };
        let parts: Vec<&str> = if bucket.is_empty() {
            Vec::new()
        } else {
            bucket.split(':').collect()
        };

        let value = &result[combined];
        let rows: &[Value] = match value {
            Value::Array(rows) => rows,
            Value::Object(_) => std::slice::from_ref(value),
            _ => return Err(TranslateError::shape(combined.as_str(), "unsupported result data")),
        };
        let Some(first) = rows.first() else {
            tracing::trace!(bucket = %combined, "empty bucket");
            continue;
        };
        let first = first.as_object().ok_or_else(|| {
            TranslateError::shape(combined.as_str(), "should hold a record in the first element")
        })?;
        let groups = key_groups(first.keys())?;

        tracing::trace!(bucket = %combined, rows = rows.len(), levels = groups.len(), "pre-processing bucket");
        for row in rows {
            let row = row
                .as_object()
                .ok_or_else(|| TranslateError::shape(combined.as_str(), "rows should be records"))?;
            merge_row(&mut root, &parts, &groups, row, combined)?;
        }
    }

    root.backfill_doc_counts();
    Ok(root)
}

fn merge_row(
    root: &mut GroupResults,
    parts: &[&str],
    key_groups: &[Vec<String>],
    row: &Map<String, Value>,
    bucket: &str,
) -> Result<()> {
    let mut group = root;
    let mut depth = 0;

    for columns in key_groups {
        let level = key_group_name(columns)
            .map(|name| name.split(':').count())
            .unwrap_or_default();
        if level <= depth || level > parts.len() {
            return Err(TranslateError::shape(
                bucket,
                format!("key columns {:?} do not match the bucket path", columns),
            ));
        }

        for part in &parts[depth..level - 1] {
            group = group.child_group(part, bucket)?;
        }
        let map = group.child_map(parts[level - 1], columns, bucket)?;
        if map.key_columns.is_empty() {
            map.key_columns = columns.clone();
        }
        group = map.group_for(row);
        depth = level;
    }

    for part in &parts[depth..] {
        group = group.child_group(part, bucket)?;
    }

    for (column, value) in row {
        if column == DUMMY_ALIAS || split_with_prefix(KEY_PREFIX, column).is_some() {
            continue;
        }
        group.results.insert(column.clone(), Datum::from_json(value));
    }
    Ok(())
}

/// State threaded through result decoding
#[derive(Clone, Copy)]
pub struct ProcessContext<'a> {
    pub ctx: &'a QueryContext,
    pub name: &'a str,
    pub agg: &'a Aggregation,
    /// The enclosing group holding this aggregation's data
    pub group: Option<&'a GroupResults>,
    /// Document count of the enclosing bucket
    pub doc_count: i64,
}

impl<'a> ProcessContext<'a> {
    /// Grouped buckets of this aggregation
    pub fn groups(&self) -> Option<&'a GroupResultMap> {
        match self.group?.nested.get(self.name)? {
            GroupNode::Map(map) => Some(map),
            GroupNode::Group(_) => None,
        }
    }

    /// Ungrouped bucket of this aggregation
    pub fn single(&self) -> Option<&'a GroupResults> {
        match self.group?.nested.get(self.name)? {
            GroupNode::Group(group) => Some(group),
            GroupNode::Map(_) => None,
        }
    }

    /// Scalar projected under this aggregation's name
    pub fn value(&self) -> Option<&'a Datum> {
        self.group?.results.get(self.name)
    }

    /// A named column of the enclosing group
    pub fn column(&self, name: &str) -> Option<&'a Datum> {
        self.group?.results.get(name)
    }

    /// Decode the sub-aggregations of one bucket
    pub fn sub_result(&self, group: Option<&GroupResults>, doc_count: i64) -> Result<SubAggregations> {
        process_aggregations(self.ctx, &self.agg.aggs, group, doc_count)
    }
}

/// Decode all metric and bucket aggregations of one level
pub fn process_aggregations(
    ctx: &QueryContext,
    aggs: &Aggregations,
    group: Option<&GroupResults>,
    doc_count: i64,
) -> Result<SubAggregations> {
    let mut results = SubAggregations::new();
    for (name, agg) in aggs {
        let c = ProcessContext {
            ctx,
            name,
            agg,
            group,
            doc_count,
        };
        let mut result = match &agg.kind {
            AggregationKind::Metric(metric) => metric.process(&c)?,
            AggregationKind::Bucket(bucket) => bucket.as_dyn().process(&c)?,
            AggregationKind::Pipeline(_) => continue,
        };
        result.set_meta(agg.meta.clone());
        results.insert(name.clone(), result);
    }
    Ok(results)
}

/// Number of buckets to emit for a requested size
pub(crate) fn truncate<T>(items: &[T], size: usize) -> &[T] {
    &items[..items.len().min(size)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    fn map<'a>(group: &'a GroupResults, name: &str) -> &'a GroupResultMap {
        match &group.nested[name] {
            GroupNode::Map(map) => map,
            GroupNode::Group(_) => panic!("{} is not grouped", name),
        }
    }

    #[test]
    fn test_nested_groups() {
        let result = object(json!({
            "$total_count": 10,
            "$bucket:category%0": [
                {"$key:category%0": "a", "$doc_count": 6},
                {"$key:category%0": "b", "$doc_count": 4}
            ],
            "$bucket:category:product%0": [
                {"$key:category%0": "a", "$key:category:product%0": "x", "$doc_count": 5, "avgPrice": 1.5},
                {"$key:category%0": "a", "$key:category:product%0": "y", "$doc_count": 1, "avgPrice": 2.0},
                {"$key:category%0": "b", "$key:category:product%0": "x", "$doc_count": 4, "avgPrice": 3.0}
            ]
        }));
        let root = pre_process(&result).unwrap();
        assert_eq!(root.results[DOC_COUNT], Datum::Int(10));

        let categories = map(&root, "category");
        assert_eq!(categories.groups.len(), 2);
        let a = &categories.groups[0];
        assert_eq!(a.key_values, vec![Datum::String("a".into())]);
        assert_eq!(a.doc_count("category").unwrap(), 6);

        let products = map(a, "product");
        assert_eq!(products.groups.len(), 2);
        assert_eq!(products.groups[1].results["avgPrice"], Datum::Float(2.0));
        assert!(!products.groups[0].results.contains_key("$key:category:product%0"));
    }

    #[test]
    fn test_backfill_doc_count() {
        let result = object(json!({
            "$total_count": 3,
            "$bucket:category:product%0": [
                {"$key:category%0": "a", "$key:category:product%0": "x", "$doc_count": 2},
                {"$key:category%0": "a", "$key:category:product%0": "y", "$doc_count": 1}
            ]
        }));
        let root = pre_process(&result).unwrap();
        let a = &map(&root, "category").groups[0];
        assert_eq!(a.doc_count("category").unwrap(), 3);
    }

    #[test]
    fn test_split_results_merge() {
        let result = object(json!({
            "$total_count": 3,
            "$bucket:tags%0": [{"$key:tags%0": "t", "$doc_count": 3}],
            "$bucket:tags%1": [{"$key:tags%0": "t", "users": 2}]
        }));
        let root = pre_process(&result).unwrap();
        let tags = map(&root, "tags");
        assert_eq!(tags.groups.len(), 1);
        assert_eq!(tags.groups[0].results["users"], Datum::Int(2));
        assert_eq!(tags.groups[0].results[DOC_COUNT], Datum::Int(3));
    }

    #[test]
    fn test_ungrouped_buckets() {
        let result = object(json!({
            "$total_count": 8,
            "$bucket:%0": [{"maxPrice": 9, "$dummy$": false}],
            "$bucket:shirts%0": {"$doc_count": 2, "$dummy$": false},
            "$bucket:shirts:colors%0": [{"$key:shirts:colors%0": "red", "$doc_count": 2}]
        }));
        let root = pre_process(&result).unwrap();
        assert_eq!(root.results["maxPrice"], Datum::Int(9));
        assert!(!root.results.contains_key(DUMMY_ALIAS));

        let GroupNode::Group(shirts) = &root.nested["shirts"] else {
            panic!("shirts should be ungrouped");
        };
        assert_eq!(shirts.doc_count("shirts").unwrap(), 2);
        assert_eq!(map(shirts, "colors").groups.len(), 1);
    }

    #[test]
    fn test_empty_bucket_is_skipped() {
        let result = object(json!({"$total_count": 0, "$bucket:a%0": []}));
        let root = pre_process(&result).unwrap();
        assert!(root.nested.is_empty());
    }

    #[test]
    fn test_unsupported_result_data() {
        let result = object(json!({"$total_count": 0, "$bucket:a%0": 5}));
        let err = pre_process(&result).unwrap_err();
        assert!(err.to_string().contains("$bucket:a%0"));
        assert!(err.to_string().contains("unsupported result data"));
    }

    #[test]
    fn test_key_gap_is_rejected() {
        let result = object(json!({
            "$total_count": 1,
            "$bucket:a%0": [{"$key:a%0": 1, "$key:a%2": 2}]
        }));
        assert!(pre_process(&result).is_err());
    }

    #[test]
    fn test_total_count_shapes() {
        assert_eq!(total_count(&object(json!({"$total_count": 5}))).unwrap(), 5);
        assert_eq!(total_count(&object(json!({"$total_count": [{"count": 7}]}))).unwrap(), 7);
        assert_eq!(total_count(&object(json!({}))).unwrap(), -1);
        assert!(total_count(&object(json!({"$total_count": "x"}))).is_err());
    }
}
