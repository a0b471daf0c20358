use std::collections::BTreeSet;

use elastiql::aggs::{parse_aggregations, pre_process, process_aggregations, GenerateContext, Generator};
use elastiql::literal::Literal;
use elastiql::mapping::{FieldRef, TypeMapping};
use elastiql::naming::{bucket_alias, key_alias, split_with_prefix, BUCKET_PREFIX, KEY_PREFIX};
use elastiql::QueryContext;
use proptest::prelude::*;
use serde_json::{json, Map, Value};

/// One level of a nested aggregation chain: its name and whether it groups
type Level = (String, bool);

fn nested_body(levels: &[Level]) -> Value {
    let mut aggs = Map::new();
    for (name, grouped) in levels.iter().rev() {
        let mut node = if *grouped {
            json!({"terms": {"field": name}})
        } else {
            let mut term = Map::new();
            term.insert(name.clone(), json!("k"));
            json!({"filter": {"term": term}})
        };
        if !aggs.is_empty() {
            node["aggs"] = Value::Object(std::mem::take(&mut aggs));
        }
        aggs.insert(name.clone(), node);
    }
    Value::Object(aggs)
}

/// Bucket path of every level, outermost first
fn level_paths(levels: &[Level]) -> Vec<String> {
    let mut paths: Vec<String> = Vec::with_capacity(levels.len());
    for (name, _) in levels {
        let path = match paths.last() {
            Some(parent) => format!("{}:{}", parent, name),
            None => name.clone(),
        };
        paths.push(path);
    }
    paths
}

proptest! {
    #[test]
    fn prop_aliases_round_trip(name in "[a-zA-Z_][a-zA-Z0-9_:%]{0,24}", index in 0usize..64) {
        let key = key_alias(&name, index);
        prop_assert_eq!(split_with_prefix(KEY_PREFIX, &key), Some((name.as_str(), index)));
        let bucket = bucket_alias(&name, index);
        prop_assert_eq!(split_with_prefix(BUCKET_PREFIX, &bucket), Some((name.as_str(), index)));
    }

    #[test]
    fn prop_field_resolution_is_idempotent(parts in prop::collection::vec("[a-z]{1,8}", 1..4)) {
        let ctx = QueryContext::new("i")
            .with_mapping("tags", TypeMapping::new("list"))
            .with_mapping("msg", TypeMapping::new("text").with_field("raw", "keyword"));
        let name = parts.join(".");
        let first = FieldRef::resolve(&ctx, &name);
        let second = FieldRef::resolve(&ctx, &name);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(FieldRef::resolve(&ctx, &first.key).key, first.key);
    }

    #[test]
    fn prop_string_literals_are_quoted(text in ".{0,32}") {
        let rendered = Literal::String(text.clone()).to_string();
        prop_assert!(rendered.starts_with('\'') && rendered.ends_with('\''));
        let inner = &rendered[1..rendered.len() - 1];
        prop_assert_eq!(inner.replace("''", "'"), text);
    }

    #[test]
    fn prop_integer_literals_render_plainly(n in any::<i64>()) {
        prop_assert_eq!(Literal::Int(n).to_string(), n.to_string());
    }

    #[test]
    fn prop_nested_buckets_decode_along_their_paths(
        levels in prop::collection::vec(("[a-z]{1,6}", any::<bool>()), 1..5)
    ) {
        let ctx = QueryContext::new("i");
        let aggs = parse_aggregations(&nested_body(&levels)).unwrap();
        let gen = Generator::new(&ctx);
        let selects = GenerateContext::root(&gen, &aggs).transform().unwrap();

        let paths = level_paths(&levels);
        let generated: BTreeSet<&str> = selects
            .iter()
            .filter_map(|(alias, _)| split_with_prefix(BUCKET_PREFIX, alias))
            .map(|(path, _)| path)
            .filter(|path| !path.is_empty())
            .collect();
        let expected: BTreeSet<&str> = paths.iter().map(String::as_str).collect();
        prop_assert_eq!(&generated, &expected);
        prop_assert!(selects.iter().any(|(alias, _)| *alias == bucket_alias(&paths[paths.len() - 1], 0)));

        // one row per select, keyed the way the engine answers
        let mut result = Map::new();
        result.insert("$total_count".to_string(), json!(1));
        for (alias, _) in &selects {
            let Some((path, _)) = split_with_prefix(BUCKET_PREFIX, alias) else { continue };
            if path.is_empty() {
                continue;
            }
            let depth = path.split(':').count();
            let mut row = Map::new();
            for ((_, grouped), prefix) in levels.iter().zip(&paths).take(depth) {
                if *grouped {
                    row.insert(key_alias(prefix, 0), json!("k"));
                }
            }
            row.insert("$doc_count".to_string(), json!(1));
            result.insert(alias.clone(), json!([row]));
        }

        let root = pre_process(&result).unwrap();
        let decoded = serde_json::to_value(process_aggregations(&ctx, &aggs, Some(&root), 1).unwrap()).unwrap();

        let mut current = &decoded;
        for (name, grouped) in &levels {
            let node = &current[name.as_str()];
            if *grouped {
                let buckets = node["buckets"].as_array().cloned().unwrap_or_default();
                prop_assert_eq!(buckets.len(), 1, "{} should hold one bucket in {}", name, decoded);
                prop_assert_eq!(&node["buckets"][0]["key"], &json!("k"));
                prop_assert_eq!(&node["buckets"][0]["doc_count"], &json!(1));
                current = &node["buckets"][0];
            } else {
                prop_assert_eq!(&node["doc_count"], &json!(1), "{} should be a single bucket in {}", name, decoded);
                current = node;
            }
        }
    }
}
