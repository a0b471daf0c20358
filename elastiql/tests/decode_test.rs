use elastiql::search;
use elastiql::QueryContext;
use serde_json::{json, Value};

fn bucket<'a>(buckets: &'a Value, key: &str) -> &'a Value {
    buckets
        .as_array()
        .unwrap()
        .iter()
        .find(|b| b["key"] == key)
        .unwrap_or_else(|| panic!("no bucket {:?} in {}", key, buckets))
}

#[test]
fn test_nested_terms_from_leaf_rows_only() {
    let ctx = QueryContext::new("products").with_source(None, "table");
    let body = json!({
        "size": 0,
        "aggs": {
            "category": {
                "terms": {"field": "category"},
                "aggs": {
                    "product": {
                        "terms": {"field": "product"},
                        "aggs": {"avgPrice": {"avg": {"field": "price"}}}
                    }
                }
            }
        }
    });
    let result = json!({
        "$total_count": 3,
        "$bucket:category:product%0": [
            {"$key:category%0": "a", "$key:category:product%0": "x", "$doc_count": 2, "avgPrice": 10.5},
            {"$key:category%0": "a", "$key:category:product%0": "y", "$doc_count": 1, "avgPrice": 4.0}
        ]
    });

    let response = search::convert(&ctx, &body, &result).unwrap();
    assert_eq!(response["hits"]["total"], json!({"value": 3, "relation": "eq"}));
    assert_eq!(response["hits"]["hits"], json!([]));

    let a = bucket(&response["aggregations"]["category"]["buckets"], "a");
    assert_eq!(a["doc_count"], 3);
    let x = bucket(&a["product"]["buckets"], "x");
    assert_eq!(x["doc_count"], 2);
    assert_eq!(x["avgPrice"]["value"], 10.5);
    let y = bucket(&a["product"]["buckets"], "y");
    assert_eq!(y["avgPrice"]["value"], 4.0);
}

#[test]
fn test_filter_bucket_doc_count() {
    let ctx = QueryContext::new("products").with_source(None, "table");
    let body = json!({"size": 0, "aggs": {"bucketTShirts": {"filter": {"term": {"type": "t-shirt"}}}}});
    let result = json!({
        "$total_count": 10,
        "$bucket:bucketTShirts%0": [{"$doc_count": 4, "$dummy$": false}]
    });
    let response = search::convert(&ctx, &body, &result).unwrap();
    assert_eq!(response["aggregations"], json!({"bucketTShirts": {"doc_count": 4}}));
    assert_eq!(response["_shards"]["successful"], 1);
    assert_eq!(response["took"], 0);
}

#[test]
fn test_total_hits_at_tracking_limit() {
    let ctx = QueryContext::new("logs").with_source(None, "logs");
    let body = json!({"size": 0, "track_total_hits": 100});
    let response = search::convert(&ctx, &body, &json!({"$total_count": 101})).unwrap();
    assert_eq!(response["hits"]["total"], json!({"value": 100, "relation": "gte"}));
}

#[test]
fn test_malformed_result() {
    let ctx = QueryContext::new("logs");
    let err = search::convert(&ctx, &json!({}), &json!([1, 2])).unwrap_err();
    assert_eq!(err.status(), 500);
}

#[test]
fn test_count_response() {
    let response = search::convert_count(&json!({"$total_count": 7})).unwrap();
    assert_eq!(response["count"], 7);
}
