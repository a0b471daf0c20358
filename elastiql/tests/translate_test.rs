use elastiql::search::{self, SearchRequest};
use elastiql::{QueryContext, TranslateError};
use serde_json::json;

fn ctx() -> QueryContext {
    QueryContext::new("products").with_source(None, "table")
}

#[test]
fn test_filter_aggregation_counts_matching_rows() {
    let body = json!({"size": 0, "aggs": {"bucketTShirts": {"filter": {"term": {"type": "t-shirt"}}}}});
    let sql = search::translate(&ctx(), &body, false).unwrap();

    assert!(sql.starts_with(r#"WITH "$source" AS (SELECT * FROM "table" AS "$source")"#), "{}", sql);
    assert!(
        sql.contains(concat!(
            r#""$bucket:bucketTShirts%0" AS (SELECT COUNT(*) AS "$doc_count", FALSE AS "$dummy$" "#,
            r#"FROM "$source" WHERE ("$source"."type" = 't-shirt'))"#
        )),
        "{}",
        sql
    );
    assert!(sql.ends_with(r#"(SELECT * FROM "$bucket:bucketTShirts%0") AS "$bucket:bucketTShirts%0""#), "{}", sql);
}

#[test]
fn test_query_and_hits() {
    let body = json!({
        "query": {"bool": {"filter": [{"term": {"level": "error"}}]}},
        "size": 5,
        "sort": [{"ts": "asc"}]
    });
    let sql = search::translate(&ctx(), &body, false).unwrap();
    assert!(sql.contains(r#"WHERE ("$source"."level" = 'error')"#), "{}", sql);
    assert!(sql.contains(r#"(SELECT * FROM "$source" ORDER BY "$source"."ts" ASC LIMIT 5) AS "$hits""#), "{}", sql);
}

#[test]
fn test_pretty_output_is_multiline() {
    let body = json!({"aggs": {"hosts": {"terms": {"field": "host"}}}});
    let sql = search::translate(&ctx(), &body, true).unwrap();
    assert!(sql.lines().count() > 3, "{}", sql);
    assert!(sql.contains("$bucket:hosts%0"));
}

#[test]
fn test_errors_render_like_elasticsearch() {
    let err = SearchRequest::from_value(&json!({"query": {"fuzzy": {"a": "b"}}})).unwrap_err();
    assert!(matches!(err, TranslateError::Unsupported(_)));
    let body = err.to_es_body();
    assert_eq!(body["status"], 400);
    assert_eq!(body["error"]["type"], "parsing_exception");
    assert_eq!(body["error"]["root_cause"][0]["reason"], body["error"]["reason"]);
}

#[test]
fn test_count_request() {
    let sql = search::count_sql(&ctx(), &json!({"query": {"match_all": {}}}), false).unwrap();
    assert!(sql.ends_with(r#"SELECT (SELECT COUNT(*) FROM "$source") AS "$total_count""#), "{}", sql);
}

#[test]
fn test_boolean_terms_match_term() {
    let terms = search::translate(&ctx(), &json!({"size": 0, "query": {"terms": {"flag": [true]}}}), false).unwrap();
    let term = search::translate(&ctx(), &json!({"size": 0, "query": {"term": {"flag": true}}}), false).unwrap();
    assert_eq!(terms, term);
    assert!(terms.contains(r#"WHERE "$source"."flag")"#), "{}", terms);

    let err = search::translate(&ctx(), &json!({"query": {"terms": {"flag": []}}}), false).unwrap_err();
    assert!(matches!(err, TranslateError::Malformed(_)));
}
