use mockito::{Matcher, Server};
use serde_json::json;

use gatehouse_core::{AuthorizationSnapshot, IndexedAuthorizationDocument, ResourceId};
use gatehouse_index::{HttpSearchIndex, IndexError, IndexOptions, SearchIndex};

fn client(url: &str) -> HttpSearchIndex {
    HttpSearchIndex::new(url, IndexOptions::default()).unwrap()
}

fn refresh() -> Matcher {
    Matcher::UrlEncoded("refresh".into(), "true".into())
}

fn document() -> IndexedAuthorizationDocument {
    AuthorizationSnapshot::new("p1", 42)
        .with_ancestors(vec![ResourceId::new("org")])
        .with_group("Anyone")
        .with_user("john")
        .into()
}

#[tokio::test]
async fn index_puts_whole_document() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("PUT", "/authorizations/_doc/p1")
        .match_query(refresh())
        .match_body(Matcher::Json(json!({
            "resourceId": "p1",
            "ancestors": ["org"],
            "groups": ["Anyone"],
            "users": ["john"],
            "updatedAt": 42
        })))
        .with_status(201)
        .with_body(r#"{"result":"created"}"#)
        .create_async()
        .await;

    client(&server.url()).index(&document()).await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn bulk_index_sends_ndjson_pairs() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/authorizations/_bulk")
        .match_query(refresh())
        .match_header("content-type", "application/x-ndjson")
        .match_body(Matcher::Regex(r#"\{"index":\{"_id":"p1"\}\}\n\{.*"resourceId":"p1".*\}\n"#.to_string()))
        .with_status(200)
        .with_body(r#"{"errors":false,"items":[{"index":{"_id":"p1","status":201}}]}"#)
        .create_async()
        .await;

    client(&server.url())
        .index_bulk(&[document()])
        .await
        .unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn bulk_item_failure_is_rejected() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/authorizations/_bulk")
        .match_query(refresh())
        .with_status(200)
        .with_body(
            r#"{"errors":true,"items":[{"index":{"_id":"p1","status":400,"error":{"type":"mapper_parsing_exception"}}}]}"#,
        )
        .create_async()
        .await;

    let err = client(&server.url())
        .index_bulk(&[document()])
        .await
        .unwrap_err();

    assert!(matches!(err, IndexError::Rejected { status: 400, .. }));
}

#[tokio::test]
async fn empty_bulk_sends_nothing() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let index = client(&server.url());
    index.index_bulk(&[]).await.unwrap();
    assert_eq!(index.delete_bulk(&[]).await.unwrap(), 0);

    mock.assert_async().await;
}

#[tokio::test]
async fn delete_of_missing_document_is_a_noop() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("DELETE", "/authorizations/_doc/ghost")
        .match_query(refresh())
        .with_status(404)
        .with_body(r#"{"result":"not_found"}"#)
        .create_async()
        .await;

    let removed = client(&server.url())
        .delete(&ResourceId::new("ghost"))
        .await
        .unwrap();

    assert!(!removed);
}

#[tokio::test]
async fn delete_descendants_queries_ancestors() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/authorizations/_delete_by_query")
        .match_query(refresh())
        .match_body(Matcher::Json(json!({ "query": { "term": { "ancestors": "p1" } } })))
        .with_status(200)
        .with_body(r#"{"deleted":3}"#)
        .create_async()
        .await;

    let removed = client(&server.url())
        .delete_descendants(&ResourceId::new("p1"))
        .await
        .unwrap();

    assert_eq!(removed, 3);
    mock.assert_async().await;
}

#[tokio::test]
async fn get_returns_source_or_none() {
    let mut server = Server::new_async().await;
    let _found = server
        .mock("GET", "/authorizations/_doc/p1")
        .with_status(200)
        .with_body(
            r#"{"_id":"p1","found":true,"_source":{"resourceId":"p1","groups":["devs"],"updatedAt":7}}"#,
        )
        .create_async()
        .await;
    let _missing = server
        .mock("GET", "/authorizations/_doc/p2")
        .with_status(404)
        .with_body(r#"{"_id":"p2","found":false}"#)
        .create_async()
        .await;
    let index = client(&server.url());

    let doc = index.get(&ResourceId::new("p1")).await.unwrap().unwrap();
    assert!(doc.groups.contains("devs"));
    assert!(doc.users.is_empty());
    assert!(doc.ancestors.is_empty());
    assert_eq!(doc.updated_at, 7);

    assert!(index.get(&ResourceId::new("p2")).await.unwrap().is_none());
}

#[tokio::test]
async fn count_reads_document_total() {
    let mut server = Server::new_async().await;
    let _count = server
        .mock("GET", "/authorizations/_count")
        .with_status(200)
        .with_body(r#"{"count":12}"#)
        .create_async()
        .await;

    assert_eq!(client(&server.url()).count().await.unwrap(), 12);
}

#[tokio::test]
async fn missing_index_counts_zero() {
    let mut server = Server::new_async().await;
    let _count = server
        .mock("GET", "/authorizations/_count")
        .with_status(404)
        .with_body(r#"{"error":{"type":"index_not_found_exception"}}"#)
        .create_async()
        .await;

    assert_eq!(client(&server.url()).count().await.unwrap(), 0);
}

#[tokio::test]
async fn ensure_index_tolerates_existing_index() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("PUT", "/authorizations")
        .with_status(400)
        .with_body(r#"{"error":{"type":"resource_already_exists_exception"}}"#)
        .create_async()
        .await;

    client(&server.url()).ensure_index().await.unwrap();
}

#[tokio::test]
async fn gateway_error_maps_to_unavailable() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("PUT", "/authorizations/_doc/p1")
        .match_query(refresh())
        .with_status(503)
        .create_async()
        .await;

    let err = client(&server.url()).index(&document()).await.unwrap_err();

    assert!(err.is_unavailable());
}

#[tokio::test]
async fn refused_connection_maps_to_unavailable() {
    let err = client("http://127.0.0.1:1")
        .index(&document())
        .await
        .unwrap_err();

    assert!(err.is_unavailable());
}
