//! End-to-end tests of the HTTP surface against scripted stores
//!
//! Run with: `cargo test --test api_test`

use arrow::datatypes::DataType;
use arrow::ipc::reader::StreamReader;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use connectome_http::secure::AuthorizationGate;
use connectome_http::storage::graph::{GraphStore, DATASETS_QUERY};
use connectome_http::storage::local::LocalKvStore;
use connectome_http::storage::memory::MemoryTransport;
use connectome_http::storage::value::BackendValue;
use connectome_http::storage::{Store, StoreRegistry, PRIMARY_TYPE};
use connectome_http::web::{build_router, ServiceState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn text(s: &str) -> BackendValue {
    BackendValue::String(s.to_string())
}

fn meta_row(name: &str, hidden: Option<BackendValue>) -> Vec<BackendValue> {
    vec![
        text(name),
        BackendValue::Null,
        text("2021-03-01"),
        text(r#"{"EB":{"pre":10,"post":20},"FB":{"pre":5,"post":7}}"#),
        BackendValue::Null,
        BackendValue::List(vec![text("EB"), text("FB")]),
        BackendValue::Null,
        hidden.unwrap_or(BackendValue::Null),
        BackendValue::Null,
        BackendValue::Null,
    ]
}

fn graph_transport(rows: Vec<Vec<BackendValue>>) -> Arc<MemoryTransport> {
    let transport = Arc::new(MemoryTransport::new("memory://hemibrain"));
    transport.script(
        DATASETS_QUERY,
        &[
            "m.dataset",
            "m.uuid",
            "m.lastDatabaseEdit",
            "m.roiInfo",
            "m.info",
            "rois",
            "tag",
            "hidden",
            "m.logo",
            "m.description",
        ],
        rows,
    );
    transport
}

async fn app_with(
    transport: Arc<MemoryTransport>,
    auxiliary: Vec<Arc<dyn Store>>,
    gate: AuthorizationGate,
) -> Router {
    let primary: Arc<dyn Store> = Arc::new(GraphStore::new(
        "primary",
        PRIMARY_TYPE,
        "0.5.0",
        "scripted graph",
        transport,
    ));
    let stores = StoreRegistry::from_stores(vec![primary], auxiliary)
        .await
        .unwrap();
    build_router(Arc::new(ServiceState::new(Arc::new(stores), gate)), None)
}

async fn open_app(transport: Arc<MemoryTransport>) -> Router {
    app_with(transport, Vec::new(), AuthorizationGate::disabled()).await
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn keys(value: &Value) -> Vec<String> {
    let mut keys: Vec<String> = value.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    keys
}

#[tokio::test]
async fn test_large_integer_survives_custom_query() {
    let transport = graph_transport(vec![meta_row("hemibrain", None)]);
    let statement = "RETURN 36028797018963969 AS n";
    transport.script(
        statement,
        &["n"],
        vec![vec![BackendValue::Number("36028797018963969".to_string())]],
    );
    let app = open_app(transport).await;

    let response = app
        .oneshot(post_json(
            "/api/custom/custom",
            json!({"cypher": statement, "dataset": "hemibrain"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let raw = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(raw.contains("36028797018963969"));
    let body: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(
        body,
        json!({"columns": ["n"], "data": [[36028797018963969i64]], "debug": statement})
    );
}

#[tokio::test]
async fn test_mutation_in_read_only_query_is_rejected() {
    let transport = graph_transport(vec![meta_row("hemibrain", None)]);
    let statement = "CREATE (:X) RETURN 1 AS one";
    transport.script_mutation(statement, &["one"], vec![vec![BackendValue::Integer(1)]]);
    let app = open_app(transport.clone()).await;

    let response = app
        .oneshot(post_json(
            "/api/custom/custom",
            json!({"cypher": statement, "dataset": "hemibrain"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"Error": "not authorized to modify the database"})
    );
    assert!(transport.committed_mutations().is_empty());
}

#[tokio::test]
async fn test_raw_cypher_may_mutate() {
    let transport = graph_transport(vec![meta_row("hemibrain", None)]);
    let statement = "CREATE (:X) RETURN 1 AS one";
    transport.script_mutation(statement, &["one"], vec![vec![BackendValue::Integer(1)]]);
    let app = open_app(transport.clone()).await;

    let response = app
        .oneshot(post_json(
            "/api/raw/cypher/cypher",
            json!({"cypher": statement, "dataset": "hemibrain"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transport.committed_mutations(), vec![statement.to_string()]);
}

#[tokio::test]
async fn test_hidden_datasets_filter() {
    let transport = graph_transport(vec![
        meta_row("A", Some(BackendValue::Boolean(false))),
        meta_row("B", Some(BackendValue::Boolean(true))),
        meta_row("C", None),
    ]);
    let app = open_app(transport).await;

    let response = app.clone().oneshot(get("/api/dbmeta/datasets")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(keys(&body_json(response).await), vec!["A", "C"]);

    let response = app.oneshot(get("/api/dbmeta/datasets?hidden=true")).await.unwrap();
    assert_eq!(keys(&body_json(response).await), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_hidden_flag_not_boolean() {
    let transport = graph_transport(vec![meta_row("A", None)]);
    let app = open_app(transport).await;

    let response = app.oneshot(get("/api/dbmeta/datasets?hidden=yes")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"Error": "request object not formatted correctly"})
    );
}

#[tokio::test]
async fn test_non_boolean_hidden_names_dataset() {
    let transport = graph_transport(vec![
        meta_row("A", None),
        meta_row("broken", Some(text("yes"))),
    ]);
    let app = open_app(transport).await;

    let response = app.oneshot(get("/api/dbmeta/datasets")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert!(body["Error"].as_str().unwrap().contains("broken"));
}

#[tokio::test]
async fn test_skeleton_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let skeletons: Arc<dyn Store> =
        Arc::new(LocalKvStore::open("hemibrain-skeletons", "skeletons", "hemibrain", dir.path()).unwrap());
    let transport = graph_transport(vec![meta_row("hemibrain", None)]);
    let app = app_with(transport, vec![skeletons], AuthorizationGate::disabled()).await;

    let swc = "1 0 10.5 20.5 30.5 1.5 -1\n2 0 11 21 31 1.5 1\n";
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/skeletons/skeleton/hemibrain/5813105172")
                .body(Body::from(swc))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get("/api/skeletons/skeleton/hemibrain/5813105172"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({
            "columns": ["rowId", "x", "y", "z", "radius", "link"],
            "data": [[1, 10.5, 20.5, 30.5, 1.5, -1], [2, 11.0, 21.0, 31.0, 1.5, 1]]
        })
    );

    let response = app
        .clone()
        .oneshot(get("/api/skeletons/skeleton/hemibrain/5813105172?format=swc"))
        .await
        .unwrap();
    assert_eq!(body_bytes(response).await, swc.as_bytes());

    let response = app
        .oneshot(get("/api/skeletons/skeleton/hemibrain/notanumber"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_version_mismatch() {
    let transport = graph_transport(vec![meta_row("hemibrain", None)]);
    transport.script("RETURN 1", &["1"], vec![vec![BackendValue::Integer(1)]]);
    let app = open_app(transport).await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/custom/custom",
            json!({"version": "0.6", "cypher": "RETURN 1", "dataset": "hemibrain"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["Error"].as_str().unwrap().contains("0.6"));

    let response = app
        .oneshot(post_json(
            "/api/custom/custom",
            json!({"version": "0.5", "cypher": "RETURN 1", "dataset": "hemibrain"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_version_in_query_string() {
    let transport = graph_transport(vec![meta_row("hemibrain", None)]);
    transport.script("RETURN 1 AS one", &["one"], vec![vec![BackendValue::Integer(1)]]);
    let app = open_app(transport).await;

    let response = app
        .oneshot(get(
            "/api/custom/custom?cypher=RETURN%201%20AS%20one&dataset=hemibrain&version=0.5",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"], json!([[1]]));
}

#[tokio::test]
async fn test_arrow_stream() {
    let transport = graph_transport(vec![meta_row("hemibrain", None)]);
    let statement = "MATCH (n :Neuron) RETURN n.bodyId AS id, n.type AS name, n.pre AS count, n.active AS active";
    let row = |id: i64, name: &str, count: i64, active: bool| {
        vec![
            BackendValue::Integer(id),
            text(name),
            BackendValue::Integer(count),
            BackendValue::Boolean(active),
        ]
    };
    transport.script(
        statement,
        &["id", "name", "count", "active"],
        vec![row(1, "KC", 10, true), row(2, "MBON", 0, false), row(3, "PN", 7, true)],
    );
    let app = open_app(transport).await;

    let response = app
        .oneshot(post_json(
            "/api/custom/arrow",
            json!({"cypher": statement, "dataset": "hemibrain"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/vnd.apache.arrow.stream"
    );

    let bytes = body_bytes(response).await;
    let reader = StreamReader::try_new(std::io::Cursor::new(bytes), None).unwrap();
    let schema = reader.schema();
    let types: Vec<(String, DataType)> = schema
        .fields()
        .iter()
        .map(|f| (f.name().clone(), f.data_type().clone()))
        .collect();
    assert_eq!(
        types,
        vec![
            ("id".to_string(), DataType::Int64),
            ("name".to_string(), DataType::Utf8),
            ("count".to_string(), DataType::Int64),
            ("active".to_string(), DataType::Boolean),
        ]
    );
    let batches: Vec<_> = reader.map(|b| b.unwrap()).collect();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].num_rows(), 3);
}

#[tokio::test]
async fn test_versioned_alias() {
    let transport = graph_transport(vec![meta_row("hemibrain", None)]);
    let app = open_app(transport).await;

    let response = app.clone().oneshot(get("/api/v0/dbmeta/version")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"Version": "0.5.0"}));

    let response = app.clone().oneshot(get("/api/v9/dbmeta/version")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(get("/api/version")).await.unwrap();
    assert_eq!(
        body_json(response).await,
        json!({"Version": env!("CARGO_PKG_VERSION")})
    );
}

#[tokio::test]
async fn test_available_lists_routes() {
    let transport = graph_transport(vec![meta_row("hemibrain", None)]);
    let app = open_app(transport).await;

    let response = app.oneshot(get("/api/available")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let routes = body_json(response).await;
    let listed: Vec<&str> = routes
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["path"].as_str())
        .collect();
    assert!(listed.contains(&"/api/custom/custom"));
    assert!(listed.contains(&"/api/v:ver/custom/custom"));
    assert!(listed.contains(&"/api/npexplorer/findneurons"));
}

#[tokio::test]
async fn test_explorer_query_string() {
    let transport = graph_transport(vec![meta_row("hemibrain", None)]);
    let statement = connectome_http::cypher::explorer::AUTAPSES_QUERY;
    transport.script(statement, &["id", "weight"], vec![vec![BackendValue::Integer(7), BackendValue::Integer(3)]]);
    let app = open_app(transport).await;

    let response = app
        .oneshot(get("/api/npexplorer/autapses?dataset=hemibrain"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"], json!([[7, 3]]));
}

#[tokio::test]
async fn test_transaction_lifecycle() {
    let transport = graph_transport(vec![meta_row("hemibrain", None)]);
    let statement = "CREATE (:X {name: 'a'})";
    transport.script_mutation(statement, &[], Vec::new());
    let app = open_app(transport.clone()).await;

    let response = app
        .clone()
        .oneshot(post_json("/api/raw/cypher/transaction", json!({"dataset": "hemibrain"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let id = body_json(response).await["transaction_id"].as_u64().unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/raw/cypher/transaction/{}/cypher", id),
            json!({"cypher": statement}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(transport.committed_mutations().is_empty());

    let response = app
        .clone()
        .oneshot(post_json(&format!("/api/raw/cypher/transaction/{}/commit", id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transport.committed_mutations(), vec![statement.to_string()]);

    let response = app
        .oneshot(post_json(&format!("/api/raw/cypher/transaction/{}/kill", id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
