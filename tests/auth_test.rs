//! Authentication and authorization through the full router, against a
//! fake identity service

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use connectome_http::secure::{AuthorizationGate, IdentityResolver, PermissionAuthorizer, TokenBlocklist};
use connectome_http::storage::graph::{GraphStore, DATASETS_QUERY};
use connectome_http::storage::memory::MemoryTransport;
use connectome_http::storage::value::BackendValue;
use connectome_http::storage::{Store, StoreRegistry, PRIMARY_TYPE};
use connectome_http::web::{build_router, ServiceState};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn spawn_identity_service() -> String {
    let app = Router::new().route(
        "/user/cache",
        get(|headers: HeaderMap| async move {
            let token = headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .unwrap_or_default()
                .to_string();
            match token.as_str() {
                "reader" => (
                    StatusCode::OK,
                    Json(json!({
                        "email": "reader@example.org",
                        "name": "Reader",
                        "permissions_v2": {"hemibrain": ["view"]}
                    })),
                ),
                "admin" => (
                    StatusCode::OK,
                    Json(json!({"email": "admin@example.org", "admin": true})),
                ),
                "flaky" => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))),
                _ => (StatusCode::UNAUTHORIZED, Json(json!({}))),
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn meta_row(name: &str) -> Vec<BackendValue> {
    let mut row = vec![BackendValue::Null; 10];
    row[0] = BackendValue::String(name.to_string());
    row
}

async fn secured_app(blocked: &[&str]) -> (Router, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new("memory://secured"));
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
        vec![meta_row("hemibrain"), meta_row("manc")],
    );
    transport.script("RETURN 1 AS one", &["one"], vec![vec![BackendValue::Integer(1)]]);

    let primary: Arc<dyn Store> = Arc::new(GraphStore::new(
        "primary",
        PRIMARY_TYPE,
        "0.5.0",
        "secured graph",
        transport.clone(),
    ));
    let stores = StoreRegistry::from_stores(vec![primary], Vec::new()).await.unwrap();

    let resolver = IdentityResolver::new(spawn_identity_service().await, Duration::from_secs(60)).unwrap();
    let blocklist = TokenBlocklist::new();
    for token in blocked {
        blocklist.add(*token);
    }
    let gate = AuthorizationGate::new(
        Arc::new(resolver),
        Arc::new(PermissionAuthorizer::new(HashMap::new())),
        Arc::new(blocklist),
    );
    let state = Arc::new(ServiceState::new(Arc::new(stores), gate));
    (build_router(state, None), transport)
}

fn custom(dataset: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/custom/custom")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder
        .body(Body::from(
            json!({"cypher": "RETURN 1 AS one", "dataset": dataset}).to_string(),
        ))
        .unwrap()
}

async fn error_of(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    body["Error"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let (app, _) = secured_app(&[]).await;
    let response = app.oneshot(custom("hemibrain", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_reader_scoped_to_dataset() {
    let (app, _) = secured_app(&[]).await;

    let response = app.clone().oneshot(custom("hemibrain", Some("reader"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(custom("manc", Some("reader"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_reader_cannot_write_admin_can() {
    let (app, transport) = secured_app(&[]).await;
    transport.script_mutation("CREATE (:X)", &[], Vec::new());
    let raw = |token: &str| {
        Request::builder()
            .method("POST")
            .uri("/api/raw/cypher/cypher")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::from(
                json!({"cypher": "CREATE (:X)", "dataset": "hemibrain"}).to_string(),
            ))
            .unwrap()
    };

    let response = app.clone().oneshot(raw("reader")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(transport.committed_mutations().is_empty());

    let response = app.oneshot(raw("admin")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transport.committed_mutations(), vec!["CREATE (:X)".to_string()]);
}

#[tokio::test]
async fn test_unknown_and_revoked_tokens() {
    let (app, _) = secured_app(&["admin"]).await;

    let response = app.clone().oneshot(custom("hemibrain", Some("nobody"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.oneshot(custom("hemibrain", Some("admin"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_of(response).await, "token has been revoked");
}

#[tokio::test]
async fn test_identity_service_failure_is_bad_gateway() {
    let (app, _) = secured_app(&[]).await;
    let response = app.oneshot(custom("hemibrain", Some("flaky"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(error_of(response).await, "auth service unavailable");
}

#[tokio::test]
async fn test_open_routes_need_no_token() {
    let (app, _) = secured_app(&[]).await;

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/version").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::builder().uri("/api/profile").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["AuthLevel"], json!("noauth"));
}
