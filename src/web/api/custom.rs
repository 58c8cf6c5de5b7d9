//! Read-only custom statements, as JSON or as an Arrow stream

use super::{check_store_version, parse_request, primary_store, scope, with_debug};
use crate::error::{ServiceError, ServiceResult};
use crate::secure::{AccessLevel, Caller};
use crate::storage::{require_graph, QueryResult};
use crate::web::server::AppState;
use crate::web::streaming::arrow_response;
use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::Uri;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CustomRequest {
    pub cypher: String,
    pub dataset: String,
    pub version: Option<String>,
}

impl CustomRequest {
    pub fn parse(uri: &Uri, body: &[u8]) -> ServiceResult<Self> {
        let req: CustomRequest = parse_request(uri, body)?;
        if req.cypher.trim().is_empty() {
            return Err(ServiceError::bad_request("cypher statement not provided"));
        }
        Ok(req)
    }
}

async fn run(state: &AppState, caller: &Caller, req: &CustomRequest) -> ServiceResult<QueryResult> {
    state.gate.require(caller, scope(&req.dataset), AccessLevel::Read)?;
    let store = primary_store(state, &req.dataset)?;
    check_store_version(req.version.as_deref(), store.as_ref())?;
    require_graph(store.as_ref())?.execute(&req.cypher, true).await
}

pub async fn custom(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    uri: Uri,
    body: Bytes,
) -> ServiceResult<Response> {
    let req = CustomRequest::parse(&uri, &body)?;
    let result = run(&state, &caller, &req).await?;
    let debug = result.debug.clone();
    Ok(with_debug(Json(result), &debug))
}

pub async fn arrow(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    uri: Uri,
    body: Bytes,
) -> ServiceResult<Response> {
    let req = CustomRequest::parse(&uri, &body)?;
    let result = run(&state, &caller, &req).await?;
    let debug = result.debug.clone();
    Ok(with_debug(arrow_response(result), &debug))
}
