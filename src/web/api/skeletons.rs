//! Neuron skeletons kept in the `skeletons` auxiliary stores as SWC text

use super::scope;
use crate::error::{ServiceError, ServiceResult};
use crate::secure::{AccessLevel, Caller};
use crate::storage::require_key_value;
use crate::swc::parse_swc;
use crate::web::server::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

pub const SKELETON_TYPE: &str = "skeletons";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SkeletonQuery {
    pub format: String,
}

fn skeleton_key(dataset: &str, id: &str) -> ServiceResult<String> {
    if dataset.is_empty() || id.is_empty() {
        return Err(ServiceError::bad_request("parameters not properly provided in uri"));
    }
    let body_id: i64 = id
        .parse()
        .map_err(|_| ServiceError::bad_request("body id should be an integer"))?;
    Ok(format!("{}_swc", body_id))
}

pub async fn get_skeleton(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((dataset, id)): Path<(String, String)>,
    Query(query): Query<SkeletonQuery>,
) -> ServiceResult<Response> {
    let key = skeleton_key(&dataset, &id)?;
    state.gate.require(&caller, scope(&dataset), AccessLevel::Read)?;
    let store = state.stores.find_auxiliary(SKELETON_TYPE, &dataset).await?;
    let raw = require_key_value(store.as_ref())?.get(&key).await?;

    if query.format == "swc" {
        return Ok(([(header::CONTENT_TYPE, "text/plain")], raw).into_response());
    }
    Ok(Json(parse_swc(&raw)?).into_response())
}

pub async fn set_skeleton(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((dataset, id)): Path<(String, String)>,
    body: Bytes,
) -> ServiceResult<()> {
    let key = skeleton_key(&dataset, &id)?;
    state.gate.require(&caller, scope(&dataset), AccessLevel::Admin)?;
    let store = state.stores.find_auxiliary(SKELETON_TYPE, &dataset).await?;
    require_key_value(store.as_ref())?.set(&key, body).await
}
