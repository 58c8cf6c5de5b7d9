//! Region meshes kept in the `roimeshes` auxiliary stores, keyed by region name

use super::scope;
use crate::error::{ServiceError, ServiceResult};
use crate::secure::{AccessLevel, Caller};
use crate::storage::require_key_value;
use crate::web::server::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

pub const MESH_TYPE: &str = "roimeshes";

fn check_params(dataset: &str, roi: &str) -> ServiceResult<()> {
    if dataset.is_empty() || roi.is_empty() {
        return Err(ServiceError::bad_request("parameters not properly provided in uri"));
    }
    Ok(())
}

pub async fn get_mesh(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((dataset, roi)): Path<(String, String)>,
) -> ServiceResult<Response> {
    check_params(&dataset, &roi)?;
    state.gate.require(&caller, scope(&dataset), AccessLevel::Read)?;
    let store = state.stores.find_auxiliary(MESH_TYPE, &dataset).await?;
    let raw = require_key_value(store.as_ref())?.get(&roi).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain")], raw).into_response())
}

pub async fn set_mesh(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((dataset, roi)): Path<(String, String)>,
    body: Bytes,
) -> ServiceResult<()> {
    check_params(&dataset, &roi)?;
    state.gate.require(&caller, scope(&dataset), AccessLevel::Admin)?;
    let store = state.stores.find_auxiliary(MESH_TYPE, &dataset).await?;
    require_key_value(store.as_ref())?.set(&roi, body).await
}
