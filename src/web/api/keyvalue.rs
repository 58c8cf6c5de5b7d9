//! Raw key-value access to an auxiliary store by instance name

use crate::error::{ServiceError, ServiceResult};
use crate::secure::{AccessLevel, Caller};
use crate::storage::{require_key_value, Store};
use crate::web::server::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

async fn instance_store(
    state: &AppState,
    caller: &Caller,
    instance: &str,
    key: &str,
    required: AccessLevel,
) -> ServiceResult<Arc<dyn Store>> {
    if instance.is_empty() || key.is_empty() {
        return Err(ServiceError::bad_request("parameters not properly provided in uri"));
    }
    let store = state.stores.instance(instance)?;
    // auxiliary stores serve a single dataset; authorize against it
    let datasets = store.datasets().await?;
    let dataset = datasets.keys().next().map(String::as_str);
    state.gate.require(caller, dataset, required)?;
    Ok(store)
}

pub async fn get_key(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((instance, key)): Path<(String, String)>,
) -> ServiceResult<Response> {
    let store = instance_store(&state, &caller, &instance, &key, AccessLevel::Read).await?;
    let raw = require_key_value(store.as_ref())?.get(&key).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], raw).into_response())
}

pub async fn set_key(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path((instance, key)): Path<(String, String)>,
    body: Bytes,
) -> ServiceResult<()> {
    let store = instance_store(&state, &caller, &instance, &key, AccessLevel::Admin).await?;
    require_key_value(store.as_ref())?.set(&key, body).await
}
