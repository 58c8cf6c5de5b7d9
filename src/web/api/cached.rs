//! Cached per-dataset aggregates

use crate::cache::AggregateKind;
use crate::error::{ServiceError, ServiceResult};
use crate::secure::{AccessLevel, Caller};
use crate::web::server::AppState;
use axum::extract::{Extension, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CachedQuery {
    pub dataset: String,
}

async fn serve(
    state: &AppState,
    caller: &Caller,
    dataset: &str,
    kind: AggregateKind,
) -> ServiceResult<Json<Value>> {
    if dataset.is_empty() {
        return Err(ServiceError::bad_request("dataset not specified"));
    }
    state.gate.require(caller, Some(dataset), AccessLevel::Read)?;
    let value = state.aggregates.get_or_compute(kind, dataset).await?;
    Ok(Json(value.as_ref().clone()))
}

pub async fn roi_connectivity(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<CachedQuery>,
) -> ServiceResult<Json<Value>> {
    serve(&state, &caller, &query.dataset, AggregateKind::RoiConnectivity).await
}

pub async fn roi_completeness(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<CachedQuery>,
) -> ServiceResult<Json<Value>> {
    serve(&state, &caller, &query.dataset, AggregateKind::RoiCompleteness).await
}

pub async fn daily_type(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<CachedQuery>,
) -> ServiceResult<Json<Value>> {
    serve(&state, &caller, &query.dataset, AggregateKind::DailyType).await
}
