//! Database and dataset metadata

use super::parse_request;
use crate::error::ServiceResult;
use crate::secure::{AccessLevel, Caller};
use crate::storage::Descriptors;
use crate::web::server::AppState;
use axum::extract::{Extension, State};
use axum::http::Uri;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DbVersion {
    pub version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DbDatabase {
    pub location: String,
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatasetsQuery {
    pub hidden: bool,
}

pub async fn version(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ServiceResult<Json<DbVersion>> {
    state.gate.require(&caller, None, AccessLevel::Read)?;
    Ok(Json(DbVersion {
        version: state.stores.main().version().to_string(),
    }))
}

pub async fn database(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ServiceResult<Json<DbDatabase>> {
    state.gate.require(&caller, None, AccessLevel::Read)?;
    let (location, description) = state.stores.main().database();
    Ok(Json(DbDatabase {
        location,
        description,
    }))
}

/// Descriptors of every dataset; `?hidden=true` includes hidden ones
pub async fn datasets(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    uri: Uri,
) -> ServiceResult<Json<Descriptors>> {
    state.gate.require(&caller, None, AccessLevel::Read)?;
    let query: DatasetsQuery = parse_request(&uri, b"")?;
    Ok(Json(state.catalog.datasets(query.hidden).await?))
}
