//! Named analytic queries used by the explorer front end
//!
//! Every endpoint accepts its parameters as a JSON body (POST) or a query
//! string (GET) and answers with a tabular result.

use super::{parse_request, primary_store, scope, with_debug};
use crate::cypher::explorer::{self as queries, DatasetParam};
use crate::error::ServiceResult;
use crate::secure::{AccessLevel, Caller};
use crate::storage::require_graph;
use crate::web::server::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::Uri;
use axum::response::Response;
use axum::Json;
use serde::de::DeserializeOwned;

async fn run<P, F>(
    state: &AppState,
    caller: &Caller,
    uri: &Uri,
    body: &[u8],
    build: F,
) -> ServiceResult<Response>
where
    P: DeserializeOwned + DatasetParam,
    F: FnOnce(&P) -> ServiceResult<String>,
{
    let params: P = parse_request(uri, body)?;
    state
        .gate
        .require(caller, scope(params.dataset()), AccessLevel::Read)?;
    let statement = build(&params)?;
    let store = primary_store(state, params.dataset())?;
    let result = require_graph(store.as_ref())?.execute(&statement, true).await?;
    Ok(with_debug(Json(result), &statement))
}

macro_rules! explorer_endpoint {
    ($name:ident, $params:ty, $build:expr) => {
        pub async fn $name(
            State(state): State<AppState>,
            Extension(caller): Extension<Caller>,
            uri: Uri,
            body: Bytes,
        ) -> ServiceResult<Response> {
            run::<$params, _>(&state, &caller, &uri, &body, $build).await
        }
    };
}

explorer_endpoint!(find_neurons, queries::FindNeuronsParams, |p: &queries::FindNeuronsParams| {
    Ok(queries::find_neurons(p))
});

explorer_endpoint!(neuron_meta, queries::DatasetParams, |_: &queries::DatasetParams| {
    Ok(queries::NEURON_META_QUERY.to_string())
});

explorer_endpoint!(neuron_meta_vals, queries::MetaValParams, queries::neuron_meta_vals);

explorer_endpoint!(roi_connectivity, queries::DatasetParams, |_: &queries::DatasetParams| {
    Ok(queries::ROI_QUERY.to_string())
});

explorer_endpoint!(ranked_table, queries::ConnectionsParams, queries::ranked_table);

explorer_endpoint!(simple_connections, queries::ConnectionsParams, queries::simple_connections);

explorer_endpoint!(rois_in_neuron, queries::NeuronNameParams, queries::rois_in_neuron);

explorer_endpoint!(common_connectivity, queries::CommonConnectivityParams, queries::common_connectivity);

explorer_endpoint!(autapses, queries::DatasetParams, |_: &queries::DatasetParams| {
    Ok(queries::AUTAPSES_QUERY.to_string())
});

explorer_endpoint!(distribution, queries::DistributionParams, queries::distribution);

explorer_endpoint!(completeness, queries::CompletenessParams, |p: &queries::CompletenessParams| {
    Ok(queries::completeness(p))
});
