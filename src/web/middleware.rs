//! Request middleware: versioned path aliases, caller authentication and
//! request logging

use super::server::AppState;
use crate::error::ServiceError;
use crate::secure::{extract_token, Caller};
use axum::{
    extract::{Request, State},
    http::{uri::PathAndQuery, HeaderValue, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Version of the HTTP API, checked against `/api/v{n}` aliases
pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const INCOMPATIBLE_API: &str = "Incompatible API version";

/// Statement a handler executed, carried on the response for the request log
#[derive(Debug, Clone)]
pub struct QueryDebug(pub String);

/// Splits `/api/v{version}/rest` into the version and `/api/rest`
fn split_version(path: &str) -> Option<(&str, String)> {
    let tail = path.strip_prefix("/api/v")?;
    let (version, rest) = match tail.find('/') {
        Some(idx) => tail.split_at(idx),
        None => (tail, ""),
    };
    let numeric = !version.is_empty()
        && version.starts_with(|c: char| c.is_ascii_digit())
        && version.chars().all(|c| c.is_ascii_digit() || c == '.');
    numeric.then(|| (version, format!("/api{}", rest)))
}

fn rewritten(uri: &Uri, path: &str) -> Option<Uri> {
    let target = match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::try_from(target).ok()?);
    Uri::from_parts(parts).ok()
}

/// Maps `/api/v{n}/...` onto `/api/...` after checking `n` against the API version
///
/// Runs before routing.
pub async fn rewrite_version(mut req: Request, next: Next) -> Response {
    if let Some((version, path)) = split_version(req.uri().path()) {
        if !super::api::version_matches(version, API_VERSION) {
            return ServiceError::bad_request(INCOMPATIBLE_API).into_response();
        }
        match rewritten(req.uri(), &path) {
            Some(uri) => *req.uri_mut() = uri,
            None => return ServiceError::bad_request("malformed request path").into_response(),
        }
    }
    next.run(req).await
}

/// Resolves the caller and attaches it to the request and the response
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let token = extract_token(req.headers(), req.uri());
    let caller: Caller = state.gate.authenticate(token).await;
    req.extensions_mut().insert(caller.clone());
    let mut response = next.run(req).await;
    response.extensions_mut().insert(caller);
    response
}

/// One log event per request, with the executed statement when there is one
pub async fn log_requests(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let mut response = next.run(req).await;

    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    let status = response.status().as_u16();
    let email = response
        .extensions()
        .get::<Caller>()
        .and_then(|c| c.email())
        .unwrap_or("")
        .to_string();
    let statement = response
        .extensions()
        .get::<QueryDebug>()
        .map(|d| d.0.clone())
        .unwrap_or_default();

    if response.status().is_server_error() {
        warn!(%request_id, %method, %uri, status, latency_ms, email = %email, debug = %statement, "request failed");
    } else {
        info!(%request_id, %method, %uri, status, latency_ms, email = %email, debug = %statement, "request");
    }

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_version() {
        assert_eq!(
            split_version("/api/v0/dbmeta/version"),
            Some(("0", "/api/dbmeta/version".to_string()))
        );
        assert_eq!(
            split_version("/api/v0.6/custom/custom"),
            Some(("0.6", "/api/custom/custom".to_string()))
        );
        assert_eq!(split_version("/api/version"), None);
        assert_eq!(split_version("/api/dbmeta/version"), None);
    }

    #[test]
    fn test_rewritten_keeps_query() {
        let uri: Uri = "/api/v0/dbmeta/datasets?hidden=true".parse().unwrap();
        let out = rewritten(&uri, "/api/dbmeta/datasets").unwrap();
        assert_eq!(out.to_string(), "/api/dbmeta/datasets?hidden=true");
    }
}
