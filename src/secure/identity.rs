//! Caller identities resolved through the external identity service
//!
//! Validated identities are cached per token for a fixed TTL. Concurrent
//! misses on the same token may each call the service.

use crate::error::{ServiceError, ServiceResult};
use axum::extract::Query;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Cookie and query parameter carrying the credential
pub const TOKEN_NAME: &str = "dsg_token";

pub const IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

/// A caller as described by the identity service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub id: i64,
    pub email: String,
    pub name: String,
    /// Global administrator across every dataset
    pub admin: bool,
    pub groups: Vec<String>,
    /// Dataset slug to role tokens
    pub permissions_v2: HashMap<String, Vec<String>>,
    pub datasets_admin: Vec<String>,
}

impl Identity {
    pub fn roles_for(&self, slug: &str) -> &[String] {
        self.permissions_v2
            .get(slug)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    const PREFIX: &str = "bearer ";
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    if raw.len() > PREFIX.len() && raw[..PREFIX.len()].eq_ignore_ascii_case(PREFIX) {
        let token = raw[PREFIX.len()..].trim();
        (!token.is_empty()).then(|| token.to_string())
    } else {
        None
    }
}

fn cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_NAME && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn query_param(uri: &Uri) -> Option<String> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    params.get(TOKEN_NAME).filter(|t| !t.is_empty()).cloned()
}

/// Credential presented with a request: bearer header, then cookie, then
/// query parameter
pub fn extract_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    bearer(headers)
        .or_else(|| cookie(headers))
        .or_else(|| query_param(uri))
}

struct CachedIdentity {
    identity: Arc<Identity>,
    fetched: Instant,
}

/// Validates tokens against `{base}/user/cache`
pub struct IdentityResolver {
    base_url: String,
    ttl: Duration,
    client: reqwest::Client,
    cache: DashMap<String, CachedIdentity>,
}

impl IdentityResolver {
    pub fn new(base_url: impl Into<String>, ttl: Duration) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(IDENTITY_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::config(format!("cannot build identity client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ttl,
            client,
            cache: DashMap::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Where browsers are sent to sign in
    pub fn authorize_url(&self, redirect: &str) -> String {
        format!("{}/authorize?redirect={}", self.base_url, redirect)
    }

    fn cached(&self, token: &str) -> Option<Arc<Identity>> {
        let hit = self.cache.get(token).map(|entry| {
            (entry.fetched.elapsed() < self.ttl).then(|| entry.identity.clone())
        });
        match hit {
            Some(Some(identity)) => Some(identity),
            Some(None) => {
                self.cache.remove(token);
                None
            }
            None => None,
        }
    }

    /// `Ok(None)` when the service rejects the token
    pub async fn resolve(&self, token: &str) -> ServiceResult<Option<Arc<Identity>>> {
        if let Some(identity) = self.cached(token) {
            return Ok(Some(identity));
        }

        let url = format!("{}/user/cache", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ServiceError::identity_unavailable(format!("unreachable: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            debug!(status = status.as_u16(), "identity service rejected token");
            return Ok(None);
        }
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "unexpected identity service reply");
            return Err(ServiceError::identity_unavailable(format!(
                "unexpected status {}: {}",
                status.as_u16(),
                body
            )));
        }

        let identity: Identity = response
            .json()
            .await
            .map_err(|e| ServiceError::identity_unavailable(format!("failed to decode response: {}", e)))?;
        let identity = Arc::new(identity);
        self.cache.insert(
            token.to_string(),
            CachedIdentity {
                identity: identity.clone(),
                fetched: Instant::now(),
            },
        );
        Ok(Some(identity))
    }

    /// Drops a token's cached identity
    pub fn evict(&self, token: &str) -> bool {
        self.cache.remove(token).is_some()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}
