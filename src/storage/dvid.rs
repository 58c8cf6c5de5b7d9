//! Remote key-value store reached over DVID's HTTP key API

use crate::error::{ServiceError, ServiceResult};
use crate::storage::registry::{config_str, Engine, EngineContext};
use crate::storage::{Descriptors, KeyValue, Store};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use std::sync::Arc;

pub const ENGINE_NAME: &str = "dvidkv";
pub const VERSION: &str = "0.1.0";

#[derive(Debug, Clone)]
pub struct DvidConfig {
    pub dataset: String,
    pub server: String,
    pub branch: String,
    pub instance: String,
    pub token: Option<String>,
}

impl DvidConfig {
    pub fn from_value(value: &Value) -> ServiceResult<Self> {
        Ok(Self {
            dataset: config_str(value, ENGINE_NAME, "dataset")?,
            server: config_str(value, ENGINE_NAME, "server")?,
            branch: config_str(value, ENGINE_NAME, "branch")?,
            instance: config_str(value, ENGINE_NAME, "instance")?,
            token: value
                .get("token")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        })
    }

    fn endpoint(&self) -> String {
        let server = self.server.trim_end_matches('/');
        let server = if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("http://{}", server)
        };
        format!("{}/api/node/{}/{}/key/", server, self.branch, self.instance)
    }
}

pub struct DvidKvStore {
    instance: String,
    type_tag: String,
    config: DvidConfig,
    endpoint: Url,
    client: Client,
}

impl DvidKvStore {
    pub fn new(
        instance: impl Into<String>,
        type_tag: impl Into<String>,
        config: DvidConfig,
        ctx: &EngineContext,
    ) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(ctx.timeout)
            .build()
            .map_err(|e| ServiceError::config(format!("cannot build dvid client: {}", e)))?;
        let endpoint = Url::parse(&config.endpoint())
            .map_err(|e| ServiceError::config(format!("invalid dvid server {}: {}", config.server, e)))?;
        Ok(Self {
            instance: instance.into(),
            type_tag: type_tag.into(),
            endpoint,
            config,
            client,
        })
    }

    /// URL of one key, with the key escaped as a single path segment
    fn key_url(&self, key: &str) -> ServiceResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ServiceError::config(format!("invalid dvid server {}", self.config.server)))?
            .pop_if_empty()
            .push(key);
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl Store for DvidKvStore {
    fn instance(&self) -> &str {
        &self.instance
    }

    fn type_tag(&self) -> &str {
        &self.type_tag
    }

    fn version(&self) -> &str {
        VERSION
    }

    fn database(&self) -> (String, String) {
        (self.config.server.clone(), ENGINE_NAME.to_string())
    }

    async fn datasets(&self) -> ServiceResult<Descriptors> {
        let mut out = Descriptors::new();
        out.insert(
            self.config.dataset.clone(),
            json!({ "branch": self.config.branch, "instance": self.config.instance }),
        );
        Ok(out)
    }

    fn key_value(&self) -> Option<&dyn KeyValue> {
        Some(self)
    }
}

#[async_trait]
impl KeyValue for DvidKvStore {
    async fn get(&self, key: &str) -> ServiceResult<Bytes> {
        let url = self.key_url(key)?;
        let response = self.authorized(self.client.get(url)).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status == StatusCode::NOT_FOUND {
            return Err(ServiceError::key_not_found(key));
        }
        if !status.is_success() {
            let message = String::from_utf8_lossy(&body).trim().to_string();
            return Err(ServiceError::backend_unavailable(if message.is_empty() {
                format!("dvid returned {}", status)
            } else {
                message
            }));
        }
        Ok(body)
    }

    async fn set(&self, key: &str, value: Bytes) -> ServiceResult<()> {
        let url = self.key_url(key)?;
        let response = self.authorized(self.client.post(url)).body(value).send().await?;
        if !response.status().is_success() {
            return Err(ServiceError::backend_unavailable(format!(
                "dvid returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

pub struct DvidKvEngine;

impl Engine for DvidKvEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn new_store(
        &self,
        instance: &str,
        type_tag: &str,
        config: &Value,
        ctx: &EngineContext,
    ) -> ServiceResult<Arc<dyn Store>> {
        let settings = DvidConfig::from_value(config)?;
        Ok(Arc::new(DvidKvStore::new(instance, type_tag, settings, ctx)?))
    }
}
