//! Graph transport speaking the graph database's HTTP transactional protocol
//!
//! Begin opens a transaction with an empty statement list, run posts one
//! statement into it, commit and rollback finalize it. Replies are decoded
//! with arbitrary-precision numbers, so numeric literals stay as text until
//! the normalizer looks at them.

use crate::error::{ServiceError, ServiceResult};
use crate::storage::graph::GraphStore;
use crate::storage::registry::{Engine, EngineContext};
use crate::storage::transport::{
    AccessMode, ConnectionPool, GraphTransport, StatementResult, TransactionHandle,
};
use crate::storage::value::BackendValue;
use crate::storage::Store;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Engine name used in configuration files
pub const ENGINE_NAME: &str = "neuPrint-neo4j";

/// Data-model version served by this engine
pub const DATA_MODEL_VERSION: &str = "0.5.0";

/// Connection settings taken from `engine-config`
#[derive(Debug, Clone, PartialEq)]
pub struct Neo4jConfig {
    pub server: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Neo4jConfig {
    pub fn from_value(value: &Value) -> ServiceResult<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| ServiceError::config("incorrect configuration for neo4j"))?;
        let field = |name: &str| -> ServiceResult<String> {
            map.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ServiceError::config(format!("{} not specified for neo4j", name)))
        };
        let database = map
            .get("database")
            .and_then(Value::as_str)
            .unwrap_or("neo4j")
            .to_string();

        Ok(Self {
            server: field("server")?,
            user: field("user")?,
            password: field("password")?,
            database,
        })
    }

    /// Server base URL with a scheme and no trailing slash
    pub fn base_url(&self) -> String {
        let server = self.server.trim_end_matches('/');
        if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("http://{}", server)
        }
    }
}

#[derive(Debug, Deserialize)]
struct TxReply {
    #[serde(default)]
    commit: Option<String>,
    #[serde(default)]
    results: Vec<TxStatementReply>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxStatementReply {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<TxRow>,
    #[serde(default)]
    stats: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    #[serde(default)]
    row: Vec<Value>,
    #[serde(default)]
    meta: Vec<Value>,
    #[serde(default)]
    graph: Option<TxGraph>,
}

#[derive(Debug, Default, Deserialize)]
struct TxGraph {
    #[serde(default)]
    relationships: Vec<TxRelationship>,
}

#[derive(Debug, Clone, Deserialize)]
struct TxRelationship {
    id: String,
    #[serde(rename = "type")]
    rel_type: String,
    #[serde(rename = "startNode")]
    start_node: String,
    #[serde(rename = "endNode")]
    end_node: String,
}

#[derive(Debug, Deserialize)]
struct TxError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl TxReply {
    fn into_result(self) -> ServiceResult<Self> {
        match self.errors.first() {
            Some(err) => Err(ServiceError::query_with_code(&err.message, &err.code)),
            None => Ok(self),
        }
    }
}

/// Decodes reply cells using the column metadata the backend sends along
struct CellDecoder {
    relationships: HashMap<String, TxRelationship>,
}

impl CellDecoder {
    fn new(graph: Option<TxGraph>) -> Self {
        let relationships = graph
            .unwrap_or_default()
            .relationships
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        Self { relationships }
    }

    fn decode(&self, value: Value, meta: &Value) -> BackendValue {
        match meta {
            Value::Object(m) => match m.get("type").and_then(Value::as_str) {
                Some("node") => BackendValue::Node {
                    properties: self.properties(value),
                },
                Some("relationship") => {
                    let id = meta_id(meta);
                    self.relationship(id, value)
                }
                Some("point") => point(value),
                _ => plain(value),
            },
            Value::Array(metas) => match value {
                Value::Array(items) if is_path(metas) && items.len() == metas.len() => {
                    let mut nodes = Vec::new();
                    let mut relationships = Vec::new();
                    for (i, (item, m)) in items.into_iter().zip(metas.iter()).enumerate() {
                        let decoded = self.decode(item, m);
                        if i % 2 == 0 {
                            nodes.push(decoded);
                        } else {
                            relationships.push(decoded);
                        }
                    }
                    BackendValue::Path {
                        nodes,
                        relationships,
                    }
                }
                Value::Array(items) => BackendValue::List(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, item)| self.decode(item, metas.get(i).unwrap_or(&Value::Null)))
                        .collect(),
                ),
                other => plain(other),
            },
            _ => plain(value),
        }
    }

    fn properties(&self, value: Value) -> BTreeMap<String, BackendValue> {
        match value {
            Value::Object(map) => map.into_iter().map(|(k, v)| (k, plain(v))).collect(),
            _ => BTreeMap::new(),
        }
    }

    fn relationship(&self, id: i64, value: Value) -> BackendValue {
        let (rel_type, start, end) = match self.relationships.get(&id.to_string()) {
            Some(r) => (
                r.rel_type.clone(),
                r.start_node.parse().unwrap_or_default(),
                r.end_node.parse().unwrap_or_default(),
            ),
            None => (String::new(), 0, 0),
        };
        BackendValue::Relationship {
            id,
            rel_type,
            start_node_id: start,
            end_node_id: end,
            properties: self.properties(value),
        }
    }
}

fn meta_id(meta: &Value) -> i64 {
    meta.get("id").and_then(Value::as_i64).unwrap_or_default()
}

fn meta_kind(meta: &Value) -> Option<&str> {
    meta.get("type").and_then(Value::as_str)
}

/// Paths arrive as node, relationship, node, ... with matching metadata
fn is_path(metas: &[Value]) -> bool {
    metas.len() >= 3
        && metas.len() % 2 == 1
        && metas.iter().enumerate().all(|(i, m)| {
            let expected = if i % 2 == 0 { "node" } else { "relationship" };
            meta_kind(m) == Some(expected)
        })
}

fn point(value: Value) -> BackendValue {
    let srid = value
        .pointer("/crs/srid")
        .and_then(Value::as_i64)
        .unwrap_or_default();
    let coordinates = value
        .get("coordinates")
        .and_then(Value::as_array)
        .map(|c| c.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default();
    BackendValue::Point { srid, coordinates }
}

/// Decodes a cell that carries no graph metadata
fn plain(value: Value) -> BackendValue {
    match value {
        Value::Null => BackendValue::Null,
        Value::Bool(b) => BackendValue::Boolean(b),
        Value::Number(n) => BackendValue::Number(n.to_string()),
        Value::String(s) => BackendValue::String(s),
        Value::Array(items) => BackendValue::List(items.into_iter().map(plain).collect()),
        Value::Object(map) => {
            BackendValue::Map(map.into_iter().map(|(k, v)| (k, plain(v))).collect())
        }
    }
}

fn contains_updates(stats: &Option<Value>) -> bool {
    stats
        .as_ref()
        .and_then(|s| s.get("contains_updates"))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn decode_statement(reply: TxStatementReply) -> StatementResult {
    let updates = contains_updates(&reply.stats);
    let rows = reply
        .data
        .into_iter()
        .map(|row| {
            let decoder = CellDecoder::new(row.graph);
            row.row
                .into_iter()
                .enumerate()
                .map(|(i, cell)| decoder.decode(cell, row.meta.get(i).unwrap_or(&Value::Null)))
                .collect()
        })
        .collect();
    StatementResult {
        columns: reply.columns,
        rows,
        contains_updates: updates,
    }
}

/// Extracts the transaction id from a commit or location URL
fn transaction_id(url: &str) -> Option<String> {
    let rest = &url[url.rfind("/tx/")? + 4..];
    let id = rest.split('/').next()?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

pub struct Neo4jTransport {
    config: Neo4jConfig,
    client: Client,
    pool: ConnectionPool,
}

impl Neo4jTransport {
    pub fn new(config: Neo4jConfig, ctx: &EngineContext) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(ctx.timeout)
            .build()
            .map_err(|e| ServiceError::config(format!("cannot build graph client: {}", e)))?;
        Ok(Self {
            config,
            client,
            pool: ConnectionPool::new(ctx.pool_size, ctx.timeout),
        })
    }

    fn tx_root(&self) -> String {
        format!("{}/db/{}/tx", self.config.base_url(), self.config.database)
    }

    fn tx_url(&self, id: &str) -> String {
        format!("{}/{}", self.tx_root(), id)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> ServiceResult<(StatusCode, TxReply)> {
        let response = request
            .basic_auth(&self.config.user, Some(&self.config.password))
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        if status == StatusCode::UNAUTHORIZED {
            return Err(ServiceError::backend_unavailable(
                "graph database rejected the configured credentials",
            ));
        }
        if body.is_empty() {
            return Ok((
                status,
                TxReply {
                    commit: None,
                    results: Vec::new(),
                    errors: Vec::new(),
                },
            ));
        }
        let reply: TxReply = serde_json::from_slice(&body).map_err(|e| {
            ServiceError::internal(format!("error decoding graph reply: {}", e))
                .with_context(format!("status {}", status))
        })?;
        Ok((status, reply))
    }
}

#[async_trait]
impl GraphTransport for Neo4jTransport {
    fn location(&self) -> String {
        self.config.server.clone()
    }

    async fn begin(&self, mode: AccessMode) -> ServiceResult<TransactionHandle> {
        let slot = self.pool.acquire().await?;
        let request = self
            .client
            .post(self.tx_root())
            .header("access-mode", mode.as_header())
            .json(&json!({ "statements": [] }));
        let (_, reply) = self.send(request).await?;
        let reply = reply.into_result()?;
        let id = reply
            .commit
            .as_deref()
            .and_then(transaction_id)
            .ok_or_else(|| ServiceError::internal("graph database did not return a transaction"))?;
        debug!(transaction = %id, mode = mode.as_header(), "opened transaction");
        Ok(TransactionHandle::new(id, mode, Some(slot)))
    }

    async fn run(&self, tx: &TransactionHandle, statement: &str) -> ServiceResult<StatementResult> {
        let body = json!({
            "statements": [{
                "statement": statement,
                "includeStats": true,
                "resultDataContents": ["row", "graph"],
            }]
        });
        let request = self.client.post(self.tx_url(tx.id())).json(&body);
        let (_, reply) = self.send(request).await?;
        let mut reply = reply.into_result()?;
        if reply.results.is_empty() {
            return Ok(StatementResult::default());
        }
        Ok(decode_statement(reply.results.remove(0)))
    }

    async fn commit(&self, tx: TransactionHandle) -> ServiceResult<()> {
        let request = self
            .client
            .post(format!("{}/commit", self.tx_url(tx.id())))
            .json(&json!({ "statements": [] }));
        let (_, reply) = self.send(request).await?;
        reply.into_result().map(|_| ())
    }

    async fn rollback(&self, tx: TransactionHandle) -> ServiceResult<()> {
        let request = self.client.delete(self.tx_url(tx.id()));
        let (status, reply) = self.send(request).await?;
        // the backend discards a transaction on its own once a statement fails
        if status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        reply.into_result().map(|_| ())
    }
}

/// Engine producing primary graph stores over the HTTP protocol
pub struct Neo4jEngine;

impl Engine for Neo4jEngine {
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
        let settings = Neo4jConfig::from_value(config)?;
        let transport = Neo4jTransport::new(settings, ctx)?;
        Ok(Arc::new(GraphStore::new(
            instance,
            type_tag,
            DATA_MODEL_VERSION,
            ENGINE_NAME,
            Arc::new(transport),
        )))
    }
}
