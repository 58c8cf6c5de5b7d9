//! Raw statement execution for administrators, with no read-only
//! enforcement, plus explicit multi-statement transactions.

use super::{check_store_version, parse_request, primary_store, scope, with_debug, MALFORMED_REQUEST};
use crate::error::{ServiceError, ServiceResult};
use crate::secure::{AccessLevel, Caller};
use crate::storage::{require_graph, AccessMode, Transaction};
use crate::web::api::custom::CustomRequest;
use crate::web::server::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::http::Uri;
use axum::response::Response;
use axum::Json;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often the reaper looks for idle transactions
pub const REAP_PERIOD: Duration = Duration::from_secs(15);

/// A transaction left open between requests
pub struct OpenTransaction {
    pub dataset: String,
    /// Data-model version of the store the transaction runs against
    pub version: String,
    tx: Mutex<Transaction>,
    /// Milliseconds since the table epoch at last use
    last_used: AtomicU64,
}

/// Process-wide table of open transactions; ids start at 1
///
/// Entries idle longer than the reaper's limit are rolled back, which
/// returns their backend connection to the pool.
pub struct TransactionTable {
    next: AtomicU64,
    open: DashMap<u64, Arc<OpenTransaction>>,
    epoch: Instant,
}

impl Default for TransactionTable {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
            open: DashMap::new(),
            epoch: Instant::now(),
        }
    }
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, dataset: &str, version: &str, tx: Transaction) -> u64 {
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.open.insert(
            id,
            Arc::new(OpenTransaction {
                dataset: dataset.to_string(),
                version: version.to_string(),
                tx: Mutex::new(tx),
                last_used: AtomicU64::new(self.now()),
            }),
        );
        id
    }

    fn now(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Looks up an open transaction and marks it used
    pub fn get(&self, id: u64) -> ServiceResult<Arc<OpenTransaction>> {
        let open = self
            .open
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceError::bad_request("Transaction id not found"))?;
        self.touch(&open);
        Ok(open)
    }

    pub fn touch(&self, open: &OpenTransaction) {
        open.last_used.store(self.now(), Ordering::SeqCst);
    }

    pub fn remove(&self, id: u64) -> ServiceResult<Arc<OpenTransaction>> {
        self.open
            .remove(&id)
            .map(|(_, entry)| entry)
            .ok_or_else(|| ServiceError::bad_request("Transaction id not found"))
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Rolls back and forgets every transaction unused for longer than
    /// `max_idle`; one with a statement in flight is left alone
    pub async fn reap_idle(&self, max_idle: Duration) -> usize {
        let now = self.now();
        let limit = max_idle.as_millis() as u64;
        let idle: Vec<u64> = self
            .open
            .iter()
            .filter(|entry| now.saturating_sub(entry.last_used.load(Ordering::SeqCst)) > limit)
            .map(|entry| *entry.key())
            .collect();

        let mut reaped = 0;
        for id in idle {
            let removed = self.open.remove_if(&id, |_, open| {
                now.saturating_sub(open.last_used.load(Ordering::SeqCst)) > limit && open.tx.try_lock().is_ok()
            });
            let Some((_, open)) = removed else { continue };
            if let Err(err) = open.tx.lock().await.rollback().await {
                warn!(transaction_id = id, error = %err, "rollback of idle transaction failed");
            }
            info!(transaction_id = id, dataset = %open.dataset, "rolled back idle transaction");
            reaped += 1;
        }
        reaped
    }

    /// Reaps idle transactions once every `period`
    pub fn spawn_reaper(self: Arc<Self>, max_idle: Duration, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                let reaped = self.reap_idle(max_idle).await;
                debug!(reaped, open = self.len(), "transaction reaper pass");
            }
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DatasetRequest {
    pub dataset: String,
}

#[derive(Debug, Serialize)]
pub struct TransactionStarted {
    pub transaction_id: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TransactionStatement {
    pub cypher: String,
    pub version: Option<String>,
}

fn transaction_id(raw: &str) -> ServiceResult<u64> {
    raw.parse()
        .map_err(|_| ServiceError::bad_request("transaction id should be an integer"))
}

/// Runs one statement in its own write transaction
pub async fn exec_cypher(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    uri: Uri,
    body: Bytes,
) -> ServiceResult<Response> {
    let req = CustomRequest::parse(&uri, &body)?;
    state.gate.require(&caller, scope(&req.dataset), AccessLevel::Admin)?;
    let store = primary_store(&state, &req.dataset)?;
    check_store_version(req.version.as_deref(), store.as_ref())?;
    let result = require_graph(store.as_ref())?.execute(&req.cypher, false).await?;
    let debug = result.debug.clone();
    Ok(with_debug(Json(result), &debug))
}

pub async fn start_transaction(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    uri: Uri,
    body: Bytes,
) -> ServiceResult<Json<TransactionStarted>> {
    let req: DatasetRequest = parse_request(&uri, &body)?;
    state.gate.require(&caller, scope(&req.dataset), AccessLevel::Admin)?;
    let store = primary_store(&state, &req.dataset)?;
    let tx = require_graph(store.as_ref())?.begin(AccessMode::Write).await?;
    let id = state.transactions.insert(&req.dataset, store.version(), tx);
    info!(transaction_id = id, dataset = %req.dataset, "opened transaction");
    Ok(Json(TransactionStarted { transaction_id: id }))
}

pub async fn transaction_cypher(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    body: Bytes,
) -> ServiceResult<Response> {
    let req: TransactionStatement =
        serde_json::from_slice(&body).map_err(|_| ServiceError::bad_request(MALFORMED_REQUEST))?;
    let id = transaction_id(&id)?;
    let open = state.transactions.get(id)?;
    state.gate.require(&caller, scope(&open.dataset), AccessLevel::Admin)?;

    if let Some(version) = req.version.as_deref().filter(|v| !v.is_empty()) {
        if !super::version_matches(version, &open.version) {
            return Err(ServiceError::incompatible_version(version, open.version.clone()));
        }
    }

    let result = open.tx.lock().await.run(&req.cypher, false).await;
    state.transactions.touch(&open);
    let result = result?;
    let debug = result.debug.clone();
    Ok(with_debug(Json(result), &debug))
}

/// Commits and forgets a transaction; it is forgotten even when the commit fails
pub async fn commit_transaction(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> ServiceResult<Json<Value>> {
    let id = transaction_id(&id)?;
    let open = state.transactions.get(id)?;
    state.gate.require(&caller, scope(&open.dataset), AccessLevel::Admin)?;
    let open = state.transactions.remove(id)?;
    open.tx.lock().await.commit().await?;
    info!(transaction_id = id, "committed transaction");
    Ok(Json(json!({"msg": "committed"})))
}

pub async fn kill_transaction(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> ServiceResult<Json<Value>> {
    let id = transaction_id(&id)?;
    let open = state.transactions.get(id)?;
    state.gate.require(&caller, scope(&open.dataset), AccessLevel::Admin)?;
    let open = state.transactions.remove(id)?;
    open.tx.lock().await.rollback().await?;
    info!(transaction_id = id, "rolled back transaction");
    Ok(Json(json!({"msg": "killed"})))
}
