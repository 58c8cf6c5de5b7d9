//! Query executor: runs statements inside transactions, enforces read-only
//! semantics and normalizes results.

use crate::error::{ServiceError, ServiceResult};
use crate::storage::transport::{AccessMode, GraphTransport, StatementResult, TransactionHandle};
use crate::storage::value::{normalize, Cell};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Normalized statement result
///
/// `debug` always carries the exact statement that produced the rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub data: Vec<Vec<Cell>>,
    pub debug: String,
}

impl QueryResult {
    pub fn empty(statement: &str) -> Self {
        Self {
            columns: Vec::new(),
            data: Vec::new(),
            debug: statement.to_string(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.data.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    fn from_statement(raw: StatementResult, statement: &str) -> Self {
        let data = raw
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(normalize).collect())
            .collect();
        Self {
            columns: raw.columns,
            data,
            debug: statement.to_string(),
        }
    }
}

/// Whether a backend error reports a timeout
///
/// A status code decides when the backend sent one; otherwise only the
/// literal `Timeout` in the message counts.
fn is_timeout(err: &ServiceError) -> bool {
    match err {
        ServiceError::Timeout { .. } => true,
        ServiceError::Query {
            code: Some(code), ..
        } => code.contains("TransactionTimedOut") || code.ends_with("Timeout"),
        ServiceError::Query { message, code: None } => message.contains("Timeout"),
        _ => false,
    }
}

/// Rewrites backend timeouts into the caller-facing timeout error
fn rewrite_timeout(err: ServiceError) -> ServiceError {
    if !is_timeout(&err) {
        return err;
    }
    match err {
        ServiceError::Timeout { .. } => err,
        ServiceError::Query { message, .. } => ServiceError::timeout(message),
        other => other,
    }
}

/// Executes statements against one graph transport
#[derive(Clone)]
pub struct QueryExecutor {
    transport: Arc<dyn GraphTransport>,
}

impl QueryExecutor {
    pub fn new(transport: Arc<dyn GraphTransport>) -> Self {
        Self { transport }
    }

    pub fn location(&self) -> String {
        self.transport.location()
    }

    /// Opens an explicit transaction
    pub async fn begin(&self, mode: AccessMode) -> ServiceResult<Transaction> {
        let handle = self.transport.begin(mode).await.map_err(rewrite_timeout)?;
        Ok(Transaction {
            transport: self.transport.clone(),
            handle: Some(handle),
        })
    }

    /// Runs one statement in its own transaction and commits it
    ///
    /// With `readonly` set, a statement that reports updates is rolled back
    /// and rejected.
    pub async fn execute(&self, statement: &str, readonly: bool) -> ServiceResult<QueryResult> {
        let mut tx = self.begin(AccessMode::for_readonly(readonly)).await?;
        match tx.run(statement, readonly).await {
            Ok(result) => {
                tx.commit().await?;
                Ok(result)
            }
            Err(err) => {
                if tx.is_open() {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "rollback after failed statement failed");
                    }
                }
                Err(err)
            }
        }
    }
}

/// An explicit transaction owned by one caller
pub struct Transaction {
    transport: Arc<dyn GraphTransport>,
    handle: Option<TransactionHandle>,
}

impl Transaction {
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn mode(&self) -> Option<AccessMode> {
        self.handle.as_ref().map(|h| h.mode())
    }

    fn open_handle(&self) -> ServiceResult<&TransactionHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| ServiceError::bad_request("transaction is no longer open"))
    }

    /// Runs a statement; a read-only violation rolls the transaction back
    pub async fn run(&mut self, statement: &str, readonly: bool) -> ServiceResult<QueryResult> {
        let handle = self.open_handle()?;
        debug!(statement = %statement, readonly, "running statement");

        let raw = match self.transport.run(handle, statement).await {
            Ok(raw) => raw,
            Err(err) => return Err(rewrite_timeout(err)),
        };

        if readonly && raw.contains_updates {
            warn!(statement = %statement, "read-only statement attempted to modify the graph");
            self.rollback().await?;
            return Err(ServiceError::ForbiddenMutation);
        }

        Ok(QueryResult::from_statement(raw, statement))
    }

    pub async fn commit(&mut self) -> ServiceResult<()> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| ServiceError::bad_request("transaction is no longer open"))?;
        self.transport.commit(handle).await.map_err(rewrite_timeout)
    }

    pub async fn rollback(&mut self) -> ServiceResult<()> {
        match self.handle.take() {
            Some(handle) => self.transport.rollback(handle).await,
            None => Ok(()),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // abandoned transactions are rolled back in the background
        if let Some(handle) = self.handle.take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let transport = self.transport.clone();
                runtime.spawn(async move {
                    if let Err(err) = transport.rollback(handle).await {
                        debug!(error = %err, "background rollback failed");
                    }
                });
            }
        }
    }
}
