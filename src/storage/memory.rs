//! In-memory scripted graph transport
//!
//! Statements are matched verbatim against scripted replies. Mutating
//! statements only become visible in `committed_mutations` once their
//! transaction commits, which makes rollback behaviour observable.
//!
//! Built for unit tests and behind the `testing` feature.

use crate::error::{ServiceError, ServiceResult};
use crate::storage::transport::{
    AccessMode, ConnectionPool, GraphTransport, StatementResult, TransactionHandle,
    DEFAULT_POOL_SIZE,
};
use crate::storage::value::BackendValue;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<BackendValue>>,
        contains_updates: bool,
    },
    Error {
        code: String,
        message: String,
    },
}

pub struct MemoryTransport {
    location: String,
    pool: ConnectionPool,
    replies: Mutex<HashMap<String, Reply>>,
    pending: Mutex<HashMap<String, Vec<String>>>,
    committed: Mutex<Vec<String>>,
    executed: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

impl MemoryTransport {
    pub fn new(location: impl Into<String>) -> Self {
        Self::with_pool(location, DEFAULT_POOL_SIZE, Duration::from_secs(5))
    }

    pub fn with_pool(location: impl Into<String>, size: usize, acquire_timeout: Duration) -> Self {
        Self {
            location: location.into(),
            pool: ConnectionPool::new(size, acquire_timeout),
            replies: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            committed: Mutex::new(Vec::new()),
            executed: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn insert(&self, statement: &str, reply: Reply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.insert(statement.to_string(), reply);
        }
    }

    /// Scripts a read statement
    pub fn script(&self, statement: &str, columns: &[&str], rows: Vec<Vec<BackendValue>>) {
        self.insert(
            statement,
            Reply::Rows {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
                contains_updates: false,
            },
        );
    }

    /// Scripts a statement that reports updates
    pub fn script_mutation(&self, statement: &str, columns: &[&str], rows: Vec<Vec<BackendValue>>) {
        self.insert(
            statement,
            Reply::Rows {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
                contains_updates: true,
            },
        );
    }

    /// Scripts a backend failure
    pub fn script_error(&self, statement: &str, code: &str, message: &str) {
        self.insert(
            statement,
            Reply::Error {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    /// Mutating statements whose transaction committed, in commit order
    pub fn committed_mutations(&self) -> Vec<String> {
        self.committed.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Every statement run, committed or not
    pub fn executed_statements(&self) -> Vec<String> {
        self.executed.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn open_transactions(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    fn close(&self, tx: &TransactionHandle) -> ServiceResult<Vec<String>> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| ServiceError::internal("memory transport poisoned"))?;
        pending
            .remove(tx.id())
            .ok_or_else(|| ServiceError::query(format!("unknown transaction {}", tx.id())))
    }
}

#[async_trait]
impl GraphTransport for MemoryTransport {
    fn location(&self) -> String {
        self.location.clone()
    }

    async fn begin(&self, mode: AccessMode) -> ServiceResult<TransactionHandle> {
        let slot = self.pool.acquire().await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.pending
            .lock()
            .map_err(|_| ServiceError::internal("memory transport poisoned"))?
            .insert(id.clone(), Vec::new());
        Ok(TransactionHandle::new(id, mode, Some(slot)))
    }

    async fn run(&self, tx: &TransactionHandle, statement: &str) -> ServiceResult<StatementResult> {
        if let Ok(mut executed) = self.executed.lock() {
            executed.push(statement.to_string());
        }
        let reply = self
            .replies
            .lock()
            .map_err(|_| ServiceError::internal("memory transport poisoned"))?
            .get(statement)
            .cloned();

        match reply {
            None => Err(ServiceError::query_with_code(
                format!("no scripted reply for statement: {}", statement),
                "Neo.ClientError.Statement.SyntaxError",
            )),
            Some(Reply::Error { code, message }) => Err(ServiceError::query_with_code(message, code)),
            Some(Reply::Rows {
                columns,
                rows,
                contains_updates,
            }) => {
                if contains_updates {
                    let mut pending = self
                        .pending
                        .lock()
                        .map_err(|_| ServiceError::internal("memory transport poisoned"))?;
                    let writes = pending
                        .get_mut(tx.id())
                        .ok_or_else(|| ServiceError::query(format!("unknown transaction {}", tx.id())))?;
                    writes.push(statement.to_string());
                }
                Ok(StatementResult {
                    columns,
                    rows,
                    contains_updates,
                })
            }
        }
    }

    async fn commit(&self, tx: TransactionHandle) -> ServiceResult<()> {
        let writes = self.close(&tx)?;
        self.committed
            .lock()
            .map_err(|_| ServiceError::internal("memory transport poisoned"))?
            .extend(writes);
        Ok(())
    }

    async fn rollback(&self, tx: TransactionHandle) -> ServiceResult<()> {
        self.close(&tx).map(|_| ())
    }
}
