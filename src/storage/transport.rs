//! Graph transport abstraction: a bounded connection pool plus explicit
//! transaction begin / run / commit / rollback.

use crate::error::{ServiceError, ServiceResult};
use crate::storage::value::BackendValue;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default number of concurrent backend connections
pub const DEFAULT_POOL_SIZE: usize = 50;

/// Session mode requested when a transaction begins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    pub fn for_readonly(readonly: bool) -> Self {
        if readonly {
            AccessMode::Read
        } else {
            AccessMode::Write
        }
    }

    pub fn as_header(&self) -> &'static str {
        match self {
            AccessMode::Read => "READ",
            AccessMode::Write => "WRITE",
        }
    }
}

/// Bounded pool of backend connection slots
///
/// A slot is held for the lifetime of a transaction and released when the
/// handle is committed, rolled back or dropped.
#[derive(Clone)]
pub struct ConnectionPool {
    slots: Arc<Semaphore>,
    size: usize,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(size: usize, acquire_timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            slots: Arc::new(Semaphore::new(size)),
            size,
            acquire_timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Waits for a free slot, up to the acquire timeout
    pub async fn acquire(&self) -> ServiceResult<OwnedSemaphorePermit> {
        match tokio::time::timeout(self.acquire_timeout, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(ServiceError::backend_unavailable("connection pool closed")),
            Err(_) => Err(ServiceError::backend_unavailable(format!(
                "no backend connection available after {:?}",
                self.acquire_timeout
            ))),
        }
    }
}

/// An open backend transaction
#[derive(Debug)]
pub struct TransactionHandle {
    id: String,
    mode: AccessMode,
    _slot: Option<OwnedSemaphorePermit>,
}

impl TransactionHandle {
    pub fn new(id: impl Into<String>, mode: AccessMode, slot: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            id: id.into(),
            mode,
            _slot: slot,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }
}

/// Raw result of one statement, before normalization
#[derive(Debug, Clone, Default)]
pub struct StatementResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<BackendValue>>,
    pub contains_updates: bool,
}

/// Transaction-level access to a graph backend
#[async_trait]
pub trait GraphTransport: Send + Sync {
    /// Where the backend lives, for descriptors and logs
    fn location(&self) -> String;

    async fn begin(&self, mode: AccessMode) -> ServiceResult<TransactionHandle>;

    async fn run(&self, tx: &TransactionHandle, statement: &str) -> ServiceResult<StatementResult>;

    async fn commit(&self, tx: TransactionHandle) -> ServiceResult<()>;

    async fn rollback(&self, tx: TransactionHandle) -> ServiceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_blocks_until_timeout() {
        let pool = ConnectionPool::new(1, Duration::from_millis(50));
        let first = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, ServiceError::BackendUnavailable { .. }));
        assert!(err.to_string().contains("after 50ms"), "{}", err);

        drop(first);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_pool_size_at_least_one() {
        let pool = ConnectionPool::new(0, Duration::from_millis(10));
        assert_eq!(pool.size(), 1);
        assert!(pool.acquire().await.is_ok());
    }

    #[test]
    fn test_access_mode() {
        assert_eq!(AccessMode::for_readonly(true), AccessMode::Read);
        assert_eq!(AccessMode::for_readonly(false).as_header(), "WRITE");
    }
}
