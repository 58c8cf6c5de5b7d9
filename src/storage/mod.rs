//! Backend stores and the registry that routes datasets to them

pub mod dvid;
pub mod executor;
pub mod graph;
pub mod local;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod neo4j;
pub mod registry;
pub mod transport;
pub mod value;

use crate::error::{ServiceError, ServiceResult};
use async_trait::async_trait;
use bytes::Bytes;

pub use executor::{QueryExecutor, QueryResult, Transaction};
pub use registry::{Engine, EngineContext, EngineRegistry, StoreRegistry};
pub use transport::{AccessMode, GraphTransport};
pub use value::Cell;

/// Dataset name to descriptor object
pub type Descriptors = serde_json::Map<String, serde_json::Value>;

/// Type tag carried by primary graph stores
pub const PRIMARY_TYPE: &str = "graph-primary";

/// Something a store can do beyond describing itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Graph,
    KeyValue,
    Spatial,
}

/// A named, typed handle to one backend
#[async_trait]
pub trait Store: Send + Sync {
    fn instance(&self) -> &str;

    fn type_tag(&self) -> &str;

    /// Data-model version the store serves
    fn version(&self) -> &str;

    /// (location, description)
    fn database(&self) -> (String, String);

    async fn datasets(&self) -> ServiceResult<Descriptors>;

    fn graph(&self) -> Option<&QueryExecutor> {
        None
    }

    fn key_value(&self) -> Option<&dyn KeyValue> {
        None
    }

    fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Graph => self.graph().is_some(),
            Capability::KeyValue => self.key_value().is_some(),
            Capability::Spatial => false,
        }
    }

    async fn close(&self) -> ServiceResult<()> {
        Ok(())
    }
}

/// Opaque blob access keyed by string
#[async_trait]
pub trait KeyValue: Send + Sync {
    async fn get(&self, key: &str) -> ServiceResult<Bytes>;

    async fn set(&self, key: &str, value: Bytes) -> ServiceResult<()>;
}

/// Graph capability of `store`, or a bad request naming the instance
pub fn require_graph(store: &dyn Store) -> ServiceResult<&QueryExecutor> {
    store.graph().ok_or_else(|| {
        ServiceError::bad_request(format!("{} does not support graph queries", store.instance()))
    })
}

/// Key-value capability of `store`
pub fn require_key_value(store: &dyn Store) -> ServiceResult<&dyn KeyValue> {
    store
        .key_value()
        .ok_or_else(|| ServiceError::bad_request("database doesn't support keyvalue"))
}
