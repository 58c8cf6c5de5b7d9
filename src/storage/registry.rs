//! Engine registry and the store registry built from configuration
//!
//! Engines are looked up by the name used in configuration files. The store
//! registry is built once at startup and is read-only afterwards.

use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::storage::transport::DEFAULT_POOL_SIZE;
use crate::storage::{dvid, local, neo4j, Descriptors, Store, PRIMARY_TYPE};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};

/// Settings shared by every store an engine creates
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub timeout: Duration,
    pub pool_size: usize,
}

impl Default for EngineContext {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// A backend kind that knows how to build stores from `engine-config`
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    fn new_store(
        &self,
        instance: &str,
        type_tag: &str,
        config: &Value,
        ctx: &EngineContext,
    ) -> ServiceResult<Arc<dyn Store>>;
}

/// Reads a required string field out of an engine configuration object
pub fn config_str(config: &Value, engine: &str, field: &str) -> ServiceResult<String> {
    config
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ServiceError::config(format!("{} not specified for {}", field, engine)))
}

/// Named engines available to the store registry
#[derive(Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn Engine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every engine compiled into the service
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(neo4j::Neo4jEngine));
        registry.register(Arc::new(local::LocalKvEngine));
        registry.register(Arc::new(dvid::DvidKvEngine));
        registry
    }

    /// Process-wide registry, initialized on first use
    pub fn global() -> &'static EngineRegistry {
        static ENGINES: OnceLock<EngineRegistry> = OnceLock::new();
        ENGINES.get_or_init(EngineRegistry::with_builtins)
    }

    pub fn register(&mut self, engine: Arc<dyn Engine>) {
        self.engines.insert(engine.name().to_string(), engine);
    }

    pub fn get(&self, name: &str) -> ServiceResult<Arc<dyn Engine>> {
        self.engines
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::config(format!("engine {} not found", name)))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Every store the process fronts, indexed for request routing
pub struct StoreRegistry {
    primaries: Vec<Arc<dyn Store>>,
    by_dataset: HashMap<String, usize>,
    instances: HashMap<String, Arc<dyn Store>>,
    types: HashMap<String, Vec<Arc<dyn Store>>>,
}

impl StoreRegistry {
    /// Instantiates every configured store and indexes their datasets
    pub async fn from_config(engines: &EngineRegistry, config: &ServiceConfig) -> ServiceResult<Self> {
        let ctx = EngineContext {
            timeout: Duration::from_secs(config.timeout),
            pool_size: config.pool_size,
        };

        let mut primaries = Vec::with_capacity(1 + config.alternate_stores.len());
        primaries.push(engines.get(&config.engine)?.new_store(
            "primary",
            PRIMARY_TYPE,
            &config.engine_config,
            &ctx,
        )?);
        for (i, alt) in config.alternate_stores.iter().enumerate() {
            let instance = format!("alternate-{}", i);
            primaries.push(engines.get(&alt.engine)?.new_store(
                &instance,
                PRIMARY_TYPE,
                &alt.engine_config,
                &ctx,
            )?);
        }

        let mut auxiliary = Vec::new();
        for (type_tag, entries) in &config.auxiliary_datatypes {
            for entry in entries {
                auxiliary.push(engines.get(&entry.engine)?.new_store(
                    &entry.instance,
                    type_tag,
                    &entry.engine_config,
                    &ctx,
                )?);
            }
        }

        Self::from_stores(primaries, auxiliary).await
    }

    /// Indexes already-built stores; the first primary is the main store
    pub async fn from_stores(
        primaries: Vec<Arc<dyn Store>>,
        auxiliary: Vec<Arc<dyn Store>>,
    ) -> ServiceResult<Self> {
        if primaries.is_empty() {
            return Err(ServiceError::config("no primary store configured"));
        }

        let mut by_dataset = HashMap::new();
        for (idx, store) in primaries.iter().enumerate() {
            let datasets = store.datasets().await?;
            for name in datasets.keys() {
                if by_dataset.insert(name.clone(), idx).is_some() {
                    return Err(ServiceError::DuplicateDataset {
                        dataset: name.clone(),
                    });
                }
            }
            info!(
                instance = store.instance(),
                datasets = datasets.len(),
                "registered primary store"
            );
        }

        let mut instances: HashMap<String, Arc<dyn Store>> = HashMap::new();
        let mut types: HashMap<String, Vec<Arc<dyn Store>>> = HashMap::new();
        for store in auxiliary {
            let name = store.instance().to_string();
            if instances.contains_key(&name) {
                return Err(ServiceError::DuplicateInstance { instance: name });
            }
            types
                .entry(store.type_tag().to_string())
                .or_default()
                .push(store.clone());
            instances.insert(name, store);
        }

        Ok(Self {
            primaries,
            by_dataset,
            instances,
            types,
        })
    }

    /// The store named by `engine` / `engine-config`
    pub fn main(&self) -> &Arc<dyn Store> {
        &self.primaries[0]
    }

    pub fn primaries(&self) -> &[Arc<dyn Store>] {
        &self.primaries
    }

    pub fn primary_for(&self, dataset: &str) -> ServiceResult<Arc<dyn Store>> {
        self.by_dataset
            .get(dataset)
            .map(|idx| self.primaries[*idx].clone())
            .ok_or_else(|| ServiceError::dataset_not_found(dataset))
    }

    /// Datasets known at startup, sorted
    pub fn dataset_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_dataset.keys().cloned().collect();
        names.sort();
        names
    }

    /// Auxiliary store of `type_tag` whose dataset set contains `dataset`
    pub async fn find_auxiliary(&self, type_tag: &str, dataset: &str) -> ServiceResult<Arc<dyn Store>> {
        let candidates = self.types.get(type_tag).ok_or_else(|| {
            ServiceError::bad_request(format!("no store for the {} datatype available", type_tag))
        })?;
        for store in candidates {
            if store.datasets().await?.contains_key(dataset) {
                return Ok(store.clone());
            }
        }
        Err(ServiceError::dataset_not_found(format!("{} ({})", dataset, type_tag)))
    }

    pub fn instance(&self, name: &str) -> ServiceResult<Arc<dyn Store>> {
        self.instances
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::instance_not_found(name))
    }

    pub fn has_type(&self, type_tag: &str) -> bool {
        self.types.contains_key(type_tag)
    }

    /// Current descriptors of every primary store, merged
    pub async fn datasets(&self) -> ServiceResult<Descriptors> {
        let mut merged = Descriptors::new();
        for store in &self.primaries {
            merged.extend(store.datasets().await?);
        }
        Ok(merged)
    }

    pub async fn close(&self) {
        let all = self.primaries.iter().chain(self.instances.values());
        for store in all {
            if let Err(err) = store.close().await {
                warn!(instance = store.instance(), error = %err, "failed to close store");
            }
        }
    }
}
