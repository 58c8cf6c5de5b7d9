//! Embedded key-value store kept in a directory, one file per key

use crate::error::{ServiceError, ServiceResult};
use crate::storage::registry::{config_str, Engine, EngineContext};
use crate::storage::{Descriptors, KeyValue, Store};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const ENGINE_NAME: &str = "localkv";
pub const VERSION: &str = "1.0.0";

pub struct LocalKvStore {
    instance: String,
    type_tag: String,
    dataset: String,
    root: PathBuf,
    writes: AtomicU64,
}

fn hex_key(key: &str) -> String {
    key.bytes().map(|b| format!("{:02x}", b)).collect()
}

impl LocalKvStore {
    /// Opens the directory, creating it when missing
    pub fn open(
        instance: impl Into<String>,
        type_tag: impl Into<String>,
        dataset: impl Into<String>,
        root: impl AsRef<Path>,
    ) -> ServiceResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            ServiceError::config(format!("cannot open {}: {}", root.display(), e))
        })?;
        Ok(Self {
            instance: instance.into(),
            type_tag: type_tag.into(),
            dataset: dataset.into(),
            root,
            writes: AtomicU64::new(0),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(hex_key(key))
    }
}

#[async_trait]
impl Store for LocalKvStore {
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
        (self.root.display().to_string(), ENGINE_NAME.to_string())
    }

    async fn datasets(&self) -> ServiceResult<Descriptors> {
        let mut out = Descriptors::new();
        out.insert(
            self.dataset.clone(),
            json!({ "location": self.root.display().to_string() }),
        );
        Ok(out)
    }

    fn key_value(&self) -> Option<&dyn KeyValue> {
        Some(self)
    }
}

#[async_trait]
impl KeyValue for LocalKvStore {
    async fn get(&self, key: &str) -> ServiceResult<Bytes> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ServiceError::key_not_found(key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> ServiceResult<()> {
        let target = self.path_for(key);
        let seq = self.writes.fetch_add(1, Ordering::SeqCst);
        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", hex_key(key), seq));
        tokio::fs::write(&tmp, &value).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }
}

pub struct LocalKvEngine;

impl Engine for LocalKvEngine {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn new_store(
        &self,
        instance: &str,
        type_tag: &str,
        config: &Value,
        _ctx: &EngineContext,
    ) -> ServiceResult<Arc<dyn Store>> {
        let dataset = config_str(config, ENGINE_NAME, "dataset")?;
        let location = config_str(config, ENGINE_NAME, "location")?;
        Ok(Arc::new(LocalKvStore::open(
            instance, type_tag, dataset, location,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalKvStore::open("skel", "skeletons", "hemibrain", dir.path()).unwrap();

        store.set("123_swc", Bytes::from_static(b"1 0 1 2 3 1 -1\n")).await.unwrap();
        let got = store.get("123_swc").await.unwrap();
        assert_eq!(&got[..], b"1 0 1 2 3 1 -1\n");

        // overwrite replaces the whole value
        store.set("123_swc", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(&store.get("123_swc").await.unwrap()[..], b"x");
    }

    #[tokio::test]
    async fn test_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalKvStore::open("skel", "skeletons", "hemibrain", dir.path()).unwrap();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, ServiceError::KeyNotFound { .. }));
    }

    #[tokio::test]
    async fn test_keys_with_separators_stay_in_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalKvStore::open("m", "roimeshes", "hemibrain", dir.path()).unwrap();
        store.set("../escape", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert!(store.key_value().is_some());
    }

    #[tokio::test]
    async fn test_reports_single_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalKvEngine
            .new_store(
                "m",
                "roimeshes",
                &json!({"dataset": "hemibrain", "location": dir.path().join("kv")}),
                &EngineContext::default(),
            )
            .unwrap();
        let datasets = store.datasets().await.unwrap();
        assert_eq!(datasets.keys().collect::<Vec<_>>(), vec!["hemibrain"]);
    }
}
