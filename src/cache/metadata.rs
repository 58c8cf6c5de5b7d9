//! Dataset descriptors read through from the primary stores, with the
//! hidden-dataset filter applied per request.

use crate::error::{ServiceError, ServiceResult};
use crate::storage::{Descriptors, StoreRegistry};
use serde_json::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct DatasetCatalog {
    stores: Arc<StoreRegistry>,
}

impl DatasetCatalog {
    pub fn new(stores: Arc<StoreRegistry>) -> Self {
        Self { stores }
    }

    /// Descriptors of every dataset; hidden ones only when `show_hidden`
    pub async fn datasets(&self, show_hidden: bool) -> ServiceResult<Descriptors> {
        let descriptors = self.stores.datasets().await?;
        filter_hidden(descriptors, show_hidden)
    }

    /// Descriptor of a single dataset, hidden or not
    pub async fn dataset(&self, name: &str) -> ServiceResult<Value> {
        let mut all = filter_hidden(self.stores.datasets().await?, true)?;
        all.remove(name)
            .ok_or_else(|| ServiceError::dataset_not_found(name))
    }
}

/// Whether a descriptor is flagged hidden; errors name the dataset
fn is_hidden(dataset: &str, descriptor: &Value) -> ServiceResult<bool> {
    let object = descriptor
        .as_object()
        .ok_or_else(|| ServiceError::malformed_metadata(dataset, "descriptor is not an object"))?;
    match object.get("hidden") {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(_) => Err(ServiceError::malformed_metadata(
            dataset,
            "hidden flag is not a boolean",
        )),
    }
}

/// Validates every descriptor and drops hidden ones unless asked to keep them
pub fn filter_hidden(descriptors: Descriptors, show_hidden: bool) -> ServiceResult<Descriptors> {
    let mut visible = Descriptors::new();
    for (name, descriptor) in descriptors {
        if is_hidden(&name, &descriptor)? && !show_hidden {
            continue;
        }
        visible.insert(name, descriptor);
    }
    Ok(visible)
}
