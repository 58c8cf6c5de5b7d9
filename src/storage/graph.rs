//! Graph-capable store: a query executor plus dataset descriptors read from
//! the graph's `:Meta` nodes.

use crate::error::{ServiceError, ServiceResult};
use crate::storage::executor::{QueryExecutor, QueryResult};
use crate::storage::transport::GraphTransport;
use crate::storage::value::Cell;
use crate::storage::{Descriptors, Store};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Statement returning one row per dataset
pub const DATASETS_QUERY: &str = "MATCH (m :Meta) RETURN m.dataset, m.uuid, m.lastDatabaseEdit, m.roiInfo, m.info, m.superLevelRois AS rois, m.tag AS tag, m.hideDataSet AS hidden, m.logo, m.description";

pub struct GraphStore {
    instance: String,
    type_tag: String,
    version: String,
    description: String,
    executor: QueryExecutor,
}

impl GraphStore {
    pub fn new(
        instance: impl Into<String>,
        type_tag: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        transport: Arc<dyn GraphTransport>,
    ) -> Self {
        Self {
            instance: instance.into(),
            type_tag: type_tag.into(),
            version: version.into(),
            description: description.into(),
            executor: QueryExecutor::new(transport),
        }
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }
}

fn text(cell: Option<&Cell>) -> Option<String> {
    cell.and_then(|c| c.as_str()).map(str::to_string)
}

/// Builds the descriptor map out of the `:Meta` rows
pub fn descriptors_from_result(result: &QueryResult) -> ServiceResult<Descriptors> {
    let mut out = Descriptors::new();
    for row in &result.data {
        let mut name = match text(row.first()) {
            Some(name) => name,
            None => continue,
        };
        if let Some(tag) = text(row.get(6)) {
            name = format!("{}:{}", name, tag);
        }

        let rois: Vec<String> = match text(row.get(3)) {
            Some(raw) => {
                let parsed: serde_json::Map<String, Value> = serde_json::from_str(&raw)
                    .map_err(|e| ServiceError::malformed_metadata(&name, format!("roiInfo: {}", e)))?;
                let mut names: Vec<String> = parsed.keys().cloned().collect();
                names.sort();
                names
            }
            None => Vec::new(),
        };
        let super_rois: Vec<String> = row
            .get(5)
            .and_then(|c| c.as_list())
            .map(|items| items.iter().filter_map(|i| i.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let mut descriptor = json!({
            "last-mod": text(row.get(2)).unwrap_or_default(),
            "uuid": text(row.get(1)).unwrap_or_else(|| "latest".to_string()),
            "ROIs": rois,
            "superLevelROIs": super_rois,
            "info": text(row.get(4)).unwrap_or_else(|| "N/A".to_string()),
            "logo": text(row.get(8)).unwrap_or_default(),
            "description": text(row.get(9)).unwrap_or_default(),
        });
        // passed through untouched so the catalog can reject non-boolean flags
        if let Some(hidden) = row.get(7).filter(|c| !c.is_null()) {
            descriptor["hidden"] = hidden.to_json();
        }
        out.insert(name, descriptor);
    }
    Ok(out)
}

#[async_trait]
impl Store for GraphStore {
    fn instance(&self) -> &str {
        &self.instance
    }

    fn type_tag(&self) -> &str {
        &self.type_tag
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn database(&self) -> (String, String) {
        (self.executor.location(), self.description.clone())
    }

    async fn datasets(&self) -> ServiceResult<Descriptors> {
        let result = self.executor.execute(DATASETS_QUERY, true).await?;
        if result.data.is_empty() {
            return Err(ServiceError::backend_unavailable(format!(
                "no datasets found in server {}",
                self.executor.location()
            )));
        }
        let descriptors = descriptors_from_result(&result)?;
        debug!(instance = %self.instance, count = descriptors.len(), "read dataset descriptors");
        Ok(descriptors)
    }

    fn graph(&self) -> Option<&QueryExecutor> {
        Some(&self.executor)
    }
}
