//! Per-dataset aggregates that are expensive to compute: region
//! connectivity, region completeness and the cell type of the day.
//!
//! Values are computed without holding the cache lock; the lock only
//! guards the swap of a finished value into the map.

use super::cluster::single_linkage_order;
use crate::cypher::builder::{quote_string, Conditions};
use crate::cypher::explorer::ROI_QUERY;
use crate::error::{ServiceError, ServiceResult};
use crate::storage::{require_graph, require_key_value, QueryExecutor, StoreRegistry};
use crate::swc::parse_swc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const REFRESH_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

const SUPER_ROIS_QUERY: &str = "MATCH (m :Meta) RETURN m.superLevelRois AS rois";

/// Distance assigned to region pairs with no meaningful connection
const MAX_DISTANCE: f64 = 1e10;

/// Statuses counted as traced when measuring completeness
pub const COMPLETE_STATUSES: [&str; 7] = [
    "Traced",
    "Roughly traced",
    "Prelim Roughly traced",
    "final",
    "final (irrelevant)",
    "Finalized",
    "Leaves",
];

const RANDOM_TYPE_QUERY: &str = "MATCH (n :Neuron {status: \"Traced\"}) WHERE not n.cropped WITH percentileDisc(n.pre, 0.2) AS prethres, percentileDisc(n.post, 0.2) AS postthres MATCH (n :Neuron {status: \"Traced\"}) WHERE not n.cropped AND EXISTS(n.type) AND n.type<>\"\" AND (n.pre > prethres OR n.post > postthres) WITH n.type as type, collect(n.bodyId) as bodylist WITH type, rand() AS randvar RETURN type ORDER BY randvar LIMIT 1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    RoiConnectivity,
    RoiCompleteness,
    DailyType,
}

impl AggregateKind {
    pub const ALL: [AggregateKind; 3] = [
        AggregateKind::RoiConnectivity,
        AggregateKind::RoiCompleteness,
        AggregateKind::DailyType,
    ];

    pub fn endpoint(&self) -> &'static str {
        match self {
            AggregateKind::RoiConnectivity => "roiconnectivity",
            AggregateKind::RoiCompleteness => "roicompleteness",
            AggregateKind::DailyType => "dailytype",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PrePost {
    pre: i64,
    post: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountWeight {
    /// Bodies contributing to the region pair
    pub count: i64,
    pub weight: f64,
}

/// Region connectivity output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortedRois {
    pub roi_names: Vec<String>,
    pub weights: BTreeMap<String, CountWeight>,
}

/// Folds per-body region counts into `"in=>out"` weights over the super-level regions
///
/// Each body with outputs in region B contributes, for every region A it
/// receives input in, `pre(B) * post(A) / total post` to `A=>B`.
pub fn roi_connectivity(super_rois: &[String], roi_infos: &[String]) -> SortedRois {
    let index: HashMap<&str, usize> = super_rois
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    let n = super_rois.len();
    let mut dist = vec![vec![MAX_DISTANCE; n]; n];
    let mut weights: BTreeMap<String, CountWeight> = BTreeMap::new();

    for raw in roi_infos {
        let info: BTreeMap<String, PrePost> = match serde_json::from_str(raw) {
            Ok(info) => info,
            Err(_) => continue,
        };
        let inside: Vec<(&String, &PrePost)> = info
            .iter()
            .filter(|(roi, _)| index.contains_key(roi.as_str()))
            .collect();
        let total_in: i64 = inside.iter().map(|(_, pp)| pp.post).sum();
        if total_in <= 0 {
            continue;
        }

        for (roi_out, out) in &inside {
            if out.pre <= 0 {
                continue;
            }
            for (roi_in, input) in &inside {
                if input.post == 0 {
                    continue;
                }
                let key = format!("{}=>{}", roi_in, roi_out);
                let share = (out.pre * input.post) as f64 / total_in as f64;
                let entry = weights.entry(key).or_insert(CountWeight {
                    count: 0,
                    weight: 0.0,
                });
                entry.count += 1;
                entry.weight += share;

                let (a, b) = (index[roi_in.as_str()], index[roi_out.as_str()]);
                dist[a][b] = if entry.weight < 0.001 {
                    MAX_DISTANCE
                } else {
                    MAX_DISTANCE - entry.weight
                };
            }
        }
    }

    let roi_names = if n > 3 {
        single_linkage_order(&dist)
            .into_iter()
            .map(|i| super_rois[i].clone())
            .collect()
    } else {
        super_rois.to_vec()
    };

    SortedRois { roi_names, weights }
}

/// Statement for per-region traced totals
pub fn completeness_query() -> String {
    let mut conds = Conditions::new();
    conds.push_any(
        COMPLETE_STATUSES
            .iter()
            .map(|s| format!("n.status = {}", quote_string(s))),
    );
    format!(
        "MATCH (n:Neuron) {} WITH apoc.convert.fromJsonMap(n.roiInfo) AS roiInfo WITH roiInfo AS roiInfo, keys(roiInfo) AS roiList UNWIND roiList AS roiName WITH roiName AS roiName, sum(roiInfo[roiName].pre) AS pre, sum(roiInfo[roiName].post) AS post MATCH (meta:Meta) WITH apoc.convert.fromJsonMap(meta.roiInfo) AS globInfo, roiName AS roiName, pre AS pre, post AS post RETURN roiName AS roi, pre AS roipre, post AS roipost, globInfo[roiName].pre AS totalpre, globInfo[roiName].post AS totalpost ORDER BY roiName",
        conds.where_clause()
    )
}

fn exemplar_query(typename: &str) -> String {
    format!(
        "MATCH (n :Neuron {{type: {}}}) RETURN n.bodyId, n.pre, n.post ORDER BY n.pre*5+n.post DESC LIMIT 1",
        quote_string(typename)
    )
}

fn type_count_query(typename: &str) -> String {
    format!(
        "MATCH (n :Neuron {{type: {}}}) RETURN count(n)",
        quote_string(typename)
    )
}

fn connections_query(body_id: i64) -> String {
    format!(
        "MATCH (n :Neuron {{bodyId: {id}}})-[x :ConnectsTo]->(m) RETURN m.bodyId, m.type, x.weight, x.roiInfo, m.status, 'downstream' as direction UNION MATCH (n :Neuron {{bodyId: {id}}})<-[x :ConnectsTo]-(m) RETURN m.bodyId, m.type, x.weight, x.roiInfo, m.status, 'upstream' as direction",
        id = body_id
    )
}

fn first_row_int(row: &[crate::storage::Cell], idx: usize, what: &str) -> ServiceResult<i64> {
    row.get(idx)
        .and_then(|c| c.as_i64())
        .ok_or_else(|| ServiceError::internal(format!("{} could not be parsed", what)))
}

/// Cache of aggregates keyed by kind then dataset
pub struct AggregateCache {
    stores: Arc<StoreRegistry>,
    values: Mutex<HashMap<AggregateKind, HashMap<String, Arc<Value>>>>,
}

impl AggregateCache {
    pub fn new(stores: Arc<StoreRegistry>) -> Self {
        Self {
            stores,
            values: Mutex::new(HashMap::new()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<AggregateKind, HashMap<String, Arc<Value>>>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn cached(&self, kind: AggregateKind, dataset: &str) -> Option<Arc<Value>> {
        self.guard().get(&kind).and_then(|m| m.get(dataset)).cloned()
    }

    pub fn insert(&self, kind: AggregateKind, dataset: &str, value: Value) -> Arc<Value> {
        let value = Arc::new(value);
        self.guard()
            .entry(kind)
            .or_default()
            .insert(dataset.to_string(), value.clone());
        value
    }

    /// Number of cached values of `kind`
    pub fn len(&self, kind: AggregateKind) -> usize {
        self.guard().get(&kind).map(HashMap::len).unwrap_or(0)
    }

    /// Cached value, computing and storing it on a miss
    pub async fn get_or_compute(&self, kind: AggregateKind, dataset: &str) -> ServiceResult<Arc<Value>> {
        if let Some(value) = self.cached(kind, dataset) {
            return Ok(value);
        }
        let value = self.compute(kind, dataset).await?;
        Ok(self.insert(kind, dataset, value))
    }

    pub async fn compute(&self, kind: AggregateKind, dataset: &str) -> ServiceResult<Value> {
        let store = self.stores.primary_for(dataset)?;
        let executor = require_graph(store.as_ref())?;
        match kind {
            AggregateKind::RoiConnectivity => {
                let result = self.compute_connectivity(executor).await?;
                Ok(serde_json::to_value(result)?)
            }
            AggregateKind::RoiCompleteness => {
                let result = executor.execute(&completeness_query(), true).await?;
                Ok(serde_json::to_value(result)?)
            }
            AggregateKind::DailyType => self.compute_daily_type(executor, dataset).await,
        }
    }

    async fn compute_connectivity(&self, executor: &QueryExecutor) -> ServiceResult<SortedRois> {
        let bodies = executor.execute(ROI_QUERY, true).await?;
        let meta = executor.execute(SUPER_ROIS_QUERY, true).await?;

        let super_rois: Vec<String> = meta
            .data
            .first()
            .and_then(|row| row.first())
            .and_then(|cell| cell.as_list())
            .map(|list| list.iter().filter_map(|c| c.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let roi_infos: Vec<String> = bodies
            .data
            .iter()
            .filter_map(|row| row.get(1).and_then(|c| c.as_str()).map(str::to_string))
            .collect();

        Ok(roi_connectivity(&super_rois, &roi_infos))
    }

    async fn compute_daily_type(&self, executor: &QueryExecutor, dataset: &str) -> ServiceResult<Value> {
        let picked = executor.execute(RANDOM_TYPE_QUERY, true).await?;
        let typename = picked
            .data
            .first()
            .ok_or_else(|| ServiceError::bad_request("No cell type exists"))?
            .first()
            .and_then(|c| c.as_str())
            .ok_or_else(|| ServiceError::internal("Cell type could not be parsed"))?
            .to_string();

        let exemplar = executor.execute(&exemplar_query(&typename), true).await?;
        let row = exemplar
            .data
            .first()
            .ok_or_else(|| ServiceError::bad_request("No bodies exist for cell type"))?;
        let body_id = first_row_int(row, 0, "Body id")?;
        let num_pre = first_row_int(row, 1, "pre")?;
        let num_post = first_row_int(row, 2, "post")?;

        let counted = executor.execute(&type_count_query(&typename), true).await?;
        let num_type = counted
            .data
            .first()
            .map(|row| first_row_int(row, 0, "Number of neurons"))
            .transpose()?
            .unwrap_or(0);

        let connectivity = executor.execute(&connections_query(body_id), true).await?;
        let skeleton = self.skeleton(dataset, body_id).await?;

        Ok(json!({
            "connectivity": connectivity,
            "info": {
                "typename": typename,
                "numtype": num_type,
                "numpre": num_pre,
                "numpost": num_post,
                "bodyid": body_id,
            },
            "skeleton": skeleton,
        }))
    }

    /// Parsed skeleton of `body_id` when a skeleton store serves the dataset
    async fn skeleton(&self, dataset: &str, body_id: i64) -> ServiceResult<Value> {
        let store = match self.stores.find_auxiliary("skeletons", dataset).await {
            Ok(store) => store,
            Err(_) => return Ok(Value::Null),
        };
        let kv = require_key_value(store.as_ref())?;
        match kv.get(&format!("{}_swc", body_id)).await {
            Ok(raw) if !raw.is_empty() => Ok(serde_json::to_value(parse_swc(&raw)?)?),
            _ => Ok(Value::Null),
        }
    }

    /// Recomputes every aggregate for every dataset; failures keep the old value
    pub async fn refresh_all(&self) -> usize {
        let datasets = match self.stores.datasets().await {
            Ok(datasets) => datasets,
            Err(err) => {
                warn!(error = %err, "cannot list datasets for aggregate refresh");
                return 0;
            }
        };

        let mut refreshed = 0;
        for dataset in datasets.keys() {
            for kind in AggregateKind::ALL {
                match self.compute(kind, dataset).await {
                    Ok(value) => {
                        self.insert(kind, dataset, value);
                        refreshed += 1;
                    }
                    Err(err) => {
                        warn!(
                            dataset = %dataset,
                            aggregate = kind.endpoint(),
                            error = %err,
                            "aggregate refresh failed, keeping previous value"
                        );
                    }
                }
            }
        }
        refreshed
    }

    /// Refreshes now and then once every `period`
    pub fn spawn_refresher(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let refreshed = self.refresh_all().await;
                info!(refreshed, "aggregate cache refreshed");
                tokio::time::sleep(period).await;
                debug!("starting scheduled aggregate refresh");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::graph::tests::{meta_row, script_datasets};
    use crate::storage::graph::GraphStore;
    use crate::storage::memory::MemoryTransport;
    use crate::storage::value::BackendValue;
    use crate::storage::{Store, PRIMARY_TYPE};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_connectivity_weights() {
        let rois = names(&["A", "B"]);
        let infos = vec![
            r#"{"A": {"pre": 2, "post": 1}, "B": {"pre": 0, "post": 3}, "X": {"pre": 9, "post": 9}}"#.to_string(),
            "not json".to_string(),
        ];
        let sorted = roi_connectivity(&rois, &infos);
        assert_eq!(sorted.roi_names, rois);
        // total input 4: A=>A gets 2*1/4, B=>A gets 2*3/4
        assert_eq!(sorted.weights["A=>A"], CountWeight { count: 1, weight: 0.5 });
        assert_eq!(sorted.weights["B=>A"], CountWeight { count: 1, weight: 1.5 });
        assert!(!sorted.weights.contains_key("A=>B"));
        assert!(!sorted.weights.keys().any(|k| k.contains('X')));
    }

    #[test]
    fn test_connectivity_clusters_large_sets() {
        let rois = names(&["A", "B", "C", "D"]);
        let infos = vec![
            r#"{"A": {"pre": 10, "post": 10}, "C": {"pre": 10, "post": 10}}"#.to_string(),
            r#"{"B": {"pre": 10, "post": 10}, "D": {"pre": 10, "post": 10}}"#.to_string(),
        ];
        let order = roi_connectivity(&rois, &infos).roi_names;
        assert_eq!(order.len(), 4);
        let pos = |x: &str| order.iter().position(|o| o == x).unwrap() as i64;
        assert_eq!((pos("A") - pos("C")).abs(), 1);
        assert_eq!((pos("B") - pos("D")).abs(), 1);
    }

    #[test]
    fn test_completeness_query_lists_statuses() {
        let q = completeness_query();
        assert!(q.starts_with("MATCH (n:Neuron) WHERE (n.status = \"Traced\" OR n.status = \"Roughly traced\""));
        assert!(q.contains("n.status = \"Leaves\")"));
    }

    async fn cache_with(transport: Arc<MemoryTransport>) -> AggregateCache {
        script_datasets(&transport, vec![meta_row("hemibrain", None, None)]);
        let store: Arc<dyn Store> = Arc::new(GraphStore::new(
            "primary",
            PRIMARY_TYPE,
            "0.5.0",
            "test",
            transport.clone(),
        ));
        let stores = StoreRegistry::from_stores(vec![store], vec![]).await.unwrap();
        AggregateCache::new(Arc::new(stores))
    }

    #[tokio::test]
    async fn test_get_or_compute_caches() {
        let transport = Arc::new(MemoryTransport::new("memory://test"));
        let cache = cache_with(transport.clone()).await;
        transport.script(
            ROI_QUERY,
            &["bodyid", "roiInfo"],
            vec![vec![
                BackendValue::Integer(1),
                BackendValue::String(r#"{"A": {"pre": 1, "post": 1}}"#.into()),
            ]],
        );
        transport.script(
            SUPER_ROIS_QUERY,
            &["rois"],
            vec![vec![BackendValue::List(vec![BackendValue::String("A".into())])]],
        );

        let first = cache
            .get_or_compute(AggregateKind::RoiConnectivity, "hemibrain")
            .await
            .unwrap();
        assert_eq!(first["roi_names"], json!(["A"]));
        assert_eq!(first["weights"]["A=>A"]["count"], json!(1));

        let runs = transport.executed_statements().len();
        let second = cache
            .get_or_compute(AggregateKind::RoiConnectivity, "hemibrain")
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.executed_statements().len(), runs);
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_value_on_failure() {
        let transport = Arc::new(MemoryTransport::new("memory://test"));
        let cache = cache_with(transport.clone()).await;
        cache.insert(AggregateKind::RoiCompleteness, "hemibrain", json!({"old": true}));

        // nothing scripted: every aggregate statement fails
        assert_eq!(cache.refresh_all().await, 0);
        assert_eq!(
            *cache.cached(AggregateKind::RoiCompleteness, "hemibrain").unwrap(),
            json!({"old": true})
        );
        assert_eq!(cache.len(AggregateKind::DailyType), 0);
    }

    #[tokio::test]
    async fn test_daily_type_without_skeleton_store() {
        let transport = Arc::new(MemoryTransport::new("memory://test"));
        let cache = cache_with(transport.clone()).await;
        transport.script(RANDOM_TYPE_QUERY, &["type"], vec![vec![BackendValue::String("KC".into())]]);
        transport.script(
            &exemplar_query("KC"),
            &["n.bodyId", "n.pre", "n.post"],
            vec![vec![
                BackendValue::Integer(42),
                BackendValue::Integer(10),
                BackendValue::Integer(20),
            ]],
        );
        transport.script(&type_count_query("KC"), &["count(n)"], vec![vec![BackendValue::Integer(3)]]);
        transport.script(&connections_query(42), &["m.bodyId"], vec![]);

        let value = cache.compute(AggregateKind::DailyType, "hemibrain").await.unwrap();
        assert_eq!(
            value["info"],
            json!({"typename": "KC", "numtype": 3, "numpre": 10, "numpost": 20, "bodyid": 42})
        );
        assert_eq!(value["skeleton"], Value::Null);
    }
}
