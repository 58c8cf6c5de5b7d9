/// Statements behind the explorer endpoints
///
/// Every user-supplied string is quoted before it reaches a statement:
/// values as string literals, region names as backtick identifiers.
use super::builder::{quote_identifier, quote_string, Conditions};
use crate::error::{ServiceError, ServiceResult};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

pub const NEURON_META_QUERY: &str = "MATCH (n :Neuron) UNWIND KEYS(n) AS x RETURN DISTINCT x AS pname";

pub const ROI_QUERY: &str = "MATCH (neuron :Neuron) RETURN neuron.bodyId AS bodyid, neuron.roiInfo AS roiInfo";

pub const AUTAPSES_QUERY: &str = "MATCH (n:Neuron)-[x:ConnectsTo]->(n) RETURN n.bodyId AS id, x.weight AS weight, n.instance AS name, n.type AS type ORDER BY x.weight DESC";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatasetParams {
    pub dataset: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NeuronNameParams {
    pub dataset: String,
    pub neuron_name: String,
    pub neuron_id: i64,
    /// Substring match instead of a regular expression
    pub enable_contains: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FindNeuronsParams {
    pub dataset: String,
    pub neuron_name: String,
    pub neuron_id: i64,
    pub enable_contains: bool,
    pub statuses: Vec<String>,
    pub pre_threshold: i64,
    pub post_threshold: i64,
    pub all_segments: bool,
    #[serde(rename = "input_ROIs")]
    pub input_rois: Vec<String>,
    #[serde(rename = "output_ROIs")]
    pub output_rois: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectionsParams {
    pub dataset: String,
    pub neuron_name: String,
    pub neuron_id: i64,
    pub enable_contains: bool,
    pub find_inputs: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetaValParams {
    pub dataset: String,
    pub key_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommonConnectivityParams {
    pub dataset: String,
    pub statuses: Vec<String>,
    pub pre_threshold: i64,
    pub post_threshold: i64,
    pub all_segments: bool,
    pub find_inputs: bool,
    pub neuron_ids: Vec<i64>,
    pub neuron_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DistributionParams {
    pub dataset: String,
    #[serde(rename = "ROI")]
    pub roi: String,
    pub is_pre: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CompletenessParams {
    pub dataset: String,
    pub statuses: Vec<String>,
    pub pre_threshold: i64,
    pub post_threshold: i64,
    pub all_segments: bool,
}

/// Request parameters that name the dataset they query
pub trait DatasetParam {
    fn dataset(&self) -> &str;
}

macro_rules! dataset_param {
    ($($t:ty),*) => {
        $(impl DatasetParam for $t {
            fn dataset(&self) -> &str {
                &self.dataset
            }
        })*
    };
}

dataset_param!(
    DatasetParams,
    NeuronNameParams,
    FindNeuronsParams,
    ConnectionsParams,
    MetaValParams,
    CommonConnectivityParams,
    DistributionParams,
    CompletenessParams
);

fn label(all_segments: bool) -> &'static str {
    if all_segments {
        "Segment"
    } else {
        "Neuron"
    }
}

/// Predicate selecting a neuron by name (type or instance) or body id
fn neuron_match(var: &str, name: &str, id: i64, contains: bool) -> ServiceResult<String> {
    let op = if contains { " CONTAINS " } else { "=~" };
    if !name.is_empty() {
        let lit = quote_string(name);
        Ok(format!(
            "({var}.type{op}{lit} OR {var}.instance{op}{lit})",
            var = var,
            op = op,
            lit = lit
        ))
    } else if id != 0 {
        Ok(format!("{}.bodyId = {}", var, id))
    } else {
        Err(ServiceError::bad_request("no neuron name specified"))
    }
}

fn thresholds(conds: &mut Conditions, var: &str, pre: i64, post: i64) {
    if pre > 0 {
        conds.push(format!("({}.pre >= {})", var, pre));
    }
    if post > 0 {
        conds.push(format!("({}.post >= {})", var, post));
    }
}

fn statuses(conds: &mut Conditions, var: &str, statuses: &[String]) {
    conds.push_any(
        statuses
            .iter()
            .map(|s| format!("{}.status = {}", var, quote_string(s))),
    );
}

/// Property keys must look like plain identifiers
fn checked_key(key: &str) -> ServiceResult<&str> {
    static KEY: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = KEY.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok());
    match pattern {
        Some(re) if re.is_match(key) => Ok(key),
        _ => Err(ServiceError::bad_request(format!("invalid key_name: {}", key))),
    }
}

pub fn find_neurons(p: &FindNeuronsParams) -> String {
    let mut conds = Conditions::new();
    if let Ok(m) = neuron_match("neuron", &p.neuron_name, p.neuron_id, p.enable_contains) {
        conds.push(m);
    }
    thresholds(&mut conds, "neuron", p.pre_threshold, p.post_threshold);
    statuses(&mut conds, "neuron", &p.statuses);
    for roi in p.input_rois.iter().chain(p.output_rois.iter()) {
        conds.push(format!("(neuron.{} = true)", quote_identifier(roi)));
    }
    format!(
        "MATCH (m:Meta) WITH m.superLevelRois AS rois MATCH (neuron :{}) {} RETURN neuron.bodyId AS bodyid, neuron.instance AS bodyname, neuron.type AS bodytype, neuron.status AS neuronStatus, neuron.roiInfo AS roiInfo, neuron.size AS size, neuron.pre AS npre, neuron.post AS npost, rois, neuron.notes as notes ORDER BY neuron.bodyId",
        label(p.all_segments),
        conds.where_clause()
    )
}

pub fn neuron_meta_vals(p: &MetaValParams) -> ServiceResult<String> {
    let key = checked_key(&p.key_name)?;
    Ok(format!("MATCH (n :Neuron) RETURN DISTINCT n.{} AS val", key))
}

pub fn ranked_table(p: &ConnectionsParams) -> ServiceResult<String> {
    let m = neuron_match("m", &p.neuron_name, p.neuron_id, p.enable_contains)?;
    Ok(format!(
        "MATCH (m:Neuron)-[e:ConnectsTo]-(n) WHERE {} RETURN m.instance AS Neuron1, m.type AS Neuron1Type, n.instance AS Neuron2, n.type AS Neuron2Type, e.weight AS Weight, n.bodyId AS Body2, id(m) AS m_id, id(n) AS n_id, id(startNode(e)) AS pre_id, m.bodyId AS Body1, e.weightHP AS WeightHP ORDER BY m.bodyId, e.weight DESC",
        m
    ))
}

pub fn simple_connections(p: &ConnectionsParams) -> ServiceResult<String> {
    let m = neuron_match("m", &p.neuron_name, p.neuron_id, p.enable_contains)?;
    let edge = if p.find_inputs {
        "<-[e:ConnectsTo]-"
    } else {
        "-[e:ConnectsTo]->"
    };
    Ok(format!(
        "MATCH (m:Meta) WITH m.superLevelRois AS rois MATCH (m:Neuron){}(n:Segment) WHERE {} RETURN m.instance AS Neuron1, m.type AS Neuron1Type, n.instance AS Neuron2, n.type AS Neuron2Type, n.bodyId AS Neuron2Id, e.weight AS Weight, m.bodyId AS Neuron1Id, n.status AS Neuron2Status, n.roiInfo AS Neuron2RoiInfo, n.size AS Neuron2Size, n.pre AS Neuron2Pre, n.post AS Neuron2Post, rois, e.weightHP AS WeightHP ORDER BY m.type, m.bodyId, e.weight DESC",
        edge, m
    ))
}

pub fn rois_in_neuron(p: &NeuronNameParams) -> ServiceResult<String> {
    let m = neuron_match("neuron", &p.neuron_name, p.neuron_id, p.enable_contains)?;
    Ok(format!(
        "MATCH (neuron :Neuron) WHERE {} RETURN neuron.bodyId AS bodyid, neuron.instance AS bodyname, neuron.type AS bodytype, neuron.roiInfo AS roiInfo ORDER BY neuron.bodyId",
        m
    ))
}

pub fn common_connectivity(p: &CommonConnectivityParams) -> ServiceResult<String> {
    let (id_or_type, list) = if !p.neuron_ids.is_empty() {
        let ids: Vec<String> = p.neuron_ids.iter().map(|id| id.to_string()).collect();
        ("bodyId", ids.join(","))
    } else if !p.neuron_names.is_empty() {
        let names: Vec<String> = p.neuron_names.iter().map(|n| quote_string(n)).collect();
        ("type", names.join(","))
    } else {
        return Err(ServiceError::bad_request("neuron ids or names not specified"));
    };
    let (edge, direction) = if p.find_inputs {
        ("<-[r:ConnectsTo]-", "input")
    } else {
        ("-[r:ConnectsTo]->", "output")
    };

    let mut conds = Conditions::new();
    thresholds(&mut conds, "c", p.pre_threshold, p.post_threshold);
    statuses(&mut conds, "c", &p.statuses);

    Ok(format!(
        "WITH [{list}] AS queriedNeurons MATCH (k:{label}){edge}(c) WHERE (k.{key} IN queriedNeurons{extra}) WITH k, c, r, toString(k.{key})+\"_weight\" AS dynamicWeight RETURN collect(apoc.map.fromValues([\"{direction}\", c.bodyId, \"name\", c.instance, \"type\", c.type, dynamicWeight, r.weight])) AS map",
        list = list,
        label = label(p.all_segments),
        edge = edge,
        key = id_or_type,
        extra = conds.and_suffix(),
        direction = direction
    ))
}

pub fn distribution(p: &DistributionParams) -> ServiceResult<String> {
    if p.roi.is_empty() {
        return Err(ServiceError::bad_request("ROI not specified"));
    }
    let kind = if p.is_pre { "pre" } else { "post" };
    Ok(format!(
        "MATCH (n:Segment {{{roi}: true}}) WHERE n.{kind} > 0 WITH n.bodyId as bodyId, apoc.convert.fromJsonMap(n.roiInfo)[{roi_lit}].{kind} AS {kind}size WHERE {kind}size > 0 WITH collect({{id: bodyId, {kind}: {kind}size}}) as bodyinfoarr, sum({kind}size) AS tot UNWIND bodyinfoarr AS bodyinfo RETURN bodyinfo.id AS id, bodyinfo.{kind} AS size, tot AS total ORDER BY bodyinfo.{kind} DESC",
        roi = quote_identifier(&p.roi),
        roi_lit = quote_string(&p.roi),
        kind = kind
    ))
}

pub fn completeness(p: &CompletenessParams) -> String {
    let mut conds = Conditions::new();
    thresholds(&mut conds, "n", p.pre_threshold, p.post_threshold);
    statuses(&mut conds, "n", &p.statuses);
    format!(
        "MATCH (n:{}) {} WITH apoc.convert.fromJsonMap(n.roiInfo) AS roiInfo WITH roiInfo AS roiInfo, keys(roiInfo) AS roiList UNWIND roiList AS roiName WITH roiName AS roiName, sum(roiInfo[roiName].pre) AS pre, sum(roiInfo[roiName].post) AS post MATCH (meta:Meta) WITH apoc.convert.fromJsonMap(meta.roiInfo) AS globInfo, roiName AS roiName, pre AS pre, post AS post RETURN roiName AS unlabelres, pre AS roipre, post AS roipost, globInfo[roiName].pre AS totalpre, globInfo[roiName].post AS totalpost ORDER BY roiName",
        label(p.all_segments),
        conds.where_clause()
    )
}
