//! Canonical cell values and the normalizer that produces them
//!
//! Backends hand back their own value shapes (graph nodes, relationships,
//! paths, spatial points, numeric literal tokens). Everything leaving the
//! storage layer is a [`Cell`].

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Smallest f64 that no longer fits in an i64 (2^63)
const I64_UPPER_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// One canonical result cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    List(Vec<Cell>),
    Map(BTreeMap<String, Cell>),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            Cell::Float(v) => float_as_exact_i64(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Cell::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Cell]> {
        match self {
            Cell::List(items) => Some(items),
            _ => None,
        }
    }

    /// Textual rendering of scalars; composites have none
    pub fn to_text(&self) -> Option<String> {
        match self {
            Cell::Int(v) => Some(v.to_string()),
            Cell::Float(v) => Some(v.to_string()),
            Cell::Bool(b) => Some(b.to_string()),
            Cell::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Converts to a JSON value without passing integers through f64
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Null => serde_json::Value::Null,
            Cell::Int(v) => serde_json::Value::from(*v),
            Cell::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Cell::Bool(b) => serde_json::Value::Bool(*b),
            Cell::String(s) => serde_json::Value::String(s.clone()),
            Cell::List(items) => serde_json::Value::Array(items.iter().map(Cell::to_json).collect()),
            Cell::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::String(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::String(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Cell::Bool(value)
    }
}

/// Value shapes a graph backend can hand back before normalization
#[derive(Debug, Clone, PartialEq)]
pub enum BackendValue {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    /// Numeric literal kept as text by the decoder
    Number(String),
    List(Vec<BackendValue>),
    Map(BTreeMap<String, BackendValue>),
    Node {
        properties: BTreeMap<String, BackendValue>,
    },
    Relationship {
        id: i64,
        rel_type: String,
        start_node_id: i64,
        end_node_id: i64,
        properties: BTreeMap<String, BackendValue>,
    },
    Path {
        nodes: Vec<BackendValue>,
        relationships: Vec<BackendValue>,
    },
    Point {
        srid: i64,
        coordinates: Vec<f64>,
    },
    /// Anything the decoder has no dedicated shape for
    Other(String),
}

impl fmt::Display for BackendValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendValue::Other(s) | BackendValue::String(s) | BackendValue::Number(s) => {
                write!(f, "{}", s)
            }
            other => write!(f, "{:?}", other),
        }
    }
}

/// Returns the integer a float stands for when the conversion round-trips
pub fn float_as_exact_i64(value: f64) -> Option<i64> {
    if !value.is_finite() || value.fract() != 0.0 {
        return None;
    }
    if value < i64::MIN as f64 || value >= I64_UPPER_BOUND {
        return None;
    }
    let as_int = value as i64;
    if as_int as f64 == value {
        Some(as_int)
    } else {
        None
    }
}

/// Parses a numeric literal token: int64 first, float64 second, text last
pub fn parse_numeric_token(token: &str) -> Cell {
    if let Ok(v) = token.parse::<i64>() {
        return Cell::Int(v);
    }
    if let Ok(v) = token.parse::<f64>() {
        return Cell::Float(v);
    }
    Cell::String(token.to_string())
}

fn normalize_properties(properties: BTreeMap<String, BackendValue>) -> BTreeMap<String, Cell> {
    properties
        .into_iter()
        .map(|(key, value)| (key, normalize(value)))
        .collect()
}

/// Converts one backend value into a canonical cell
pub fn normalize(value: BackendValue) -> Cell {
    match value {
        BackendValue::Null => Cell::Null,
        BackendValue::Integer(v) => Cell::Int(v),
        BackendValue::Float(v) => match float_as_exact_i64(v) {
            Some(as_int) => Cell::Int(as_int),
            None => Cell::Float(v),
        },
        BackendValue::Number(token) => parse_numeric_token(&token),
        BackendValue::Boolean(b) => Cell::Bool(b),
        BackendValue::String(s) => Cell::String(s),
        BackendValue::List(items) => Cell::List(items.into_iter().map(normalize).collect()),
        BackendValue::Map(map) => Cell::Map(normalize_properties(map)),
        BackendValue::Node { properties } => Cell::Map(normalize_properties(properties)),
        BackendValue::Relationship {
            id,
            rel_type,
            start_node_id,
            end_node_id,
            properties,
        } => {
            let mut map = normalize_properties(properties);
            // reserved keys overwrite colliding properties
            map.insert("id".to_string(), Cell::Int(id));
            map.insert("type".to_string(), Cell::String(rel_type));
            map.insert("startNodeId".to_string(), Cell::Int(start_node_id));
            map.insert("endNodeId".to_string(), Cell::Int(end_node_id));
            Cell::Map(map)
        }
        BackendValue::Path {
            nodes,
            relationships,
        } => {
            let mut map = BTreeMap::new();
            map.insert(
                "nodes".to_string(),
                Cell::List(nodes.into_iter().map(normalize).collect()),
            );
            map.insert(
                "relationships".to_string(),
                Cell::List(relationships.into_iter().map(normalize).collect()),
            );
            Cell::Map(map)
        }
        BackendValue::Point { srid, coordinates } => point_cell(srid, coordinates),
        BackendValue::Other(text) => Cell::String(text),
    }
}

fn point_cell(srid: i64, coordinates: Vec<f64>) -> Cell {
    let name = if coordinates.len() == 3 {
        "cartesian-3d"
    } else {
        "cartesian"
    };

    let mut properties = BTreeMap::new();
    properties.insert(
        "href".to_string(),
        Cell::String(format!(
            "http://spatialreference.org/ref/sr-org/{}/ogcwkt/",
            srid
        )),
    );
    properties.insert("type".to_string(), Cell::from("ogcwkt"));

    let mut crs = BTreeMap::new();
    crs.insert("name".to_string(), Cell::from(name));
    crs.insert("properties".to_string(), Cell::Map(properties));
    crs.insert("srid".to_string(), Cell::Int(srid));
    crs.insert("type".to_string(), Cell::from("link"));

    let mut map = BTreeMap::new();
    map.insert(
        "coordinates".to_string(),
        Cell::List(coordinates.into_iter().map(Cell::Float).collect()),
    );
    map.insert("crs".to_string(), Cell::Map(crs));
    map.insert("type".to_string(), Cell::from("Point"));
    Cell::Map(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, BackendValue)]) -> BTreeMap<String, BackendValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_large_token_stays_integer() {
        // 2^55 + 1 is not representable as f64
        let cell = normalize(BackendValue::Number("36028797018963969".to_string()));
        assert_eq!(cell, Cell::Int(36_028_797_018_963_969));
        assert_eq!(serde_json::to_string(&cell).unwrap(), "36028797018963969");
    }

    #[test]
    fn test_token_fallbacks() {
        assert_eq!(parse_numeric_token("2.5"), Cell::Float(2.5));
        assert_eq!(
            parse_numeric_token("99999999999999999999"),
            Cell::Float(99999999999999999999.0)
        );
        assert_eq!(parse_numeric_token("abc"), Cell::String("abc".to_string()));
    }

    #[test]
    fn test_whole_float_becomes_int() {
        assert_eq!(normalize(BackendValue::Float(42.0)), Cell::Int(42));
        assert_eq!(normalize(BackendValue::Float(-7.0)), Cell::Int(-7));
        assert_eq!(normalize(BackendValue::Float(1.5)), Cell::Float(1.5));
        assert_eq!(normalize(BackendValue::Float(f64::NAN)).as_f64().map(f64::is_nan), Some(true));
        // 2^63 overflows i64 and must stay a float
        assert_eq!(
            normalize(BackendValue::Float(I64_UPPER_BOUND)),
            Cell::Float(I64_UPPER_BOUND)
        );
    }

    #[test]
    fn test_node_becomes_property_map() {
        let node = BackendValue::Node {
            properties: props(&[
                ("bodyId", BackendValue::Number("1234567890123".to_string())),
                ("type", BackendValue::String("KC".to_string())),
            ]),
        };
        let cell = normalize(node);
        let expected: BTreeMap<String, Cell> = [
            ("bodyId".to_string(), Cell::Int(1_234_567_890_123)),
            ("type".to_string(), Cell::from("KC")),
        ]
        .into_iter()
        .collect();
        assert_eq!(cell, Cell::Map(expected));
    }

    #[test]
    fn test_relationship_reserved_keys_win() {
        let rel = BackendValue::Relationship {
            id: 9,
            rel_type: "ConnectsTo".to_string(),
            start_node_id: 1,
            end_node_id: 2,
            properties: props(&[
                ("weight", BackendValue::Integer(12)),
                ("type", BackendValue::String("shadowed".to_string())),
            ]),
        };
        let Cell::Map(map) = normalize(rel) else {
            panic!("relationship should normalize to a map");
        };
        assert_eq!(map["id"], Cell::Int(9));
        assert_eq!(map["type"], Cell::from("ConnectsTo"));
        assert_eq!(map["startNodeId"], Cell::Int(1));
        assert_eq!(map["endNodeId"], Cell::Int(2));
        assert_eq!(map["weight"], Cell::Int(12));
    }

    #[test]
    fn test_path_shape() {
        let path = BackendValue::Path {
            nodes: vec![
                BackendValue::Node { properties: BTreeMap::new() },
                BackendValue::Node { properties: BTreeMap::new() },
            ],
            relationships: vec![BackendValue::Relationship {
                id: 1,
                rel_type: "ConnectsTo".to_string(),
                start_node_id: 10,
                end_node_id: 11,
                properties: BTreeMap::new(),
            }],
        };
        let Cell::Map(map) = normalize(path) else {
            panic!("path should normalize to a map");
        };
        assert_eq!(map["nodes"].as_list().map(|l| l.len()), Some(2));
        assert_eq!(map["relationships"].as_list().map(|l| l.len()), Some(1));
    }

    #[test]
    fn test_point_shape() {
        let cell = normalize(BackendValue::Point {
            srid: 9157,
            coordinates: vec![1.0, 2.0, 3.0],
        });
        let json = serde_json::to_value(&cell).unwrap();
        assert_eq!(json["type"], "Point");
        assert_eq!(json["crs"]["srid"], 9157);
        assert_eq!(json["crs"]["name"], "cartesian-3d");
        assert_eq!(
            json["crs"]["properties"]["href"],
            "http://spatialreference.org/ref/sr-org/9157/ogcwkt/"
        );
        assert_eq!(json["coordinates"].as_array().map(|a| a.len()), Some(3));
    }

    #[test]
    fn test_other_becomes_string() {
        assert_eq!(
            normalize(BackendValue::Other("2024-01-01T00:00:00Z".to_string())),
            Cell::from("2024-01-01T00:00:00Z")
        );
    }
}
