//! Elasticsearch `_mapping` documents derived from a table data shape
//!
//! The engine reports a flat histogram of value types per dotted path,
//! e.g. `{"user.karma": {"int": 5, "float": 1}}`. Each path gets the
//! Elasticsearch type its observed values agree on and struct paths are
//! folded back into nested `properties`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

/// Union of values inside a list, not a real field
const LIST_ITEMS: &str = "$items";

const DEFAULT_TYPE: &str = "keyword";
const OBJECT_TYPE: &str = "object";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ElasticMapping {
    pub properties: BTreeMap<String, MappingValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappingValue {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, MappingValue>>,
}

impl MappingValue {
    fn leaf(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            properties: None,
        }
    }
}

const NULL: u16 = 1 << 0;
const BOOL: u16 = 1 << 1;
const INT: u16 = 1 << 2;
const FLOAT: u16 = 1 << 3;
const DECIMAL: u16 = 1 << 4;
const TIMESTAMP: u16 = 1 << 5;
const STRING: u16 = 1 << 6;
const LIST: u16 = 1 << 7;
const STRUCT: u16 = 1 << 8;
const SEXP: u16 = 1 << 9;
const CLOB: u16 = 1 << 10;
const BLOB: u16 = 1 << 11;
const ANNOTATION: u16 = 1 << 12;

fn type_bit(name: &str) -> Option<u16> {
    Some(match name {
        "null" => NULL,
        "bool" => BOOL,
        "int" => INT,
        "float" => FLOAT,
        "decimal" => DECIMAL,
        "timestamp" => TIMESTAMP,
        "string" => STRING,
        "list" => LIST,
        "struct" => STRUCT,
        "sexp" => SEXP,
        "clob" => CLOB,
        "blob" => BLOB,
        "annotation" => ANNOTATION,
        _ => return None,
    })
}

/// Set of engine types with a positive count in the histogram
fn observed_types(histogram: &Map<String, Value>) -> u16 {
    histogram
        .iter()
        .filter(|(_, count)| count.as_i64().is_some_and(|c| c > 0))
        .filter_map(|(name, _)| type_bit(name))
        .fold(0, |acc, bit| acc | bit)
}

/// Elasticsearch type for a set of engine types; nulls carry no type
fn elastic_type(types: u16) -> Option<&'static str> {
    match types & !NULL {
        BOOL => Some("boolean"),
        INT => Some("long"),
        FLOAT => Some("double"),
        TIMESTAMP => Some("date"),
        STRING => Some("keyword"),
        STRUCT => Some(OBJECT_TYPE),
        LIST => Some("list"),
        t if t == INT | FLOAT => Some("double"),
        _ => None,
    }
}

/// Translate the per-path type histogram into a mapping document. Paths
/// with conflicting or unknown types fall back to `keyword`.
pub fn datashape_to_mapping(fields: &Map<String, Value>) -> ElasticMapping {
    let mut properties = BTreeMap::new();

    for (path, histogram) in fields {
        if path.contains(LIST_ITEMS) {
            continue;
        }
        let Some(histogram) = histogram.as_object() else {
            tracing::debug!(path = %path, "skipping malformed data shape entry");
            continue;
        };

        let type_name = elastic_type(observed_types(histogram)).unwrap_or(DEFAULT_TYPE);
        properties.insert(path.clone(), MappingValue::leaf(type_name));
    }

    rebuild_hierarchy(&mut properties);
    ElasticMapping { properties }
}

/// Move `a.b` under the top-level object `a` as `b`, recursively
fn rebuild_hierarchy(properties: &mut BTreeMap<String, MappingValue>) {
    let objects: Vec<String> = properties
        .iter()
        .filter(|(path, value)| {
            value.type_name == OBJECT_TYPE && value.properties.is_none() && !path.contains('.')
        })
        .map(|(path, _)| path.clone())
        .collect();

    for path in objects {
        let prefix = format!("{}.", path);
        let children: Vec<String> = properties
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();

        let mut nested = BTreeMap::new();
        for key in children {
            if let Some(value) = properties.remove(&key) {
                nested.insert(key[prefix.len()..].to_string(), value);
            }
        }
        rebuild_hierarchy(&mut nested);

        if let Some(object) = properties.get_mut(&path) {
            object.properties = Some(nested);
        }
    }
}
