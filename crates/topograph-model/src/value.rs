//! Parameter values.
//!
//! A PRM carries one of: a typed scalar, a list of scalars (for
//! `multiple=true` parameters, delivered by the inventory as an opaque
//! hex-encoded blob), or nothing. The union is untagged in JSON so stored
//! documents read back exactly as written.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// The value of a parameter instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrmValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<PrmValue>),
}

impl Default for PrmValue {
    fn default() -> Self {
        PrmValue::Null
    }
}

impl PrmValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, PrmValue::Null)
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PrmValue::Int(v) => Some(*v),
            PrmValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Integer ids carried by this value, treating a scalar as a singleton.
    /// Link-typed parameters store MO/PRM ids this way.
    #[must_use]
    pub fn ids(&self) -> Vec<i64> {
        match self {
            PrmValue::List(items) => items.iter().filter_map(PrmValue::as_i64).collect(),
            other => other.as_i64().into_iter().collect(),
        }
    }

    /// Canonical display form: strings verbatim, everything else as
    /// canonical JSON (stable key order, preserved numeric form). Group-node
    /// names and `indexed` entries are produced with this.
    #[must_use]
    pub fn stringify(&self) -> String {
        match self {
            PrmValue::Str(s) => s.clone(),
            other => canonical_json(&other.to_json()),
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Json {
        match self {
            PrmValue::Null => Json::Null,
            PrmValue::Bool(b) => Json::Bool(*b),
            PrmValue::Int(i) => Json::from(*i),
            PrmValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            PrmValue::Str(s) => Json::String(s.clone()),
            PrmValue::List(items) => Json::Array(items.iter().map(PrmValue::to_json).collect()),
        }
    }

    #[must_use]
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => PrmValue::Null,
            Json::Bool(b) => PrmValue::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PrmValue::Int(i)
                } else {
                    PrmValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Json::String(s) => PrmValue::Str(s.clone()),
            Json::Array(items) => PrmValue::List(items.iter().map(PrmValue::from_json).collect()),
            // Objects do not occur in parameter values; keep them readable.
            Json::Object(_) => PrmValue::Str(canonical_json(json)),
        }
    }
}

impl From<i64> for PrmValue {
    fn from(v: i64) -> Self {
        PrmValue::Int(v)
    }
}

impl From<&str> for PrmValue {
    fn from(v: &str) -> Self {
        PrmValue::Str(v.to_string())
    }
}

impl From<String> for PrmValue {
    fn from(v: String) -> Self {
        PrmValue::Str(v)
    }
}

/// Serializes JSON with object keys sorted recursively, so the same value
/// always yields the same string regardless of construction order.
#[must_use]
pub fn canonical_json(value: &Json) -> String {
    fn sort(value: &Json) -> Json {
        match value {
            Json::Object(map) => {
                let mut entries: Vec<(&String, &Json)> = map.iter().collect();
                entries.sort_by_key(|(k, _)| k.as_str());
                let mut sorted = serde_json::Map::new();
                for (k, v) in entries {
                    sorted.insert(k.clone(), sort(v));
                }
                Json::Object(sorted)
            }
            Json::Array(items) => Json::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }
    sort(value).to_string()
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn untagged_round_trip() {
        let values = vec![
            PrmValue::Null,
            PrmValue::Bool(true),
            PrmValue::Int(-7),
            PrmValue::Str("fiber".into()),
            PrmValue::List(vec![PrmValue::Int(7), PrmValue::Int(8)]),
        ];
        for value in values {
            let json = serde_json::to_string(&value).unwrap();
            let back: PrmValue = serde_json::from_str(&json).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn ids_from_scalar_and_list() {
        assert_eq!(PrmValue::Int(7).ids(), vec![7]);
        assert_eq!(PrmValue::Str("12".into()).ids(), vec![12]);
        assert_eq!(
            PrmValue::List(vec![PrmValue::Int(7), PrmValue::Int(8)]).ids(),
            vec![7, 8]
        );
        assert!(PrmValue::Null.ids().is_empty());
    }

    #[test]
    fn stringify_is_canonical() {
        assert_eq!(PrmValue::Str("as is".into()).stringify(), "as is");
        assert_eq!(PrmValue::Int(42).stringify(), "42");
        assert_eq!(
            PrmValue::List(vec![PrmValue::Int(1), PrmValue::Str("a".into())]).stringify(),
            r#"[1,"a"]"#
        );
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let value: Json = serde_json::from_str(r#"{"b":1,"a":{"d":2,"c":3}}"#).unwrap();
        assert_eq!(canonical_json(&value), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }
}
