//! Inventory record shapes, as delivered by the RPC backend and the change
//! stream.
//!
//! The wire encodes "absent" in several ways this module normalizes: numeric
//! ids use `0` for none, strings use `""`, and `constraint` may arrive as an
//! already-parsed list or a JSON-encoded string. Deserialization accepts all
//! of them; the in-memory shape is always the normalized one.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as Json;

use crate::value::PrmValue;

fn zero_as_none<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    // Accepts int, stringified int (int64 over JSON), or null.
    let raw = Option::<Json>::deserialize(deserializer)?;
    let value = match raw {
        None | Some(Json::Null) => None,
        Some(Json::Number(n)) => n.as_i64(),
        Some(Json::String(s)) if s.is_empty() || s == "0" => None,
        Some(Json::String(s)) => Some(s.parse().map_err(serde::de::Error::custom)?),
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected integer id, got {other}"
            )))
        }
    };
    Ok(value.filter(|v| *v != 0))
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()))
}

fn constraint_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Json>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(Json::Null) => None,
        Some(Json::String(s)) if s.is_empty() => None,
        Some(Json::String(s)) => Some(s),
        Some(other @ Json::Array(_)) | Some(other @ Json::Number(_)) => Some(other.to_string()),
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "unexpected constraint value: {other}"
            )))
        }
    })
}

/// Type of Parameter: an attribute definition on a TMO.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tprm {
    pub id: i64,
    pub tmo_id: i64,
    pub name: String,
    pub val_type: String,
    pub required: bool,
    pub returnable: bool,
    pub multiple: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON-encoded list of target TMO ids for link-typed parameters.
    #[serde(default, deserialize_with = "constraint_as_string")]
    pub constraint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prm_link_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

/// Value types a TPRM may declare. Kept as string constants rather than an
/// enum: the inventory owns the vocabulary and extends it without notice.
pub mod val_type {
    pub const STR: &str = "str";
    pub const INT: &str = "int";
    pub const FLOAT: &str = "float";
    pub const BOOL: &str = "bool";
    pub const DATE: &str = "date";
    pub const DATETIME: &str = "datetime";
    pub const MO_LINK: &str = "mo_link";
    pub const TWO_WAY_LINK: &str = "two-way link";
    pub const PRM_LINK: &str = "prm_link";
}

impl Tprm {
    /// Whether this parameter links to other MOs (directly or two-way).
    #[must_use]
    pub fn is_mo_link(&self) -> bool {
        self.val_type == val_type::MO_LINK || self.val_type == val_type::TWO_WAY_LINK
    }

    /// Target TMO ids from the JSON-encoded `constraint`. A bare integer is
    /// treated as a singleton list; garbage yields an empty list.
    #[must_use]
    pub fn constraint_tmo_ids(&self) -> Vec<i64> {
        let Some(raw) = self.constraint.as_deref() else {
            return Vec::new();
        };
        match serde_json::from_str::<Json>(raw) {
            Ok(Json::Array(items)) => items.iter().filter_map(Json::as_i64).collect(),
            Ok(Json::Number(n)) => n.as_i64().into_iter().collect(),
            _ => Vec::new(),
        }
    }
}

/// Parameter instance attached to an MO.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prm {
    pub id: i64,
    pub tprm_id: i64,
    pub mo_id: i64,
    #[serde(default)]
    pub value: PrmValue,
    pub version: i64,
}

/// Managed Object instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mo {
    pub id: i64,
    pub tmo_id: i64,
    #[serde(default, deserialize_with = "zero_as_none")]
    pub p_id: Option<i64>,
    pub name: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub label: Option<String>,
    pub active: bool,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pov: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Json>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "zero_as_none")]
    pub point_a_id: Option<i64>,
    #[serde(default, deserialize_with = "zero_as_none")]
    pub point_b_id: Option<i64>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub params: Vec<Prm>,
}

impl Mo {
    /// The inventory encodes "no coordinates" as `(0, 0)`.
    pub fn normalize_coordinates(&mut self) {
        if self.latitude == Some(0.0) && self.longitude == Some(0.0) {
            self.latitude = None;
            self.longitude = None;
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn zero_and_string_ids_normalize_to_none() {
        let mo: Mo = serde_json::from_str(
            r#"{"id":1,"tmo_id":2,"p_id":0,"name":"n","active":true,"version":1,
                "point_a_id":"0","point_b_id":"77"}"#,
        )
        .unwrap();
        assert_eq!(mo.p_id, None);
        assert_eq!(mo.point_a_id, None);
        assert_eq!(mo.point_b_id, Some(77));
    }

    #[test]
    fn constraint_accepts_list_and_string() {
        let from_list: Tprm = serde_json::from_str(
            r#"{"id":1,"tmo_id":2,"name":"t","val_type":"mo_link","required":false,
                "returnable":true,"multiple":false,"constraint":[3,4]}"#,
        )
        .unwrap();
        assert_eq!(from_list.constraint.as_deref(), Some("[3,4]"));
        assert_eq!(from_list.constraint_tmo_ids(), vec![3, 4]);

        let from_str: Tprm = serde_json::from_str(
            r#"{"id":1,"tmo_id":2,"name":"t","val_type":"mo_link","required":false,
                "returnable":true,"multiple":false,"constraint":"[5]"}"#,
        )
        .unwrap();
        assert_eq!(from_str.constraint_tmo_ids(), vec![5]);
    }

    #[test]
    fn mo_link_covers_both_directions() {
        let mut tprm: Tprm = serde_json::from_str(
            r#"{"id":1,"tmo_id":2,"name":"t","val_type":"two-way link","required":false,
                "returnable":true,"multiple":false}"#,
        )
        .unwrap();
        assert!(tprm.is_mo_link());
        tprm.val_type = val_type::PRM_LINK.to_string();
        assert!(!tprm.is_mo_link());
    }

    #[test]
    fn zero_coordinates_are_cleared() {
        let mut mo: Mo = serde_json::from_str(
            r#"{"id":1,"tmo_id":2,"name":"n","active":true,"version":1,
                "latitude":0.0,"longitude":0.0}"#,
        )
        .unwrap();
        mo.normalize_coordinates();
        assert_eq!(mo.latitude, None);
        assert_eq!(mo.longitude, None);
    }
}
