//! Documents persisted to the graph store.
//!
//! Schema layer: [`TmoNode`] / [`TmoEdge`]. Instance layer: [`MoNode`] /
//! [`MoEdge`], with [`MoDto`] embedding the full inventory MO projection.
//! [`Doc`] wraps any of them with the store's meta triplet.

use serde::{Deserialize, Serialize};

use crate::enums::{ConnectionKind, LinkKind, Status};
use crate::record::{Mo, Prm, Tprm};
use crate::value::PrmValue;

/// A stored document: meta triplet plus the body, flattened so the JSON is
/// exactly what the store returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Doc<T> {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_rev")]
    pub rev: String,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Doc<T> {
    /// Maps the body, keeping the meta triplet.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Doc<U> {
        Doc {
            id: self.id,
            key: self.key,
            rev: self.rev,
            body: f(self.body),
        }
    }
}

/// Schema vertex: one per TMO in the projection. The surrogate key is the
/// stringified TMO id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TmoNode {
    #[serde(rename = "id")]
    pub tmo_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    pub global_uniqueness: bool,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    pub materialize: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_type: Option<String>,
    #[serde(default)]
    pub minimize: bool,
    #[serde(default)]
    pub label: Vec<i64>,
    #[serde(default, alias = "point_tmo_const")]
    pub points_constraint_by_tmo: Vec<i64>,
    #[serde(default)]
    pub params: Vec<Tprm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commutation_tprms: Option<Vec<i64>>,
    #[serde(default = "default_true")]
    pub show_as_a_table: bool,
    #[serde(default)]
    pub busy_parameter_groups: Vec<Vec<i64>>,
}

fn default_true() -> bool {
    true
}

impl TmoNode {
    /// Whether MOs of this TMO are line-geometry objects.
    #[must_use]
    pub fn is_line(&self) -> bool {
        self.geometry_type.as_deref() == Some("line")
    }

    #[must_use]
    pub fn param(&self, tprm_id: i64) -> Option<&Tprm> {
        self.params.iter().find(|p| p.id == tprm_id)
    }
}

/// Schema edge between TMO vertices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TmoEdge {
    #[serde(rename = "_from")]
    pub from: String,
    #[serde(rename = "_to")]
    pub to: String,
    pub link_type: LinkKind,
    pub enabled: bool,
    #[serde(default)]
    pub tprm_id: Option<i64>,
}

/// Triggers of a resolved value: the MO and PRM ids whose change invalidates
/// the resolution.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParsedValueTriggers {
    #[serde(default)]
    pub mos: Vec<i64>,
    #[serde(default)]
    pub prms: Vec<i64>,
}

/// A link-typed value resolved to its human-readable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedValue {
    pub raw_value: PrmValue,
    pub value: PrmValue,
    pub triggers: ParsedValueTriggers,
}

/// Parameter instance with an optional resolved value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrmDto {
    pub id: i64,
    pub tprm_id: i64,
    pub mo_id: i64,
    #[serde(default)]
    pub value: PrmValue,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_value: Option<ParsedValue>,
}

impl From<Prm> for PrmDto {
    fn from(prm: Prm) -> Self {
        PrmDto {
            id: prm.id,
            tprm_id: prm.tprm_id,
            mo_id: prm.mo_id,
            value: prm.value,
            version: prm.version,
            parsed_value: None,
        }
    }
}

/// The inventory MO projection stored on a real MoNode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoDto {
    pub id: i64,
    pub tmo_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_id: Option<i64>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub active: bool,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pov: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_a_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_b_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub params: Vec<PrmDto>,
}

impl MoDto {
    #[must_use]
    pub fn from_mo(mo: Mo) -> Self {
        MoDto {
            id: mo.id,
            tmo_id: mo.tmo_id,
            p_id: mo.p_id,
            name: mo.name,
            label: mo.label,
            active: mo.active,
            version: mo.version,
            latitude: mo.latitude,
            longitude: mo.longitude,
            pov: mo.pov,
            geometry: mo.geometry,
            model: mo.model,
            point_a_id: mo.point_a_id,
            point_b_id: mo.point_b_id,
            status: mo.status,
            params: mo.params.into_iter().map(PrmDto::from).collect(),
        }
    }

    #[must_use]
    pub fn param_by_tprm(&self, tprm_id: i64) -> Option<&PrmDto> {
        self.params.iter().find(|p| p.tprm_id == tprm_id)
    }
}

/// Instance vertex: either a real MO (`data` present) or a grouping node
/// (`grouped_by_tprm` present, `data` absent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouped_by_tprm: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_p_id: Option<i64>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub tmo: i64,
    pub mo_ids: Vec<i64>,
    pub is_trace: bool,
    pub data: Option<MoDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed: Option<Vec<String>>,
    #[serde(default = "MoNode::root_breadcrumbs")]
    pub breadcrumbs: String,
}

impl MoNode {
    #[must_use]
    pub fn root_breadcrumbs() -> String {
        "/".to_string()
    }

    /// A real MO node, before index/breadcrumb fill.
    #[must_use]
    pub fn from_dto(data: MoDto, is_trace: bool) -> Self {
        MoNode {
            grouped_by_tprm: None,
            group_p_id: None,
            name: data.name.clone(),
            label: data.label.clone(),
            tmo: data.tmo_id,
            mo_ids: vec![data.id],
            is_trace,
            data: Some(data),
            indexed: None,
            breadcrumbs: Self::root_breadcrumbs(),
        }
    }

    #[must_use]
    pub fn is_grouping(&self) -> bool {
        self.grouped_by_tprm.is_some()
    }
}

/// Instance edge. `source_id` points at the document the edge was derived
/// from: the real edge for spread copies, the line MO for geometry edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoEdge {
    #[serde(rename = "_from")]
    pub from: String,
    #[serde(rename = "_to")]
    pub to: String,
    pub connection_type: ConnectionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prm: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tprm: Option<i64>,
    pub is_trace: bool,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

impl MoEdge {
    /// A real `p_id` edge from child to parent.
    #[must_use]
    pub fn parent_link(from: &str, to: &str, is_trace: bool) -> Self {
        MoEdge {
            from: from.to_string(),
            to: to.to_string(),
            connection_type: ConnectionKind::PId,
            prm: None,
            tprm: None,
            is_trace,
            is_virtual: false,
            source_id: None,
        }
    }
}

/// Undirected equivalence of a real semantic edge, backing k-shortest-paths.
/// Hash and equality ignore endpoint order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathKey {
    #[serde(rename = "_from")]
    pub from: String,
    #[serde(rename = "_to")]
    pub to: String,
}

impl PathKey {
    #[must_use]
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        PathKey {
            from: from.into(),
            to: to.into(),
        }
    }

    fn ordered(&self) -> (&str, &str) {
        if self.from <= self.to {
            (&self.from, &self.to)
        } else {
            (&self.to, &self.from)
        }
    }
}

impl PartialEq for PathKey {
    fn eq(&self, other: &Self) -> bool {
        self.ordered() == other.ordered()
    }
}

impl Eq for PathKey {}

impl std::hash::Hash for PathKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ordered().hash(state);
    }
}

/// Registry entry for one projection, stored in the system database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainRecord {
    pub name: String,
    pub tmo_id: i64,
    pub status: Status,
    pub database: String,
    #[serde(default)]
    pub active_tmo_ids: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmo_datetime: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mo_datetime: Option<chrono::DateTime<chrono::Utc>>,
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn doc_meta_uses_store_aliases() {
        let json = r#"{"_id":"main/1","_key":"1","_rev":"abc",
            "name":"switch-1","tmo":42600,"mo_ids":[7],"is_trace":false,
            "data":null,"breadcrumbs":"/"}"#;
        let doc: Doc<MoNode> = serde_json::from_str(json).unwrap();
        assert_eq!(doc.id, "main/1");
        assert_eq!(doc.key, "1");
        assert_eq!(doc.body.name, "switch-1");

        let back = serde_json::to_value(&doc).unwrap();
        assert_eq!(back["_id"], "main/1");
        assert_eq!(back["_rev"], "abc");
    }

    #[test]
    fn mo_edge_aliases_and_virtual_field() {
        let edge = MoEdge {
            from: "main/1".into(),
            to: "main/2".into(),
            connection_type: ConnectionKind::TwoWayLink,
            prm: Some(vec![5]),
            tprm: Some(9),
            is_trace: false,
            is_virtual: true,
            source_id: Some("mainEdge/77".into()),
        };
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["_from"], "main/1");
        assert_eq!(json["_to"], "main/2");
        assert_eq!(json["connection_type"], "two-way link");
        assert_eq!(json["virtual"], true);
    }

    #[test]
    fn path_key_is_order_insensitive() {
        use std::collections::HashSet;
        let a = PathKey::new("main/1", "main/2");
        let b = PathKey::new("main/2", "main/1");
        assert_eq!(a, b);
        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn grouping_node_has_no_data() {
        let node = MoNode {
            grouped_by_tprm: Some(11),
            group_p_id: Some(3),
            name: "1 Gbit".into(),
            label: None,
            tmo: 42600,
            mo_ids: vec![7, 8],
            is_trace: false,
            data: None,
            indexed: None,
            breadcrumbs: "/".into(),
        };
        assert!(node.is_grouping());
        let json = serde_json::to_value(&node).unwrap();
        assert!(json["data"].is_null());
    }

    #[test]
    fn tmo_node_accepts_point_tmo_const_alias() {
        let node: TmoNode = serde_json::from_str(
            r#"{"id":42592,"name":"Fiber","enabled":true,"global_uniqueness":false,
                "virtual":false,"materialize":true,"point_tmo_const":[42590]}"#,
        )
        .unwrap();
        assert_eq!(node.points_constraint_by_tmo, vec![42590]);
        assert!(node.show_as_a_table);
    }
}
