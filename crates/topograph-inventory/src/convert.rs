//! Proto → model conversion.
//!
//! The wire encodes "absent" as `0` for ids and `""` for strings; model
//! types use `Option`. Parameter values are converted against their TPRM
//! here so every consumer downstream sees typed values only.

use std::collections::HashMap;

use topograph_model::codec::convert_value;
use topograph_model::{Mo, Prm, PrmValue, Tprm};

use crate::api::TmoTree;
use crate::error::{InventoryError, InventoryResult};
use crate::proto;

fn id_opt(raw: i64) -> Option<i64> {
    (raw != 0).then_some(raw)
}

fn str_opt(raw: String) -> Option<String> {
    (!raw.is_empty()).then_some(raw)
}

fn json_opt(raw: String) -> Option<serde_json::Value> {
    str_opt(raw).and_then(|s| serde_json::from_str(&s).ok())
}

pub fn tmo_tree(node: proto::TmoTreeNode) -> TmoTree {
    TmoTree {
        id: node.id,
        p_id: id_opt(node.p_id),
        name: node.name,
        icon: str_opt(node.icon),
        description: str_opt(node.description),
        is_virtual: node.r#virtual,
        global_uniqueness: node.global_uniqueness,
        materialize: node.materialize,
        points_constraint_by_tmo: node.points_constraint_by_tmo,
        geometry_type: str_opt(node.geometry_type),
        line_type: str_opt(node.line_type),
        label: node.label,
        minimize: node.minimize,
        children: node.child.into_iter().map(tmo_tree).collect(),
    }
}

pub fn tprm(raw: proto::Tprm) -> Tprm {
    Tprm {
        id: raw.id,
        tmo_id: raw.tmo_id,
        name: raw.name,
        val_type: raw.val_type,
        required: raw.required,
        returnable: raw.returnable,
        multiple: raw.multiple,
        description: str_opt(raw.description),
        constraint: str_opt(raw.constraint),
        prm_link_filter: str_opt(raw.prm_link_filter),
        group: str_opt(raw.group),
        version: id_opt(raw.version),
    }
}

/// Converts one PRM, typing its value against the owning TPRM. A PRM whose
/// TPRM is unknown is an inventory inconsistency and surfaces as an error.
pub fn prm(raw: proto::Prm, tprms: &HashMap<i64, Tprm>) -> InventoryResult<Prm> {
    let tprm = tprms.get(&raw.tprm_id).ok_or_else(|| {
        InventoryError::InvalidRequest(format!(
            "tprm {} not found for prm {}",
            raw.tprm_id, raw.id
        ))
    })?;
    let value = if raw.value.is_empty() {
        PrmValue::Null
    } else {
        convert_value(&raw.value, tprm)?
    };
    Ok(Prm {
        id: raw.id,
        tprm_id: raw.tprm_id,
        mo_id: raw.mo_id,
        value,
        version: raw.version,
    })
}

/// Converts one MO including its parameters.
pub fn mo(raw: proto::Mo, tprms: &HashMap<i64, Tprm>) -> InventoryResult<Mo> {
    let params = raw
        .params
        .into_iter()
        .map(|p| prm(p, tprms))
        .collect::<InventoryResult<Vec<_>>>()?;
    let mut mo = Mo {
        id: raw.id,
        tmo_id: raw.tmo_id,
        p_id: id_opt(raw.p_id),
        name: raw.name,
        label: str_opt(raw.label),
        active: raw.active,
        version: raw.version,
        latitude: Some(raw.latitude),
        longitude: Some(raw.longitude),
        pov: json_opt(raw.pov),
        geometry: json_opt(raw.geometry),
        model: str_opt(raw.model),
        point_a_id: id_opt(raw.point_a_id),
        point_b_id: id_opt(raw.point_b_id),
        status: str_opt(raw.status),
        params,
    };
    mo.normalize_coordinates();
    Ok(mo)
}

/// Lenient PRM conversion for change-stream payloads: a PRM whose TPRM is
/// not (yet) known keeps its raw string value; the consumer types it later
/// against the stored schema layer.
#[must_use]
pub fn prm_lenient(raw: proto::Prm, tprms: &HashMap<i64, Tprm>) -> Prm {
    if tprms.contains_key(&raw.tprm_id) {
        if let Ok(converted) = prm(raw.clone(), tprms) {
            return converted;
        }
    }
    Prm {
        id: raw.id,
        tprm_id: raw.tprm_id,
        mo_id: raw.mo_id,
        value: if raw.value.is_empty() {
            PrmValue::Null
        } else {
            PrmValue::Str(raw.value)
        },
        version: raw.version,
    }
}

/// Lenient MO conversion for change-stream payloads.
#[must_use]
pub fn mo_lenient(raw: proto::Mo, tprms: &HashMap<i64, Tprm>) -> Mo {
    let params = raw
        .params
        .into_iter()
        .map(|p| prm_lenient(p, tprms))
        .collect();
    let mut mo = Mo {
        id: raw.id,
        tmo_id: raw.tmo_id,
        p_id: id_opt(raw.p_id),
        name: raw.name,
        label: str_opt(raw.label),
        active: raw.active,
        version: raw.version,
        latitude: Some(raw.latitude),
        longitude: Some(raw.longitude),
        pov: json_opt(raw.pov),
        geometry: json_opt(raw.geometry),
        model: str_opt(raw.model),
        point_a_id: id_opt(raw.point_a_id),
        point_b_id: id_opt(raw.point_b_id),
        status: str_opt(raw.status),
        params,
    };
    mo.normalize_coordinates();
    mo
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_tprms() -> HashMap<i64, Tprm> {
        let mut map = HashMap::new();
        map.insert(
            9,
            Tprm {
                id: 9,
                tmo_id: 2,
                name: "speed".into(),
                val_type: "int".into(),
                required: false,
                returnable: true,
                multiple: false,
                description: None,
                constraint: None,
                prm_link_filter: None,
                group: None,
                version: None,
            },
        );
        map
    }

    #[test]
    fn zero_ids_and_empty_strings_become_none() {
        let raw = proto::Mo {
            id: 1,
            tmo_id: 2,
            p_id: 0,
            name: "switch".into(),
            label: String::new(),
            active: true,
            version: 3,
            latitude: 0.0,
            longitude: 0.0,
            pov: String::new(),
            geometry: String::new(),
            model: String::new(),
            point_a_id: 0,
            point_b_id: 77,
            status: String::new(),
            params: vec![],
        };
        let mo = mo(raw, &test_tprms()).unwrap();
        assert_eq!(mo.p_id, None);
        assert_eq!(mo.label, None);
        assert_eq!(mo.point_b_id, Some(77));
        // (0, 0) coordinates mean "unset"
        assert_eq!(mo.latitude, None);
    }

    #[test]
    fn prm_values_are_typed() {
        let raw = proto::Prm {
            id: 50,
            tprm_id: 9,
            mo_id: 1,
            value: "42".into(),
            version: 1,
        };
        let converted = prm(raw, &test_tprms()).unwrap();
        assert_eq!(converted.value, PrmValue::Int(42));
    }

    #[test]
    fn unknown_tprm_is_an_error() {
        let raw = proto::Prm {
            id: 50,
            tprm_id: 999,
            mo_id: 1,
            value: "42".into(),
            version: 1,
        };
        assert!(prm(raw, &test_tprms()).is_err());
    }

    #[test]
    fn tree_nesting_and_virtual_flag() {
        let raw = proto::TmoTreeNode {
            id: 42588,
            p_id: 0,
            name: "Root".into(),
            r#virtual: true,
            global_uniqueness: true,
            materialize: true,
            child: vec![proto::TmoTreeNode {
                id: 42589,
                p_id: 42588,
                name: "Location".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let tree = tmo_tree(raw);
        assert!(tree.is_virtual);
        assert_eq!(tree.size(), 2);
        assert_eq!(tree.children[0].p_id, Some(42588));
    }
}
