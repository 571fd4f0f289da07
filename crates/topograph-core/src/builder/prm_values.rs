//! Parsed-value and `indexed` fill for freshly converted MO vertices.
//!
//! Link-typed parameters resolve to the linked MO/PRM names in bulk: the
//! referenced ids are collected across the whole chunk, fetched once, and
//! resolved with the pure codec functions.

use std::collections::{HashMap, HashSet};

use topograph_inventory::InventoryApi;
use topograph_model::codec::{resolve_mo_link, resolve_prm_link};
use topograph_model::record::val_type;
use topograph_model::{MoNode, Prm, PrmValue, TmoNode, Tprm};

use crate::error::CoreResult;

/// Splits a TMO's parameters into the three link families.
fn link_families(tmo: &TmoNode) -> (HashSet<i64>, HashSet<i64>, HashSet<i64>) {
    let mut mo_links = HashSet::new();
    let mut two_way_links = HashSet::new();
    let mut prm_links = HashSet::new();
    for param in &tmo.params {
        match param.val_type.as_str() {
            val_type::MO_LINK => {
                mo_links.insert(param.id);
            }
            val_type::TWO_WAY_LINK => {
                two_way_links.insert(param.id);
            }
            val_type::PRM_LINK => {
                prm_links.insert(param.id);
            }
            _ => {}
        }
    }
    (mo_links, two_way_links, prm_links)
}

/// Fills `parsed_value` on every link-typed parameter of the chunk.
pub async fn fill_parsed_values(
    inventory: &dyn InventoryApi,
    nodes: &mut [MoNode],
    tmo: &TmoNode,
) -> CoreResult<()> {
    let (mo_links, two_way_links, prm_links) = link_families(tmo);
    if mo_links.is_empty() && two_way_links.is_empty() && prm_links.is_empty() {
        return Ok(());
    }

    let mut wanted_mo_ids: HashSet<i64> = HashSet::new();
    let mut wanted_prm_ids: HashSet<i64> = HashSet::new();
    for node in nodes.iter() {
        let Some(data) = &node.data else { continue };
        for param in &data.params {
            if mo_links.contains(&param.tprm_id) || two_way_links.contains(&param.tprm_id) {
                wanted_mo_ids.extend(param.value.ids());
            } else if prm_links.contains(&param.tprm_id) {
                wanted_prm_ids.extend(param.value.ids());
            }
        }
    }

    let mo_names = inventory
        .mo_names(&wanted_mo_ids.into_iter().collect::<Vec<_>>())
        .await?;
    let prm_map = inventory
        .prm_map(&wanted_prm_ids.into_iter().collect::<Vec<_>>())
        .await?;

    for node in nodes.iter_mut() {
        let Some(data) = &mut node.data else { continue };
        for param in &mut data.params {
            if mo_links.contains(&param.tprm_id) || two_way_links.contains(&param.tprm_id) {
                param.parsed_value = Some(resolve_mo_link(&param.value, &mo_names));
            } else if prm_links.contains(&param.tprm_id) {
                param.parsed_value = Some(resolve_prm_link(&param.value, &prm_map));
            }
        }
    }
    Ok(())
}

/// Fills `indexed` from the returnable parameters: scalars stringified,
/// link values replaced by the linked MO name (and label) or PRM value.
pub async fn fill_indexed(
    inventory: &dyn InventoryApi,
    nodes: &mut [MoNode],
    tmo: &TmoNode,
) -> CoreResult<()> {
    let returnable: HashMap<i64, &Tprm> = tmo
        .params
        .iter()
        .filter(|p| p.returnable)
        .map(|p| (p.id, p))
        .collect();
    if returnable.is_empty() {
        return Ok(());
    }
    let (mo_links, two_way_links, prm_links) = link_families(tmo);

    // Collect the referenced ids across the chunk before resolving.
    let mut wanted_mo_ids: HashSet<i64> = HashSet::new();
    let mut wanted_prm_ids: HashSet<i64> = HashSet::new();
    for node in nodes.iter() {
        let Some(data) = &node.data else { continue };
        for param in &data.params {
            if !returnable.contains_key(&param.tprm_id) {
                continue;
            }
            if mo_links.contains(&param.tprm_id) || two_way_links.contains(&param.tprm_id) {
                wanted_mo_ids.extend(param.value.ids());
            } else if prm_links.contains(&param.tprm_id) {
                wanted_prm_ids.extend(param.value.ids());
            }
        }
    }
    let linked_mos = inventory
        .mos_by_ids(&wanted_mo_ids.into_iter().collect::<Vec<_>>())
        .await?;
    let mo_names: HashMap<i64, (String, Option<String>)> = linked_mos
        .into_iter()
        .map(|mo| (mo.id, (mo.name, mo.label)))
        .collect();
    let prm_map: HashMap<i64, Prm> = inventory
        .prm_map(&wanted_prm_ids.into_iter().collect::<Vec<_>>())
        .await?;

    for node in nodes.iter_mut() {
        let Some(data) = &node.data else { continue };
        let mut index: Vec<String> = Vec::new();
        for param in &data.params {
            if !returnable.contains_key(&param.tprm_id) {
                continue;
            }
            if mo_links.contains(&param.tprm_id) || two_way_links.contains(&param.tprm_id) {
                for id in param.value.ids() {
                    if let Some((name, label)) = mo_names.get(&id) {
                        index.push(name.clone());
                        if let Some(label) = label {
                            index.push(label.clone());
                        }
                    }
                }
            } else if prm_links.contains(&param.tprm_id) {
                for id in param.value.ids() {
                    if let Some(prm) = prm_map.get(&id) {
                        index.extend(stringify_for_index(&prm.value));
                    }
                }
            } else {
                index.extend(stringify_for_index(&param.value));
            }
        }
        node.indexed = Some(index);
    }
    Ok(())
}

/// A list value contributes one index entry per element.
fn stringify_for_index(value: &PrmValue) -> Vec<String> {
    match value {
        PrmValue::List(items) => items.iter().map(PrmValue::stringify).collect(),
        PrmValue::Null => Vec::new(),
        other => vec![other.stringify()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_entries_per_list_element() {
        let value = PrmValue::List(vec![PrmValue::Int(1), PrmValue::Str("a".into())]);
        assert_eq!(stringify_for_index(&value), vec!["1", "a"]);
        assert!(stringify_for_index(&PrmValue::Null).is_empty());
        assert_eq!(stringify_for_index(&PrmValue::Bool(true)), vec!["true"]);
    }

    #[test]
    fn families_split_by_val_type() {
        let tmo = TmoNode {
            tmo_id: 1,
            p_id: None,
            name: "t".into(),
            enabled: true,
            global_uniqueness: false,
            is_virtual: false,
            materialize: true,
            icon: None,
            description: None,
            geometry_type: None,
            line_type: None,
            minimize: false,
            label: vec![],
            points_constraint_by_tmo: vec![],
            params: vec![
                tprm(1, val_type::MO_LINK),
                tprm(2, val_type::TWO_WAY_LINK),
                tprm(3, val_type::PRM_LINK),
                tprm(4, val_type::STR),
            ],
            commutation_tprms: None,
            show_as_a_table: true,
            busy_parameter_groups: vec![],
        };
        let (mo, two_way, prm) = link_families(&tmo);
        assert!(mo.contains(&1));
        assert!(two_way.contains(&2));
        assert!(prm.contains(&3));
        assert!(!mo.contains(&4) && !two_way.contains(&4) && !prm.contains(&4));
    }

    fn tprm(id: i64, val_type: &str) -> Tprm {
        Tprm {
            id,
            tmo_id: 1,
            name: format!("p{id}"),
            val_type: val_type.into(),
            required: false,
            returnable: true,
            multiple: false,
            description: None,
            constraint: None,
            prm_link_filter: None,
            group: None,
            version: None,
        }
    }
}
