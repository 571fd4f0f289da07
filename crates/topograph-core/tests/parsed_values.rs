//! Parsed-value and index fill over a mocked inventory.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use pretty_assertions::assert_eq;

use topograph_core::builder::prm_values::{fill_indexed, fill_parsed_values};
use topograph_inventory::{InventoryApi, InventoryResult, MosQuery, TmoTree};
use topograph_model::{Mo, MoDto, MoNode, Prm, PrmDto, PrmValue, TmoNode, Tprm};

/// Inventory stub backed by in-memory maps.
#[derive(Default)]
struct MockInventory {
    mos: HashMap<i64, Mo>,
    prms: HashMap<i64, Prm>,
}

#[async_trait]
impl InventoryApi for MockInventory {
    async fn tmo_tree(&self, _tmo_id: i64) -> InventoryResult<Vec<TmoTree>> {
        Ok(Vec::new())
    }

    async fn tprms_by_tmo(&self, _tmo_ids: &[i64]) -> InventoryResult<Vec<Tprm>> {
        Ok(Vec::new())
    }

    async fn mos_by_tmo(
        &self,
        _query: MosQuery,
    ) -> InventoryResult<BoxStream<'static, InventoryResult<Vec<Mo>>>> {
        Ok(Box::pin(futures::stream::empty()))
    }

    async fn tmo_by_mo(&self, mo_id: i64) -> InventoryResult<i64> {
        Ok(self.mos.get(&mo_id).map(|mo| mo.tmo_id).unwrap_or_default())
    }

    async fn mos_by_ids(&self, mo_ids: &[i64]) -> InventoryResult<Vec<Mo>> {
        Ok(mo_ids
            .iter()
            .filter_map(|id| self.mos.get(id).cloned())
            .collect())
    }

    async fn prms_by_ids(&self, prm_ids: &[i64]) -> InventoryResult<Vec<Prm>> {
        Ok(prm_ids
            .iter()
            .filter_map(|id| self.prms.get(id).cloned())
            .collect())
    }

    async fn point_tmo_const(&self, _tmo_id: i64) -> InventoryResult<Vec<i64>> {
        Ok(Vec::new())
    }

    async fn tprm_const(&self, _tprm_id: i64) -> InventoryResult<Vec<i64>> {
        Ok(Vec::new())
    }

    async fn tprms_by_ids(&self, _tprm_ids: &[i64]) -> InventoryResult<Vec<Tprm>> {
        Ok(Vec::new())
    }
}

fn tprm(id: i64, val_type: &str, returnable: bool, multiple: bool) -> Tprm {
    Tprm {
        id,
        tmo_id: 42600,
        name: format!("p{id}"),
        val_type: val_type.into(),
        required: false,
        returnable,
        multiple,
        description: None,
        constraint: None,
        prm_link_filter: None,
        group: None,
        version: None,
    }
}

fn switch_tmo() -> TmoNode {
    TmoNode {
        tmo_id: 42600,
        p_id: Some(42589),
        name: "Switch".into(),
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
            tprm(9, "mo_link", true, false),
            tprm(10, "prm_link", true, false),
            tprm(11, "str", true, false),
            tprm(12, "int", false, false),
        ],
        commutation_tprms: None,
        show_as_a_table: true,
        busy_parameter_groups: vec![],
    }
}

fn mo_with_params(params: Vec<PrmDto>) -> MoNode {
    MoNode::from_dto(
        MoDto {
            id: 7,
            tmo_id: 42600,
            p_id: None,
            name: "switch-7".into(),
            label: None,
            active: true,
            version: 1,
            latitude: None,
            longitude: None,
            pov: None,
            geometry: None,
            model: None,
            point_a_id: None,
            point_b_id: None,
            status: None,
            params,
        },
        false,
    )
}

fn linked_mo(id: i64, name: &str, label: Option<&str>) -> Mo {
    Mo {
        id,
        tmo_id: 42591,
        p_id: None,
        name: name.into(),
        label: label.map(String::from),
        active: true,
        version: 1,
        latitude: None,
        longitude: None,
        pov: None,
        geometry: None,
        model: None,
        point_a_id: None,
        point_b_id: None,
        status: None,
        params: vec![],
    }
}

fn prm_dto(id: i64, tprm_id: i64, value: PrmValue) -> PrmDto {
    PrmDto {
        id,
        tprm_id,
        mo_id: 7,
        value,
        version: 1,
        parsed_value: None,
    }
}

#[tokio::test]
async fn link_params_resolve_with_triggers() {
    let mut inventory = MockInventory::default();
    inventory.mos.insert(100, linked_mo(100, "MW-100", None));
    inventory.prms.insert(
        500,
        Prm {
            id: 500,
            tprm_id: 77,
            mo_id: 100,
            value: PrmValue::Str("10G".into()),
            version: 1,
        },
    );

    let mut nodes = vec![mo_with_params(vec![
        prm_dto(1, 9, PrmValue::Int(100)),
        prm_dto(2, 10, PrmValue::Int(500)),
        prm_dto(3, 11, PrmValue::Str("rack 4".into())),
    ])];
    let tmo = switch_tmo();
    fill_parsed_values(&inventory, &mut nodes, &tmo).await.unwrap();

    let params = &nodes[0].data.as_ref().unwrap().params;
    let mo_link = params.iter().find(|p| p.id == 1).unwrap();
    let parsed = mo_link.parsed_value.as_ref().unwrap();
    assert_eq!(parsed.value, PrmValue::Str("MW-100".into()));
    assert_eq!(parsed.triggers.mos, vec![100]);

    let prm_link = params.iter().find(|p| p.id == 2).unwrap();
    let parsed = prm_link.parsed_value.as_ref().unwrap();
    assert_eq!(parsed.value, PrmValue::Str("10G".into()));
    assert_eq!(parsed.triggers.prms, vec![500]);
    assert_eq!(parsed.triggers.mos, vec![100]);

    // plain scalars stay unresolved
    let scalar = params.iter().find(|p| p.id == 3).unwrap();
    assert!(scalar.parsed_value.is_none());
}

#[tokio::test]
async fn indexed_collects_returnable_values_only() {
    let mut inventory = MockInventory::default();
    inventory
        .mos
        .insert(100, linked_mo(100, "MW-100", Some("west ring")));

    let mut nodes = vec![mo_with_params(vec![
        prm_dto(1, 9, PrmValue::Int(100)),
        prm_dto(3, 11, PrmValue::Str("rack 4".into())),
        // tprm 12 is not returnable
        prm_dto(4, 12, PrmValue::Int(9000)),
    ])];
    let tmo = switch_tmo();
    fill_indexed(&inventory, &mut nodes, &tmo).await.unwrap();

    let indexed = nodes[0].indexed.clone().unwrap();
    assert!(indexed.contains(&"MW-100".to_string()));
    assert!(indexed.contains(&"west ring".to_string()));
    assert!(indexed.contains(&"rack 4".to_string()));
    assert!(!indexed.contains(&"9000".to_string()));
}

#[tokio::test]
async fn missing_link_target_resolves_empty_but_keeps_trigger() {
    let inventory = MockInventory::default();
    let mut nodes = vec![mo_with_params(vec![prm_dto(1, 9, PrmValue::Int(999))])];
    let tmo = switch_tmo();
    fill_parsed_values(&inventory, &mut nodes, &tmo).await.unwrap();

    let params = &nodes[0].data.as_ref().unwrap().params;
    let parsed = params[0].parsed_value.as_ref().unwrap();
    assert_eq!(parsed.value, PrmValue::Str(String::new()));
    // the trigger survives so a later create repairs the resolution
    assert_eq!(parsed.triggers.mos, vec![999]);
}
