//! In-process view of a projection's active TMO/TPRM sets.
//!
//! Incoming entities are filtered against this cache before dispatch:
//! objects of TMOs that were never part of the projection are dropped. The
//! cache updates *before* filtering on create (so freshly announced schema
//! passes through) and *after* on delete (so the deletion itself is still
//! processed).

use std::collections::HashMap;

use topograph_model::{ChangeOp, Doc, EntityClass, TmoNode};

use crate::decode::{ChangeMessage, Payload};

#[derive(Debug, Default)]
pub struct TmoCache {
    /// tmo id → enabled
    pub tmo: HashMap<i64, bool>,
    /// tprm id → owning tmo id
    pub tprm: HashMap<i64, i64>,
}

impl TmoCache {
    /// Seeds the cache from the stored schema layer. The trace TMO counts as
    /// enabled regardless of its flag: its events must keep flowing.
    #[must_use]
    pub fn from_schema(tmos: &[Doc<TmoNode>], trace_tmo_id: Option<i64>) -> Self {
        let mut cache = TmoCache::default();
        for tmo in tmos {
            let enabled = trace_tmo_id == Some(tmo.body.tmo_id) || tmo.body.enabled;
            cache.tmo.insert(tmo.body.tmo_id, enabled);
            for param in &tmo.body.params {
                cache.tprm.insert(param.id, param.tmo_id);
            }
        }
        cache
    }

    /// Applied before filtering: creates/updates announce new schema when
    /// their parent is already known.
    pub fn update_before(&mut self, message: &ChangeMessage) {
        match (&message.payload, message.op) {
            (Payload::Tmos(tmos), ChangeOp::Created | ChangeOp::Updated) => {
                for tmo in tmos {
                    if let Some(p_id) = tmo.p_id {
                        if self.tmo.contains_key(&p_id) {
                            self.tmo.entry(tmo.id).or_insert(false);
                        }
                    }
                }
            }
            (Payload::Tprms(tprms), ChangeOp::Created) => {
                for tprm in tprms {
                    if self.tmo.contains_key(&tprm.tmo_id) {
                        self.tprm.insert(tprm.id, tprm.tmo_id);
                    }
                }
            }
            _ => {}
        }
    }

    /// Applied after filtering: deletions leave the cache.
    pub fn update_after(&mut self, message: &ChangeMessage) {
        if message.op != ChangeOp::Deleted {
            return;
        }
        match &message.payload {
            Payload::Tmos(tmos) => {
                for tmo in tmos {
                    self.tmo.remove(&tmo.id);
                }
            }
            Payload::Tprms(tprms) => {
                for tprm in tprms {
                    self.tprm.remove(&tprm.id);
                }
            }
            _ => {}
        }
    }

    /// Drops entities foreign to this projection.
    #[must_use]
    pub fn filter(&self, payload: Payload) -> Payload {
        match payload {
            Payload::Tmos(tmos) => Payload::Tmos(
                tmos.into_iter()
                    .filter(|tmo| self.tmo.contains_key(&tmo.id))
                    .collect(),
            ),
            Payload::Tprms(tprms) => Payload::Tprms(
                tprms
                    .into_iter()
                    .filter(|tprm| self.tprm.contains_key(&tprm.id))
                    .collect(),
            ),
            Payload::Mos(mos) => Payload::Mos(
                mos.into_iter()
                    .filter(|mo| self.tmo.contains_key(&mo.tmo_id))
                    .collect(),
            ),
            Payload::Prms(prms) => Payload::Prms(
                prms.into_iter()
                    .filter(|prm| self.tprm.contains_key(&prm.tprm_id))
                    .collect(),
            ),
        }
    }

    /// Whether a message can touch this projection at all (cheap pre-check).
    #[must_use]
    pub fn relevant(&self, class: EntityClass) -> bool {
        match class {
            EntityClass::Tmo | EntityClass::Mo => !self.tmo.is_empty(),
            EntityClass::Tprm | EntityClass::Prm => !self.tprm.is_empty(),
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use topograph_model::{Mo, Prm, PrmValue};

    fn cache() -> TmoCache {
        let mut cache = TmoCache::default();
        cache.tmo.insert(42589, true);
        cache.tmo.insert(42600, true);
        cache.tprm.insert(9, 42600);
        cache
    }

    fn mo(id: i64, tmo_id: i64) -> Mo {
        Mo {
            id,
            tmo_id,
            p_id: None,
            name: format!("mo-{id}"),
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
            params: vec![],
        }
    }

    #[test]
    fn foreign_mos_are_dropped() {
        let payload = Payload::Mos(vec![mo(1, 42600), mo(2, 99999)]);
        let filtered = cache().filter(payload);
        let Payload::Mos(mos) = filtered else { panic!() };
        assert_eq!(mos.len(), 1);
        assert_eq!(mos[0].id, 1);
    }

    #[test]
    fn foreign_prms_are_dropped() {
        let prm = |id: i64, tprm_id: i64| Prm {
            id,
            tprm_id,
            mo_id: 1,
            value: PrmValue::Null,
            version: 1,
        };
        let payload = Payload::Prms(vec![prm(1, 9), prm(2, 777)]);
        let filtered = cache().filter(payload);
        let Payload::Prms(prms) = filtered else { panic!() };
        assert_eq!(prms.len(), 1);
    }

    #[test]
    fn tprm_create_registers_before_filtering() {
        use topograph_model::Tprm;
        let mut cache = cache();
        let message = ChangeMessage {
            class: EntityClass::Tprm,
            op: ChangeOp::Created,
            payload: Payload::Tprms(vec![Tprm {
                id: 11,
                tmo_id: 42600,
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
            }]),
        };
        cache.update_before(&message);
        assert_eq!(cache.tprm.get(&11), Some(&42600));
    }

    #[test]
    fn tmo_delete_leaves_cache_after_filtering() {
        let mut cache = cache();
        let message = ChangeMessage {
            class: EntityClass::Tmo,
            op: ChangeOp::Deleted,
            payload: Payload::Tmos(vec![topograph_inventory::TmoTree {
                id: 42600,
                p_id: Some(42589),
                name: "Switch".into(),
                icon: None,
                description: None,
                is_virtual: false,
                global_uniqueness: false,
                materialize: true,
                points_constraint_by_tmo: vec![],
                geometry_type: None,
                line_type: None,
                label: vec![],
                minimize: false,
                children: vec![],
            }]),
        };
        assert!(cache.tmo.contains_key(&42600));
        cache.update_after(&message);
        assert!(!cache.tmo.contains_key(&42600));
    }
}
