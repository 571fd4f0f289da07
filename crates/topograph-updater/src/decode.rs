//! Change-message decoding.
//!
//! Keys are `<CLASS>:<op>` UTF-8 strings; payloads are the protobuf `List*`
//! messages from the inventory proto. Entity values stay raw here (the
//! handlers type them against the stored schema layer).

use std::collections::HashMap;

use prost::Message;

use topograph_inventory::convert;
use topograph_inventory::proto;
use topograph_inventory::TmoTree;
use topograph_model::{ChangeOp, EntityClass, Mo, Prm, Tprm};

use crate::error::{UpdaterError, UpdaterResult};

/// A decoded change message.
#[derive(Debug)]
pub struct ChangeMessage {
    pub class: EntityClass,
    pub op: ChangeOp,
    pub payload: Payload,
}

#[derive(Debug)]
pub enum Payload {
    Tmos(Vec<TmoTree>),
    Tprms(Vec<Tprm>),
    Mos(Vec<Mo>),
    Prms(Vec<Prm>),
}

impl Payload {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Payload::Tmos(items) => items.len(),
            Payload::Tprms(items) => items.len(),
            Payload::Mos(items) => items.len(),
            Payload::Prms(items) => items.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Splits a message key into class and operation.
pub fn parse_key(key: &str) -> UpdaterResult<(EntityClass, ChangeOp)> {
    let (class, op) = key
        .split_once(':')
        .ok_or_else(|| UpdaterError::Malformed(format!("key without separator: {key}")))?;
    let class = class
        .parse()
        .map_err(|e: String| UpdaterError::Malformed(e))?;
    let op = op.parse().map_err(|e: String| UpdaterError::Malformed(e))?;
    Ok((class, op))
}

/// Decodes one message.
pub fn decode(key: &str, payload: &[u8]) -> UpdaterResult<ChangeMessage> {
    let (class, op) = parse_key(key)?;
    let empty_tprms: HashMap<i64, Tprm> = HashMap::new();
    let payload = match class {
        EntityClass::Tmo => {
            let list = proto::ListTmo::decode(payload)?;
            Payload::Tmos(list.objects.into_iter().map(convert::tmo_tree).collect())
        }
        EntityClass::Tprm => {
            let list = proto::ListTprm::decode(payload)?;
            Payload::Tprms(list.objects.into_iter().map(convert::tprm).collect())
        }
        EntityClass::Mo => {
            let list = proto::ListMo::decode(payload)?;
            Payload::Mos(
                list.objects
                    .into_iter()
                    .map(|raw| convert::mo_lenient(raw, &empty_tprms))
                    .collect(),
            )
        }
        EntityClass::Prm => {
            let list = proto::ListPrm::decode(payload)?;
            Payload::Prms(
                list.objects
                    .into_iter()
                    .map(|raw| convert::prm_lenient(raw, &empty_tprms))
                    .collect(),
            )
        }
    };
    Ok(ChangeMessage { class, op, payload })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use topograph_model::PrmValue;

    #[test]
    fn keys_parse_class_and_op() {
        assert_eq!(
            parse_key("MO:created").unwrap(),
            (EntityClass::Mo, ChangeOp::Created)
        );
        assert_eq!(
            parse_key("TPRM:deleted").unwrap(),
            (EntityClass::Tprm, ChangeOp::Deleted)
        );
        assert!(parse_key("MO").is_err());
        assert!(parse_key("WIDGET:created").is_err());
        assert!(parse_key("MO:exploded").is_err());
    }

    #[test]
    fn mo_payload_round_trips() {
        let list = proto::ListMo {
            objects: vec![proto::Mo {
                id: 7,
                tmo_id: 42600,
                p_id: 3,
                name: "switch-7".into(),
                active: true,
                version: 2,
                params: vec![proto::Prm {
                    id: 50,
                    tprm_id: 9,
                    mo_id: 7,
                    value: "42".into(),
                    version: 1,
                }],
                ..Default::default()
            }],
        };
        let bytes = list.encode_to_vec();
        let message = decode("MO:updated", &bytes).unwrap();
        assert_eq!(message.class, EntityClass::Mo);
        assert_eq!(message.op, ChangeOp::Updated);
        let Payload::Mos(mos) = message.payload else {
            panic!("expected MO payload");
        };
        assert_eq!(mos[0].id, 7);
        assert_eq!(mos[0].p_id, Some(3));
        // raw until typed against the schema layer
        assert_eq!(mos[0].params[0].value, PrmValue::Str("42".into()));
    }

    #[test]
    fn tmo_payload_decodes_tree_nodes() {
        let list = proto::ListTmo {
            objects: vec![proto::TmoTreeNode {
                id: 42591,
                p_id: 42589,
                name: "Microwave".into(),
                global_uniqueness: true,
                materialize: true,
                ..Default::default()
            }],
        };
        let bytes = list.encode_to_vec();
        let message = decode("TMO:created", &bytes).unwrap();
        let Payload::Tmos(tmos) = message.payload else {
            panic!("expected TMO payload");
        };
        assert_eq!(tmos[0].id, 42591);
        assert_eq!(tmos[0].p_id, Some(42589));
    }
}
