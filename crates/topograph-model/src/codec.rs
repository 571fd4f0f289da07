//! Parameter value codec.
//!
//! Raw values from the inventory are strings; [`convert_value`] turns them
//! into typed [`PrmValue`]s according to the owning TPRM. Parameters with
//! `multiple = true` arrive as opaque hex-encoded blobs, decoded by
//! [`decode_blob`].
//!
//! Resolution of link-typed values ([`resolve_mo_link`] / [`resolve_prm_link`])
//! is pure: the caller prefetches the referenced MO names and PRMs in bulk
//! and passes them as maps. `triggers` records every MO/PRM id whose change
//! must invalidate the resolution.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::doc::{ParsedValue, ParsedValueTriggers};
use crate::record::{val_type, Prm, Tprm};
use crate::value::PrmValue;

/// Errors from value conversion and blob decoding.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid hex blob: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("blob payload is not valid JSON: {0}")]
    BlobJson(#[from] serde_json::Error),

    #[error("value {value:?} is not a valid {val_type}: {reason}")]
    Convert {
        val_type: String,
        value: String,
        reason: String,
    },
}

fn convert_error(val_type: &str, value: &str, reason: impl Into<String>) -> CodecError {
    CodecError::Convert {
        val_type: val_type.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Decodes a hex-encoded multi-valued blob into a list value.
pub fn decode_blob(raw: &str) -> Result<PrmValue, CodecError> {
    let bytes = hex::decode(raw.trim())?;
    let json: serde_json::Value = serde_json::from_slice(&bytes)?;
    let value = PrmValue::from_json(&json);
    Ok(match value {
        list @ PrmValue::List(_) => list,
        scalar => PrmValue::List(vec![scalar]),
    })
}

fn parse_datetime(raw: &str) -> Option<String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.to_rfc3339());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
        }
    }
    None
}

/// Converts a raw scalar into the type declared by the TPRM. Blob decoding
/// applies first for `multiple = true` parameters regardless of `val_type`.
pub fn convert_value(raw: &str, tprm: &Tprm) -> Result<PrmValue, CodecError> {
    if tprm.multiple {
        return decode_blob(raw);
    }
    let value = match tprm.val_type.as_str() {
        val_type::INT | val_type::MO_LINK | val_type::TWO_WAY_LINK | val_type::PRM_LINK => {
            PrmValue::Int(
                raw.parse()
                    .map_err(|e| convert_error(&tprm.val_type, raw, format!("{e}")))?,
            )
        }
        val_type::FLOAT => PrmValue::Float(
            raw.parse()
                .map_err(|e| convert_error(&tprm.val_type, raw, format!("{e}")))?,
        ),
        val_type::BOOL => PrmValue::Bool(matches!(raw.to_ascii_lowercase().as_str(), "true" | "1")),
        val_type::DATE => {
            let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|e| convert_error(val_type::DATE, raw, format!("{e}")))?;
            PrmValue::Str(date.format("%Y-%m-%d").to_string())
        }
        val_type::DATETIME => PrmValue::Str(
            parse_datetime(raw)
                .ok_or_else(|| convert_error(val_type::DATETIME, raw, "unrecognized format"))?,
        ),
        _ => PrmValue::Str(raw.to_string()),
    };
    Ok(value)
}

/// Resolves an `mo_link`/`two-way link` value to the linked MO names.
/// Missing MOs resolve to an empty name; the trigger list still records the
/// id so a later create repairs the resolution.
#[must_use]
pub fn resolve_mo_link(value: &PrmValue, mo_names: &HashMap<i64, String>) -> ParsedValue {
    let ids = value.ids();
    let names: Vec<PrmValue> = ids
        .iter()
        .map(|id| PrmValue::Str(mo_names.get(id).cloned().unwrap_or_default()))
        .collect();
    let resolved = match value {
        PrmValue::List(_) => PrmValue::List(names),
        _ => names.into_iter().next().unwrap_or(PrmValue::Null),
    };
    ParsedValue {
        raw_value: value.clone(),
        value: resolved,
        triggers: ParsedValueTriggers {
            mos: ids,
            prms: Vec::new(),
        },
    }
}

/// Resolves a `prm_link` value to the linked parameter values. Triggers
/// record both the PRM ids and their owning MO ids.
#[must_use]
pub fn resolve_prm_link(value: &PrmValue, prms: &HashMap<i64, Prm>) -> ParsedValue {
    let ids = value.ids();
    let mut trigger_mos = Vec::new();
    let mut resolved = Vec::new();
    for id in &ids {
        match prms.get(id) {
            Some(prm) => {
                if !trigger_mos.contains(&prm.mo_id) {
                    trigger_mos.push(prm.mo_id);
                }
                resolved.push(prm.value.clone());
            }
            None => resolved.push(PrmValue::Null),
        }
    }
    let resolved = match value {
        PrmValue::List(_) => PrmValue::List(resolved),
        _ => resolved.into_iter().next().unwrap_or(PrmValue::Null),
    };
    ParsedValue {
        raw_value: value.clone(),
        value: resolved,
        triggers: ParsedValueTriggers {
            mos: trigger_mos,
            prms: ids,
        },
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tprm(val_type: &str, multiple: bool) -> Tprm {
        Tprm {
            id: 1,
            tmo_id: 2,
            name: "t".into(),
            val_type: val_type.into(),
            required: false,
            returnable: true,
            multiple,
            description: None,
            constraint: None,
            prm_link_filter: None,
            group: None,
            version: None,
        }
    }

    #[test]
    fn scalar_conversions() {
        assert_eq!(
            convert_value("42", &tprm(val_type::INT, false)).unwrap(),
            PrmValue::Int(42)
        );
        assert_eq!(
            convert_value("2.5", &tprm(val_type::FLOAT, false)).unwrap(),
            PrmValue::Float(2.5)
        );
        assert_eq!(
            convert_value("True", &tprm(val_type::BOOL, false)).unwrap(),
            PrmValue::Bool(true)
        );
        assert_eq!(
            convert_value("0", &tprm(val_type::BOOL, false)).unwrap(),
            PrmValue::Bool(false)
        );
        assert_eq!(
            convert_value("7", &tprm(val_type::MO_LINK, false)).unwrap(),
            PrmValue::Int(7)
        );
        assert_eq!(
            convert_value("free text", &tprm(val_type::STR, false)).unwrap(),
            PrmValue::Str("free text".into())
        );
    }

    #[test]
    fn date_and_datetime() {
        assert_eq!(
            convert_value("2024-03-09", &tprm(val_type::DATE, false)).unwrap(),
            PrmValue::Str("2024-03-09".into())
        );
        let dt = convert_value("2024-03-09T10:30:00+00:00", &tprm(val_type::DATETIME, false))
            .unwrap();
        assert!(matches!(dt, PrmValue::Str(s) if s.starts_with("2024-03-09T10:30:00")));
        assert!(convert_value("not a date", &tprm(val_type::DATE, false)).is_err());
    }

    #[test]
    fn blob_decodes_to_list() {
        let blob = hex::encode(b"[7,8]");
        assert_eq!(
            decode_blob(&blob).unwrap(),
            PrmValue::List(vec![PrmValue::Int(7), PrmValue::Int(8)])
        );
        // multiple=true forces blob decoding for any val_type
        assert_eq!(
            convert_value(&blob, &tprm(val_type::MO_LINK, true)).unwrap(),
            PrmValue::List(vec![PrmValue::Int(7), PrmValue::Int(8)])
        );
        // a scalar payload still yields a list
        let scalar_blob = hex::encode(b"\"one\"");
        assert_eq!(
            decode_blob(&scalar_blob).unwrap(),
            PrmValue::List(vec![PrmValue::Str("one".into())])
        );
    }

    #[test]
    fn blob_errors_are_typed() {
        assert!(matches!(decode_blob("zz"), Err(CodecError::Hex(_))));
        let bad_json = hex::encode(b"{not json");
        assert!(matches!(decode_blob(&bad_json), Err(CodecError::BlobJson(_))));
    }

    #[test]
    fn mo_link_resolution_records_triggers() {
        let mut names = HashMap::new();
        names.insert(7, "MW-Site-7".to_string());
        let parsed = resolve_mo_link(&PrmValue::List(vec![PrmValue::Int(7), PrmValue::Int(8)]), &names);
        assert_eq!(
            parsed.value,
            PrmValue::List(vec![
                PrmValue::Str("MW-Site-7".into()),
                PrmValue::Str(String::new())
            ])
        );
        assert_eq!(parsed.triggers.mos, vec![7, 8]);
        assert!(parsed.triggers.prms.is_empty());

        let scalar = resolve_mo_link(&PrmValue::Int(7), &names);
        assert_eq!(scalar.value, PrmValue::Str("MW-Site-7".into()));
    }

    #[test]
    fn prm_link_resolution_records_both_trigger_kinds() {
        let mut prms = HashMap::new();
        prms.insert(
            50,
            Prm {
                id: 50,
                tprm_id: 9,
                mo_id: 7,
                value: PrmValue::Str("10G".into()),
                version: 1,
            },
        );
        let parsed = resolve_prm_link(&PrmValue::Int(50), &prms);
        assert_eq!(parsed.value, PrmValue::Str("10G".into()));
        assert_eq!(parsed.triggers.prms, vec![50]);
        assert_eq!(parsed.triggers.mos, vec![7]);
    }

    proptest::proptest! {
        #[test]
        fn blob_round_trip(ids in proptest::collection::vec(-1_000_000i64..1_000_000, 0..16)) {
            let json = serde_json::to_vec(&ids).unwrap();
            let blob = hex::encode(json);
            let decoded = decode_blob(&blob).unwrap();
            let expected = PrmValue::List(ids.into_iter().map(PrmValue::Int).collect());
            proptest::prop_assert_eq!(decoded, expected);
        }
    }
}
