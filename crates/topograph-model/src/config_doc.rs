//! Per-projection settings documents.
//!
//! Singletons in the `config` collection, keyed by well-known `_key`s. The
//! keys are part of the persisted layout; the constants here are the only
//! place they are spelled.

use serde::{Deserialize, Serialize};

pub const START_FROM_KEY: &str = "start_from";
pub const TRACE_TMO_KEY: &str = "trace_tmo_id";
pub const TRACE_TPRM_KEY: &str = "trace_tprm_id";
pub const GROUP_BY_KEY: &str = "group_by";
pub const DELETE_ORPHANS_KEY: &str = "delete_orphan_branches";

/// Alternative build root, optionally pinned to a grouping parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartFromDoc {
    pub tmo_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tprm_id: Option<i64>,
}

/// The service-layer (trace) TMO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceTmoDoc {
    pub tmo_id: i64,
}

/// TPRM whose value renames trace nodes in presentations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceTprmDoc {
    pub tprm_id: i64,
}

/// Ordered grouping TPRMs, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupByDoc {
    pub tprms: Vec<i64>,
}

/// Whether the builder prunes branches unreachable from the start TMO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOrphansDoc {
    pub delete_orphan_branches: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_from_omits_absent_tprm() {
        let doc = StartFromDoc {
            tmo_id: 42589,
            tprm_id: None,
        };
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"tmo_id":42589}"#);
    }
}
