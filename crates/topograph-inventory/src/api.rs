//! The read-only inventory surface the rest of the service speaks against.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;

use topograph_model::{Mo, Prm, Tprm};

use crate::error::InventoryResult;

/// One node of the TMO schema tree, parents resolved, children nested.
#[derive(Debug, Clone, PartialEq)]
pub struct TmoTree {
    pub id: i64,
    pub p_id: Option<i64>,
    pub name: String,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub is_virtual: bool,
    pub global_uniqueness: bool,
    pub materialize: bool,
    pub points_constraint_by_tmo: Vec<i64>,
    pub geometry_type: Option<String>,
    pub line_type: Option<String>,
    pub label: Vec<i64>,
    pub minimize: bool,
    pub children: Vec<TmoTree>,
}

impl TmoTree {
    /// The subtree's node count, self included.
    #[must_use]
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TmoTree::size).sum::<usize>()
    }
}

/// Parameters of a chunked MO listing.
#[derive(Debug, Clone)]
pub struct MosQuery {
    pub tmo_id: i64,
    /// JSON-encoded MO attribute filter, e.g. `{"active": true}`.
    pub mo_filter: Option<serde_json::Value>,
    pub prm_filter: Option<serde_json::Value>,
    pub keep_mo_without_prm: bool,
    pub chunk_size: u32,
}

impl MosQuery {
    /// Active MOs of one TMO, the builder's standard listing.
    #[must_use]
    pub fn active(tmo_id: i64) -> Self {
        MosQuery {
            tmo_id,
            mo_filter: Some(serde_json::json!({ "active": true })),
            prm_filter: None,
            keep_mo_without_prm: true,
            chunk_size: 50,
        }
    }
}

/// Read-only inventory API. All calls are idempotent; implementations retry
/// transient failures internally with the shared bounded policy.
#[async_trait]
pub trait InventoryApi: Send + Sync {
    /// Schema trees rooted at `tmo_id`.
    async fn tmo_tree(&self, tmo_id: i64) -> InventoryResult<Vec<TmoTree>>;

    /// TPRM definitions of the given TMOs.
    async fn tprms_by_tmo(&self, tmo_ids: &[i64]) -> InventoryResult<Vec<Tprm>>;

    /// Lazy chunked stream of MOs of one TMO, each chunk ordered by MO id,
    /// parameter values already typed.
    async fn mos_by_tmo(
        &self,
        query: MosQuery,
    ) -> InventoryResult<BoxStream<'static, InventoryResult<Vec<Mo>>>>;

    /// The TMO an MO belongs to.
    async fn tmo_by_mo(&self, mo_id: i64) -> InventoryResult<i64>;

    /// MOs by id (parameters not resolved).
    async fn mos_by_ids(&self, mo_ids: &[i64]) -> InventoryResult<Vec<Mo>>;

    /// PRMs by id, values already typed.
    async fn prms_by_ids(&self, prm_ids: &[i64]) -> InventoryResult<Vec<Prm>>;

    /// Point-constraint TMO ids of a TMO.
    async fn point_tmo_const(&self, tmo_id: i64) -> InventoryResult<Vec<i64>>;

    /// Constraint TMO ids of a link TPRM.
    async fn tprm_const(&self, tprm_id: i64) -> InventoryResult<Vec<i64>>;

    /// TPRM definitions by id.
    async fn tprms_by_ids(&self, tprm_ids: &[i64]) -> InventoryResult<Vec<Tprm>>;

    /// MO names by id; missing ids are simply absent from the map.
    async fn mo_names(&self, mo_ids: &[i64]) -> InventoryResult<HashMap<i64, String>> {
        if mo_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mos = self.mos_by_ids(mo_ids).await?;
        Ok(mos.into_iter().map(|mo| (mo.id, mo.name)).collect())
    }

    /// PRMs by id as a map.
    async fn prm_map(&self, prm_ids: &[i64]) -> InventoryResult<HashMap<i64, Prm>> {
        if prm_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let prms = self.prms_by_ids(prm_ids).await?;
        Ok(prms.into_iter().map(|prm| (prm.id, prm)).collect())
    }
}
