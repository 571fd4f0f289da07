//! Per-projection handle: the store collections of one projection database
//! and its settings documents.

use serde_json::json;

use topograph_model::config_doc::{
    DeleteOrphansDoc, GroupByDoc, StartFromDoc, TraceTmoDoc, TraceTprmDoc, DELETE_ORPHANS_KEY,
    GROUP_BY_KEY, START_FROM_KEY, TRACE_TMO_KEY, TRACE_TPRM_KEY,
};
use topograph_model::{Doc, GraphNames, MainRecord, TmoNode};
use topograph_store::database::bind;
use topograph_store::{Collection, CreatePolicy, Database, GraphClient};

use crate::error::{CoreError, CoreResult};

/// Everything an operation needs to touch one projection.
#[derive(Clone)]
pub struct ProjectionContext {
    pub client: GraphClient,
    pub names: GraphNames,
    /// `_key` of the main record in the registry collection.
    pub key: String,
    pub record: Doc<MainRecord>,
    pub db: Database,
}

impl ProjectionContext {
    /// Loads the main record and opens its database. Fails with
    /// `DocumentNotFound` when the record is missing and `NotFound` when the
    /// database behind it is gone.
    pub async fn open(
        client: GraphClient,
        names: GraphNames,
        key: &str,
    ) -> CoreResult<Self> {
        let registry = client
            .sys_db()
            .collection(&names.main_graph_collection);
        let record: Doc<MainRecord> = registry.get(key).await?.ok_or_else(|| {
            CoreError::DocumentNotFound(format!("Document with key {key} not found"))
        })?;
        let db = client
            .get_or_create_database(&record.body.database, CreatePolicy::RaiseError)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("database {}", record.body.database)))?;
        Ok(ProjectionContext {
            client,
            names,
            key: key.to_string(),
            record,
            db,
        })
    }

    /// Re-reads the main record (status transitions happen out-of-band).
    pub async fn reload_record(&mut self) -> CoreResult<()> {
        let registry = self.registry();
        self.record = registry.get(&self.key).await?.ok_or_else(|| {
            CoreError::DocumentNotFound(format!("Document with key {} not found", self.key))
        })?;
        Ok(())
    }

    /// The registry collection in the system database.
    #[must_use]
    pub fn registry(&self) -> Collection {
        self.client
            .sys_db()
            .collection(&self.names.main_graph_collection)
    }

    #[must_use]
    pub fn tmo(&self) -> Collection {
        self.db.collection(&self.names.tmo_collection)
    }

    #[must_use]
    pub fn tmo_edge(&self) -> Collection {
        self.db.collection(&self.names.tmo_edge_collection)
    }

    #[must_use]
    pub fn main(&self) -> Collection {
        self.db.collection(&self.names.main_collection)
    }

    #[must_use]
    pub fn main_edge(&self) -> Collection {
        self.db.collection(&self.names.main_edge_collection)
    }

    #[must_use]
    pub fn path_edge(&self) -> Collection {
        self.db.collection(&self.names.path_edge_collection)
    }

    #[must_use]
    pub fn config(&self) -> Collection {
        self.db.collection(&self.names.config_collection)
    }

    // ------------------------------------------------------------------
    // Settings documents
    // ------------------------------------------------------------------

    pub async fn trace_tmo_id(&self) -> CoreResult<Option<i64>> {
        let doc: Option<TraceTmoDoc> = self.config().get(TRACE_TMO_KEY).await?;
        Ok(doc.map(|d| d.tmo_id))
    }

    pub async fn trace_tprm_id(&self) -> CoreResult<Option<i64>> {
        let doc: Option<TraceTprmDoc> = self.config().get(TRACE_TPRM_KEY).await?;
        Ok(doc.map(|d| d.tprm_id))
    }

    pub async fn group_by_tprms(&self) -> CoreResult<Vec<i64>> {
        let doc: Option<GroupByDoc> = self.config().get(GROUP_BY_KEY).await?;
        Ok(doc.map(|d| d.tprms).unwrap_or_default())
    }

    pub async fn delete_orphan_branches(&self) -> CoreResult<bool> {
        let doc: Option<DeleteOrphansDoc> = self.config().get(DELETE_ORPHANS_KEY).await?;
        Ok(doc.map(|d| d.delete_orphan_branches).unwrap_or(false))
    }

    /// The effective build root: `start_from` when configured, otherwise the
    /// projection root TMO.
    pub async fn start_from(&self) -> CoreResult<StartFromDoc> {
        let doc: Option<StartFromDoc> = self.config().get(START_FROM_KEY).await?;
        Ok(doc.unwrap_or(StartFromDoc {
            tmo_id: self.record.body.tmo_id,
            tprm_id: None,
        }))
    }

    /// The trace TMO's schema vertex, when the trace layer is configured.
    pub async fn trace_tmo_data(&self) -> CoreResult<Option<Doc<TmoNode>>> {
        let Some(tmo_id) = self.trace_tmo_id().await? else {
            return Ok(None);
        };
        Ok(self.tmo().get(&tmo_id.to_string()).await?)
    }

    /// TMO vertices by numeric id.
    pub async fn tmos_by_ids(&self, tmo_ids: &[i64]) -> CoreResult<Vec<Doc<TmoNode>>> {
        if tmo_ids.is_empty() {
            return Ok(Vec::new());
        }
        let aql = r"
            FOR doc IN @@tmo
                FILTER doc._key IN @keys
                RETURN doc
        ";
        let keys: Vec<String> = tmo_ids.iter().map(ToString::to_string).collect();
        let vars = bind([
            ("@tmo", json!(self.names.tmo_collection)),
            ("keys", json!(keys)),
        ]);
        Ok(self.db.query_all(aql, vars).await?)
    }

    /// Every TMO vertex of the projection.
    pub async fn all_tmos(&self) -> CoreResult<Vec<Doc<TmoNode>>> {
        Ok(self.tmo().all().await?)
    }
}
