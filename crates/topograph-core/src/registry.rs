//! Projection registry: the `main_graphs` collection in the system
//! database, one [`MainRecord`] per projection.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use topograph_model::{Doc, GraphNames, MainRecord, Status};
use topograph_store::database::bind;
use topograph_store::{BulkItem, BulkOptions, Collection, CreatePolicy, GraphClient};

use crate::error::{CoreError, CoreResult};

/// Registry handle.
#[derive(Clone)]
pub struct Registry {
    client: GraphClient,
    names: GraphNames,
}

impl Registry {
    #[must_use]
    pub fn new(client: GraphClient, names: GraphNames) -> Self {
        Registry { client, names }
    }

    async fn collection(&self) -> CoreResult<Collection> {
        let collection = self
            .client
            .sys_db()
            .get_or_create_collection(&self.names.main_graph_collection, false, CreatePolicy::Create)
            .await?
            .ok_or_else(|| CoreError::NotFound("registry collection".to_string()))?;
        Ok(collection)
    }

    /// Every registered projection.
    pub async fn list(&self) -> CoreResult<Vec<Doc<MainRecord>>> {
        Ok(self.collection().await?.all().await?)
    }

    pub async fn get(&self, key: &str) -> CoreResult<Option<Doc<MainRecord>>> {
        Ok(self.collection().await?.get(key).await?)
    }

    /// Fails when another record already uses the name or the root TMO. The
    /// message format is relied on by callers' tests.
    pub async fn check_unique(&self, name: &str, tmo_id: i64) -> CoreResult<()> {
        let collection = self.collection().await?;
        let aql = r"
            FOR doc IN @@registry
                FILTER doc.name == @name OR doc.tmo_id == @tmoId
                LIMIT 1
                RETURN doc
        ";
        let vars = bind([
            ("@registry", json!(collection.name())),
            ("name", json!(name)),
            ("tmoId", json!(tmo_id)),
        ]);
        let existing: Vec<Doc<MainRecord>> =
            self.client.sys_db().query_all(aql, vars).await?;
        if let Some(record) = existing.first() {
            let detail = if record.body.name == name {
                format!("{{'name': '{name}'}}")
            } else {
                format!("{{'tmo_id': {tmo_id}}}")
            };
            return Err(CoreError::Validation(format!(
                "Record with {detail} already exists"
            )));
        }
        Ok(())
    }

    /// Inserts or replaces a record, returning the stored document.
    pub async fn put(&self, record: &MainRecord) -> CoreResult<Doc<MainRecord>> {
        let collection = self.collection().await?;
        let item: BulkItem<Doc<MainRecord>> = collection
            .insert(record, BulkOptions::replacing())
            .await?;
        match item {
            BulkItem::Stored { new: Some(doc), .. } => Ok(doc),
            BulkItem::Stored { id, .. } => Err(CoreError::GraphBuildingError(format!(
                "record {id} stored without body"
            ))),
            BulkItem::Failed { error_message, .. } => {
                Err(CoreError::Validation(error_message))
            }
        }
    }

    /// Replaces an existing record under its key, keeping nulls so a
    /// partially-populated record fully overwrites the previous state.
    pub async fn replace(&self, key: &str, record: &MainRecord) -> CoreResult<()> {
        let collection = self.collection().await?;
        let mut doc = serde_json::to_value(record)?;
        doc["_key"] = json!(key);
        let item: BulkItem<serde_json::Value> = collection
            .insert(&doc, BulkOptions::replacing())
            .await?;
        item.into_result()?;
        Ok(())
    }

    /// Renames a projection. The new name must be unused.
    pub async fn rename(&self, key: &str, name: &str) -> CoreResult<Doc<MainRecord>> {
        let collection = self.collection().await?;
        let aql = r"
            FOR doc IN @@registry
                FILTER doc._key != @key
                FILTER doc.name == @name
                LIMIT 1
                RETURN doc
        ";
        let vars = bind([
            ("@registry", json!(collection.name())),
            ("key", json!(key)),
            ("name", json!(name)),
        ]);
        let clash: Vec<Doc<MainRecord>> = self.client.sys_db().query_all(aql, vars).await?;
        if !clash.is_empty() {
            return Err(CoreError::Validation(format!("{name} is exist")));
        }
        let item: BulkItem<Doc<MainRecord>> = collection
            .update(key, &json!({ "name": name }), false, BulkOptions::returning_new())
            .await?;
        match item {
            BulkItem::Stored { new: Some(doc), .. } => Ok(doc),
            _ => Err(CoreError::DocumentNotFound(format!("Key {key} not exist"))),
        }
    }

    /// Transitions a record's status, stamping the error description.
    pub async fn set_status(
        &self,
        key: &str,
        status: Status,
        error_description: Option<String>,
    ) -> CoreResult<()> {
        let collection = self.collection().await?;
        let patch = json!({
            "status": status,
            "error_description": error_description,
            "mo_datetime": Utc::now(),
        });
        let item: BulkItem<serde_json::Value> = collection
            .update(key, &patch, false, BulkOptions::default())
            .await?;
        item.into_result()?;
        Ok(())
    }

    /// Deletes a projection: its database first, then the record.
    pub async fn delete(&self, key: &str) -> CoreResult<()> {
        let collection = self.collection().await?;
        let record: Option<Doc<MainRecord>> = collection.get(key).await?;
        let Some(record) = record else {
            return Err(CoreError::DocumentNotFound(format!("Key {key} not exist")));
        };
        if self.client.delete_database(&record.body.database).await? {
            info!(database = %record.body.database, "projection database dropped");
        }
        collection.remove(key).await?;
        Ok(())
    }

    /// Startup recovery: any projection left `In Process` by a dead worker
    /// is marked `Error`.
    pub async fn recover_stale(&self) -> CoreResult<usize> {
        let records = self.list().await?;
        let mut recovered = 0;
        for record in records {
            if record.body.status != Status::InProcess {
                continue;
            }
            warn!(key = %record.key, "stale in-process projection, marking error");
            self.set_status(
                &record.key,
                Status::Error,
                Some("The microservice terminated unexpectedly during the process".to_string()),
            )
            .await?;
            recovered += 1;
        }
        Ok(recovered)
    }
}
