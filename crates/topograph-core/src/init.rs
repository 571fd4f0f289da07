//! Projection initializer: creates the per-projection database with its
//! collections, indexes, search machinery and named graphs, then
//! materializes the TMO schema layer from the inventory tree.

use std::collections::HashMap;

use serde_json::{json, Value as Json};
use tracing::{info, instrument};

use topograph_inventory::{InventoryApi, TmoTree};
use topograph_model::{Doc, GraphNames, LinkKind, MainRecord, Status, TmoEdge};
use topograph_store::database::EdgeDefinition;
use topograph_store::{BulkItem, BulkOptions, CreatePolicy, Database, GraphClient};

use crate::error::{CoreError, CoreResult};
use crate::registry::Registry;

/// Request to create a projection.
#[derive(Debug, Clone)]
pub struct InitRequest {
    pub name: String,
    pub tmo_id: i64,
}

pub struct Initializer<'a> {
    client: GraphClient,
    names: GraphNames,
    inventory: &'a dyn InventoryApi,
}

impl<'a> Initializer<'a> {
    #[must_use]
    pub fn new(client: GraphClient, names: GraphNames, inventory: &'a dyn InventoryApi) -> Self {
        Initializer {
            client,
            names,
            inventory,
        }
    }

    /// Preconditions: unique name/TMO, a TMO tree behind the root id, and a
    /// free database name.
    pub async fn check(&self, request: &InitRequest) -> CoreResult<()> {
        let registry = Registry::new(self.client.clone(), self.names.clone());
        registry.check_unique(&request.name, request.tmo_id).await?;

        let trees = self.inventory.tmo_tree(request.tmo_id).await?;
        if trees.is_empty() {
            return Err(CoreError::Validation(format!(
                "TMO with id {} does not exist in inventory",
                request.tmo_id
            )));
        }

        let db_name = self.names.db_name(request.tmo_id);
        if self.client.has_database(&db_name).await? {
            return Err(CoreError::Validation(format!(
                "DB with name {db_name} already exists"
            )));
        }
        Ok(())
    }

    /// Creates the projection: database, layout, TMO layer, main record.
    /// Any failure after the record exists flips it to `Error` and re-raises.
    #[instrument(skip(self), fields(name = %request.name, tmo_id = request.tmo_id))]
    pub async fn execute(&self, request: &InitRequest) -> CoreResult<Doc<MainRecord>> {
        let registry = Registry::new(self.client.clone(), self.names.clone());
        let db_name = self.names.db_name(request.tmo_id);
        let mut record = MainRecord {
            name: request.name.clone(),
            tmo_id: request.tmo_id,
            status: Status::New,
            database: db_name.clone(),
            active_tmo_ids: Vec::new(),
            error_description: None,
            tmo_datetime: Some(chrono::Utc::now()),
            mo_datetime: None,
        };
        let stored = registry.put(&record).await?;

        let result = self.build_layout(&db_name, request.tmo_id).await;
        match result {
            Ok(active_tmo_ids) => {
                record.active_tmo_ids = active_tmo_ids;
                registry.replace(&stored.key, &record).await?;
                info!(key = %stored.key, "projection initialized");
                registry.get(&stored.key).await?.ok_or_else(|| {
                    CoreError::DocumentNotFound(format!("Document with key {} not found", stored.key))
                })
            }
            Err(err) => {
                record.status = Status::Error;
                record.error_description = Some(err.to_string());
                registry.replace(&stored.key, &record).await?;
                Err(err)
            }
        }
    }

    async fn build_layout(&self, db_name: &str, root_tmo_id: i64) -> CoreResult<Vec<i64>> {
        let db = self
            .client
            .get_or_create_database(db_name, CreatePolicy::Create)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("database {db_name}")))?;
        self.create_collections(&db).await?;
        self.fill_tmo_layer(&db, root_tmo_id).await
    }

    async fn create_collections(&self, db: &Database) -> CoreResult<()> {
        let names = &self.names;

        // Schema layer
        db.get_or_create_collection(&names.tmo_collection, false, CreatePolicy::Create)
            .await?;
        db.create_hash_index(&names.tmo_collection, &["name"], true, true)
            .await?;
        db.get_or_create_collection(&names.tmo_edge_collection, true, CreatePolicy::Create)
            .await?;
        db.create_graph(
            &names.tmo_graph,
            &EdgeDefinition {
                edge_collection: names.tmo_edge_collection.clone(),
                from_collections: vec![names.tmo_collection.clone()],
                to_collections: vec![names.tmo_collection.clone()],
            },
            CreatePolicy::ReturnNone,
        )
        .await?;

        db.get_or_create_collection(&names.config_collection, false, CreatePolicy::Create)
            .await?;

        // Instance layer
        db.get_or_create_collection(&names.main_collection, false, CreatePolicy::Create)
            .await?;
        db.create_hash_index(&names.main_collection, &["grouped_by_tprm"], false, true)
            .await?;
        db.create_hash_index(&names.main_collection, &["name"], false, true)
            .await?;
        db.create_hash_index(&names.main_collection, &["tmo"], false, true)
            .await?;

        db.get_or_create_collection(&names.main_edge_collection, true, CreatePolicy::Create)
            .await?;
        db.create_hash_index(&names.main_edge_collection, &["connection_type"], false, true)
            .await?;
        db.create_hash_index(&names.main_edge_collection, &["virtual"], false, true)
            .await?;
        db.create_graph(
            &names.main_graph,
            &EdgeDefinition {
                edge_collection: names.main_edge_collection.clone(),
                from_collections: vec![names.main_collection.clone()],
                to_collections: vec![names.main_collection.clone()],
            },
            CreatePolicy::ReturnNone,
        )
        .await?;

        // Search machinery
        db.create_norm_analyzer(&names.analyzer, "en").await?;
        db.create_inverted_index(
            &names.main_collection,
            &names.search_index,
            &["name", "label", "indexed[*]"],
            &names.analyzer,
        )
        .await?;
        db.create_search_view(&names.search_view, &names.main_collection, &names.search_index)
            .await?;

        // Path layer
        db.get_or_create_collection(&names.path_edge_collection, true, CreatePolicy::Create)
            .await?;
        db.create_graph(
            &names.path_graph,
            &EdgeDefinition {
                edge_collection: names.path_edge_collection.clone(),
                from_collections: vec![names.main_collection.clone()],
                to_collections: vec![names.main_collection.clone()],
            },
            CreatePolicy::ReturnNone,
        )
        .await?;
        Ok(())
    }

    /// Walks the TMO trees depth-first into vertices and edges, attaches
    /// TPRMs, and derives link edges from TPRM constraints.
    async fn fill_tmo_layer(&self, db: &Database, root_tmo_id: i64) -> CoreResult<Vec<i64>> {
        let trees = self.inventory.tmo_tree(root_tmo_id).await?;
        let mut elements: HashMap<i64, Json> = HashMap::new();
        let mut links: Vec<TmoEdge> = Vec::new();

        let mut queue: Vec<&TmoTree> = trees.iter().collect();
        while let Some(node) = queue.pop() {
            queue.extend(node.children.iter());
            elements.insert(node.id, self.tmo_element(node));
            for constraint in &node.points_constraint_by_tmo {
                links.push(self.tmo_link(node.id, *constraint, LinkKind::PointConstraint, None));
            }
            if let Some(p_id) = node.p_id {
                links.push(self.tmo_link(node.id, p_id, LinkKind::PId, None));
            }
        }

        let tmo_ids: Vec<i64> = elements.keys().copied().collect();
        let tprms = self.inventory.tprms_by_tmo(&tmo_ids).await?;
        for tprm in tprms {
            let Some(element) = elements.get_mut(&tprm.tmo_id) else {
                continue;
            };
            if tprm.is_mo_link() {
                let kind = if tprm.val_type == topograph_model::record::val_type::TWO_WAY_LINK {
                    LinkKind::TwoWayLink
                } else {
                    LinkKind::MoLink
                };
                for target in tprm.constraint_tmo_ids() {
                    links.push(self.tmo_link(tprm.tmo_id, target, kind, Some(tprm.id)));
                }
            }
            if let Some(params) = element["params"].as_array_mut() {
                params.push(serde_json::to_value(&tprm)?);
            }
        }

        // Only links between materialized elements survive.
        let known: std::collections::HashSet<String> = elements
            .keys()
            .map(|id| self.names.tmo_doc_id(*id))
            .collect();
        links.retain(|link| known.contains(&link.from) && known.contains(&link.to));

        let tmo_collection = db.collection(&self.names.tmo_collection);
        let edge_collection = db.collection(&self.names.tmo_edge_collection);
        tmo_collection.truncate().await?;
        edge_collection.truncate().await?;

        let docs: Vec<Json> = elements.values().cloned().collect();
        let inserted: Vec<BulkItem<Json>> = tmo_collection
            .insert_many(&docs, BulkOptions::default())
            .await?;
        for item in inserted {
            item.into_result()?;
        }
        let inserted: Vec<BulkItem<Json>> = edge_collection
            .insert_many(&links, BulkOptions::default())
            .await?;
        for item in inserted {
            item.into_result()?;
        }

        Ok(elements.into_keys().collect())
    }

    fn tmo_element(&self, node: &TmoTree) -> Json {
        json!({
            "_id": self.names.tmo_doc_id(node.id),
            "_key": node.id.to_string(),
            "id": node.id,
            "p_id": node.p_id,
            "name": node.name,
            "icon": node.icon,
            "description": node.description,
            "virtual": node.is_virtual,
            "global_uniqueness": node.global_uniqueness,
            "materialize": node.materialize,
            "points_constraint_by_tmo": node.points_constraint_by_tmo,
            "geometry_type": node.geometry_type,
            "line_type": node.line_type,
            "label": node.label,
            "minimize": node.minimize,
            "enabled": true,
            "params": [],
        })
    }

    fn tmo_link(
        &self,
        from: i64,
        to: i64,
        link_type: LinkKind,
        tprm_id: Option<i64>,
    ) -> TmoEdge {
        TmoEdge {
            from: self.names.tmo_doc_id(from),
            to: self.names.tmo_doc_id(to),
            link_type,
            enabled: true,
            tprm_id,
        }
    }
}
