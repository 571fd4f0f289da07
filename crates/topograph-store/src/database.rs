//! Per-database operations: collections, named graphs, analyzers, indexes,
//! views and AQL queries.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value as Json};
use tracing::debug;

use crate::client::Transport;
use crate::collection::Collection;
use crate::cursor::{Cursor, RawCursorPage};
use crate::error::{StoreError, StoreResult};
use crate::CreatePolicy;

/// An edge definition of a named graph.
#[derive(Debug, Clone)]
pub struct EdgeDefinition {
    pub edge_collection: String,
    pub from_collections: Vec<String>,
    pub to_collections: Vec<String>,
}

/// Options for a single AQL query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Server-side batch size for the cursor.
    pub batch_size: Option<u32>,
    /// Hard limit on query runtime, seconds. The store kills the query and
    /// the adapter surfaces [`StoreError::Timeout`].
    pub max_runtime_secs: Option<f64>,
}

/// Handle to one database.
#[derive(Clone)]
pub struct Database {
    transport: Arc<Transport>,
    name: String,
}

impl Database {
    pub(crate) fn new(transport: Arc<Transport>, name: &str) -> Self {
        Database {
            transport,
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn path(&self, suffix: &str) -> String {
        format!("/_db/{}{}", self.name, suffix)
    }

    pub(crate) async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        suffix: &str,
        body: Option<&Json>,
    ) -> StoreResult<T> {
        self.transport.request(method, &self.path(suffix), body).await
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    #[must_use]
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(self.clone(), name)
    }

    pub async fn has_collection(&self, name: &str) -> StoreResult<bool> {
        match self
            .request::<Json>(
                reqwest::Method::GET,
                &format!("/_api/collection/{name}"),
                None,
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub async fn create_collection(&self, name: &str, edge: bool) -> StoreResult<Collection> {
        let body = json!({ "name": name, "type": if edge { 3 } else { 2 } });
        let _: Json = self
            .request(reqwest::Method::POST, "/_api/collection", Some(&body))
            .await?;
        debug!(db = %self.name, collection = name, edge, "collection created");
        Ok(self.collection(name))
    }

    pub async fn get_or_create_collection(
        &self,
        name: &str,
        edge: bool,
        policy: CreatePolicy,
    ) -> StoreResult<Option<Collection>> {
        if self.has_collection(name).await? {
            return Ok(Some(self.collection(name)));
        }
        match policy {
            CreatePolicy::Create => Ok(Some(self.create_collection(name, edge).await?)),
            CreatePolicy::RaiseError => Err(StoreError::NotFound(format!(
                "collection {name} does not exist"
            ))),
            CreatePolicy::ReturnNone => Ok(None),
        }
    }

    pub async fn delete_collection(&self, name: &str) -> StoreResult<()> {
        match self
            .request::<Json>(
                reqwest::Method::DELETE,
                &format!("/_api/collection/{name}"),
                None,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Names of the non-system collections.
    pub async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let response: Json = self
            .request(
                reqwest::Method::GET,
                "/_api/collection?excludeSystem=true",
                None,
            )
            .await?;
        Ok(response["result"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|c| c["name"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // Named graphs, analyzers, indexes, views
    // ------------------------------------------------------------------

    pub async fn create_graph(
        &self,
        name: &str,
        definition: &EdgeDefinition,
        policy: CreatePolicy,
    ) -> StoreResult<()> {
        let body = json!({
            "name": name,
            "edgeDefinitions": [{
                "collection": definition.edge_collection,
                "from": definition.from_collections,
                "to": definition.to_collections,
            }],
        });
        match self
            .request::<Json>(reqwest::Method::POST, "/_api/gharial", Some(&body))
            .await
        {
            Ok(_) => Ok(()),
            Err(StoreError::AlreadyExists(_) | StoreError::Conflict(_))
                if policy == CreatePolicy::ReturnNone =>
            {
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Registers a `norm` analyzer (lowercase, accent-stripping, given
    /// locale). Already-registered analyzers are fine.
    pub async fn create_norm_analyzer(&self, name: &str, locale: &str) -> StoreResult<()> {
        let body = json!({
            "name": name,
            "type": "norm",
            "properties": { "locale": locale, "accent": false, "case": "lower" },
        });
        match self
            .request::<Json>(reqwest::Method::POST, "/_api/analyzer", Some(&body))
            .await
        {
            Ok(_) | Err(StoreError::AlreadyExists(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub async fn create_hash_index(
        &self,
        collection: &str,
        fields: &[&str],
        unique: bool,
        sparse: bool,
    ) -> StoreResult<()> {
        let body = json!({
            "type": "persistent",
            "fields": fields,
            "unique": unique,
            "sparse": sparse,
        });
        let _: Json = self
            .request(
                reqwest::Method::POST,
                &format!("/_api/index?collection={collection}"),
                Some(&body),
            )
            .await?;
        Ok(())
    }

    /// Inverted index over analyzed fields, for the search view.
    pub async fn create_inverted_index(
        &self,
        collection: &str,
        name: &str,
        fields: &[&str],
        analyzer: &str,
    ) -> StoreResult<()> {
        let field_defs: Vec<Json> = fields
            .iter()
            .map(|f| json!({ "name": f, "analyzer": analyzer }))
            .collect();
        let body = json!({
            "type": "inverted",
            "name": name,
            "fields": field_defs,
        });
        let _: Json = self
            .request(
                reqwest::Method::POST,
                &format!("/_api/index?collection={collection}"),
                Some(&body),
            )
            .await?;
        Ok(())
    }

    /// Search-alias view exposing an inverted index.
    pub async fn create_search_view(
        &self,
        name: &str,
        collection: &str,
        index: &str,
    ) -> StoreResult<()> {
        let body = json!({
            "name": name,
            "type": "search-alias",
            "indexes": [{ "collection": collection, "index": index }],
        });
        let _: Json = self
            .request(reqwest::Method::POST, "/_api/view", Some(&body))
            .await?;
        Ok(())
    }

    pub async fn has_view(&self, name: &str) -> StoreResult<bool> {
        match self
            .request::<Json>(reqwest::Method::GET, &format!("/_api/view/{name}"), None)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    // ------------------------------------------------------------------
    // AQL
    // ------------------------------------------------------------------

    /// Runs a parameterized query and returns a streaming cursor.
    ///
    /// Bind collection names with the `@@name` convention: pass
    /// `("@name", json!(collection_name))` in `bind_vars`.
    pub async fn query<T: DeserializeOwned>(
        &self,
        aql: &str,
        bind_vars: Map<String, Json>,
    ) -> StoreResult<Cursor<T>> {
        self.query_with_options(aql, bind_vars, &QueryOptions::default())
            .await
    }

    pub async fn query_with_options<T: DeserializeOwned>(
        &self,
        aql: &str,
        bind_vars: Map<String, Json>,
        options: &QueryOptions,
    ) -> StoreResult<Cursor<T>> {
        let mut body = json!({
            "query": aql,
            "bindVars": bind_vars,
        });
        if let Some(batch_size) = options.batch_size {
            body["batchSize"] = json!(batch_size);
        }
        if let Some(max_runtime) = options.max_runtime_secs {
            body["options"] = json!({ "maxRuntime": max_runtime });
        }
        let page: RawCursorPage = self
            .request(reqwest::Method::POST, "/_api/cursor", Some(&body))
            .await?;
        Cursor::from_first_page(self.clone(), page)
    }

    /// Runs a query for its side effects, discarding results.
    pub async fn execute(&self, aql: &str, bind_vars: Map<String, Json>) -> StoreResult<()> {
        let mut cursor: Cursor<Json> = self.query(aql, bind_vars).await?;
        cursor.drain_remaining().await?;
        Ok(())
    }

    /// Runs a query and collects every batch.
    pub async fn query_all<T: DeserializeOwned>(
        &self,
        aql: &str,
        bind_vars: Map<String, Json>,
    ) -> StoreResult<Vec<T>> {
        let cursor: Cursor<T> = self.query(aql, bind_vars).await?;
        cursor.collect_all().await
    }
}

/// A server-side stream transaction spanning multiple collections.
///
/// Queries executed while the scope is open are atomic together; the
/// builder's compound invariants normally rely on single-statement atomicity
/// (§ concurrency model), so this is used sparingly.
pub struct TransactionScope {
    db: Database,
    id: String,
}

impl Database {
    /// Opens a stream transaction over the given write collections.
    pub async fn begin_transaction(&self, write: &[&str]) -> StoreResult<TransactionScope> {
        let body = json!({ "collections": { "write": write } });
        let response: Json = self
            .request(
                reqwest::Method::POST,
                "/_api/transaction/begin",
                Some(&body),
            )
            .await?;
        let id = response["result"]["id"]
            .as_str()
            .ok_or_else(|| StoreError::NotFound("transaction id missing".into()))?
            .to_string();
        Ok(TransactionScope {
            db: self.clone(),
            id,
        })
    }
}

impl TransactionScope {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn commit(self) -> StoreResult<()> {
        let _: Json = self
            .db
            .request(
                reqwest::Method::PUT,
                &format!("/_api/transaction/{}", self.id),
                None,
            )
            .await?;
        Ok(())
    }

    pub async fn abort(self) -> StoreResult<()> {
        let _: Json = self
            .db
            .request(
                reqwest::Method::DELETE,
                &format!("/_api/transaction/{}", self.id),
                None,
            )
            .await?;
        Ok(())
    }
}

/// Builds a bind-variable map from `(name, value)` pairs. Collection
/// parameters use the leading `@`: `bind([("@main", json!("main"))])`.
#[must_use]
pub fn bind(pairs: impl IntoIterator<Item = (&'static str, Json)>) -> Map<String, Json> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_builds_map() {
        let vars = bind([("@main", json!("main")), ("tmoId", json!(7))]);
        assert_eq!(vars["@main"], "main");
        assert_eq!(vars["tmoId"], 7);
    }
}
