//! Document collection operations.
//!
//! Bulk calls return one [`BulkItem`] per input document: the store reports
//! partial failures inline rather than failing the batch, and callers decide
//! whether a single bad document aborts the pass.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use crate::database::Database;
use crate::error::{StoreError, StoreResult};

/// Options shared by the bulk write calls.
#[derive(Debug, Clone, Copy)]
pub struct BulkOptions {
    /// Return the stored document under `new`.
    pub return_new: bool,
    /// Keep explicit nulls instead of removing the attribute (the store's
    /// `keepNull`). The projection always writes with this on so absent
    /// optionals round-trip as nulls.
    pub keep_null: bool,
    /// Replace an existing document with the same key.
    pub overwrite_replace: bool,
}

impl Default for BulkOptions {
    fn default() -> Self {
        BulkOptions {
            return_new: false,
            keep_null: true,
            overwrite_replace: false,
        }
    }
}

impl BulkOptions {
    #[must_use]
    pub fn returning_new() -> Self {
        BulkOptions {
            return_new: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn replacing() -> Self {
        BulkOptions {
            overwrite_replace: true,
            return_new: true,
            ..Default::default()
        }
    }
}

/// Per-document outcome of a bulk operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BulkItem<T> {
    Failed {
        #[serde(rename = "errorNum")]
        error_num: i64,
        #[serde(rename = "errorMessage")]
        error_message: String,
    },
    Stored {
        #[serde(rename = "_id")]
        id: String,
        #[serde(rename = "_key")]
        key: String,
        #[serde(rename = "_rev")]
        rev: String,
        #[serde(default = "Option::default")]
        new: Option<T>,
    },
}

impl<T> BulkItem<T> {
    /// Converts a failed item into a store error, keeping stored ones.
    pub fn into_result(self) -> StoreResult<(String, String, Option<T>)> {
        match self {
            BulkItem::Stored { id, key, new, .. } => Ok((id, key, new)),
            BulkItem::Failed {
                error_num,
                error_message,
            } => Err(StoreError::from_api(0, error_num, error_message)),
        }
    }
}

/// Handle to one collection.
#[derive(Clone)]
pub struct Collection {
    db: Database,
    name: String,
}

impl Collection {
    pub(crate) fn new(db: Database, name: &str) -> Self {
        Collection {
            db,
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn doc_path(&self, query: &str) -> String {
        format!("/_api/document/{}{}", self.name, query)
    }

    fn bulk_query(options: BulkOptions) -> String {
        let mut parts = vec![format!("keepNull={}", options.keep_null)];
        if options.return_new {
            parts.push("returnNew=true".into());
        }
        if options.overwrite_replace {
            parts.push("overwrite=true".into());
            parts.push("overwriteMode=replace".into());
        }
        format!("?{}", parts.join("&"))
    }

    /// Inserts a batch; one outcome per document, in order.
    pub async fn insert_many<D: Serialize, T: DeserializeOwned>(
        &self,
        docs: &[D],
        options: BulkOptions,
    ) -> StoreResult<Vec<BulkItem<T>>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::to_value(docs)?;
        self.db
            .request(
                reqwest::Method::POST,
                &self.doc_path(&Self::bulk_query(options)),
                Some(&body),
            )
            .await
    }

    /// Partially updates a batch by `_key`.
    pub async fn update_many<D: Serialize, T: DeserializeOwned>(
        &self,
        docs: &[D],
        options: BulkOptions,
    ) -> StoreResult<Vec<BulkItem<T>>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::to_value(docs)?;
        let query = format!(
            "{}&ignoreRevs=true",
            Self::bulk_query(options)
        );
        self.db
            .request(reqwest::Method::PATCH, &self.doc_path(&query), Some(&body))
            .await
    }

    /// Deletes a batch by key (accepts documents carrying `_key`).
    pub async fn delete_many<D: Serialize>(&self, docs: &[D]) -> StoreResult<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_value(docs)?;
        let _: Vec<BulkItem<Json>> = self
            .db
            .request(
                reqwest::Method::DELETE,
                &self.doc_path("?ignoreRevs=true"),
                Some(&body),
            )
            .await?;
        Ok(())
    }

    /// Inserts one document, returning meta (and the stored doc when asked).
    pub async fn insert<D: Serialize, T: DeserializeOwned>(
        &self,
        doc: &D,
        options: BulkOptions,
    ) -> StoreResult<BulkItem<T>> {
        let body = serde_json::to_value(doc)?;
        self.db
            .request(
                reqwest::Method::POST,
                &self.doc_path(&Self::bulk_query(options)),
                Some(&body),
            )
            .await
    }

    /// Partially updates one document carrying `_key`. With `check_rev` the
    /// update fails on revision mismatch ([`StoreError::Conflict`]).
    pub async fn update<D: Serialize, T: DeserializeOwned>(
        &self,
        key: &str,
        doc: &D,
        check_rev: bool,
        options: BulkOptions,
    ) -> StoreResult<BulkItem<T>> {
        let body = serde_json::to_value(doc)?;
        let query = format!(
            "{}&ignoreRevs={}",
            Self::bulk_query(options),
            !check_rev
        );
        self.db
            .request(
                reqwest::Method::PATCH,
                &format!("/_api/document/{}/{}{}", self.name, key, query),
                Some(&body),
            )
            .await
    }

    /// Fetches one document by key; `None` when absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self
            .db
            .request(
                reqwest::Method::GET,
                &format!("/_api/document/{}/{}", self.name, key),
                None,
            )
            .await
        {
            Ok(doc) => Ok(Some(doc)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Deletes one document by key; missing documents are ignored.
    pub async fn remove(&self, key: &str) -> StoreResult<()> {
        match self
            .db
            .request::<Json>(
                reqwest::Method::DELETE,
                &format!("/_api/document/{}/{}", self.name, key),
                None,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub async fn truncate(&self) -> StoreResult<()> {
        let _: Json = self
            .db
            .request(
                reqwest::Method::PUT,
                &format!("/_api/collection/{}/truncate", self.name),
                None,
            )
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> StoreResult<u64> {
        let response: Json = self
            .db
            .request(
                reqwest::Method::GET,
                &format!("/_api/collection/{}/count", self.name),
                None,
            )
            .await?;
        Ok(response["count"].as_u64().unwrap_or(0))
    }

    /// All documents, typed. Registry-sized collections only.
    pub async fn all<T: DeserializeOwned>(&self) -> StoreResult<Vec<T>> {
        let aql = "FOR doc IN @@collection RETURN doc";
        let vars = crate::database::bind([("@collection", json!(self.name))]);
        self.db.query_all(aql, vars).await
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bulk_item_decodes_both_shapes() {
        let stored: BulkItem<Json> = serde_json::from_str(
            r#"{"_id":"main/1","_key":"1","_rev":"a","new":{"name":"x"}}"#,
        )
        .unwrap();
        match stored {
            BulkItem::Stored { id, new, .. } => {
                assert_eq!(id, "main/1");
                assert_eq!(new.unwrap()["name"], "x");
            }
            BulkItem::Failed { .. } => panic!("expected stored"),
        }

        let failed: BulkItem<Json> = serde_json::from_str(
            r#"{"error":true,"errorNum":1210,"errorMessage":"unique constraint violated"}"#,
        )
        .unwrap();
        assert!(matches!(failed, BulkItem::Failed { .. }));
        assert!(failed.into_result().is_err());
    }

    #[test]
    fn bulk_query_strings() {
        assert_eq!(
            Collection::bulk_query(BulkOptions::default()),
            "?keepNull=true"
        );
        assert_eq!(
            Collection::bulk_query(BulkOptions::replacing()),
            "?keepNull=true&returnNew=true&overwrite=true&overwriteMode=replace"
        );
    }
}
