//! AQL result cursors.
//!
//! The store returns query results in batches; [`Cursor`] pulls follow-up
//! batches on demand so consumers never hold the whole result set unless
//! they ask for it.

use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use crate::database::Database;
use crate::error::StoreResult;

#[derive(Debug, serde::Deserialize)]
pub(crate) struct RawCursorPage {
    #[serde(default)]
    pub result: Vec<Json>,
    #[serde(default, rename = "hasMore")]
    pub has_more: bool,
    #[serde(default)]
    pub id: Option<String>,
}

/// A typed, batch-streaming query cursor.
pub struct Cursor<T> {
    db: Database,
    buffer: std::vec::IntoIter<Json>,
    cursor_id: Option<String>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: DeserializeOwned> Cursor<T> {
    pub(crate) fn from_first_page(db: Database, page: RawCursorPage) -> StoreResult<Self> {
        Ok(Cursor {
            db,
            buffer: page.result.into_iter(),
            cursor_id: if page.has_more { page.id } else { None },
            _marker: std::marker::PhantomData,
        })
    }

    /// Next item, fetching the next batch when the buffer runs dry.
    pub async fn next_item(&mut self) -> StoreResult<Option<T>> {
        loop {
            if let Some(raw) = self.buffer.next() {
                return Ok(Some(serde_json::from_value(raw)?));
            }
            let Some(id) = self.cursor_id.take() else {
                return Ok(None);
            };
            let page: RawCursorPage = self
                .db
                .request(
                    reqwest::Method::PUT,
                    &format!("/_api/cursor/{id}"),
                    None,
                )
                .await?;
            self.buffer = page.result.into_iter();
            if page.has_more {
                self.cursor_id = page.id;
            }
        }
    }

    /// Next full batch of items; `None` once exhausted.
    pub async fn next_batch(&mut self) -> StoreResult<Option<Vec<T>>> {
        let mut batch = Vec::new();
        for raw in self.buffer.by_ref() {
            batch.push(serde_json::from_value(raw)?);
        }
        if !batch.is_empty() {
            return Ok(Some(batch));
        }
        let Some(id) = self.cursor_id.take() else {
            return Ok(None);
        };
        let page: RawCursorPage = self
            .db
            .request(reqwest::Method::PUT, &format!("/_api/cursor/{id}"), None)
            .await?;
        if page.has_more {
            self.cursor_id = page.id;
        }
        let mut batch = Vec::with_capacity(page.result.len());
        for raw in page.result {
            batch.push(serde_json::from_value(raw)?);
        }
        if batch.is_empty() && self.cursor_id.is_none() {
            return Ok(None);
        }
        Ok(Some(batch))
    }

    /// Collects every remaining item.
    pub async fn collect_all(mut self) -> StoreResult<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next_item().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Exhausts the cursor, discarding items. For mutation queries.
    pub async fn drain_remaining(&mut self) -> StoreResult<()> {
        while self.next_item().await?.is_some() {}
        Ok(())
    }
}
