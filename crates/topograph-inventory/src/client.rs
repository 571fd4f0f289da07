//! gRPC implementation of [`InventoryApi`].

use std::collections::HashMap;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use topograph_model::{Mo, Prm, Tprm};
use topograph_util::retry::{with_retry, RetryPolicy};

use crate::api::{InventoryApi, MosQuery, TmoTree};
use crate::config::InventoryConfig;
use crate::convert;
use crate::error::{InventoryError, InventoryResult};
use crate::proto::graph_informer_client::GraphInformerClient;
use crate::proto;

/// Inventory client over one gRPC channel.
///
/// Each worker opens its own client: the channel keeps a 30 s keepalive and
/// multiplexing it across workers would serialize their bulk reads.
#[derive(Clone)]
pub struct InventoryClient {
    inner: GraphInformerClient<Channel>,
    retry: RetryPolicy,
}

impl InventoryClient {
    /// Connects with keepalive. Fails fast if the endpoint is unreachable.
    pub async fn connect(config: &InventoryConfig) -> InventoryResult<Self> {
        let endpoint = Endpoint::from_shared(config.url())
            .map_err(|e| InventoryError::InvalidRequest(e.to_string()))?
            .keep_alive_while_idle(true)
            .http2_keep_alive_interval(Duration::from_secs(30))
            .keep_alive_timeout(Duration::from_secs(15));
        let channel = endpoint.connect().await?;
        debug!(url = config.url(), "inventory channel established");
        Ok(InventoryClient {
            inner: GraphInformerClient::new(channel),
            retry: RetryPolicy::default(),
        })
    }

    /// TPRM definitions keyed by id, for value conversion.
    async fn tprm_map_for_tmo(&self, tmo_id: i64) -> InventoryResult<HashMap<i64, Tprm>> {
        let tprms = self.tprms_by_tmo(&[tmo_id]).await?;
        Ok(tprms.into_iter().map(|t| (t.id, t)).collect())
    }
}

#[async_trait]
impl InventoryApi for InventoryClient {
    async fn tmo_tree(&self, tmo_id: i64) -> InventoryResult<Vec<TmoTree>> {
        let client = self.inner.clone();
        let response = with_retry(self.retry, "GetTMOTree", || {
            let mut client = client.clone();
            async move {
                client
                    .get_tmo_tree(proto::InTmoId { tmo_id })
                    .await
                    .map_err(InventoryError::from)
            }
        })
        .await?;
        Ok(response
            .into_inner()
            .nodes
            .into_iter()
            .map(convert::tmo_tree)
            .collect())
    }

    async fn tprms_by_tmo(&self, tmo_ids: &[i64]) -> InventoryResult<Vec<Tprm>> {
        if tmo_ids.is_empty() {
            return Err(InventoryError::InvalidRequest("empty tmo id list".into()));
        }
        let request = proto::InTmoIds {
            tmo_id: tmo_ids.to_vec(),
        };
        let client = self.inner.clone();
        let response = with_retry(self.retry, "GetTPRMsByTMOid", || {
            let mut client = client.clone();
            let request = request.clone();
            async move {
                client
                    .get_tpr_ms_by_tm_oid(request)
                    .await
                    .map_err(InventoryError::from)
            }
        })
        .await?;
        Ok(response
            .into_inner()
            .tprms
            .into_iter()
            .map(convert::tprm)
            .collect())
    }

    async fn mos_by_tmo(
        &self,
        query: MosQuery,
    ) -> InventoryResult<BoxStream<'static, InventoryResult<Vec<Mo>>>> {
        if query.tmo_id <= 0 {
            return Err(InventoryError::InvalidRequest(format!(
                "incorrect tmo id {}",
                query.tmo_id
            )));
        }
        if query.chunk_size == 0 {
            return Err(InventoryError::InvalidRequest("chunk size must be > 0".into()));
        }
        let tprms = self.tprm_map_for_tmo(query.tmo_id).await?;
        let request = proto::InMOsByTmOid {
            tmo_id: query.tmo_id,
            mo_filter_by: query
                .mo_filter
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            prm_filter_by: query
                .prm_filter
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            keep_mo_without_prm: query.keep_mo_without_prm,
            chunk_size: query.chunk_size,
        };
        let client = self.inner.clone();
        let retry = self.retry;
        let response = with_retry(retry, "GetMOsByTMOid", || {
            let mut client = client.clone();
            let request = request.clone();
            async move {
                client
                    .get_m_os_by_tm_oid(request)
                    .await
                    .map_err(InventoryError::from)
            }
        })
        .await?;
        let mut chunks = response.into_inner();
        let stream = try_stream! {
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk.map_err(InventoryError::from)?;
                let mut mos = Vec::with_capacity(chunk.mo.len());
                for raw in chunk.mo {
                    mos.push(convert::mo(raw, &tprms)?);
                }
                yield mos;
            }
        };
        Ok(stream.boxed())
    }

    async fn tmo_by_mo(&self, mo_id: i64) -> InventoryResult<i64> {
        if mo_id <= 0 {
            return Err(InventoryError::InvalidRequest(format!(
                "incorrect mo id {mo_id}"
            )));
        }
        let client = self.inner.clone();
        let response = with_retry(self.retry, "GetTmoByMoId", || {
            let mut client = client.clone();
            async move {
                client
                    .get_tmo_by_mo_id(proto::InTmoByMoId { mo_id })
                    .await
                    .map_err(InventoryError::from)
            }
        })
        .await?;
        Ok(response.into_inner().tmo_id)
    }

    async fn mos_by_ids(&self, mo_ids: &[i64]) -> InventoryResult<Vec<Mo>> {
        if mo_ids.is_empty() {
            return Ok(Vec::new());
        }
        let request = proto::InMOsByMoIds {
            mo_ids: mo_ids.to_vec(),
        };
        let client = self.inner.clone();
        let response = with_retry(self.retry, "GetMOsByMoIds", || {
            let mut client = client.clone();
            let request = request.clone();
            async move {
                client
                    .get_m_os_by_mo_ids(request)
                    .await
                    .map_err(InventoryError::from)
            }
        })
        .await?;
        let raw_mos = response.into_inner().mos;
        // Parameters stay raw here: callers that need typed PRM values on
        // arbitrary MOs resolve them against their TPRMs separately.
        let empty = HashMap::new();
        let mut mos = Vec::with_capacity(raw_mos.len());
        for mut raw in raw_mos {
            raw.params.clear();
            mos.push(convert::mo(raw, &empty)?);
        }
        Ok(mos)
    }

    async fn prms_by_ids(&self, prm_ids: &[i64]) -> InventoryResult<Vec<Prm>> {
        if prm_ids.is_empty() {
            return Ok(Vec::new());
        }
        let request = proto::InPrMsByPrmIds {
            prm_ids: prm_ids.to_vec(),
        };
        let client = self.inner.clone();
        let response = with_retry(self.retry, "GetPRMsByPRMIds", || {
            let mut client = client.clone();
            let request = request.clone();
            async move {
                client
                    .get_pr_ms_by_prm_ids(request)
                    .await
                    .map_err(InventoryError::from)
            }
        })
        .await?;
        let raw_prms = response.into_inner().prms;
        let tprm_ids: Vec<i64> = {
            let mut ids: Vec<i64> = raw_prms.iter().map(|p| p.tprm_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let tprms: HashMap<i64, Tprm> = self
            .tprms_by_ids(&tprm_ids)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();
        raw_prms
            .into_iter()
            .map(|raw| convert::prm(raw, &tprms))
            .collect()
    }

    async fn point_tmo_const(&self, tmo_id: i64) -> InventoryResult<Vec<i64>> {
        let client = self.inner.clone();
        let response = with_retry(self.retry, "GetPointTmoConst", || {
            let mut client = client.clone();
            async move {
                client
                    .get_point_tmo_const(proto::InTmoId { tmo_id })
                    .await
                    .map_err(InventoryError::from)
            }
        })
        .await?;
        Ok(response.into_inner().tmo_ids)
    }

    async fn tprm_const(&self, tprm_id: i64) -> InventoryResult<Vec<i64>> {
        let client = self.inner.clone();
        let response = with_retry(self.retry, "GetTprmConst", || {
            let mut client = client.clone();
            async move {
                client
                    .get_tprm_const(proto::InTprmId { tprm_id })
                    .await
                    .map_err(InventoryError::from)
            }
        })
        .await?;
        Ok(response.into_inner().tmo_ids)
    }

    async fn tprms_by_ids(&self, tprm_ids: &[i64]) -> InventoryResult<Vec<Tprm>> {
        if tprm_ids.is_empty() {
            return Ok(Vec::new());
        }
        let request = proto::InTprmIds {
            tprm_ids: tprm_ids.to_vec(),
        };
        let client = self.inner.clone();
        let response = with_retry(self.retry, "GetTprmByTprmIds", || {
            let mut client = client.clone();
            let request = request.clone();
            async move {
                client
                    .get_tprm_by_tprm_ids(request)
                    .await
                    .map_err(InventoryError::from)
            }
        })
        .await?;
        Ok(response
            .into_inner()
            .tprms
            .into_iter()
            .map(convert::tprm)
            .collect())
    }
}
