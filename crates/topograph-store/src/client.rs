//! Connection handle and database-level administration.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value as Json};
use tracing::debug;

use topograph_util::retry::{with_retry, RetryPolicy};

use crate::database::Database;
use crate::error::{StoreError, StoreResult};
use crate::{CreatePolicy, StoreConfig};

/// Shared HTTP plumbing. Everything the adapter does goes through
/// [`Transport::request`], which applies auth, decodes the store's error
/// envelope and retries transient transport failures.
pub(crate) struct Transport {
    http: reqwest::Client,
    base: String,
    username: String,
    password: String,
}

#[derive(Debug, serde::Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default, rename = "errorNum")]
    error_num: i64,
    #[serde(default, rename = "errorMessage")]
    error_message: String,
}

impl Transport {
    fn new(config: &StoreConfig) -> StoreResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Transport {
            http,
            base: config.url(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// One JSON round-trip. `path` is absolute (starts with `/`).
    pub(crate) async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Json>,
    ) -> StoreResult<T> {
        let url = format!("{}{}", self.base, path);
        with_retry(RetryPolicy::default(), "store request", || {
            // reqwest's client is reference-counted; per-attempt clones are
            // cheap and keep the retry future self-contained.
            let http = self.http.clone();
            let method = method.clone();
            let url = url.clone();
            let username = self.username.clone();
            let password = self.password.clone();
            let body = body.cloned();
            async move {
                let mut request = http
                    .request(method, &url)
                    .basic_auth(&username, Some(&password));
                if let Some(body) = &body {
                    request = request.json(body);
                }
                let response = request.send().await?;
                let status = response.status();
                let bytes = response.bytes().await?;
                if status.is_success() {
                    return Ok(serde_json::from_slice(&bytes)?);
                }
                let parsed: ApiErrorBody =
                    serde_json::from_slice(&bytes).unwrap_or(ApiErrorBody {
                        code: Some(status.as_u16()),
                        error_num: 0,
                        error_message: String::from_utf8_lossy(&bytes).into_owned(),
                    });
                Err(StoreError::from_api(
                    parsed.code.unwrap_or(status.as_u16()),
                    parsed.error_num,
                    parsed.error_message,
                ))
            }
        })
        .await
    }
}

/// Entry point to the store: owns the connection and the system database.
#[derive(Clone)]
pub struct GraphClient {
    pub(crate) transport: Arc<Transport>,
    sys_database: String,
}

impl GraphClient {
    /// Connects and verifies the server is reachable.
    pub async fn connect(config: &StoreConfig, sys_database: &str) -> StoreResult<Self> {
        let client = GraphClient {
            transport: Arc::new(Transport::new(config)?),
            sys_database: sys_database.to_string(),
        };
        let version: Json = client
            .transport
            .request(reqwest::Method::GET, "/_api/version", None)
            .await?;
        debug!(server = %version["server"], version = %version["version"], "store connected");
        Ok(client)
    }

    /// The system database handle (registry collection lives there).
    #[must_use]
    pub fn sys_db(&self) -> Database {
        self.db(&self.sys_database)
    }

    /// A database handle without an existence check.
    #[must_use]
    pub fn db(&self, name: &str) -> Database {
        Database::new(self.transport.clone(), name)
    }

    pub async fn has_database(&self, name: &str) -> StoreResult<bool> {
        let response: Json = self
            .transport
            .request(reqwest::Method::GET, "/_api/database", None)
            .await?;
        let names = response["result"].as_array().cloned().unwrap_or_default();
        Ok(names.iter().any(|n| n.as_str() == Some(name)))
    }

    pub async fn create_database(&self, name: &str) -> StoreResult<Database> {
        let _: Json = self
            .transport
            .request(
                reqwest::Method::POST,
                "/_api/database",
                Some(&json!({ "name": name })),
            )
            .await?;
        Ok(self.db(name))
    }

    /// Resolves a database according to the policy.
    pub async fn get_or_create_database(
        &self,
        name: &str,
        policy: CreatePolicy,
    ) -> StoreResult<Option<Database>> {
        if self.has_database(name).await? {
            return Ok(Some(self.db(name)));
        }
        match policy {
            CreatePolicy::Create => Ok(Some(self.create_database(name).await?)),
            CreatePolicy::RaiseError => Err(StoreError::NotFound(format!(
                "database {name} does not exist"
            ))),
            CreatePolicy::ReturnNone => Ok(None),
        }
    }

    /// Drops a projection database. The system database is never dropped.
    pub async fn delete_database(&self, name: &str) -> StoreResult<bool> {
        if name == self.sys_database {
            return Ok(false);
        }
        let path = format!("/_api/database/{name}");
        match self
            .transport
            .request::<Json>(reqwest::Method::DELETE, &path, None)
            .await
        {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}
