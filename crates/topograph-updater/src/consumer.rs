//! Kafka consumer for the change topic.
//!
//! One `StreamConsumer` per projection worker, with the consumer group
//! suffixed by the projection database so offsets are isolated. Commits are
//! manual, after the message has been fully applied. When the broker
//! requires SASL/OAUTHBEARER, tokens come from Keycloak client credentials
//! and refresh through the client context.

use rdkafka::client::OAuthToken;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::stream_consumer::StreamConsumer;
use rdkafka::consumer::{Consumer, ConsumerContext};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::ClientContext;
use tracing::debug;

use crate::config::{KafkaConfig, KeycloakConfig};
use crate::decode::{decode, ChangeMessage};
use crate::error::{UpdaterError, UpdaterResult};

/// Client context fetching OAUTHBEARER tokens from Keycloak.
pub struct KeycloakContext {
    keycloak: Option<KeycloakConfig>,
}

impl ClientContext for KeycloakContext {
    const ENABLE_REFRESH_OAUTH_TOKEN: bool = true;

    fn generate_oauth_token(
        &self,
        _oauthbearer_config: Option<&str>,
    ) -> Result<OAuthToken, Box<dyn std::error::Error>> {
        let Some(keycloak) = &self.keycloak else {
            return Err("oauth token requested without keycloak config".into());
        };
        #[derive(serde::Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: f64,
        }
        let response: TokenResponse = reqwest::blocking::Client::new()
            .post(&keycloak.token_url)
            .basic_auth(&keycloak.client_id, keycloak.client_secret.as_deref())
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", keycloak.scopes.as_str()),
            ])
            .send()?
            .error_for_status()?
            .json()?;
        // refresh slightly before expiry
        let lifetime_ms = (response.expires_in * 0.9 * 1000.0) as i64;
        Ok(OAuthToken {
            token: response.access_token,
            principal_name: keycloak.client_id.clone(),
            lifetime_ms: chrono::Utc::now().timestamp_millis() + lifetime_ms,
        })
    }
}

impl ConsumerContext for KeycloakContext {}

/// The change-topic consumer of one projection worker.
pub struct ChangeConsumer {
    consumer: StreamConsumer<KeycloakContext>,
}

impl ChangeConsumer {
    /// Builds and subscribes the consumer.
    pub fn subscribe(config: &KafkaConfig, database: &str) -> UpdaterResult<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", config.group_for(database))
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "30000");
        if config.keycloak.is_some() {
            client_config
                .set("security.protocol", "sasl_plaintext")
                .set("sasl.mechanisms", "OAUTHBEARER");
        }
        let context = KeycloakContext {
            keycloak: config.keycloak.clone(),
        };
        let consumer: StreamConsumer<KeycloakContext> =
            client_config.create_with_context(context)?;
        consumer.subscribe(&[config.topic.as_str()])?;
        debug!(topic = %config.topic, database, "change consumer subscribed");
        Ok(ChangeConsumer { consumer })
    }

    /// Receives the raw message so the caller controls the commit point.
    pub async fn recv(&self) -> UpdaterResult<BorrowedMessage<'_>> {
        Ok(self.consumer.recv().await?)
    }

    pub fn commit(&self, message: &BorrowedMessage<'_>) -> UpdaterResult<()> {
        self.consumer
            .commit_message(message, rdkafka::consumer::CommitMode::Async)?;
        Ok(())
    }

    pub fn unsubscribe(&self) {
        self.consumer.unsubscribe();
    }
}

/// Decodes a borrowed Kafka message into a change message.
pub fn decode_borrowed(message: &BorrowedMessage<'_>) -> UpdaterResult<ChangeMessage> {
    let key = message
        .key()
        .ok_or_else(|| UpdaterError::Malformed("message without key".into()))?;
    let key = std::str::from_utf8(key)
        .map_err(|e| UpdaterError::Malformed(format!("non-utf8 key: {e}")))?;
    let payload = message.payload().unwrap_or_default();
    decode(key, payload)
}
