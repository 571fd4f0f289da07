//! Updater configuration: the Kafka connection (`KAFKA_*`), the optional
//! Keycloak client credentials for SASL/OAUTHBEARER
//! (`KAFKA_KEYCLOAK_*` + `KEYCLOAK_*`), and the supervisor poll period.

use topograph_util::env::{env_parse_or, env_string, env_string_or};

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub group_id: String,
    pub auto_offset_reset: String,
    pub topic: String,
    /// Set when the broker requires SASL/OAUTHBEARER.
    pub keycloak: Option<KeycloakConfig>,
}

impl KafkaConfig {
    #[must_use]
    pub fn from_env() -> Self {
        KafkaConfig {
            bootstrap_servers: env_string_or("KAFKA_URL", "kafka:9092"),
            group_id: env_string_or("KAFKA_GROUP_ID", "Graph"),
            auto_offset_reset: env_string_or("KAFKA_CONSUMER_OFFSET", "latest"),
            topic: env_string_or("KAFKA_INVENTORY_CHANGES_TOPIC", "inventory.changes"),
            keycloak: KeycloakConfig::from_env(),
        }
    }

    /// Consumer group for one projection: the shared group id suffixed with
    /// the projection database, isolating offsets per projection.
    #[must_use]
    pub fn group_for(&self, database: &str) -> String {
        format!("{}_{}", self.group_id, database)
    }
}

#[derive(Debug, Clone)]
pub struct KeycloakConfig {
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scopes: String,
    pub token_url: String,
}

impl KeycloakConfig {
    /// Present only when a client secret is configured.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let client_secret = env_string("KAFKA_KEYCLOAK_CLIENT_SECRET")?;
        let protocol = env_string_or("KEYCLOAK_PROTOCOL", "http");
        let host = env_string_or("KEYCLOAK_HOST", "keycloak");
        let port = env_string("KEYCLOAK_PORT");
        let realm = env_string_or("KEYCLOAK_REALM", "master");
        let base = match port {
            Some(port) => format!("{protocol}://{host}:{port}"),
            None => format!("{protocol}://{host}"),
        };
        Some(KeycloakConfig {
            client_id: env_string_or("KAFKA_KEYCLOAK_CLIENT_ID", "kafka"),
            client_secret: Some(client_secret),
            scopes: env_string_or("KAFKA_KEYCLOAK_SCOPES", "profile"),
            token_url: format!("{base}/realms/{realm}/protocol/openid-connect/token"),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub poll_period_secs: u64,
}

impl SupervisorConfig {
    #[must_use]
    pub fn from_env() -> Self {
        SupervisorConfig {
            poll_period_secs: env_parse_or("UPDATER_POLL_PERIOD_SECS", 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_suffix_isolates_projections() {
        let config = KafkaConfig {
            bootstrap_servers: "kafka:9092".into(),
            group_id: "Graph".into(),
            auto_offset_reset: "latest".into(),
            topic: "inventory.changes".into(),
            keycloak: None,
        };
        assert_eq!(config.group_for("tmoId_42588"), "Graph_tmoId_42588");
    }
}
