//! Store connection configuration (`ARANGO_*`).

use topograph_util::env::{env_parse_or, env_string, env_string_or};

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub protocol: String,
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: String,
    /// Request timeout for ordinary calls, seconds. Long graph queries pass
    /// their own deadline through `QueryOptions`.
    pub request_timeout_secs: u64,
}

impl StoreConfig {
    #[must_use]
    pub fn from_env() -> Self {
        StoreConfig {
            protocol: env_string_or("ARANGO_PROTOCOL", "http"),
            host: env_string_or("ARANGO_HOST", "arangodb"),
            port: env_string("ARANGO_PORT").and_then(|p| p.parse().ok()),
            username: env_string_or("ARANGO_USERNAME", "graph"),
            password: env_string_or("ARANGO_PASSWORD", ""),
            request_timeout_secs: env_parse_or("ARANGO_REQUEST_TIMEOUT_SECS", 600),
        }
    }

    #[must_use]
    pub fn url(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.protocol, self.host, port),
            None => format!("{}://{}", self.protocol, self.host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_with_and_without_port() {
        let mut config = StoreConfig {
            protocol: "http".into(),
            host: "db".into(),
            port: Some(8529),
            username: "u".into(),
            password: "p".into(),
            request_timeout_secs: 600,
        };
        assert_eq!(config.url(), "http://db:8529");
        config.port = None;
        assert_eq!(config.url(), "http://db");
    }
}
