//! Inventory endpoint configuration (`INVENTORY_GRPC_*`).

use topograph_util::env::{env_string, env_string_or};

#[derive(Debug, Clone)]
pub struct InventoryConfig {
    pub host: String,
    pub port: Option<u16>,
}

impl InventoryConfig {
    #[must_use]
    pub fn from_env() -> Self {
        InventoryConfig {
            host: env_string_or("INVENTORY_GRPC_HOST", "inventory"),
            port: env_string("INVENTORY_GRPC_PORT").and_then(|p| p.parse().ok()),
        }
    }

    #[must_use]
    pub fn url(&self) -> String {
        match self.port {
            Some(port) => format!("http://{}:{}", self.host, port),
            None => format!("http://{}", self.host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_includes_scheme_and_port() {
        let config = InventoryConfig {
            host: "inventory".into(),
            port: Some(50051),
        };
        assert_eq!(config.url(), "http://inventory:50051");
    }
}
