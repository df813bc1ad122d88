use anyhow::Result;
use std::env;
use std::sync::Arc;
use dotenvy::dotenv;

use super::{DataStore, MemoryStore, RestStore};

/// Where the shared store lives.
///
/// `DATABASE_URL=memory` selects an in-process store, which is only useful
/// for single-process demos.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: String,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
        })
    }

    pub fn is_memory(&self) -> bool {
        self.database_url == "memory"
    }
}

pub fn connect_store(config: &StoreConfig) -> Result<Arc<dyn DataStore>> {
    if config.is_memory() {
        tracing::warn!("Using an in-process store; data is not shared with other clients");
        return Ok(Arc::new(MemoryStore::new()));
    }
    if !config.database_url.starts_with("http://") && !config.database_url.starts_with("https://") {
        anyhow::bail!("DATABASE_URL must be an http(s) URL or 'memory'");
    }
    Ok(Arc::new(RestStore::new(config.database_url.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_scheme() {
        let config = StoreConfig {
            database_url: "postgres://localhost/chat".to_string(),
        };
        assert!(connect_store(&config).is_err());
    }

    #[test]
    fn test_memory_store_selection() {
        let config = StoreConfig {
            database_url: "memory".to_string(),
        };
        assert!(config.is_memory());
        assert!(connect_store(&config).is_ok());
    }
}
