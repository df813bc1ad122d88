use anyhow::Result;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use crate::constants::{
    DEFAULT_MATCHMAKER_URL, DEFAULT_MATCH_POLL_INTERVAL_SECS, DEFAULT_ONLINE_COUNT_INTERVAL_SECS,
    DEFAULT_STUB_PORT,
};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub identity_api_key: Option<String>,
    pub matchmaker_url: String,
    pub match_poll_interval: Duration,
    pub online_count_interval: Duration,
    pub anon_identity_path: Option<PathBuf>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            identity_api_key: env::var("IDENTITY_API_KEY").ok().filter(|k| !k.is_empty()),
            matchmaker_url: env::var("MATCHMAKER_URL")
                .unwrap_or_else(|_| DEFAULT_MATCHMAKER_URL.to_string()),
            match_poll_interval: Duration::from_secs(secs_or(
                "MATCH_POLL_INTERVAL_SECS",
                DEFAULT_MATCH_POLL_INTERVAL_SECS,
            )),
            online_count_interval: Duration::from_secs(secs_or(
                "ONLINE_COUNT_INTERVAL_SECS",
                DEFAULT_ONLINE_COUNT_INTERVAL_SECS,
            )),
            anon_identity_path: env::var("ANON_IDENTITY_PATH").ok().map(PathBuf::from),
            port: env::var("PORT")
                .unwrap_or_else(|_| DEFAULT_STUB_PORT.to_string())
                .parse()
                .unwrap_or(DEFAULT_STUB_PORT),
        })
    }

    /// Stub matchmaker port, without requiring the store settings.
    pub fn stub_port_from_env() -> u16 {
        dotenvy::dotenv().ok();
        env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_STUB_PORT)
    }
}

fn secs_or(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(default)
}
