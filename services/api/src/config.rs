use std::net::SocketAddr;

use anyhow::{Context, Result};

use crate::db::DbConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub log_json: bool,
    pub dev_mode: bool,
    pub database: DbConfig,
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("SLOTQ_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("invalid SLOTQ_LISTEN_ADDR")?;

        let log_level = std::env::var("SLOTQ_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let log_json = env_bool("SLOTQ_LOG_JSON", true);
        let dev_mode = env_bool("SLOTQ_DEV_MODE", false);

        let database = DbConfig::from_env()?;

        Ok(Self {
            listen_addr,
            log_level,
            log_json,
            dev_mode,
            database,
        })
    }
}
