//! CLI command implementations.

pub mod budget;
pub mod config;
pub mod ingest;
pub mod operator;
pub mod serve;
pub mod status;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::Path;

use crate::adapters::sqlite::initialize_database;
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

/// Load `path` when given, otherwise the layered project configuration.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => ConfigLoader::load().context("failed to load configuration"),
    }
}

/// Open the configured database and apply pending migrations.
pub async fn open_database(config: &Config) -> Result<SqlitePool> {
    initialize_database(&config.database)
        .await
        .with_context(|| format!("failed to open database {}", config.database.path))
}

/// Base URL of the running server's ingress.
pub fn ingress_url(config: &Config, explicit: Option<String>) -> String {
    explicit
        .unwrap_or_else(|| format!("http://{}", config.server.bind))
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingress_url_defaults_to_bind_address() {
        let config = Config::default();
        assert_eq!(ingress_url(&config, None), "http://127.0.0.1:8088");
        assert_eq!(
            ingress_url(&config, Some("http://driftloop.internal/".to_string())),
            "http://driftloop.internal"
        );
    }
}
