use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::snowflake::{SnowflakeConfig, DEFAULT_BEGIN_SECOND};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub geo: GeoConfig,
    pub snowflake: SnowflakeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    /// Path to an ip2region xdb file
    /// If None, region lookups return empty regions
    pub ip2region_db_path: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_vars<F>(var: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = var("SERVER_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = var("SERVER_PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse::<u16>()
            .context("SERVER_PORT must be a valid port number")?;

        let ip2region_db_path = var("IP2REGION_DB_PATH").filter(|p| !p.trim().is_empty());

        let begin_second = var("SNOWFLAKE_BEGIN_SECOND")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("SNOWFLAKE_BEGIN_SECOND must be a unix timestamp in seconds")?
            .unwrap_or(DEFAULT_BEGIN_SECOND);

        let data_center_id = var("SNOWFLAKE_DATA_CENTER_ID")
            .unwrap_or_else(|| "0".to_string())
            .parse::<u8>()
            .context("SNOWFLAKE_DATA_CENTER_ID must be an integer between 0 and 31")?;

        let worker_id = var("SNOWFLAKE_WORKER_ID")
            .unwrap_or_else(|| "0".to_string())
            .parse::<u8>()
            .context("SNOWFLAKE_WORKER_ID must be an integer between 0 and 31")?;

        if data_center_id > 31 || worker_id > 31 {
            tracing::warn!(
                data_center_id,
                worker_id,
                "snowflake ids above 31 will be rejected by the generator"
            );
        }

        Ok(Config {
            server: ServerConfig { host, port },
            geo: GeoConfig { ip2region_db_path },
            snowflake: SnowflakeConfig {
                begin_second,
                data_center_id,
                worker_id,
            },
        })
    }
}
