use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const API_KEY_ENV: &str = "CONGRESS_API_KEY";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db_path: String,
    pub ingest: IngestConfig,
    pub cache: CacheConfig,
    pub congress_api: CongressApiConfig,
    pub chat: ChatConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: "billsearch.db".to_string(),
            ingest: IngestConfig::default(),
            cache: CacheConfig::default(),
            congress_api: CongressApiConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub upload_prefix: String,
    pub processed_prefix: String,
    pub collection: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 400,
            upload_prefix: "bill_csv_uploads/".to_string(),
            processed_prefix: "processed_".to_string(),
            collection: "bills".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_hours: u64,
    pub collection: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            collection: "billCache".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn ttl_ms(&self) -> i64 {
        (self.ttl_hours as i64).saturating_mul(60 * 60 * 1000)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CongressApiConfig {
    pub base_url: String,
    pub api_key: String,
}

impl Default for CongressApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.congress.gov/v3".to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub model: String,
    pub max_history: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash-lite".to_string(),
            max_history: 10,
        }
    }
}

impl AppConfig {
    /// Load from `path` when it exists, otherwise start from defaults. The API
    /// key environment variable wins over the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = fs::read_to_string(path)?;
                let parsed: AppConfig = toml::from_str(&raw)
                    .with_context(|| format!("invalid config {}", path.display()))?;
                info!("loaded config from {}", path.display());
                parsed
            }
            Some(path) => {
                debug!("{} not found, using defaults", path.display());
                AppConfig::default()
            }
            None => AppConfig::default(),
        };

        if let Ok(key) = env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.congress_api.api_key = key.trim().to_string();
            }
        }

        Ok(config)
    }
}
