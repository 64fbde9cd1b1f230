use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment};
use serde::Deserialize;

use crate::normalize::{GENERATE_CAP_BYTES, RECOMMEND_CAP_BYTES};

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "o4-mini";
pub const DEFAULT_SITEMAP_URL: &str = "https://www.beebyclarkmeyler.com/sitemap.xml";

/// Runtime settings, read from `SCHEMA_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_recommend_cap")]
    pub recommend_cap_bytes: usize,
    /// `0` disables truncation for generation.
    #[serde(default = "default_generate_cap")]
    pub generate_cap_bytes: usize,
    #[serde(default)]
    pub primary_degraded: bool,
    #[serde(default = "default_sitemap_url")]
    pub sitemap_url: String,
    #[serde(default = "default_sitemap_ttl_secs")]
    pub sitemap_ttl_secs: u64,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_recommend_cap() -> usize {
    RECOMMEND_CAP_BYTES
}

fn default_generate_cap() -> usize {
    GENERATE_CAP_BYTES
}

fn default_sitemap_url() -> String {
    DEFAULT_SITEMAP_URL.to_string()
}

fn default_sitemap_ttl_secs() -> u64 {
    300
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            api_key: None,
            api_base: default_api_base(),
            model: default_model(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            recommend_cap_bytes: default_recommend_cap(),
            generate_cap_bytes: default_generate_cap(),
            primary_degraded: false,
            sitemap_url: default_sitemap_url(),
            sitemap_ttl_secs: default_sitemap_ttl_secs(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let mut settings: Settings = Config::builder()
            .add_source(Environment::with_prefix("SCHEMA").try_parsing(true))
            .build()
            .context("Failed to read SCHEMA_* environment")?
            .try_deserialize()
            .context("Invalid SCHEMA_* settings")?;

        if settings.api_key.is_none() {
            settings.api_key = std::env::var("OPENAI_API_KEY").ok();
        }
        Ok(settings)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn sitemap_ttl(&self) -> Duration {
        Duration::from_secs(self.sitemap_ttl_secs)
    }

    pub fn generate_cap(&self) -> Option<usize> {
        (self.generate_cap_bytes > 0).then_some(self.generate_cap_bytes)
    }
}
