use crate::severity::{SeverityError, SeverityThresholds};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Legacy variable holding the backend base URL.
pub const ENV_BACKEND_URL: &str = "NEXT_PUBLIC_BASEURL_BE";
/// Variables holding the generative text API key, in lookup order.
pub const ENV_API_KEYS: [&str; 2] = ["GEMINI_API_KEY", "NEXT_PUBLIC_GEMINI_API_KEY"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub severity: SeverityConfig,
    pub description: DescriptionConfig,
    pub save: SaveConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeverityConfig {
    pub thresholds: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionConfig {
    pub provider: String,
    pub model: String,
    pub api_base: String,
    pub timeout_secs: u64,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveConfig {
    pub default_model_version: String,
    #[serde(default)]
    pub rollback_orphaned_patient: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
}

impl AppConfig {
    pub fn base_url(&self) -> anyhow::Result<&str> {
        let url = self.backend.base_url.trim();
        if url.is_empty() {
            anyhow::bail!(
                "backend base URL is not configured; set backend.base_url or {ENV_BACKEND_URL}"
            );
        }
        Ok(url)
    }

    pub fn thresholds(&self) -> Result<SeverityThresholds, SeverityError> {
        SeverityThresholds::new(&self.severity.thresholds)
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    load_with_env(path, &std::env::vars().collect())
}

/// Loads config against an explicit environment instead of the process one.
pub fn load_with_env(
    path: Option<&str>,
    env: &HashMap<String, String>,
) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder()
        .set_default("backend.base_url", "")?
        .set_default("backend.timeout_secs", 60_i64)?
        .set_default("severity.thresholds", vec![20.0, 40.0, 60.0, 80.0])?
        .set_default("description.provider", "gemini")?
        .set_default("description.model", providers::gemini::DEFAULT_MODEL)?
        .set_default("description.api_base", providers::gemini::DEFAULT_API_BASE)?
        .set_default("description.timeout_secs", 60_i64)?
        .set_default("save.default_model_version", "YOLOv8 KidneyStone v1")?
        .set_default("save.rollback_orphaned_patient", false)?
        .set_default("server.bind", "127.0.0.1:3000")?;
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("KIDNEYSCAN")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("severity.thresholds")
            .source(Some(env.clone())),
    );

    let non_empty = |key: &str| env.get(key).filter(|v| !v.trim().is_empty()).cloned();
    settings = settings.set_override_option("backend.base_url", non_empty(ENV_BACKEND_URL))?;
    let api_key = ENV_API_KEYS.iter().find_map(|key| non_empty(*key));
    settings = settings.set_override_option("description.api_key", api_key)?;

    let cfg: AppConfig = settings
        .build()?
        .try_deserialize()
        .context("invalid configuration")?;
    cfg.thresholds().context("invalid severity thresholds")?;
    Ok(cfg)
}
