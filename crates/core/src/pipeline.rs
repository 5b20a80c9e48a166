use crate::config::AppConfig;
use crate::description::DescriptionResponse;
use crate::models::{DetectionResult, NewPatientForm, SavedScan};
use crate::resolve::ImageUrlResolver;
use crate::session::{SessionSettings, UploadSession};
use anyhow::Context;
use providers::gemini::{GeminiConfig, GeminiProvider};
use providers::noop::NoopProvider;
use providers::{HttpBackend, HttpBackendConfig, ProviderRegistry, ScanBackend};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub enum SaveTarget {
    None,
    Existing(String),
    New(NewPatientForm),
}

#[derive(Debug, Serialize)]
pub struct AnalysisSummary {
    pub result: DetectionResult,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<DescriptionResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved: Option<SavedScan>,
}

pub fn build_backend(config: &AppConfig) -> anyhow::Result<Arc<dyn ScanBackend>> {
    let base_url = config.base_url()?;
    let timeout = (config.backend.timeout_secs > 0)
        .then(|| Duration::from_secs(config.backend.timeout_secs));
    let backend = HttpBackend::new(HttpBackendConfig {
        base_url: base_url.to_string(),
        timeout,
    })
    .context("building backend client")?;
    Ok(Arc::new(backend))
}

pub fn build_resolver(config: &AppConfig) -> anyhow::Result<ImageUrlResolver> {
    Ok(ImageUrlResolver::new(config.base_url()?))
}

pub fn build_registry(config: &AppConfig) -> ProviderRegistry {
    let mut reg = ProviderRegistry::new().with_generator("noop", Arc::new(NoopProvider));

    if let Some(key) = config
        .description
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
    {
        let timeout = (config.description.timeout_secs > 0)
            .then(|| Duration::from_secs(config.description.timeout_secs));
        match GeminiProvider::new(GeminiConfig {
            api_key: key.to_string(),
            api_base: config.description.api_base.clone(),
            model: config.description.model.clone(),
            timeout,
        }) {
            Ok(provider) => reg = reg.with_generator("gemini", Arc::new(provider)),
            Err(e) => warn!(
                error = %e,
                "gemini client unavailable; descriptions will use the fallback template"
            ),
        }
    } else if config.description.provider == "gemini" {
        warn!("no generative text API key configured; descriptions will use the fallback template");
    }

    reg.set_preferred_generator(&config.description.provider)
}

pub fn session_settings(config: &AppConfig) -> anyhow::Result<SessionSettings> {
    Ok(SessionSettings {
        thresholds: config.thresholds().context("severity thresholds")?,
        default_model_version: config.save.default_model_version.clone(),
        rollback_orphaned_patient: config.save.rollback_orphaned_patient,
    })
}

pub fn new_session(config: &AppConfig) -> anyhow::Result<UploadSession> {
    Ok(UploadSession::new(
        build_backend(config)?,
        build_resolver(config)?,
        session_settings(config)?,
    ))
}

/// Analyse one image from disk, optionally describe it, optionally save it.
pub async fn run_analysis(
    config: &AppConfig,
    image: &Path,
    describe: bool,
    target: SaveTarget,
) -> anyhow::Result<AnalysisSummary> {
    let mut session = new_session(config)?;
    session
        .load_file(image)
        .await
        .with_context(|| format!("loading {}", image.display()))?;
    session.submit_for_analysis().await?;

    let description = if describe {
        let registry = build_registry(config);
        session.describe(&registry, None).await
    } else {
        None
    };

    let saved = match target {
        SaveTarget::None => None,
        SaveTarget::Existing(patient_id) => Some(session.persist_result(&patient_id).await?),
        SaveTarget::New(form) => Some(session.create_patient_and_persist(&form).await?),
    };
    if let Some(s) = &saved {
        info!(patient_id = %s.patient_id, "scan saved");
    }

    let duration_ms = session
        .analysis_duration()
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let result = session
        .result()
        .cloned()
        .context("analysis finished without a result")?;
    Ok(AnalysisSummary {
        result,
        duration_ms,
        description,
        saved,
    })
}
