//! Provider abstractions for the scan backend and text generation.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod backend;
pub mod gemini;
pub mod noop;

pub use backend::{
    HttpBackend, HttpBackendConfig, ImageUpload, NewPatient, ScanBackend, ScanSavePayload,
};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not implemented")]
    NotImplemented,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("missing field in response: {0}")]
    MissingField(&'static str),
    #[error("content blocked: {0}")]
    Blocked(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl ProviderError {
    /// HTTP status of the upstream response, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;
}

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    generators: HashMap<String, Arc<dyn TextGenerator>>,
    pub preferred_generator: Option<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generator(mut self, name: &str, provider: Arc<dyn TextGenerator>) -> Self {
        self.generators.insert(name.to_string(), provider);
        self
    }

    pub fn set_preferred_generator(mut self, name: &str) -> Self {
        self.preferred_generator = Some(name.to_string());
        self
    }

    pub fn generator(&self, name: Option<&str>) -> Result<Arc<dyn TextGenerator>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred_generator.clone())
            .ok_or_else(|| {
                ProviderError::UnknownProvider("no text generator configured".into())
            })?;
        self.generators
            .get(&key)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noop::NoopProvider;

    #[test]
    fn registry_falls_back_to_preferred_generator() {
        let reg = ProviderRegistry::new()
            .with_generator("noop", Arc::new(NoopProvider))
            .set_preferred_generator("noop");
        assert!(reg.generator(None).is_ok());
        assert!(reg.generator(Some("noop")).is_ok());
    }

    #[test]
    fn registry_reports_missing_generator_by_name() {
        let reg = ProviderRegistry::new().set_preferred_generator("gemini");
        match reg.generator(None) {
            Err(ProviderError::UnknownProvider(name)) => assert_eq!(name, "gemini"),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}
