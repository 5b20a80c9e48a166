use crate::{ProviderError, TextGenerator};

/// Generator that never produces text; callers fall back to templates.
#[derive(Debug, Default)]
pub struct NoopProvider;

#[async_trait::async_trait]
impl TextGenerator for NoopProvider {
    async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::NotImplemented)
    }
}
