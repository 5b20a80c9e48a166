use providers::{ProviderError, ScanBackend};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

pub const NO_REPLY: &str = "AI tidak merespon.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub sender: Sender,
    pub text: String,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("chat request failed: {0}")]
    Backend(#[from] ProviderError),
}

/// Conversation about one analysis; `context` is the report text sent along
/// with every question.
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    context: String,
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            messages: Vec::new(),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Sends one question. The question is recorded even when the request
    /// fails; the reply is recorded only on success.
    pub async fn send(
        &mut self,
        backend: &dyn ScanBackend,
        input: &str,
    ) -> Result<&ChatMessage, ChatError> {
        let text = input.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        self.messages.push(ChatMessage {
            sender: Sender::User,
            text: text.to_string(),
        });

        let reply = backend.chat(text, &self.context).await.map_err(|e| {
            warn!(error = %e, "chat request failed");
            ChatError::from(e)
        })?;
        self.messages.push(ChatMessage {
            sender: Sender::Ai,
            text: reply.unwrap_or_else(|| NO_REPLY.to_string()),
        });
        Ok(&self.messages[self.messages.len() - 1])
    }
}
