//! Agent runtime abstraction.
//!
//! The engine never talks to a provider directly; it goes through
//! [`AgentRuntime`], which owns session lifecycle and prompting. Two
//! implementations ship with the crate: [`HttpAgentRuntime`] for real
//! provider calls and [`ScriptedRuntime`] for tests.

mod http;
mod scripted;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::{HttpAgentRuntime, HttpRuntimeConfig};
pub use scripted::{RecordedCall, ScriptedRuntime};

/// Handle to a persistent agent session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// One part of a prompt turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptPart {
    Text { text: String },
}

impl PromptPart {
    pub fn text(text: impl Into<String>) -> Self {
        PromptPart::Text { text: text.into() }
    }
}

/// Response to a prompt turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptResponse {
    pub parts: Vec<PromptPart>,
}

impl PromptResponse {
    /// The last text part, or empty when the response had none.
    pub fn last_text(&self) -> &str {
        self.parts
            .iter()
            .rev()
            .find_map(|p| match p {
                PromptPart::Text { text } => Some(text.as_str()),
            })
            .unwrap_or("")
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Provider-side session management and prompting.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Create a named session scoped to a workspace.
    async fn create_session(&self, workspace: &Path, name: &str) -> Result<Session, RuntimeError>;

    /// Re-open an existing session by id, if the runtime still knows it.
    async fn resolve_session(
        &self,
        workspace: &Path,
        id: &str,
    ) -> Result<Option<Session>, RuntimeError>;

    /// Send one prompt turn on a session and return the response.
    async fn prompt(
        &self,
        session: &Session,
        parts: &[PromptPart],
        model: Option<&str>,
    ) -> Result<PromptResponse, RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_text_picks_final_part() {
        let response = PromptResponse {
            parts: vec![PromptPart::text("first"), PromptPart::text("second")],
        };
        assert_eq!(response.last_text(), "second");
        assert_eq!(PromptResponse::default().last_text(), "");
    }

    #[test]
    fn test_prompt_part_wire_shape() {
        let part = PromptPart::text("hello");
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value, serde_json::json!({ "type": "text", "text": "hello" }));
    }
}
