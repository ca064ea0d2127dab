//! HTTP-backed agent runtime against an Anthropic-compatible Messages API.
//!
//! Sessions are plain JSON files under `<workspace>/.tandem/sessions/`;
//! each prompt turn replays the session's message history so the provider
//! sees the full conversation. The runtime keeps an in-memory registry of
//! session id → workspace so `prompt` can find the history file without
//! threading the workspace through every call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::fs;

use crate::ledger::sanitize_id;
use super::{AgentRuntime, PromptPart, PromptResponse, RuntimeError, Session};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 8192;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct HttpRuntimeConfig {
    pub base_url: String,
    pub api_key: String,
    pub default_model: String,
    pub max_tokens: u32,
}

impl HttpRuntimeConfig {
    /// Read configuration from the environment.
    ///
    /// `ANTHROPIC_AUTH_TOKEN` or `ANTHROPIC_API_KEY` is required;
    /// `ANTHROPIC_BASE_URL` and `TANDEM_MODEL` are optional overrides.
    pub fn from_env() -> Result<Self, RuntimeError> {
        let api_key = std::env::var("ANTHROPIC_AUTH_TOKEN")
            .or_else(|_| std::env::var("ANTHROPIC_API_KEY"))
            .map_err(|_| {
                RuntimeError::Provider(
                    "missing ANTHROPIC_AUTH_TOKEN or ANTHROPIC_API_KEY".to_string(),
                )
            })?;
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let default_model =
            std::env::var("TANDEM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Ok(Self {
            base_url,
            api_key,
            default_model,
            max_tokens: DEFAULT_MAX_TOKENS,
        })
    }
}

/// Persisted session history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionState {
    id: String,
    name: String,
    messages: Vec<ChatMessage>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

pub struct HttpAgentRuntime {
    config: HttpRuntimeConfig,
    client: reqwest::Client,
    /// Session id → workspace the session was created in.
    workspaces: Mutex<HashMap<String, PathBuf>>,
}

impl HttpAgentRuntime {
    pub fn new(config: HttpRuntimeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            client,
            workspaces: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_env() -> Result<Self, RuntimeError> {
        Ok(Self::new(HttpRuntimeConfig::from_env()?))
    }

    /// Forget a session's workspace mapping. The history file stays on disk.
    pub fn close_session(&self, id: &str) {
        self.workspaces.lock().unwrap().remove(id);
    }

    fn sessions_dir(workspace: &Path) -> PathBuf {
        workspace.join(".tandem").join("sessions")
    }

    fn session_path(workspace: &Path, id: &str) -> PathBuf {
        Self::sessions_dir(workspace).join(format!("{}.json", sanitize_id(id)))
    }

    fn workspace_for(&self, id: &str) -> Result<PathBuf, RuntimeError> {
        self.workspaces
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::SessionNotFound(id.to_string()))
    }

    async fn load_state(path: &Path, id: &str) -> Result<SessionState, RuntimeError> {
        let bytes = fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RuntimeError::SessionNotFound(id.to_string())
            } else {
                RuntimeError::Io(e)
            }
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RuntimeError::Provider(format!("corrupt session '{}': {}", id, e)))
    }

    async fn save_state(path: &Path, state: &SessionState) -> Result<(), RuntimeError> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| RuntimeError::Provider(format!("unserializable session: {}", e)))?;
        fs::write(path, json).await?;
        Ok(())
    }

    /// Call the Messages API with the session's full history.
    async fn complete(
        &self,
        system: Option<&str>,
        messages: &[ChatMessage],
        model: &str,
    ) -> Result<String, RuntimeError> {
        let mut body = json!({
            "model": model,
            "max_tokens": self.config.max_tokens,
            "messages": messages,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }

        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(RuntimeError::Provider(format!(
                "messages API returned {}: {}",
                status, text
            )));
        }

        let parsed: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| RuntimeError::Provider(format!("unparseable API response: {}", e)))?;
        let combined = parsed["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(combined)
    }
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    async fn create_session(&self, workspace: &Path, name: &str) -> Result<Session, RuntimeError> {
        let id = format!("sess-{}", uuid::Uuid::new_v4().simple());
        let now = Utc::now();
        let state = SessionState {
            id: id.clone(),
            name: name.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        fs::create_dir_all(Self::sessions_dir(workspace)).await?;
        Self::save_state(&Self::session_path(workspace, &id), &state).await?;
        self.workspaces
            .lock()
            .unwrap()
            .insert(id.clone(), workspace.to_path_buf());
        tracing::debug!(session = %id, name, "created session");
        Ok(Session::new(id))
    }

    async fn resolve_session(
        &self,
        workspace: &Path,
        id: &str,
    ) -> Result<Option<Session>, RuntimeError> {
        let path = Self::session_path(workspace, id);
        match Self::load_state(&path, id).await {
            Ok(state) => {
                self.workspaces
                    .lock()
                    .unwrap()
                    .insert(state.id.clone(), workspace.to_path_buf());
                Ok(Some(Session::new(state.id)))
            }
            Err(RuntimeError::SessionNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn prompt(
        &self,
        session: &Session,
        parts: &[PromptPart],
        model: Option<&str>,
    ) -> Result<PromptResponse, RuntimeError> {
        let workspace = self.workspace_for(&session.id)?;
        let path = Self::session_path(&workspace, &session.id);
        let mut state = Self::load_state(&path, &session.id).await?;

        let texts: Vec<&str> = parts
            .iter()
            .map(|p| match p {
                PromptPart::Text { text } => text.as_str(),
            })
            .collect();
        // With two or more parts the first is treated as the system prompt.
        let (system, user_parts) = if texts.len() >= 2 {
            (Some(texts[0]), &texts[1..])
        } else {
            (None, &texts[..])
        };
        state.messages.push(ChatMessage {
            role: "user".to_string(),
            content: user_parts.join("\n\n"),
        });

        let model = model.unwrap_or(&self.config.default_model);
        let reply = self.complete(system, &state.messages, model).await?;

        state.messages.push(ChatMessage {
            role: "assistant".to_string(),
            content: reply.clone(),
        });
        state.updated_at = Utc::now();
        Self::save_state(&path, &state).await?;

        Ok(PromptResponse {
            parts: vec![PromptPart::text(reply)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> HttpAgentRuntime {
        HttpAgentRuntime::new(HttpRuntimeConfig {
            base_url: "http://localhost:0".to_string(),
            api_key: "test-key".to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            max_tokens: 64,
        })
    }

    #[tokio::test]
    async fn test_create_and_resolve_session() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime();
        let session = runtime.create_session(dir.path(), "wf:r1:worker").await.unwrap();
        assert!(session.id.starts_with("sess-"));

        let resolved = runtime
            .resolve_session(dir.path(), &session.id)
            .await
            .unwrap();
        assert_eq!(resolved, Some(session));
    }

    #[tokio::test]
    async fn test_resolve_unknown_session_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime();
        let resolved = runtime.resolve_session(dir.path(), "ghost").await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_prompt_on_closed_session_fails() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime();
        let session = runtime.create_session(dir.path(), "n").await.unwrap();
        runtime.close_session(&session.id);
        let err = runtime
            .prompt(&session, &[PromptPart::text("hi")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::SessionNotFound(_)));
    }
}
