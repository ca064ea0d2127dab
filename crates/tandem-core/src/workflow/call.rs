//! Structured-output calls.
//!
//! Every step call must come back as a JSON object. The agent is prompted,
//! the raw response is logged to the ledger first, then decoded through the
//! role's parser. On a decode failure the agent is re-prompted with the
//! decode error appended, up to [`MAX_JSON_ATTEMPTS`] attempts total. Every
//! attempt lands in the ledger whether or not it parses.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::ledger::{CallPayload, LedgerStore};
use crate::runtime::{AgentRuntime, PromptPart, Session};

/// Total attempts (first try included) before a call gives up.
pub const MAX_JSON_ATTEMPTS: u32 = 3;

/// Pull the JSON out of a response that wraps it in a Markdown fence.
///
/// A ```json fence is extracted wherever it sits, so surrounding
/// commentary does not force a retry. A bare fence is only honored when it
/// wraps the whole response; fence-free input is returned trimmed.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + "```json".len()..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}

/// Decodes a raw agent response into a JSON object.
///
/// The error string is fed back to the agent on retry, so it should name
/// what was wrong with the response.
pub trait OutputParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<Value, String>;
}

/// Accepts any JSON object.
pub struct JsonObjectParser;

impl OutputParser for JsonObjectParser {
    fn parse(&self, raw: &str) -> Result<Value, String> {
        let value: Value = serde_json::from_str(extract_json(raw))
            .map_err(|e| format!("not valid JSON: {}", e))?;
        if !value.is_object() {
            return Err("expected a JSON object".to_string());
        }
        Ok(value)
    }
}

/// Named parsers a workflow's roles can reference.
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn OutputParser>>,
}

impl ParserRegistry {
    /// Registry with the built-in `json` parser.
    pub fn new() -> Self {
        let mut registry = Self::default();
        registry.register("json", JsonObjectParser);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, parser: impl OutputParser + 'static) {
        self.parsers.insert(name.into(), Arc::new(parser));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn OutputParser>> {
        self.parsers.get(name).cloned()
    }
}

/// Result of a successful structured call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub raw: String,
    pub parsed: Value,
}

/// One structured call: prompt, log, parse, retry.
pub struct StructuredCall<'a> {
    pub runtime: &'a dyn AgentRuntime,
    pub ledger: &'a LedgerStore,
    pub run_id: &'a str,
    pub role: &'a str,
    pub model: Option<&'a str>,
    pub system_prompt: &'a str,
    pub session: &'a Session,
    pub parser: Arc<dyn OutputParser>,
}

impl StructuredCall<'_> {
    pub async fn invoke(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<CallOutcome, EngineError> {
        let mut last_error = String::new();
        for attempt in 1..=MAX_JSON_ATTEMPTS {
            let attempt_prompt = if attempt == 1 {
                prompt.to_string()
            } else {
                format!(
                    "{}\n\nYour previous response was invalid JSON ({}). \
                     Respond again with STRICT JSON only, without code fences or commentary.",
                    prompt, last_error
                )
            };
            let parts = [
                PromptPart::text(self.system_prompt),
                PromptPart::text(attempt_prompt.clone()),
            ];

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                result = self.runtime.prompt(self.session, &parts, self.model) => result?,
            };
            let raw = response.last_text().to_string();

            // Logged before parsing so a malformed response is still on record.
            let entry_id = self
                .ledger
                .append_call(
                    self.run_id,
                    self.role,
                    self.model,
                    &CallPayload {
                        attempt,
                        prompt: attempt_prompt,
                        raw_response: raw.clone(),
                        parsed: None,
                    },
                )
                .await?;

            match self.parser.parse(&raw) {
                Ok(parsed) => {
                    self.ledger
                        .attach_parsed(self.run_id, &entry_id, &parsed)
                        .await?;
                    return Ok(CallOutcome { raw, parsed });
                }
                Err(error) => {
                    tracing::warn!(
                        run = self.run_id,
                        role = self.role,
                        attempt,
                        error,
                        "structured output failed to parse"
                    );
                    last_error = error;
                }
            }
        }
        Err(EngineError::OutputExhausted {
            attempts: MAX_JSON_ATTEMPTS,
            message: format!("role '{}' never produced valid output: {}", self.role, last_error),
        })
    }
}
