//! Ledger domain types — mirrors the persisted provenance file layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The provenance root for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    /// Run identifier
    pub id: String,

    /// Role → session bindings, in binding order
    #[serde(default)]
    pub agents: Vec<AgentBinding>,

    /// Time-ordered log of every call
    #[serde(default)]
    pub log: Vec<LogEntry>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunMeta {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agents: Vec::new(),
            log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Session id recorded for `role`, if any.
    pub fn session_for(&self, role: &str) -> Option<&str> {
        self.agents
            .iter()
            .find(|a| a.role == role)
            .map(|a| a.session_id.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentBinding {
    pub role: String,
    pub session_id: String,
}

/// One logged exchange. Append-only; entries are never rewritten except to
/// attach the parsed payload once decoding succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Unique within the run: `<epoch-ms>-<6-char-random>`
    pub entry_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    pub payload: Value,

    pub created_at: DateTime<Utc>,
}

/// Payload of a structured agent call. Logged before parsing, so `parsed`
/// is present only once decoding succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallPayload {
    pub attempt: u32,
    pub prompt: String,
    pub raw_response: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<Value>,
}

/// Entry id: epoch milliseconds plus a short random suffix.
pub fn new_entry_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(6).collect();
    format!("{}-{}", millis, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_shape() {
        let id = new_entry_id();
        let (millis, suffix) = id.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 6);
    }

    #[test]
    fn test_call_payload_serializes_camel_case() {
        let payload = CallPayload {
            attempt: 1,
            prompt: "p".into(),
            raw_response: "r".into(),
            parsed: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["rawResponse"], "r");
        assert!(value.get("parsed").is_none());
    }

    #[test]
    fn test_session_lookup() {
        let mut meta = RunMeta::new("r1");
        meta.agents.push(AgentBinding {
            role: "worker".into(),
            session_id: "s-1".into(),
        });
        assert_eq!(meta.session_for("worker"), Some("s-1"));
        assert_eq!(meta.session_for("verifier"), None);
    }
}
