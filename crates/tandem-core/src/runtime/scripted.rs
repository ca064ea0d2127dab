//! In-memory runtime that replays a queue of canned responses. Test-facing,
//! but shipped in the crate so integration tests and downstream users can
//! drive the engine without a provider.

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AgentRuntime, PromptPart, PromptResponse, RuntimeError, Session};

/// A recorded `prompt` call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub session_id: String,
    pub parts: Vec<PromptPart>,
    pub model: Option<String>,
}

#[derive(Default)]
pub struct ScriptedRuntime {
    responses: Mutex<VecDeque<String>>,
    sessions: Mutex<HashSet<String>>,
    calls: Mutex<Vec<RecordedCall>>,
    counter: AtomicU32,
}

impl ScriptedRuntime {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().unwrap().push_back(response.into());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentRuntime for ScriptedRuntime {
    async fn create_session(&self, _workspace: &Path, _name: &str) -> Result<Session, RuntimeError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("scripted-{}", n);
        self.sessions.lock().unwrap().insert(id.clone());
        Ok(Session::new(id))
    }

    async fn resolve_session(
        &self,
        _workspace: &Path,
        id: &str,
    ) -> Result<Option<Session>, RuntimeError> {
        let known = self.sessions.lock().unwrap().contains(id);
        Ok(known.then(|| Session::new(id)))
    }

    async fn prompt(
        &self,
        session: &Session,
        parts: &[PromptPart],
        model: Option<&str>,
    ) -> Result<PromptResponse, RuntimeError> {
        if !self.sessions.lock().unwrap().contains(&session.id) {
            return Err(RuntimeError::SessionNotFound(session.id.clone()));
        }
        self.calls.lock().unwrap().push(RecordedCall {
            session_id: session.id.clone(),
            parts: parts.to_vec(),
            model: model.map(str::to_string),
        });
        let next = self.responses.lock().unwrap().pop_front().ok_or_else(|| {
            RuntimeError::Provider("script exhausted: no response queued".to_string())
        })?;
        Ok(PromptResponse {
            parts: vec![PromptPart::text(next)],
        })
    }
}
