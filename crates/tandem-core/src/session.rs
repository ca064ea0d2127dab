//! Session continuity.
//!
//! Each role in `sessions.roles` gets exactly one session per run, created
//! lazily on first use and recorded in the ledger. Later calls in the same
//! run resolve the recorded session so the role keeps its conversation
//! history across steps and rounds.

use std::path::Path;

use crate::error::EngineError;
use crate::ledger::LedgerStore;
use crate::runtime::{AgentRuntime, Session};
use crate::workflow::schema::WorkflowDefinition;

pub struct SessionKeeper<'a> {
    pub runtime: &'a dyn AgentRuntime,
    pub ledger: &'a LedgerStore,
    pub workspace: &'a Path,
    pub def: &'a WorkflowDefinition,
}

impl SessionKeeper<'_> {
    /// The session bound to `role` for this run, creating and binding one
    /// on first use.
    pub async fn session_for(&self, run_id: &str, role: &str) -> Result<Session, EngineError> {
        let meta = self.ledger.load(run_id).await?;
        if let Some(session_id) = meta.session_for(role) {
            return match self.runtime.resolve_session(self.workspace, session_id).await? {
                Some(session) => Ok(session),
                None => Err(EngineError::Session(format!(
                    "run '{}' references session '{}' for role '{}', but the runtime cannot resolve it",
                    run_id, session_id, role
                ))),
            };
        }

        let name = self.def.sessions.session_name(&self.def.id, run_id, role);
        let session = self.runtime.create_session(self.workspace, &name).await?;
        self.ledger.bind_agent(run_id, role, &session.id).await?;
        tracing::debug!(run = run_id, role, session = %session.id, "bound role session");
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ScriptedRuntime;

    fn minimal_def() -> WorkflowDefinition {
        WorkflowDefinition::from_json(
            r#"{
                "id": "wf",
                "sessions": { "roles": ["worker"] },
                "roles": { "worker": { "systemPrompt": "w", "parser": "json" } },
                "flow": { "round": {
                    "steps": [{ "key": "a", "role": "worker", "prompt": ["p"] }],
                    "defaultOutcome": { "outcome": "done", "reason": "r" }
                } }
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_session_created_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = ScriptedRuntime::new(Vec::<String>::new());
        let ledger = LedgerStore::new(dir.path());
        ledger.create("r1").await.unwrap();
        let def = minimal_def();
        let keeper = SessionKeeper {
            runtime: &runtime,
            ledger: &ledger,
            workspace: dir.path(),
            def: &def,
        };

        let first = keeper.session_for("r1", "worker").await.unwrap();
        let second = keeper.session_for("r1", "worker").await.unwrap();
        assert_eq!(first, second);

        let meta = ledger.load("r1").await.unwrap();
        assert_eq!(meta.agents.len(), 1);
        assert_eq!(meta.session_for("worker"), Some(first.id.as_str()));
    }

    #[tokio::test]
    async fn test_unresolvable_bound_session_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = ScriptedRuntime::new(Vec::<String>::new());
        let ledger = LedgerStore::new(dir.path());
        ledger.create("r1").await.unwrap();
        ledger.bind_agent("r1", "worker", "gone").await.unwrap();
        let def = minimal_def();
        let keeper = SessionKeeper {
            runtime: &runtime,
            ledger: &ledger,
            workspace: dir.path(),
            def: &def,
        };

        match keeper.session_for("r1", "worker").await {
            Err(EngineError::Session(msg)) => assert!(msg.contains("cannot resolve")),
            other => panic!("expected Session error, got {:?}", other.map(|_| ())),
        }
    }
}
