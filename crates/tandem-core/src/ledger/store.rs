//! File-backed ledger store — one JSON document per run.
//!
//! The document is read, modified and rewritten as a whole on every append.
//! There is no cross-process locking: two processes appending to the same
//! run id can race and lose updates. A corrupt or unreadable file is a hard
//! error on the next read; the store never guesses at recovery.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs;

use crate::error::EngineError;
use super::types::{new_entry_id, AgentBinding, CallPayload, LogEntry, RunMeta};

/// Replace characters outside `[A-Za-z0-9._-]` so the run-id → file mapping
/// is stable and filesystem-safe.
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[derive(Clone)]
pub struct LedgerStore {
    runs_dir: PathBuf,
}

impl LedgerStore {
    /// Create a store rooted at `<workspace_root>/.tandem/runs/`.
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            runs_dir: workspace_root.as_ref().join(".tandem").join("runs"),
        }
    }

    /// Create a store with a custom runs directory.
    pub fn with_runs_dir(runs_dir: impl AsRef<Path>) -> Self {
        Self {
            runs_dir: runs_dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(format!("{}.json", sanitize_id(run_id)))
    }

    pub async fn exists(&self, run_id: &str) -> bool {
        fs::try_exists(self.path_for(run_id)).await.unwrap_or(false)
    }

    /// Create the provenance document for a fresh run.
    ///
    /// Creating a run that already has a ledger is a conflict; callers are
    /// expected to check [`exists`](Self::exists) first.
    pub async fn create(&self, run_id: &str) -> Result<RunMeta, EngineError> {
        let path = self.path_for(run_id);
        if fs::try_exists(&path)
            .await
            .map_err(|e| io_error(run_id, e))?
        {
            return Err(EngineError::Conflict(format!(
                "run '{}' already has a ledger at {}",
                run_id,
                path.display()
            )));
        }
        fs::create_dir_all(&self.runs_dir)
            .await
            .map_err(|e| io_error(run_id, e))?;
        let meta = RunMeta::new(run_id);
        self.write(&path, &meta).await?;
        tracing::debug!(run = run_id, path = %path.display(), "created run ledger");
        Ok(meta)
    }

    pub async fn load(&self, run_id: &str) -> Result<RunMeta, EngineError> {
        let path = self.path_for(run_id);
        let bytes = fs::read(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                EngineError::NotFound(format!("no ledger for run '{}'", run_id))
            } else {
                io_error(run_id, e)
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            EngineError::Ledger(format!("corrupt ledger for run '{}': {}", run_id, e))
        })
    }

    /// Append a call entry, returning its entry id.
    pub async fn append_call(
        &self,
        run_id: &str,
        role: &str,
        model: Option<&str>,
        payload: &CallPayload,
    ) -> Result<String, EngineError> {
        let entry = LogEntry {
            entry_id: new_entry_id(),
            model: model.map(str::to_string),
            role: Some(role.to_string()),
            payload: serde_json::to_value(payload)
                .map_err(|e| EngineError::Ledger(format!("unserializable payload: {}", e)))?,
            created_at: Utc::now(),
        };
        let entry_id = entry.entry_id.clone();
        self.update(run_id, move |meta| meta.log.push(entry)).await?;
        Ok(entry_id)
    }

    /// Attach the parsed payload to an already-logged entry.
    pub async fn attach_parsed(
        &self,
        run_id: &str,
        entry_id: &str,
        parsed: &serde_json::Value,
    ) -> Result<(), EngineError> {
        let entry_id = entry_id.to_string();
        let parsed = parsed.clone();
        self.update(run_id, move |meta| {
            if let Some(entry) = meta.log.iter_mut().rev().find(|e| e.entry_id == entry_id) {
                if let Some(obj) = entry.payload.as_object_mut() {
                    obj.insert("parsed".to_string(), parsed);
                }
            }
        })
        .await?;
        Ok(())
    }

    /// Record a role → session binding. Idempotent per role.
    pub async fn bind_agent(
        &self,
        run_id: &str,
        role: &str,
        session_id: &str,
    ) -> Result<(), EngineError> {
        let role = role.to_string();
        let session_id = session_id.to_string();
        self.update(run_id, move |meta| {
            if meta.session_for(&role).is_none() {
                meta.agents.push(AgentBinding { role, session_id });
            }
        })
        .await?;
        Ok(())
    }

    /// Most recent `limit` log entries, oldest first.
    pub async fn tail(&self, run_id: &str, limit: usize) -> Result<Vec<LogEntry>, EngineError> {
        let meta = self.load(run_id).await?;
        let skip = meta.log.len().saturating_sub(limit);
        Ok(meta.log.into_iter().skip(skip).collect())
    }

    async fn update<F>(&self, run_id: &str, apply: F) -> Result<RunMeta, EngineError>
    where
        F: FnOnce(&mut RunMeta),
    {
        let mut meta = self.load(run_id).await?;
        apply(&mut meta);
        meta.updated_at = Utc::now();
        self.write(&self.path_for(run_id), &meta).await?;
        Ok(meta)
    }

    async fn write(&self, path: &Path, meta: &RunMeta) -> Result<(), EngineError> {
        let json = serde_json::to_vec_pretty(meta)
            .map_err(|e| EngineError::Ledger(format!("failed to serialize ledger: {}", e)))?;
        fs::write(path, json)
            .await
            .map_err(|e| io_error(&meta.id, e))
    }
}

fn io_error(run_id: &str, err: std::io::Error) -> EngineError {
    EngineError::Ledger(format!("ledger IO for run '{}': {}", run_id, err))
}
