//! Provenance ledger — durable, append-only record of a run.
//!
//! One [`RunMeta`] document exists per run, stored in the workspace the run
//! operates against. It holds the role→session bindings and a time-ordered
//! log of every agent call (attempt, prompt, raw response, parsed payload).
//! The engine appends to it on every call and never deletes it.
//!
//! Storage: `<workspace>/.tandem/runs/<sanitized-run-id>.json`

mod store;
mod types;

pub use store::{sanitize_id, LedgerStore};
pub use types::{new_entry_id, AgentBinding, CallPayload, LogEntry, RunMeta};
