//! Tandem Core — multi-role agent workflow execution engine.
//!
//! Tandem coordinates long-running conversational roles (e.g. a worker and
//! a verifier) through structured JSON exchanges, driven by a declarative
//! workflow definition, until the workflow reaches a terminal outcome.
//!
//! This crate is transport-agnostic: it never talks to a model provider
//! directly. Everything external goes through the [`runtime::AgentRuntime`]
//! trait, with an HTTP adapter ([`runtime::HttpAgentRuntime`]) and a
//! deterministic scripted runtime shipped alongside it.
//!
//! # Architecture
//!
//! ```text
//! workflow.json ──► WorkflowDefinition ──► WorkflowEngine
//!                                              │ one round at a time
//!                                        RoundInterpreter ──► Condition
//!                                              │
//!                                        StructuredCall (parse + retry)
//!                                         │            │
//!                                   SessionKeeper   LedgerStore
//!                                         │         (.tandem/runs/)
//!                                    AgentRuntime
//!                                  (HTTP / scripted)
//! ```
//!
//! Every call flows into the provenance ledger before it is parsed, so a
//! malformed response is never lost.

pub mod error;
pub mod ledger;
pub mod review;
pub mod runtime;
pub mod session;
pub mod workflow;

// Convenience re-exports
pub use error::EngineError;
pub use workflow::engine::{EngineOptions, RunReport, WorkflowEngine};
pub use workflow::schema::WorkflowDefinition;
