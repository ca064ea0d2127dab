//! Workflow model and execution.
//!
//! - [`schema`]: the JSON definition types
//! - [`condition`]: the transition condition language
//! - [`validate`]: load-time checks
//! - [`call`]: structured-output calls with bounded JSON retry
//! - [`interpreter`]: one round of the step graph
//! - [`engine`]: the multi-round run loop

pub mod call;
pub mod condition;
pub mod engine;
pub mod interpreter;
pub mod schema;
pub mod validate;

pub use call::{extract_json, OutputParser, ParserRegistry, MAX_JSON_ATTEMPTS};
pub use condition::{AtomCondition, Comparator, Condition};
pub use engine::{EngineOptions, RunReport, WorkflowEngine, DEFAULT_MAX_ROUNDS};
pub use interpreter::RoundRecord;
pub use schema::{
    FlowSpec, OutcomeSpec, RoleSpec, RoundSpec, SessionSpec, Step, Transition, WorkflowDefinition,
};
