//! CLI command implementations.

pub mod log;
pub mod review;
pub mod run;
pub mod validate;

use std::sync::Arc;

use tandem_core::runtime::HttpAgentRuntime;

/// Build the HTTP runtime from the environment, or explain what is missing.
pub fn runtime_from_env() -> Result<Arc<HttpAgentRuntime>, String> {
    HttpAgentRuntime::from_env()
        .map(Arc::new)
        .map_err(|e| format!("cannot configure the agent runtime: {}", e))
}

/// Run id: caller-provided, or a fresh short id.
pub fn resolve_run_id(run_id: Option<&str>) -> String {
    match run_id {
        Some(id) => id.to_string(),
        None => {
            let raw = uuid::Uuid::new_v4().simple().to_string();
            format!("run-{}", &raw[..8])
        }
    }
}
