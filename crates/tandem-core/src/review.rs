//! The built-in worker/verifier review loop.
//!
//! Two roles share a run: a worker that attempts the task and a verifier
//! that briefs it, checks the result, and either approves, fails, or sends
//! it back with new instructions. This module packages that loop as a
//! ready-made workflow definition plus typed parsers for both roles.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::runtime::AgentRuntime;
use crate::workflow::call::{extract_json, OutputParser, ParserRegistry};
use crate::workflow::condition::Condition;
use crate::workflow::engine::{EngineOptions, WorkflowEngine};
use crate::workflow::schema::{
    FlowSpec, OutcomeSpec, RoleSpec, RoundSpec, SessionSpec, Step, Transition, WorkflowDefinition,
};

pub const WORKER_ROLE: &str = "worker";
pub const VERIFIER_ROLE: &str = "verifier";

pub const OUTCOME_APPROVE: &str = "approve";
pub const OUTCOME_FAIL: &str = "fail";
pub const OUTCOME_INSTRUCT: &str = "instruct";

const WORKER_SYSTEM_PROMPT: &str = "You are the worker in a review loop. You attempt the task \
    you are given, following the reviewer's instructions. You always answer with a single JSON \
    object: {\"status\": \"done\" | \"blocked\", \"work\": \"<what you did>\", \
    \"blockedReason\": \"<only when blocked>\"}. No code fences, no commentary.";

const VERIFIER_SYSTEM_PROMPT: &str = "You are the verifier in a review loop. You brief the \
    worker, then judge each attempt strictly. You always answer with a single JSON object. \
    When briefing: {\"instructions\": \"<what the worker should do>\"}. When judging: \
    {\"verdict\": \"approve\" | \"fail\" | \"instruct\", \"critique\": \"<your assessment>\", \
    \"instructions\": \"<next steps, when instructing>\"}. No code fences, no commentary.";

/// The worker's structured answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    /// "done" or "blocked"
    #[serde(alias = "state", alias = "progress")]
    pub status: String,

    #[serde(default, alias = "summary", alias = "result", alias = "output")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work: Option<String>,

    #[serde(default, alias = "blockers")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
}

/// The verifier's structured answer. Every field is optional because the
/// briefing turn carries only `instructions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifierVerdict {
    #[serde(default, alias = "decision", alias = "outcome")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<String>,

    #[serde(default, alias = "feedback", alias = "notes")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critique: Option<String>,

    #[serde(default, alias = "nextSteps", alias = "guidance")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Decodes and canonicalizes worker reports.
pub struct WorkerReportParser;

impl OutputParser for WorkerReportParser {
    fn parse(&self, raw: &str) -> Result<Value, String> {
        let report: WorkerReport = serde_json::from_str(extract_json(raw))
            .map_err(|e| format!("not a valid worker report: {}", e))?;
        serde_json::to_value(&report).map_err(|e| e.to_string())
    }
}

/// Decodes and canonicalizes verifier verdicts.
pub struct VerifierVerdictParser;

impl OutputParser for VerifierVerdictParser {
    fn parse(&self, raw: &str) -> Result<Value, String> {
        let verdict: VerifierVerdict = serde_json::from_str(extract_json(raw))
            .map_err(|e| format!("not a valid verifier verdict: {}", e))?;
        serde_json::to_value(&verdict).map_err(|e| e.to_string())
    }
}

/// Registry with the review-loop parsers on top of the built-ins.
pub fn parsers() -> ParserRegistry {
    let mut registry = ParserRegistry::new();
    registry.register("worker-report", WorkerReportParser);
    registry.register("verifier-verdict", VerifierVerdictParser);
    registry
}

/// Build the worker/verifier workflow definition for `task`.
pub fn review_workflow(task: &str, max_rounds: u32) -> WorkflowDefinition {
    let work = Step::new(
        "work",
        WORKER_ROLE,
        vec![
            "Task:\n${state.task}".to_string(),
            "Instructions from the reviewer:\n${state.instructions}".to_string(),
        ],
    )
    .with_update("status", "${output.status}")
    .with_update("work", "${output.work}")
    .with_exit(Transition::to_outcome(
        Condition::field_equals("status", json!("blocked")),
        OUTCOME_FAIL,
        "worker reported itself blocked",
    ))
    .with_next("verify");

    let verify = Step::new(
        "verify",
        VERIFIER_ROLE,
        vec!["The worker reports:\n${state.work}".to_string()],
    )
    .with_update("critique", "${output.critique}")
    .with_update("instructions", "${output.instructions}")
    .with_transition(Transition::to_outcome(
        Condition::field_equals("verdict", json!(OUTCOME_APPROVE)),
        OUTCOME_APPROVE,
        "verifier approved the work",
    ))
    .with_transition(Transition::to_outcome(
        Condition::field_equals("verdict", json!(OUTCOME_FAIL)),
        OUTCOME_FAIL,
        "verifier rejected the work",
    ))
    .with_transition(Transition::to_outcome(
        Condition::field_equals("verdict", json!(OUTCOME_INSTRUCT)),
        OUTCOME_INSTRUCT,
        "verifier requested another pass",
    ));

    let bootstrap = Step::new(
        "brief",
        VERIFIER_ROLE,
        vec!["You will review a worker attempting this task:\n${state.task}\n\nBrief the worker."
            .to_string()],
    )
    .with_update("instructions", "${output.instructions}");

    let mut initial = serde_json::Map::new();
    initial.insert("task".to_string(), json!(task));

    WorkflowDefinition {
        id: "review".to_string(),
        model: None,
        sessions: SessionSpec {
            roles: vec![WORKER_ROLE.to_string(), VERIFIER_ROLE.to_string()],
            name_template: "{workflow}:{run}:{role}".to_string(),
        },
        roles: [
            (
                WORKER_ROLE.to_string(),
                RoleSpec {
                    system_prompt: WORKER_SYSTEM_PROMPT.to_string(),
                    parser: "worker-report".to_string(),
                },
            ),
            (
                VERIFIER_ROLE.to_string(),
                RoleSpec {
                    system_prompt: VERIFIER_SYSTEM_PROMPT.to_string(),
                    parser: "verifier-verdict".to_string(),
                },
            ),
        ]
        .into(),
        initial,
        flow: FlowSpec {
            bootstrap: Some(bootstrap),
            round: RoundSpec {
                steps: vec![work, verify],
                start: Some("work".to_string()),
                max_rounds: Some(max_rounds),
                default_outcome: OutcomeSpec {
                    outcome: OUTCOME_FAIL.to_string(),
                    reason: "review loop exhausted its round budget".to_string(),
                },
            },
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReviewOutcome {
    Approved,
    Failed,
    MaxRounds,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewReport {
    pub run_id: String,
    pub outcome: ReviewOutcome,
    pub reason: String,
    pub rounds: u32,
}

/// Engine options for the review loop: approve and fail are terminal,
/// instruct carries the verifier's new guidance into the next round.
pub fn review_options() -> EngineOptions {
    EngineOptions::new()
        .terminal([OUTCOME_APPROVE, OUTCOME_FAIL])
        .on_carry_forward(|record, thread| {
            if record.outcome == OUTCOME_INSTRUCT {
                if let Some(instructions) = record.state.get("instructions") {
                    if !instructions.is_null() {
                        thread.insert("instructions".to_string(), instructions.clone());
                    }
                }
            }
        })
}

/// Run the review loop to completion.
pub async fn run_review(
    runtime: Arc<dyn AgentRuntime>,
    workspace: &Path,
    run_id: &str,
    task: &str,
    max_rounds: u32,
    cancel: &CancellationToken,
) -> Result<ReviewReport, EngineError> {
    let def = review_workflow(task, max_rounds);
    let engine = WorkflowEngine::new(runtime, workspace).with_parsers(parsers());
    let report = engine.run(&def, run_id, &review_options(), cancel).await?;

    let outcome = if report.capped {
        ReviewOutcome::MaxRounds
    } else if report.outcome == OUTCOME_APPROVE {
        ReviewOutcome::Approved
    } else {
        ReviewOutcome::Failed
    };
    Ok(ReviewReport {
        run_id: report.run_id,
        outcome,
        reason: report.reason,
        rounds: report.rounds.len() as u32,
    })
}
