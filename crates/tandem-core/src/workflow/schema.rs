//! JSON schema types for workflow definitions.
//!
//! A workflow JSON defines a multi-role, round-based agent flow:
//!
//! ```json
//! {
//!   "id": "review-loop",
//!   "model": "claude-sonnet-4-20250514",
//!   "sessions": { "roles": ["worker", "verifier"], "nameTemplate": "{workflow}:{run}:{role}" },
//!   "roles": {
//!     "worker":   { "systemPrompt": "You are the worker...",   "parser": "worker-report" },
//!     "verifier": { "systemPrompt": "You are the verifier...", "parser": "verifier-verdict" }
//!   },
//!   "initial": { "task": "..." },
//!   "flow": {
//!     "bootstrap": { "key": "brief", "role": "verifier", "prompt": ["..."] },
//!     "round": {
//!       "steps": [
//!         {
//!           "key": "work",
//!           "role": "worker",
//!           "prompt": ["Task:\n${state.task}", "Instructions:\n${state.instructions}"],
//!           "next": "verify",
//!           "exits": [
//!             { "condition": { "field": "status", "equals": "blocked" },
//!               "outcome": "fail", "reason": "worker blocked" }
//!           ]
//!         }
//!       ],
//!       "start": "work",
//!       "maxRounds": 5,
//!       "defaultOutcome": { "outcome": "fail", "reason": "round budget exhausted" }
//!     }
//!   }
//! }
//! ```
//!
//! Definitions are immutable once loaded; `from_json`/`from_file` parse and
//! then run load-time validation (see [`super::validate`]).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EngineError;
use super::condition::Condition;

/// Top-level workflow definition loaded from a JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Workflow identifier
    pub id: String,

    /// Default model for every call in this workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Which roles get sessions, and how sessions are named
    pub sessions: SessionSpec,

    /// Role name → system prompt and output parser
    pub roles: HashMap<String, RoleSpec>,

    /// Seed state for every round
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub initial: Map<String, Value>,

    /// Bootstrap step and the round specification
    pub flow: FlowSpec,
}

/// Session naming for a workflow's roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSpec {
    /// Roles that receive a persistent session
    pub roles: Vec<String>,

    /// Template for session names; `{workflow}`, `{run}` and `{role}` are
    /// substituted.
    #[serde(default = "default_name_template")]
    pub name_template: String,
}

fn default_name_template() -> String {
    "{workflow}:{run}:{role}".to_string()
}

impl SessionSpec {
    pub fn session_name(&self, workflow: &str, run: &str, role: &str) -> String {
        self.name_template
            .replace("{workflow}", workflow)
            .replace("{run}", run)
            .replace("{role}", role)
    }
}

/// Per-role configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    pub system_prompt: String,

    /// Name of a registered output parser (see `workflow::call::ParserRegistry`)
    pub parser: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSpec {
    /// Optional step executed once before round 1 to seed initial guidance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<Step>,

    pub round: RoundSpec,
}

/// One round: an ordered step graph plus termination defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSpec {
    pub steps: Vec<Step>,

    /// Explicit start step; defaults to the first declared step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,

    /// Hard cap on rounds for the whole workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,

    /// Outcome reported when a round (or the whole run) ends without an
    /// explicit outcome
    pub default_outcome: OutcomeSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSpec {
    pub outcome: String,
    pub reason: String,
}

/// A single prompt-and-parse unit within a round, bound to one role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique key within the round
    pub key: String,

    /// Role whose session and parser this step uses
    pub role: String,

    /// Prompt fragments, joined with a blank line. `${state.<field>}`
    /// placeholders are resolved against the round-state snapshot.
    pub prompt: Vec<String>,

    /// Unconditional fallback when no transition or exit matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,

    /// Intra-round continuations, evaluated in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<Transition>,

    /// Early/severe termination paths, evaluated before `transitions`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exits: Vec<Transition>,

    /// State field → update expression. `${output.<field>}` references the
    /// step's parsed output, `${state.<field>}` the accumulated state.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub state_updates: BTreeMap<String, String>,
}

impl Step {
    pub fn new(key: impl Into<String>, role: impl Into<String>, prompt: Vec<String>) -> Self {
        Self {
            key: key.into(),
            role: role.into(),
            prompt,
            next: None,
            transitions: Vec::new(),
            exits: Vec::new(),
            state_updates: BTreeMap::new(),
        }
    }

    pub fn with_next(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn with_exit(mut self, exit: Transition) -> Self {
        self.exits.push(exit);
        self
    }

    pub fn with_update(mut self, field: impl Into<String>, expr: impl Into<String>) -> Self {
        self.state_updates.insert(field.into(), expr.into());
        self
    }

    /// Prompt fragments joined with a blank line.
    pub fn joined_prompt(&self) -> String {
        self.prompt.join("\n\n")
    }
}

/// A conditional rule: either continue to another step in-round, or
/// terminate with an outcome and reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub condition: Condition,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub state_updates: BTreeMap<String, String>,
}

impl Transition {
    pub fn to_step(condition: Condition, next_step: impl Into<String>) -> Self {
        Self {
            condition,
            next_step: Some(next_step.into()),
            outcome: None,
            reason: None,
            state_updates: BTreeMap::new(),
        }
    }

    pub fn to_outcome(
        condition: Condition,
        outcome: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            condition,
            next_step: None,
            outcome: Some(outcome.into()),
            reason: Some(reason.into()),
            state_updates: BTreeMap::new(),
        }
    }

    pub fn with_update(mut self, field: impl Into<String>, expr: impl Into<String>) -> Self {
        self.state_updates.insert(field.into(), expr.into());
        self
    }
}

impl WorkflowDefinition {
    /// Parse and validate a workflow definition from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let def: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("failed to parse workflow JSON: {}", e)))?;
        super::validate::validate(&def)?;
        Ok(def)
    }

    /// Load a validated workflow definition from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!(
                "failed to read workflow file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content)
    }

    pub fn step(&self, key: &str) -> Option<&Step> {
        self.flow.round.steps.iter().find(|s| s.key == key)
    }

    /// The round's explicit start step, or the first declared step.
    pub fn start_key(&self) -> Option<&str> {
        self.flow
            .round
            .start
            .as_deref()
            .or_else(|| self.flow.round.steps.first().map(|s| s.key.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_workflow() {
        let json = r#"{
            "id": "mini",
            "sessions": { "roles": ["worker"] },
            "roles": { "worker": { "systemPrompt": "You work.", "parser": "json" } },
            "flow": {
                "round": {
                    "steps": [
                        { "key": "work", "role": "worker", "prompt": ["Do the thing."] }
                    ],
                    "defaultOutcome": { "outcome": "done", "reason": "single pass" }
                }
            }
        }"#;
        let def = WorkflowDefinition::from_json(json).unwrap();
        assert_eq!(def.id, "mini");
        assert_eq!(def.sessions.name_template, "{workflow}:{run}:{role}");
        assert_eq!(def.start_key(), Some("work"));
        assert!(def.flow.bootstrap.is_none());
    }

    #[test]
    fn test_parse_full_workflow() {
        let json = r#"{
            "id": "review",
            "model": "claude-sonnet-4-20250514",
            "sessions": { "roles": ["worker", "verifier"], "nameTemplate": "{workflow}-{role}" },
            "roles": {
                "worker":   { "systemPrompt": "You work.",   "parser": "json" },
                "verifier": { "systemPrompt": "You verify.", "parser": "json" }
            },
            "initial": { "task": "add tests" },
            "flow": {
                "bootstrap": { "key": "brief", "role": "verifier", "prompt": ["Brief the worker."] },
                "round": {
                    "steps": [
                        {
                            "key": "work",
                            "role": "worker",
                            "prompt": ["Task:\n${state.task}"],
                            "next": "verify",
                            "stateUpdates": { "work": "${output.work}" },
                            "exits": [
                                { "condition": { "field": "status", "equals": "blocked" },
                                  "outcome": "fail", "reason": "worker blocked" }
                            ]
                        },
                        {
                            "key": "verify",
                            "role": "verifier",
                            "prompt": ["Check:\n${state.work}"],
                            "transitions": [
                                { "condition": { "field": "verdict", "equals": "approve" },
                                  "outcome": "approve", "reason": "approved" },
                                { "condition": "always", "nextStep": "work" }
                            ]
                        }
                    ],
                    "start": "work",
                    "maxRounds": 4,
                    "defaultOutcome": { "outcome": "fail", "reason": "budget exhausted" }
                }
            }
        }"#;
        let def = WorkflowDefinition::from_json(json).unwrap();
        assert_eq!(def.model.as_deref(), Some("claude-sonnet-4-20250514"));
        assert_eq!(def.sessions.session_name("review", "r1", "worker"), "review-worker");
        assert_eq!(def.flow.round.max_rounds, Some(4));
        let work = def.step("work").unwrap();
        assert_eq!(work.exits.len(), 1);
        assert_eq!(work.state_updates.get("work").unwrap(), "${output.work}");
        let verify = def.step("verify").unwrap();
        assert_eq!(verify.transitions.len(), 2);
        assert_eq!(verify.transitions[1].next_step.as_deref(), Some("work"));
    }

    #[test]
    fn test_joined_prompt_uses_blank_lines() {
        let step = Step::new("k", "worker", vec!["one".into(), "two".into()]);
        assert_eq!(step.joined_prompt(), "one\n\ntwo");
    }
}
