//! Round interpreter.
//!
//! A round walks the step graph from the start step: prompt the step's
//! role, decode the structured output, fold `stateUpdates` into the round
//! state, then pick the next move. Exits are checked before transitions,
//! both first-match-wins in declaration order; `next` is the unconditional
//! fallback; a round with nowhere to go ends with the default outcome.
//!
//! Conditions and update expressions see a snapshot of the accumulated
//! state overlaid with the step's own parsed output, but only explicit
//! `stateUpdates` survive into later steps.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::session::SessionKeeper;
use super::call::{ParserRegistry, StructuredCall};
use super::condition::display_form;
use super::schema::{Step, Transition};

/// How much intra-round step execution a round may do before it is
/// considered stuck in a transition cycle.
const CYCLE_FACTOR: usize = 4;

/// The result of one executed round.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundRecord {
    pub round: u32,
    pub outcome: String,
    pub reason: String,
    /// Accumulated state at the end of the round
    pub state: Map<String, Value>,
    /// Step keys in execution order
    pub steps: Vec<String>,
}

pub(crate) struct RoundInterpreter<'a> {
    pub keeper: &'a SessionKeeper<'a>,
    pub parsers: &'a ParserRegistry,
    pub run_id: &'a str,
    pub cancel: &'a CancellationToken,
}

impl RoundInterpreter<'_> {
    pub async fn run_round(
        &self,
        round: u32,
        seed: Map<String, Value>,
    ) -> Result<RoundRecord, EngineError> {
        let def = self.keeper.def;
        let mut state = seed;
        let mut executed: Vec<String> = Vec::new();
        let budget = def.flow.round.steps.len() * CYCLE_FACTOR;

        let mut current = def
            .start_key()
            .ok_or_else(|| EngineError::Config("round declares no steps".to_string()))?
            .to_string();

        loop {
            if executed.len() >= budget {
                return Err(EngineError::Runtime(format!(
                    "round {} exceeded its step budget of {} (cycle through {:?})",
                    round, budget, executed
                )));
            }
            let step = def.step(&current).ok_or_else(|| {
                EngineError::Config(format!("step '{}' vanished from the round", current))
            })?;
            executed.push(step.key.clone());

            let output = self.execute_step(step, &state).await?;
            apply_updates(&step.state_updates, &mut state, &output);

            // Conditions see accumulated state overlaid with this step's output.
            let mut snapshot = state.clone();
            for (k, v) in &output {
                snapshot.insert(k.clone(), v.clone());
            }

            if let Some(exit) = first_match(&step.exits, &snapshot) {
                apply_updates(&exit.state_updates, &mut state, &output);
                return Ok(self.finish(round, exit, state, executed));
            }
            if let Some(transition) = first_match(&step.transitions, &snapshot) {
                apply_updates(&transition.state_updates, &mut state, &output);
                match &transition.next_step {
                    Some(next) => {
                        current = next.clone();
                        continue;
                    }
                    None => return Ok(self.finish(round, transition, state, executed)),
                }
            }
            match &step.next {
                Some(next) => current = next.clone(),
                None => {
                    let default = &def.flow.round.default_outcome;
                    return Ok(RoundRecord {
                        round,
                        outcome: default.outcome.clone(),
                        reason: default.reason.clone(),
                        state,
                        steps: executed,
                    });
                }
            }
        }
    }

    pub(crate) async fn execute_step(
        &self,
        step: &Step,
        state: &Map<String, Value>,
    ) -> Result<Map<String, Value>, EngineError> {
        let def = self.keeper.def;
        let role_spec = def.roles.get(&step.role).ok_or_else(|| {
            EngineError::Config(format!("step '{}' uses undeclared role '{}'", step.key, step.role))
        })?;
        let parser = self.parsers.get(&role_spec.parser).ok_or_else(|| {
            EngineError::Config(format!(
                "role '{}' references unknown parser '{}'",
                step.role, role_spec.parser
            ))
        })?;
        let session = self.keeper.session_for(self.run_id, &step.role).await?;
        let prompt = resolve_prompt(&step.joined_prompt(), state);

        tracing::debug!(run = self.run_id, step = %step.key, role = %step.role, "executing step");
        let call = StructuredCall {
            runtime: self.keeper.runtime,
            ledger: self.keeper.ledger,
            run_id: self.run_id,
            role: &step.role,
            model: def.model.as_deref(),
            system_prompt: &role_spec.system_prompt,
            session: &session,
            parser,
        };
        let outcome = call.invoke(&prompt, self.cancel).await?;
        outcome
            .parsed
            .as_object()
            .cloned()
            .ok_or_else(|| {
                EngineError::Runtime(format!(
                    "parser '{}' returned a non-object payload",
                    role_spec.parser
                ))
            })
    }

    fn finish(
        &self,
        round: u32,
        transition: &Transition,
        state: Map<String, Value>,
        steps: Vec<String>,
    ) -> RoundRecord {
        // Outcome transitions always carry both fields after validation.
        RoundRecord {
            round,
            outcome: transition.outcome.clone().unwrap_or_default(),
            reason: transition.reason.clone().unwrap_or_default(),
            state,
            steps,
        }
    }
}

/// First transition whose condition holds against `snapshot`.
fn first_match<'t>(
    transitions: &'t [Transition],
    snapshot: &Map<String, Value>,
) -> Option<&'t Transition> {
    transitions.iter().find(|t| t.condition.evaluate(snapshot))
}

fn state_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{state\.([^}]+)\}").unwrap())
}

fn exact_reference() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\$\{(output|state)\.([^}]+)\}$").unwrap())
}

fn any_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{(output|state)\.([^}]+)\}").unwrap())
}

/// Resolve `${state.<field>}` placeholders against `state`. Unknown fields
/// are left verbatim so a missing value is visible in the prompt.
pub(crate) fn resolve_prompt(template: &str, state: &Map<String, Value>) -> String {
    state_placeholder()
        .replace_all(template, |caps: &regex::Captures| {
            match state.get(&caps[1]) {
                Some(value) => display_form(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Evaluate one update expression.
///
/// An expression that is exactly `${output.<field>}` or `${state.<field>}`
/// yields the referenced value with its JSON type (Null when absent).
/// Anything else is string interpolation, unknown references left verbatim.
pub(crate) fn eval_update(
    expr: &str,
    state: &Map<String, Value>,
    output: &Map<String, Value>,
) -> Value {
    if let Some(caps) = exact_reference().captures(expr) {
        let source = if &caps[1] == "output" { output } else { state };
        return source.get(&caps[2]).cloned().unwrap_or(Value::Null);
    }

    let rendered = any_placeholder().replace_all(expr, |caps: &regex::Captures| {
        let source = if &caps[1] == "output" { output } else { state };
        match source.get(&caps[2]) {
            Some(value) => display_form(value),
            None => caps[0].to_string(),
        }
    });
    Value::String(rendered.into_owned())
}

pub(crate) fn apply_updates(
    updates: &std::collections::BTreeMap<String, String>,
    state: &mut Map<String, Value>,
    output: &Map<String, Value>,
) {
    for (field, expr) in updates {
        let value = eval_update(expr, state, output);
        state.insert(field.clone(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerStore;
    use crate::runtime::ScriptedRuntime;
    use crate::workflow::schema::WorkflowDefinition;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_resolve_prompt_substitutes_known_fields() {
        let state = obj(json!({ "task": "ship it", "count": 3 }));
        assert_eq!(
            resolve_prompt("Task: ${state.task} (${state.count})", &state),
            "Task: ship it (3)"
        );
        assert_eq!(
            resolve_prompt("Missing: ${state.ghost}", &state),
            "Missing: ${state.ghost}"
        );
    }

    #[test]
    fn test_eval_update_exact_reference_keeps_type() {
        let state = obj(json!({ "n": 1 }));
        let output = obj(json!({ "done": true, "items": [1, 2] }));
        assert_eq!(eval_update("${output.done}", &state, &output), json!(true));
        assert_eq!(eval_update("${output.items}", &state, &output), json!([1, 2]));
        assert_eq!(eval_update("${state.n}", &state, &output), json!(1));
        assert_eq!(eval_update("${output.ghost}", &state, &output), Value::Null);
    }

    #[test]
    fn test_eval_update_interpolation_yields_string() {
        let state = obj(json!({ "round": 2 }));
        let output = obj(json!({ "work": "patched" }));
        assert_eq!(
            eval_update("round ${state.round}: ${output.work}", &state, &output),
            json!("round 2: patched")
        );
    }

    struct Harness {
        runtime: ScriptedRuntime,
        def: WorkflowDefinition,
    }

    fn harness(def_json: &str, responses: Vec<&str>) -> Harness {
        Harness {
            runtime: ScriptedRuntime::new(responses),
            def: WorkflowDefinition::from_json(def_json).unwrap(),
        }
    }

    async fn run(harness: &Harness, seed: Map<String, Value>) -> Result<RoundRecord, EngineError> {
        let dir = tempfile::tempdir().unwrap();
        let ledger = LedgerStore::new(dir.path());
        ledger.create("r1").await.unwrap();
        let keeper = SessionKeeper {
            runtime: &harness.runtime,
            ledger: &ledger,
            workspace: dir.path(),
            def: &harness.def,
        };
        let parsers = ParserRegistry::new();
        let interpreter = RoundInterpreter {
            keeper: &keeper,
            parsers: &parsers,
            run_id: "r1",
            cancel: &CancellationToken::new(),
        };
        interpreter.run_round(1, seed).await
    }

    const TWO_STEP: &str = r#"{
        "id": "t",
        "sessions": { "roles": ["worker", "verifier"] },
        "roles": {
            "worker":   { "systemPrompt": "w", "parser": "json" },
            "verifier": { "systemPrompt": "v", "parser": "json" }
        },
        "flow": { "round": {
            "steps": [
                {
                    "key": "work", "role": "worker",
                    "prompt": ["Task: ${state.task}"],
                    "next": "verify",
                    "stateUpdates": { "work": "${output.work}" },
                    "exits": [
                        { "condition": { "field": "status", "equals": "blocked" },
                          "outcome": "fail", "reason": "worker blocked" }
                    ]
                },
                {
                    "key": "verify", "role": "verifier",
                    "prompt": ["Check: ${state.work}"],
                    "transitions": [
                        { "condition": { "field": "verdict", "equals": "approve" },
                          "outcome": "approve", "reason": "approved" },
                        { "condition": { "field": "verdict", "equals": "retry" },
                          "nextStep": "work" },
                        { "condition": "always",
                          "outcome": "fail", "reason": "rejected" }
                    ]
                }
            ],
            "defaultOutcome": { "outcome": "fail", "reason": "no path" }
        } }
    }"#;

    #[tokio::test]
    async fn test_round_reaches_approve() {
        let harness = harness(
            TWO_STEP,
            vec![
                r#"{"status": "done", "work": "patched"}"#,
                r#"{"verdict": "approve"}"#,
            ],
        );
        let record = run(&harness, obj(json!({ "task": "fix" }))).await.unwrap();
        assert_eq!(record.outcome, "approve");
        assert_eq!(record.reason, "approved");
        assert_eq!(record.steps, vec!["work", "verify"]);
        assert_eq!(record.state["work"], "patched");
        // The worker prompt saw the seed state.
        let calls = harness.runtime.calls();
        let first_prompt = match &calls[0].parts[1] {
            crate::runtime::PromptPart::Text { text } => text.clone(),
        };
        assert_eq!(first_prompt, "Task: fix");
    }

    #[tokio::test]
    async fn test_exit_preempts_transitions_and_next() {
        let harness = harness(TWO_STEP, vec![r#"{"status": "blocked"}"#]);
        let record = run(&harness, Map::new()).await.unwrap();
        assert_eq!(record.outcome, "fail");
        assert_eq!(record.reason, "worker blocked");
        assert_eq!(record.steps, vec!["work"]);
        assert_eq!(harness.runtime.call_count(), 1);
    }

    #[tokio::test]
    async fn test_first_matching_transition_wins() {
        // "retry" matches the second transition before the always-fail one.
        let harness = harness(
            TWO_STEP,
            vec![
                r#"{"status": "done", "work": "v1"}"#,
                r#"{"verdict": "retry"}"#,
                r#"{"status": "done", "work": "v2"}"#,
                r#"{"verdict": "approve"}"#,
            ],
        );
        let record = run(&harness, Map::new()).await.unwrap();
        assert_eq!(record.outcome, "approve");
        assert_eq!(record.steps, vec!["work", "verify", "work", "verify"]);
        assert_eq!(record.state["work"], "v2");
    }

    #[tokio::test]
    async fn test_step_output_does_not_leak_without_state_update() {
        // "verdict" comes from the verify step's output but is never written
        // to state, so it is absent from the final record state.
        let harness = harness(
            TWO_STEP,
            vec![
                r#"{"status": "done", "work": "patched"}"#,
                r#"{"verdict": "approve"}"#,
            ],
        );
        let record = run(&harness, Map::new()).await.unwrap();
        assert!(record.state.get("verdict").is_none());
    }

    #[tokio::test]
    async fn test_cycle_budget_aborts_stuck_round() {
        let json = r#"{
            "id": "loop",
            "sessions": { "roles": ["worker"] },
            "roles": { "worker": { "systemPrompt": "w", "parser": "json" } },
            "flow": { "round": {
                "steps": [
                    { "key": "a", "role": "worker", "prompt": ["p"], "next": "b" },
                    { "key": "b", "role": "worker", "prompt": ["p"], "next": "a" }
                ],
                "defaultOutcome": { "outcome": "done", "reason": "r" }
            } }
        }"#;
        let responses = vec!["{}"; 16];
        let harness = harness(json, responses);
        match run(&harness, Map::new()).await {
            Err(EngineError::Runtime(msg)) => assert!(msg.contains("step budget")),
            other => panic!("expected Runtime error, got {:?}", other),
        }
        // Two steps, factor 4: the budget is 8 executions.
        assert_eq!(harness.runtime.call_count(), 8);
    }

    #[tokio::test]
    async fn test_default_outcome_when_no_move_matches() {
        let json = r#"{
            "id": "single",
            "sessions": { "roles": ["worker"] },
            "roles": { "worker": { "systemPrompt": "w", "parser": "json" } },
            "flow": { "round": {
                "steps": [{ "key": "a", "role": "worker", "prompt": ["p"] }],
                "defaultOutcome": { "outcome": "done", "reason": "single pass" }
            } }
        }"#;
        let harness = harness(json, vec!["{}"]);
        let record = run(&harness, Map::new()).await.unwrap();
        assert_eq!(record.outcome, "done");
        assert_eq!(record.reason, "single pass");
    }

    #[tokio::test]
    async fn test_transition_state_updates_applied_on_match() {
        let json = r#"{
            "id": "t",
            "sessions": { "roles": ["worker"] },
            "roles": { "worker": { "systemPrompt": "w", "parser": "json" } },
            "flow": { "round": {
                "steps": [{
                    "key": "a", "role": "worker", "prompt": ["p"],
                    "transitions": [{
                        "condition": "always",
                        "outcome": "done", "reason": "r",
                        "stateUpdates": { "note": "${output.note}" }
                    }]
                }],
                "defaultOutcome": { "outcome": "fail", "reason": "r" }
            } }
        }"#;
        let harness = harness(json, vec![r#"{"note": "kept"}"#]);
        let record = run(&harness, Map::new()).await.unwrap();
        assert_eq!(record.state["note"], "kept");
    }
}
