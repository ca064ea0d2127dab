//! The multi-round run loop.
//!
//! A run starts with a fresh ledger and an optional bootstrap call, then
//! executes rounds until one ends with a terminal outcome, the round cap
//! is hit, or an error aborts the run. Round state does not survive the
//! round boundary; only the bootstrap thread and the caller's
//! carry-forward hook feed state into the next round's seed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::ledger::LedgerStore;
use crate::runtime::AgentRuntime;
use crate::session::SessionKeeper;
use super::call::ParserRegistry;
use super::interpreter::{apply_updates, RoundInterpreter, RoundRecord};
use super::schema::WorkflowDefinition;

/// Round cap when the definition does not set `maxRounds`.
pub const DEFAULT_MAX_ROUNDS: u32 = 16;

type CarryForward = Box<dyn Fn(&RoundRecord, &mut Map<String, Value>) + Send + Sync>;

/// Per-run options the definition does not carry.
#[derive(Default)]
pub struct EngineOptions {
    /// Outcomes that end the run. Empty means every outcome is terminal.
    pub terminal_outcomes: Vec<String>,

    /// Called after each non-terminal round to seed extra state into the
    /// next round.
    pub carry_forward: Option<CarryForward>,
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminal<I, S>(mut self, outcomes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terminal_outcomes = outcomes.into_iter().map(Into::into).collect();
        self
    }

    pub fn on_carry_forward<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RoundRecord, &mut Map<String, Value>) + Send + Sync + 'static,
    {
        self.carry_forward = Some(Box::new(hook));
        self
    }

    fn is_terminal(&self, outcome: &str) -> bool {
        self.terminal_outcomes.is_empty() || self.terminal_outcomes.iter().any(|o| o == outcome)
    }
}

/// Final report for a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub outcome: String,
    pub reason: String,
    pub rounds: Vec<RoundRecord>,
    /// True when the run ended because the round cap was reached.
    pub capped: bool,
}

pub struct WorkflowEngine {
    runtime: Arc<dyn AgentRuntime>,
    ledger: LedgerStore,
    parsers: ParserRegistry,
    workspace: PathBuf,
}

impl WorkflowEngine {
    pub fn new(runtime: Arc<dyn AgentRuntime>, workspace: impl AsRef<Path>) -> Self {
        let workspace = workspace.as_ref().to_path_buf();
        Self {
            runtime,
            ledger: LedgerStore::new(&workspace),
            parsers: ParserRegistry::new(),
            workspace,
        }
    }

    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// Execute a run to completion.
    pub async fn run(
        &self,
        def: &WorkflowDefinition,
        run_id: &str,
        options: &EngineOptions,
        cancel: &CancellationToken,
    ) -> Result<RunReport, EngineError> {
        self.ledger.create(run_id).await?;
        tracing::info!(run = run_id, workflow = %def.id, "starting run");

        let keeper = SessionKeeper {
            runtime: self.runtime.as_ref(),
            ledger: &self.ledger,
            workspace: &self.workspace,
            def,
        };
        let interpreter = RoundInterpreter {
            keeper: &keeper,
            parsers: &self.parsers,
            run_id,
            cancel,
        };

        // State the bootstrap (and later the carry-forward hook) threads
        // into each round's seed, on top of `initial`.
        let mut thread: Map<String, Value> = Map::new();
        if let Some(bootstrap) = &def.flow.bootstrap {
            let output = interpreter.execute_step(bootstrap, &def.initial).await?;
            if bootstrap.state_updates.is_empty() {
                thread = output;
            } else {
                apply_updates(&bootstrap.state_updates, &mut thread, &output);
            }
            tracing::debug!(run = run_id, step = %bootstrap.key, "bootstrap complete");
        }

        let max_rounds = def.flow.round.max_rounds.unwrap_or(DEFAULT_MAX_ROUNDS);
        let mut rounds: Vec<RoundRecord> = Vec::new();

        for round in 1..=max_rounds {
            let mut seed = def.initial.clone();
            for (k, v) in &thread {
                seed.insert(k.clone(), v.clone());
            }

            tracing::info!(run = run_id, round, "starting round");
            let record = interpreter.run_round(round, seed).await?;
            tracing::info!(
                run = run_id,
                round,
                outcome = %record.outcome,
                reason = %record.reason,
                "round finished"
            );

            let terminal = options.is_terminal(&record.outcome);
            rounds.push(record);
            if terminal {
                let last = &rounds[rounds.len() - 1];
                return Ok(RunReport {
                    run_id: run_id.to_string(),
                    outcome: last.outcome.clone(),
                    reason: last.reason.clone(),
                    rounds,
                    capped: false,
                });
            }

            thread = Map::new();
            if let Some(hook) = &options.carry_forward {
                hook(&rounds[rounds.len() - 1], &mut thread);
            }
        }

        let default = &def.flow.round.default_outcome;
        tracing::warn!(run = run_id, max_rounds, "round cap reached");
        Ok(RunReport {
            run_id: run_id.to_string(),
            outcome: default.outcome.clone(),
            reason: default.reason.clone(),
            rounds,
            capped: true,
        })
    }
}
