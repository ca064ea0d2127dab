//! Load-time validation of workflow definitions.
//!
//! Everything rejected here is a configuration error: detected once when
//! the definition is loaded, fatal, never retried. Evaluation-time code can
//! then assume step references resolve and `matches` patterns compile.

use std::collections::HashSet;

use regex::Regex;

use crate::error::EngineError;
use super::condition::{Comparator, Condition};
use super::schema::{Step, Transition, WorkflowDefinition};

pub fn validate(def: &WorkflowDefinition) -> Result<(), EngineError> {
    if def.roles.is_empty() {
        return Err(cfg("workflow declares no roles"));
    }
    if def.sessions.roles.is_empty() {
        return Err(cfg("sessions.roles is empty"));
    }
    for role in &def.sessions.roles {
        if !def.roles.contains_key(role) {
            return Err(cfg(format!(
                "sessions.roles references undeclared role '{}'",
                role
            )));
        }
    }
    if def.flow.round.steps.is_empty() {
        return Err(cfg("round declares no steps"));
    }

    let mut keys: HashSet<&str> = HashSet::new();
    for step in &def.flow.round.steps {
        if !keys.insert(step.key.as_str()) {
            return Err(cfg(format!("duplicate step key '{}'", step.key)));
        }
    }
    if let Some(start) = &def.flow.round.start {
        if !keys.contains(start.as_str()) {
            return Err(cfg(format!("start references undeclared step '{}'", start)));
        }
    }

    for step in &def.flow.round.steps {
        check_step(def, step, &keys)?;
    }

    if let Some(bootstrap) = &def.flow.bootstrap {
        if !def.roles.contains_key(&bootstrap.role) {
            return Err(cfg(format!(
                "bootstrap step '{}' uses undeclared role '{}'",
                bootstrap.key, bootstrap.role
            )));
        }
        // The bootstrap step runs exactly once and never transitions.
        if bootstrap.next.is_some() || !bootstrap.transitions.is_empty() || !bootstrap.exits.is_empty() {
            return Err(cfg(format!(
                "bootstrap step '{}' cannot declare next/transitions/exits",
                bootstrap.key
            )));
        }
    }

    Ok(())
}

fn check_step(
    def: &WorkflowDefinition,
    step: &Step,
    keys: &HashSet<&str>,
) -> Result<(), EngineError> {
    if !def.roles.contains_key(&step.role) {
        return Err(cfg(format!(
            "step '{}' uses undeclared role '{}'",
            step.key, step.role
        )));
    }
    if let Some(next) = &step.next {
        if !keys.contains(next.as_str()) {
            return Err(cfg(format!(
                "step '{}' next references undeclared step '{}'",
                step.key, next
            )));
        }
    }
    for exit in &step.exits {
        check_transition(&step.key, exit, keys, true)?;
    }
    for transition in &step.transitions {
        check_transition(&step.key, transition, keys, false)?;
    }
    Ok(())
}

fn check_transition(
    step_key: &str,
    transition: &Transition,
    keys: &HashSet<&str>,
    is_exit: bool,
) -> Result<(), EngineError> {
    match (&transition.next_step, &transition.outcome) {
        (None, None) => {
            return Err(cfg(format!(
                "step '{}' has a transition with neither nextStep nor outcome",
                step_key
            )));
        }
        (Some(_), Some(_)) => {
            return Err(cfg(format!(
                "step '{}' has a transition with both nextStep and outcome",
                step_key
            )));
        }
        (Some(next), None) => {
            if is_exit {
                return Err(cfg(format!(
                    "step '{}' has an exit with nextStep '{}'; exits must terminate",
                    step_key, next
                )));
            }
            if !keys.contains(next.as_str()) {
                return Err(cfg(format!(
                    "step '{}' transition references undeclared step '{}'",
                    step_key, next
                )));
            }
        }
        (None, Some(_)) => {
            if transition.reason.is_none() {
                return Err(cfg(format!(
                    "step '{}' has an outcome transition without a reason",
                    step_key
                )));
            }
        }
    }
    check_condition(step_key, &transition.condition)
}

fn check_condition(step_key: &str, condition: &Condition) -> Result<(), EngineError> {
    match condition {
        Condition::Keyword(_) => Ok(()),
        Condition::Any { any } => any.iter().try_for_each(|c| check_condition(step_key, c)),
        Condition::All { all } => all.iter().try_for_each(|c| check_condition(step_key, c)),
        Condition::Atom(atom) => {
            if let Comparator::Matches(pattern) = &atom.test {
                Regex::new(pattern).map_err(|e| {
                    cfg(format!(
                        "step '{}' has an invalid matches pattern '{}': {}",
                        step_key, pattern, e
                    ))
                })?;
            }
            Ok(())
        }
    }
}

fn cfg(message: impl Into<String>) -> EngineError {
    EngineError::Config(message.into())
}
