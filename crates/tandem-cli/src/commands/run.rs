//! `tandem run` — execute a workflow definition from a JSON file.

use console::style;
use tokio_util::sync::CancellationToken;

use tandem_core::workflow::engine::EngineOptions;
use tandem_core::{WorkflowDefinition, WorkflowEngine};

pub async fn run(
    workspace: &str,
    workflow_file: &str,
    run_id: Option<&str>,
    terminal: Vec<String>,
    cancel: &CancellationToken,
) -> Result<(), String> {
    let def = WorkflowDefinition::from_file(workflow_file).map_err(|e| e.to_string())?;
    let run_id = super::resolve_run_id(run_id);

    println!("📄 Loaded workflow: {} ({})", def.id, workflow_file);
    println!(
        "   {} step(s), {} role(s), bootstrap: {}",
        def.flow.round.steps.len(),
        def.roles.len(),
        if def.flow.bootstrap.is_some() { "yes" } else { "no" }
    );
    println!("   run id: {}", run_id);
    println!();

    let runtime = super::runtime_from_env()?;
    let engine = WorkflowEngine::new(runtime, workspace)
        .with_parsers(tandem_core::review::parsers());
    let options = EngineOptions::new().terminal(terminal);

    let report = engine
        .run(&def, &run_id, &options, cancel)
        .await
        .map_err(|e| e.to_string())?;

    for round in &report.rounds {
        println!(
            "round {}: {} ({}) via {}",
            round.round,
            round.outcome,
            round.reason,
            round.steps.join(" → ")
        );
    }
    if report.capped {
        println!("{}", style("round budget reached").yellow());
    }
    println!(
        "\n{} outcome: {} ({})",
        style("done.").green(),
        style(&report.outcome).bold(),
        report.reason
    );
    Ok(())
}
