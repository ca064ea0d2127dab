//! `tandem review` — the built-in worker/verifier loop.

use std::path::Path;

use console::style;
use tokio_util::sync::CancellationToken;

use tandem_core::review::{review_workflow, run_review, ReviewOutcome};

pub async fn run(
    workspace: &str,
    task: &str,
    max_rounds: u32,
    run_id: Option<&str>,
    dry_run: bool,
    cancel: &CancellationToken,
) -> Result<(), String> {
    if dry_run {
        let def = review_workflow(task, max_rounds);
        let json = serde_json::to_string_pretty(&def).map_err(|e| e.to_string())?;
        println!("{}", json);
        return Ok(());
    }

    let runtime = super::runtime_from_env()?;
    let run_id = super::resolve_run_id(run_id);

    println!("🔁 Review loop: {}", task);
    println!("   run id: {}, round budget: {}", run_id, max_rounds);
    println!();

    let report = run_review(runtime, Path::new(workspace), &run_id, task, max_rounds, cancel)
        .await
        .map_err(|e| e.to_string())?;

    match report.outcome {
        ReviewOutcome::Approved => {
            println!(
                "{} {} after {} round(s)",
                style("✔ approved").green().bold(),
                report.reason,
                report.rounds
            );
            Ok(())
        }
        ReviewOutcome::Failed => Err(format!(
            "review failed after {} round(s): {}",
            report.rounds, report.reason
        )),
        ReviewOutcome::MaxRounds => Err(format!(
            "review hit its round budget of {}: {}",
            max_rounds, report.reason
        )),
    }
}
