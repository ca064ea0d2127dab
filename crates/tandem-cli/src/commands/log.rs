//! `tandem log` — inspect a run's provenance ledger.

use console::style;

use tandem_core::ledger::LedgerStore;

pub async fn run(workspace: &str, run_id: &str, limit: usize) -> Result<(), String> {
    let ledger = LedgerStore::new(workspace);
    let meta = ledger.load(run_id).await.map_err(|e| e.to_string())?;

    println!("run {} (created {})", style(&meta.id).bold(), meta.created_at);
    for agent in &meta.agents {
        println!("   {} → session {}", agent.role, agent.session_id);
    }
    println!();

    let entries = ledger.tail(run_id, limit).await.map_err(|e| e.to_string())?;
    if entries.is_empty() {
        println!("(no log entries)");
        return Ok(());
    }

    for entry in &entries {
        let role = entry.role.as_deref().unwrap_or("-");
        let attempt = entry.payload["attempt"].as_u64().unwrap_or(0);
        let parsed = if entry.payload.get("parsed").is_some() {
            style("parsed").green()
        } else {
            style("unparsed").red()
        };
        let raw = entry.payload["rawResponse"].as_str().unwrap_or("");
        println!(
            "{}  {:<10} attempt {}  [{}]  {}",
            entry.created_at.format("%H:%M:%S"),
            role,
            attempt,
            parsed,
            truncate(raw, 80)
        );
    }
    println!(
        "\n{} of {} entries shown",
        entries.len(),
        meta.log.len()
    );
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}…", cut)
    }
}
