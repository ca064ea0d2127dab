//! `tandem validate` — check a workflow definition without running it.

use tandem_core::WorkflowDefinition;

pub async fn run(workflow_file: &str) -> Result<(), String> {
    let def = WorkflowDefinition::from_file(workflow_file).map_err(|e| e.to_string())?;

    println!("✅ Workflow '{}' is valid", def.id);
    println!("   Roles: {}", def.roles.len());
    println!("   Bootstrap: {}", if def.flow.bootstrap.is_some() { "yes" } else { "no" });
    println!(
        "   Max rounds: {}",
        def.flow
            .round
            .max_rounds
            .map(|n| n.to_string())
            .unwrap_or_else(|| "default".to_string())
    );

    for (i, step) in def.flow.round.steps.iter().enumerate() {
        println!(
            "   {}. {} (role: {}, {} exit(s), {} transition(s){})",
            i + 1,
            step.key,
            step.role,
            step.exits.len(),
            step.transitions.len(),
            step.next
                .as_deref()
                .map(|n| format!(", next: {}", n))
                .unwrap_or_default()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn test_validates_a_workflow_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.json");
        std::fs::write(
            &path,
            r#"{
                "id": "wf",
                "sessions": { "roles": ["worker"] },
                "roles": { "worker": { "systemPrompt": "w", "parser": "json" } },
                "flow": { "round": {
                    "steps": [{ "key": "a", "role": "worker", "prompt": ["p"] }],
                    "defaultOutcome": { "outcome": "done", "reason": "r" }
                } }
            }"#,
        )
        .unwrap();
        assert!(super::run(path.to_str().unwrap()).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_a_broken_workflow_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.json");
        std::fs::write(
            &path,
            r#"{
                "id": "wf",
                "sessions": { "roles": ["worker"] },
                "roles": { "worker": { "systemPrompt": "w", "parser": "json" } },
                "flow": { "round": {
                    "steps": [{ "key": "a", "role": "worker", "prompt": ["p"], "next": "ghost" }],
                    "defaultOutcome": { "outcome": "done", "reason": "r" }
                } }
            }"#,
        )
        .unwrap();
        let err = super::run(path.to_str().unwrap()).await.unwrap_err();
        assert!(err.contains("undeclared step 'ghost'"));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let err = super::run("/nonexistent/wf.json").await.unwrap_err();
        assert!(err.contains("failed to read workflow file"));
    }
}
