//! Tandem CLI — run and inspect multi-role agent workflows.

mod commands;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// Tandem — multi-role agent workflow runner
#[derive(Parser)]
#[command(name = "tandem", version, about = "Tandem — multi-role agent workflow runner")]
pub struct Cli {
    /// Workspace directory runs operate against (ledger and sessions live
    /// under <workspace>/.tandem/)
    #[arg(long, env = "TANDEM_WORKSPACE", default_value = ".", global = true)]
    workspace: String,

    /// Quick review mode: run the worker/verifier loop on a task.
    /// Example: tandem -p "Fix the failing login test"
    #[arg(short = 'p', long = "prompt")]
    prompt: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow definition from a JSON file
    Run {
        /// Path to the workflow JSON file
        file: String,
        /// Run identifier; generated when omitted
        #[arg(long)]
        run_id: Option<String>,
        /// Outcome that ends the run (repeatable); every outcome is
        /// terminal when none are given
        #[arg(long = "terminal")]
        terminal: Vec<String>,
    },

    /// Run the built-in worker/verifier review loop on a task
    Review {
        /// The task to work on and review
        task: String,
        /// Round budget for the loop
        #[arg(long, default_value_t = 5)]
        max_rounds: u32,
        /// Run identifier; generated when omitted
        #[arg(long)]
        run_id: Option<String>,
        /// Print the generated workflow definition instead of running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate a workflow JSON file without executing it
    Validate {
        /// Path to the workflow JSON file
        file: String,
    },

    /// Show the tail of a run's provenance ledger
    Log {
        /// Run identifier
        run: String,
        /// Number of entries to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem_core=warn,tandem_cli=info".into()),
        )
        .init();

    // Ctrl-C cancels the in-flight run; the ledger keeps what happened.
    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let result = if let Some(task) = cli.prompt {
        // ── Quick review mode: tandem -p "task" ─────────────────────
        commands::review::run(&cli.workspace, &task, 5, None, false, &cancel).await
    } else if let Some(command) = cli.command {
        match command {
            Commands::Run {
                file,
                run_id,
                terminal,
            } => {
                commands::run::run(&cli.workspace, &file, run_id.as_deref(), terminal, &cancel)
                    .await
            }
            Commands::Review {
                task,
                max_rounds,
                run_id,
                dry_run,
            } => {
                commands::review::run(
                    &cli.workspace,
                    &task,
                    max_rounds,
                    run_id.as_deref(),
                    dry_run,
                    &cancel,
                )
                .await
            }
            Commands::Validate { file } => commands::validate::run(&file).await,
            Commands::Log { run, limit } => commands::log::run(&cli.workspace, &run, limit).await,
        }
    } else {
        // No prompt and no subcommand — show help
        use clap::CommandFactory;
        Cli::command().print_help().ok();
        println!();
        Ok(())
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
