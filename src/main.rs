//! CLI harness for the task flow scheduler.
//!
//! This binary is a thin demonstration front end — it loads a flow
//! document, registers the crate's demo tools, runs it, and prints the
//! result. It is not the subsystem's contract; embed `taskflow` as a
//! library and register your own tools for anything real.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use taskflow::{ConfigParser, ContextStore, EchoTool, Scheduler, SleepTool, ToolRegistry};

#[derive(Parser)]
#[command(name = "taskflow", version, about = "Task flow scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a flow document and execute it.
    Run {
        /// Path to the YAML flow document.
        file: PathBuf,

        /// Maximum number of steps running concurrently.
        #[arg(long, env = "MAX_WORKERS", default_value_t = 4)]
        max_workers: usize,

        /// Context entry time-to-live, in seconds.
        #[arg(long, env = "CONTEXT_EXPIRATION", default_value_t = 3600)]
        context_ttl_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskflow::telemetry::init_logging();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            file,
            max_workers,
            context_ttl_secs,
        } => run(file, max_workers, context_ttl_secs).await,
    }
}

async fn run(file: PathBuf, max_workers: usize, context_ttl_secs: u64) -> anyhow::Result<()> {
    let flow = ConfigParser::parse(&file)?;

    let registry = Arc::new(ToolRegistry::new());
    registry.register("echo", Arc::new(EchoTool)).await;
    registry.register("sleep", Arc::new(SleepTool)).await;

    let context = Arc::new(ContextStore::new(Duration::from_secs(context_ttl_secs)));
    let scheduler = Scheduler::new(registry, context, max_workers);

    let result = scheduler.execute_task(flow).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}
