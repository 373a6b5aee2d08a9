//! `ivcu-server` — composition-root binary for the IVCU control plane.
//!
//! Reads configuration from the environment (`ivcu::config::Config`),
//! assembles the collaborator stack (`ivcu::composition::build`), and
//! either serves requests until `SIGINT`/`SIGTERM` (`serve`) or runs one
//! `run_full` generation to completion and prints the resulting state as
//! JSON (`generate`) — useful for smoke-testing a deployment without a
//! transport layer in front of it, since the HTTP/gRPC surface is out of
//! scope for this core (§1).
//!
//! Exit codes, exactly as specified (§6): `0` ok, `1` fatal init
//! (config valid but a collaborator failed to construct, e.g. DB
//! connection refused), `2` bad config (validation failed before any I/O).

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ivcu::composition::{self, Stack};
use ivcu::config::Config;
use ivcu_orchestrator::GenerationRequest;
use ivcu_router::cost_oracle::Complexity;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "ivcu-server")]
#[command(about = "IVCU code-generation control plane", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs the projection engine consumer loop until interrupted. This is
    /// the default when no subcommand is given.
    Serve,
    /// Runs a single `run_full` generation for one ad-hoc intent and
    /// prints the resulting `IvcuState` as JSON.
    Generate {
        /// Natural-language engineering intent.
        #[arg(long)]
        intent: String,
        /// Target language for the generated code.
        #[arg(long, default_value = "python")]
        language: String,
        /// Relative complexity, used by the cost oracle's estimate.
        #[arg(long, value_enum, default_value = "simple")]
        complexity: CliComplexity,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliComplexity {
    Simple,
    Medium,
    Complex,
    VeryComplex,
}

impl From<CliComplexity> for Complexity {
    fn from(value: CliComplexity) -> Self {
        match value {
            CliComplexity::Simple => Complexity::Simple,
            CliComplexity::Medium => Complexity::Medium,
            CliComplexity::Complex => Complexity::Complex,
            CliComplexity::VeryComplex => Complexity::VeryComplex,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("bad configuration: {e}");
            return ExitCode::from(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let stack = match composition::build(&config).await {
        Ok(stack) => stack,
        Err(e) => {
            error!(error = %e, "fatal error during startup");
            return ExitCode::from(1);
        }
    };

    let cli = Cli::parse();
    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_serve(&config, &stack).await,
        Commands::Generate {
            intent,
            language,
            complexity,
        } => run_generate(&stack, intent, language, complexity.into()).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal error");
            ExitCode::from(1)
        }
    }
}

/// Spawns the projection consumer loop and blocks until `ctrl_c`, then
/// signals it to stop over the same `watch` channel
/// `ProjectionConsumer::run` already expects.
async fn run_serve(config: &Config, stack: &Stack) -> anyhow::Result<()> {
    let consumer = composition::build_projection_consumer(config, stack);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!(bind_addr = %config.bind_addr, "ivcu-server starting (transport layer not part of this core; serving projections only)");
    let consumer_task = tokio::spawn(async move {
        consumer.run(shutdown_rx).await;
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown_tx.send(true).ok();
    consumer_task.await?;
    Ok(())
}

async fn run_generate(
    stack: &Stack,
    intent: String,
    language: String,
    complexity: Complexity,
) -> anyhow::Result<()> {
    let request = GenerationRequest {
        ivcu_id: Uuid::new_v4(),
        intent,
        language,
        contracts: Vec::new(),
        complexity,
        session_id: "cli".to_string(),
        routing_policy: stack.default_routing_policy.clone(),
        actor_id: Some("ivcu-server-cli".to_string()),
    };

    let state = stack.orchestrator.run_full(request).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
