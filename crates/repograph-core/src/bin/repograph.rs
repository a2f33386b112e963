use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use repograph_core::logging::{self, LogFormat};
use repograph_core::models::JobStatus;
use repograph_core::repository::LocalRepository;
use repograph_core::{EngineConfig, Orchestrator};

/// Build a dependency graph of a source repository
#[derive(Parser, Debug)]
#[command(name = "repograph", version)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log format on stderr
    #[arg(long, global = true, default_value = "text")]
    format: LogFormat,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyse a local directory and print the result as JSON
    Analyze {
        dir: PathBuf,

        #[arg(long, value_enum, default_value_t = Output::Graph)]
        output: Output,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Output {
    Graph,
    Coverage,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.format, cli.verbose)?;
    let config = EngineConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze { dir, output } => analyze(config, dir, output).await,
    }
}

async fn analyze(config: EngineConfig, dir: PathBuf, output: Output) -> Result<()> {
    let dir = dir
        .canonicalize()
        .with_context(|| format!("cannot open {}", dir.display()))?;
    let repo_ref = dir.to_string_lossy().into_owned();

    let orchestrator = Orchestrator::builder(config, std::sync::Arc::new(LocalRepository::new()))
        .start()
        .await?;
    let job_id = orchestrator.submit(&repo_ref).await?;
    let view = orchestrator.wait(&job_id).await?;
    if view.status != JobStatus::Complete {
        orchestrator.shutdown().await;
        bail!(
            "analysis of {repo_ref} failed after {} attempt(s): {}",
            view.attempt_count,
            view.failure_reason.unwrap_or_default()
        );
    }

    let graph = orchestrator.get_result(&job_id).await?;
    let json = match output {
        Output::Graph => serde_json::to_string_pretty(&*graph)?,
        Output::Coverage => serde_json::to_string_pretty(&graph.coverage)?,
    };
    println!("{json}");
    orchestrator.shutdown().await;
    Ok(())
}
