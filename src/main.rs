use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use logsieve::config::{EmbeddingBackend, Overrides, State, DIMENSIONS};
use logsieve::embedding::{Embedder, HashingEmbedder};
use logsieve::export::{write_atomic, ExportDocument};
use logsieve::ollama::{OllamaClient, OllamaEmbedder, OllamaSummarizer};
use logsieve::pipeline::Analyzer;
use logsieve::summarize::GuardedSummarizer;

#[derive(Parser)]
#[command(name = "logsieve")]
#[command(version = "0.1")]
#[command(about = "Cluster similar log lines and explain each cluster", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a directory of .log files and write the clustered result
    Analyze(RunArgs),
    /// Print the resolved configuration
    Config(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Directory containing .log files
    #[arg(long)]
    logs: Option<PathBuf>,
    /// Log format: auto, apache or linux
    #[arg(long)]
    format: Option<String>,
    /// Skip cluster summaries and alerts
    #[arg(long)]
    disable_ai: bool,
    #[arg(short, long)]
    verbose: bool,
    /// Where to write the JSON result
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl From<RunArgs> for Overrides {
    fn from(args: RunArgs) -> Self {
        Overrides {
            log_directory: args.logs,
            log_format: args.format,
            disable_ai: args.disable_ai,
            verbose: args.verbose,
            output: args.output,
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_embedder(state: &State, client: &OllamaClient) -> Result<Arc<dyn Embedder>> {
    if state.embedding_backend == EmbeddingBackend::Ollama {
        let embedder = OllamaEmbedder::new(client.clone(), &state.embedding_model, DIMENSIONS);
        match embedder.ping() {
            Ok(()) => return Ok(Arc::new(embedder)),
            Err(e) => warn!("{:#}; falling back to the hashing embedder", e),
        }
    }
    Ok(Arc::new(HashingEmbedder::new(DIMENSIONS)?))
}

fn report(document: &ExportDocument) {
    info!(
        "{} logs from {} files: {} clusters, {} noise",
        document.metadata.total_logs,
        document.metadata.total_files_searched,
        document.metadata.n_clusters,
        document.metadata.n_noise
    );
    for cluster in &document.clusters {
        info!("Cluster {} ({} logs): {}", cluster.cluster_id, cluster.log_count, cluster.cluster);
    }
    if let Some(score) = document.analysis.silhouette_score {
        info!("Silhouette score: {:.3}", score);
    }
    if !document.alerts.is_empty() {
        info!("{} alerts raised", document.alerts.len());
    }
}

fn analyze_command(state: &State) -> Result<()> {
    let client = OllamaClient::new(&state.ollama_url, state.summary_timeout);
    let embedder = build_embedder(state, &client)?;

    let mut analyzer = Analyzer::new(embedder)?;
    if state.ai_enhancement {
        let summarizer = OllamaSummarizer::new(client, &state.summary_model);
        analyzer = analyzer.with_summarizer(GuardedSummarizer::new(Arc::new(summarizer), state.summary_timeout));
    }

    let document = analyzer.run(state)?;
    write_atomic(&document, &state.output)
        .with_context(|| format!("Failed to write results to '{}'", state.output.display()))?;
    report(&document);
    Ok(())
}

fn config_command(state: &State) -> Result<()> {
    state.print_config();
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    match args.command {
        Commands::Analyze(run) => {
            let state = State::new(&run.into())?;
            init_tracing(state.verbose);
            analyze_command(&state)?
        }
        Commands::Config(run) => {
            let state = State::new(&run.into())?;
            config_command(&state)?
        }
    }
    Ok(())
}
