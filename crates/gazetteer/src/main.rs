use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use gazetteer_core::{
    HttpOracle, IngestPipeline, InputStore, OutputStore, RetryConfig, RetryingOracle, RunSummary,
};

#[derive(Parser)]
#[command(name = "gaz", about = "Worldstore ingestion and graph construction", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: load, normalize, classify, extract, assemble
    Run {
        /// Path to the raw worldstore (read-only)
        #[arg(short, long)]
        input: PathBuf,
        /// Path the output graph store is published to
        #[arg(short, long)]
        output: PathBuf,
        /// Classification oracle endpoint; without it ambiguous clusters
        /// degrade to unclassified
        #[arg(long)]
        oracle_url: Option<String>,
        /// Per-call oracle timeout in seconds
        #[arg(long, default_value_t = 30)]
        oracle_timeout: u64,
        /// Cap on oracle batches dispatched in one run
        #[arg(long)]
        max_oracle_calls: Option<u32>,
        /// Retries per oracle call on transient failure
        #[arg(long, default_value_t = 3)]
        oracle_retries: u32,
    },
    /// Print the entity and edge census of a published graph store
    Report {
        /// Path to the graph store
        store: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            output,
            oracle_url,
            oracle_timeout,
            max_oracle_calls,
            oracle_retries,
        } => {
            run(
                &input,
                &output,
                oracle_url.as_deref(),
                oracle_timeout,
                max_oracle_calls,
                oracle_retries,
            )
            .await
        }
        Commands::Report { store } => report(&store).await,
    }
}

async fn run(
    input: &Path,
    output: &Path,
    oracle_url: Option<&str>,
    oracle_timeout: u64,
    max_oracle_calls: Option<u32>,
    oracle_retries: u32,
) -> Result<()> {
    let store = InputStore::open(input)
        .await
        .with_context(|| format!("cannot open input store {}", input.display()))?;

    let mut pipeline = IngestPipeline::new();

    if let Some(url) = oracle_url {
        let http = HttpOracle::new(url, Duration::from_secs(oracle_timeout))
            .with_context(|| format!("invalid oracle endpoint {url}"))?;
        let retrying = RetryingOracle::new(
            Arc::new(http),
            RetryConfig {
                max_retries: oracle_retries,
                ..RetryConfig::default()
            },
        );
        pipeline = pipeline.with_oracle(Arc::new(retrying));
    }

    if let Some(limit) = max_oracle_calls {
        pipeline = pipeline.with_call_limit(limit);
    }

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let summary = pipeline.run(&store, output).await?;
    store.close().await;

    print_summary(&summary);
    println!("published {}", output.display());
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("records seen          {}", summary.records_seen);
    println!("placeholders dropped  {}", summary.placeholders_discarded);
    println!("unreadable            {}", summary.unreadable);
    println!("classified            {}", summary.total_classified());
    for (kind, count) in &summary.classified {
        println!("  {kind:<18}  {count}");
    }
    println!("entities emitted      {}", summary.entities_emitted);
    println!("fragments folded      {}", summary.fragments_folded);
    println!("edges emitted         {}", summary.edges_emitted);
    println!("dropped links         {}", summary.dropped_links);
    println!("broken cycles         {}", summary.broken_cycles);
    println!(
        "oracle calls          {} ({} clusters, {} failures)",
        summary.oracle_calls, summary.oracle_clusters, summary.oracle_failures
    );
    println!("duration              {} ms", summary.duration_ms);
}

async fn report(path: &Path) -> Result<()> {
    let store = OutputStore::open(path)
        .await
        .with_context(|| format!("cannot open graph store {}", path.display()))?;

    let census = store.census().await?;

    println!("entities ({} total)", census.total_entities());
    for (kind, count) in &census.entities {
        if *count > 0 {
            println!("  {kind:<18}  {count}");
        }
    }
    println!("edges");
    for (relation, count) in &census.edges {
        println!("  {relation:<18}  {count}");
    }
    println!("manifest rows         {}", census.manifest_rows);
    Ok(())
}
