//! Operations CLI: bootstrap the search artifacts, seed the graph store,
//! and run smoke checks.
//!
//! ```bash
//! bv_ops bootstrap --vector
//! bv_ops seed --dir ./seeds
//! bv_ops smoke
//! ```
//!
//! Exits 0 on success, non-zero otherwise.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use batvault_gateway::config::Settings;
use batvault_gateway::resolver::arango::ArangoSearchBackend;

#[derive(Parser)]
#[command(name = "bv_ops", about = "BatVault operations tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the text_en analyzer and the nodes_search view; optionally
    /// the 768-dim HNSW vector index.
    Bootstrap {
        /// Also create the vec_hnsw_768 vector index.
        #[arg(long)]
        vector: bool,
    },
    /// Load node/edge JSON documents from a directory into the graph store.
    Seed {
        #[arg(long)]
        dir: PathBuf,
    },
    /// End-to-end smoke checks against the running gateway and Memory API.
    Smoke,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bv_ops=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env();

    match cli.command {
        Command::Bootstrap { vector } => bootstrap(&settings, vector).await,
        Command::Seed { dir } => seed(&settings, &dir).await,
        Command::Smoke => smoke(&settings).await,
    }
}

async fn bootstrap(settings: &Settings, vector: bool) -> anyhow::Result<()> {
    let arango = ArangoSearchBackend::new(&settings.arango, Duration::from_secs(10))
        .map_err(|e| anyhow::anyhow!("arango client: {e}"))?;

    arango
        .ensure_analyzer()
        .await
        .map_err(|e| anyhow::anyhow!("analyzer bootstrap: {e}"))?;
    arango
        .ensure_view()
        .await
        .map_err(|e| anyhow::anyhow!("view bootstrap: {e}"))?;
    if vector {
        arango
            .ensure_vector_index(settings.embedding_dim)
            .await
            .map_err(|e| anyhow::anyhow!("vector index bootstrap: {e}"))?;
    }
    println!("bootstrap complete (vector index: {})", vector);
    Ok(())
}

async fn seed(settings: &Settings, dir: &PathBuf) -> anyhow::Result<()> {
    let arango = ArangoSearchBackend::new(&settings.arango, Duration::from_secs(30))
        .map_err(|e| anyhow::anyhow!("arango client: {e}"))?;

    let mut documents: Vec<serde_json::Value> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("reading seed dir {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", path.display()))?;
        match value {
            serde_json::Value::Array(items) => documents.extend(items),
            other => documents.push(other),
        }
    }
    anyhow::ensure!(!documents.is_empty(), "no .json seed files in {}", dir.display());

    let inserted = arango
        .insert_documents(&documents)
        .await
        .map_err(|e| anyhow::anyhow!("seed insert: {e}"))?;
    println!("seeded {inserted} documents");
    Ok(())
}

async fn smoke(settings: &Settings) -> anyhow::Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    // Gateway liveness + public config.
    let health_url = format!("{}/healthz", settings.gateway_base);
    let health = client.get(&health_url).send().await?;
    anyhow::ensure!(health.status().is_success(), "healthz returned {}", health.status());
    println!("gateway healthz: ok");

    let config_url = format!("{}/config", settings.gateway_base);
    let config: serde_json::Value = client.get(&config_url).send().await?.json().await?;
    anyhow::ensure!(
        config.get("endpoints").is_some(),
        "config missing endpoints block"
    );
    println!("gateway config: ok");

    // Memory API schema surface.
    let rels_url = format!("{}/api/schema/rels", settings.memory_api_base);
    let rels = client.get(&rels_url).send().await?;
    anyhow::ensure!(rels.status().is_success(), "schema/rels returned {}", rels.status());
    println!("memory schema/rels: ok");

    println!("smoke checks passed");
    Ok(())
}
