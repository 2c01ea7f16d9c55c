//! Orchestrator DB - command line
//!
//! Operator tool for the Neo4j access layer. Logs go to stderr so stdout
//! only carries command output.
//!
//! ```bash
//! # Verify the configured server is reachable
//! orchestrator-db check
//!
//! # Run a statement through the retrying executor
//! orchestrator-db query --write "MERGE (p:Project {slug: 'demo'})"
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use neo4rs::query;
use orchestrator_db::neo4j::TxRef;
use orchestrator_db::{Config, DbContext};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "orchestrator-db")]
#[command(about = "Transactional Neo4j access layer for the project orchestrator")]
#[command(version)]
struct Cli {
    /// Path to a YAML config file (defaults to ./config.yaml when present)
    #[arg(long, env = "ORCHESTRATOR_DB_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, verify connectivity and print pool statistics
    Check,

    /// Run a Cypher statement inside a retrying transaction
    Query {
        /// Cypher statement
        cypher: String,

        /// Use a write transaction (default is read)
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = Config::from_yaml_and_env(cli.config.as_deref())?;
    info!(uri = %config.neo4j_uri, "Starting orchestrator-db");
    let ctx = DbContext::new(config);

    let outcome = match cli.command {
        Commands::Check => run_check(&ctx).await,
        Commands::Query { cypher, write } => run_query(&ctx, cypher, write).await,
    };

    ctx.shutdown().await?;
    outcome
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,orchestrator_db=debug"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run_check(ctx: &DbContext) -> Result<()> {
    ctx.driver.get_driver().await?;
    let stats = ctx.pool_stats();
    println!(
        "{}",
        serde_json::json!({
            "connected": ctx.driver.is_connected().await,
            "uri": ctx.config.neo4j_uri,
            "database": ctx.config.neo4j_database,
            "pool": stats,
        })
    );
    Ok(())
}

async fn run_query(ctx: &DbContext, cypher: String, write: bool) -> Result<()> {
    let statement = move |tx: TxRef| {
        let cypher = cypher.clone();
        async move { tx.fetch(query(&cypher)).await }
    };

    let result = if write {
        ctx.write(statement).await?
    } else {
        ctx.read(statement).await?
    };

    println!(
        "{}",
        serde_json::json!({
            "mode": if write { "write" } else { "read" },
            "rows": result.data.len(),
            "retries": result.retries,
            "duration_ms": result.duration_ms,
        })
    );
    Ok(())
}
