/*
serendipity - single-binary main.rs
This binary starts the Rocket HTTP server, or runs one aggregation pass and prints it.
*/

use anyhow::Result;
use clap::Parser;
use common::Config;
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use serendipity::aggregate::{run_aggregation, RunTicket};
use serendipity::server::{self, AppState};

#[derive(Parser, Debug)]
#[command(name = "serendipity", about = "Veterinary AI news aggregator and digest server")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run one aggregation, print the topic summary as JSON and exit
    #[arg(long)]
    aggregate_once: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    if args.aggregate_once {
        return aggregate_once(config).await;
    }

    server::launch_rocket(config).await
}

async fn aggregate_once(config: Config) -> Result<()> {
    let state = AppState::from_config(config);
    let ticket = RunTicket::detached();
    let run = run_aggregation(&state.search_gateway(), &state.pacing(), ticket).await?;

    let topics: Vec<_> = run
        .clusters
        .sorted_by_size()
        .into_iter()
        .map(|c| json!({ "topic": c.topic, "count": c.articles.len() }))
        .collect();

    let summary = json!({
        "runId": run.run_id,
        "articles": run.articles.len(),
        "topics": topics,
        "outcomes": run.outcomes,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
