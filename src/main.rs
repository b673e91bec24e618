use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use rss_seed::config::Config;
use rss_seed::{feed, sink};

#[derive(Parser, Debug)]
#[command(
    name = "rss-seed",
    about = "Aggregate an OPML list of RSS/Atom feeds into a JSON seed"
)]
struct Args {
    /// Config file (missing file means built-in defaults)
    #[arg(long, value_name = "FILE", default_value = "rss-seed.toml")]
    config: PathBuf,

    /// Write the JSON feed here instead of the configured path
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Seed this page instead of the configured one
    #[arg(long, value_name = "FILE")]
    index: Option<PathBuf>,

    /// Do not touch the page seed block
    #[arg(long)]
    no_seed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config '{}'", args.config.display()))?;
    if let Some(output) = args.output {
        config.output_path = output;
    }
    if let Some(index) = args.index {
        config.index_path = index;
    }

    let client = feed::build_client(&config).context("Failed to build HTTP client")?;

    let result = feed::run(&client, &config)
        .await
        .context("Failed to aggregate feeds")?;

    sink::write_json(&config.output_path, &result).context("Failed to write JSON feed")?;

    if !args.no_seed {
        // The page seed is best-effort; the JSON feed is already written
        if let Err(e) = sink::update_page_seed(&config.index_path, &result.items) {
            tracing::warn!(
                path = %config.index_path.display(),
                error = %e,
                "Failed to update page seed"
            );
        }
    }

    Ok(())
}
