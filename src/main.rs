//! ThreatQ lookup CLI.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use threatq_lookup::{Config, Entity, ThreatQClient};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "threatq-lookup")]
#[command(about = "Look up IPs, domains and hashes against a ThreatQ server")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "threatq.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Per-request deadline in milliseconds (defaults to request.timeout_ms)
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look up indicator values
    Lookup {
        /// IPs, CIDR ranges, domains or hashes
        #[arg(required = true)]
        values: Vec<String>,
    },
    /// Add a comment to an indicator
    Comment {
        /// Indicator ID
        #[arg(long)]
        indicator_id: u64,

        /// Comment text
        text: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --print-config
    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    // Initialize logging; stdout carries results, so logs go to stderr
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    info!(config = %args.config.display(), "Loading configuration");
    let config = Config::load(&args.config)?;

    // Handle --validate
    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let Some(command) = args.command else {
        anyhow::bail!("No command given; use `lookup` or `comment`");
    };

    let client = ThreatQClient::new(&config)?;
    let mut options = config.lookup_options();
    options.timeout = args.timeout_ms.map(Duration::from_millis);

    let output = match command {
        Command::Lookup { values } => {
            let entities: Vec<Entity> = values.iter().map(|v| Entity::infer(v)).collect();
            let results = client.lookup(&entities, &options).await?;
            info!(entities = entities.len(), results = results.len(), "Lookup finished");
            serde_json::to_string_pretty(&results)?
        }
        Command::Comment { indicator_id, text } => {
            let receipt = client.post_comment(indicator_id, &text, &options).await?;
            serde_json::to_string_pretty(&receipt)?
        }
    };

    println!("{}", output);
    Ok(())
}
