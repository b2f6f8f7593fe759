//! Deploy tooling for pwacache.
//!
//! ## Usage
//!
//! ```bash
//! # Start a new deployment: bump the cache version and the bootstrap revision
//! pwacache bump --config pwacache.json --index public/index.html
//!
//! # Show the cache name and the resolved manifest
//! pwacache manifest --config pwacache.json --origin https://app.example/
//!
//! # Dry-run an install/update cycle against a build directory
//! pwacache simulate --config pwacache.json --root public/
//! ```

use clap::{Parser, Subcommand};
use pwacache_common::{init_logging, AppConfig, LogConfig, LogFormat};
use pwacache_worker::ResourceManifest;
use std::path::PathBuf;
use url::Url;

mod bump;
mod simulate;

#[derive(Parser)]
#[command(name = "pwacache")]
#[command(about = "Deploy tooling for versioned offline caches")]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Increment the cache version and the bootstrap script revision
    Bump {
        /// Configuration file
        #[arg(short, long, default_value = "pwacache.json")]
        config: PathBuf,
        /// HTML document referencing the bootstrap script
        #[arg(short, long)]
        index: Option<PathBuf>,
    },

    /// Print the cache name and the resolved manifest
    Manifest {
        /// Configuration file
        #[arg(short, long, default_value = "pwacache.json")]
        config: PathBuf,
        /// Origin the manifest is resolved against
        #[arg(long, default_value = "https://localhost/")]
        origin: Url,
    },

    /// Run an install and update cycle against a static directory
    Simulate {
        /// Configuration file
        #[arg(short, long, default_value = "pwacache.json")]
        config: PathBuf,
        /// Directory served as the origin
        #[arg(short, long)]
        root: PathBuf,
        /// Origin the directory is served at
        #[arg(long, default_value = "https://localhost/")]
        origin: Url,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    if cli.json_logs {
        log_config = log_config.with_format(LogFormat::Json);
    }
    init_logging(log_config);

    match cli.command {
        Commands::Bump { config, index } => {
            let report = bump::bump(&config, index.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Manifest { config, origin } => {
            let config = AppConfig::load(&config)?;
            let manifest = ResourceManifest::new(config.cache.manifest.iter().cloned())?;
            let urls: Vec<String> = manifest
                .resolve(&origin)?
                .into_iter()
                .map(String::from)
                .collect();
            let output = serde_json::json!({
                "cache": config.cache.cache_name(),
                "resources": urls,
                "no_cache": config.cache.no_cache,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }

        Commands::Simulate {
            config,
            root,
            origin,
        } => {
            let config = AppConfig::load(&config)?;
            let report = simulate::simulate(&config, &root, origin).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
