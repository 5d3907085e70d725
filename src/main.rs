use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratekeeper::config::{LogFormat, LoggingConfig, RatekeeperConfig, StoreBackend};
use ratekeeper::ratelimit::{RateLimiter, RequestDescriptor, RuleIndex, RulesConfig};
use ratekeeper::store::{CounterStore, MemoryStore, RedisStore};

#[derive(Debug, Parser)]
#[command(name = "ratekeeper", version, about = "Fixed-window rate limit decisions")]
struct Cli {
    /// Service configuration file (YAML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Rate limit rules file, overriding `rules.path` from the configuration
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load the rules and check that they form a servable rule set
    Validate,
    /// Evaluate one descriptor batch against the counter store
    Check {
        /// Descriptor as `account=A,ip=1.1.1.1,type=search` (repeatable)
        #[arg(long = "descriptor", short = 'd')]
        descriptors: Vec<RequestDescriptor>,

        /// JSON file holding an array of descriptors
        #[arg(long)]
        batch: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = RatekeeperConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging);

    info!("Starting Ratekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let rules_path = cli
        .rules
        .clone()
        .or_else(|| config.rules.path.as_ref().map(PathBuf::from))
        .context("no rules file configured (set rules.path or pass --rules)")?;
    let rules = RulesConfig::from_file(&rules_path)?;
    let index = Arc::new(RuleIndex::from_config(rules)?);

    match cli.command {
        Command::Validate => {
            println!("{}: {} rules OK", rules_path.display(), index.len());
        }
        Command::Check {
            mut descriptors,
            batch,
        } => {
            if let Some(path) = batch {
                let contents = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading batch file {}", path.display()))?;
                let parsed: Vec<RequestDescriptor> = serde_json::from_str(&contents)
                    .with_context(|| format!("parsing batch file {}", path.display()))?;
                descriptors.extend(parsed);
            }

            match config.store.backend {
                StoreBackend::Redis => {
                    let store = RedisStore::connect(&config.store).await?;
                    check(RateLimiter::new(index, Arc::new(store)), &descriptors).await?;
                }
                StoreBackend::Memory => {
                    let store = MemoryStore::new();
                    check(RateLimiter::new(index, Arc::new(store)), &descriptors).await?;
                }
            }
        }
    }

    Ok(())
}

/// Run one decision and print the verdict with each descriptor's rule.
async fn check<S: CounterStore>(
    limiter: RateLimiter<S>,
    descriptors: &[RequestDescriptor],
) -> anyhow::Result<()> {
    let resolutions: Vec<_> = descriptors
        .iter()
        .map(|descriptor| {
            json!({
                "descriptor": descriptor,
                "rule_key": limiter.resolve(descriptor).map(|(key, _)| key.to_string_key()),
            })
        })
        .collect();

    let limited = limiter.should_limit(descriptors).await?;
    info!(limited, "Rate limit decision made");

    let report = json!({ "limited": limited, "descriptors": resolutions });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
