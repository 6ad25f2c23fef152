//! entitlement-sync: inspect and follow a user's subscription tier
//!
//! Drives the engine against the billing provider's REST API:
//! - `status`  configure, refresh, print the resolved tier
//! - `restore` run a manual purchase restore
//! - `watch`   print every tier change until ctrl-c

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use entitlement_sync::{
    EngineConfig, EntitlementEngine, FileTierCache, HttpBillingClient, MemoryTierCache, TierCache,
};

#[derive(Parser)]
#[command(name = "entitlement-sync")]
#[command(about = "Subscription tier synchronization against the billing provider")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "entitlement-sync.toml")]
    config: String,

    /// Billing API key (overrides config file)
    #[arg(long, env = "ENTITLEMENT_SYNC_API_KEY")]
    api_key: Option<String>,

    /// Local user id to bind (anonymous if omitted)
    #[arg(short, long, env = "ENTITLEMENT_SYNC_USER")]
    user: Option<String>,

    /// Tier cache file (overrides config file)
    #[arg(long)]
    tier_cache: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved tier
    Status,
    /// Restore purchases and print the resulting tier
    Restore,
    /// Print tier changes until interrupted
    Watch,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("entitlement_sync=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = EngineConfig::from_file(&cli.config)?;
    if let Some(api_key) = cli.api_key {
        config.api_key = api_key;
    }
    if let Some(path) = cli.tier_cache {
        config.tier_cache_path = Some(path);
    }

    let cache: Arc<dyn TierCache> = match &config.tier_cache_path {
        Some(path) => Arc::new(FileTierCache::new(path)),
        None => Arc::new(MemoryTierCache::new()),
    };
    let billing = Arc::new(HttpBillingClient::from_config(&config));
    let engine = EntitlementEngine::new(config, billing, cache);

    info!(user = ?cli.user, "Starting entitlement engine");
    engine.start(cli.user.as_deref()).await?;

    match cli.command {
        Command::Status => {
            let snapshot = engine.safe_refresh().await?;
            engine.settle().await;
            let state = engine.read();
            println!(
                "{}",
                serde_json::json!({
                    "tier": state.tier,
                    "initialized": state.initialized,
                    "identity": snapshot.original_app_user_id.as_str(),
                    "entitlements": snapshot.entitlements,
                })
            );
        }
        Command::Restore => {
            engine.request_manual_restore().await?;
            println!("{}", engine.read().tier);
        }
        Command::Watch => {
            println!("{}", engine.read().tier);
            let _subscription = engine.on_change(|state| {
                println!("{} (initialized: {})", state.tier, state.initialized);
            });
            tokio::signal::ctrl_c().await?;
            info!("Interrupted, shutting down");
        }
    }

    Ok(())
}
