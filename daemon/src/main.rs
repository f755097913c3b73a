//! coffer daemon: runs the chain service as a watch-only process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use coffer_annotation::{
    AnnotationEngine, AssetRegistry, LocalNames, NameBatcher, NameResolver, ResolverChain,
};
use coffer_chain::{init_logging, ChainConfig, ChainService, ShutdownController, TrackedAccountConfig};
use coffer_gateway::{JsonRpcProvider, JsonRpcProviderConfig, ProviderGateway, ProviderRegistry};
use coffer_store::ChainStore;
use coffer_store_lmdb::environment::DEFAULT_MAP_SIZE;
use coffer_store_lmdb::LmdbEnvironment;
use coffer_types::{Clock, SystemClock};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "coffer-daemon", about = "coffer chain-state daemon")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "COFFER_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the LMDB store.
    #[arg(long, env = "COFFER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level filter, e.g. "info" or "debug,coffer_chain=trace".
    #[arg(long, env = "COFFER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output: "human" or "json".
    #[arg(long, env = "COFFER_LOG_FORMAT")]
    log_format: Option<String>,

    /// RPC endpoint of the first configured network.
    #[arg(long, env = "COFFER_RPC_URL")]
    rpc_url: Option<String>,

    /// WebSocket endpoint of the first configured network.
    #[arg(long, env = "COFFER_WS_URL")]
    ws_url: Option<String>,

    /// Accounts to track, as "chain_id:address" (comma-separated).
    #[arg(long, env = "COFFER_TRACK", value_delimiter = ',')]
    track: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the chain service until SIGINT or SIGTERM.
    Run,
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Config => {
            println!("{}", config.to_toml_string());
            Ok(())
        }
        Command::Run => {
            init_logging(config.log_format()?, &config.log_level).map_err(anyhow::Error::msg)?;
            if let Some(path) = &cli.config {
                info!(path = %path.display(), "loaded config");
            }
            run(config).await
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ChainConfig> {
    let mut config = match &cli.config {
        Some(path) => ChainConfig::from_toml_file(path)
            .with_context(|| format!("reading config file {}", path.display()))?,
        None => ChainConfig::default(),
    };

    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.log_format = format.clone();
    }
    if cli.rpc_url.is_some() || cli.ws_url.is_some() {
        let network = config
            .networks
            .first_mut()
            .context("--rpc-url/--ws-url given but no network is configured")?;
        if let Some(url) = &cli.rpc_url {
            network.rpc_url = url.clone();
        }
        if let Some(url) = &cli.ws_url {
            network.ws_url = Some(url.clone());
        }
    }
    for entry in &cli.track {
        let (chain_id, address) = entry
            .split_once(':')
            .with_context(|| format!("tracked account {entry:?} is not chain_id:address"))?;
        config.tracked_accounts.push(TrackedAccountConfig {
            chain_id: chain_id
                .trim()
                .parse()
                .with_context(|| format!("invalid chain id in {entry:?}"))?,
            address: address.trim().to_string(),
        });
    }
    Ok(config)
}

async fn run(config: ChainConfig) -> anyhow::Result<()> {
    let records = LmdbEnvironment::open(&config.data_dir, DEFAULT_MAP_SIZE)
        .with_context(|| format!("opening store at {}", config.data_dir.display()))?;
    let store = Arc::new(ChainStore::new(Arc::new(records), config.store_windows()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let assets = Arc::new(AssetRegistry::new());

    let mut providers = ProviderRegistry::new();
    let mut reverse_records = HashMap::new();
    for network_config in &config.networks {
        let network = network_config.network();
        let mut provider_config =
            JsonRpcProviderConfig::new(network.clone(), network_config.rpc_url.clone());
        provider_config.ws_url = network_config.ws_url.clone();
        provider_config.multicall = network_config.multicall()?;
        let provider: Arc<dyn ProviderGateway> = Arc::new(
            JsonRpcProvider::new(provider_config)
                .with_context(|| format!("connecting to {network}"))?,
        );

        assets.extend(network_config.fungible_assets()?).await;
        if let Some(contract) = network_config.reverse_records()? {
            reverse_records.insert(
                network.chain_id,
                NameBatcher::spawn(
                    Arc::clone(&provider),
                    contract,
                    config.name_batch_debounce(),
                    config.name_batch_max,
                ),
            );
        }
        info!(
            network = %network,
            rpc = %network_config.rpc_url,
            subscriptions = network_config.ws_url.is_some(),
            "provider configured"
        );
        providers.insert(provider);
    }

    let mut resolvers = vec![
        NameResolver::Local(Arc::new(LocalNames::new())),
        NameResolver::Asset(Arc::clone(&assets)),
    ];
    if !reverse_records.is_empty() {
        resolvers.push(NameResolver::ReverseRecords(reverse_records));
    }
    let annotation = Arc::new(AnnotationEngine::new(
        providers.clone(),
        assets,
        ResolverChain::new(resolvers),
        Arc::clone(&store),
        Arc::clone(&clock),
    ));

    let service = Arc::new(ChainService::new(
        store,
        providers,
        annotation,
        clock,
        config.service_settings(),
    ));
    for account in config.tracked_accounts()? {
        if let Err(e) = service.track_account(account.clone()).await {
            warn!(account = %account, error = %e, "could not track configured account");
        }
    }

    info!(
        data_dir = %config.data_dir.display(),
        networks = config.networks.len(),
        tracked = service.tracked_accounts()?.len(),
        "starting coffer chain service"
    );
    service.start();

    let signal = ShutdownController::new().wait_for_signal().await;
    info!(?signal, "shutdown requested");
    service.stop().await?;
    debug!(metrics = %service.metrics().encode(), "final metrics");

    info!("coffer daemon exited cleanly");
    Ok(())
}
