#![forbid(unsafe_code)]
//! chainfacade daemon: serves the JSON-RPC facade over a local header store.

use chainfacade::api::{run_api_server, ApiState};
use chainfacade::cache::{CacheStore, CachingPeerNetwork, LruCacheStore, TransactionCache};
use chainfacade::config::load_config;
use chainfacade::electrum::ElectrumClient;
use chainfacade::facade::{QueryFacade, ServiceInfo};
use chainfacade::network::PeerClient;
use chainfacade::persistence::SqliteRepository;
use chainfacade::resolver::RetryPolicy;
use chainfacade::sources::PeerNetwork;
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "chainfacade.toml")]
    config: PathBuf,

    /// Overrides `api.bind`
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.api.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "Starting chainfacade v{} (chain = {})",
        config.service.version, config.service.chain
    );

    if let Some(parent) = Path::new(&config.database.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let repository = Arc::new(SqliteRepository::open(&config.database.path)?);

    let electrum = Arc::new(ElectrumClient::new(
        config.electrum.address.clone(),
        config.electrum.timeout(),
    ));
    let mut peers: Arc<dyn PeerNetwork> = Arc::new(
        PeerClient::new(
            config.p2p.peers.clone(),
            config.p2p.magic()?,
            config.p2p.timeout(),
        )
        .with_user_agent(config.p2p.user_agent.clone()),
    );

    let store: Option<Arc<dyn CacheStore>> = config
        .cache
        .enabled
        .then(|| Arc::new(LruCacheStore::new(config.cache.capacity)) as Arc<dyn CacheStore>);
    if let Some(store) = &store {
        peers = Arc::new(CachingPeerNetwork::new(peers, store.clone()));
    }

    let mut facade = QueryFacade::new(repository, peers, electrum.clone())
        .with_retry_policy(RetryPolicy::from(&config.retry))
        .with_service_info(ServiceInfo::from(&config.service));

    let mut state_cache = None;
    if let Some(store) = store {
        facade = facade.with_cache(store.clone());
        state_cache = Some(TransactionCache::new(store));
    }
    facade.add_source(electrum);
    info!(
        "Registered {} transaction source(s), {} p2p peer(s)",
        facade.registry().len(),
        config.p2p.peers.len()
    );

    let mut state = ApiState::new(Arc::new(facade));
    if let Some(cache) = state_cache {
        state = state.with_transaction_cache(cache);
    }

    let bind = match cli.bind {
        Some(bind) => bind,
        None => config.api.bind.parse()?,
    };
    run_api_server(state, bind).await?;
    Ok(())
}
