//! Application entry point.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dotenvy::dotenv;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use evm_tx_dispatcher::app::{
    BatchDispatcher, DispatcherConfig, NetworkSubmitter, TriggerConfig, UserOpSubmitter,
    spawn_dispatcher,
};
use evm_tx_dispatcher::domain::{AppError, ConfigError};
use evm_tx_dispatcher::infra::database::{PostgresQueueStore, PostgresSubscriptionStore};
use evm_tx_dispatcher::infra::network::{HttpRelayClient, HttpSignerClient, StaticNetworks};
use evm_tx_dispatcher::infra::webhook::{AlertThrottle, SubscriptionCache, WebhookNotifier};

/// Application configuration
struct Config {
    database_url: String,
    /// chain id to RPC endpoint, parsed from `NETWORK_RPC_URLS`
    rpc_urls: HashMap<i64, String>,
    signer_url: String,
    relay_url: String,
    enable_dispatcher: bool,
    poll_interval_secs: u64,
    dispatcher_config: DispatcherConfig,
}

impl Config {
    fn from_env() -> Result<Self> {
        let database_url = required_var("DATABASE_URL")?;
        let rpc_urls = Self::parse_rpc_urls(&required_var("NETWORK_RPC_URLS")?)?;
        let signer_url = required_var("SIGNER_URL")?;
        let relay_url = required_var("RELAY_URL")?;

        let enable_dispatcher = env::var("ENABLE_DISPATCHER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true);

        let poll_interval_secs = env::var("POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5);

        let batch_size = env::var("BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(100);

        let cycle_timeout_secs = env::var("CYCLE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(300);

        let max_stale_nonce_retries = env::var("MAX_STALE_NONCE_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(5);

        Ok(Self {
            database_url,
            rpc_urls,
            signer_url,
            relay_url,
            enable_dispatcher,
            poll_interval_secs,
            dispatcher_config: DispatcherConfig {
                batch_size,
                cycle_timeout: Duration::from_secs(cycle_timeout_secs),
                max_stale_nonce_retries,
            },
        })
    }

    /// Parse `NETWORK_RPC_URLS` of the form `1=https://a,137=https://b`
    fn parse_rpc_urls(raw: &str) -> Result<HashMap<i64, String>> {
        let mut urls = HashMap::new();
        for entry in raw.split(',').filter(|e| !e.trim().is_empty()) {
            let (chain, url) = entry
                .split_once('=')
                .ok_or_else(|| invalid_var("NETWORK_RPC_URLS", format!("entry '{entry}' is not chain=url")))?;
            let chain_id: i64 = chain.trim().parse().map_err(|_| {
                invalid_var("NETWORK_RPC_URLS", format!("'{chain}' is not a chain id"))
            })?;
            urls.insert(chain_id, url.trim().to_string());
        }
        if urls.is_empty() {
            return Err(invalid_var("NETWORK_RPC_URLS", "no endpoints configured").into());
        }
        Ok(urls)
    }
}

fn required_var(name: &str) -> Result<String> {
    env::var(name)
        .map_err(|_| anyhow::Error::new(AppError::Config(ConfigError::Missing(name.to_string()))))
}

fn invalid_var(field: &str, message: impl Into<String>) -> AppError {
    AppError::Config(ConfigError::Invalid {
        field: field.to_string(),
        message: message.into(),
    })
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("🏗️  EVM Transaction Dispatcher v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    info!("📦 Initializing infrastructure...");

    let queue_store = Arc::new(PostgresQueueStore::with_defaults(&config.database_url).await?);
    queue_store.run_migrations().await?;
    info!("   ✓ Database connected and migrations applied");

    let subscription_store = Arc::new(PostgresSubscriptionStore::new(queue_store.pool().clone()));

    let networks = Arc::new(StaticNetworks::from_rpc_urls(
        config.rpc_urls.iter().map(|(id, url)| (*id, url.clone())),
    )?);
    info!("   ✓ {} network clients registered", config.rpc_urls.len());

    let signer = Arc::new(HttpSignerClient::new(&config.signer_url)?);
    info!("   ✓ Signer client created");

    let relay = Arc::new(HttpRelayClient::new(&config.relay_url)?);
    info!("   ✓ Relay client created");

    let cache = Arc::new(SubscriptionCache::new(subscription_store));
    let notifier = Arc::new(WebhookNotifier::new(
        Arc::clone(&queue_store) as _,
        cache,
        AlertThrottle::default(),
    )?);
    info!("   ✓ Webhook notifier created");

    let submitter = Arc::new(NetworkSubmitter::new(
        Arc::clone(&networks) as _,
        Arc::clone(&signer) as _,
        Arc::clone(&notifier),
        config.dispatcher_config.max_stale_nonce_retries,
    ));
    let user_op_submitter = Arc::new(UserOpSubmitter::new(signer, relay));

    let dispatcher = Arc::new(BatchDispatcher::new(
        queue_store,
        submitter,
        user_op_submitter,
        Arc::clone(&notifier),
        config.dispatcher_config.clone(),
    ));

    let trigger_config = TriggerConfig {
        poll_interval: Duration::from_secs(config.poll_interval_secs),
        enabled: config.enable_dispatcher,
    };
    let (dispatcher_handle, shutdown_tx) = spawn_dispatcher(dispatcher, trigger_config);
    if config.enable_dispatcher {
        info!(
            "🚀 Dispatcher running (poll: {}s, batch: {})",
            config.poll_interval_secs, config.dispatcher_config.batch_size
        );
    } else {
        info!("   ○ Dispatcher disabled");
    }

    shutdown_signal().await;

    let _ = shutdown_tx.send(true);
    let _ = dispatcher_handle.await;

    info!("Shutdown complete");
    Ok(())
}
