use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

mod app;
mod http;

#[derive(Parser)]
#[command(name = "parley-gateway", version, about = "Chat relay between GroupMe/SMS and an LLM")]
struct Args {
    /// Path to parley.toml (default: ~/.parley/parley.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_gateway=info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config =
        parley_core::config::ParleyConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            parley_core::config::ParleyConfig::default()
        });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    // initialize SQLite database
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    let store = Arc::new(parley_memory::ConversationStore::new(db)?);
    info!("database migrations complete");

    let (provider, model) = build_provider(&config);
    let provider: Arc<dyn parley_agent::provider::LlmProvider> = Arc::from(provider);

    let groupme_client = config
        .groupme
        .as_ref()
        .map(parley_groupme::GroupMeClient::new);

    // Poller shutdown signal, flipped after the HTTP server exits.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    // Webhook and poller share this so a message answered over the webhook
    // isn't answered again by the next poll cycle.
    let ledger = Arc::new(parley_groupme::MessageLedger::new());

    match (config.groupme.as_ref(), groupme_client.clone()) {
        (Some(groupme_cfg), Some(client)) => {
            let poller = parley_groupme::GroupMePoller::new(
                groupme_cfg,
                client,
                Arc::clone(&store),
                Arc::clone(&provider),
                model.clone(),
                Arc::clone(&ledger),
            );
            tokio::spawn(async move { poller.run(shutdown_rx).await });
        }
        _ => {
            info!("no [groupme] config — poller disabled");
            drop(shutdown_rx);
        }
    }

    let state = Arc::new(app::AppState {
        config,
        store,
        provider,
        model,
        groupme: groupme_client,
        ledger,
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Parley gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // signal poller to stop
    let _ = shutdown_tx.send(true);
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

/// Build the completion provider from config, falling back to the
/// OPENAI_API_KEY env var, then to a null provider that errors on use.
fn build_provider(
    config: &parley_core::config::ParleyConfig,
) -> (Box<dyn parley_agent::provider::LlmProvider>, String) {
    if let Some(ref provider) = config.provider {
        info!(model = %provider.model, base_url = %provider.base_url, "LLM provider: OpenAI");
        return (
            Box::new(parley_agent::OpenAiProvider::new(
                provider.api_key.clone(),
                Some(provider.base_url.clone()),
            )),
            provider.model.clone(),
        );
    }

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        info!("LLM provider: OpenAI (from env)");
        return (
            Box::new(parley_agent::OpenAiProvider::new(key, None)),
            "gpt-4o-mini".to_string(),
        );
    }

    tracing::warn!("No LLM provider configured — replies will fall back");
    (Box::new(NullProvider), "gpt-4o-mini".to_string())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

/// Placeholder provider when no API key is available.
struct NullProvider;

#[async_trait::async_trait]
impl parley_agent::provider::LlmProvider for NullProvider {
    fn name(&self) -> &str {
        "null"
    }
    async fn send(
        &self,
        _req: &parley_agent::provider::ChatRequest,
    ) -> Result<parley_agent::provider::ChatResponse, parley_agent::provider::ProviderError> {
        Err(parley_agent::provider::ProviderError::Unavailable(
            "no LLM provider configured — set provider.api_key in parley.toml".into(),
        ))
    }
}
