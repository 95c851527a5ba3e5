use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use agentdeck::api::{self, ApiState};
use agentdeck::chat::ChatManager;
use agentdeck::config::Config;
use agentdeck::events::EventBus;
use agentdeck::questions::QuestionBridge;
use agentdeck::services::ServiceManager;
use agentdeck::store::Store;
use agentdeck::supervisor::Supervisor;
use agentdeck::tasks::TaskManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config::from_env()?);
    tracing::info!(host = %config.host, port = config.port, "starting agentdeck");

    let store = Store::open(&config.database_path).await?;
    let bus = EventBus::new();
    let supervisor = Supervisor::new(config.stop_grace);

    let tasks = TaskManager::new(
        store.clone(),
        supervisor.clone(),
        bus.clone(),
        Arc::clone(&config),
    );
    tasks.recover_orphans().await?;

    let chat = ChatManager::new(
        store.clone(),
        supervisor.clone(),
        bus.clone(),
        tasks.clone(),
        Arc::clone(&config),
    )?;
    let services = ServiceManager::load(
        Path::new(&config.services_file),
        supervisor.clone(),
        bus.clone(),
    )?;
    let bridge = QuestionBridge::new(
        store.clone(),
        bus.clone(),
        tasks.clone(),
        Arc::clone(&config),
    );

    let state = ApiState {
        store,
        tasks: tasks.clone(),
        chat: chat.clone(),
        services: services.clone(),
        bridge,
        bus,
        config: Arc::clone(&config),
    };
    let app = api::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    chat.shutdown().await;
    services.shutdown().await;
    tasks.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
    }
}
