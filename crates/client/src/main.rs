//! `rolodex-client` entry point.
//!
//! Opens the local store, starts the sync engine, loads the record list and
//! keeps the push and reconnect listeners running until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, bail};
use rolodex_client::{ClientConfig, ConnectivityMonitor, HttpGateway, RecordStore, SqliteRecordStore, SyncEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rolodex_observability::init();

    let config = ClientConfig::from_env()?;
    tracing::info!(api_url = %config.gateway.api_url, db = %config.db_path.display(), "starting rolodex client");

    let store = SqliteRecordStore::open(&config.db_path)
        .await
        .with_context(|| format!("failed to open {}", config.db_path.display()))?;

    let token = match config.token.clone() {
        Some(token) => {
            store.set_session_token(&token).await?;
            token
        }
        None => match store.session_token().await? {
            Some(token) => token,
            None => bail!("no auth token: set ROLODEX_AUTH_TOKEN"),
        },
    };

    let gateway = HttpGateway::new(config.gateway.clone())?;
    let engine = SyncEngine::start(
        config.engine.clone(),
        Arc::new(store),
        Arc::new(gateway),
        ConnectivityMonitor::default(),
        token,
    );

    if let Err(err) = engine.fetch().await {
        tracing::error!("initial fetch failed: {err}");
    }
    let state = engine.snapshot();
    tracing::info!(
        records = state.records.len(),
        pending = state.pending().count(),
        degraded = state.degraded,
        "record list loaded"
    );

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    engine.dispose().await;
    Ok(())
}
