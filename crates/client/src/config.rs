//! Engine and process configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::gateway::HttpGatewayConfig;
use crate::store::SqliteRecordStore;
use crate::types::AuthToken;

/// Tuning knobs for [`crate::SyncEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound for any single gateway call. Elapsed calls count as
    /// disconnected and take the local fallback path.
    pub remote_timeout: Duration,
    /// Persist a `Synced` copy after every confirmed remote write instead of
    /// dropping the local entry, so an offline fetch still has data to show.
    pub keep_synced_copies: bool,
    /// Capacity of the action queue feeding the dispatcher.
    pub dispatch_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(10),
            keep_synced_copies: false,
            dispatch_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn with_keep_synced_copies(mut self, keep: bool) -> Self {
        self.keep_synced_copies = keep;
        self
    }

    pub fn with_dispatch_capacity(mut self, capacity: usize) -> Self {
        self.dispatch_capacity = capacity.max(1);
        self
    }
}

/// Process configuration for the `rolodex-client` binary.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub gateway: HttpGatewayConfig,
    pub token: Option<AuthToken>,
    pub db_path: PathBuf,
    pub engine: EngineConfig,
}

impl ClientConfig {
    /// Read configuration from the environment.
    ///
    /// - `ROLODEX_API_URL` (default `http://localhost:3000`)
    /// - `ROLODEX_WS_URL` (default derived from the API URL)
    /// - `ROLODEX_AUTH_TOKEN` (optional; falls back to the stored session)
    /// - `ROLODEX_DB_PATH` (default `{data_dir}/rolodex/records.db`)
    /// - `ROLODEX_REMOTE_TIMEOUT_SECS` (default 10)
    /// - `ROLODEX_KEEP_SYNCED_COPIES` (`1`/`true` to enable)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let api_url = lookup("ROLODEX_API_URL").unwrap_or_else(|| "http://localhost:3000".to_string());

        let mut engine = EngineConfig::default();
        if let Some(secs) = lookup("ROLODEX_REMOTE_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("invalid ROLODEX_REMOTE_TIMEOUT_SECS '{secs}'"))?;
            engine = engine.with_remote_timeout(Duration::from_secs(secs));
        }
        if let Some(flag) = lookup("ROLODEX_KEEP_SYNCED_COPIES") {
            engine = engine.with_keep_synced_copies(matches!(flag.trim(), "1" | "true" | "yes"));
        }

        let mut gateway = HttpGatewayConfig::new(api_url).with_request_timeout(engine.remote_timeout);
        if let Some(ws_url) = lookup("ROLODEX_WS_URL") {
            gateway = gateway.with_ws_url(ws_url);
        }

        let token = lookup("ROLODEX_AUTH_TOKEN")
            .map(AuthToken::new)
            .filter(|t| !t.is_blank());

        let db_path = match lookup("ROLODEX_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => SqliteRecordStore::default_path()?,
        };

        Ok(Self {
            gateway,
            token,
            db_path,
            engine,
        })
    }
}
