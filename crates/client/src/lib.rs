//! `rolodex-client`
//!
//! **Responsibility:** Offline-first synchronization of the record list.
//!
//! This crate provides:
//! - The sync engine (single-writer state machine over the record list)
//! - Local persistence of pending changes (SQLite, in-memory)
//! - The remote gateway (HTTP API + WebSocket push channel)
//! - Reconciliation of pending changes on reconnect
//!
//! The server remains the authority; local entries only hold changes the
//! server has not confirmed yet.

pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod offline;
mod reconcile;
pub mod state;
pub mod store;
pub mod types;

pub use config::{ClientConfig, EngineConfig};
pub use engine::SyncEngine;
pub use error::{EngineError, EngineResult};
pub use gateway::{GatewayError, HttpGateway, HttpGatewayConfig, PushSubscription, RemoteGateway};
pub use offline::{ConnectivityMonitor, ConnectivityState};
pub use state::{Action, OpPhase, ReconcileChange, SyncState};
pub use store::{InMemoryRecordStore, RecordStore, SqliteRecordStore, StoreError, SESSION_KEY};
pub use types::{AuthToken, PushEvent, PushKind, ReconcileReport};
