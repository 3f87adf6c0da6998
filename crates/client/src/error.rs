//! Errors surfaced by the sync engine.

use crate::gateway::GatewayError;
use crate::store::StoreError;

/// Failure of an engine operation.
///
/// `GatewayError::Disconnected` never appears here: connectivity failures are
/// absorbed by the local fallback path.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// The server refused the request.
    #[error(transparent)]
    Rejected(GatewayError),
    /// Local persistence failed; the operation did not take effect.
    #[error("local store failure: {0}")]
    StoreFailure(#[from] StoreError),
    /// The operation needs a record identifier and none was given.
    #[error("record has no identifier")]
    MissingIdentifier,
    /// The engine has been disposed.
    #[error("sync engine disposed")]
    Disposed,
}

pub type EngineResult<T> = Result<T, EngineError>;
