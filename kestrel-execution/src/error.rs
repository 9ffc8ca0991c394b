use kestrel_core::{AlgoId, OrderId};
use thiserror::Error;

/// Convenience alias for engine results.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures surfaced by the algo engine.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EngineError {
    /// Parent order rejected at `start`; no instance was created.
    #[error("invalid parent order: {0}")]
    InvalidSpec(String),
    /// Operation on an algo id the engine has never seen (or has forgotten).
    #[error("algo {0} not found")]
    NotFound(AlgoId),
    /// A strategy produced an off-tick, off-lot or over-sized action.
    #[error("invalid strategy action: {0}")]
    InvalidAction(String),
    /// The venue refused a child order.
    #[error("child order {client_order_id} rejected: {reason}")]
    GatewayRejected {
        client_order_id: String,
        reason: String,
    },
    /// Gateway event for an order that no algo owns.
    #[error("no algo owns order {0}")]
    DispatchUnknownOrder(OrderId),
    /// The engine task is no longer running.
    #[error("engine is not running")]
    EngineStopped,
}

impl EngineError {
    pub(crate) fn invalid_spec(msg: impl Into<String>) -> Self {
        Self::InvalidSpec(msg.into())
    }
}
