//! Gateway adapter boundary used by the execution engine.
//!
//! The engine never waits on the venue: `send_order` only has to hand the
//! request off and return the identifier the venue will use in later
//! [`kestrel_core::OrderUpdate`]s, and `cancel_order` only has to enqueue the
//! cancel. Acknowledgements, fills and rejections flow back through the
//! engine's delivery callbacks.

use std::sync::atomic::{AtomicU64, Ordering};

use kestrel_core::{OrderId, OrderRequest, Symbol};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Convenience alias for gateway results.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Common error type returned by gateway implementations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Represents transport-level failures (network, timeouts, etc.).
    #[error("transport error: {0}")]
    Transport(String),
    /// Returned when the request parameters are invalid for the target venue.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Venue responded with a business error (e.g., instrument halted).
    #[error("exchange error: {0}")]
    Exchange(String),
    /// The host side of the gateway has gone away.
    #[error("gateway closed")]
    Closed,
}

/// Outbound order flow from the engine to a venue.
///
/// Implementations must not block: the engine calls them from its single
/// dispatch task.
pub trait Gateway: Send + Sync {
    /// Human-friendly name of the gateway used for logging purposes.
    fn name(&self) -> &str;

    /// Submit a new child order and return the identifier used in later updates.
    fn send_order(&self, request: &OrderRequest) -> GatewayResult<OrderId>;

    /// Request cancellation of a previously submitted order.
    fn cancel_order(&self, order_id: &OrderId, symbol: &Symbol) -> GatewayResult<()>;
}

/// Work item forwarded by [`ChannelGateway`] to the host's async order router.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum GatewayCommand {
    Place {
        order_id: OrderId,
        request: OrderRequest,
    },
    Cancel {
        order_id: OrderId,
        symbol: Symbol,
    },
}

/// Fire-and-forget gateway that assigns order ids locally and forwards work to a channel.
///
/// Hosts with an async broker client drain the receiver in their own task and
/// report results back to the engine as order updates.
pub struct ChannelGateway {
    name: String,
    prefix: String,
    next_id: AtomicU64,
    tx: mpsc::UnboundedSender<GatewayCommand>,
}

impl ChannelGateway {
    /// Build a gateway and the receiver the host should service.
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<GatewayCommand>) {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = Self {
            prefix: name.to_lowercase(),
            name,
            next_id: AtomicU64::new(1),
            tx,
        };
        (gateway, rx)
    }

    fn allocate_id(&self) -> OrderId {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("{}-{seq}", self.prefix)
    }
}

impl Gateway for ChannelGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_order(&self, request: &OrderRequest) -> GatewayResult<OrderId> {
        let order_id = self.allocate_id();
        self.tx
            .send(GatewayCommand::Place {
                order_id: order_id.clone(),
                request: request.clone(),
            })
            .map_err(|_| GatewayError::Closed)?;
        debug!(
            gateway = %self.name,
            %order_id,
            client_order_id = %request.client_order_id,
            "order handed to router"
        );
        Ok(order_id)
    }

    fn cancel_order(&self, order_id: &OrderId, symbol: &Symbol) -> GatewayResult<()> {
        self.tx
            .send(GatewayCommand::Cancel {
                order_id: order_id.clone(),
                symbol: symbol.clone(),
            })
            .map_err(|_| GatewayError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::Side;
    use rust_decimal::Decimal;

    fn request() -> OrderRequest {
        OrderRequest {
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            price: Decimal::from(100),
            quantity: Decimal::ONE,
            client_order_id: "twap-1".into(),
        }
    }

    #[test]
    fn channel_gateway_assigns_sequential_ids() {
        let (gateway, mut rx) = ChannelGateway::new("Router");
        let first = gateway.send_order(&request()).unwrap();
        let second = gateway.send_order(&request()).unwrap();
        assert_eq!(first, "router-1");
        assert_eq!(second, "router-2");
        gateway.cancel_order(&first, &"BTCUSDT".to_string()).unwrap();

        match rx.try_recv().unwrap() {
            GatewayCommand::Place { order_id, request } => {
                assert_eq!(order_id, "router-1");
                assert_eq!(request.client_order_id, "twap-1");
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(matches!(rx.try_recv().unwrap(), GatewayCommand::Place { .. }));
        assert_eq!(
            rx.try_recv().unwrap(),
            GatewayCommand::Cancel {
                order_id: "router-1".into(),
                symbol: "BTCUSDT".into()
            }
        );
    }

    #[test]
    fn channel_gateway_reports_closed_router() {
        let (gateway, rx) = ChannelGateway::new("router");
        drop(rx);
        assert!(matches!(
            gateway.send_order(&request()),
            Err(GatewayError::Closed)
        ));
    }
}
