//! Fundamental data types shared across the entire workspace.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alias for price precision.
pub type Price = Decimal;
/// Alias for quantity precision.
pub type Quantity = Decimal;
/// Alias used for human-readable market symbols (e.g., `BTCUSDT`).
pub type Symbol = String;

/// Identifier assigned to a child order by the gateway.
pub type OrderId = String;
/// Identifier generated locally for every child order before it reaches the gateway.
pub type ClientOrderId = String;
/// Unique identifier of a running algo instance.
pub type AlgoId = Uuid;

/// The side of an order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Side {
    /// Buy the instrument.
    Buy,
    /// Sell the instrument.
    Sell,
}

impl Side {
    /// Returns the opposite side (buy <-> sell).
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Whether `candidate` is at least as favourable as `limit` for this side.
    #[must_use]
    pub fn within_limit(self, candidate: Price, limit: Price) -> bool {
        match self {
            Self::Buy => candidate <= limit,
            Self::Sell => candidate >= limit,
        }
    }

    /// Clamp a price so it never goes past the limit for this side.
    #[must_use]
    pub fn cap_price(self, price: Price, limit: Option<Price>) -> Price {
        match (self, limit) {
            (_, None) => price,
            (Self::Buy, Some(limit)) => price.min(limit),
            (Self::Sell, Some(limit)) => price.max(limit),
        }
    }
}

/// Immutable metadata describing a tradable market.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Instrument {
    pub symbol: Symbol,
    pub tick_size: Price,
    pub lot_size: Quantity,
}

impl Instrument {
    pub fn new(symbol: impl Into<Symbol>, tick_size: Price, lot_size: Quantity) -> Self {
        Self {
            symbol: symbol.into(),
            tick_size,
            lot_size,
        }
    }

    /// Round a price to the nearest valid tick.
    #[must_use]
    pub fn round_price(&self, price: Price) -> Price {
        if self.tick_size <= Decimal::ZERO {
            return price;
        }
        (price / self.tick_size)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            * self.tick_size
    }

    /// Round a volume down to a whole number of lots.
    #[must_use]
    pub fn floor_volume(&self, volume: Quantity) -> Quantity {
        if self.lot_size <= Decimal::ZERO {
            return volume.max(Decimal::ZERO);
        }
        ((volume / self.lot_size).floor() * self.lot_size).max(Decimal::ZERO)
    }

    /// Move a price by a whole number of ticks (negative moves down).
    #[must_use]
    pub fn offset_ticks(&self, price: Price, ticks: Decimal) -> Price {
        price + self.tick_size * ticks
    }

    #[must_use]
    pub fn is_on_tick(&self, price: Price) -> bool {
        self.tick_size <= Decimal::ZERO || (price % self.tick_size).is_zero()
    }

    #[must_use]
    pub fn is_on_lot(&self, volume: Quantity) -> bool {
        self.lot_size <= Decimal::ZERO || (volume % self.lot_size).is_zero()
    }
}

/// A single price level at the top of the book.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct QuoteLevel {
    pub price: Price,
    pub size: Quantity,
}

impl QuoteLevel {
    pub fn new(price: Price, size: Quantity) -> Self {
        Self { price, size }
    }
}

/// Latest top-of-book state for an instrument.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub bid: Option<QuoteLevel>,
    pub ask: Option<QuoteLevel>,
    pub last_price: Option<Price>,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Best level resting on the given side (bid for buyers, ask for sellers).
    #[must_use]
    pub fn same_side(&self, side: Side) -> Option<QuoteLevel> {
        match side {
            Side::Buy => self.bid,
            Side::Sell => self.ask,
        }
    }

    /// Best level an aggressive order on `side` would trade against.
    #[must_use]
    pub fn opposite(&self, side: Side) -> Option<QuoteLevel> {
        self.same_side(side.inverse())
    }
}

/// Lifecycle status of a child order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ChildStatus {
    /// Sent (or queued for sending) without an acknowledgement yet.
    Pending,
    Active,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl ChildStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

/// Child order placement parameters handed to the gateway.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub client_order_id: ClientOrderId,
}

/// Why the venue refused an order.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Rejection {
    pub reason: String,
    /// Non-retryable rejections (unknown instrument, account disabled) fail the algo at once.
    #[serde(default)]
    pub fatal: bool,
}

impl Rejection {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            fatal: false,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            fatal: true,
        }
    }
}

/// Order status notification delivered by the gateway.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OrderUpdate {
    pub order_id: OrderId,
    pub status: ChildStatus,
    /// Cumulative filled quantity as reported by the venue.
    pub filled_quantity: Quantity,
    #[serde(default)]
    pub rejection: Option<Rejection>,
    pub timestamp: DateTime<Utc>,
}

impl OrderUpdate {
    pub fn new(order_id: impl Into<OrderId>, status: ChildStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            order_id: order_id.into(),
            status,
            filled_quantity: Decimal::ZERO,
            rejection: None,
            timestamp,
        }
    }

    #[must_use]
    pub fn with_filled(mut self, filled: Quantity) -> Self {
        self.filled_quantity = filled;
        self
    }

    #[must_use]
    pub fn rejected(mut self, rejection: Rejection) -> Self {
        self.status = ChildStatus::Rejected;
        self.rejection = Some(rejection);
        self
    }
}

/// Execution information emitted whenever a child order trades.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Trade {
    pub trade_id: String,
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub timestamp: DateTime<Utc>,
}

/// Anything a gateway reports back about child orders.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum ExecutionReport {
    OrderUpdate(OrderUpdate),
    Trade(Trade),
}
