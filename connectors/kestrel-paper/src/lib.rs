//! In-memory paper venue used by the simulator and integration tests.
//!
//! [`PaperGateway`] implements the engine's [`Gateway`] boundary. Orders rest
//! in a local book and are matched against the snapshots fed through
//! [`PaperGateway::on_snapshot`]; acknowledgements, cancels and fills are
//! queued as [`ExecutionReport`]s for the host to route back into the engine.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use kestrel_core::{
    ChildStatus, ExecutionReport, Instrument, MarketSnapshot, OrderId, OrderRequest, OrderUpdate,
    Price, Quantity, QuoteLevel, Rejection, Symbol, Trade,
};
use kestrel_gateway::{Gateway, GatewayError, GatewayResult};
use parking_lot::{Mutex, MutexGuard};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;
use rust_decimal::{
    prelude::{FromPrimitive, ToPrimitive},
    Decimal,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Behaviour switches for the paper venue.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct PaperConfig {
    /// Acknowledge new orders and cancels immediately.
    #[serde(default = "default_true")]
    pub auto_accept: bool,
    /// Fill resting orders when a snapshot crosses their price.
    #[serde(default = "default_true")]
    pub fill_on_cross: bool,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            auto_accept: true,
            fill_on_cross: true,
        }
    }
}

impl PaperConfig {
    /// Records traffic only; every report has to be produced by hand.
    pub fn recording() -> Self {
        Self {
            auto_accept: false,
            fill_on_cross: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// An order sitting in the paper book.
#[derive(Clone, Debug, PartialEq)]
pub struct RestingOrder {
    pub order_id: OrderId,
    pub request: OrderRequest,
    pub filled: Quantity,
    pub status: ChildStatus,
}

impl RestingOrder {
    fn remaining(&self) -> Quantity {
        (self.request.quantity - self.filled).max(Decimal::ZERO)
    }
}

#[derive(Default)]
struct PaperBook {
    next_order: u64,
    next_trade: u64,
    /// Keyed by submission sequence so matching is deterministic.
    orders: BTreeMap<u64, RestingOrder>,
    sent: Vec<(OrderId, OrderRequest)>,
    cancels: Vec<OrderId>,
    reports: VecDeque<ExecutionReport>,
    clock: Option<DateTime<Utc>>,
    offline: bool,
}

impl PaperBook {
    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    fn find_mut(&mut self, order_id: &str) -> Option<&mut RestingOrder> {
        self.orders
            .values_mut()
            .find(|order| order.order_id == order_id)
    }

    fn execute(
        &mut self,
        order_id: &str,
        qty: Quantity,
        price: Price,
        at: DateTime<Utc>,
    ) -> GatewayResult<Quantity> {
        self.next_trade += 1;
        let trade_seq = self.next_trade;
        let order = self
            .find_mut(order_id)
            .ok_or_else(|| GatewayError::InvalidRequest(format!("unknown order {order_id}")))?;
        if order.status.is_terminal() {
            return Err(GatewayError::InvalidRequest(format!(
                "order {order_id} is no longer open"
            )));
        }
        let qty = qty.min(order.remaining());
        if qty <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        order.filled += qty;
        order.status = if order.remaining().is_zero() {
            ChildStatus::Filled
        } else {
            ChildStatus::PartiallyFilled
        };
        let trade = Trade {
            trade_id: format!("{order_id}-t{trade_seq}"),
            order_id: order.order_id.clone(),
            symbol: order.request.symbol.clone(),
            side: order.request.side,
            price,
            quantity: qty,
            timestamp: at,
        };
        let update = OrderUpdate::new(order.order_id.clone(), order.status, at).with_filled(order.filled);
        self.reports.push_back(ExecutionReport::Trade(trade));
        self.reports.push_back(ExecutionReport::OrderUpdate(update));
        Ok(qty)
    }
}

/// Paper venue implementing [`Gateway`].
pub struct PaperGateway {
    name: String,
    config: PaperConfig,
    book: Mutex<PaperBook>,
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new("paper", PaperConfig::default())
    }
}

impl PaperGateway {
    pub fn new(name: impl Into<String>, config: PaperConfig) -> Self {
        Self {
            name: name.into(),
            config,
            book: Mutex::new(PaperBook::default()),
        }
    }

    /// Venue that records traffic without producing any reports on its own.
    pub fn recording() -> Self {
        Self::new("recording", PaperConfig::recording())
    }

    fn book(&self) -> MutexGuard<'_, PaperBook> {
        self.book.lock()
    }

    /// Simulate a connectivity loss: submissions fail synchronously while offline.
    pub fn set_offline(&self, offline: bool) {
        self.book().offline = offline;
    }

    /// Pin the timestamp used for generated reports.
    pub fn set_clock(&self, at: DateTime<Utc>) {
        self.book().clock = Some(at);
    }

    /// Match resting orders against a new top of book.
    pub fn on_snapshot(&self, snapshot: &MarketSnapshot) {
        let mut book = self.book();
        book.clock = Some(snapshot.timestamp);
        if !self.config.fill_on_cross {
            return;
        }
        let crossing: Vec<(OrderId, QuoteLevel)> = book
            .orders
            .values()
            .filter(|order| order.request.symbol == snapshot.symbol && !order.status.is_terminal())
            .filter_map(|order| {
                let level = snapshot.opposite(order.request.side)?;
                order
                    .request
                    .side
                    .within_limit(level.price, order.request.price)
                    .then(|| (order.order_id.clone(), level))
            })
            .collect();
        for (order_id, level) in crossing {
            match book.execute(&order_id, level.size, level.price, snapshot.timestamp) {
                Ok(qty) if qty > Decimal::ZERO => {
                    debug!(%order_id, price = %level.price, %qty, "paper order crossed");
                }
                Ok(_) => {}
                Err(err) => warn!(%order_id, error = %err, "paper match failed"),
            }
        }
    }

    /// Acknowledge a pending order by hand.
    pub fn acknowledge(&self, order_id: &str) -> GatewayResult<()> {
        let mut book = self.book();
        let at = book.now();
        let order = book
            .find_mut(order_id)
            .ok_or_else(|| GatewayError::InvalidRequest(format!("unknown order {order_id}")))?;
        order.status = ChildStatus::Active;
        let update = OrderUpdate::new(order_id, ChildStatus::Active, at);
        book.reports.push_back(ExecutionReport::OrderUpdate(update));
        Ok(())
    }

    /// Fill part or all of an order by hand.
    pub fn fill(&self, order_id: &str, qty: Quantity, price: Price) -> GatewayResult<Quantity> {
        let mut book = self.book();
        let at = book.now();
        book.execute(order_id, qty, price, at)
    }

    /// Reject an open order.
    pub fn reject(&self, order_id: &str, rejection: Rejection) -> GatewayResult<()> {
        let mut book = self.book();
        let at = book.now();
        let order = book
            .find_mut(order_id)
            .ok_or_else(|| GatewayError::InvalidRequest(format!("unknown order {order_id}")))?;
        order.status = ChildStatus::Rejected;
        let update = OrderUpdate::new(order_id, ChildStatus::Rejected, at)
            .with_filled(order.filled)
            .rejected(rejection);
        book.reports.push_back(ExecutionReport::OrderUpdate(update));
        Ok(())
    }

    /// Confirm a cancel that was requested earlier.
    pub fn confirm_cancel(&self, order_id: &str) -> GatewayResult<()> {
        let mut book = self.book();
        let at = book.now();
        let order = book
            .find_mut(order_id)
            .ok_or_else(|| GatewayError::InvalidRequest(format!("unknown order {order_id}")))?;
        if order.status.is_terminal() {
            return Ok(());
        }
        order.status = ChildStatus::Cancelled;
        let update = OrderUpdate::new(order_id, ChildStatus::Cancelled, at).with_filled(order.filled);
        book.reports.push_back(ExecutionReport::OrderUpdate(update));
        Ok(())
    }

    /// Take every report produced since the last call.
    pub fn drain_reports(&self) -> Vec<ExecutionReport> {
        self.book().reports.drain(..).collect()
    }

    /// Every accepted submission in arrival order.
    pub fn sent_orders(&self) -> Vec<(OrderId, OrderRequest)> {
        self.book().sent.clone()
    }

    /// Order ids of every cancel request in arrival order.
    pub fn cancel_requests(&self) -> Vec<OrderId> {
        self.book().cancels.clone()
    }

    pub fn open_orders(&self) -> Vec<RestingOrder> {
        self.book()
            .orders
            .values()
            .filter(|order| !order.status.is_terminal())
            .cloned()
            .collect()
    }
}

impl Gateway for PaperGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_order(&self, request: &OrderRequest) -> GatewayResult<OrderId> {
        let mut book = self.book();
        if book.offline {
            return Err(GatewayError::Transport("paper venue offline".into()));
        }
        if request.quantity <= Decimal::ZERO || request.price <= Decimal::ZERO {
            return Err(GatewayError::InvalidRequest(format!(
                "non-positive price or quantity in {}",
                request.client_order_id
            )));
        }
        book.next_order += 1;
        let seq = book.next_order;
        let order_id = format!("{}-{seq}", self.name);
        let status = if self.config.auto_accept {
            ChildStatus::Active
        } else {
            ChildStatus::Pending
        };
        book.orders.insert(
            seq,
            RestingOrder {
                order_id: order_id.clone(),
                request: request.clone(),
                filled: Decimal::ZERO,
                status,
            },
        );
        book.sent.push((order_id.clone(), request.clone()));
        if self.config.auto_accept {
            let at = book.now();
            book.reports.push_back(ExecutionReport::OrderUpdate(OrderUpdate::new(
                order_id.clone(),
                ChildStatus::Active,
                at,
            )));
        }
        info!(
            gateway = %self.name,
            %order_id,
            client_order_id = %request.client_order_id,
            side = ?request.side,
            price = %request.price,
            qty = %request.quantity,
            "paper order accepted"
        );
        Ok(order_id)
    }

    fn cancel_order(&self, order_id: &OrderId, _symbol: &Symbol) -> GatewayResult<()> {
        let mut book = self.book();
        if book.offline {
            return Err(GatewayError::Transport("paper venue offline".into()));
        }
        if book.find_mut(order_id).is_none() {
            return Err(GatewayError::InvalidRequest(format!("unknown order {order_id}")));
        }
        book.cancels.push(order_id.clone());
        drop(book);
        if self.config.auto_accept {
            self.confirm_cancel(order_id)?;
        }
        Ok(())
    }
}

/// Seeded random-walk top-of-book generator.
pub struct RandomWalkFeed {
    instrument: Instrument,
    mid: f64,
    volatility: f64,
    rng: StdRng,
}

impl RandomWalkFeed {
    pub fn new(instrument: Instrument, start_price: Price, volatility: f64, seed: u64) -> Self {
        Self {
            mid: start_price.to_f64().unwrap_or(100.0).max(1.0),
            volatility: volatility.clamp(0.0001, 0.1),
            instrument,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.instrument.symbol
    }

    /// Step the walk once and return the resulting snapshot.
    pub fn next_snapshot(&mut self, at: DateTime<Utc>) -> MarketSnapshot {
        let noise: f64 = self.rng.sample(StandardNormal);
        self.mid = (self.mid * (1.0 + noise * self.volatility)).max(1.0);
        let tick = self.instrument.tick_size;
        let bid = self
            .instrument
            .round_price(Decimal::from_f64(self.mid).unwrap_or(tick))
            .max(tick);
        let ask = bid + tick;
        let mut size = || self.instrument.lot_size * Decimal::from(self.rng.gen_range(1..=50u32));
        let bid_level = QuoteLevel::new(bid, size());
        let ask_level = QuoteLevel::new(ask, size());
        let last = if self.rng.gen_bool(0.5) { bid } else { ask };
        MarketSnapshot {
            symbol: self.instrument.symbol.clone(),
            bid: Some(bid_level),
            ask: Some(ask_level),
            last_price: Some(last),
            timestamp: at,
        }
    }
}
