//! Decision logic for every supported execution strategy.
//!
//! Strategies are pure: given the parent order, the ledger of children sent
//! so far and the latest snapshot they return the actions they would like to
//! take. The owning [`crate::AlgoInstance`] validates, deduplicates and
//! forwards those actions.

pub mod best_limit;
pub mod iceberg;
pub mod sniper;
pub mod stop;
pub mod twap;

use chrono::{DateTime, Duration, Utc};
use kestrel_core::{ClientOrderId, Instrument, MarketSnapshot, Price, Quantity, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ledger::{ChildOrder, Ledger};
use crate::parent::{ParentOrderSpec, ResolvedParams, StrategyKind};
use crate::{EngineError, EngineResult};

pub use best_limit::BestLimit;
pub use iceberg::Iceberg;
pub use sniper::Sniper;
pub use stop::StopTrigger;
pub use twap::Twap;

/// Purpose behind an action. At most one action per intent may be awaiting
/// acknowledgement at any time.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(tag = "kind", content = "client_order_id", rename_all = "snake_case")]
pub enum Intent {
    /// Next TWAP slice.
    Slice,
    /// Replacement for a consumed iceberg display order.
    Refresh,
    /// Sniper take.
    Fire,
    /// Best-limit quote.
    Quote,
    /// Stop order release.
    Trigger,
    /// Cancellation of a specific child.
    Withdraw(ClientOrderId),
}

impl Intent {
    pub fn is_placement(&self) -> bool {
        !matches!(self, Self::Withdraw(_))
    }
}

/// What a strategy wants done next.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Send {
        intent: Intent,
        price: Price,
        volume: Quantity,
    },
    Cancel {
        client_order_id: ClientOrderId,
    },
}

impl Action {
    pub fn intent(&self) -> Intent {
        match self {
            Self::Send { intent, .. } => intent.clone(),
            Self::Cancel { client_order_id } => Intent::Withdraw(client_order_id.clone()),
        }
    }

    pub fn cancel(child: &ChildOrder) -> Self {
        Self::Cancel {
            client_order_id: child.client_order_id.clone(),
        }
    }
}

/// Read-only view handed to [`Strategy::decide`].
pub struct DecisionContext<'a> {
    pub spec: &'a ParentOrderSpec,
    pub instrument: &'a Instrument,
    pub ledger: &'a Ledger,
    pub snapshot: Option<&'a MarketSnapshot>,
    /// Time since the algo started running.
    pub elapsed: Duration,
    pub started_at: Option<DateTime<Utc>>,
}

impl DecisionContext<'_> {
    pub fn side(&self) -> Side {
        self.spec.side
    }

    pub fn limit(&self) -> Option<Price> {
        self.spec.limit_price
    }

    /// Running time of the algo at `at`, or `None` before it started.
    pub fn elapsed_at(&self, at: DateTime<Utc>) -> Option<Duration> {
        self.started_at.map(|started| at - started)
    }

    /// Parent volume not yet claimed by any child.
    pub fn uncommitted(&self) -> Quantity {
        (self.spec.volume - self.ledger.committed()).max(Decimal::ZERO)
    }

    /// Round to the tick and clamp to the parent's limit; `None` for unusable prices.
    fn tradable_price(&self, raw: Price) -> Option<Price> {
        let price = self
            .side()
            .cap_price(self.instrument.round_price(raw), self.limit());
        (price > Decimal::ZERO).then_some(price)
    }

    /// Lot-rounded volume capped by what is still uncommitted; `None` when nothing is left.
    fn sendable_volume(&self, wanted: Quantity) -> Option<Quantity> {
        let volume = self.instrument.floor_volume(wanted.min(self.uncommitted()));
        (volume > Decimal::ZERO).then_some(volume)
    }
}

/// Closed set of strategies.
#[derive(Clone, Debug)]
pub enum Strategy {
    Twap(Twap),
    Iceberg(Iceberg),
    Sniper(Sniper),
    BestLimit(BestLimit),
    Stop(StopTrigger),
}

impl Strategy {
    pub fn from_spec(
        spec: &ParentOrderSpec,
        params: &ResolvedParams,
        instrument: &Instrument,
    ) -> EngineResult<Self> {
        Ok(match spec.strategy {
            StrategyKind::Twap => Self::Twap(Twap::new(spec, params, instrument)?),
            StrategyKind::Iceberg => Self::Iceberg(Iceberg::new(params, instrument)?),
            StrategyKind::Sniper => Self::Sniper(Sniper::new(spec, params, instrument)?),
            StrategyKind::BestLimit => Self::BestLimit(BestLimit::new(params, instrument)?),
            StrategyKind::Stop => Self::Stop(StopTrigger::new(params, instrument)?),
        })
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Twap(_) => StrategyKind::Twap,
            Self::Iceberg(_) => StrategyKind::Iceberg,
            Self::Sniper(_) => StrategyKind::Sniper,
            Self::BestLimit(_) => StrategyKind::BestLimit,
            Self::Stop(_) => StrategyKind::Stop,
        }
    }

    pub fn decide(&self, ctx: &DecisionContext<'_>) -> Vec<Action> {
        match self {
            Self::Twap(inner) => inner.decide(ctx),
            Self::Iceberg(inner) => inner.decide(ctx),
            Self::Sniper(inner) => inner.decide(ctx),
            Self::BestLimit(inner) => inner.decide(ctx),
            Self::Stop(inner) => inner.decide(ctx),
        }
    }
}

/// Reject sends that violate exchange increments or exceed the parent.
pub(crate) fn validate_action(action: &Action, ctx: &DecisionContext<'_>) -> EngineResult<()> {
    let Action::Send { price, volume, .. } = action else {
        return Ok(());
    };
    let instrument = ctx.instrument;
    let problem = if *price <= Decimal::ZERO {
        Some(format!("non-positive price {price}"))
    } else if !instrument.is_on_tick(*price) {
        Some(format!("price {price} is off tick {}", instrument.tick_size))
    } else if *volume <= Decimal::ZERO {
        Some(format!("non-positive volume {volume}"))
    } else if !instrument.is_on_lot(*volume) {
        Some(format!("volume {volume} is off lot {}", instrument.lot_size))
    } else if *volume > ctx.uncommitted() {
        Some(format!(
            "volume {volume} exceeds uncommitted {}",
            ctx.uncommitted()
        ))
    } else {
        None
    };
    match problem {
        Some(reason) => Err(EngineError::InvalidAction(reason)),
        None => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod testkit {
    use super::*;
    use chrono::TimeZone;
    use kestrel_core::{ChildStatus, QuoteLevel};
    use uuid::Uuid;

    /// Start time of every fixture algo.
    pub fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
    }

    pub fn instrument() -> Instrument {
        Instrument::new("BTCUSDT", Decimal::new(1, 2), Decimal::ONE)
    }

    pub fn quote(bid: i64, ask: i64) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTCUSDT".into(),
            bid: Some(QuoteLevel::new(Decimal::from(bid), Decimal::from(50))),
            ask: Some(QuoteLevel::new(Decimal::from(ask), Decimal::from(50))),
            last_price: None,
            timestamp: start(),
        }
    }

    /// A child sent at the moment the algo started.
    pub fn child(seq: u32, price: i64, volume: i64, status: ChildStatus) -> ChildOrder {
        ChildOrder {
            client_order_id: format!("test-{seq}"),
            order_id: Some(format!("venue-{seq}")),
            algo_id: Uuid::nil(),
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            price: Decimal::from(price),
            volume: Decimal::from(volume),
            status,
            filled: Decimal::ZERO,
            reported_filled: Decimal::ZERO,
            cancel_requested: false,
            cancel_requested_at: None,
            intent: Intent::Slice,
            created_at: start(),
        }
    }

    pub fn sent_after(mut child: ChildOrder, secs: i64) -> ChildOrder {
        child.created_at = start() + Duration::seconds(secs);
        child
    }

    /// Owns everything a [`DecisionContext`] borrows.
    pub struct Fixture {
        pub spec: ParentOrderSpec,
        pub instrument: Instrument,
        pub ledger: Ledger,
        pub snapshot: Option<MarketSnapshot>,
    }

    impl Fixture {
        pub fn new(spec: ParentOrderSpec) -> Self {
            Self {
                spec,
                instrument: instrument(),
                ledger: Ledger::new(),
                snapshot: None,
            }
        }

        pub fn strategy(&self) -> Strategy {
            let params = self.spec.validate(&self.instrument).unwrap();
            Strategy::from_spec(&self.spec, &params, &self.instrument).unwrap()
        }

        pub fn ctx(&self, elapsed_secs: i64) -> DecisionContext<'_> {
            DecisionContext {
                spec: &self.spec,
                instrument: &self.instrument,
                ledger: &self.ledger,
                snapshot: self.snapshot.as_ref(),
                elapsed: Duration::seconds(elapsed_secs),
                started_at: Some(start()),
            }
        }
    }
}
