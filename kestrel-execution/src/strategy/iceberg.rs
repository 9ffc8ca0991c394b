use kestrel_core::{Instrument, MarketSnapshot, Price, Quantity, Side};

use super::{Action, DecisionContext, Intent};
use crate::parent::ResolvedParams;
use crate::{EngineError, EngineResult};

/// Shows one display-sized child at a time and refreshes it once it is done.
#[derive(Clone, Debug)]
pub struct Iceberg {
    display_volume: Quantity,
}

impl Iceberg {
    pub fn new(params: &ResolvedParams, instrument: &Instrument) -> EngineResult<Self> {
        let display_volume = instrument.floor_volume(params.require("display_volume")?);
        if display_volume.is_zero() {
            return Err(EngineError::InvalidSpec(format!(
                "display volume must be at least one lot of {}",
                instrument.lot_size
            )));
        }
        Ok(Self { display_volume })
    }

    pub fn decide(&self, ctx: &DecisionContext<'_>) -> Vec<Action> {
        let side = ctx.side();
        if let Some(child) = ctx.ledger.live_child() {
            // The market went through our price without filling us.
            if child.is_working() && trades_through(ctx.snapshot, side, child.price) {
                return vec![Action::cancel(child)];
            }
            return Vec::new();
        }

        let raw_price = ctx.limit().or_else(|| {
            ctx.snapshot
                .and_then(|snapshot| snapshot.same_side(side))
                .map(|level| level.price)
        });
        let (Some(volume), Some(price)) = (
            ctx.sendable_volume(self.display_volume),
            raw_price.and_then(|raw| ctx.tradable_price(raw)),
        ) else {
            return Vec::new();
        };
        vec![Action::Send {
            intent: Intent::Refresh,
            price,
            volume,
        }]
    }
}

/// Strictly through the working price; a quote at the touch may still fill us.
fn trades_through(snapshot: Option<&MarketSnapshot>, side: Side, working: Price) -> bool {
    let Some(opposite) = snapshot.and_then(|snapshot| snapshot.opposite(side)) else {
        return false;
    };
    match side {
        Side::Buy => opposite.price < working,
        Side::Sell => opposite.price > working,
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::*;
    use super::*;
    use crate::parent::{ParentOrderSpec, StrategyKind};
    use kestrel_core::ChildStatus;
    use rust_decimal::Decimal;

    fn iceberg(limit: Option<i64>) -> Fixture {
        let mut spec = ParentOrderSpec::new("BTCUSDT", Side::Buy, Decimal::from(500), StrategyKind::Iceberg)
            .with_param("display_volume", Decimal::from(100));
        if let Some(limit) = limit {
            spec = spec.with_limit(Decimal::from(limit));
        }
        Fixture::new(spec)
    }

    #[test]
    fn sends_display_slice_at_limit() {
        let fx = iceberg(Some(100));
        assert_eq!(
            fx.strategy().decide(&fx.ctx(0)),
            vec![Action::Send {
                intent: Intent::Refresh,
                price: Decimal::from(100),
                volume: Decimal::from(100),
            }]
        );
    }

    #[test]
    fn never_more_than_one_live_child() {
        let mut fx = iceberg(Some(100));
        fx.ledger.record(child(1, 100, 100, ChildStatus::Pending));
        assert!(fx.strategy().decide(&fx.ctx(0)).is_empty());
    }

    #[test]
    fn final_slice_is_the_remainder() {
        let mut fx = iceberg(Some(100));
        for seq in 1..=4 {
            fx.ledger.record(child(seq, 100, 110, ChildStatus::Filled));
        }
        assert!(matches!(
            fx.strategy().decide(&fx.ctx(0)).as_slice(),
            [Action::Send { volume, .. }] if *volume == Decimal::from(60)
        ));
    }

    #[test]
    fn joins_best_bid_without_limit() {
        let mut fx = iceberg(None);
        assert!(fx.strategy().decide(&fx.ctx(0)).is_empty());
        fx.snapshot = Some(quote(98, 99));
        assert!(matches!(
            fx.strategy().decide(&fx.ctx(0)).as_slice(),
            [Action::Send { price, .. }] if *price == Decimal::from(98)
        ));
    }

    #[test]
    fn cancels_when_market_trades_through() {
        let mut fx = iceberg(Some(100));
        fx.ledger.record(child(1, 100, 100, ChildStatus::Active));
        fx.snapshot = Some(quote(98, 101));
        assert!(fx.strategy().decide(&fx.ctx(0)).is_empty());

        fx.snapshot = Some(quote(98, 99));
        assert_eq!(
            fx.strategy().decide(&fx.ctx(0)),
            vec![Action::Cancel {
                client_order_id: "test-1".into()
            }]
        );
    }

    #[test]
    fn keeps_working_child_when_market_only_reaches_its_price() {
        let mut fx = iceberg(Some(100));
        fx.ledger.record(child(1, 100, 100, ChildStatus::Active));
        fx.snapshot = Some(quote(99, 100));
        assert!(fx.strategy().decide(&fx.ctx(0)).is_empty());
    }
}
