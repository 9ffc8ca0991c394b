use kestrel_core::{Instrument, Price};
use rust_decimal::Decimal;

use super::{Action, DecisionContext, Intent};
use crate::parent::{ParentOrderSpec, ResolvedParams};
use crate::{EngineError, EngineResult};

/// Waits for the opposite best price to reach the trigger, then takes liquidity.
#[derive(Clone, Debug)]
pub struct Sniper {
    trigger: Price,
    sweep_displayed: bool,
}

impl Sniper {
    pub fn new(
        spec: &ParentOrderSpec,
        params: &ResolvedParams,
        instrument: &Instrument,
    ) -> EngineResult<Self> {
        let trigger = params
            .get("trigger_price")
            .or(spec.limit_price)
            .ok_or_else(|| {
                EngineError::InvalidSpec("sniper needs a trigger price or a limit price".into())
            })?;
        let trigger = instrument.round_price(trigger);
        if trigger <= Decimal::ZERO {
            return Err(EngineError::InvalidSpec(
                "sniper trigger price must be positive".into(),
            ));
        }
        Ok(Self {
            trigger,
            sweep_displayed: params.integer("sweep_displayed")? == 1,
        })
    }

    pub fn decide(&self, ctx: &DecisionContext<'_>) -> Vec<Action> {
        let side = ctx.side();
        let in_range = ctx
            .snapshot
            .and_then(|snapshot| snapshot.opposite(side))
            .filter(|level| side.within_limit(level.price, self.trigger));

        if let Some(child) = ctx.ledger.live_child() {
            if in_range.is_none() {
                return vec![Action::cancel(child)];
            }
            return Vec::new();
        }

        let Some(level) = in_range else {
            return Vec::new();
        };
        let wanted = if self.sweep_displayed {
            level.size
        } else {
            ctx.uncommitted()
        };
        let (Some(volume), Some(price)) = (ctx.sendable_volume(wanted), ctx.tradable_price(level.price))
        else {
            return Vec::new();
        };
        vec![Action::Send {
            intent: Intent::Fire,
            price,
            volume,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::*;
    use super::*;
    use crate::parent::StrategyKind;
    use kestrel_core::{ChildStatus, Side};

    fn sniper(trigger: i64, sweep: bool) -> Fixture {
        Fixture::new(
            ParentOrderSpec::new("BTCUSDT", Side::Buy, Decimal::from(80), StrategyKind::Sniper)
                .with_param("trigger_price", Decimal::from(trigger))
                .with_param("sweep_displayed", if sweep { Decimal::ONE } else { Decimal::ZERO }),
        )
    }

    #[test]
    fn requires_trigger_or_limit() {
        let fx = Fixture::new(ParentOrderSpec::new(
            "BTCUSDT",
            Side::Buy,
            Decimal::ONE,
            StrategyKind::Sniper,
        ));
        let params = fx.spec.validate(&fx.instrument).unwrap();
        assert!(Sniper::new(&fx.spec, &params, &fx.instrument).is_err());

        let with_limit = fx.spec.clone().with_limit(Decimal::from(100));
        let params = with_limit.validate(&fx.instrument).unwrap();
        assert!(Sniper::new(&with_limit, &params, &fx.instrument).is_ok());
    }

    #[test]
    fn holds_fire_until_price_reaches_trigger() {
        let mut fx = sniper(100, false);
        fx.snapshot = Some(quote(99, 101));
        assert!(fx.strategy().decide(&fx.ctx(0)).is_empty());

        fx.snapshot = Some(quote(99, 100));
        assert_eq!(
            fx.strategy().decide(&fx.ctx(0)),
            vec![Action::Send {
                intent: Intent::Fire,
                price: Decimal::from(100),
                volume: Decimal::from(80),
            }]
        );
    }

    #[test]
    fn sweep_takes_displayed_volume_only() {
        let mut fx = sniper(100, true);
        fx.snapshot = Some(quote(99, 100));
        assert!(matches!(
            fx.strategy().decide(&fx.ctx(0)).as_slice(),
            [Action::Send { volume, .. }] if *volume == Decimal::from(50)
        ));
    }

    #[test]
    fn cancels_when_price_moves_away() {
        let mut fx = sniper(100, false);
        fx.ledger.record(child(1, 100, 80, ChildStatus::Active));
        fx.snapshot = Some(quote(99, 100));
        assert!(fx.strategy().decide(&fx.ctx(0)).is_empty());

        fx.snapshot = Some(quote(100, 102));
        assert_eq!(
            fx.strategy().decide(&fx.ctx(0)),
            vec![Action::Cancel {
                client_order_id: "test-1".into()
            }]
        );
    }
}
