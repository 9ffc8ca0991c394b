use chrono::Duration;
use kestrel_core::{Instrument, Price, Quantity, Side};
use rust_decimal::Decimal;

use super::{Action, DecisionContext, Intent};
use crate::parent::{ParentOrderSpec, ResolvedParams};
use crate::{EngineError, EngineResult};

/// Time-weighted slicing: `slices` equal children, one every `interval`.
///
/// Slice `k` (1-based) becomes due at `k * interval`. Slices missed while
/// paused stay owed and go out one slice at a time, each as soon as the
/// previous child is done. A working child is cancelled once a later slice
/// boundary passes, so at most one slice's worth of volume is ever live.
#[derive(Clone, Debug)]
pub struct Twap {
    slices: u64,
    interval: Duration,
    offset_ticks: Decimal,
    slice_volume: Quantity,
    /// Last slice, which also carries the lot rounding remainder.
    final_slice: Quantity,
}

impl Twap {
    pub fn new(
        spec: &ParentOrderSpec,
        params: &ResolvedParams,
        instrument: &Instrument,
    ) -> EngineResult<Self> {
        let slices = params.integer("slices")?;
        let interval = Duration::seconds(params.integer("interval_secs")? as i64);
        let slice_volume = instrument.floor_volume(spec.volume / Decimal::from(slices));
        if slice_volume.is_zero() {
            return Err(EngineError::InvalidSpec(format!(
                "volume {} is too small for {slices} slices of lot {}",
                spec.volume, instrument.lot_size
            )));
        }
        let final_slice = spec.volume - slice_volume * Decimal::from(slices.saturating_sub(1));
        Ok(Self {
            slices,
            interval,
            offset_ticks: params.require("price_offset_ticks")?,
            slice_volume,
            final_slice,
        })
    }

    pub fn slice_volume(&self) -> Quantity {
        self.slice_volume
    }

    /// Number of slice boundaries crossed after `elapsed`.
    fn due(&self, elapsed: Duration) -> u64 {
        let interval_ms = self.interval.num_milliseconds().max(1);
        (elapsed.num_milliseconds().max(0) / interval_ms) as u64
    }

    /// Cumulative volume that should have been committed after `elapsed`.
    /// The final slice absorbs the rounding remainder.
    pub fn target(&self, elapsed: Duration, total: Quantity) -> Quantity {
        let due = self.due(elapsed);
        if due >= self.slices {
            total
        } else {
            self.slice_volume * Decimal::from(due)
        }
    }

    /// Largest single child allowed with `uncommitted` volume left.
    fn max_send(&self, uncommitted: Quantity) -> Quantity {
        if uncommitted <= self.final_slice {
            self.final_slice
        } else {
            self.slice_volume
        }
    }

    fn price(&self, ctx: &DecisionContext<'_>) -> Option<Price> {
        match ctx.snapshot.and_then(|snapshot| snapshot.opposite(ctx.side())) {
            Some(level) => {
                let ticks = match ctx.side() {
                    Side::Buy => self.offset_ticks,
                    Side::Sell => -self.offset_ticks,
                };
                ctx.tradable_price(ctx.instrument.offset_ticks(level.price, ticks))
            }
            None => ctx.limit(),
        }
    }

    pub fn decide(&self, ctx: &DecisionContext<'_>) -> Vec<Action> {
        let target = self.target(ctx.elapsed, ctx.spec.volume);
        let committed = ctx.ledger.committed();
        if committed >= target {
            return Vec::new();
        }
        if let Some(child) = ctx.ledger.live_child() {
            let sent_in = ctx
                .elapsed_at(child.created_at)
                .map(|elapsed| self.due(elapsed));
            if sent_in.is_some_and(|due| due < self.due(ctx.elapsed)) {
                return vec![Action::cancel(child)];
            }
            return Vec::new();
        }
        let owed = (target - committed).min(self.max_send(ctx.uncommitted()));
        let (Some(volume), Some(price)) = (ctx.sendable_volume(owed), self.price(ctx)) else {
            return Vec::new();
        };
        vec![Action::Send {
            intent: Intent::Slice,
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
    use kestrel_core::ChildStatus;

    fn twap(volume: i64, slices: i64) -> Fixture {
        Fixture::new(
            ParentOrderSpec::new("BTCUSDT", Side::Buy, Decimal::from(volume), StrategyKind::Twap)
                .with_param("slices", Decimal::from(slices))
                .with_param("interval_secs", Decimal::from(60)),
        )
    }

    fn inner(fx: &Fixture) -> Twap {
        match fx.strategy() {
            super::super::Strategy::Twap(twap) => twap,
            other => panic!("unexpected strategy {other:?}"),
        }
    }

    #[test]
    fn nothing_is_due_before_first_interval() {
        let mut fx = twap(1000, 10);
        fx.snapshot = Some(quote(99, 100));
        assert!(fx.strategy().decide(&fx.ctx(59)).is_empty());
    }

    #[test]
    fn sends_slice_at_opposite_best() {
        let mut fx = twap(1000, 10);
        fx.snapshot = Some(quote(99, 100));
        let actions = fx.strategy().decide(&fx.ctx(60));
        assert_eq!(
            actions,
            vec![Action::Send {
                intent: Intent::Slice,
                price: Decimal::from(100),
                volume: Decimal::from(100),
            }]
        );
    }

    #[test]
    fn slices_sum_to_total_with_remainder_on_last() {
        let fx = twap(1003, 10);
        let strategy = inner(&fx);
        assert_eq!(strategy.slice_volume(), Decimal::from(100));

        let mut previous = Decimal::ZERO;
        let mut slices = Vec::new();
        for k in 1..=10 {
            let target = strategy.target(Duration::seconds(60 * k), Decimal::from(1003));
            slices.push(target - previous);
            previous = target;
        }
        assert_eq!(slices.iter().copied().sum::<Decimal>(), Decimal::from(1003));
        assert_eq!(slices[9], Decimal::from(103));
        assert!(slices[..9].iter().all(|slice| *slice == Decimal::from(100)));
    }

    #[test]
    fn missed_slices_go_out_one_slice_at_a_time() {
        let mut fx = twap(1000, 10);
        fx.snapshot = Some(quote(99, 100));
        // resumed at 250 s with four slices owed and nothing sent yet
        let actions = fx.strategy().decide(&fx.ctx(250));
        assert_eq!(
            actions,
            vec![Action::Send {
                intent: Intent::Slice,
                price: Decimal::from(100),
                volume: Decimal::from(100),
            }]
        );

        // the catch-up child is left alone while it works inside this window
        fx.ledger.record(sent_after(child(1, 100, 100, ChildStatus::Active), 250));
        assert!(fx.strategy().decide(&fx.ctx(260)).is_empty());

        // once it fills the next owed slice follows straight away
        fx.ledger.get_mut("test-1").unwrap().status = ChildStatus::Filled;
        assert!(matches!(
            fx.strategy().decide(&fx.ctx(260)).as_slice(),
            [Action::Send { volume, .. }] if *volume == Decimal::from(100)
        ));
    }

    #[test]
    fn remainder_rides_only_on_the_last_slice() {
        let mut fx = twap(1003, 10);
        fx.snapshot = Some(quote(99, 100));
        for seq in 1..=8 {
            fx.ledger.record(child(seq, 100, 100, ChildStatus::Filled));
        }
        // window over with 203 left: first 100, then the final 103
        assert!(matches!(
            fx.strategy().decide(&fx.ctx(600)).as_slice(),
            [Action::Send { volume, .. }] if *volume == Decimal::from(100)
        ));
        fx.ledger.record(child(9, 100, 100, ChildStatus::Filled));
        assert!(matches!(
            fx.strategy().decide(&fx.ctx(600)).as_slice(),
            [Action::Send { volume, .. }] if *volume == Decimal::from(103)
        ));
    }

    #[test]
    fn cancels_working_child_before_next_slice() {
        let mut fx = twap(1000, 10);
        fx.snapshot = Some(quote(99, 100));
        let mut working = sent_after(child(1, 100, 100, ChildStatus::PartiallyFilled), 60);
        working.filled = Decimal::from(40);
        fx.ledger.record(working);

        // still inside the first slice's window
        assert!(fx.strategy().decide(&fx.ctx(90)).is_empty());
        assert_eq!(
            fx.strategy().decide(&fx.ctx(120)),
            vec![Action::Cancel {
                client_order_id: "test-1".into()
            }]
        );
    }

    #[test]
    fn offset_moves_away_from_touch_and_limit_caps() {
        let mut fx = Fixture::new(
            ParentOrderSpec::new("BTCUSDT", Side::Sell, Decimal::from(10), StrategyKind::Twap)
                .with_param("slices", Decimal::ONE)
                .with_param("price_offset_ticks", Decimal::from(5))
                .with_limit(Decimal::new(9900, 2)),
        );
        fx.snapshot = Some(quote(99, 100));
        // bid 99 minus five ticks is below the sell limit of 99
        assert!(matches!(
            fx.strategy().decide(&fx.ctx(60)).as_slice(),
            [Action::Send { price, .. }] if *price == Decimal::from(99)
        ));
    }

    #[test]
    fn falls_back_to_limit_without_quotes() {
        let fx = Fixture::new(
            ParentOrderSpec::new("BTCUSDT", Side::Buy, Decimal::from(10), StrategyKind::Twap)
                .with_param("slices", Decimal::ONE)
                .with_limit(Decimal::from(101)),
        );
        assert!(matches!(
            fx.strategy().decide(&fx.ctx(60)).as_slice(),
            [Action::Send { price, .. }] if *price == Decimal::from(101)
        ));
    }

    #[test]
    fn too_many_slices_for_volume_is_invalid() {
        let fx = twap(5, 10);
        let params = fx.spec.validate(&fx.instrument).unwrap();
        assert!(Twap::new(&fx.spec, &params, &fx.instrument).is_err());
    }
}
