use kestrel_core::{ChildStatus, Instrument, Price, Side};
use rust_decimal::Decimal;

use super::{Action, DecisionContext, Intent};
use crate::parent::ResolvedParams;
use crate::{EngineError, EngineResult};

/// Conditional order released once the last trade crosses the trigger.
#[derive(Clone, Debug)]
pub struct StopTrigger {
    trigger: Price,
    add_ticks: Decimal,
}

impl StopTrigger {
    pub fn new(params: &ResolvedParams, instrument: &Instrument) -> EngineResult<Self> {
        let trigger = instrument.round_price(params.require("trigger_price")?);
        if trigger <= Decimal::ZERO {
            return Err(EngineError::InvalidSpec(
                "stop trigger price must be positive".into(),
            ));
        }
        Ok(Self {
            trigger,
            add_ticks: params.require("price_add_ticks")?,
        })
    }

    fn crossed(&self, side: Side, last: Price) -> bool {
        match side {
            Side::Buy => last >= self.trigger,
            Side::Sell => last <= self.trigger,
        }
    }

    pub fn decide(&self, ctx: &DecisionContext<'_>) -> Vec<Action> {
        if ctx.ledger.live_child().is_some() {
            return Vec::new();
        }
        let fired = ctx
            .ledger
            .children()
            .iter()
            .any(|child| child.status != ChildStatus::Rejected);
        if !fired {
            let last = ctx.snapshot.and_then(|snapshot| snapshot.last_price);
            if !last.is_some_and(|last| self.crossed(ctx.side(), last)) {
                return Vec::new();
            }
        }

        let ticks = match ctx.side() {
            Side::Buy => self.add_ticks,
            Side::Sell => -self.add_ticks,
        };
        let raw = ctx.instrument.offset_ticks(self.trigger, ticks);
        let (Some(volume), Some(price)) = (ctx.sendable_volume(ctx.uncommitted()), ctx.tradable_price(raw))
        else {
            return Vec::new();
        };
        vec![Action::Send {
            intent: Intent::Trigger,
            price,
            volume,
        }]
    }
}
