use kestrel_core::{Instrument, Quantity};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rust_decimal::Decimal;

use super::{Action, DecisionContext, Intent};
use crate::parent::ResolvedParams;
use crate::{EngineError, EngineResult};

/// Keeps one order pegged to the best price on our own side of the book.
#[derive(Clone, Debug)]
pub struct BestLimit {
    /// Inclusive lot range for randomized child sizes.
    lots: Option<(u64, u64)>,
    lot_size: Quantity,
    seed: u64,
}

impl BestLimit {
    pub fn new(params: &ResolvedParams, instrument: &Instrument) -> EngineResult<Self> {
        let lots = match (params.get("min_volume"), params.get("max_volume")) {
            (None, None) => None,
            (min, max) => {
                let min_lots = min
                    .map(|v| (v / instrument.lot_size).ceil())
                    .unwrap_or(Decimal::ONE)
                    .max(Decimal::ONE);
                let max_lots = match max {
                    Some(v) => (v / instrument.lot_size).floor(),
                    None => Decimal::from(u32::MAX),
                };
                if max_lots < min_lots {
                    return Err(EngineError::InvalidSpec(format!(
                        "best limit volume range [{}, {}] holds no whole lot of {}",
                        min.unwrap_or_default(),
                        max.unwrap_or_default(),
                        instrument.lot_size
                    )));
                }
                let to_count = |lots: Decimal| {
                    u64::try_from(lots).map_err(|_| {
                        EngineError::InvalidSpec(format!("volume range {lots} lots is too large"))
                    })
                };
                Some((to_count(min_lots)?, to_count(max_lots)?))
            }
        };
        Ok(Self {
            lots,
            lot_size: instrument.lot_size,
            seed: params.integer("seed")?,
        })
    }

    /// Volume of child number `seq`; `None` means "everything left".
    fn child_volume(&self, seq: usize) -> Option<Quantity> {
        let (min, max) = self.lots?;
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(seq as u64));
        Some(self.lot_size * Decimal::from(rng.gen_range(min..=max)))
    }

    pub fn decide(&self, ctx: &DecisionContext<'_>) -> Vec<Action> {
        let Some(price) = ctx
            .snapshot
            .and_then(|snapshot| snapshot.same_side(ctx.side()))
            .and_then(|level| ctx.tradable_price(level.price))
        else {
            return Vec::new();
        };

        if let Some(child) = ctx.ledger.live_child() {
            if child.price != price {
                return vec![Action::cancel(child)];
            }
            return Vec::new();
        }

        let wanted = self
            .child_volume(ctx.ledger.len())
            .unwrap_or_else(|| ctx.uncommitted());
        let Some(volume) = ctx.sendable_volume(wanted) else {
            return Vec::new();
        };
        vec![Action::Send {
            intent: Intent::Quote,
            price,
            volume,
        }]
    }
}
