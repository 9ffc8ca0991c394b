//! Registry providing authoritative instrument metadata to the engine.

use std::collections::HashMap;

use kestrel_core::{Instrument, Symbol};
use rust_decimal::Decimal;

use crate::{EngineError, EngineResult};

/// Instrument definitions keyed by symbol.
#[derive(Clone, Debug, Default)]
pub struct InstrumentRegistry {
    inner: HashMap<Symbol, Instrument>,
}

impl InstrumentRegistry {
    /// Construct a registry from the provided instruments, rejecting bad tick or lot sizes.
    pub fn from_instruments(instruments: Vec<Instrument>) -> EngineResult<Self> {
        let mut registry = Self::default();
        for instrument in instruments {
            registry.register(instrument)?;
        }
        Ok(registry)
    }

    /// Add or replace an instrument definition.
    pub fn register(&mut self, instrument: Instrument) -> EngineResult<()> {
        if instrument.tick_size <= Decimal::ZERO || instrument.lot_size <= Decimal::ZERO {
            return Err(EngineError::invalid_spec(format!(
                "instrument {} must declare positive tick and lot sizes",
                instrument.symbol
            )));
        }
        self.inner.insert(instrument.symbol.clone(), instrument);
        Ok(())
    }

    /// Retrieve instrument metadata for a symbol.
    pub fn get(&self, symbol: &str) -> Option<&Instrument> {
        self.inner.get(symbol)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
