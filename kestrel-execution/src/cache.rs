//! Latest market snapshot per instrument.

use std::collections::HashMap;

use kestrel_core::{MarketSnapshot, Symbol};

/// Holds the most recent snapshot for each instrument; no history is kept.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    latest: HashMap<Symbol, MarketSnapshot>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the snapshot for its instrument.
    pub fn update(&mut self, snapshot: MarketSnapshot) {
        self.latest.insert(snapshot.symbol.clone(), snapshot);
    }

    pub fn get(&self, symbol: &str) -> Option<&MarketSnapshot> {
        self.latest.get(symbol)
    }
}
