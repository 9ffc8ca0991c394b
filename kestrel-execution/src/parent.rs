//! Parent order description and per-strategy parameter tables.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use kestrel_core::{Instrument, Price, Quantity, Side, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{EngineError, EngineResult};

/// Execution strategies the engine knows how to run.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Twap,
    Iceberg,
    Sniper,
    BestLimit,
    Stop,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Twap,
        StrategyKind::Iceberg,
        StrategyKind::Sniper,
        StrategyKind::BestLimit,
        StrategyKind::Stop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Twap => "twap",
            Self::Iceberg => "iceberg",
            Self::Sniper => "sniper",
            Self::BestLimit => "best_limit",
            Self::Stop => "stop",
        }
    }

    /// Parameters accepted by this strategy, with defaults and bounds.
    pub fn params(self) -> Vec<ParamSpec> {
        match self {
            Self::Twap => vec![
                ParamSpec::integer("slices", "number of equal slices", 10, 1, 10_000),
                ParamSpec::integer("interval_secs", "seconds between slices", 60, 1, 86_400),
                ParamSpec::integer(
                    "price_offset_ticks",
                    "ticks added beyond the opposite best price",
                    0,
                    0,
                    1_000,
                ),
            ],
            Self::Iceberg => vec![ParamSpec::required(
                "display_volume",
                "volume shown by each child order",
            )],
            Self::Sniper => vec![
                ParamSpec::optional(
                    "trigger_price",
                    "opposite best price that fires the order (defaults to the limit)",
                ),
                ParamSpec::integer(
                    "sweep_displayed",
                    "1 to take only the displayed opposite volume",
                    0,
                    0,
                    1,
                ),
            ],
            Self::BestLimit => vec![
                ParamSpec::optional("min_volume", "smallest randomized child volume"),
                ParamSpec::optional("max_volume", "largest randomized child volume"),
                ParamSpec::integer("seed", "seed for child volume draws", 0, 0, u32::MAX as i64),
            ],
            Self::Stop => vec![
                ParamSpec::required("trigger_price", "last price that fires the order"),
                ParamSpec::integer(
                    "price_add_ticks",
                    "ticks added beyond the trigger when firing",
                    0,
                    0,
                    1_000,
                ),
            ],
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized || normalized == kind.as_str().replace('_', ""))
            .ok_or_else(|| EngineError::invalid_spec(format!("unknown strategy kind '{value}'")))
    }
}

/// Declaration of a single named strategy option.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub default: Option<Decimal>,
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
    pub required: bool,
    pub integer: bool,
}

impl ParamSpec {
    fn integer(name: &'static str, description: &'static str, default: i64, min: i64, max: i64) -> Self {
        Self {
            name,
            description,
            default: Some(Decimal::from(default)),
            min: Some(Decimal::from(min)),
            max: Some(Decimal::from(max)),
            required: false,
            integer: true,
        }
    }

    fn optional(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            default: None,
            min: Some(Decimal::ZERO),
            max: None,
            required: false,
            integer: false,
        }
    }

    fn required(name: &'static str, description: &'static str) -> Self {
        Self {
            required: true,
            ..Self::optional(name, description)
        }
    }

    fn check(&self, value: Decimal) -> EngineResult<()> {
        if self.integer && !value.fract().is_zero() {
            return Err(EngineError::invalid_spec(format!(
                "parameter '{}' must be an integer, got {value}",
                self.name
            )));
        }
        if self.min.is_some_and(|min| value < min) || self.max.is_some_and(|max| value > max) {
            return Err(EngineError::invalid_spec(format!(
                "parameter '{}' = {value} outside [{}, {}]",
                self.name,
                self.min.map(|v| v.to_string()).unwrap_or_else(|| "-inf".into()),
                self.max.map(|v| v.to_string()).unwrap_or_else(|| "inf".into()),
            )));
        }
        Ok(())
    }
}

/// Parameter values after defaults have been applied and bounds checked.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedParams {
    values: BTreeMap<String, Decimal>,
}

impl ResolvedParams {
    pub fn get(&self, name: &str) -> Option<Decimal> {
        self.values.get(name).copied()
    }

    pub fn require(&self, name: &str) -> EngineResult<Decimal> {
        self.get(name)
            .ok_or_else(|| EngineError::invalid_spec(format!("parameter '{name}' is required")))
    }

    /// Integer parameter; bounds were already enforced during resolution.
    pub fn integer(&self, name: &str) -> EngineResult<u64> {
        let value = self.require(name)?;
        u64::try_from(value)
            .map_err(|_| EngineError::invalid_spec(format!("parameter '{name}' is not a count")))
    }
}

/// Everything the host supplies to launch an algo. Immutable once started.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ParentOrderSpec {
    pub symbol: Symbol,
    pub side: Side,
    pub volume: Quantity,
    #[serde(default)]
    pub limit_price: Option<Price>,
    pub strategy: StrategyKind,
    #[serde(default)]
    pub params: BTreeMap<String, Decimal>,
}

impl ParentOrderSpec {
    pub fn new(symbol: impl Into<Symbol>, side: Side, volume: Quantity, strategy: StrategyKind) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            volume,
            limit_price: None,
            strategy,
            params: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_limit(mut self, price: Price) -> Self {
        self.limit_price = Some(price);
        self
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: Decimal) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Check the order against the instrument and resolve strategy parameters.
    pub fn validate(&self, instrument: &Instrument) -> EngineResult<ResolvedParams> {
        if self.symbol != instrument.symbol {
            return Err(EngineError::invalid_spec(format!(
                "order symbol {} does not match instrument {}",
                self.symbol, instrument.symbol
            )));
        }
        if self.volume <= Decimal::ZERO {
            return Err(EngineError::invalid_spec("volume must be positive"));
        }
        if !instrument.is_on_lot(self.volume) {
            return Err(EngineError::invalid_spec(format!(
                "volume {} is not a multiple of lot size {}",
                self.volume, instrument.lot_size
            )));
        }
        if let Some(limit) = self.limit_price {
            if limit <= Decimal::ZERO || !instrument.is_on_tick(limit) {
                return Err(EngineError::invalid_spec(format!(
                    "limit price {limit} must be positive and a multiple of tick size {}",
                    instrument.tick_size
                )));
            }
        }

        let table = self.strategy.params();
        if let Some(unknown) = self
            .params
            .keys()
            .find(|name| !table.iter().any(|spec| spec.name == name.as_str()))
        {
            return Err(EngineError::invalid_spec(format!(
                "strategy {} has no parameter '{unknown}'",
                self.strategy
            )));
        }

        let mut values = BTreeMap::new();
        for spec in &table {
            match self.params.get(spec.name).copied().or(spec.default) {
                Some(value) => {
                    spec.check(value)?;
                    values.insert(spec.name.to_string(), value);
                }
                None if spec.required => {
                    return Err(EngineError::invalid_spec(format!(
                        "strategy {} requires parameter '{}'",
                        self.strategy, spec.name
                    )));
                }
                None => {}
            }
        }
        Ok(ResolvedParams { values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc() -> Instrument {
        Instrument::new("BTCUSDT", Decimal::new(1, 1), Decimal::new(1, 3))
    }

    #[test]
    fn kind_parses_common_spellings() {
        assert_eq!("TWAP".parse::<StrategyKind>().unwrap(), StrategyKind::Twap);
        assert_eq!("best-limit".parse::<StrategyKind>().unwrap(), StrategyKind::BestLimit);
        assert_eq!("bestlimit".parse::<StrategyKind>().unwrap(), StrategyKind::BestLimit);
        assert!("vwap".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn defaults_fill_missing_params() {
        let spec = ParentOrderSpec::new("BTCUSDT", Side::Buy, Decimal::ONE, StrategyKind::Twap);
        let params = spec.validate(&btc()).unwrap();
        assert_eq!(params.integer("slices").unwrap(), 10);
        assert_eq!(params.integer("interval_secs").unwrap(), 60);
    }

    #[test]
    fn rejects_unknown_and_out_of_range_params() {
        let base = ParentOrderSpec::new("BTCUSDT", Side::Buy, Decimal::ONE, StrategyKind::Twap);
        let unknown = base.clone().with_param("window", Decimal::ONE);
        assert!(matches!(unknown.validate(&btc()), Err(EngineError::InvalidSpec(_))));

        let zero_slices = base.clone().with_param("slices", Decimal::ZERO);
        assert!(zero_slices.validate(&btc()).is_err());

        let fractional = base.with_param("slices", Decimal::new(15, 1));
        assert!(fractional.validate(&btc()).is_err());
    }

    #[test]
    fn rejects_bad_volume_and_limit() {
        let off_lot = ParentOrderSpec::new("BTCUSDT", Side::Buy, Decimal::new(10005, 4), StrategyKind::Twap);
        assert!(off_lot.validate(&btc()).is_err());

        let zero = ParentOrderSpec::new("BTCUSDT", Side::Buy, Decimal::ZERO, StrategyKind::Twap);
        assert!(zero.validate(&btc()).is_err());

        let off_tick = ParentOrderSpec::new("BTCUSDT", Side::Buy, Decimal::ONE, StrategyKind::Twap)
            .with_limit(Decimal::new(10005, 2));
        assert!(off_tick.validate(&btc()).is_err());
    }

    #[test]
    fn required_params_must_be_present() {
        let spec = ParentOrderSpec::new("BTCUSDT", Side::Sell, Decimal::ONE, StrategyKind::Iceberg);
        assert!(spec.validate(&btc()).is_err());
        let spec = spec.with_param("display_volume", Decimal::new(1, 1));
        assert_eq!(
            spec.validate(&btc()).unwrap().get("display_volume"),
            Some(Decimal::new(1, 1))
        );
    }

    #[test]
    fn spec_deserializes_from_json() {
        let raw = r#"{
            "symbol": "BTCUSDT",
            "side": "Buy",
            "volume": "2.5",
            "limit_price": "25000.5",
            "strategy": "best_limit",
            "params": {"min_volume": "0.1", "max_volume": "0.5"}
        }"#;
        let spec: ParentOrderSpec = serde_json::from_str(raw).unwrap();
        assert_eq!(spec.strategy, StrategyKind::BestLimit);
        assert_eq!(spec.params.len(), 2);
        assert!(spec.validate(&btc()).is_ok());
    }
}
