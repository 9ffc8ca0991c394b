//! Layered configuration loading utilities.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use config::{Config, ConfigError, Environment, File};
use kestrel_core::Instrument;
use serde::{Deserialize, Serialize};

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub instruments: Vec<Instrument>,
}

/// Limits and timeouts applied by the algo engine.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Child-order submissions allowed per second across every algo.
    #[serde(default = "default_max_orders_per_sec")]
    pub max_orders_per_sec: u32,
    /// Period of the timer that drives time-based strategies and timeouts.
    #[serde(default = "default_timer_interval_ms")]
    pub timer_interval_ms: u64,
    /// How long an unacknowledged action blocks a retry of the same intent.
    #[serde(default = "default_pending_timeout_ms")]
    pub pending_timeout_ms: u64,
    /// After a stop, cancels unacknowledged for this long count as done.
    #[serde(default = "default_cancel_ack_timeout_ms")]
    pub cancel_ack_timeout_ms: u64,
    /// Consecutive gateway rejections tolerated before an algo fails.
    #[serde(default = "default_max_rejections")]
    pub max_rejections: u32,
    /// Finished algos kept around for `query` after leaving the active set.
    #[serde(default = "default_retain_completed")]
    pub retain_completed: usize,
    /// Panic on malformed strategy actions instead of dropping them.
    #[serde(default = "default_strict_actions")]
    pub strict_actions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_orders_per_sec: default_max_orders_per_sec(),
            timer_interval_ms: default_timer_interval_ms(),
            pending_timeout_ms: default_pending_timeout_ms(),
            cancel_ack_timeout_ms: default_cancel_ack_timeout_ms(),
            max_rejections: default_max_rejections(),
            retain_completed: default_retain_completed(),
            strict_actions: default_strict_actions(),
        }
    }
}

impl EngineConfig {
    pub fn pending_timeout(&self) -> Duration {
        Duration::milliseconds(self.pending_timeout_ms as i64)
    }

    pub fn cancel_ack_timeout(&self) -> Duration {
        Duration::milliseconds(self.cancel_ack_timeout_ms as i64)
    }

    pub fn timer_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timer_interval_ms.max(1))
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_orders_per_sec() -> u32 {
    20
}

fn default_timer_interval_ms() -> u64 {
    1_000
}

fn default_pending_timeout_ms() -> u64 {
    5_000
}

fn default_cancel_ack_timeout_ms() -> u64 {
    10_000
}

fn default_max_rejections() -> u32 {
    3
}

fn default_retain_completed() -> usize {
    1_024
}

fn default_strict_actions() -> bool {
    cfg!(debug_assertions)
}

/// Loads configuration by merging files and environment variables.
///
/// Sources (lowest to highest precedence):
/// 1. `config/default.toml`
/// 2. `config/{environment}.toml` (if `environment` is Some)
/// 3. `config/local.toml` (optional, ignored in git)
/// 4. Environment variables prefixed with `KESTREL__`
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    load_config_from(Path::new("config"), env)
}

/// Same as [`load_config`] but rooted at an arbitrary configuration directory.
pub fn load_config_from(base_path: &Path, env: Option<&str>) -> Result<AppConfig> {
    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(true));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }

    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));

    builder = builder.add_source(
        Environment::with_prefix("KESTREL")
            .prefix_separator("__")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder
        .build()
        .with_context(|| format!("failed to read configuration from {}", base_path.display()))?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::fs;

    #[test]
    fn engine_defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.max_orders_per_sec, 20);
        assert_eq!(config.pending_timeout(), Duration::seconds(5));
        assert_eq!(config.cancel_ack_timeout(), Duration::seconds(10));
        assert_eq!(config.max_rejections, 3);
    }

    #[test]
    fn layered_files_override_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(
            dir.path().join("default.toml"),
            r#"
log_level = "debug"

[engine]
max_orders_per_sec = 5

[[instruments]]
symbol = "BTCUSDT"
tick_size = "0.1"
lot_size = "0.001"
"#,
        )?;
        fs::write(
            dir.path().join("paper.toml"),
            r#"
[engine]
max_rejections = 7
"#,
        )?;

        let config = load_config_from(dir.path(), Some("paper"))?;
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.engine.max_orders_per_sec, 5);
        assert_eq!(config.engine.max_rejections, 7);
        assert_eq!(config.engine.pending_timeout_ms, 5_000);
        assert_eq!(config.instruments.len(), 1);
        assert_eq!(config.instruments[0].tick_size, Decimal::new(1, 1));
        Ok(())
    }

    #[test]
    fn missing_default_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config_from(dir.path(), None).is_err());
    }
}
