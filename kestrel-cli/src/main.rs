mod telemetry;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use kestrel_config::load_config_from;
use kestrel_core::{AlgoId, ExecutionReport, Symbol};
use kestrel_execution::{
    AlgoEngine, AlgoSnapshot, EngineHandle, EngineRunner, InstrumentRegistry, ParentOrderSpec,
    StrategyKind,
};
use kestrel_paper::{PaperGateway, RandomWalkFeed};
use rust_decimal::Decimal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about = "Kestrel algorithmic execution")]
struct Cli {
    /// Directory holding default.toml and the per-environment overrides
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,
    /// Environment overlay, e.g. `paper` loads config/paper.toml
    #[arg(long)]
    env: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute parent orders against a simulated random-walk market
    Simulate {
        /// JSON array of parent orders
        #[arg(long)]
        orders: PathBuf,
        #[arg(long, default_value_t = 600)]
        ticks: usize,
        #[arg(long, default_value_t = 250)]
        tick_ms: u64,
        #[arg(long, default_value = "30000")]
        start_price: Decimal,
        #[arg(long, default_value_t = 0.0005)]
        volatility: f64,
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
    /// Print every strategy with its parameters
    Strategies,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Simulate {
            orders,
            ticks,
            tick_ms,
            start_price,
            volatility,
            seed,
        } => {
            let config = load_config_from(&cli.config_dir, cli.env.as_deref())?;
            let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
            telemetry::init_tracing(&filter, config.log_path.as_deref())?;

            let registry = InstrumentRegistry::from_instruments(config.instruments.clone())
                .context("invalid instrument configuration")?;
            let specs = read_orders(&orders)?;
            let mut feeds = BTreeMap::new();
            for (idx, spec) in specs.iter().enumerate() {
                if feeds.contains_key(&spec.symbol) {
                    continue;
                }
                let instrument = registry
                    .get(&spec.symbol)
                    .cloned()
                    .with_context(|| format!("order {idx} trades unknown instrument {}", spec.symbol))?;
                let feed = RandomWalkFeed::new(instrument, start_price, volatility, feed_seed(seed, idx));
                feeds.insert(spec.symbol.clone(), feed);
            }

            let venue = Arc::new(PaperGateway::default());
            let engine = AlgoEngine::new(config.engine.clone(), venue.clone(), registry);
            let settings = Simulation {
                ticks,
                tick: Duration::from_millis(tick_ms.max(1)),
            };
            let report = simulate(engine, venue, feeds, specs, settings).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Strategies => print_strategies(),
    }
    Ok(())
}

struct Simulation {
    ticks: usize,
    tick: Duration,
}

/// Per-symbol feed seed; wraps instead of overflowing near `u64::MAX`.
fn feed_seed(seed: u64, idx: usize) -> u64 {
    seed.wrapping_add(idx as u64)
}

fn read_orders(path: &Path) -> Result<Vec<ParentOrderSpec>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read orders from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse orders in {}", path.display()))
}

async fn simulate(
    engine: AlgoEngine,
    venue: Arc<PaperGateway>,
    mut feeds: BTreeMap<Symbol, RandomWalkFeed>,
    specs: Vec<ParentOrderSpec>,
    settings: Simulation,
) -> Result<Vec<AlgoSnapshot>> {
    let (handle, task) = EngineRunner::spawn(engine);
    let mut updates = handle.subscribe();
    let progress = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => info!(
                    algo_id = %update.algo_id,
                    status = ?update.status,
                    traded = %update.traded,
                    remaining = %update.remaining,
                    reason = ?update.reason,
                    "algo update"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "progress log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut ids: Vec<AlgoId> = Vec::with_capacity(specs.len());
    for spec in specs {
        let strategy = spec.strategy;
        let id = handle
            .start(spec)
            .await
            .with_context(|| format!("failed to start {strategy} order"))?;
        ids.push(id);
    }
    route_reports(&handle, &venue)?;

    let mut ticker = tokio::time::interval(settings.tick);
    for step in 0..settings.ticks {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                warn!(step, "interrupted, stopping every algo");
                break;
            }
        }
        let now = Utc::now();
        for feed in feeds.values_mut() {
            let snapshot = feed.next_snapshot(now);
            venue.on_snapshot(&snapshot);
            handle.deliver_tick(snapshot)?;
        }
        route_reports(&handle, &venue)?;
        if all_settled(&handle, &ids).await? {
            info!(step, "every algo has settled");
            break;
        }
    }

    handle.shutdown().await?;
    // the progress task ends once the last update sender is gone
    drop(handle);
    let engine = task.await.context("engine task panicked")?;
    progress.await.context("progress task panicked")?;
    ids.into_iter()
        .map(|id| engine.query(id).map_err(anyhow::Error::from))
        .collect()
}

/// Feed every pending paper venue report back into the engine.
fn route_reports(handle: &EngineHandle, venue: &PaperGateway) -> Result<()> {
    for report in venue.drain_reports() {
        match report {
            ExecutionReport::OrderUpdate(update) => handle.deliver_order_update(update)?,
            ExecutionReport::Trade(trade) => handle.deliver_trade(trade)?,
        }
    }
    Ok(())
}

async fn all_settled(handle: &EngineHandle, ids: &[AlgoId]) -> Result<bool> {
    for id in ids {
        let snapshot = handle.query(*id).await?;
        if !snapshot.status.is_terminal() || !snapshot.live_children.is_empty() {
            return Ok(false);
        }
    }
    Ok(true)
}

fn print_strategies() {
    let show = |value: Option<Decimal>| value.map(|v| v.to_string()).unwrap_or_else(|| "-".into());
    for kind in StrategyKind::ALL {
        println!("{kind}");
        for param in kind.params() {
            let requirement = if param.required { "required" } else { "optional" };
            println!(
                "  {:<20} default={:<6} min={:<6} max={:<12} {requirement:<8} {}",
                param.name,
                show(param.default),
                show(param.min),
                show(param.max),
                param.description
            );
        }
    }
}
