//! Synchronous core that owns every algo instance and routes events to them.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kestrel_config::EngineConfig;
use kestrel_core::{
    AlgoId, Instrument, MarketSnapshot, OrderId, OrderRequest, OrderUpdate, Symbol, Trade,
};
use kestrel_gateway::Gateway;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::instance::{AlgoInstance, AlgoSnapshot, AlgoStatus, AlgoUpdate, InstanceLimits, Outbound};
use crate::parent::ParentOrderSpec;
use crate::strategy::Strategy;
use crate::throttle::{QueuedSubmission, SubmissionThrottle};
use crate::{EngineError, EngineResult, InstrumentRegistry, SnapshotCache};

/// Final snapshots of algos that left the active set.
struct Archive {
    capacity: usize,
    entries: HashMap<AlgoId, AlgoSnapshot>,
    order: VecDeque<AlgoId>,
}

impl Archive {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, snapshot: AlgoSnapshot) {
        if self.capacity == 0 {
            return;
        }
        while self.order.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
        self.order.push_back(snapshot.id);
        self.entries.insert(snapshot.id, snapshot);
    }

    fn get(&self, id: &AlgoId) -> Option<&AlgoSnapshot> {
        self.entries.get(id)
    }
}

/// Owns the algo registry, the order-id index and the snapshot cache.
///
/// Every method takes `&mut self`; callers serialize access (see
/// [`crate::EngineRunner`]). Gateway calls are fire-and-forget, state is
/// corrected by later order updates.
pub struct AlgoEngine {
    config: EngineConfig,
    gateway: Arc<dyn Gateway>,
    instruments: InstrumentRegistry,
    snapshots: SnapshotCache,
    algos: HashMap<AlgoId, AlgoInstance>,
    by_symbol: HashMap<Symbol, Vec<AlgoId>>,
    order_index: HashMap<OrderId, AlgoId>,
    throttle: SubmissionThrottle,
    archive: Archive,
    updates: Vec<AlgoUpdate>,
    clock: DateTime<Utc>,
}

impl AlgoEngine {
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn Gateway>,
        instruments: InstrumentRegistry,
    ) -> Self {
        Self {
            throttle: SubmissionThrottle::new(config.max_orders_per_sec),
            archive: Archive::new(config.retain_completed),
            config,
            gateway,
            instruments,
            snapshots: SnapshotCache::new(),
            algos: HashMap::new(),
            by_symbol: HashMap::new(),
            order_index: HashMap::new(),
            updates: Vec::new(),
            clock: DateTime::<Utc>::MIN_UTC,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn register_instrument(&mut self, instrument: Instrument) -> EngineResult<()> {
        self.instruments.register(instrument)
    }

    /// Latest cached snapshot for an instrument.
    pub fn market(&self, symbol: &str) -> Option<&MarketSnapshot> {
        self.snapshots.get(symbol)
    }

    /// Submissions waiting for throttle capacity.
    pub fn queued_submissions(&self) -> usize {
        self.throttle.len()
    }

    /// Notifications produced since the last call.
    pub fn drain_updates(&mut self) -> Vec<AlgoUpdate> {
        std::mem::take(&mut self.updates)
    }

    /// Engine time never moves backwards, whatever order events arrive in.
    fn advance(&mut self, at: DateTime<Utc>) -> DateTime<Utc> {
        if at > self.clock {
            self.clock = at;
        }
        self.clock
    }

    /// Validate a parent order, launch it and evaluate it once.
    pub fn start(&mut self, spec: ParentOrderSpec, now: DateTime<Utc>) -> EngineResult<AlgoId> {
        let now = self.advance(now);
        let instrument = self
            .instruments
            .get(&spec.symbol)
            .cloned()
            .ok_or_else(|| EngineError::InvalidSpec(format!("unknown instrument {}", spec.symbol)))?;
        let params = spec.validate(&instrument)?;
        let strategy = Strategy::from_spec(&spec, &params, &instrument)?;

        let id = Uuid::new_v4();
        info!(
            algo_id = %id,
            symbol = %spec.symbol,
            side = ?spec.side,
            qty = %spec.volume,
            limit = ?spec.limit_price,
            strategy = %spec.strategy,
            "starting algo"
        );
        let symbol = spec.symbol.clone();
        let mut instance =
            AlgoInstance::new(id, spec, instrument, strategy, InstanceLimits::from(&self.config), now);
        instance.activate(now);
        self.algos.insert(id, instance);
        self.by_symbol.entry(symbol).or_default().push(id);

        self.evaluate(id, now);
        self.collect(id);
        Ok(id)
    }

    pub fn pause(&mut self, id: AlgoId, now: DateTime<Utc>) -> EngineResult<AlgoStatus> {
        let now = self.advance(now);
        if let Some(snapshot) = self.archive.get(&id) {
            return Ok(snapshot.status);
        }
        let instance = self.algos.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        let status = instance.pause(now);
        self.collect(id);
        Ok(status)
    }

    pub fn resume(&mut self, id: AlgoId, now: DateTime<Utc>) -> EngineResult<AlgoStatus> {
        let now = self.advance(now);
        if let Some(snapshot) = self.archive.get(&id) {
            return Ok(snapshot.status);
        }
        let instance = self.algos.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        let status = instance.resume(now);
        if status == AlgoStatus::Running {
            self.evaluate(id, now);
        }
        self.collect(id);
        Ok(self.status_of(id).unwrap_or(status))
    }

    /// Cancel all live children and mark the algo stopped without waiting for acks.
    pub fn stop(&mut self, id: AlgoId, now: DateTime<Utc>) -> EngineResult<AlgoStatus> {
        let now = self.advance(now);
        if let Some(snapshot) = self.archive.get(&id) {
            return Ok(snapshot.status);
        }
        let instance = self.algos.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        let outbound = instance.stop(now);
        if !outbound.is_empty() {
            info!(algo_id = %id, cancels = outbound.len(), "stopping algo");
        }
        self.dispatch(outbound, now);
        self.collect(id);
        Ok(self.status_of(id).unwrap_or(AlgoStatus::Stopped))
    }

    /// Stop every active algo. Returns how many were affected.
    pub fn stop_all(&mut self, now: DateTime<Utc>) -> usize {
        let ids: Vec<AlgoId> = self.algos.keys().copied().collect();
        let mut stopped = 0;
        for id in ids {
            let active = self
                .algos
                .get(&id)
                .is_some_and(|instance| !instance.status().is_terminal());
            if active && self.stop(id, now).is_ok() {
                stopped += 1;
            }
        }
        stopped
    }

    pub fn on_tick(&mut self, snapshot: MarketSnapshot) {
        let now = self.advance(snapshot.timestamp);
        let symbol = snapshot.symbol.clone();
        self.snapshots.update(snapshot);
        let ids = self.by_symbol.get(&symbol).cloned().unwrap_or_default();
        for id in ids {
            self.evaluate(id, now);
            self.collect(id);
        }
    }

    /// Route an order update to its algo. Returns the owner, if any.
    pub fn on_order_update(&mut self, update: OrderUpdate) -> Option<AlgoId> {
        let now = self.advance(update.timestamp);
        let id = self.owner(&update.order_id)?;
        let outcome = match self.algos.get_mut(&id) {
            Some(instance) => instance.apply_update(&update),
            None => return None,
        };
        self.dispatch(outcome.outbound, now);
        if outcome.reevaluate {
            self.evaluate(id, now);
        }
        self.collect(id);
        Some(id)
    }

    /// Route a fill to its algo. Returns the owner, if any.
    pub fn on_trade(&mut self, trade: Trade) -> Option<AlgoId> {
        let now = self.advance(trade.timestamp);
        let id = self.owner(&trade.order_id)?;
        let applied = self
            .algos
            .get_mut(&id)
            .is_some_and(|instance| instance.apply_trade(&trade));
        if applied {
            self.evaluate(id, now);
        }
        self.collect(id);
        Some(id)
    }

    /// Periodic housekeeping: throttle release, timeouts, time-based strategies, reaping.
    pub fn on_timer(&mut self, now: DateTime<Utc>) {
        let now = self.advance(now);
        for queued in self.throttle.release(now) {
            self.submit(queued.algo_id, queued.request, now);
            self.collect(queued.algo_id);
        }

        let mut ids: Vec<(DateTime<Utc>, AlgoId)> = self
            .algos
            .values()
            .map(|instance| (instance.created_at(), instance.id()))
            .collect();
        ids.sort();
        for (_, id) in ids {
            if let Some(instance) = self.algos.get_mut(&id) {
                instance.expire(now);
            }
            self.evaluate(id, now);
            self.collect(id);
        }
        self.reap();
    }

    pub fn query(&self, id: AlgoId) -> EngineResult<AlgoSnapshot> {
        if let Some(instance) = self.algos.get(&id) {
            return Ok(instance.snapshot());
        }
        self.archive
            .get(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Snapshots of every algo still in the active set, oldest first.
    pub fn list_active(&self) -> Vec<AlgoSnapshot> {
        let mut active: Vec<AlgoSnapshot> = self.algos.values().map(AlgoInstance::snapshot).collect();
        active.sort_by_key(|snapshot| (snapshot.created_at, snapshot.id));
        active
    }

    fn status_of(&self, id: AlgoId) -> Option<AlgoStatus> {
        self.algos.get(&id).map(AlgoInstance::status)
    }

    fn owner(&self, order_id: &OrderId) -> Option<AlgoId> {
        let owner = self.order_index.get(order_id).copied();
        if owner.is_none() {
            let err = EngineError::DispatchUnknownOrder(order_id.clone());
            warn!(%order_id, error = %err, "dropping event for unknown order");
        }
        owner
    }

    fn evaluate(&mut self, id: AlgoId, now: DateTime<Utc>) {
        let Some(instance) = self.algos.get_mut(&id) else {
            return;
        };
        let snapshot = self.snapshots.get(&instance.spec().symbol);
        let outbound = instance.evaluate(snapshot, now);
        self.dispatch(outbound, now);
    }

    fn collect(&mut self, id: AlgoId) {
        if let Some(instance) = self.algos.get_mut(&id) {
            self.updates.extend(instance.take_notifications());
        }
    }

    fn dispatch(&mut self, outbound: Vec<Outbound>, now: DateTime<Utc>) {
        for item in outbound {
            match item {
                Outbound::Submit { algo_id, request } => {
                    if self.throttle.admit(now) {
                        self.submit(algo_id, request, now);
                    } else {
                        debug!(
                            %algo_id,
                            client_order_id = %request.client_order_id,
                            queued = self.throttle.len() + 1,
                            "order rate limit reached, queueing submission"
                        );
                        self.throttle.enqueue(QueuedSubmission { algo_id, request });
                    }
                }
                Outbound::Cancel {
                    algo_id,
                    client_order_id,
                    order_id: Some(order_id),
                    symbol,
                } => {
                    if let Err(err) = self.gateway.cancel_order(&order_id, &symbol) {
                        warn!(
                            %algo_id,
                            %order_id,
                            %client_order_id,
                            error = %err,
                            "cancel request failed"
                        );
                    }
                }
                Outbound::Cancel {
                    algo_id,
                    client_order_id,
                    order_id: None,
                    ..
                } => {
                    if self.throttle.remove(&client_order_id) {
                        debug!(%algo_id, %client_order_id, "withdrew queued submission");
                        if let Some(instance) = self.algos.get_mut(&algo_id) {
                            instance.mark_cancelled(&client_order_id, now);
                        }
                    }
                }
            }
        }
    }

    fn submit(&mut self, algo_id: AlgoId, request: OrderRequest, now: DateTime<Utc>) {
        match self.gateway.send_order(&request) {
            Ok(order_id) => {
                debug!(
                    %algo_id,
                    %order_id,
                    client_order_id = %request.client_order_id,
                    symbol = %request.symbol,
                    price = %request.price,
                    qty = %request.quantity,
                    "child order submitted"
                );
                self.order_index.insert(order_id.clone(), algo_id);
                if let Some(instance) = self.algos.get_mut(&algo_id) {
                    instance.bind_order_id(&request.client_order_id, order_id);
                }
            }
            Err(err) => {
                let rejected = EngineError::GatewayRejected {
                    client_order_id: request.client_order_id.clone(),
                    reason: err.to_string(),
                };
                warn!(%algo_id, gateway = self.gateway.name(), error = %rejected, "submission failed");
                let outbound = match self.algos.get_mut(&algo_id) {
                    Some(instance) => {
                        instance.reject_submission(&request.client_order_id, err.to_string(), now)
                    }
                    None => Vec::new(),
                };
                self.dispatch(outbound, now);
            }
        }
    }

    /// Move settled algos out of the active set.
    fn reap(&mut self) {
        let done: Vec<AlgoId> = self
            .algos
            .values()
            .filter(|instance| instance.is_reapable())
            .map(AlgoInstance::id)
            .collect();
        for id in done {
            let Some(mut instance) = self.algos.remove(&id) else {
                continue;
            };
            self.updates.extend(instance.take_notifications());
            for order_id in instance.ledger().order_ids() {
                self.order_index.remove(order_id);
            }
            if let Some(ids) = self.by_symbol.get_mut(&instance.spec().symbol) {
                ids.retain(|other| *other != id);
            }
            info!(algo_id = %id, status = ?instance.status(), "algo removed from active set");
            self.archive.insert(instance.snapshot());
        }
    }
}
