//! State machine wrapping one running parent order.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use kestrel_config::EngineConfig;
use kestrel_core::{
    AlgoId, ChildStatus, ClientOrderId, Instrument, MarketSnapshot, OrderId, OrderRequest,
    OrderUpdate, Price, Quantity, Rejection, Symbol, Trade,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::ledger::{ChildOrder, Ledger};
use crate::parent::ParentOrderSpec;
use crate::strategy::{validate_action, Action, DecisionContext, Intent, Strategy};

/// Lifecycle state of an algo.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum AlgoStatus {
    Created,
    Running,
    Paused,
    Stopped,
    Finished,
    Failed,
}

impl AlgoStatus {
    /// No further child orders will be generated.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Finished | Self::Failed)
    }
}

/// Progress notification published to hosts.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AlgoUpdate {
    pub algo_id: AlgoId,
    pub status: AlgoStatus,
    pub traded: Quantity,
    pub remaining: Quantity,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time view of an algo returned by `query`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AlgoSnapshot {
    pub id: AlgoId,
    pub spec: ParentOrderSpec,
    pub status: AlgoStatus,
    pub traded: Quantity,
    pub remaining: Quantity,
    pub live_children: Vec<ClientOrderId>,
    pub children: Vec<ChildOrder>,
    pub consecutive_rejections: u32,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_action_at: Option<DateTime<Utc>>,
}

/// Work the engine must hand to the gateway.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Submit {
        algo_id: AlgoId,
        request: OrderRequest,
    },
    Cancel {
        algo_id: AlgoId,
        client_order_id: ClientOrderId,
        /// `None` when the child never left the throttle queue.
        order_id: Option<OrderId>,
        symbol: Symbol,
    },
}

/// Result of applying an order update.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    pub outbound: Vec<Outbound>,
    /// The strategy should look at the book again right away.
    pub reevaluate: bool,
}

/// Timeouts and ceilings copied out of [`EngineConfig`].
#[derive(Clone, Copy, Debug)]
pub struct InstanceLimits {
    pub pending_timeout: Duration,
    pub cancel_ack_timeout: Duration,
    pub max_rejections: u32,
    pub strict_actions: bool,
}

impl From<&EngineConfig> for InstanceLimits {
    fn from(config: &EngineConfig) -> Self {
        Self {
            pending_timeout: config.pending_timeout(),
            cancel_ack_timeout: config.cancel_ack_timeout(),
            max_rejections: config.max_rejections,
            strict_actions: config.strict_actions,
        }
    }
}

#[derive(Clone, Debug)]
struct PendingSlot {
    client_order_id: ClientOrderId,
    since: DateTime<Utc>,
}

/// One parent order under execution.
pub struct AlgoInstance {
    id: AlgoId,
    spec: ParentOrderSpec,
    instrument: Instrument,
    strategy: Strategy,
    limits: InstanceLimits,
    status: AlgoStatus,
    ledger: Ledger,
    pending: HashMap<Intent, PendingSlot>,
    next_seq: u64,
    consecutive_rejections: u32,
    failure: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    last_action_at: Option<DateTime<Utc>>,
    notifications: Vec<AlgoUpdate>,
}

impl AlgoInstance {
    pub fn new(
        id: AlgoId,
        spec: ParentOrderSpec,
        instrument: Instrument,
        strategy: Strategy,
        limits: InstanceLimits,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            spec,
            instrument,
            strategy,
            limits,
            status: AlgoStatus::Created,
            ledger: Ledger::new(),
            pending: HashMap::new(),
            next_seq: 0,
            consecutive_rejections: 0,
            failure: None,
            created_at: now,
            started_at: None,
            last_action_at: None,
            notifications: Vec::new(),
        }
    }

    pub fn id(&self) -> AlgoId {
        self.id
    }

    pub fn spec(&self) -> &ParentOrderSpec {
        &self.spec
    }

    pub fn status(&self) -> AlgoStatus {
        self.status
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn traded(&self) -> Quantity {
        self.ledger.traded()
    }

    /// Always `spec.volume - traded`, never negative.
    pub fn remaining(&self) -> Quantity {
        (self.spec.volume - self.ledger.traded()).max(Decimal::ZERO)
    }

    /// Intents currently awaiting acknowledgement.
    pub fn pending_intents(&self) -> Vec<Intent> {
        self.pending.keys().cloned().collect()
    }

    pub fn take_notifications(&mut self) -> Vec<AlgoUpdate> {
        std::mem::take(&mut self.notifications)
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        if self.status == AlgoStatus::Created {
            self.started_at = Some(now);
            self.transition(AlgoStatus::Running, None, now);
        }
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> AlgoStatus {
        if self.status == AlgoStatus::Running {
            self.transition(AlgoStatus::Paused, None, now);
        }
        self.status
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> AlgoStatus {
        if self.status == AlgoStatus::Paused {
            self.transition(AlgoStatus::Running, None, now);
            self.check_finished(now);
        }
        self.status
    }

    /// Cancel every live child and move to STOPPED. No-op once terminal.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Vec<Outbound> {
        if self.status.is_terminal() {
            return Vec::new();
        }
        self.transition(AlgoStatus::Stopped, None, now);
        self.pending.retain(|intent, _| !intent.is_placement());
        self.cancel_live(now)
    }

    fn fail(&mut self, reason: String, now: DateTime<Utc>) -> Vec<Outbound> {
        error!(algo_id = %self.id, %reason, "algo failed");
        self.failure = Some(reason.clone());
        self.transition(AlgoStatus::Failed, Some(reason), now);
        self.pending.retain(|intent, _| !intent.is_placement());
        self.cancel_live(now)
    }

    fn cancel_live(&mut self, now: DateTime<Utc>) -> Vec<Outbound> {
        let algo_id = self.id;
        let mut outbound = Vec::new();
        for child in self.ledger.children_mut() {
            if !child.is_live() || child.cancel_requested {
                continue;
            }
            child.cancel_requested = true;
            child.cancel_requested_at = Some(now);
            outbound.push(Outbound::Cancel {
                algo_id,
                client_order_id: child.client_order_id.clone(),
                order_id: child.order_id.clone(),
                symbol: child.symbol.clone(),
            });
        }
        if !outbound.is_empty() {
            self.last_action_at = Some(now);
        }
        outbound
    }

    fn context<'a>(
        &'a self,
        snapshot: Option<&'a MarketSnapshot>,
        now: DateTime<Utc>,
    ) -> DecisionContext<'a> {
        DecisionContext {
            spec: &self.spec,
            instrument: &self.instrument,
            ledger: &self.ledger,
            snapshot,
            elapsed: self
                .started_at
                .map(|started| now - started)
                .unwrap_or_else(Duration::zero),
            started_at: self.started_at,
        }
    }

    /// Ask the strategy what to do and turn its answer into gateway work.
    pub fn evaluate(&mut self, snapshot: Option<&MarketSnapshot>, now: DateTime<Utc>) -> Vec<Outbound> {
        if self.status != AlgoStatus::Running {
            return Vec::new();
        }
        self.expire_slots(now);
        let actions = self.strategy.decide(&self.context(snapshot, now));

        let mut outbound = Vec::new();
        for action in actions {
            let intent = action.intent();
            if self.pending.contains_key(&intent) {
                debug!(algo_id = %self.id, ?intent, "intent already pending, dropping action");
                continue;
            }
            if let Err(err) = validate_action(&action, &self.context(snapshot, now)) {
                if self.limits.strict_actions {
                    panic!("algo {} produced an invalid action: {err}", self.id);
                }
                error!(algo_id = %self.id, error = %err, "dropping invalid strategy action");
                continue;
            }
            match action {
                Action::Send {
                    intent,
                    price,
                    volume,
                } => outbound.push(self.record_send(intent, price, volume, now)),
                Action::Cancel { client_order_id } => {
                    if let Some(cancel) = self.request_cancel(&client_order_id, now) {
                        outbound.push(cancel);
                    }
                }
            }
        }
        if !outbound.is_empty() {
            self.last_action_at = Some(now);
        }
        outbound
    }

    fn record_send(
        &mut self,
        intent: Intent,
        price: Price,
        volume: Quantity,
        now: DateTime<Utc>,
    ) -> Outbound {
        self.next_seq += 1;
        let client_order_id = format!("{}-{}-{}", self.strategy.kind(), self.id, self.next_seq);
        debug!(
            algo_id = %self.id,
            %client_order_id,
            %price,
            qty = %volume,
            ?intent,
            "sending child order"
        );
        self.ledger.record(ChildOrder {
            client_order_id: client_order_id.clone(),
            order_id: None,
            algo_id: self.id,
            symbol: self.spec.symbol.clone(),
            side: self.spec.side,
            price,
            volume,
            status: ChildStatus::Pending,
            filled: Decimal::ZERO,
            reported_filled: Decimal::ZERO,
            cancel_requested: false,
            cancel_requested_at: None,
            intent: intent.clone(),
            created_at: now,
        });
        self.pending.insert(
            intent,
            PendingSlot {
                client_order_id: client_order_id.clone(),
                since: now,
            },
        );
        Outbound::Submit {
            algo_id: self.id,
            request: OrderRequest {
                symbol: self.spec.symbol.clone(),
                side: self.spec.side,
                price,
                quantity: volume,
                client_order_id,
            },
        }
    }

    fn request_cancel(&mut self, client_order_id: &str, now: DateTime<Utc>) -> Option<Outbound> {
        let algo_id = self.id;
        let Some(child) = self.ledger.get_mut(client_order_id) else {
            warn!(%algo_id, %client_order_id, "strategy cancelled an unknown child");
            return None;
        };
        if !child.is_live() {
            return None;
        }
        child.cancel_requested = true;
        child.cancel_requested_at = Some(now);
        let outbound = Outbound::Cancel {
            algo_id,
            client_order_id: child.client_order_id.clone(),
            order_id: child.order_id.clone(),
            symbol: child.symbol.clone(),
        };
        self.pending.insert(
            Intent::Withdraw(client_order_id.to_string()),
            PendingSlot {
                client_order_id: client_order_id.to_string(),
                since: now,
            },
        );
        debug!(%algo_id, %client_order_id, "cancelling child order");
        Some(outbound)
    }

    pub fn bind_order_id(&mut self, client_order_id: &str, order_id: OrderId) -> bool {
        self.ledger.bind(client_order_id, order_id)
    }

    /// The gateway refused the submission synchronously.
    pub fn reject_submission(
        &mut self,
        client_order_id: &str,
        reason: String,
        now: DateTime<Utc>,
    ) -> Vec<Outbound> {
        if let Some(child) = self.ledger.get_mut(client_order_id) {
            if child.is_live() {
                child.status = ChildStatus::Rejected;
            }
        }
        self.release_slots(client_order_id, true);
        self.on_rejection(client_order_id, Rejection::retryable(reason), now)
    }

    /// A queued submission was withdrawn before reaching the gateway.
    pub fn mark_cancelled(&mut self, client_order_id: &str, now: DateTime<Utc>) {
        if let Some(child) = self.ledger.get_mut(client_order_id) {
            if child.is_live() {
                child.status = ChildStatus::Cancelled;
            }
        }
        self.release_slots(client_order_id, true);
        self.check_finished(now);
    }

    fn on_rejection(
        &mut self,
        client_order_id: &str,
        rejection: Rejection,
        now: DateTime<Utc>,
    ) -> Vec<Outbound> {
        if self.status.is_terminal() {
            return Vec::new();
        }
        self.consecutive_rejections += 1;
        warn!(
            algo_id = %self.id,
            %client_order_id,
            reason = %rejection.reason,
            fatal = rejection.fatal,
            count = self.consecutive_rejections,
            "child order rejected"
        );
        if rejection.fatal {
            return self.fail(format!("fatal rejection: {}", rejection.reason), now);
        }
        if self.consecutive_rejections > self.limits.max_rejections {
            return self.fail(
                format!(
                    "{} consecutive rejections, last: {}",
                    self.consecutive_rejections, rejection.reason
                ),
                now,
            );
        }
        Vec::new()
    }

    /// Drop slots tied to a child: placement slots on any feedback, cancel slots once terminal.
    fn release_slots(&mut self, client_order_id: &str, terminal: bool) {
        self.pending.retain(|intent, slot| {
            slot.client_order_id != client_order_id || (!intent.is_placement() && !terminal)
        });
    }

    pub fn apply_update(&mut self, update: &OrderUpdate) -> UpdateOutcome {
        let now = update.timestamp;
        let Some(child) = self.ledger.by_order_id_mut(&update.order_id) else {
            return UpdateOutcome::default();
        };
        if child.status.is_terminal() {
            debug!(
                algo_id = %self.id,
                order_id = %update.order_id,
                status = ?update.status,
                "ignoring update for finished child"
            );
            return UpdateOutcome::default();
        }
        child.status = update.status;
        child.reported_filled = child
            .reported_filled
            .max(update.filled_quantity.min(child.volume));
        let client_order_id = child.client_order_id.clone();
        self.release_slots(&client_order_id, update.status.is_terminal());

        let mut outcome = UpdateOutcome::default();
        match update.status {
            ChildStatus::Rejected => {
                let rejection = update
                    .rejection
                    .clone()
                    .unwrap_or_else(|| Rejection::retryable("rejected by venue"));
                outcome.outbound = self.on_rejection(&client_order_id, rejection, now);
            }
            ChildStatus::Cancelled | ChildStatus::Filled => {
                self.consecutive_rejections = 0;
                outcome.reevaluate = true;
            }
            ChildStatus::Active | ChildStatus::PartiallyFilled => {
                self.consecutive_rejections = 0;
            }
            ChildStatus::Pending => {}
        }
        self.check_finished(now);
        outcome
    }

    /// Book a fill. Returns whether any volume was applied.
    pub fn apply_trade(&mut self, trade: &Trade) -> bool {
        let parent_room = self.remaining();
        let algo_id = self.id;
        let Some(child) = self.ledger.by_order_id_mut(&trade.order_id) else {
            return false;
        };
        let applied = trade
            .quantity
            .min(child.unfilled())
            .min(parent_room)
            .max(Decimal::ZERO);
        if applied < trade.quantity {
            warn!(
                %algo_id,
                order_id = %trade.order_id,
                qty = %trade.quantity,
                applied = %applied,
                "trade exceeds child or parent volume, clamping"
            );
        }
        child.filled += applied;
        if child.is_live() {
            if child.filled >= child.volume {
                child.status = ChildStatus::Filled;
            } else if applied > Decimal::ZERO {
                child.status = ChildStatus::PartiallyFilled;
            }
        }
        let client_order_id = child.client_order_id.clone();
        let terminal = !child.is_live();
        self.ledger.add_traded(applied);
        self.release_slots(&client_order_id, terminal);
        if applied.is_zero() {
            return false;
        }

        self.consecutive_rejections = 0;
        info!(
            %algo_id,
            order_id = %trade.order_id,
            price = %trade.price,
            qty = %applied,
            traded = %self.traded(),
            remaining = %self.remaining(),
            "child order filled"
        );
        self.notify(None, trade.timestamp);
        self.check_finished(trade.timestamp);
        true
    }

    /// Clear stale pending slots; for stopped or failed algos give up on unacknowledged cancels.
    pub fn expire(&mut self, now: DateTime<Utc>) {
        self.expire_slots(now);
        if !matches!(self.status, AlgoStatus::Stopped | AlgoStatus::Failed) {
            return;
        }
        let algo_id = self.id;
        let timeout = self.limits.cancel_ack_timeout;
        for child in self.ledger.children_mut() {
            let overdue = child
                .cancel_requested_at
                .is_some_and(|requested| now - requested >= timeout);
            if child.is_live() && overdue {
                warn!(
                    %algo_id,
                    client_order_id = %child.client_order_id,
                    order_id = ?child.order_id,
                    "cancel not acknowledged in time, treating child as cancelled"
                );
                child.status = ChildStatus::Cancelled;
            }
        }
    }

    fn expire_slots(&mut self, now: DateTime<Utc>) {
        let algo_id = self.id;
        let timeout = self.limits.pending_timeout;
        self.pending.retain(|intent, slot| {
            let fresh = now - slot.since < timeout;
            if !fresh {
                warn!(
                    %algo_id,
                    ?intent,
                    client_order_id = %slot.client_order_id,
                    "pending action timed out"
                );
            }
            fresh
        });
    }

    fn check_finished(&mut self, now: DateTime<Utc>) {
        if self.status == AlgoStatus::Running
            && self.remaining().is_zero()
            && self.ledger.live_count() == 0
        {
            info!(algo_id = %self.id, traded = %self.traded(), "algo finished");
            self.transition(AlgoStatus::Finished, None, now);
        }
    }

    /// Terminal with every child settled.
    pub fn is_reapable(&self) -> bool {
        self.status.is_terminal() && self.ledger.live_count() == 0
    }

    fn transition(&mut self, status: AlgoStatus, reason: Option<String>, now: DateTime<Utc>) {
        info!(
            algo_id = %self.id,
            symbol = %self.spec.symbol,
            from = ?self.status,
            to = ?status,
            "algo status changed"
        );
        self.status = status;
        self.notify(reason, now);
    }

    fn notify(&mut self, reason: Option<String>, now: DateTime<Utc>) {
        self.notifications.push(AlgoUpdate {
            algo_id: self.id,
            status: self.status,
            traded: self.traded(),
            remaining: self.remaining(),
            reason,
            timestamp: now,
        });
    }

    pub fn snapshot(&self) -> AlgoSnapshot {
        AlgoSnapshot {
            id: self.id,
            spec: self.spec.clone(),
            status: self.status,
            traded: self.traded(),
            remaining: self.remaining(),
            live_children: self
                .ledger
                .live()
                .map(|child| child.client_order_id.clone())
                .collect(),
            children: self.ledger.children().to_vec(),
            consecutive_rejections: self.consecutive_rejections,
            failure: self.failure.clone(),
            created_at: self.created_at,
            last_action_at: self.last_action_at,
        }
    }
}
