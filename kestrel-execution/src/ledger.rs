//! Per-algo record of child orders and their fills.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use kestrel_core::{AlgoId, ChildStatus, ClientOrderId, OrderId, Price, Quantity, Side, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::strategy::Intent;

/// One exchange order sent on behalf of a parent.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ChildOrder {
    pub client_order_id: ClientOrderId,
    /// Venue identifier; `None` while the submission waits in the throttle queue.
    pub order_id: Option<OrderId>,
    pub algo_id: AlgoId,
    pub symbol: Symbol,
    pub side: Side,
    pub price: Price,
    pub volume: Quantity,
    pub status: ChildStatus,
    /// Volume confirmed by trade events.
    pub filled: Quantity,
    /// Highest cumulative fill reported by order updates.
    pub reported_filled: Quantity,
    pub cancel_requested: bool,
    pub cancel_requested_at: Option<DateTime<Utc>>,
    pub intent: Intent,
    pub created_at: DateTime<Utc>,
}

impl ChildOrder {
    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Accepted by the venue and resting on the book.
    pub fn is_working(&self) -> bool {
        matches!(
            self.status,
            ChildStatus::Active | ChildStatus::PartiallyFilled
        )
    }

    /// Volume this child has taken out of the parent for slicing purposes.
    pub fn committed(&self) -> Quantity {
        match self.status {
            ChildStatus::Cancelled | ChildStatus::Rejected => self.filled.max(self.reported_filled),
            _ => self.volume,
        }
    }

    pub fn unfilled(&self) -> Quantity {
        (self.volume - self.filled).max(Decimal::ZERO)
    }
}

/// Child orders of one algo in submission order.
#[derive(Debug, Default)]
pub struct Ledger {
    children: Vec<ChildOrder>,
    by_client: HashMap<ClientOrderId, usize>,
    by_order: HashMap<OrderId, usize>,
    traded: Quantity,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, child: ChildOrder) {
        let idx = self.children.len();
        self.by_client.insert(child.client_order_id.clone(), idx);
        if let Some(order_id) = &child.order_id {
            self.by_order.insert(order_id.clone(), idx);
        }
        self.children.push(child);
    }

    /// Attach the venue identifier once the gateway accepted the submission.
    pub fn bind(&mut self, client_order_id: &str, order_id: OrderId) -> bool {
        let Some(&idx) = self.by_client.get(client_order_id) else {
            return false;
        };
        self.children[idx].order_id = Some(order_id.clone());
        self.by_order.insert(order_id, idx);
        true
    }

    pub fn get(&self, client_order_id: &str) -> Option<&ChildOrder> {
        self.by_client
            .get(client_order_id)
            .map(|&idx| &self.children[idx])
    }

    pub fn get_mut(&mut self, client_order_id: &str) -> Option<&mut ChildOrder> {
        self.by_client
            .get(client_order_id)
            .map(|&idx| &mut self.children[idx])
    }

    pub fn by_order_id_mut(&mut self, order_id: &str) -> Option<&mut ChildOrder> {
        self.by_order
            .get(order_id)
            .map(|&idx| &mut self.children[idx])
    }

    pub fn children(&self) -> &[ChildOrder] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> impl Iterator<Item = &mut ChildOrder> {
        self.children.iter_mut()
    }

    pub fn live(&self) -> impl Iterator<Item = &ChildOrder> {
        self.children.iter().filter(|child| child.is_live())
    }

    /// The single outstanding child, for strategies that keep at most one.
    pub fn live_child(&self) -> Option<&ChildOrder> {
        self.live().next()
    }

    pub fn live_count(&self) -> usize {
        self.live().count()
    }

    pub fn committed(&self) -> Quantity {
        self.children.iter().map(ChildOrder::committed).sum()
    }

    pub fn traded(&self) -> Quantity {
        self.traded
    }

    /// Number of children ever recorded, including rejected ones.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn add_traded(&mut self, qty: Quantity) {
        self.traded += qty;
    }

    pub fn order_ids(&self) -> impl Iterator<Item = &OrderId> {
        self.by_order.keys()
    }
}
