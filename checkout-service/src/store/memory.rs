use async_trait::async_trait;
use chrono::Utc;
use shared::{
    plan_settlement, CheckoutEvent, Order, OrderDetails, OrderItem,
    OutboxEvent, Payment, PaymentOutcome, Settlement,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CheckoutStore, Reconciliation};
use crate::error::CheckoutError;

#[derive(Default)]
struct State {
    orders: HashMap<Uuid, Order>,
    items: Vec<OrderItem>,
    payments: HashMap<Uuid, Payment>,
    outbox: Vec<OutboxEvent>,
    webhook_events: HashSet<String>,
}

impl State {
    fn details(&self, order: &Order) -> OrderDetails {
        OrderDetails {
            order: order.clone(),
            order_items: self
                .items
                .iter()
                .filter(|item| item.order_id == order.id)
                .cloned()
                .collect(),
            payments: self.payments.get(&order.id).cloned().into_iter().collect(),
        }
    }
}

/// Process-local store for development and tests.
///
/// Counts every row it writes and can be told to refuse writes, which makes
/// partial failures observable.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    writes: AtomicUsize,
    failing_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows inserted or updated so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing_writes.store(failing, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), CheckoutError> {
        if self.failing_writes.load(Ordering::SeqCst) {
            return Err(CheckoutError::Persistence("store rejected the write".to_string()));
        }
        Ok(())
    }

    fn count(&self, rows: usize) {
        self.writes.fetch_add(rows, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckoutStore for MemoryStore {
    async fn create_order(&self, order: &Order, items: &[OrderItem]) -> Result<(), CheckoutError> {
        self.check_writable()?;
        let event = OutboxEvent::new(&CheckoutEvent::OrderCreated {
            order_id: order.id,
            user_id: order.user_id,
            total_amount: order.total_amount.clone(),
            item_count: items.len(),
        })?;

        let mut state = self.state.lock().await;
        if state.orders.contains_key(&order.id) {
            return Err(CheckoutError::Conflict(format!("order {} already exists", order.id)));
        }
        state.orders.insert(order.id, order.clone());
        state.items.extend(items.iter().cloned());
        state.outbox.push(event);
        self.count(items.len() + 2);
        Ok(())
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<OrderDetails>, CheckoutError> {
        let state = self.state.lock().await;
        Ok(state.orders.get(&order_id).map(|order| state.details(order)))
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<OrderDetails>, CheckoutError> {
        let state = self.state.lock().await;
        let mut orders: Vec<&Order> = state
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders.into_iter().map(|order| state.details(order)).collect())
    }

    async fn find_payment_by_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Payment>, CheckoutError> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .values()
            .find(|payment| payment.payment_intent_id == payment_intent_id)
            .cloned())
    }

    async fn record_payment(
        &self,
        payment: &Payment,
        amount_minor: i64,
    ) -> Result<Payment, CheckoutError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.payments.get(&payment.order_id) {
            if existing.payment_intent_id == payment.payment_intent_id {
                return Ok(existing.clone());
            }
            return Err(CheckoutError::Conflict(format!(
                "order {} already has payment intent {}",
                payment.order_id, existing.payment_intent_id
            )));
        }
        if !state.orders.contains_key(&payment.order_id) {
            return Err(CheckoutError::NotFound(format!("order {} not found", payment.order_id)));
        }
        if state
            .payments
            .values()
            .any(|other| other.payment_intent_id == payment.payment_intent_id)
        {
            return Err(CheckoutError::Conflict(format!(
                "payment intent {} is already recorded",
                payment.payment_intent_id
            )));
        }
        self.check_writable()?;

        let event = OutboxEvent::new(&CheckoutEvent::PaymentIntentIssued {
            order_id: payment.order_id,
            payment_id: payment.id,
            payment_intent_id: payment.payment_intent_id.clone(),
            amount_minor,
        })?;
        state.payments.insert(payment.order_id, payment.clone());
        state.outbox.push(event);
        self.count(2);
        Ok(payment.clone())
    }

    async fn settle_payment(
        &self,
        payment_intent_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<Reconciliation, CheckoutError> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .values()
            .find(|payment| payment.payment_intent_id == payment_intent_id)
            .cloned()
            .ok_or_else(|| {
                CheckoutError::NotFound(format!("no payment for intent {}", payment_intent_id))
            })?;
        let order_status = state
            .orders
            .get(&payment.order_id)
            .map(|order| order.status)
            .ok_or_else(|| CheckoutError::NotFound(format!("order {} not found", payment.order_id)))?;

        match plan_settlement(payment.status, order_status, outcome)? {
            Settlement::AlreadySettled => Ok(Reconciliation {
                payment,
                order_status,
                applied: false,
            }),
            Settlement::Apply {
                payment_status,
                order_status,
            } => {
                self.check_writable()?;
                let now = Utc::now();
                let mut settled = payment;
                settled.status = payment_status;
                settled.updated_at = now;
                let event = OutboxEvent::new(&CheckoutEvent::settled(&settled, outcome))?;

                if let Some(order) = state.orders.get_mut(&settled.order_id) {
                    order.status = order_status;
                    order.updated_at = now;
                }
                state.payments.insert(settled.order_id, settled.clone());
                state.outbox.push(event);
                self.count(3);
                Ok(Reconciliation {
                    payment: settled,
                    order_status,
                    applied: true,
                })
            }
        }
    }

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, CheckoutError> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(state
            .outbox
            .iter()
            .filter(|event| !event.processed)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_event_published(&self, event_id: Uuid) -> Result<(), CheckoutError> {
        self.check_writable()?;
        let mut state = self.state.lock().await;
        let event = state
            .outbox
            .iter_mut()
            .find(|event| event.id == event_id)
            .ok_or_else(|| CheckoutError::NotFound(format!("outbox event {} not found", event_id)))?;
        event.processed = true;
        self.count(1);
        Ok(())
    }

    async fn webhook_event_seen(&self, event_id: &str) -> Result<bool, CheckoutError> {
        Ok(self.state.lock().await.webhook_events.contains(event_id))
    }

    async fn record_webhook_event(&self, event_id: &str, _event_type: &str) -> Result<(), CheckoutError> {
        self.check_writable()?;
        if self.state.lock().await.webhook_events.insert(event_id.to_string()) {
            self.count(1);
        }
        Ok(())
    }
}
