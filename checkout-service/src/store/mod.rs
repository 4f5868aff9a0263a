use async_trait::async_trait;
use shared::{Order, OrderDetails, OrderItem, OrderStatus, OutboxEvent, Payment, PaymentOutcome};
use uuid::Uuid;

use crate::error::CheckoutError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Result of applying a gateway outcome to a stored payment.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub payment: Payment,
    pub order_status: OrderStatus,
    /// False when the payment already carried this outcome and nothing was written.
    pub applied: bool,
}

/// Durable order and payment state.
///
/// Every write that changes an order or payment also appends its domain event
/// to the outbox within the same unit of work.
#[async_trait]
pub trait CheckoutStore: Send + Sync {
    /// Inserts the order, its item snapshot and an `OrderCreated` event atomically.
    async fn create_order(&self, order: &Order, items: &[OrderItem]) -> Result<(), CheckoutError>;

    async fn find_order(&self, order_id: Uuid) -> Result<Option<OrderDetails>, CheckoutError>;

    /// Newest first.
    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<OrderDetails>, CheckoutError>;

    /// Records the pending payment for an order, keyed on `order_id`.
    ///
    /// If the order already has a payment for the same intent, that payment is
    /// returned unchanged. A payment for a different intent is a conflict.
    async fn record_payment(
        &self,
        payment: &Payment,
        amount_minor: i64,
    ) -> Result<Payment, CheckoutError>;

    async fn find_payment_by_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Payment>, CheckoutError>;

    /// Moves the payment matching `payment_intent_id` and its order to the
    /// outcome's statuses in one unit of work.
    async fn settle_payment(
        &self,
        payment_intent_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<Reconciliation, CheckoutError>;

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, CheckoutError>;

    async fn mark_event_published(&self, event_id: Uuid) -> Result<(), CheckoutError>;

    async fn webhook_event_seen(&self, event_id: &str) -> Result<bool, CheckoutError>;

    async fn record_webhook_event(&self, event_id: &str, event_type: &str) -> Result<(), CheckoutError>;
}
