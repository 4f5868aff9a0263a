use bigdecimal::BigDecimal;
use payment_gateway::webhook::{WebhookEvent, WebhookEventKind};
use payment_gateway::{Authorization, AuthorizationRequest, PaymentGateway};
use serde::Serialize;
use shared::money::{from_minor_units, round_currency, to_minor_units};
use shared::{
    CartItem, ContactDetails, Order, OrderDetails, OrderItem, OrderStatus, Payment,
    PaymentOutcome,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::CheckoutError;
use crate::session::Session;
use crate::store::CheckoutStore;

pub const DEFAULT_PAYMENT_METHOD: &str = "card";

/// What the payer needs to drive the gateway's hosted payment UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentIntent {
    pub client_secret: String,
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub payment_intent_id: String,
}

pub fn idempotency_key(order_id: Uuid) -> String {
    format!("order-{}", order_id)
}

pub struct CheckoutFlow {
    store: Arc<dyn CheckoutStore>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
}

impl CheckoutFlow {
    pub fn new(
        store: Arc<dyn CheckoutStore>,
        gateway: Arc<dyn PaymentGateway>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            currency: currency.into(),
        }
    }

    /// Turns cart lines into a pending order with an item snapshot.
    ///
    /// Totals are compared at cent precision against the sum of the lines.
    #[instrument(skip(self, session, items, contact), fields(user_id = %session.user_id, items = items.len()))]
    pub async fn create_order(
        &self,
        session: &Session,
        items: &[CartItem],
        total_amount: &BigDecimal,
        contact: ContactDetails,
    ) -> Result<Order, CheckoutError> {
        if items.is_empty() {
            return Err(CheckoutError::Validation("order has no items".to_string()));
        }
        let zero = BigDecimal::from(0);
        for item in items {
            if item.quantity == 0 {
                return Err(CheckoutError::Validation(format!(
                    "item {} must have a positive quantity",
                    item.id
                )));
            }
            if i32::try_from(item.quantity).is_err() {
                return Err(CheckoutError::Validation(format!(
                    "item {} quantity {} is too large",
                    item.id, item.quantity
                )));
            }
            if item.price < zero {
                return Err(CheckoutError::Validation(format!(
                    "item {} has a negative price",
                    item.id
                )));
            }
            if round_currency(&item.price) != item.price {
                return Err(CheckoutError::Validation(format!(
                    "item {} price {} has more than two decimal places",
                    item.id, item.price
                )));
            }
        }
        let missing = contact.missing_fields();
        if !missing.is_empty() {
            return Err(CheckoutError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        let computed = round_currency(
            &items
                .iter()
                .fold(BigDecimal::from(0), |sum, item| sum + item.line_total()),
        );
        if round_currency(total_amount) != computed {
            return Err(CheckoutError::Validation(format!(
                "total {} does not match item total {}",
                total_amount, computed
            )));
        }

        let order = Order::new(session.user_id, computed, contact);
        let order_items = items
            .iter()
            .map(|line| OrderItem::snapshot(order.id, line))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CheckoutError::Validation(e.to_string()))?;

        self.store.create_order(&order, &order_items).await?;
        info!(order_id = %order.id, total = %order.total_amount, "order created");
        Ok(order)
    }

    /// Requests an authorization for `amount` and records the pending payment.
    ///
    /// The gateway call is keyed on the order id, so repeating it after a
    /// failed local write yields the same intent and completes the record.
    #[instrument(skip(self, session), fields(user_id = %session.user_id))]
    pub async fn issue_payment_intent(
        &self,
        session: &Session,
        order_id: Uuid,
        amount: &BigDecimal,
    ) -> Result<PaymentIntent, CheckoutError> {
        let details = self.order_for_user(session, order_id).await?;
        let order = details.order;
        if order.status != OrderStatus::Pending {
            return Err(CheckoutError::Conflict(format!(
                "order {} is {}, payment can no longer be requested",
                order.id, order.status
            )));
        }

        let amount_minor = to_minor_units(amount)?;
        if amount_minor <= 0 {
            return Err(CheckoutError::Validation(format!(
                "payment amount must be positive, got {}",
                amount
            )));
        }
        let order_minor = to_minor_units(&order.total_amount)?;
        if amount_minor != order_minor {
            return Err(CheckoutError::Validation(format!(
                "payment amount {} does not match order total {}",
                amount, order.total_amount
            )));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("order_id".to_string(), order.id.to_string());
        let request = AuthorizationRequest {
            amount_minor,
            currency: self.currency.clone(),
            idempotency_key: idempotency_key(order.id),
            metadata,
        };

        let (intent_id, client_secret) = match self.gateway.create_authorization(&request).await? {
            Authorization::Authorized { id, client_secret } => (id, client_secret),
            Authorization::Rejected { reason } => {
                warn!(order_id = %order.id, %reason, "payment intent rejected");
                return Err(CheckoutError::Gateway(reason));
            }
        };

        let payment = Payment::pending(
            order.id,
            from_minor_units(amount_minor),
            intent_id,
            DEFAULT_PAYMENT_METHOD.to_string(),
        );
        let recorded = self.store.record_payment(&payment, amount_minor).await?;

        info!(
            order_id = %order.id,
            payment_id = %recorded.id,
            payment_intent_id = %recorded.payment_intent_id,
            amount_minor,
            "payment intent issued"
        );
        Ok(PaymentIntent {
            client_secret,
            order_id: order.id,
            payment_id: recorded.id,
            payment_intent_id: recorded.payment_intent_id,
        })
    }

    /// Applies a gateway outcome to the payment and its order.
    ///
    /// A repeat of the stored outcome returns the payment without writing.
    #[instrument(skip(self))]
    pub async fn reconcile_payment(
        &self,
        payment_intent_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<Payment, CheckoutError> {
        let reconciliation = self.store.settle_payment(payment_intent_id, outcome).await?;
        if reconciliation.applied {
            info!(
                order_id = %reconciliation.payment.order_id,
                payment_status = %reconciliation.payment.status,
                order_status = %reconciliation.order_status,
                "payment reconciled"
            );
        } else {
            info!(
                order_id = %reconciliation.payment.order_id,
                "duplicate outcome ignored"
            );
        }
        Ok(reconciliation.payment)
    }

    /// Reconciles on behalf of a signed-in user, who must own the payment's order.
    pub async fn reconcile_payment_for_user(
        &self,
        session: &Session,
        payment_intent_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<Payment, CheckoutError> {
        let payment = self
            .store
            .find_payment_by_intent(payment_intent_id)
            .await?
            .ok_or_else(|| {
                CheckoutError::NotFound(format!("no payment for intent {}", payment_intent_id))
            })?;
        match self.order_for_user(session, payment.order_id).await {
            Ok(_) => {}
            Err(CheckoutError::NotFound(_)) => {
                warn!(user_id = %session.user_id, payment_intent_id, "reconcile for another user's payment");
                return Err(CheckoutError::NotFound(format!(
                    "no payment for intent {}",
                    payment_intent_id
                )));
            }
            Err(e) => return Err(e),
        }
        self.reconcile_payment(payment_intent_id, outcome).await
    }

    /// Creates the order, then requests payment for its total.
    pub async fn begin_checkout(
        &self,
        session: &Session,
        items: &[CartItem],
        total_amount: &BigDecimal,
        contact: ContactDetails,
    ) -> Result<PaymentIntent, CheckoutError> {
        let order = self.create_order(session, items, total_amount, contact).await?;
        self.issue_payment_intent(session, order.id, &order.total_amount)
            .await
    }

    pub async fn order_for_user(
        &self,
        session: &Session,
        order_id: Uuid,
    ) -> Result<OrderDetails, CheckoutError> {
        match self.store.find_order(order_id).await? {
            Some(details) if details.order.user_id == session.user_id => Ok(details),
            _ => Err(CheckoutError::NotFound(format!("order {} not found", order_id))),
        }
    }

    pub async fn orders_for_user(&self, session: &Session) -> Result<Vec<OrderDetails>, CheckoutError> {
        self.store.orders_for_user(session.user_id).await
    }

    /// Applies a verified gateway notification once per event id.
    ///
    /// Returns the payment it settled, or `None` for repeats and event types
    /// that carry no payment outcome.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn apply_webhook_event(
        &self,
        event: &WebhookEvent,
    ) -> Result<Option<Payment>, CheckoutError> {
        if self.store.webhook_event_seen(&event.id).await? {
            info!("webhook event already processed");
            return Ok(None);
        }

        let payment = match &event.kind {
            WebhookEventKind::PaymentSucceeded { intent_id } => {
                Some(self.reconcile_payment(intent_id, PaymentOutcome::Succeeded).await?)
            }
            WebhookEventKind::PaymentFailed { intent_id, reason } => {
                if let Some(reason) = reason {
                    info!(%reason, "gateway reported payment failure");
                }
                Some(self.reconcile_payment(intent_id, PaymentOutcome::Failed).await?)
            }
            WebhookEventKind::Ignored { .. } => None,
        };

        self.store
            .record_webhook_event(&event.id, &event.event_type)
            .await?;
        Ok(payment)
    }
}
