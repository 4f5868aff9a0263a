use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::TryFromIntError;
use std::str::FromStr;
use uuid::Uuid;

pub mod cart;
pub mod catalog;
pub mod money;

pub use cart::{Cart, CartItem};
pub use catalog::{Category, Product};
pub use money::MoneyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

/// Terminal result reported by the payment gateway for one authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusParseError {
    #[error("unknown order status '{0}'")]
    Order(String),
    #[error("unknown payment status '{0}'")]
    Payment(String),
    #[error("unknown payment outcome '{0}'")]
    Outcome(String),
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(StatusParseError::Order(other.to_string())),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "succeeded" => Ok(PaymentStatus::Succeeded),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(StatusParseError::Payment(other.to_string())),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Succeeded => "succeeded",
            PaymentOutcome::Failed => "failed",
        }
    }

    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            PaymentOutcome::Succeeded => PaymentStatus::Succeeded,
            PaymentOutcome::Failed => PaymentStatus::Failed,
        }
    }

    /// Fixed outcome rule: succeeded -> processing, failed -> cancelled.
    pub fn order_status(&self) -> OrderStatus {
        match self {
            PaymentOutcome::Succeeded => OrderStatus::Processing,
            PaymentOutcome::Failed => OrderStatus::Cancelled,
        }
    }
}

impl FromStr for PaymentOutcome {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(PaymentOutcome::Succeeded),
            "failed" => Ok(PaymentOutcome::Failed),
            other => Err(StatusParseError::Outcome(other.to_string())),
        }
    }
}

impl fmt::Display for PaymentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("payment is already {current}, cannot mark it {requested}")]
    Payment {
        current: PaymentStatus,
        requested: PaymentStatus,
    },
    #[error("order is {current}, cannot move it to {requested}")]
    Order {
        current: OrderStatus,
        requested: OrderStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Apply {
        payment_status: PaymentStatus,
        order_status: OrderStatus,
    },
    AlreadySettled,
}

/// Decides what a gateway outcome does to a payment and its order.
///
/// Only `pending -> processing` and `pending -> cancelled` are legal order
/// moves. A repeated identical outcome is reported as `AlreadySettled`; a
/// different outcome for a settled payment is a `TransitionError`.
pub fn plan_settlement(
    payment: PaymentStatus,
    order: OrderStatus,
    outcome: PaymentOutcome,
) -> Result<Settlement, TransitionError> {
    let requested = outcome.payment_status();

    match payment {
        PaymentStatus::Pending => {
            if order != OrderStatus::Pending {
                return Err(TransitionError::Order {
                    current: order,
                    requested: outcome.order_status(),
                });
            }
            Ok(Settlement::Apply {
                payment_status: requested,
                order_status: outcome.order_status(),
            })
        }
        current if current == requested => Ok(Settlement::AlreadySettled),
        current => Err(TransitionError::Payment { current, requested }),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactDetails {
    pub shipping_address: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub contact_name: String,
}

impl ContactDetails {
    /// Names of the fields that are blank, in declaration order.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("shipping_address", &self.shipping_address),
            ("contact_email", &self.contact_email),
            ("contact_phone", &self.contact_phone),
            ("contact_name", &self.contact_name),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub total_amount: BigDecimal,
    pub shipping_address: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub contact_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub seller_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: BigDecimal,
    pub status: PaymentStatus,
    pub payment_intent_id: String,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An order together with its item snapshot and any payment recorded for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub order_items: Vec<OrderItem>,
    pub payments: Vec<Payment>,
}

impl Order {
    pub fn new(user_id: Uuid, total_amount: BigDecimal, contact: ContactDetails) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            status: OrderStatus::Pending,
            total_amount,
            shipping_address: contact.shipping_address,
            contact_email: contact.contact_email,
            contact_phone: contact.contact_phone,
            contact_name: contact.contact_name,
            created_at: now,
            updated_at: now,
        }
    }
}

impl OrderItem {
    pub fn snapshot(order_id: Uuid, line: &CartItem) -> Result<Self, TryFromIntError> {
        Ok(Self {
            id: Uuid::new_v4(),
            order_id,
            product_id: line.id.clone(),
            quantity: i32::try_from(line.quantity)?,
            unit_price: line.price.clone(),
            seller_id: line.seller_id.clone(),
            created_at: Utc::now(),
        })
    }
}

impl Payment {
    pub fn pending(
        order_id: Uuid,
        amount: BigDecimal,
        payment_intent_id: String,
        payment_method: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            amount,
            status: PaymentStatus::Pending,
            payment_intent_id,
            payment_method,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CheckoutEvent {
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total_amount: BigDecimal,
        item_count: usize,
    },
    PaymentIntentIssued {
        order_id: Uuid,
        payment_id: Uuid,
        payment_intent_id: String,
        amount_minor: i64,
    },
    PaymentSucceeded {
        order_id: Uuid,
        payment_id: Uuid,
        payment_intent_id: String,
    },
    PaymentFailed {
        order_id: Uuid,
        payment_id: Uuid,
        payment_intent_id: String,
    },
}

impl CheckoutEvent {
    pub fn settled(payment: &Payment, outcome: PaymentOutcome) -> Self {
        let (order_id, payment_id, payment_intent_id) =
            (payment.order_id, payment.id, payment.payment_intent_id.clone());
        match outcome {
            PaymentOutcome::Succeeded => CheckoutEvent::PaymentSucceeded {
                order_id,
                payment_id,
                payment_intent_id,
            },
            PaymentOutcome::Failed => CheckoutEvent::PaymentFailed {
                order_id,
                payment_id,
                payment_intent_id,
            },
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            CheckoutEvent::OrderCreated { .. } => "OrderCreated",
            CheckoutEvent::PaymentIntentIssued { .. } => "PaymentIntentIssued",
            CheckoutEvent::PaymentSucceeded { .. } => "PaymentSucceeded",
            CheckoutEvent::PaymentFailed { .. } => "PaymentFailed",
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            CheckoutEvent::OrderCreated { order_id, .. }
            | CheckoutEvent::PaymentIntentIssued { order_id, .. }
            | CheckoutEvent::PaymentSucceeded { order_id, .. }
            | CheckoutEvent::PaymentFailed { order_id, .. } => *order_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn new(event: &CheckoutEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_id: event.order_id(),
            event_type: event.event_type().to_string(),
            event_data: serde_json::to_value(event)?,
            processed: false,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_maps_to_fixed_order_status() {
        assert_eq!(PaymentOutcome::Succeeded.order_status(), OrderStatus::Processing);
        assert_eq!(PaymentOutcome::Failed.order_status(), OrderStatus::Cancelled);
    }

    #[test]
    fn pending_payment_settles_into_outcome() {
        for outcome in [PaymentOutcome::Succeeded, PaymentOutcome::Failed] {
            let plan = plan_settlement(PaymentStatus::Pending, OrderStatus::Pending, outcome).unwrap();
            assert_eq!(
                plan,
                Settlement::Apply {
                    payment_status: outcome.payment_status(),
                    order_status: outcome.order_status(),
                }
            );
        }
    }

    #[test]
    fn repeated_outcome_is_already_settled() {
        let plan = plan_settlement(
            PaymentStatus::Succeeded,
            OrderStatus::Processing,
            PaymentOutcome::Succeeded,
        )
        .unwrap();
        assert_eq!(plan, Settlement::AlreadySettled);
    }

    #[test]
    fn conflicting_outcome_is_rejected() {
        let err = plan_settlement(
            PaymentStatus::Succeeded,
            OrderStatus::Processing,
            PaymentOutcome::Failed,
        )
        .unwrap_err();
        assert_eq!(
            err,
            TransitionError::Payment {
                current: PaymentStatus::Succeeded,
                requested: PaymentStatus::Failed,
            }
        );
    }

    #[test]
    fn order_must_still_be_pending() {
        let err = plan_settlement(
            PaymentStatus::Pending,
            OrderStatus::Cancelled,
            PaymentOutcome::Succeeded,
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::Order { current: OrderStatus::Cancelled, .. }));
    }

    #[test]
    fn statuses_round_trip_through_text() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Completed,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("shipped".parse::<OrderStatus>().is_err());
        assert_eq!("failed".parse::<PaymentStatus>().unwrap(), PaymentStatus::Failed);
    }

    #[test]
    fn blank_contact_fields_are_reported() {
        let contact = ContactDetails {
            shipping_address: "12 Farm Rd".to_string(),
            contact_email: "  ".to_string(),
            contact_phone: "555-0100".to_string(),
            contact_name: String::new(),
        };
        assert_eq!(contact.missing_fields(), vec!["contact_email", "contact_name"]);
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let order_id = Uuid::new_v4();
        let event = CheckoutEvent::PaymentFailed {
            order_id,
            payment_id: Uuid::new_v4(),
            payment_intent_id: "pi_123".to_string(),
        };
        let outbox = OutboxEvent::new(&event).unwrap();
        assert_eq!(outbox.aggregate_id, order_id);
        assert_eq!(outbox.event_type, "PaymentFailed");
        assert_eq!(outbox.event_data["type"], "PaymentFailed");
        assert!(!outbox.processed);
    }
}
