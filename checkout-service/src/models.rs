use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::{Order, OrderItem, OutboxEvent, Payment, StatusParseError};
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct DbOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub total_amount: BigDecimal,
    pub shipping_address: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub contact_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::order_items)]
pub struct DbOrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub seller_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::payments)]
pub struct DbPayment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: BigDecimal,
    pub status: String,
    pub payment_intent_id: String,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::processed_webhook_events)]
pub struct NewProcessedWebhookEvent<'a> {
    pub event_id: &'a str,
    pub event_type: &'a str,
}

impl From<&Order> for DbOrder {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            status: order.status.to_string(),
            total_amount: order.total_amount.clone(),
            shipping_address: order.shipping_address.clone(),
            contact_email: order.contact_email.clone(),
            contact_phone: order.contact_phone.clone(),
            contact_name: order.contact_name.clone(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

impl TryFrom<DbOrder> for Order {
    type Error = StatusParseError;

    fn try_from(row: DbOrder) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            status: row.status.parse()?,
            total_amount: row.total_amount,
            shipping_address: row.shipping_address,
            contact_email: row.contact_email,
            contact_phone: row.contact_phone,
            contact_name: row.contact_name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<&OrderItem> for DbOrderItem {
    fn from(item: &OrderItem) -> Self {
        Self {
            id: item.id,
            order_id: item.order_id,
            product_id: item.product_id.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price.clone(),
            seller_id: item.seller_id.clone(),
            created_at: item.created_at,
        }
    }
}

impl From<DbOrderItem> for OrderItem {
    fn from(row: DbOrderItem) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            product_id: row.product_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            seller_id: row.seller_id,
            created_at: row.created_at,
        }
    }
}

impl From<&Payment> for DbPayment {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id,
            order_id: payment.order_id,
            amount: payment.amount.clone(),
            status: payment.status.to_string(),
            payment_intent_id: payment.payment_intent_id.clone(),
            payment_method: payment.payment_method.clone(),
            created_at: payment.created_at,
            updated_at: payment.updated_at,
        }
    }
}

impl TryFrom<DbPayment> for Payment {
    type Error = StatusParseError;

    fn try_from(row: DbPayment) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            order_id: row.order_id,
            amount: row.amount,
            status: row.status.parse()?,
            payment_intent_id: row.payment_intent_id,
            payment_method: row.payment_method,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<OutboxEvent> for DbOutboxEvent {
    fn from(event: OutboxEvent) -> Self {
        Self {
            id: event.id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            event_data: event.event_data,
            processed: event.processed,
            created_at: event.created_at,
        }
    }
}

impl From<DbOutboxEvent> for OutboxEvent {
    fn from(row: DbOutboxEvent) -> Self {
        Self {
            id: row.id,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            event_data: row.event_data,
            processed: row.processed,
            created_at: row.created_at,
        }
    }
}
