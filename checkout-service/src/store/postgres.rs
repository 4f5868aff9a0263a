use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::{Connection, PgConnection};
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use shared::{
    plan_settlement, CheckoutEvent, Order, OrderDetails, OrderItem, OrderStatus, OutboxEvent,
    Payment, PaymentOutcome, Settlement,
};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use super::{CheckoutStore, Reconciliation};
use crate::error::CheckoutError;
use crate::models::*;
use crate::schema::*;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = Pool<AsyncPgConnection>;

pub fn run_migrations(database_url: &str) -> Result<()> {
    info!("Running database migrations...");
    let mut conn = PgConnection::establish(database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");
    Ok(())
}

pub async fn connect(database_url: &str) -> Result<DbPool> {
    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    Ok(Pool::builder().build(config).await?)
}

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(
        &self,
    ) -> Result<diesel_async::pooled_connection::bb8::PooledConnection<'_, AsyncPgConnection>, CheckoutError>
    {
        self.pool
            .get()
            .await
            .map_err(|e| CheckoutError::Persistence(format!("database unavailable: {}", e)))
    }
}

fn outbox_row(event: &CheckoutEvent) -> Result<DbOutboxEvent, CheckoutError> {
    Ok(DbOutboxEvent::from(OutboxEvent::new(event)?))
}

async fn load_details(
    conn: &mut AsyncPgConnection,
    orders_rows: Vec<DbOrder>,
) -> Result<Vec<OrderDetails>, CheckoutError> {
    let ids: Vec<Uuid> = orders_rows.iter().map(|row| row.id).collect();

    let mut items_by_order: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
    let item_rows = order_items::table
        .filter(order_items::order_id.eq_any(&ids))
        .order(order_items::created_at.asc())
        .select(DbOrderItem::as_select())
        .load(conn)
        .await?;
    for row in item_rows {
        items_by_order.entry(row.order_id).or_default().push(row.into());
    }

    let mut payments_by_order: HashMap<Uuid, Vec<Payment>> = HashMap::new();
    let payment_rows = payments::table
        .filter(payments::order_id.eq_any(&ids))
        .select(DbPayment::as_select())
        .load(conn)
        .await?;
    for row in payment_rows {
        payments_by_order
            .entry(row.order_id)
            .or_default()
            .push(Payment::try_from(row)?);
    }

    orders_rows
        .into_iter()
        .map(|row| {
            let id = row.id;
            Ok(OrderDetails {
                order: Order::try_from(row)?,
                order_items: items_by_order.remove(&id).unwrap_or_default(),
                payments: payments_by_order.remove(&id).unwrap_or_default(),
            })
        })
        .collect()
}

#[async_trait]
impl CheckoutStore for PgStore {
    async fn create_order(&self, order: &Order, items: &[OrderItem]) -> Result<(), CheckoutError> {
        let mut conn = self.conn().await?;

        let new_order = DbOrder::from(order);
        let new_items: Vec<DbOrderItem> = items.iter().map(DbOrderItem::from).collect();
        let outbox_event = outbox_row(&CheckoutEvent::OrderCreated {
            order_id: order.id,
            user_id: order.user_id,
            total_amount: order.total_amount.clone(),
            item_count: items.len(),
        })?;

        conn.transaction::<_, CheckoutError, _>(|conn| {
            Box::pin(async move {
                diesel::insert_into(orders::table)
                    .values(&new_order)
                    .execute(conn)
                    .await?;

                diesel::insert_into(order_items::table)
                    .values(&new_items)
                    .execute(conn)
                    .await?;

                diesel::insert_into(outbox_events::table)
                    .values(&outbox_event)
                    .execute(conn)
                    .await?;

                Ok(())
            })
        })
        .await
    }

    async fn find_order(&self, order_id: Uuid) -> Result<Option<OrderDetails>, CheckoutError> {
        let mut conn = self.conn().await?;
        let row = orders::table
            .find(order_id)
            .select(DbOrder::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        match row {
            Some(row) => Ok(load_details(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn orders_for_user(&self, user_id: Uuid) -> Result<Vec<OrderDetails>, CheckoutError> {
        let mut conn = self.conn().await?;
        let rows = orders::table
            .filter(orders::user_id.eq(user_id))
            .order(orders::created_at.desc())
            .select(DbOrder::as_select())
            .load(&mut conn)
            .await?;
        load_details(&mut conn, rows).await
    }

    async fn find_payment_by_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<Payment>, CheckoutError> {
        let mut conn = self.conn().await?;
        let row = payments::table
            .filter(payments::payment_intent_id.eq(payment_intent_id))
            .select(DbPayment::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row.map(Payment::try_from).transpose()?)
    }

    async fn record_payment(
        &self,
        payment: &Payment,
        amount_minor: i64,
    ) -> Result<Payment, CheckoutError> {
        let mut conn = self.conn().await?;

        let new_payment = DbPayment::from(payment);
        let outbox_event = outbox_row(&CheckoutEvent::PaymentIntentIssued {
            order_id: payment.order_id,
            payment_id: payment.id,
            payment_intent_id: payment.payment_intent_id.clone(),
            amount_minor,
        })?;

        let row = conn
            .transaction::<_, CheckoutError, _>(|conn| {
                Box::pin(async move {
                    let inserted = diesel::insert_into(payments::table)
                        .values(&new_payment)
                        .on_conflict(payments::order_id)
                        .do_nothing()
                        .execute(conn)
                        .await
                        .map_err(|err| match err {
                            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                                CheckoutError::Conflict(format!(
                                    "payment intent {} is already recorded",
                                    new_payment.payment_intent_id
                                ))
                            }
                            other => other.into(),
                        })?;

                    if inserted == 1 {
                        diesel::insert_into(outbox_events::table)
                            .values(&outbox_event)
                            .execute(conn)
                            .await?;
                        return Ok(new_payment);
                    }

                    let existing = payments::table
                        .filter(payments::order_id.eq(new_payment.order_id))
                        .select(DbPayment::as_select())
                        .first(conn)
                        .await?;
                    if existing.payment_intent_id != new_payment.payment_intent_id {
                        return Err(CheckoutError::Conflict(format!(
                            "order {} already has payment intent {}",
                            existing.order_id, existing.payment_intent_id
                        )));
                    }
                    Ok(existing)
                })
            })
            .await?;

        Ok(Payment::try_from(row)?)
    }

    async fn settle_payment(
        &self,
        payment_intent_id: &str,
        outcome: PaymentOutcome,
    ) -> Result<Reconciliation, CheckoutError> {
        let mut conn = self.conn().await?;
        let intent_id = payment_intent_id.to_string();

        conn.transaction::<_, CheckoutError, _>(|conn| {
            Box::pin(async move {
                let payment_row = payments::table
                    .filter(payments::payment_intent_id.eq(&intent_id))
                    .select(DbPayment::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?
                    .ok_or_else(|| {
                        CheckoutError::NotFound(format!("no payment for intent {}", intent_id))
                    })?;
                let payment = Payment::try_from(payment_row)?;

                let order_status: String = orders::table
                    .find(payment.order_id)
                    .select(orders::status)
                    .for_update()
                    .first(conn)
                    .await?;
                let order_status: OrderStatus = order_status.parse()?;

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
                        let now = Utc::now();
                        diesel::update(payments::table.find(payment.id))
                            .set((
                                payments::status.eq(payment_status.as_str()),
                                payments::updated_at.eq(now),
                            ))
                            .execute(conn)
                            .await?;

                        // The order is addressed through the located payment.
                        diesel::update(orders::table.find(payment.order_id))
                            .set((
                                orders::status.eq(order_status.as_str()),
                                orders::updated_at.eq(now),
                            ))
                            .execute(conn)
                            .await?;

                        let settled = Payment {
                            status: payment_status,
                            updated_at: now,
                            ..payment
                        };
                        diesel::insert_into(outbox_events::table)
                            .values(&outbox_row(&CheckoutEvent::settled(&settled, outcome))?)
                            .execute(conn)
                            .await?;

                        Ok(Reconciliation {
                            payment: settled,
                            order_status,
                            applied: true,
                        })
                    }
                }
            })
        })
        .await
    }

    async fn unpublished_events(&self, limit: i64) -> Result<Vec<OutboxEvent>, CheckoutError> {
        let mut conn = self.conn().await?;
        let rows = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .select(DbOutboxEvent::as_select())
            .load(&mut conn)
            .await?;
        Ok(rows.into_iter().map(OutboxEvent::from).collect())
    }

    async fn mark_event_published(&self, event_id: Uuid) -> Result<(), CheckoutError> {
        let mut conn = self.conn().await?;
        diesel::update(outbox_events::table.filter(outbox_events::id.eq(event_id)))
            .set(outbox_events::processed.eq(true))
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn webhook_event_seen(&self, event_id: &str) -> Result<bool, CheckoutError> {
        let mut conn = self.conn().await?;
        let seen = processed_webhook_events::table
            .find(event_id)
            .select(processed_webhook_events::event_id)
            .first::<String>(&mut conn)
            .await
            .optional()?;
        Ok(seen.is_some())
    }

    async fn record_webhook_event(&self, event_id: &str, event_type: &str) -> Result<(), CheckoutError> {
        let mut conn = self.conn().await?;
        diesel::insert_into(processed_webhook_events::table)
            .values(&NewProcessedWebhookEvent { event_id, event_type })
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}
