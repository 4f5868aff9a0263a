//! Runs against a live database. Set DATABASE_URL and pass `--ignored`.

use bigdecimal::BigDecimal;
use checkout_service::store::postgres::{connect, run_migrations};
use checkout_service::store::{CheckoutStore, PgStore};
use checkout_service::CheckoutError;
use shared::{
    ContactDetails, Order, OrderItem, OrderStatus, Payment, PaymentOutcome, PaymentStatus,
};
use std::str::FromStr;
use uuid::Uuid;

async fn store() -> PgStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    run_migrations(&url).unwrap();
    PgStore::new(connect(&url).await.unwrap())
}

fn dec(raw: &str) -> BigDecimal {
    BigDecimal::from_str(raw).unwrap()
}

fn order(total: &str) -> Order {
    Order::new(
        Uuid::new_v4(),
        dec(total),
        ContactDetails {
            shipping_address: "12 Farm Rd".to_string(),
            contact_email: "grower@example.com".to_string(),
            contact_phone: "555-0100".to_string(),
            contact_name: "Ada Grower".to_string(),
        },
    )
}

fn item(order_id: Uuid, price: &str, quantity: i32) -> OrderItem {
    OrderItem {
        id: Uuid::new_v4(),
        order_id,
        product_id: "1".to_string(),
        quantity,
        unit_price: dec(price),
        seller_id: "gvf123".to_string(),
        created_at: chrono::Utc::now(),
    }
}

fn intent_id() -> String {
    format!("pi_{}", Uuid::new_v4().simple())
}

async fn event_types(store: &PgStore, order_id: Uuid) -> Vec<String> {
    let mut types: Vec<String> = store
        .unpublished_events(10_000)
        .await
        .unwrap()
        .into_iter()
        .filter(|event| event.aggregate_id == order_id)
        .map(|event| event.event_type)
        .collect();
    types.sort();
    types
}

#[tokio::test]
#[ignore]
async fn order_round_trips_through_postgres() {
    let store = store().await;
    let order = order("8.97");
    let items = vec![item(order.id, "2.99", 3)];
    store.create_order(&order, &items).await.unwrap();

    let details = store.find_order(order.id).await.unwrap().unwrap();
    assert_eq!(details.order.status, OrderStatus::Pending);
    assert_eq!(details.order.total_amount, dec("8.97"));
    assert_eq!(details.order_items.len(), 1);
    assert_eq!(details.order_items[0].quantity, 3);
    assert_eq!(details.order_items[0].unit_price, dec("2.99"));
    assert_eq!(event_types(&store, order.id).await, vec!["OrderCreated"]);
}

#[tokio::test]
#[ignore]
async fn record_payment_is_idempotent_per_order() {
    let store = store().await;
    let order = order("42.50");
    store.create_order(&order, &[item(order.id, "42.50", 1)]).await.unwrap();

    let intent = intent_id();
    let first = Payment::pending(order.id, dec("42.50"), intent.clone(), "card".to_string());
    let recorded = store.record_payment(&first, 4250).await.unwrap();
    assert_eq!(recorded.payment_intent_id, intent);

    let retry = Payment::pending(order.id, dec("42.50"), intent.clone(), "card".to_string());
    let again = store.record_payment(&retry, 4250).await.unwrap();
    assert_eq!(again.id, recorded.id);

    let other = Payment::pending(order.id, dec("42.50"), intent_id(), "card".to_string());
    let err = store.record_payment(&other, 4250).await.unwrap_err();
    assert!(matches!(err, CheckoutError::Conflict(_)));

    let found = store.find_payment_by_intent(&intent).await.unwrap().unwrap();
    assert_eq!(found.order_id, order.id);
}

#[tokio::test]
#[ignore]
async fn settle_payment_updates_payment_order_and_outbox_together() {
    let store = store().await;
    let order = order("15.99");
    store.create_order(&order, &[item(order.id, "15.99", 1)]).await.unwrap();
    let intent = intent_id();
    let payment = Payment::pending(order.id, dec("15.99"), intent.clone(), "card".to_string());
    store.record_payment(&payment, 1599).await.unwrap();

    let settled = store.settle_payment(&intent, PaymentOutcome::Succeeded).await.unwrap();
    assert!(settled.applied);
    assert_eq!(settled.payment.status, PaymentStatus::Succeeded);
    assert_eq!(settled.order_status, OrderStatus::Processing);

    let repeat = store.settle_payment(&intent, PaymentOutcome::Succeeded).await.unwrap();
    assert!(!repeat.applied);

    let err = store.settle_payment(&intent, PaymentOutcome::Failed).await.unwrap_err();
    assert!(matches!(err, CheckoutError::Conflict(_)));

    let details = store.find_order(order.id).await.unwrap().unwrap();
    assert_eq!(details.order.status, OrderStatus::Processing);
    assert_eq!(details.payments[0].status, PaymentStatus::Succeeded);
    let types = event_types(&store, order.id).await;
    assert_eq!(
        types.iter().filter(|t| t.as_str() == "PaymentSucceeded").count(),
        1
    );
    assert!(!types.iter().any(|t| t == "PaymentFailed"));
}
