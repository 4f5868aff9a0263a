use anyhow::Result;
use async_trait::async_trait;
use rdkafka::producer::{FutureProducer, FutureRecord};
use shared::OutboxEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};

use crate::store::CheckoutStore;

const BATCH_SIZE: i64 = 100;

pub fn topic_for(event_type: &str) -> &'static str {
    match event_type {
        "OrderCreated" => "order-events",
        "PaymentIntentIssued" | "PaymentSucceeded" | "PaymentFailed" => "payment-events",
        _ => "domain-events",
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()>;
}

pub struct KafkaPublisher {
    producer: FutureProducer,
}

impl KafkaPublisher {
    pub fn new(producer: FutureProducer) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()> {
        let record = FutureRecord::to(topic).payload(payload).key(key);
        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to publish event: {}", e))?;
        Ok(())
    }
}

/// Used when no broker is configured.
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<()> {
        info!(topic, key, payload, "event");
        Ok(())
    }
}

pub struct OutboxProcessor {
    store: Arc<dyn CheckoutStore>,
    publisher: Arc<dyn EventPublisher>,
    interval: Duration,
}

impl OutboxProcessor {
    pub fn new(
        store: Arc<dyn CheckoutStore>,
        publisher: Arc<dyn EventPublisher>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            publisher,
            interval,
        }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            if let Err(e) = self.process_batch().await {
                error!("Error processing outbox events: {}", e);
            }
        }
    }

    /// Publishes pending events oldest first; returns how many went out.
    pub async fn process_batch(&self) -> Result<usize> {
        let events = self.store.unpublished_events(BATCH_SIZE).await?;
        let mut published = 0;

        for event in events {
            if let Err(e) = self.publish_event(&event).await {
                error!("Failed to publish event {}: {}", event.id, e);
                continue;
            }

            self.store.mark_event_published(event.id).await?;
            published += 1;
            info!("Published outbox event: {}", event.id);
        }

        Ok(published)
    }

    async fn publish_event(&self, event: &OutboxEvent) -> Result<()> {
        let topic = topic_for(&event.event_type);
        let json = serde_json::to_string(&event.event_data)?;
        let key = event.aggregate_id.to_string();
        self.publisher.publish(topic, &key, &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use bigdecimal::BigDecimal;
    use shared::{ContactDetails, Order};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, topic: &str, key: &str, _payload: &str) -> Result<()> {
            if self.fail {
                anyhow::bail!("broker down");
            }
            self.sent.lock().unwrap().push((topic.to_string(), key.to_string()));
            Ok(())
        }
    }

    async fn store_with_order() -> (Arc<MemoryStore>, Order) {
        let store = Arc::new(MemoryStore::new());
        let order = Order::new(
            uuid::Uuid::new_v4(),
            BigDecimal::from(5),
            ContactDetails {
                shipping_address: "9 Silo St".to_string(),
                contact_email: "x@y.z".to_string(),
                contact_phone: "555".to_string(),
                contact_name: "X".to_string(),
            },
        );
        store.create_order(&order, &[]).await.unwrap();
        (store, order)
    }

    #[test]
    fn events_route_to_their_topics() {
        assert_eq!(topic_for("OrderCreated"), "order-events");
        assert_eq!(topic_for("PaymentSucceeded"), "payment-events");
        assert_eq!(topic_for("PaymentIntentIssued"), "payment-events");
        assert_eq!(topic_for("Unknown"), "domain-events");
    }

    #[tokio::test]
    async fn publishes_and_marks_events() {
        let (store, order) = store_with_order().await;
        let publisher = Arc::new(RecordingPublisher::default());
        let processor = OutboxProcessor::new(store.clone(), publisher.clone(), Duration::from_secs(1));

        assert_eq!(processor.process_batch().await.unwrap(), 1);
        assert_eq!(
            publisher.sent.lock().unwrap().clone(),
            vec![("order-events".to_string(), order.id.to_string())]
        );
        assert!(store.unpublished_events(10).await.unwrap().is_empty());
        assert_eq!(processor.process_batch().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_publish_keeps_event_pending() {
        let (store, _) = store_with_order().await;
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let processor = OutboxProcessor::new(store.clone(), publisher, Duration::from_secs(1));

        assert_eq!(processor.process_batch().await.unwrap(), 0);
        assert_eq!(store.unpublished_events(10).await.unwrap().len(), 1);
    }
}
