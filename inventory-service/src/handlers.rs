use anyhow::Result;
use futures::StreamExt;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use std::time::Duration;
use tracing::{error, info, warn};
use shared::*;
use crate::error::InventoryError;
use crate::service::InventoryService;
use crate::storage::AppendOutcome;

pub struct EventHandler {
    service: InventoryService,
    producer: FutureProducer,
    reply_topic: String,
}

impl EventHandler {
    pub fn new(service: InventoryService, producer: FutureProducer, reply_topic: String) -> Self {
        Self { service, producer, reply_topic }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut message_stream = consumer.stream();

        while let Some(message) = message_stream.next().await {
            match message {
                Ok(m) => {
                    if let Some(payload) = m.payload_view::<str>() {
                        match payload {
                            Ok(json_str) => match serde_json::from_str::<StockEvent>(json_str) {
                                Ok(event) => {
                                    if let Err(e) = self.handle_event(event).await {
                                        error!("Error handling stock event: {}", e);
                                    }
                                }
                                Err(e) => warn!("Skipping undecodable stock event: {}", e),
                            },
                            Err(e) => error!("Error parsing payload: {}", e),
                        }
                    }
                    if let Err(e) = consumer.commit_message(&m, rdkafka::consumer::CommitMode::Async) {
                        error!("Error committing message: {}", e);
                    }
                }
                Err(e) => error!("Error receiving message: {}", e),
            }
        }
    }

    async fn handle_event(&self, event: StockEvent) -> Result<()> {
        let reply = process_event(&self.service, &event).await;
        self.send_reply(reply).await
    }

    async fn send_reply(&self, reply: StockEventReply) -> Result<()> {
        let json = serde_json::to_string(&reply)?;
        let key = reply.event_id.to_string();
        let record = FutureRecord::to(&self.reply_topic)
            .payload(&json)
            .key(&key);

        self.producer.send(record, Duration::from_secs(5)).await
            .map_err(|(e, _)| anyhow::anyhow!("Failed to send reply: {}", e))?;

        Ok(())
    }
}

/// Journals one business event, deduplicated by its idempotency key.
pub async fn process_event(service: &InventoryService, event: &StockEvent) -> StockEventReply {
    let key = event.key();
    let delta = match event.delta() {
        Some(delta) => delta,
        None => {
            let e = InventoryError::overflow(&key, format!("event quantity {}", event.quantity));
            return StockEventReply::failed(event.id, e.to_string());
        }
    };

    match service.append_delta_once(&event.idempotency_key, &key, delta).await {
        Ok(AppendOutcome::Appended(entry_id)) => StockEventReply::appended(event.id, entry_id),
        Ok(AppendOutcome::Duplicate) => {
            info!("Stock event {} already journaled, skipping", event.idempotency_key);
            StockEventReply::duplicate(event.id)
        }
        Err(e) => {
            error!("Failed to journal stock event {} for {}: {}", event.id, key, e);
            StockEventReply::failed(event.id, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::sync::Arc;

    fn service() -> InventoryService {
        InventoryService::new(Arc::new(MemoryStorage::new()), chrono::Duration::seconds(30), None).unwrap()
    }

    #[tokio::test]
    async fn redelivered_event_is_journaled_once() {
        let service = service();
        let key = StockKey::new("A", 1);
        service.register_counter(&key, 10, 0).await.unwrap();
        let event = StockEvent::new(&key, StockEventKind::Ship, 4);

        let first = process_event(&service, &event).await;
        let second = process_event(&service, &event).await;

        assert_eq!(first.status, ReplyStatus::Appended);
        assert!(first.entry_id.is_some());
        assert_eq!(second.status, ReplyStatus::Duplicate);
        assert_eq!(service.get_effective_quantity(&key).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn unrepresentable_event_fails_without_writing() {
        let service = service();
        let key = StockKey::new("A", 1);
        let event = StockEvent::new(&key, StockEventKind::Ship, i64::MIN);

        let reply = process_event(&service, &event).await;

        assert_eq!(reply.status, ReplyStatus::Failed);
        assert!(reply.error.unwrap().contains("overflow"));
        assert_eq!(service.get_effective_position(&key).await.unwrap().pending_entries, 0);
    }
}
