//! At-least-once projection consumer loop.
//!
//! Grounded directly on `ob-workflow::listener::TaskQueueListener::run`:
//! poll, process, ack/nak, backoff on error, shutdown via
//! `watch::Receiver<bool>`, generalized from "pop one task result row" to
//! "receive one bus message" and with `MAX_RETRIES`/backoff constants
//! renamed to the spec's `max_deliver`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use ivcu_types::Event;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::handler::ProjectionHandler;
use crate::kv::KvStore;
use crate::ProjectionError;

/// Default redelivery attempts before a message is parked.
pub const DEFAULT_MAX_DELIVER: u32 = 5;

/// Backoff after a projection failure, before the next `nak`-triggered
/// redelivery is attempted.
const ERROR_BACKOFF: Duration = Duration::from_millis(200);

/// Poll interval used only by bus implementations that can return "nothing
/// available yet" rather than blocking; the in-memory broadcast-backed bus
/// always blocks in `receive`, so this never fires against it.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// TTL on a sync token once projection of `(aggregate_id, sequence)`
/// completes.
pub const SYNC_TOKEN_TTL: Duration = Duration::from_secs(300);

/// `hash(aggregate_id ∥ sequence_number)` — the idempotency key a
/// redelivery is checked against.
pub fn idempotency_key(aggregate_id: Uuid, sequence_number: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(aggregate_id.as_bytes());
    hasher.update(sequence_number.to_be_bytes());
    hex::encode(hasher.finalize())
}

fn sync_token_key(aggregate_id: Uuid, sequence_number: u64) -> String {
    format!("sync:{aggregate_id}:{sequence_number}")
}

/// A message parked after exhausting `max_deliver` redelivery attempts.
/// Kept for operator inspection; the consumer never retries it again on
/// its own.
#[derive(Debug, Clone)]
pub struct ParkedMessage {
    pub event: Event,
    pub delivery_count: u32,
    pub last_error: String,
}

/// Durable, named consumer of one `EventBus`, dispatching each delivered
/// event to the handler registered for its `event_type`.
pub struct ProjectionConsumer {
    consumer_name: String,
    bus: Arc<dyn EventBus>,
    kv: Arc<dyn KvStore>,
    handlers: HashMap<&'static str, Box<dyn ProjectionHandler>>,
    max_deliver: u32,
    last_applied_seq: DashMap<Uuid, u64>,
    delivery_counts: DashMap<String, u32>,
    parked: DashMap<String, ParkedMessage>,
}

impl ProjectionConsumer {
    pub fn new(consumer_name: impl Into<String>, bus: Arc<dyn EventBus>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            consumer_name: consumer_name.into(),
            bus,
            kv,
            handlers: HashMap::new(),
            max_deliver: DEFAULT_MAX_DELIVER,
            last_applied_seq: DashMap::new(),
            delivery_counts: DashMap::new(),
            parked: DashMap::new(),
        }
    }

    pub fn with_max_deliver(mut self, max_deliver: u32) -> Self {
        self.max_deliver = max_deliver;
        self
    }

    pub fn register_handler(mut self, event_type: &'static str, handler: Box<dyn ProjectionHandler>) -> Self {
        self.handlers.insert(event_type, handler);
        self
    }

    pub fn parked_messages(&self) -> Vec<ParkedMessage> {
        self.parked.iter().map(|e| e.value().clone()).collect()
    }

    /// Runs the consumer loop until `shutdown` reports `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(consumer = %self.consumer_name, "projection consumer started");
        loop {
            if *shutdown.borrow() {
                info!(consumer = %self.consumer_name, "projection consumer shutting down");
                break;
            }

            tokio::select! {
                result = self.bus.receive(&self.consumer_name) => {
                    match result {
                        Ok(delivery) => {
                            if let Err(e) = self.process(delivery.event).await {
                                error!(consumer = %self.consumer_name, error = %e, "error processing delivery");
                                tokio::time::sleep(ERROR_BACKOFF).await;
                            }
                        }
                        Err(e) => {
                            error!(consumer = %self.consumer_name, error = %e, "bus receive failed");
                            tokio::time::sleep(POLL_INTERVAL).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(consumer = %self.consumer_name, "projection consumer shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Processes one delivered event to completion: idempotency check,
    /// dispatch, ack/nak/park. Exposed directly (not just via `run`) so
    /// tests can drive the state machine without a bus loop.
    pub async fn process(&self, event: Event) -> Result<(), ProjectionError> {
        let key = idempotency_key(event.aggregate_id, event.sequence_number);

        let already_applied = self
            .last_applied_seq
            .get(&event.aggregate_id)
            .map(|applied| *applied >= event.sequence_number)
            .unwrap_or(false);

        if already_applied {
            debug!(
                consumer = %self.consumer_name,
                aggregate_id = %event.aggregate_id,
                sequence_number = event.sequence_number,
                "skipping already-applied redelivery"
            );
            self.bus.ack(&self.consumer_name, &event).await?;
            return Ok(());
        }

        let Some(handler) = self.handlers.get(event.event_type()) else {
            warn!(
                consumer = %self.consumer_name,
                event_type = event.event_type(),
                "no handler registered for event type, acking and dropping"
            );
            self.bus.ack(&self.consumer_name, &event).await?;
            return Ok(());
        };

        match handler.project(&event).await {
            Ok(()) => {
                self.delivery_counts.remove(&key);
                self.last_applied_seq.insert(event.aggregate_id, event.sequence_number);
                self.kv
                    .set(
                        &sync_token_key(event.aggregate_id, event.sequence_number),
                        "complete",
                        SYNC_TOKEN_TTL,
                    )
                    .await?;
                self.bus.ack(&self.consumer_name, &event).await?;
                Ok(())
            }
            Err(e) => {
                let count = {
                    let mut entry = self.delivery_counts.entry(key.clone()).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if count >= self.max_deliver {
                    warn!(
                        consumer = %self.consumer_name,
                        aggregate_id = %event.aggregate_id,
                        sequence_number = event.sequence_number,
                        attempts = count,
                        error = %e,
                        "parking message after exhausting max_deliver"
                    );
                    self.parked.insert(
                        key,
                        ParkedMessage {
                            event: event.clone(),
                            delivery_count: count,
                            last_error: e.to_string(),
                        },
                    );
                    self.bus.ack(&self.consumer_name, &event).await?;
                    Ok(())
                } else {
                    self.bus.nak(&self.consumer_name, &event).await?;
                    Err(e)
                }
            }
        }
    }

    /// Polls the sync-token KV until `(aggregate_id, sequence_number)`
    /// shows `complete`, the caller's `timeout` elapses, or `poll_interval`
    /// ticks past the deadline. Gives callers that just wrote an event
    /// read-after-write consistency on the derived views.
    pub async fn wait_for(
        &self,
        aggregate_id: Uuid,
        sequence_number: u64,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<bool, ProjectionError> {
        let key = sync_token_key(aggregate_id, sequence_number);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.kv.get(&key).await?.as_deref() == Some("complete") {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{IntentCreatedHandler, ProjectionHandler};
    use crate::kv::InMemoryKvStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use ivcu_types::EventPayload;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NullBus;

    #[async_trait]
    impl EventBus for NullBus {
        async fn publish(&self, _event: Event) -> Result<(), ProjectionError> {
            Ok(())
        }
        async fn receive(&self, _consumer_name: &str) -> Result<crate::bus::Delivery, ProjectionError> {
            std::future::pending().await
        }
        async fn ack(&self, _consumer_name: &str, _event: &Event) -> Result<(), ProjectionError> {
            Ok(())
        }
        async fn nak(&self, _consumer_name: &str, _event: &Event) -> Result<(), ProjectionError> {
            Ok(())
        }
    }

    struct AlwaysFailsHandler {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl ProjectionHandler for AlwaysFailsHandler {
        async fn project(&self, _event: &Event) -> Result<(), ProjectionError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(ProjectionError::Kv("sink unavailable".to_string()))
        }
    }

    fn intent_event(aggregate_id: Uuid, sequence_number: u64) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            aggregate_id,
            sequence_number,
            payload: EventPayload::IntentCreated {
                raw_intent: "parse a csv".to_string(),
                parsed_intent: None,
                language: "python".to_string(),
            },
            timestamp: Utc::now(),
            actor_id: None,
        }
    }

    #[tokio::test]
    async fn unknown_event_type_is_acked_and_dropped() {
        let consumer = ProjectionConsumer::new("test", Arc::new(NullBus), Arc::new(InMemoryKvStore::new()));
        let event = Event {
            event_id: Uuid::new_v4(),
            aggregate_id: Uuid::new_v4(),
            sequence_number: 1,
            payload: EventPayload::IvcuDeployed { version: 1 },
            timestamp: Utc::now(),
            actor_id: None,
        };
        assert!(consumer.process(event).await.is_ok());
    }

    #[tokio::test]
    async fn successful_projection_sets_the_sync_token() {
        let kv = Arc::new(InMemoryKvStore::new());
        let consumer = ProjectionConsumer::new("test", Arc::new(NullBus), kv.clone())
            .register_handler("intent_created", Box::new(IntentCreatedHandler::new()));
        let aggregate_id = Uuid::new_v4();
        consumer.process(intent_event(aggregate_id, 1)).await.unwrap();
        let token = kv.get(&sync_token_key(aggregate_id, 1)).await.unwrap();
        assert_eq!(token.as_deref(), Some("complete"));
    }

    #[tokio::test]
    async fn redelivery_of_an_already_applied_sequence_is_skipped() {
        let kv = Arc::new(InMemoryKvStore::new());
        let consumer = ProjectionConsumer::new("test", Arc::new(NullBus), kv)
            .register_handler("intent_created", Box::new(IntentCreatedHandler::new()));
        let aggregate_id = Uuid::new_v4();
        consumer.process(intent_event(aggregate_id, 1)).await.unwrap();
        consumer.process(intent_event(aggregate_id, 2)).await.unwrap();
        // redelivery of sequence 1 after 2 has already landed
        assert!(consumer.process(intent_event(aggregate_id, 1)).await.is_ok());
    }

    #[tokio::test]
    async fn a_handler_that_always_fails_is_parked_after_max_deliver_attempts() {
        let handler = AlwaysFailsHandler { attempts: AtomicU32::new(0) };
        let consumer = ProjectionConsumer::new("test", Arc::new(NullBus), Arc::new(InMemoryKvStore::new()))
            .with_max_deliver(3)
            .register_handler("intent_created", Box::new(handler));
        let aggregate_id = Uuid::new_v4();
        for _ in 0..2 {
            assert!(consumer.process(intent_event(aggregate_id, 1)).await.is_err());
        }
        // third attempt exhausts max_deliver and parks instead of erroring
        assert!(consumer.process(intent_event(aggregate_id, 1)).await.is_ok());
        assert_eq!(consumer.parked_messages().len(), 1);
    }
}
