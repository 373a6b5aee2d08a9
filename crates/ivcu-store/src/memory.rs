//! In-memory [`EventStore`], used for tests and for running the
//! orchestrator without Postgres configured.

use async_trait::async_trait;
use dashmap::DashMap;
use ivcu_projector::{replay, replay_to};
use ivcu_types::{Event, EventPayload, IvcuState};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{EventStore, StoreError};

#[derive(Default)]
pub struct InMemoryEventStore {
    streams: DashMap<Uuid, Arc<Mutex<Vec<Event>>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn stream_lock(&self, aggregate_id: Uuid) -> Arc<Mutex<Vec<Event>>> {
        self.streams
            .entry(aggregate_id)
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: u64,
        payload: EventPayload,
        actor_id: Option<String>,
    ) -> Result<Event, StoreError> {
        let lock = self.stream_lock(aggregate_id);
        let mut stream = lock.lock().await;
        let actual = stream.len() as u64;
        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }
        let event = Event {
            event_id: Uuid::new_v4(),
            aggregate_id,
            sequence_number: actual + 1,
            payload,
            timestamp: chrono::Utc::now(),
            actor_id,
        };
        stream.push(event.clone());
        Ok(event)
    }

    async fn events(&self, aggregate_id: Uuid) -> Result<Vec<Event>, StoreError> {
        match self.streams.get(&aggregate_id) {
            Some(lock) => Ok(lock.lock().await.clone()),
            None => Err(StoreError::NotFound(aggregate_id)),
        }
    }

    async fn events_since(
        &self,
        aggregate_id: Uuid,
        after_version: u64,
    ) -> Result<Vec<Event>, StoreError> {
        let events = self.events(aggregate_id).await?;
        Ok(events
            .into_iter()
            .filter(|e| e.sequence_number > after_version)
            .collect())
    }

    async fn state(&self, aggregate_id: Uuid) -> Result<IvcuState, StoreError> {
        let events = self.events(aggregate_id).await?;
        Ok(replay(&events)?)
    }

    async fn state_at(&self, aggregate_id: Uuid, version: u64) -> Result<IvcuState, StoreError> {
        let events = self.events(aggregate_id).await?;
        Ok(replay_to(&events, version)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_enforces_expected_version() {
        let store = InMemoryEventStore::new();
        let aggregate_id = Uuid::new_v4();
        let payload = EventPayload::IntentCreated {
            raw_intent: "x".to_string(),
            parsed_intent: None,
            language: "python".to_string(),
        };
        store
            .append(aggregate_id, 0, payload.clone(), None)
            .await
            .unwrap();

        let err = store
            .append(aggregate_id, 0, payload, None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn state_at_replays_a_prefix() {
        let store = InMemoryEventStore::new();
        let aggregate_id = Uuid::new_v4();
        for i in 0..3u64 {
            store
                .append(
                    aggregate_id,
                    i,
                    EventPayload::CostIncurred {
                        amount_usd: rust_decimal::Decimal::ONE,
                        model_id: "haiku".to_string(),
                        operation: "generate".to_string(),
                    },
                    None,
                )
                .await
                .unwrap();
        }
        let partial = store.state_at(aggregate_id, 2).await.unwrap();
        assert_eq!(partial.version, 2);
        assert_eq!(partial.total_cost, rust_decimal::Decimal::from(2));

        let full = store.state(aggregate_id).await.unwrap();
        assert_eq!(full.version, 3);
    }
}
