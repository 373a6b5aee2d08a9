//! Pluggable per-`event_type` projection handlers, grounded on
//! `projection_engine.py`'s `EventHandler` ABC and handler registry.
//!
//! Each handler owns a derived view: a vector-memory node store, aggregate
//! verification counters, or a graph of SDO nodes/edges. None of these
//! views is authoritative — they are rebuildable from the event log by
//! replaying from sequence 1, which is exactly what makes at-least-once
//! delivery (rather than exactly-once) acceptable here.

use async_trait::async_trait;
use dashmap::DashMap;
use ivcu_types::{Event, EventPayload};
use uuid::Uuid;

use crate::ProjectionError;

#[async_trait]
pub trait ProjectionHandler: Send + Sync {
    /// Projects one event into this handler's derived view. Returning `Err`
    /// tells the consumer loop to `nak` and retry later.
    async fn project(&self, event: &Event) -> Result<(), ProjectionError>;
}

/// A single vector-memory node derived from an `intent_created` event.
#[derive(Debug, Clone)]
pub struct MemoryNode {
    pub ivcu_id: Uuid,
    pub raw_intent: String,
    pub language: String,
}

/// Writes a memory node for every newly created intent.
pub struct IntentCreatedHandler {
    pub nodes: DashMap<Uuid, MemoryNode>,
}

impl IntentCreatedHandler {
    pub fn new() -> Self {
        Self { nodes: DashMap::new() }
    }
}

impl Default for IntentCreatedHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProjectionHandler for IntentCreatedHandler {
    async fn project(&self, event: &Event) -> Result<(), ProjectionError> {
        let EventPayload::IntentCreated { raw_intent, language, .. } = &event.payload else {
            return Err(ProjectionError::WrongEventType {
                handler: "IntentCreatedHandler",
                event_type: event.event_type(),
            });
        };
        self.nodes.insert(
            event.aggregate_id,
            MemoryNode {
                ivcu_id: event.aggregate_id,
                raw_intent: raw_intent.clone(),
                language: language.clone(),
            },
        );
        Ok(())
    }
}

/// Aggregate verification counters, one entry per IVCU.
#[derive(Debug, Clone, Default)]
pub struct VerificationCounters {
    pub attempts: u64,
    pub passes: u64,
}

/// Increments verification counters on every `verification_completed`.
pub struct VerificationCompletedHandler {
    pub counters: DashMap<Uuid, VerificationCounters>,
}

impl VerificationCompletedHandler {
    pub fn new() -> Self {
        Self { counters: DashMap::new() }
    }
}

impl Default for VerificationCompletedHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProjectionHandler for VerificationCompletedHandler {
    async fn project(&self, event: &Event) -> Result<(), ProjectionError> {
        let EventPayload::VerificationCompleted { passed, .. } = &event.payload else {
            return Err(ProjectionError::WrongEventType {
                handler: "VerificationCompletedHandler",
                event_type: event.event_type(),
            });
        };
        let mut entry = self.counters.entry(event.aggregate_id).or_default();
        entry.attempts += 1;
        if *passed {
            entry.passes += 1;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub from: Uuid,
    pub to: Uuid,
    pub label: String,
}

/// Updates graph nodes/edges when an SDO-shaped event lands — here,
/// `ivcu_deployed` and `ivcu_deprecated`, the two lifecycle events that
/// change an IVCU's place in the dependency graph.
pub struct SdoUpdatedHandler {
    pub nodes: DashMap<Uuid, String>,
    pub edges: DashMap<Uuid, Vec<GraphEdge>>,
}

impl SdoUpdatedHandler {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            edges: DashMap::new(),
        }
    }
}

impl Default for SdoUpdatedHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProjectionHandler for SdoUpdatedHandler {
    async fn project(&self, event: &Event) -> Result<(), ProjectionError> {
        match &event.payload {
            EventPayload::IvcuDeployed { version } => {
                self.nodes.insert(event.aggregate_id, format!("deployed:v{version}"));
                Ok(())
            }
            EventPayload::IvcuDeprecated { reason } => {
                self.nodes.insert(event.aggregate_id, format!("deprecated:{reason}"));
                Ok(())
            }
            _ => Err(ProjectionError::WrongEventType {
                handler: "SdoUpdatedHandler",
                event_type: event.event_type(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(aggregate_id: Uuid, payload: EventPayload) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            aggregate_id,
            sequence_number: 1,
            payload,
            timestamp: Utc::now(),
            actor_id: None,
        }
    }

    #[tokio::test]
    async fn intent_created_handler_writes_a_memory_node() {
        let handler = IntentCreatedHandler::new();
        let ivcu_id = Uuid::new_v4();
        let e = event(
            ivcu_id,
            EventPayload::IntentCreated {
                raw_intent: "parse a csv".to_string(),
                parsed_intent: None,
                language: "python".to_string(),
            },
        );
        handler.project(&e).await.unwrap();
        assert_eq!(handler.nodes.get(&ivcu_id).unwrap().raw_intent, "parse a csv");
    }

    #[tokio::test]
    async fn verification_completed_handler_increments_counters() {
        let handler = VerificationCompletedHandler::new();
        let ivcu_id = Uuid::new_v4();
        let passed = event(
            ivcu_id,
            EventPayload::VerificationCompleted {
                candidate_id: Uuid::new_v4(),
                passed: true,
                score: 0.9,
                tier_results: vec![],
            },
        );
        let failed = event(
            ivcu_id,
            EventPayload::VerificationCompleted {
                candidate_id: Uuid::new_v4(),
                passed: false,
                score: 0.1,
                tier_results: vec![],
            },
        );
        handler.project(&passed).await.unwrap();
        handler.project(&failed).await.unwrap();
        let counters = handler.counters.get(&ivcu_id).unwrap();
        assert_eq!(counters.attempts, 2);
        assert_eq!(counters.passes, 1);
    }

    #[tokio::test]
    async fn handler_rejects_an_event_it_does_not_own() {
        let handler = IntentCreatedHandler::new();
        let e = event(Uuid::new_v4(), EventPayload::IvcuDeployed { version: 1 });
        assert!(handler.project(&e).await.is_err());
    }
}
