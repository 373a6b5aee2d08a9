//! Append-only event store for IVCU aggregates.
//!
//! Events are never deleted or mutated; "undo" is a forward-appended
//! compensating event. Sequence numbers are dense and monotonic per
//! aggregate, enforced via optimistic concurrency (`expected_version`).

pub mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use error::StoreError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ivcu_types::{Event, EventPayload, IvcuState};
use rust_decimal::Decimal;
use uuid::Uuid;

/// One line of the cost ledger, derived from `CostIncurred` events.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CostEntry {
    pub event_id: Uuid,
    pub amount_usd: Decimal,
    pub model_id: String,
    pub operation: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends one event, rejecting the call if `expected_version` does not
    /// match the aggregate's current version (optimistic concurrency).
    /// Passing `expected_version = 0` both creates a new aggregate and
    /// appends its first event.
    async fn append(
        &self,
        aggregate_id: Uuid,
        expected_version: u64,
        payload: EventPayload,
        actor_id: Option<String>,
    ) -> Result<Event, StoreError>;

    /// Full event stream for one aggregate, in sequence order.
    async fn events(&self, aggregate_id: Uuid) -> Result<Vec<Event>, StoreError>;

    /// Events strictly after `after_version`, in sequence order.
    async fn events_since(&self, aggregate_id: Uuid, after_version: u64)
        -> Result<Vec<Event>, StoreError>;

    /// Current projected state, folded from the full stream.
    async fn state(&self, aggregate_id: Uuid) -> Result<IvcuState, StoreError>;

    /// Projected state as of a specific version (point-in-time replay).
    async fn state_at(&self, aggregate_id: Uuid, version: u64) -> Result<IvcuState, StoreError>;

    /// Reverses the last event on `aggregate_id` by appending a compensating
    /// forward event (never by deleting anything) and returns the resulting
    /// state.
    ///
    /// Only `CandidateSelected` and `IntentRefined` have a defined inverse:
    /// - undoing a `CandidateSelected` appends `IntentRefined{clear_candidates:
    ///   false, undo_selection: true}`, which clears the selection and drops
    ///   the aggregate back to `verifying`.
    /// - undoing an `IntentRefined` walks back through the stream for the
    ///   `IntentCreated` that preceded it and re-appends its intent as a
    ///   fresh `IntentRefined{clear_candidates: false, undo_selection: false}`.
    ///
    /// Any other last event, or a stream with fewer than two events, has no
    /// defined compensating event and returns `StoreError::UndoRejected`.
    async fn undo(&self, aggregate_id: Uuid, actor_id: Option<String>) -> Result<IvcuState, StoreError> {
        let events = self.events(aggregate_id).await?;
        if events.len() < 2 {
            return Err(StoreError::UndoRejected(
                "nothing to undo: aggregate has fewer than two events".to_string(),
            ));
        }
        let last = events.last().expect("len checked above");
        let compensating = match &last.payload {
            EventPayload::CandidateSelected { .. } => {
                let state = ivcu_projector::replay(&events)?;
                EventPayload::IntentRefined {
                    new_intent: state.raw_intent.clone().unwrap_or_default(),
                    new_parsed_intent: state.parsed_intent.clone(),
                    clear_candidates: false,
                    undo_selection: true,
                }
            }
            EventPayload::IntentRefined { .. } => {
                events[..events.len() - 1]
                    .iter()
                    .rev()
                    .find_map(|e| match &e.payload {
                        EventPayload::IntentCreated {
                            raw_intent,
                            parsed_intent,
                            ..
                        } => Some(EventPayload::IntentRefined {
                            new_intent: raw_intent.clone(),
                            new_parsed_intent: parsed_intent.clone(),
                            clear_candidates: false,
                            undo_selection: false,
                        }),
                        _ => None,
                    })
                    .ok_or_else(|| {
                        StoreError::UndoRejected(
                            "no prior intent_created event to restore".to_string(),
                        )
                    })?
            }
            other => {
                return Err(StoreError::UndoRejected(format!(
                    "no compensating event defined for {}",
                    other.event_type()
                )))
            }
        };

        let expected_version = last.sequence_number;
        self.append(aggregate_id, expected_version, compensating, actor_id)
            .await?;
        self.state(aggregate_id).await
    }

    /// Alias over `events`, named for the read path that only cares about
    /// who did what when, not the projection.
    async fn audit_log(&self, aggregate_id: Uuid) -> Result<Vec<Event>, StoreError> {
        self.events(aggregate_id).await
    }

    /// `CostIncurred` events for one aggregate, extracted into a flat ledger.
    async fn cost_ledger(&self, aggregate_id: Uuid) -> Result<Vec<CostEntry>, StoreError> {
        let events = self.events(aggregate_id).await?;
        Ok(events
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::CostIncurred {
                    amount_usd,
                    model_id,
                    operation,
                } => Some(CostEntry {
                    event_id: e.event_id,
                    amount_usd,
                    model_id,
                    operation,
                    timestamp: e.timestamp,
                }),
                _ => None,
            })
            .collect())
    }
}
