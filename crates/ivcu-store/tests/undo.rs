//! End-to-end undo scenario: `intent_created -> candidate_generated ->
//! candidate_selected`, then `undo()` should reverse the selection and drop
//! the aggregate back to `verifying` without touching the candidates.

use ivcu_store::{EventStore, StoreError};
use ivcu_store::memory::InMemoryEventStore;
use ivcu_types::{EventPayload, IvcuStatus, VerificationSummary};
use uuid::Uuid;

#[tokio::test]
async fn undo_reverses_candidate_selection() {
    let store = InMemoryEventStore::new();
    let aggregate_id = Uuid::new_v4();
    let candidate_id = Uuid::new_v4();

    store
        .append(
            aggregate_id,
            0,
            EventPayload::IntentCreated {
                raw_intent: "sort a list".to_string(),
                parsed_intent: None,
                language: "python".to_string(),
            },
            None,
        )
        .await
        .unwrap();

    store
        .append(
            aggregate_id,
            1,
            EventPayload::CandidateGenerated {
                candidate_id,
                code: "def sort_list(xs): return sorted(xs)".to_string(),
                confidence: 0.9,
                model_id: "haiku".to_string(),
                reasoning: None,
            },
            None,
        )
        .await
        .unwrap();

    store
        .append(
            aggregate_id,
            2,
            EventPayload::CandidateSelected {
                candidate_id: Some(candidate_id),
                code: Some("def sort_list(xs): return sorted(xs)".to_string()),
                confidence: 0.9,
                verification_summary: VerificationSummary {
                    overall_passed: true,
                    ..Default::default()
                },
            },
            None,
        )
        .await
        .unwrap();

    let selected = store.state(aggregate_id).await.unwrap();
    assert_eq!(selected.status, IvcuStatus::Verified);
    assert_eq!(selected.selected_candidate_id, Some(candidate_id));
    assert!(selected.code.is_some());

    let undone = store.undo(aggregate_id, None).await.unwrap();
    assert_eq!(undone.status, IvcuStatus::Verifying);
    assert!(undone.selected_candidate_id.is_none());
    assert!(undone.code.is_none());
    assert_eq!(undone.candidates.len(), 1, "undo must not drop candidates");
    assert_eq!(undone.version, 4);
}

#[tokio::test]
async fn undo_rejects_a_single_event_stream() {
    let store = InMemoryEventStore::new();
    let aggregate_id = Uuid::new_v4();

    store
        .append(
            aggregate_id,
            0,
            EventPayload::IntentCreated {
                raw_intent: "sort a list".to_string(),
                parsed_intent: None,
                language: "python".to_string(),
            },
            None,
        )
        .await
        .unwrap();

    let err = store.undo(aggregate_id, None).await.unwrap_err();
    assert!(matches!(err, StoreError::UndoRejected(_)));
}
