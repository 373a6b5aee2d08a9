//! Pure `(state, event) -> state` fold over an IVCU's event stream.
//!
//! Nothing here touches storage or the clock beyond the timestamps already
//! carried on each [`Event`]. Replaying the same prefix of a stream always
//! yields the same [`IvcuState`] — that determinism is what lets the store
//! serve `state_at` and what makes the projection engine's at-least-once
//! delivery safe to re-apply.

use ivcu_types::{
    Candidate, Event, EventPayload, IvcuState, IvcuStatus, ValidationError, VerificationSummary,
};

/// Applies a single event on top of `state`, returning the new state.
///
/// `state.version` must equal `event.sequence_number - 1`; callers (the
/// store, the projection engine) are responsible for feeding events in
/// order — this function does not re-check ordering so that it stays a pure,
/// total fold over whatever slice it's given.
pub fn apply(state: &IvcuState, event: &Event) -> Result<IvcuState, ValidationError> {
    let mut next = state.clone();
    next.version = event.sequence_number;
    next.updated_at = Some(event.timestamp);
    if next.created_at.is_none() {
        next.created_at = Some(event.timestamp);
    }

    match &event.payload {
        EventPayload::IntentCreated {
            raw_intent,
            parsed_intent,
            language,
        } => {
            next.raw_intent = Some(raw_intent.clone());
            next.parsed_intent = parsed_intent.clone();
            next.language = language.clone();
            next.status = IvcuStatus::Draft;
        }

        EventPayload::ContractAdded { contract } => {
            next.contracts.push(contract.clone());
        }

        EventPayload::CandidateGenerated {
            candidate_id,
            code,
            confidence,
            model_id,
            reasoning,
        } => {
            check_confidence(*confidence)?;
            let mut candidate =
                Candidate::new(*candidate_id, code.clone(), *confidence, model_id.clone());
            candidate.reasoning = reasoning.clone();
            next.candidates.push(candidate);
            next.status = IvcuStatus::Generating;
        }

        EventPayload::VerificationCompleted {
            candidate_id,
            passed,
            score,
            tier_results,
        } => {
            let candidate = next
                .candidates
                .iter_mut()
                .find(|c| c.candidate_id == *candidate_id)
                .ok_or_else(|| {
                    ValidationError::MissingField("candidate_id", "verification_completed")
                })?;
            candidate.verification.passed = *passed;
            candidate.verification.score = *score;
            candidate.verification.tier_results = tier_results.clone();
            next.status = IvcuStatus::Verifying;
        }

        EventPayload::CandidateSelected {
            candidate_id,
            code,
            confidence,
            verification_summary,
        } => {
            apply_candidate_selected(&mut next, *candidate_id, code, *confidence, verification_summary);
        }

        EventPayload::IntentRefined {
            new_intent,
            new_parsed_intent,
            clear_candidates,
            undo_selection,
        } => {
            next.raw_intent = Some(new_intent.clone());
            next.parsed_intent = new_parsed_intent.clone();
            if *clear_candidates {
                next.candidates.clear();
                next.selected_candidate_id = None;
                next.code = None;
                next.confidence = 0.0;
                next.status = IvcuStatus::Draft;
            } else if *undo_selection {
                next.selected_candidate_id = None;
                next.code = None;
                next.status = IvcuStatus::Verifying;
            }
        }

        EventPayload::ProofGenerated { certificate_id, .. } => {
            next.proof_certificate_id = Some(*certificate_id);
        }

        EventPayload::IvcuDeployed { .. } => {
            next.status = IvcuStatus::Deployed;
        }

        EventPayload::IvcuDeprecated { reason } => {
            next.status = IvcuStatus::Deprecated;
            next.failure_reason = Some(reason.clone());
        }

        EventPayload::CostIncurred { amount_usd, .. } => {
            next.total_cost += *amount_usd;
        }
    }

    Ok(next)
}

fn apply_candidate_selected(
    state: &mut IvcuState,
    candidate_id: Option<uuid::Uuid>,
    code: &Option<String>,
    confidence: f64,
    verification_summary: &VerificationSummary,
) {
    state.selected_candidate_id = candidate_id;
    state.confidence = confidence;
    if verification_summary.overall_passed {
        state.code = code.clone();
        state.status = IvcuStatus::Verified;
        state.failure_reason = None;
    } else {
        state.code = None;
        state.status = IvcuStatus::Failed;
        state.failure_reason = Some("no candidate passed verification".to_string());
    }
}

fn check_confidence(confidence: f64) -> Result<(), ValidationError> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(ValidationError::ConfidenceOutOfRange(confidence));
    }
    Ok(())
}

/// Folds a full, sequence-ordered event stream into the final [`IvcuState`].
///
/// Panics-free on an empty slice: returns `Err` via the first event's absence
/// is never hit because callers always have at least one event for an
/// aggregate that exists; an empty stream is simply not a valid aggregate.
pub fn replay(events: &[Event]) -> Result<IvcuState, ValidationError> {
    let first = events
        .first()
        .ok_or_else(|| ValidationError::MissingField("events", "replay"))?;
    let mut state = IvcuState::new(first.aggregate_id);
    for event in events {
        state = apply(&state, event)?;
    }
    Ok(state)
}

/// Folds only the events up to and including `target_version`, for
/// point-in-time reconstruction.
pub fn replay_to(events: &[Event], target_version: u64) -> Result<IvcuState, ValidationError> {
    let prefix: Vec<Event> = events
        .iter()
        .filter(|e| e.sequence_number <= target_version)
        .cloned()
        .collect();
    replay(&prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn intent_event(aggregate_id: Uuid, seq: u64) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            aggregate_id,
            sequence_number: seq,
            payload: EventPayload::IntentCreated {
                raw_intent: "sort a list".to_string(),
                parsed_intent: None,
                language: "python".to_string(),
            },
            timestamp: Utc::now(),
            actor_id: None,
        }
    }

    #[test]
    fn intent_created_starts_in_draft() {
        let aggregate_id = Uuid::new_v4();
        let state = replay(&[intent_event(aggregate_id, 1)]).unwrap();
        assert_eq!(state.status, IvcuStatus::Draft);
        assert_eq!(state.version, 1);
        assert_eq!(state.raw_intent.as_deref(), Some("sort a list"));
    }

    #[test]
    fn candidate_selected_failure_keeps_candidate_id() {
        let aggregate_id = Uuid::new_v4();
        let candidate_id = Uuid::new_v4();
        let events = vec![
            intent_event(aggregate_id, 1),
            Event {
                event_id: Uuid::new_v4(),
                aggregate_id,
                sequence_number: 2,
                payload: EventPayload::CandidateGenerated {
                    candidate_id,
                    code: "def f(): pass".to_string(),
                    confidence: 0.4,
                    model_id: "haiku".to_string(),
                    reasoning: None,
                },
                timestamp: Utc::now(),
                actor_id: None,
            },
            Event {
                event_id: Uuid::new_v4(),
                aggregate_id,
                sequence_number: 3,
                payload: EventPayload::CandidateSelected {
                    candidate_id: Some(candidate_id),
                    code: None,
                    confidence: 0.4,
                    verification_summary: VerificationSummary::default(),
                },
                timestamp: Utc::now(),
                actor_id: None,
            },
        ];
        let state = replay(&events).unwrap();
        assert_eq!(state.status, IvcuStatus::Failed);
        assert_eq!(state.selected_candidate_id, Some(candidate_id));
        assert!(state.code.is_none());
    }

    proptest! {
        #[test]
        fn version_tracks_event_count(n in 1u64..20) {
            let aggregate_id = Uuid::new_v4();
            let events: Vec<Event> = (1..=n).map(|seq| intent_event(aggregate_id, seq)).collect();
            let state = replay(&events).unwrap();
            prop_assert_eq!(state.version, n);
        }

        #[test]
        fn replay_is_deterministic(n in 1u64..10) {
            let aggregate_id = Uuid::new_v4();
            let events: Vec<Event> = (1..=n).map(|seq| intent_event(aggregate_id, seq)).collect();
            let a = replay(&events).unwrap();
            let b = replay(&events).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
