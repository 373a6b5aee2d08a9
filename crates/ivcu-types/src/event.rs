use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Contract, TierResult, VerificationSummary};

/// Immutable, sequentially numbered record of a state transition on one IVCU.
///
/// `(aggregate_id, sequence_number)` is unique and sequence numbers are
/// dense (1..N, no gaps) within an aggregate — enforced by `ivcu-store`, not
/// by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub aggregate_id: Uuid,
    pub sequence_number: u64,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    pub actor_id: Option<String>,
}

impl Event {
    /// Stable discriminator string, used for projection handler routing and
    /// for the `event_type` column/JSON tag.
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

/// Discriminated union of all event payload schemas. Tagged on the wire by
/// `event_type` (Design Note §9: "Dynamic event payloads → tagged variants").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventPayload {
    IntentCreated {
        raw_intent: String,
        parsed_intent: Option<serde_json::Value>,
        language: String,
    },
    ContractAdded {
        contract: Contract,
    },
    CandidateGenerated {
        candidate_id: Uuid,
        code: String,
        confidence: f64,
        model_id: String,
        reasoning: Option<String>,
    },
    VerificationCompleted {
        candidate_id: Uuid,
        passed: bool,
        score: f64,
        tier_results: Vec<TierResult>,
    },
    CandidateSelected {
        /// `None` when the orchestrator selects "no winner" (all candidates
        /// failed) — see DESIGN.md's resolution of the `status` Open
        /// Question.
        candidate_id: Option<Uuid>,
        code: Option<String>,
        confidence: f64,
        verification_summary: VerificationSummary,
    },
    IntentRefined {
        new_intent: String,
        new_parsed_intent: Option<serde_json::Value>,
        clear_candidates: bool,
        /// Set by `EventStore::undo` when compensating a `CandidateSelected`:
        /// clears the selection without touching the candidates or intent.
        undo_selection: bool,
    },
    ProofGenerated {
        certificate_id: Uuid,
        code_hash: String,
        signature: String,
        expires_at: DateTime<Utc>,
    },
    IvcuDeployed {
        version: u64,
    },
    IvcuDeprecated {
        reason: String,
    },
    CostIncurred {
        amount_usd: Decimal,
        model_id: String,
        operation: String,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::IntentCreated { .. } => "intent_created",
            EventPayload::ContractAdded { .. } => "contract_added",
            EventPayload::CandidateGenerated { .. } => "candidate_generated",
            EventPayload::VerificationCompleted { .. } => "verification_completed",
            EventPayload::CandidateSelected { .. } => "candidate_selected",
            EventPayload::IntentRefined { .. } => "intent_refined",
            EventPayload::ProofGenerated { .. } => "proof_generated",
            EventPayload::IvcuDeployed { .. } => "ivcu_deployed",
            EventPayload::IvcuDeprecated { .. } => "ivcu_deprecated",
            EventPayload::CostIncurred { .. } => "cost_incurred",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_matches_serde_tag() {
        let payload = EventPayload::IvcuDeployed { version: 3 };
        assert_eq!(payload.event_type(), "ivcu_deployed");
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["event_type"], "ivcu_deployed");
    }
}
