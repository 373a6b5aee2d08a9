use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Candidate, Contract};

/// Derived read model for one IVCU, folded from its event stream.
///
/// `apply` (in `ivcu-projector`) is a pure `(state, event) -> state` fold;
/// this struct only carries data, never behavior that would make replay
/// ambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IvcuState {
    pub ivcu_id: Uuid,
    pub version: u64,
    pub raw_intent: Option<String>,
    pub parsed_intent: Option<serde_json::Value>,
    pub contracts: Vec<Contract>,
    pub candidates: Vec<Candidate>,
    pub selected_candidate_id: Option<Uuid>,
    pub code: Option<String>,
    pub language: String,
    pub confidence: f64,
    pub status: IvcuStatus,
    pub total_cost: Decimal,
    pub proof_certificate_id: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl IvcuState {
    pub fn new(ivcu_id: Uuid) -> Self {
        Self {
            ivcu_id,
            version: 0,
            raw_intent: None,
            parsed_intent: None,
            contracts: Vec::new(),
            candidates: Vec::new(),
            selected_candidate_id: None,
            code: None,
            language: "python".to_string(),
            confidence: 0.0,
            status: IvcuStatus::Draft,
            total_cost: Decimal::ZERO,
            proof_certificate_id: None,
            failure_reason: None,
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IvcuStatus {
    Draft,
    Generating,
    Verifying,
    Verified,
    Failed,
    Deployed,
    Deprecated,
}
