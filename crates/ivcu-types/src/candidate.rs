use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TierResult;

/// One generated candidate and its verification outcome, as tracked inside
/// `IvcuState::candidates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub candidate_id: Uuid,
    pub code: String,
    pub confidence: f64,
    pub model_id: String,
    pub reasoning: Option<String>,
    pub verification: Verification,
    pub pruned: bool,
}

impl Candidate {
    pub fn new(candidate_id: Uuid, code: String, confidence: f64, model_id: String) -> Self {
        Self {
            candidate_id,
            code,
            confidence,
            model_id,
            reasoning: None,
            verification: Verification::default(),
            pruned: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub passed: bool,
    pub score: f64,
    pub tier_results: Vec<TierResult>,
}
