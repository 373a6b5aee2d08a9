//! Pure domain types for the IVCU control plane.
//!
//! Nothing in this crate performs I/O. Event payloads, the IVCU projection,
//! candidates, bandit arms, cache entries and proof certificates are all
//! plain serializable records — the components that own behavior over them
//! (`ivcu-store`, `ivcu-bandit`, `ivcu-cache`, `ivcu-certificate`, ...) live
//! in their own crates.

mod candidate;
mod certificate;
mod contract;
mod event;
mod state;
mod validation;

pub use candidate::{Candidate, Verification};
pub use certificate::{CertificateExportBundle, ProofCertificate, RevocationStatus};
pub use contract::{Contract, ContractKind};
pub use event::{Event, EventPayload};
pub use state::{IvcuState, IvcuStatus};
pub use validation::ValidationError;

/// Result of one verifier within a tier, or of a whole tier aggregated.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TierResult {
    pub tier: u8,
    pub name: String,
    pub passed: bool,
    pub confidence: f64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

/// Aggregated verification outcome carried on `CANDIDATE_SELECTED` and in
/// `IvcuState`.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VerificationSummary {
    pub overall_passed: bool,
    pub overall_confidence: f64,
    pub tier_results: Vec<TierResult>,
}

impl VerificationSummary {
    pub fn from_tier_results(tier_results: Vec<TierResult>) -> Self {
        let overall_passed = tier_results.iter().all(|t| t.passed);
        let overall_confidence = if tier_results.is_empty() {
            0.0
        } else {
            tier_results.iter().map(|t| t.confidence).sum::<f64>() / tier_results.len() as f64
        };
        Self {
            overall_passed,
            overall_confidence,
            tier_results,
        }
    }
}
