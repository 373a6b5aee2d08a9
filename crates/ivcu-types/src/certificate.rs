use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TierResult;

/// Signed record binding a verified code hash to its verification outcomes.
///
/// Signature covers the canonical encoding of every field *except*
/// `signature` and `revocation_status` (§3, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofCertificate {
    pub cert_id: Uuid,
    pub ivcu_id: Uuid,
    pub selected_candidate_id: Uuid,
    /// `"sha256:" + 64 hex chars`.
    pub code_hash: String,
    pub tier_results: Vec<TierResult>,
    pub overall_passed: bool,
    pub overall_confidence: f64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub issuer: String,
    /// Hex-encoded Ed25519 signature (128 hex chars).
    pub signature: String,
    pub revocation_status: RevocationStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RevocationStatus {
    #[default]
    Active,
    Revoked {
        reason: String,
        revoked_at: DateTime<Utc>,
    },
}

impl RevocationStatus {
    pub fn is_revoked(&self) -> bool {
        matches!(self, RevocationStatus::Revoked { .. })
    }
}

/// Self-describing export format for sharing a certificate outside this
/// deployment. Importers re-verify hash and signature against
/// `public_key_pem`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateExportBundle {
    pub version: u32,
    pub ivcu_id: Uuid,
    pub code: String,
    pub code_hash: String,
    pub proof: ProofCertificate,
    pub public_key_pem: String,
    pub created_at: DateTime<Utc>,
}
