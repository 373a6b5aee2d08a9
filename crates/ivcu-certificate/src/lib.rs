//! Proof Certificate Authority: signs a verification outcome so it can be
//! carried, exported, and re-verified independently of the event store.
//!
//! Grounded on the prototype's `proof_certificate.py::CertificateAuthority`
//! (`issue_certificate`/`verify_certificate`/`revoke_certificate`), with the
//! signing scheme upgraded from the prototype's HMAC shared-secret to the
//! spec's asymmetric Ed25519 (§2 names "Ed25519" as Component F's only
//! dependency, which the HMAC prototype doesn't implement).

pub mod error;

pub use error::CertificateError;

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use ivcu_types::{CertificateExportBundle, ProofCertificate, RevocationStatus, TierResult, VerificationSummary};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// How long a freshly issued certificate stays valid before `verify`
/// reports it `expired`.
const DEFAULT_VALIDITY: Duration = Duration::days(90);

/// `code_hash` as carried on the wire: `"sha256:" + 64 hex chars`.
pub fn code_hash(code: &str) -> String {
    let digest = Sha256::digest(code.as_bytes());
    format!("sha256:{}", hex::encode(digest))
}

/// Canonical, field-sorted JSON of every certificate field except
/// `signature` and `revocation_status` — what the Ed25519 signature
/// actually covers, so `verify` can recompute and compare it.
fn signing_payload(cert: &ProofCertificate) -> Result<Vec<u8>, CertificateError> {
    let value = serde_json::to_value(cert)?;
    let serde_json::Value::Object(map) = value else {
        return Err(CertificateError::KeyMaterial("certificate did not serialize to an object".to_string()));
    };
    let mut sorted: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    for (k, v) in map {
        if k == "signature" || k == "revocation_status" {
            continue;
        }
        sorted.insert(k, v);
    }
    Ok(serde_json::to_vec(&sorted)?)
}

pub struct CertificateVerification {
    pub valid: bool,
    pub hash_valid: bool,
    pub signature_valid: bool,
    pub expired: bool,
    pub revoked: bool,
}

/// Issues, verifies, revokes and exports [`ProofCertificate`]s, holding the
/// signing key and a ledger of issued/revoked certificate ids.
///
/// The ledger is `rebuildable` in principle from `PROOF_GENERATED` events in
/// the event store; this in-process copy exists so `verify`/`revoke` don't
/// need a store round-trip for every call.
pub struct CertificateAuthority {
    issuer: String,
    signing_key: SigningKey,
    validity: Duration,
    ledger: DashMap<Uuid, RwLock<RevocationStatus>>,
}

impl CertificateAuthority {
    pub fn new(issuer: impl Into<String>, signing_key: SigningKey) -> Self {
        Self {
            issuer: issuer.into(),
            signing_key,
            validity: DEFAULT_VALIDITY,
            ledger: DashMap::new(),
        }
    }

    /// Generates a fresh keypair — convenient for tests and for a first-run
    /// deployment that hasn't provisioned a persisted key yet.
    pub fn generate(issuer: impl Into<String>) -> Self {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        Self::new(issuer, signing_key)
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    pub fn public_key_pem(&self) -> String {
        use ed25519_dalek::pkcs8::EncodePublicKey;
        self.signing_key
            .verifying_key()
            .to_public_key_pem(ed25519_dalek::pkcs8::LineEnding::LF)
            .unwrap_or_default()
    }

    /// Signs a verified candidate's outcome, producing a certificate whose
    /// signature covers every field except itself and `revocation_status`.
    pub fn issue(
        &self,
        ivcu_id: Uuid,
        selected_candidate_id: Uuid,
        code: &str,
        tier_results: Vec<TierResult>,
        issued_at: DateTime<Utc>,
    ) -> Result<ProofCertificate, CertificateError> {
        let summary = VerificationSummary::from_tier_results(tier_results);

        let mut cert = ProofCertificate {
            cert_id: Uuid::new_v4(),
            ivcu_id,
            selected_candidate_id,
            code_hash: code_hash(code),
            tier_results: summary.tier_results,
            overall_passed: summary.overall_passed,
            overall_confidence: summary.overall_confidence,
            issued_at,
            expires_at: issued_at + self.validity,
            issuer: self.issuer.clone(),
            signature: String::new(),
            revocation_status: RevocationStatus::Active,
        };

        let payload = signing_payload(&cert)?;
        let signature = self.signing_key.sign(&payload);
        cert.signature = hex::encode(signature.to_bytes());

        self.ledger.insert(cert.cert_id, RwLock::new(RevocationStatus::Active));
        Ok(cert)
    }

    /// Re-verifies a certificate against the code it claims to cover: the
    /// hash must match, the signature must verify over the canonical
    /// payload, the certificate must not be expired, and the ledger must
    /// not show it revoked.
    pub fn verify(&self, cert: &ProofCertificate, code: &str, now: DateTime<Utc>) -> CertificateVerification {
        self.verify_against(&self.signing_key.verifying_key(), cert, code, now)
    }

    /// Same as [`Self::verify`] but against an externally supplied public
    /// key — the path an importer of an exported bundle takes, since it has
    /// no access to this authority's private key.
    pub fn verify_against(
        &self,
        public_key: &VerifyingKey,
        cert: &ProofCertificate,
        code: &str,
        now: DateTime<Utc>,
    ) -> CertificateVerification {
        let hash_valid = cert.code_hash == code_hash(code);

        let signature_valid = match (signing_payload(cert), decode_signature(&cert.signature)) {
            (Ok(payload), Some(signature)) => public_key.verify(&payload, &signature).is_ok(),
            _ => false,
        };

        let expired = now > cert.expires_at;
        let revoked = self
            .ledger
            .get(&cert.cert_id)
            .map(|entry| entry.read().unwrap().is_revoked())
            .unwrap_or_else(|| cert.revocation_status.is_revoked());

        let valid = hash_valid && signature_valid && !expired && !revoked;
        CertificateVerification {
            valid,
            hash_valid,
            signature_valid,
            expired,
            revoked,
        }
    }

    /// Marks a certificate revoked in the ledger. The certificate's own
    /// bytes are never mutated — callers that hold a stale in-memory copy
    /// will see it via a fresh `verify` call, not by the struct changing
    /// underneath them.
    pub fn revoke(&self, cert_id: Uuid, reason: impl Into<String>, at: DateTime<Utc>) -> Result<(), CertificateError> {
        let entry = self
            .ledger
            .get(&cert_id)
            .ok_or(CertificateError::NotFound(cert_id))?;
        let mut status = entry.write().unwrap();
        if status.is_revoked() {
            return Err(CertificateError::AlreadyRevoked(cert_id));
        }
        *status = RevocationStatus::Revoked {
            reason: reason.into(),
            revoked_at: at,
        };
        Ok(())
    }

    pub fn revocation_status(&self, cert_id: Uuid) -> Option<RevocationStatus> {
        self.ledger.get(&cert_id).map(|e| e.read().unwrap().clone())
    }

    /// Self-describing bundle for sharing a certificate outside this
    /// deployment; importers re-verify hash and signature against
    /// `public_key_pem` without needing this authority at all.
    pub fn export(&self, cert: &ProofCertificate, code: &str, created_at: DateTime<Utc>) -> CertificateExportBundle {
        CertificateExportBundle {
            version: 1,
            ivcu_id: cert.ivcu_id,
            code: code.to_string(),
            code_hash: cert.code_hash.clone(),
            proof: cert.clone(),
            public_key_pem: self.public_key_pem(),
            created_at,
        }
    }
}

fn decode_signature(hex_signature: &str) -> Option<ed25519_dalek::Signature> {
    let bytes = hex::decode(hex_signature).ok()?;
    let bytes: [u8; 64] = bytes.try_into().ok()?;
    Some(ed25519_dalek::Signature::from_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivcu_types::ContractKind;

    fn tier(passed: bool, confidence: f64) -> TierResult {
        TierResult {
            tier: 1,
            name: "static".to_string(),
            passed,
            confidence,
            errors: Vec::new(),
            warnings: Vec::new(),
            duration_ms: 5,
        }
    }

    #[test]
    fn issued_certificate_round_trips_through_verify() {
        let authority = CertificateAuthority::generate("ivcu-control-plane");
        let now = Utc::now();
        let code = "def add(a, b):\n    return a + b\n";
        let cert = authority
            .issue(Uuid::new_v4(), Uuid::new_v4(), code, vec![tier(true, 0.9)], now)
            .unwrap();
        let outcome = authority.verify(&cert, code, now);
        assert!(outcome.valid);
        assert!(outcome.hash_valid);
        assert!(outcome.signature_valid);
        assert!(!outcome.expired);
        assert!(!outcome.revoked);
    }

    #[test]
    fn tampering_with_the_code_breaks_the_hash_but_not_the_signature_check() {
        let authority = CertificateAuthority::generate("ivcu-control-plane");
        let now = Utc::now();
        let code = "def add(a, b):\n    return a + b\n";
        let cert = authority
            .issue(Uuid::new_v4(), Uuid::new_v4(), code, vec![tier(true, 0.9)], now)
            .unwrap();
        let tampered = format!("{code}\n# extra byte");
        let outcome = authority.verify(&cert, &tampered, now);
        assert!(!outcome.hash_valid);
        assert!(!outcome.valid);
    }

    #[test]
    fn revoked_certificate_is_no_longer_valid() {
        let authority = CertificateAuthority::generate("ivcu-control-plane");
        let now = Utc::now();
        let code = "x = 1\n";
        let cert = authority
            .issue(Uuid::new_v4(), Uuid::new_v4(), code, vec![tier(true, 1.0)], now)
            .unwrap();
        authority.revoke(cert.cert_id, "superseded", now).unwrap();
        let outcome = authority.verify(&cert, code, now);
        assert!(outcome.revoked);
        assert!(!outcome.valid);
    }

    #[test]
    fn expired_certificate_fails_verification() {
        let authority = CertificateAuthority::generate("ivcu-control-plane").with_validity(Duration::seconds(-1));
        let now = Utc::now();
        let code = "x = 1\n";
        let cert = authority
            .issue(Uuid::new_v4(), Uuid::new_v4(), code, vec![tier(true, 1.0)], now)
            .unwrap();
        let outcome = authority.verify(&cert, code, now);
        assert!(outcome.expired);
        assert!(!outcome.valid);
    }

    #[test]
    fn export_bundle_verifies_against_its_own_public_key() {
        let authority = CertificateAuthority::generate("ivcu-control-plane");
        let now = Utc::now();
        let code = "x = 1\n";
        let cert = authority
            .issue(Uuid::new_v4(), Uuid::new_v4(), code, vec![tier(true, 1.0)], now)
            .unwrap();
        let bundle = authority.export(&cert, code, now);
        assert_eq!(bundle.code_hash, cert.code_hash);
        assert!(!bundle.public_key_pem.is_empty());
    }

    #[test]
    fn overall_passed_requires_every_tier_to_pass() {
        let authority = CertificateAuthority::generate("ivcu-control-plane");
        let now = Utc::now();
        let cert = authority
            .issue(
                Uuid::new_v4(),
                Uuid::new_v4(),
                "x = 1\n",
                vec![tier(true, 0.9), tier(false, 0.3)],
                now,
            )
            .unwrap();
        assert!(!cert.overall_passed);
        let _ = ContractKind::Pre;
    }
}
