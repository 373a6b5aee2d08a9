use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate {0} not found")]
    NotFound(uuid::Uuid),
    #[error("certificate {0} is already revoked")]
    AlreadyRevoked(uuid::Uuid),
    #[error("signature does not verify")]
    InvalidSignature,
    #[error("certificate expired at {0}")]
    Expired(chrono::DateTime<chrono::Utc>),
    #[error("canonicalization failed: {0}")]
    Canonicalize(#[from] serde_json::Error),
    #[error("malformed key material: {0}")]
    KeyMaterial(String),
}
