use ivcu_cache::PolicyViolation;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] ivcu_store::StoreError),

    #[error(transparent)]
    Budget(#[from] ivcu_router::CostOracleError),

    #[error(transparent)]
    Router(#[from] ivcu_router::RouterError),

    #[error(transparent)]
    Bandit(#[from] ivcu_bandit::BanditError),

    #[error(transparent)]
    Certificate(#[from] ivcu_certificate::CertificateError),

    #[error("intent rejected by policy gate: {0:?}")]
    PolicyViolation(Vec<PolicyViolation>),

    #[error("no candidate survived verification for ivcu {0}")]
    NoViableCandidate(Uuid),

    #[error("generation cancelled for ivcu {0}")]
    Cancelled(Uuid),
}
