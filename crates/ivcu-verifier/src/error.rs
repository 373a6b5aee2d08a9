use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("tier {0} has no registered verifiers")]
    EmptyTier(u8),

    #[error("sandbox launch failed: {0}")]
    SandboxLaunch(String),

    #[error("sandbox timed out after {0:?}")]
    SandboxTimeout(std::time::Duration),

    #[error("sandbox queue is full")]
    SandboxQueueFull,

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),
}

impl VerifierError {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VerifierError::SandboxTimeout(_) | VerifierError::SandboxQueueFull)
    }
}
