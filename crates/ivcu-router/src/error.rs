use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{provider} returned {status}: {body}")]
    ApiError {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} returned an empty or unparseable response")]
    EmptyResponse { provider: String },

    #[error("missing credential: {0}")]
    MissingCredential(String),
}

impl ProviderError {
    /// Whether the circuit breaker should count this failure as transient
    /// (worth retrying/falling back) rather than a hard misconfiguration.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500 || *status == 429,
            ProviderError::EmptyResponse { .. } => true,
            ProviderError::MissingCredential(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no provider registered for model {0}")]
    UnknownModel(String),

    #[error("model {0} is denied by policy")]
    PolicyDenied(String),

    #[error("circuit open for provider {0}")]
    CircuitOpen(String),

    #[error("all providers exhausted, last error: {0}")]
    AllProvidersFailed(#[source] ProviderError),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl RouterError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RouterError::CircuitOpen(_) => true,
            RouterError::AllProvidersFailed(_) => false,
            RouterError::Provider(e) => e.is_retryable(),
            RouterError::UnknownModel(_) | RouterError::PolicyDenied(_) | RouterError::BudgetExceeded(_) => false,
        }
    }
}
