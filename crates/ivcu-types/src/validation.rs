use thiserror::Error;

/// Malformed event payload or contract expression. Rejected before append.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown event discriminator: {0}")]
    UnknownEventType(String),

    #[error("malformed contract expression: {0}")]
    MalformedContract(String),

    #[error("missing required field `{0}` on {1}")]
    MissingField(&'static str, &'static str),

    #[error("confidence {0} out of range [0, 1]")]
    ConfidenceOutOfRange(f64),
}
