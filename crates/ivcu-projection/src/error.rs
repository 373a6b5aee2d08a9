use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("{handler} received a {event_type} event it does not handle")]
    WrongEventType {
        handler: &'static str,
        event_type: &'static str,
    },

    #[error("kv store error: {0}")]
    Kv(String),

    #[error("event bus closed")]
    BusClosed,
}
