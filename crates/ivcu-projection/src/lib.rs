//! Translates committed events into derived views — vector memory nodes,
//! aggregate verification counters, SDO graph edges — and publishes sync
//! tokens so writers get read-after-write consistency on those views.
//!
//! At-least-once delivery from a durable bus; idempotency on
//! `(aggregate_id, sequence_number)` makes redelivery safe. Grounded on
//! `projection_engine.py` (handler registry, `ConsistencyManager` sync
//! tokens) and `ob-workflow::listener::TaskQueueListener` (the consumer
//! loop's poll/ack/nak/backoff/park shape).

pub mod bus;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod kv;

pub use bus::{Delivery, EventBus, InMemoryEventBus};
pub use consumer::{idempotency_key, ParkedMessage, ProjectionConsumer, DEFAULT_MAX_DELIVER, SYNC_TOKEN_TTL};
pub use error::ProjectionError;
pub use handler::{
    GraphEdge, IntentCreatedHandler, MemoryNode, ProjectionHandler, SdoUpdatedHandler, VerificationCompletedHandler,
    VerificationCounters,
};
pub use kv::{InMemoryKvStore, KvStore};
