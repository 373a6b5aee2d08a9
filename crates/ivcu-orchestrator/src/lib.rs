//! Generation orchestrator: the per-IVCU state machine that ties every
//! other component (store, bandit, router, verifier, certificate
//! authority, cache, policy gate, memory) into `run_full`/`run_adaptive`.

pub mod error;
pub mod memory;
pub mod orchestrator;

pub use error::OrchestratorError;
pub use memory::{FakeMemoryRetriever, MemoryRetriever, NullMemoryRetriever};
pub use orchestrator::{GenerationOrchestrator, GenerationRequest, OrchestratorBuilder};
