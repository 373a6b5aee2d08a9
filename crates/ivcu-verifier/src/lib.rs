//! Four-tier code verification: parse, static analysis, sandboxed
//! execution, and SMT/security/fuzz — orchestrated with a fail-fast
//! execution policy and parallel candidate verification.

pub mod error;
pub mod orchestra;
pub mod sandbox;
pub mod tier0;
pub mod tier1;
pub mod tier2;
pub mod tier3;

pub use error::VerifierError;
pub use orchestra::{select_best, CandidateVerificationResult, VerificationRequest, VerifierOrchestra};
pub use sandbox::{FakeSandbox, ProcessSandbox, Sandbox, SandboxRequest, SandboxResult};
pub use tier2::TestCase;
