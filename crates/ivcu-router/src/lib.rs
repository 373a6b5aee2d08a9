//! Multi-provider LLM router with per-provider circuit breaking, and the
//! cost oracle that gates generation on budget before a single token is
//! spent.

pub mod anthropic;
pub mod catalog;
pub mod cost_oracle;
pub mod error;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use catalog::{ModelCatalog, ModelSpec, ModelTier};
pub use cost_oracle::{Complexity, CostOracle, CostOracleError, EstimatedCost, SessionBudget, TOKENS_PER_CHAR};
pub use error::{ProviderError, RouterError};
pub use mock::MockProvider;
pub use openai::OpenAiProvider;
pub use provider::{ChatRequest, ChatResponse, LlmProvider};
pub use router::{Router, RoutingRule};
