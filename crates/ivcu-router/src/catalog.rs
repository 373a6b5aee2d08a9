//! Static model catalog: cost, quality, and tier per model, backing the
//! cost oracle's `estimate`/`recommend` and the router's fallback selection.
//!
//! Supplemented from the prototype's `models/catalog.py`, dropped from the
//! distilled spec but load-bearing for "alternatives (cheaper, more
//! accurate)" in the cost oracle's contract.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Economy,
    Standard,
    Premium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub model_id: String,
    pub provider: String,
    pub tier: ModelTier,
    pub humaneval_score: f64,
    pub cost_per_1k_input: Decimal,
    pub cost_per_1k_output: Decimal,
    pub available: bool,
}

/// The six models the bandit and router both know about.
pub fn default_catalog() -> Vec<ModelSpec> {
    vec![
        ModelSpec {
            model_id: "claude-haiku".to_string(),
            provider: "anthropic".to_string(),
            tier: ModelTier::Economy,
            humaneval_score: 0.68,
            cost_per_1k_input: Decimal::new(8, 4),
            cost_per_1k_output: Decimal::new(4, 3),
            available: true,
        },
        ModelSpec {
            model_id: "claude-sonnet".to_string(),
            provider: "anthropic".to_string(),
            tier: ModelTier::Standard,
            humaneval_score: 0.84,
            cost_per_1k_input: Decimal::new(3, 3),
            cost_per_1k_output: Decimal::new(15, 3),
            available: true,
        },
        ModelSpec {
            model_id: "claude-opus".to_string(),
            provider: "anthropic".to_string(),
            tier: ModelTier::Premium,
            humaneval_score: 0.92,
            cost_per_1k_input: Decimal::new(15, 3),
            cost_per_1k_output: Decimal::new(75, 3),
            available: true,
        },
        ModelSpec {
            model_id: "gpt-4o-mini".to_string(),
            provider: "openai".to_string(),
            tier: ModelTier::Economy,
            humaneval_score: 0.71,
            cost_per_1k_input: Decimal::new(15, 5),
            cost_per_1k_output: Decimal::new(6, 4),
            available: true,
        },
        ModelSpec {
            model_id: "gpt-4o".to_string(),
            provider: "openai".to_string(),
            tier: ModelTier::Standard,
            humaneval_score: 0.87,
            cost_per_1k_input: Decimal::new(25, 4),
            cost_per_1k_output: Decimal::new(1, 2),
            available: true,
        },
        ModelSpec {
            model_id: "gpt-4-turbo".to_string(),
            provider: "openai".to_string(),
            tier: ModelTier::Premium,
            humaneval_score: 0.90,
            cost_per_1k_input: Decimal::new(1, 2),
            cost_per_1k_output: Decimal::new(3, 2),
            available: true,
        },
    ]
}

pub struct ModelCatalog {
    specs: Vec<ModelSpec>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            specs: default_catalog(),
        }
    }
}

impl ModelCatalog {
    pub fn new(specs: Vec<ModelSpec>) -> Self {
        Self { specs }
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelSpec> {
        self.specs.iter().find(|s| s.model_id == model_id)
    }

    pub fn all(&self) -> &[ModelSpec] {
        &self.specs
    }

    /// Models cheaper than `than` (by output cost) with comparable or
    /// better accuracy, sorted cheapest first — the "alternatives" list the
    /// cost oracle's `estimate` contract calls for.
    pub fn cheaper_alternatives(&self, than: &str) -> Vec<&ModelSpec> {
        let Some(baseline) = self.get(than) else {
            return Vec::new();
        };
        let mut alternatives: Vec<&ModelSpec> = self
            .specs
            .iter()
            .filter(|s| {
                s.available
                    && s.model_id != than
                    && s.cost_per_1k_output < baseline.cost_per_1k_output
            })
            .collect();
        alternatives.sort_by(|a, b| a.cost_per_1k_output.cmp(&b.cost_per_1k_output));
        alternatives
    }
}
