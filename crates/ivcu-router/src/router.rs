//! Routes a chat request to the right provider, enforcing model-routing
//! policy and breaking the circuit on a provider that's failing repeatedly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ivcu_cache::ModelRoutingPolicy;
use tracing::{info, warn};

use crate::catalog::ModelCatalog;
use crate::error::RouterError;
use crate::provider::{ChatRequest, ChatResponse, LlmProvider};

/// Consecutive failures before a provider's circuit trips open.
const TRIP_THRESHOLD: u32 = 5;
/// How long a tripped circuit stays open before allowing a half-open trial.
const OPEN_DURATION: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Breaker {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl Default for Breaker {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

#[derive(Default)]
struct ProviderMetrics {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

/// One priority-ordered routing preference, e.g. "route `moderate`
/// complexity requests to `claude-sonnet` unless policy denies it".
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub name: String,
    pub priority: i32,
    pub model_id: String,
}

pub struct Router {
    providers: Vec<Box<dyn LlmProvider>>,
    rules: Vec<RoutingRule>,
    catalog: ModelCatalog,
    breakers: DashMap<String, Mutex<Breaker>>,
    metrics: DashMap<String, ProviderMetrics>,
}

impl Router {
    pub fn new(providers: Vec<Box<dyn LlmProvider>>, mut rules: Vec<RoutingRule>, catalog: ModelCatalog) -> Self {
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Self {
            providers,
            rules,
            catalog,
            breakers: DashMap::new(),
            metrics: DashMap::new(),
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Highest-priority rule's model id, or the policy's default model if no
    /// rule matches (rules currently match unconditionally by declaration
    /// order; complexity-scoped rules are a straightforward extension point).
    pub fn resolve_model(&self, policy: &ModelRoutingPolicy) -> String {
        self.rules
            .iter()
            .map(|r| r.model_id.clone())
            .find(|m| policy.is_allowed(m))
            .unwrap_or_else(|| policy.default_model.clone())
    }

    fn provider_for(&self, model_id: &str) -> Option<&dyn LlmProvider> {
        self.providers
            .iter()
            .find(|p| p.models().iter().any(|m| m == model_id))
            .map(|p| p.as_ref())
    }

    fn breaker_allows(&self, provider_name: &str) -> bool {
        let entry = self.breakers.entry(provider_name.to_string()).or_default();
        let mut breaker = entry.lock().unwrap();
        match breaker.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = breaker.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= OPEN_DURATION {
                    breaker.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_outcome(&self, provider_name: &str, success: bool) {
        let metrics = self.metrics.entry(provider_name.to_string()).or_default();
        metrics.calls.fetch_add(1, Ordering::Relaxed);

        let entry = self.breakers.entry(provider_name.to_string()).or_default();
        let mut breaker = entry.lock().unwrap();
        if success {
            metrics.successes.fetch_add(1, Ordering::Relaxed);
            breaker.state = BreakerState::Closed;
            breaker.consecutive_failures = 0;
            breaker.opened_at = None;
        } else {
            metrics.failures.fetch_add(1, Ordering::Relaxed);
            breaker.consecutive_failures += 1;
            if breaker.consecutive_failures >= TRIP_THRESHOLD {
                breaker.state = BreakerState::Open;
                breaker.opened_at = Some(Instant::now());
                warn!(provider = provider_name, "circuit breaker tripped open");
            }
        }
    }

    /// Single-provider call against `model_id`, policy-checked first.
    pub async fn complete(
        &self,
        model_id: &str,
        request: &ChatRequest,
        policy: &ModelRoutingPolicy,
    ) -> Result<ChatResponse, RouterError> {
        if !policy.is_allowed(model_id) {
            return Err(RouterError::PolicyDenied(model_id.to_string()));
        }
        let provider = self
            .provider_for(model_id)
            .ok_or_else(|| RouterError::UnknownModel(model_id.to_string()))?;

        if !self.breaker_allows(provider.name()) {
            return Err(RouterError::CircuitOpen(provider.name().to_string()));
        }

        let result = provider.chat(model_id, request).await;
        self.record_outcome(provider.name(), result.is_ok());
        match result {
            Ok(response) => {
                info!(model_id, provider = provider.name(), "generation call succeeded");
                Ok(response)
            }
            Err(e) => Err(RouterError::Provider(e)),
        }
    }

    /// Tries `primary_model_id`, then `fallback_model_id` on a retryable
    /// failure. The fallback is policy-gated identically to the primary —
    /// a denied or circuit-broken fallback fails the whole call rather than
    /// silently bypassing policy.
    pub async fn complete_with_fallback(
        &self,
        primary_model_id: &str,
        fallback_model_id: &str,
        request: &ChatRequest,
        policy: &ModelRoutingPolicy,
    ) -> Result<ChatResponse, RouterError> {
        match self.complete(primary_model_id, request, policy).await {
            Ok(response) => Ok(response),
            Err(primary_err) if primary_err.is_retryable() => {
                warn!(
                    primary_model_id,
                    fallback_model_id,
                    error = %primary_err,
                    "falling back to secondary model"
                );
                self.complete(fallback_model_id, request, policy)
                    .await
                    .map_err(|fallback_err| match fallback_err {
                        RouterError::Provider(e) => RouterError::AllProvidersFailed(e),
                        other => other,
                    })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    fn router_with_mock() -> (Router, std::sync::Arc<MockProvider>) {
        let mock = std::sync::Arc::new(MockProvider::new("mock", vec!["claude-haiku".to_string()]));
        let providers: Vec<Box<dyn LlmProvider>> = vec![Box::new(MockProviderHandle(mock.clone()))];
        let rules = vec![RoutingRule {
            name: "default".to_string(),
            priority: 0,
            model_id: "claude-haiku".to_string(),
        }];
        (Router::new(providers, rules, ModelCatalog::default()), mock)
    }

    struct MockProviderHandle(std::sync::Arc<MockProvider>);

    #[async_trait::async_trait]
    impl LlmProvider for MockProviderHandle {
        fn name(&self) -> &str {
            self.0.name()
        }
        fn models(&self) -> &[String] {
            self.0.models()
        }
        async fn chat(
            &self,
            model_id: &str,
            request: &ChatRequest,
        ) -> Result<ChatResponse, crate::error::ProviderError> {
            self.0.chat(model_id, request).await
        }
    }

    #[tokio::test]
    async fn policy_denies_routing_to_a_denied_model() {
        let (router, _mock) = router_with_mock();
        let mut policy = ModelRoutingPolicy::permissive("claude-haiku");
        policy.denied_models.push("claude-haiku".to_string());
        let request = ChatRequest {
            system_prompt: "x".to_string(),
            user_prompt: "y".to_string(),
            max_tokens: 100,
        };
        let err = router.complete("claude-haiku", &request, &policy).await.unwrap_err();
        assert!(matches!(err, RouterError::PolicyDenied(_)));
    }

    #[tokio::test]
    async fn unknown_model_errors() {
        let (router, _mock) = router_with_mock();
        let policy = ModelRoutingPolicy::permissive("claude-haiku");
        let request = ChatRequest {
            system_prompt: "x".to_string(),
            user_prompt: "y".to_string(),
            max_tokens: 100,
        };
        let err = router
            .complete("nonexistent-model", &request, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownModel(_)));
    }

    #[tokio::test]
    async fn successful_call_is_recorded_against_the_provider() {
        let (router, mock) = router_with_mock();
        mock.push_response("def f(): pass");
        let policy = ModelRoutingPolicy::permissive("claude-haiku");
        let request = ChatRequest {
            system_prompt: "x".to_string(),
            user_prompt: "y".to_string(),
            max_tokens: 100,
        };
        let response = router.complete("claude-haiku", &request, &policy).await.unwrap();
        assert_eq!(response.text, "def f(): pass");
        assert_eq!(mock.call_count(), 1);
    }
}
