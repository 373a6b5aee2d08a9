//! Builds the full IVCU control plane stack from a validated [`Config`].
//!
//! One function, `build`, wires every `ivcu-*` crate's collaborators
//! together and hands back an assembled [`Stack`]. Nothing here does
//! business logic — it only decides, once, which concrete implementation
//! backs each trait object (Postgres vs in-memory store, real providers vs
//! a scripted fallback) and constructs the [`GenerationOrchestrator`] via
//! its [`OrchestratorBuilder`].

use std::sync::{Arc, RwLock};
use std::time::Duration;

use ivcu_bandit::ThompsonBandit;
use ivcu_cache::{ModelRoutingPolicy, PolicyGate, SemanticCache};
use ivcu_certificate::CertificateAuthority;
use ivcu_orchestrator::{GenerationOrchestrator, OrchestratorBuilder};
use ivcu_projection::bus::{EventBus, InMemoryEventBus};
use ivcu_projection::consumer::ProjectionConsumer;
use ivcu_projection::handler::{IntentCreatedHandler, SdoUpdatedHandler, VerificationCompletedHandler};
use ivcu_projection::kv::{InMemoryKvStore, KvStore};
use ivcu_router::cost_oracle::SessionBudget;
use ivcu_router::provider::LlmProvider;
use ivcu_router::{AnthropicProvider, CostOracle, ModelCatalog, MockProvider, OpenAiProvider, Router, RoutingRule};
use ivcu_store::memory::InMemoryEventStore;
use ivcu_store::EventStore;
use ivcu_verifier::{FakeSandbox, ProcessSandbox, VerifierOrchestra};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("failed to connect to Postgres at the configured DATABASE_URL: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to run event store migrations: {0}")]
    Migration(#[source] ivcu_store::StoreError),
}

/// Every assembled collaborator the binary needs, handed back as a flat
/// struct so `main` doesn't have to know the construction order.
pub struct Stack {
    pub store: Arc<dyn EventStore>,
    pub bandit: Arc<RwLock<ThompsonBandit>>,
    pub router: Arc<Router>,
    pub cost_oracle: Arc<CostOracle>,
    pub verifier: Arc<VerifierOrchestra>,
    pub certificates: Arc<CertificateAuthority>,
    pub cache: Arc<SemanticCache>,
    pub policy_gate: Arc<PolicyGate>,
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub projection_bus: Arc<dyn EventBus>,
    pub projection_kv: Arc<dyn KvStore>,
    pub default_routing_policy: ModelRoutingPolicy,
}

/// Reads `DATABASE_URL` from `config` and connects + migrates a
/// Postgres-backed event store, or falls back to an in-memory one when
/// unset — the latter is a legitimate standalone mode (tests, a laptop
/// demo), not a degraded one, so it only logs at `info`.
async fn build_store(config: &Config) -> Result<Arc<dyn EventStore>, CompositionError> {
    let Some(database_url) = config.database_url.as_deref() else {
        info!("DATABASE_URL not set, using in-memory event store");
        return Ok(Arc::new(InMemoryEventStore::new()));
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    let store = ivcu_store::postgres::PostgresEventStore::new(pool);
    store
        .run_migrations()
        .await
        .map_err(CompositionError::Migration)?;
    info!("connected to Postgres event store and applied migrations");
    Ok(Arc::new(store))
}

/// Registers whichever providers have credentials configured. Always adds
/// an in-process `MockProvider` last so the router has a deterministic
/// fallback — both for a key-less dev/demo run and as the last resort the
/// router's fallback rule (§4.3) targets when every real provider's
/// circuit breaker is open.
fn build_providers(config: &Config) -> Vec<Box<dyn LlmProvider>> {
    let mut providers: Vec<Box<dyn LlmProvider>> = Vec::new();

    if config.anthropic_api_key.is_some() {
        match AnthropicProvider::from_env(vec![
            "claude-haiku".to_string(),
            "claude-sonnet".to_string(),
            "claude-opus".to_string(),
        ]) {
            Ok(provider) => providers.push(Box::new(provider)),
            Err(e) => warn!(error = %e, "ANTHROPIC_API_KEY set but provider construction failed"),
        }
    }
    if config.openai_api_key.is_some() {
        match OpenAiProvider::from_env(vec![
            "gpt-4o-mini".to_string(),
            "gpt-4o".to_string(),
            "gpt-4-turbo".to_string(),
        ]) {
            Ok(provider) => providers.push(Box::new(provider)),
            Err(e) => warn!(error = %e, "OPENAI_API_KEY set but provider construction failed"),
        }
    }

    let fallback = MockProvider::new(
        "mock-fallback",
        vec![
            "claude-haiku".to_string(),
            "claude-sonnet".to_string(),
            "claude-opus".to_string(),
            "gpt-4o-mini".to_string(),
            "gpt-4o".to_string(),
            "gpt-4-turbo".to_string(),
        ],
    );
    if providers.is_empty() {
        warn!("no provider credentials configured, routing every model to the in-process mock provider");
    }
    providers.push(Box::new(fallback));
    providers
}

/// One routing rule per catalog entry, highest-accuracy tier first, so
/// `Router::resolve_model` prefers the best model the active policy still
/// allows before falling back to the policy's `default_model`.
fn build_routing_rules(catalog: &ModelCatalog) -> Vec<RoutingRule> {
    catalog
        .all()
        .iter()
        .map(|spec| RoutingRule {
            name: spec.model_id.clone(),
            priority: (spec.humaneval_score * 100.0) as i32,
            model_id: spec.model_id.clone(),
        })
        .collect()
}

/// Assembles every collaborator from `config` into a ready-to-use [`Stack`].
pub async fn build(config: &Config) -> Result<Stack, CompositionError> {
    let store = build_store(config).await?;
    let bandit = Arc::new(RwLock::new(ThompsonBandit::default()));

    let catalog = ModelCatalog::default();
    let providers = build_providers(config);
    let routing_rules = build_routing_rules(&catalog);
    let router = Arc::new(Router::new(providers, routing_rules, catalog));

    let cost_catalog = ModelCatalog::default();
    let cost_oracle = Arc::new(CostOracle::new(
        cost_catalog,
        config.daily_budget_usd,
        SessionBudget {
            max_per_session: config.session_budget_usd,
            ..SessionBudget::default()
        },
    ));

    let policy_gate = Arc::new(PolicyGate::default());
    let sandbox: Arc<dyn ivcu_verifier::Sandbox> = if config.database_url.is_some() {
        Arc::new(ProcessSandbox::default())
    } else {
        // No external infra configured: keep the dynamic tiers runnable
        // without assuming a Python/Node toolchain is on PATH.
        Arc::new(FakeSandbox::new())
    };
    let verifier = Arc::new(VerifierOrchestra::new(sandbox, Arc::clone(&policy_gate)));

    let certificates = Arc::new(CertificateAuthority::generate(config.proof_issuer.clone()));
    let cache = Arc::new(SemanticCache::new(
        config.cache_capacity,
        Duration::from_secs(config.cache_ttl_seconds),
    ));

    let orchestrator = Arc::new(
        OrchestratorBuilder::new(
            Arc::clone(&store),
            Arc::clone(&bandit),
            Arc::clone(&router),
            Arc::clone(&cost_oracle),
            Arc::clone(&verifier),
            Arc::clone(&certificates),
            Arc::clone(&cache),
            Arc::clone(&policy_gate),
        )
        .build(),
    );

    let projection_bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::default());
    let projection_kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());

    let default_routing_policy = ModelRoutingPolicy::permissive("claude-haiku");

    Ok(Stack {
        store,
        bandit,
        router,
        cost_oracle,
        verifier,
        certificates,
        cache,
        policy_gate,
        orchestrator,
        projection_bus,
        projection_kv,
        default_routing_policy,
    })
}

/// Builds the durable projection consumer with the three handlers named in
/// §4.8 registered against their event types. Separate from [`build`]
/// because the consumer borrows the bus/kv the caller may also want to
/// hand to other collaborators (e.g. a future HTTP layer polling sync
/// tokens), and because spawning its `run` loop is the caller's call, not
/// this module's.
pub fn build_projection_consumer(config: &Config, stack: &Stack) -> ProjectionConsumer {
    ProjectionConsumer::new(
        config.projection_consumer_name.clone(),
        Arc::clone(&stack.projection_bus),
        Arc::clone(&stack.projection_kv),
    )
    .register_handler("intent_created", Box::new(IntentCreatedHandler::new()))
    .register_handler(
        "verification_completed",
        Box::new(VerificationCompletedHandler::new()),
    )
    .register_handler("ivcu_deployed", Box::new(SdoUpdatedHandler::new()))
}
