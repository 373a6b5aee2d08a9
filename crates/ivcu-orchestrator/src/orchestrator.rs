//! The per-IVCU generation pipeline: `run_full` and `run_adaptive` fold
//! every collaborator (store, bandit, router, cost oracle, verifier,
//! certificate authority, cache, policy gate, memory) into the state
//! machine the rest of the control plane only ever sees through
//! `IvcuState`.
//!
//! Neither pipeline holds any state of its own between calls — all of it
//! lives in the event stream, so a crashed orchestrator can always resume
//! from `EventStore::state`.

use std::sync::{Arc, RwLock};

use chrono::Utc;
use ivcu_bandit::{reward_from_verification, ThompsonBandit};
use ivcu_cache::{ModelRoutingPolicy, PolicyContext, PolicyGate, SemanticCache};
use ivcu_certificate::CertificateAuthority;
use ivcu_router::cost_oracle::{Complexity, CostOracle};
use ivcu_router::provider::ChatRequest;
use ivcu_router::Router;
use ivcu_store::EventStore;
use ivcu_types::{Contract, EventPayload, IvcuState, TierResult, VerificationSummary};
use ivcu_verifier::{select_best, CandidateVerificationResult, VerificationRequest, VerifierOrchestra};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::memory::MemoryRetriever;

/// Tier 1 survivors below this confidence are dropped outright, regardless
/// of how they rank against their siblings.
const TIER1_MIN_CONFIDENCE: f64 = 0.3;
/// How many Tier 1 survivors go on to the expensive sandboxed tiers.
const TIER1_SURVIVOR_COUNT: usize = 2;
/// `run_adaptive` stops generating as soon as a candidate clears this
/// verification confidence.
const ADAPTIVE_CONFIDENCE_TARGET: f64 = 0.9;
/// Per-round temperature increase in `run_adaptive`, nudging subsequent
/// samples away from a strategy that hasn't paid off yet.
const ADAPTIVE_TEMPERATURE_DRIFT: f64 = 0.1;
const GENERATION_MAX_TOKENS: u32 = 2048;
const GENERATION_SYSTEM_PROMPT: &str = "You write a single, complete, directly runnable function body that satisfies the user's intent. Return only code, no commentary.";

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub ivcu_id: Uuid,
    pub intent: String,
    pub language: String,
    pub contracts: Vec<Contract>,
    pub complexity: Complexity,
    pub session_id: String,
    pub routing_policy: ModelRoutingPolicy,
    pub actor_id: Option<String>,
}

/// What the Semantic Cache stores against `(intent, model_id)` — enough to
/// skip straight to a verified result without regenerating or re-verifying.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSolution {
    code: String,
}

struct GeneratedCandidate {
    candidate_id: Uuid,
    code: String,
    #[allow(dead_code)]
    confidence: f64,
}

pub struct GenerationOrchestrator {
    pub(crate) store: Arc<dyn EventStore>,
    pub(crate) bandit: Arc<RwLock<ThompsonBandit>>,
    pub(crate) router: Arc<Router>,
    pub(crate) cost_oracle: Arc<CostOracle>,
    pub(crate) verifier: Arc<VerifierOrchestra>,
    pub(crate) certificates: Arc<CertificateAuthority>,
    pub(crate) cache: Arc<SemanticCache>,
    pub(crate) policy_gate: Arc<PolicyGate>,
    pub(crate) memory: Arc<dyn MemoryRetriever>,
    pub(crate) cache_enabled: bool,
}

/// Constructor-injection composition root for [`GenerationOrchestrator`].
///
/// Design Note §9 ("Global singletons → explicit dependencies"): every
/// collaborator the orchestrator needs arrives as a trait object or `Arc`,
/// never as a module-level static, so tests can substitute fakes for any
/// of them and the binary's `main` is the only place a production instance
/// is ever wired together.
pub struct OrchestratorBuilder {
    store: Arc<dyn EventStore>,
    bandit: Arc<RwLock<ThompsonBandit>>,
    router: Arc<Router>,
    cost_oracle: Arc<CostOracle>,
    verifier: Arc<VerifierOrchestra>,
    certificates: Arc<CertificateAuthority>,
    cache: Arc<SemanticCache>,
    policy_gate: Arc<PolicyGate>,
    memory: Arc<dyn MemoryRetriever>,
    cache_enabled: bool,
}

impl OrchestratorBuilder {
    pub fn new(
        store: Arc<dyn EventStore>,
        bandit: Arc<RwLock<ThompsonBandit>>,
        router: Arc<Router>,
        cost_oracle: Arc<CostOracle>,
        verifier: Arc<VerifierOrchestra>,
        certificates: Arc<CertificateAuthority>,
        cache: Arc<SemanticCache>,
        policy_gate: Arc<PolicyGate>,
    ) -> Self {
        Self {
            store,
            bandit,
            router,
            cost_oracle,
            verifier,
            certificates,
            cache,
            policy_gate,
            memory: Arc::new(crate::memory::NullMemoryRetriever),
            cache_enabled: true,
        }
    }

    /// Swaps in a real `MemoryRetriever` (vector/graph store collaborator).
    /// Defaults to [`crate::memory::NullMemoryRetriever`] when not called.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryRetriever>) -> Self {
        self.memory = memory;
        self
    }

    /// Disables the semantic cache entirely (every `run_full`/`run_adaptive`
    /// call regenerates from scratch). Defaults to enabled.
    pub fn with_cache_enabled(mut self, cache_enabled: bool) -> Self {
        self.cache_enabled = cache_enabled;
        self
    }

    pub fn build(self) -> GenerationOrchestrator {
        GenerationOrchestrator {
            store: self.store,
            bandit: self.bandit,
            router: self.router,
            cost_oracle: self.cost_oracle,
            verifier: self.verifier,
            certificates: self.certificates,
            cache: self.cache,
            policy_gate: self.policy_gate,
            memory: self.memory,
            cache_enabled: self.cache_enabled,
        }
    }
}

impl GenerationOrchestrator {
    /// **`run_full`**: the full pipeline — cache check, policy gate, cost
    /// estimate, bandit arm selection, `k`-wide parallel generation, Tier 1
    /// pruning, full verification of survivors, selection, certification,
    /// cache population, and a single bandit update.
    pub async fn run_full(&self, request: GenerationRequest) -> Result<IvcuState, OrchestratorError> {
        let (_, mut version) = self.load_or_create(&request).await?;

        let model_id = self.router.resolve_model(&request.routing_policy);

        if self.cache_enabled {
            if let Some(state) = self.try_cache_hit(&request, &model_id, &mut version).await? {
                return Ok(state);
            }
        }

        self.enforce_policy_gate(&request, &mut version).await?;

        let memory_context = self.memory.retrieve(&request.intent).await;
        let prompt_chars = request.intent.len() + memory_context.len();
        let estimate = self
            .cost_oracle
            .estimate(&model_id, prompt_chars, request.complexity, Utc::now())?;
        self.cost_oracle.check_budget(&request.session_id, estimate.effective_cost)?;

        let arm = {
            let bandit = self.bandit.read().expect("bandit lock poisoned");
            bandit.select()?.clone()
        };
        info!(
            ivcu_id = %request.ivcu_id,
            arm_id = %arm.id,
            temperature = arm.temperature,
            candidate_count = arm.candidate_count,
            "selected generation strategy"
        );

        let temperatures = spread_temperatures(arm.temperature, arm.candidate_count);
        let generated = self
            .generate_many(&request, &model_id, &memory_context, &temperatures, &mut version)
            .await?;

        if generated.is_empty() {
            return Err(OrchestratorError::NoViableCandidate(request.ivcu_id));
        }

        let survivors = prune_by_tier1(generated);
        if survivors.is_empty() {
            self.update_bandit(&arm.id, 0.0);
            return Err(OrchestratorError::NoViableCandidate(request.ivcu_id));
        }

        let results = self.verify_all(&request, &survivors).await;
        for result in &results {
            version = self.append_verification_completed(&request, version, result).await?;
        }

        let best =
            select_best(results).ok_or(OrchestratorError::NoViableCandidate(request.ivcu_id))?;
        let winning_code = survivors
            .iter()
            .find(|c| c.candidate_id == best.candidate_id)
            .map(|c| c.code.clone());

        let reward = best.summary.overall_confidence * if best.summary.overall_passed { 1.0 } else { 0.0 };
        self.update_bandit(&arm.id, reward);

        version = self
            .append_candidate_selected(&request, version, &best, winning_code.clone())
            .await?;
        self.cost_oracle
            .record_usage(&request.session_id, estimate.effective_cost, Utc::now());
        version = self
            .append_cost_incurred(&request, version, estimate.effective_cost, &model_id)
            .await?;

        let state = self
            .finalize_verified(&request, version, &best, winning_code, &model_id)
            .await?;
        Ok(state)
    }

    /// **`run_adaptive`**: generates one candidate at a time, drifting the
    /// temperature by [`ADAPTIVE_TEMPERATURE_DRIFT`] each round, stopping
    /// as soon as a candidate clears [`ADAPTIVE_CONFIDENCE_TARGET`] or the
    /// arm's `candidate_count` rounds are exhausted. Unlike `run_full`, the
    /// bandit is updated exactly once, after the loop ends.
    pub async fn run_adaptive(&self, request: GenerationRequest) -> Result<IvcuState, OrchestratorError> {
        let (_, mut version) = self.load_or_create(&request).await?;

        let model_id = self.router.resolve_model(&request.routing_policy);

        if self.cache_enabled {
            if let Some(state) = self.try_cache_hit(&request, &model_id, &mut version).await? {
                return Ok(state);
            }
        }

        self.enforce_policy_gate(&request, &mut version).await?;

        let memory_context = self.memory.retrieve(&request.intent).await;
        let prompt_chars = request.intent.len() + memory_context.len();
        let estimate = self
            .cost_oracle
            .estimate(&model_id, prompt_chars, request.complexity, Utc::now())?;
        self.cost_oracle.check_budget(&request.session_id, estimate.effective_cost)?;

        let arm = {
            let bandit = self.bandit.read().expect("bandit lock poisoned");
            bandit.select()?.clone()
        };
        info!(
            ivcu_id = %request.ivcu_id,
            arm_id = %arm.id,
            temperature = arm.temperature,
            candidate_count = arm.candidate_count,
            "selected generation strategy (adaptive)"
        );

        let mut best: Option<(GeneratedCandidate, CandidateVerificationResult)> = None;
        for round in 0..arm.candidate_count {
            let temperature = arm.temperature + ADAPTIVE_TEMPERATURE_DRIFT * round as f64;
            let candidates = self
                .generate_many(&request, &model_id, &memory_context, &[temperature], &mut version)
                .await?;
            let Some(candidate) = candidates.into_iter().next() else {
                warn!(ivcu_id = %request.ivcu_id, round, "adaptive round produced no candidate");
                continue;
            };

            let verify_request = VerificationRequest {
                candidate_id: candidate.candidate_id,
                code: candidate.code.clone(),
                language: request.language.clone(),
                contracts: request.contracts.clone(),
                test_cases: Vec::new(),
                run_tier3: !request.contracts.is_empty(),
            };
            let result = self.verifier.verify(&verify_request).await;
            version = self.append_verification_completed(&request, version, &result).await?;

            let cleared_target = result.summary.overall_confidence >= ADAPTIVE_CONFIDENCE_TARGET
                && result.summary.overall_passed;
            let is_better = best
                .as_ref()
                .map(|(_, b)| result.summary.overall_confidence > b.summary.overall_confidence)
                .unwrap_or(true);
            if is_better {
                best = Some((candidate, result));
            }
            if cleared_target {
                break;
            }
        }

        let (winning_candidate, best_result) =
            best.ok_or(OrchestratorError::NoViableCandidate(request.ivcu_id))?;

        let reward = reward_from_verification(
            best_result.summary.overall_confidence,
            best_result.summary.overall_passed,
            ADAPTIVE_CONFIDENCE_TARGET,
        );
        self.update_bandit(&arm.id, reward);

        version = self
            .append_candidate_selected(&request, version, &best_result, Some(winning_candidate.code.clone()))
            .await?;
        self.cost_oracle
            .record_usage(&request.session_id, estimate.effective_cost, Utc::now());
        version = self
            .append_cost_incurred(&request, version, estimate.effective_cost, &model_id)
            .await?;

        let state = self
            .finalize_verified(
                &request,
                version,
                &best_result,
                Some(winning_candidate.code),
                &model_id,
            )
            .await?;
        Ok(state)
    }

    async fn load_or_create(&self, request: &GenerationRequest) -> Result<(IvcuState, u64), OrchestratorError> {
        match self.store.state(request.ivcu_id).await {
            Ok(state) => {
                let version = state.version;
                Ok((state, version))
            }
            Err(ivcu_store::StoreError::NotFound(_)) => {
                self.store
                    .append(
                        request.ivcu_id,
                        0,
                        EventPayload::IntentCreated {
                            raw_intent: request.intent.clone(),
                            parsed_intent: None,
                            language: request.language.clone(),
                        },
                        request.actor_id.clone(),
                    )
                    .await?;
                let state = self.store.state(request.ivcu_id).await?;
                let version = state.version;
                Ok((state, version))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn cache_key(intent: &str, model_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(intent.as_bytes());
        hasher.update(b"\0");
        hasher.update(model_id.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns `Some(state)` if a cached solution exists and was
    /// successfully replayed as the IVCU's selected, verified candidate.
    async fn try_cache_hit(
        &self,
        request: &GenerationRequest,
        model_id: &str,
        version: &mut u64,
    ) -> Result<Option<IvcuState>, OrchestratorError> {
        let key = Self::cache_key(&request.intent, model_id);
        let Some(raw) = self.cache.get_exact(&key) else {
            return Ok(None);
        };
        let Ok(cached) = serde_json::from_value::<CachedSolution>(raw) else {
            return Ok(None);
        };

        info!(ivcu_id = %request.ivcu_id, "semantic cache hit, skipping generation");

        let candidate_id = Uuid::new_v4();
        let quick = self.verifier.quick_verify(&cached.code);
        let event = self
            .store
            .append(
                request.ivcu_id,
                *version,
                EventPayload::CandidateGenerated {
                    candidate_id,
                    code: cached.code.clone(),
                    confidence: quick.confidence.clamp(0.0, 1.0),
                    model_id: model_id.to_string(),
                    reasoning: Some("served from semantic cache".to_string()),
                },
                request.actor_id.clone(),
            )
            .await?;
        *version = event.sequence_number;

        let summary = VerificationSummary {
            overall_passed: true,
            overall_confidence: 1.0,
            tier_results: Vec::new(),
        };
        let event = self
            .store
            .append(
                request.ivcu_id,
                *version,
                EventPayload::CandidateSelected {
                    candidate_id: Some(candidate_id),
                    code: Some(cached.code),
                    confidence: 1.0,
                    verification_summary: summary,
                },
                request.actor_id.clone(),
            )
            .await?;
        *version = event.sequence_number;

        Ok(Some(self.store.state(request.ivcu_id).await?))
    }

    /// Checks the pre-generation policy rules. On a violation, persists
    /// the failure as a `CandidateSelected` with no winning candidate (the
    /// same terminal shape a failed verification round produces) and
    /// returns the resulting state so the caller doesn't have to reload it.
    async fn enforce_policy_gate(
        &self,
        request: &GenerationRequest,
        version: &mut u64,
    ) -> Result<(), OrchestratorError> {
        let context = PolicyContext {
            actor_id: request.actor_id.clone(),
            ivcu_id: Some(request.ivcu_id),
        };
        let outcome = self.policy_gate.check_pre(&request.intent, &context);
        if outcome.allowed {
            return Ok(());
        }

        warn!(ivcu_id = %request.ivcu_id, violations = ?outcome.violations, "intent rejected by policy gate");
        let event = self
            .store
            .append(
                request.ivcu_id,
                *version,
                EventPayload::CandidateSelected {
                    candidate_id: None,
                    code: None,
                    confidence: 0.0,
                    verification_summary: VerificationSummary::default(),
                },
                request.actor_id.clone(),
            )
            .await?;
        *version = event.sequence_number;
        // Persisted as a failure, but still surfaced as an error so callers
        // don't mistake a policy rejection for a successful generation.
        Err(OrchestratorError::PolicyViolation(outcome.violations))
    }

    async fn generate_many(
        &self,
        request: &GenerationRequest,
        model_id: &str,
        memory_context: &str,
        temperatures: &[f64],
        version: &mut u64,
    ) -> Result<Vec<GeneratedCandidate>, OrchestratorError> {
        let user_prompt = build_user_prompt(&request.intent, &request.contracts, memory_context);

        let mut tasks = Vec::with_capacity(temperatures.len());
        for &temperature in temperatures {
            let router = Arc::clone(&self.router);
            let policy = request.routing_policy.clone();
            let model_id = model_id.to_string();
            let chat_request = ChatRequest {
                system_prompt: format!("{GENERATION_SYSTEM_PROMPT}\n\n(sampling temperature: {temperature:.2})"),
                user_prompt: user_prompt.clone(),
                max_tokens: GENERATION_MAX_TOKENS,
            };
            tasks.push(tokio::spawn(async move {
                router.complete(&model_id, &chat_request, &policy).await
            }));
        }

        let mut candidates = Vec::new();
        for task in tasks {
            let response = match task.await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    warn!(error = %e, "generation call failed");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "generation task panicked");
                    continue;
                }
            };

            let candidate_id = Uuid::new_v4();
            let quick = self.verifier.quick_verify(&response.text);
            let confidence = quick.confidence.clamp(0.0, 1.0);
            let event = self
                .store
                .append(
                    request.ivcu_id,
                    *version,
                    EventPayload::CandidateGenerated {
                        candidate_id,
                        code: response.text.clone(),
                        confidence,
                        model_id: model_id.to_string(),
                        reasoning: None,
                    },
                    request.actor_id.clone(),
                )
                .await?;
            *version = event.sequence_number;

            candidates.push(GeneratedCandidate {
                candidate_id,
                code: response.text,
                confidence,
            });
        }
        Ok(candidates)
    }

    async fn verify_all(
        &self,
        request: &GenerationRequest,
        survivors: &[GeneratedCandidate],
    ) -> Vec<CandidateVerificationResult> {
        let requests = survivors
            .iter()
            .map(|c| VerificationRequest {
                candidate_id: c.candidate_id,
                code: c.code.clone(),
                language: request.language.clone(),
                contracts: request.contracts.clone(),
                test_cases: Vec::new(),
                run_tier3: !request.contracts.is_empty(),
            })
            .collect();
        self.verifier.verify_parallel(requests).await
    }

    async fn append_verification_completed(
        &self,
        request: &GenerationRequest,
        version: u64,
        result: &CandidateVerificationResult,
    ) -> Result<u64, OrchestratorError> {
        let event = self
            .store
            .append(
                request.ivcu_id,
                version,
                EventPayload::VerificationCompleted {
                    candidate_id: result.candidate_id,
                    passed: result.summary.overall_passed,
                    score: result.summary.overall_confidence,
                    tier_results: result.summary.tier_results.clone(),
                },
                request.actor_id.clone(),
            )
            .await?;
        Ok(event.sequence_number)
    }

    async fn append_candidate_selected(
        &self,
        request: &GenerationRequest,
        version: u64,
        best: &CandidateVerificationResult,
        code: Option<String>,
    ) -> Result<u64, OrchestratorError> {
        let event = self
            .store
            .append(
                request.ivcu_id,
                version,
                EventPayload::CandidateSelected {
                    candidate_id: Some(best.candidate_id),
                    code: if best.summary.overall_passed { code } else { None },
                    confidence: best.summary.overall_confidence,
                    verification_summary: best.summary.clone(),
                },
                request.actor_id.clone(),
            )
            .await?;
        Ok(event.sequence_number)
    }

    async fn append_cost_incurred(
        &self,
        request: &GenerationRequest,
        version: u64,
        amount_usd: Decimal,
        model_id: &str,
    ) -> Result<u64, OrchestratorError> {
        let event = self
            .store
            .append(
                request.ivcu_id,
                version,
                EventPayload::CostIncurred {
                    amount_usd,
                    model_id: model_id.to_string(),
                    operation: "generate".to_string(),
                },
                request.actor_id.clone(),
            )
            .await?;
        Ok(event.sequence_number)
    }

    fn update_bandit(&self, arm_id: &str, reward: f64) {
        let mut bandit = self.bandit.write().expect("bandit lock poisoned");
        if let Err(e) = bandit.update(arm_id, reward) {
            warn!(arm_id, error = %e, "failed to update bandit posterior");
        }
    }

    /// Issues a proof certificate for a passed selection, appends
    /// `ProofGenerated`, and — when caching is enabled — stores the result
    /// so a future identical `(intent, model_id)` skips generation
    /// entirely.
    async fn finalize_verified(
        &self,
        request: &GenerationRequest,
        version: u64,
        best: &CandidateVerificationResult,
        code: Option<String>,
        model_id: &str,
    ) -> Result<IvcuState, OrchestratorError> {
        if !best.summary.overall_passed {
            return Ok(self.store.state(request.ivcu_id).await?);
        }
        let Some(code) = code else {
            return Ok(self.store.state(request.ivcu_id).await?);
        };

        let tier_results: Vec<TierResult> = best.summary.tier_results.clone();
        let cert = self
            .certificates
            .issue(request.ivcu_id, best.candidate_id, &code, tier_results, Utc::now())?;

        self.store
            .append(
                request.ivcu_id,
                version,
                EventPayload::ProofGenerated {
                    certificate_id: cert.cert_id,
                    code_hash: cert.code_hash.clone(),
                    signature: cert.signature.clone(),
                    expires_at: cert.expires_at,
                },
                request.actor_id.clone(),
            )
            .await?;

        if self.cache_enabled {
            let key = Self::cache_key(&request.intent, model_id);
            let value = serde_json::to_value(CachedSolution { code }).expect("CachedSolution always serializes");
            self.cache.put(key, Vec::new(), value);
        }

        Ok(self.store.state(request.ivcu_id).await?)
    }
}

/// Evenly spreads `count` temperatures around `center`, spanning roughly
/// [-0.2, +0.1] so the spawned candidates sample meaningfully different
/// decoding behavior rather than near-duplicates.
fn spread_temperatures(center: f64, count: u32) -> Vec<f64> {
    if count <= 1 {
        return vec![center.clamp(0.0, 1.0)];
    }
    let low = (center - 0.2).max(0.0);
    let high = (center + 0.1).min(1.0);
    let step = (high - low) / (count - 1) as f64;
    (0..count).map(|i| low + step * i as f64).collect()
}

/// Prunes to the top [`TIER1_SURVIVOR_COUNT`] candidates by Tier 1 static
/// analysis, ranked by `(passed, confidence)` and floored at
/// [`TIER1_MIN_CONFIDENCE`].
fn prune_by_tier1(candidates: Vec<GeneratedCandidate>) -> Vec<GeneratedCandidate> {
    let mut scored: Vec<(GeneratedCandidate, bool, f64)> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let tier1 = ivcu_verifier::tier1::check(&candidate.code);
            if tier1.confidence < TIER1_MIN_CONFIDENCE {
                None
            } else {
                Some((candidate, tier1.passed, tier1.confidence))
            }
        })
        .collect();
    scored.sort_by(|a, b| (a.1, ordered(a.2)).cmp(&(b.1, ordered(b.2))));
    scored
        .into_iter()
        .rev()
        .take(TIER1_SURVIVOR_COUNT)
        .map(|(candidate, _, _)| candidate)
        .collect()
}

fn ordered(value: f64) -> i64 {
    (value.clamp(0.0, 1.0) * 1_000_000.0) as i64
}

fn build_user_prompt(intent: &str, contracts: &[Contract], memory_context: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str("Intent: ");
    prompt.push_str(intent);
    if !contracts.is_empty() {
        prompt.push_str("\n\nContracts:\n");
        for contract in contracts {
            prompt.push_str(&format!("- [{:?}] {}: {}\n", contract.kind, contract.description, contract.expression));
        }
    }
    if !memory_context.is_empty() {
        prompt.push_str("\n\nRelevant prior context:\n");
        prompt.push_str(memory_context);
    }
    prompt
}
