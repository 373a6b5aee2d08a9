//! Ties the four verification tiers together behind the execution policy:
//! a tier only runs if the previous one passed, and a critical Tier 1
//! failure (any verifier confidence below 0.2) skips everything after it.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use ivcu_cache::PolicyGate;
use ivcu_types::{Contract, TierResult, VerificationSummary};
use uuid::Uuid;

use crate::sandbox::Sandbox;
use crate::tier2::TestCase;
use crate::{tier0, tier1, tier2, tier3};

const CRITICAL_CONFIDENCE_FLOOR: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub candidate_id: Uuid,
    pub code: String,
    pub language: String,
    pub contracts: Vec<Contract>,
    pub test_cases: Vec<TestCase>,
    pub run_tier3: bool,
}

#[derive(Debug, Clone)]
pub struct CandidateVerificationResult {
    pub candidate_id: Uuid,
    pub summary: VerificationSummary,
    pub limitations: Vec<String>,
}

impl CandidateVerificationResult {
    fn warning_count(&self) -> usize {
        self.summary.tier_results.iter().map(|t| t.warnings.len()).sum()
    }

    fn failed(candidate_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            candidate_id,
            summary: VerificationSummary {
                overall_passed: false,
                overall_confidence: 0.0,
                tier_results: Vec::new(),
            },
            limitations: vec![reason.into()],
        }
    }
}

pub struct VerifierOrchestra {
    sandbox: Arc<dyn Sandbox>,
    policy_gate: Arc<PolicyGate>,
    tier2_timeout: Duration,
    tier3_timeout: Duration,
}

impl VerifierOrchestra {
    pub fn new(sandbox: Arc<dyn Sandbox>, policy_gate: Arc<PolicyGate>) -> Self {
        Self {
            sandbox,
            policy_gate,
            tier2_timeout: Duration::from_secs(30),
            tier3_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeouts(mut self, tier2_timeout: Duration, tier3_timeout: Duration) -> Self {
        self.tier2_timeout = tier2_timeout;
        self.tier3_timeout = tier3_timeout;
        self
    }

    /// Runs Tier 0 only. Target is sub-10ms on a 2KB snippet, so this skips
    /// the sandbox and policy machinery entirely.
    pub fn quick_verify(&self, code: &str) -> TierResult {
        tier0::check(code)
    }

    pub async fn verify(&self, request: &VerificationRequest) -> CandidateVerificationResult {
        let mut tier_results = Vec::new();
        let mut limitations = Vec::new();

        let t0 = tier0::check(&request.code);
        let t0_passed = t0.passed;
        tier_results.push(t0);
        if !t0_passed {
            limitations.push("Tier 1+ skipped because Tier 0 failed to parse".to_string());
            return CandidateVerificationResult {
                candidate_id: request.candidate_id,
                summary: VerificationSummary::from_tier_results(tier_results),
                limitations,
            };
        }

        let t1 = tier1::check(&request.code);
        let t1_critical = t1.confidence < CRITICAL_CONFIDENCE_FLOOR;
        let t1_passed = t1.passed;
        tier_results.push(t1);
        if t1_critical {
            limitations.push("Tier 2 skipped due to Tier 1 failures".to_string());
            return CandidateVerificationResult {
                candidate_id: request.candidate_id,
                summary: VerificationSummary::from_tier_results(tier_results),
                limitations,
            };
        }
        if !t1_passed {
            limitations.push("Tier 2 skipped because Tier 1 did not pass".to_string());
            return CandidateVerificationResult {
                candidate_id: request.candidate_id,
                summary: VerificationSummary::from_tier_results(tier_results),
                limitations,
            };
        }

        let t2 = tier2::check(
            self.sandbox.as_ref(),
            &request.code,
            &request.language,
            &request.test_cases,
            self.tier2_timeout,
        )
        .await;
        let t2_passed = t2.passed;
        tier_results.push(t2);
        if !t2_passed {
            limitations.push("Tier 3 skipped because Tier 2 did not pass".to_string());
            return CandidateVerificationResult {
                candidate_id: request.candidate_id,
                summary: VerificationSummary::from_tier_results(tier_results),
                limitations,
            };
        }

        if request.run_tier3 {
            let t3 = tier3::check(
                self.sandbox.as_ref(),
                &request.code,
                &request.language,
                &request.contracts,
                self.policy_gate.as_ref(),
                self.tier3_timeout,
            )
            .await;
            tier_results.push(t3);
        }

        CandidateVerificationResult {
            candidate_id: request.candidate_id,
            summary: VerificationSummary::from_tier_results(tier_results),
            limitations,
        }
    }

    /// Verifies every candidate concurrently via `tokio::spawn`. A panicking
    /// task becomes a failed, zero-confidence result rather than propagating.
    pub async fn verify_parallel(self: &Arc<Self>, requests: Vec<VerificationRequest>) -> Vec<CandidateVerificationResult> {
        let handles = requests.into_iter().map(|request| {
            let orchestra = Arc::clone(self);
            tokio::spawn(async move { orchestra.verify(&request).await })
        });

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(result) => result,
                Err(_) => CandidateVerificationResult::failed(Uuid::nil(), "verification task panicked"),
            })
            .collect()
    }
}

/// Prefers passed over failed, then higher confidence, then fewer warnings.
/// If nothing passed, returns the highest-confidence failure so the caller
/// can still surface a best-effort candidate.
pub fn select_best(results: Vec<CandidateVerificationResult>) -> Option<CandidateVerificationResult> {
    results.into_iter().max_by(|a, b| {
        let key = |r: &CandidateVerificationResult| {
            (
                r.summary.overall_passed,
                ordered_float(r.summary.overall_confidence),
                std::cmp::Reverse(r.warning_count()),
            )
        };
        key(a).cmp(&key(b))
    })
}

fn ordered_float(value: f64) -> i64 {
    (value.clamp(0.0, 1.0) * 1_000_000.0) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::FakeSandbox;

    fn request(candidate_id: Uuid, code: &str) -> VerificationRequest {
        VerificationRequest {
            candidate_id,
            code: code.to_string(),
            language: "python".to_string(),
            contracts: Vec::new(),
            test_cases: Vec::new(),
            run_tier3: false,
        }
    }

    #[tokio::test]
    async fn stub_body_skips_tier2_with_limitation_note() {
        let sandbox: Arc<dyn Sandbox> = Arc::new(FakeSandbox::new());
        let policy_gate = Arc::new(PolicyGate::default());
        let orchestra = VerifierOrchestra::new(sandbox, policy_gate);
        let result = orchestra.verify(&request(Uuid::new_v4(), "def f():\n    pass\n")).await;
        assert!(!result.summary.overall_passed);
        assert!(result.limitations.iter().any(|l| l.contains("Tier 2 skipped")));
    }

    #[tokio::test]
    async fn eval_in_code_fails_tier1_before_sandbox_runs() {
        let sandbox: Arc<dyn Sandbox> = Arc::new(FakeSandbox::new());
        let policy_gate = Arc::new(PolicyGate::default());
        let orchestra = VerifierOrchestra::new(sandbox, policy_gate);
        let result = orchestra
            .verify(&request(Uuid::new_v4(), "def f():\n    return eval(user_input)\n"))
            .await;
        assert_eq!(result.summary.tier_results.len(), 2);
    }

    #[tokio::test]
    async fn real_implementation_passes_through_tier2() {
        let sandbox = Arc::new(FakeSandbox::new());
        sandbox.push_success("");
        let sandbox: Arc<dyn Sandbox> = sandbox;
        let policy_gate = Arc::new(PolicyGate::default());
        let orchestra = VerifierOrchestra::new(sandbox, policy_gate);
        let result = orchestra
            .verify(&request(Uuid::new_v4(), "def add(a, b):\n    return a + b\n"))
            .await;
        assert!(result.summary.overall_passed);
        assert_eq!(result.summary.tier_results.len(), 3);
    }

    #[test]
    fn select_best_prefers_passing_over_failing() {
        let passing = CandidateVerificationResult {
            candidate_id: Uuid::new_v4(),
            summary: VerificationSummary {
                overall_passed: true,
                overall_confidence: 0.6,
                tier_results: Vec::new(),
            },
            limitations: Vec::new(),
        };
        let failing = CandidateVerificationResult {
            candidate_id: Uuid::new_v4(),
            summary: VerificationSummary {
                overall_passed: false,
                overall_confidence: 0.9,
                tier_results: Vec::new(),
            },
            limitations: Vec::new(),
        };
        let best = select_best(vec![failing, passing.clone()]).unwrap();
        assert_eq!(best.candidate_id, passing.candidate_id);
    }

    #[test]
    fn select_best_falls_back_to_highest_confidence_failure() {
        let low = CandidateVerificationResult {
            candidate_id: Uuid::new_v4(),
            summary: VerificationSummary {
                overall_passed: false,
                overall_confidence: 0.2,
                tier_results: Vec::new(),
            },
            limitations: Vec::new(),
        };
        let high = CandidateVerificationResult {
            candidate_id: Uuid::new_v4(),
            summary: VerificationSummary {
                overall_passed: false,
                overall_confidence: 0.8,
                tier_results: Vec::new(),
            },
            limitations: Vec::new(),
        };
        let best = select_best(vec![low, high.clone()]).unwrap();
        assert_eq!(best.candidate_id, high.candidate_id);
    }
}
