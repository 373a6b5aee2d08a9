//! Thompson Sampling multi-armed bandit for picking a generation strategy:
//! which `(temperature, candidate_count)` pair to spawn candidates with.
//!
//! Each arm tracks a Beta(alpha, beta) posterior over "this strategy
//! produces a verified candidate". Selection draws one sample per arm and
//! picks the max; `update` folds an observed reward back into the
//! posterior. None of this persists itself — callers own durability (see
//! `to_json`/`from_json`).

use std::collections::HashMap;

use rand::thread_rng;
use rand_distr::{Beta as BetaDist, Distribution};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default `(temperature, candidate_count)` arm set, exactly as specified.
pub const DEFAULT_ARMS: &[(f64, u32)] = &[
    (0.1, 2),
    (0.2, 3),
    (0.4, 3),
    (0.5, 4),
    (0.7, 4),
    (0.8, 5),
];

#[derive(Debug, Error)]
pub enum BanditError {
    #[error("unknown arm: {0}")]
    UnknownArm(String),

    #[error("reward {0} out of range [0, 1]")]
    RewardOutOfRange(f64),

    #[error("bandit has no arms")]
    NoArms,

    #[error("persisted state is invalid: {0}")]
    Persist(#[from] serde_json::Error),
}

/// Stable identifier for an arm, derived from its `(temperature,
/// candidate_count)` pair so it round-trips through persistence and logs
/// without a separate id allocator.
pub fn arm_id(temperature: f64, candidate_count: u32) -> String {
    format!("t{:.2}_k{}", temperature, candidate_count)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arm {
    pub id: String,
    pub temperature: f64,
    pub candidate_count: u32,
    pub alpha: f64,
    pub beta: f64,
}

impl Arm {
    fn new(temperature: f64, candidate_count: u32) -> Self {
        Self {
            id: arm_id(temperature, candidate_count),
            temperature,
            candidate_count,
            alpha: 1.0,
            beta: 1.0,
        }
    }

    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }

    pub fn trials(&self) -> f64 {
        self.alpha + self.beta - 2.0
    }

    fn sample(&self) -> f64 {
        match BetaDist::new(self.alpha, self.beta) {
            Ok(dist) => dist.sample(&mut thread_rng()),
            Err(_) => self.mean(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThompsonBandit {
    arms: HashMap<String, Arm>,
}

impl Default for ThompsonBandit {
    fn default() -> Self {
        Self::with_arms(DEFAULT_ARMS.iter().copied())
    }
}

impl ThompsonBandit {
    pub fn with_arms<I>(arms: I) -> Self
    where
        I: IntoIterator<Item = (f64, u32)>,
    {
        let arms = arms
            .into_iter()
            .map(|(temperature, candidate_count)| {
                let arm = Arm::new(temperature, candidate_count);
                (arm.id.clone(), arm)
            })
            .collect();
        Self { arms }
    }

    pub fn arms(&self) -> impl Iterator<Item = &Arm> {
        self.arms.values()
    }

    pub fn arm(&self, id: &str) -> Option<&Arm> {
        self.arms.get(id)
    }

    /// Draws one posterior sample per arm, returns the arm with the
    /// highest draw.
    pub fn select(&self) -> Result<&Arm, BanditError> {
        self.arms
            .values()
            .max_by(|a, b| a.sample().partial_cmp(&b.sample()).unwrap())
            .ok_or(BanditError::NoArms)
    }

    /// Upper-confidence-bound alternative, useful when a deterministic
    /// selection is wanted (e.g. replaying a decision for audit).
    pub fn select_ucb(&self) -> Result<&Arm, BanditError> {
        let total_trials: f64 = self.arms.values().map(|a| a.trials().max(1.0)).sum();
        self.arms
            .values()
            .max_by(|a, b| {
                let score_a = ucb_score(a, total_trials);
                let score_b = ucb_score(b, total_trials);
                score_a.partial_cmp(&score_b).unwrap()
            })
            .ok_or(BanditError::NoArms)
    }

    /// Folds an observed reward in `[0, 1]` into `arm_id`'s posterior.
    /// A reward of 1.0 is a full success (e.g. candidate passed every
    /// verification tier); fractional rewards let the caller blend in
    /// partial confidence.
    pub fn update(&mut self, arm_id: &str, reward: f64) -> Result<(), BanditError> {
        if !(0.0..=1.0).contains(&reward) {
            return Err(BanditError::RewardOutOfRange(reward));
        }
        let arm = self
            .arms
            .get_mut(arm_id)
            .ok_or_else(|| BanditError::UnknownArm(arm_id.to_string()))?;
        arm.alpha += reward;
        arm.beta += 1.0 - reward;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, BanditError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self, BanditError> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Reward rule from the orchestrator: verification score scaled to zero
/// unless the candidate actually verified, with a small bonus for clearing
/// the early-stop confidence bar.
pub fn reward_from_verification(verification_score: f64, verified: bool, early_stop_threshold: f64) -> f64 {
    if !verified {
        return 0.0;
    }
    let base = verification_score.clamp(0.0, 1.0);
    if base >= early_stop_threshold {
        (base + 0.05).min(1.0)
    } else {
        base
    }
}

fn ucb_score(arm: &Arm, total_trials: f64) -> f64 {
    let n = arm.trials().max(1.0);
    arm.mean() + (2.0 * total_trials.ln() / n).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bandit_has_six_arms() {
        let bandit = ThompsonBandit::default();
        assert_eq!(bandit.arms().count(), 6);
    }

    #[test]
    fn default_arms_match_spec_temperature_candidate_pairs() {
        let bandit = ThompsonBandit::default();
        for (temperature, candidate_count) in DEFAULT_ARMS {
            let arm = bandit.arm(&arm_id(*temperature, *candidate_count)).unwrap();
            assert_eq!(arm.temperature, *temperature);
            assert_eq!(arm.candidate_count, *candidate_count);
        }
    }

    #[test]
    fn update_rejects_out_of_range_reward() {
        let mut bandit = ThompsonBandit::default();
        let id = arm_id(0.1, 2);
        let err = bandit.update(&id, 1.5).unwrap_err();
        assert!(matches!(err, BanditError::RewardOutOfRange(_)));
    }

    #[test]
    fn update_unknown_arm_errors() {
        let mut bandit = ThompsonBandit::default();
        let err = bandit.update("nonexistent", 1.0).unwrap_err();
        assert!(matches!(err, BanditError::UnknownArm(_)));
    }

    #[test]
    fn repeated_success_raises_mean_above_prior() {
        let mut bandit = ThompsonBandit::default();
        let id = arm_id(0.8, 5);
        for _ in 0..50 {
            bandit.update(&id, 1.0).unwrap();
        }
        let mean = bandit.arm(&id).unwrap().mean();
        assert!(mean > 0.9, "mean {mean} should approach 1.0 after 50 successes");
    }

    #[test]
    fn json_round_trips() {
        let mut bandit = ThompsonBandit::default();
        let id = arm_id(0.5, 4);
        bandit.update(&id, 0.7).unwrap();
        let json = bandit.to_json().unwrap();
        let restored = ThompsonBandit::from_json(&json).unwrap();
        assert_eq!(restored.arm(&id).unwrap().alpha, bandit.arm(&id).unwrap().alpha);
    }

    #[test]
    fn reward_rule_zeroes_out_unverified_candidates() {
        assert_eq!(reward_from_verification(0.95, false, 0.9), 0.0);
    }

    #[test]
    fn reward_rule_bonuses_early_stop_threshold() {
        let r = reward_from_verification(0.95, true, 0.9);
        assert!(r > 0.95);
        assert!(r <= 1.0);
    }

    #[test]
    fn two_arms_with_identical_temperature_and_k_share_an_id() {
        let bandit = ThompsonBandit::with_arms([(0.3, 3)]);
        assert_eq!(bandit.arms().count(), 1);
    }

    proptest::proptest! {
        #[test]
        fn mean_is_monotone_in_successes(n in 0u32..30) {
            let mut bandit = ThompsonBandit::with_arms([(0.3, 3)]);
            let id = arm_id(0.3, 3);
            let mut last_mean = bandit.arm(&id).unwrap().mean();
            for _ in 0..n {
                bandit.update(&id, 1.0).unwrap();
                let mean = bandit.arm(&id).unwrap().mean();
                proptest::prop_assert!(mean >= last_mean);
                last_mean = mean;
            }
        }

        #[test]
        fn reward_monotonicity_of_the_bandit(n in 5u32..40) {
            // Arm `a` only ever receives reward >= 0.8; arm `b` only ever
            // receives reward <= 0.2. After enough trials `a`'s mean must
            // exceed `b`'s mean (spec.md Testable Properties).
            let mut bandit = ThompsonBandit::with_arms([(0.1, 2), (0.9, 5)]);
            let id_a = arm_id(0.1, 2);
            let id_b = arm_id(0.9, 5);
            for _ in 0..n {
                bandit.update(&id_a, 0.9).unwrap();
                bandit.update(&id_b, 0.1).unwrap();
            }
            proptest::prop_assert!(bandit.arm(&id_a).unwrap().mean() > bandit.arm(&id_b).unwrap().mean());
        }
    }
}
