//! Pre-generation and post-generation safety rules, plus the model-routing
//! policy `ivcu-router` checks candidate models against.
//!
//! Grounded on the prototype's `PolicyRule` ABC: one trait, one phase, one
//! severity per violation, critical violations fail closed.

use regex::RegexSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("duplicate policy rule id: {0}")]
    DuplicateRule(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPhase {
    PreGeneration,
    PostGeneration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PolicyViolation {
    pub rule_id: String,
    pub phase: PolicyPhase,
    pub severity: PolicySeverity,
    pub message: String,
}

/// Caller-supplied metadata a rule may use to scope its check (e.g. skip a
/// rule for a trusted actor). Kept intentionally small — auth is out of
/// scope for this crate.
#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    pub actor_id: Option<String>,
    pub ivcu_id: Option<uuid::Uuid>,
}

pub trait PolicyRule: Send + Sync {
    fn id(&self) -> &str;
    fn phase(&self) -> PolicyPhase;
    fn check(&self, content: &str, context: &PolicyContext) -> Vec<PolicyViolation>;
}

#[derive(Debug, Clone)]
pub struct PolicyOutcome {
    pub violations: Vec<PolicyViolation>,
    /// `false` whenever any violation is [`PolicySeverity::Critical`] —
    /// critical always fails closed regardless of how many other rules
    /// passed.
    pub allowed: bool,
}

impl PolicyOutcome {
    fn from_violations(violations: Vec<PolicyViolation>) -> Self {
        let allowed = !violations
            .iter()
            .any(|v| v.severity == PolicySeverity::Critical);
        Self { violations, allowed }
    }
}

pub struct PolicyGate {
    rules: Vec<Box<dyn PolicyRule>>,
}

impl Default for PolicyGate {
    fn default() -> Self {
        Self::with_rules(vec![
            Box::new(DestructiveIntentRule::default()),
            Box::new(PromptInjectionRule::default()),
            Box::new(PiiRule::default()),
            Box::new(BannedCallRule::default()),
            Box::new(HardcodedCredentialRule::default()),
        ])
    }
}

impl PolicyGate {
    pub fn with_rules(rules: Vec<Box<dyn PolicyRule>>) -> Self {
        Self { rules }
    }

    pub fn add_rule(&mut self, rule: Box<dyn PolicyRule>) -> Result<(), PolicyError> {
        if self.rules.iter().any(|r| r.id() == rule.id()) {
            return Err(PolicyError::DuplicateRule(rule.id().to_string()));
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn check_pre(&self, content: &str, context: &PolicyContext) -> PolicyOutcome {
        self.check_phase(PolicyPhase::PreGeneration, content, context)
    }

    pub fn check_post(&self, content: &str, context: &PolicyContext) -> PolicyOutcome {
        self.check_phase(PolicyPhase::PostGeneration, content, context)
    }

    fn check_phase(&self, phase: PolicyPhase, content: &str, context: &PolicyContext) -> PolicyOutcome {
        let violations = self
            .rules
            .iter()
            .filter(|r| r.phase() == phase)
            .flat_map(|r| r.check(content, context))
            .collect();
        PolicyOutcome::from_violations(violations)
    }
}

macro_rules! regex_rule {
    ($name:ident, $id:literal, $phase:expr, $severity:expr, $message:literal, [$($pattern:literal),+ $(,)?]) => {
        pub struct $name {
            patterns: RegexSet,
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    patterns: RegexSet::new([$($pattern),+]).expect("static regex set is valid"),
                }
            }
        }

        impl PolicyRule for $name {
            fn id(&self) -> &str {
                $id
            }

            fn phase(&self) -> PolicyPhase {
                $phase
            }

            fn check(&self, content: &str, _context: &PolicyContext) -> Vec<PolicyViolation> {
                if self.patterns.is_match(content) {
                    vec![PolicyViolation {
                        rule_id: $id.to_string(),
                        phase: $phase,
                        severity: $severity,
                        message: $message.to_string(),
                    }]
                } else {
                    Vec::new()
                }
            }
        }
    };
}

regex_rule!(
    DestructiveIntentRule,
    "destructive_intent",
    PolicyPhase::PreGeneration,
    PolicySeverity::Critical,
    "intent text matches a known destructive-operation phrase",
    [
        r"(?i)rm\s+-rf",
        r"(?i)drop\s+table",
        r"(?i)delete\s+from\s+\w+\s*;?\s*$",
        r"(?i)format\s+c:",
        r"(?i)truncate\s+table",
    ]
);

regex_rule!(
    PromptInjectionRule,
    "prompt_injection",
    PolicyPhase::PreGeneration,
    PolicySeverity::Critical,
    "intent text matches a known prompt-injection phrase",
    [
        r"(?i)ignore (all )?previous instructions",
        r"(?i)disregard (all )?prior (instructions|prompts)",
        r"(?i)you are now",
        r"(?i)reveal your (system )?prompt",
    ]
);

regex_rule!(
    PiiRule,
    "pii_detected",
    PolicyPhase::PreGeneration,
    PolicySeverity::Warning,
    "intent text contains a likely PII pattern",
    [
        r"\b\d{3}-\d{2}-\d{4}\b",
        r"\b(?:\d[ -]*?){13,16}\b",
    ]
);

regex_rule!(
    BannedCallRule,
    "banned_call",
    PolicyPhase::PostGeneration,
    PolicySeverity::Critical,
    "generated code calls a banned dynamic-execution function",
    [
        r"\beval\(",
        r"\bexec\(",
        r"os\.system\(",
        r"subprocess\.\w+\([^)]*shell\s*=\s*True",
        r"__import__\(",
    ]
);

regex_rule!(
    HardcodedCredentialRule,
    "hardcoded_credential",
    PolicyPhase::PostGeneration,
    PolicySeverity::Error,
    "generated code contains a hardcoded credential",
    [
        r#"(?i)(api[_-]?key|password|secret)\s*=\s*['"][^'"]{6,}['"]"#,
        r"AKIA[0-9A-Z]{16}",
    ]
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostPreference {
    Cheapest,
    Balanced,
    BestQuality,
}

/// What `ivcu-router` is allowed to route to for a given org/session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelRoutingPolicy {
    pub allowed_models: Option<Vec<String>>,
    pub denied_models: Vec<String>,
    pub cost_preference: CostPreference,
    pub default_model: String,
}

impl ModelRoutingPolicy {
    pub fn permissive(default_model: impl Into<String>) -> Self {
        Self {
            allowed_models: None,
            denied_models: Vec::new(),
            cost_preference: CostPreference::Balanced,
            default_model: default_model.into(),
        }
    }

    pub fn is_allowed(&self, model_id: &str) -> bool {
        if self.denied_models.iter().any(|m| m == model_id) {
            return false;
        }
        match &self.allowed_models {
            Some(allowed) => allowed.iter().any(|m| m == model_id),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destructive_intent_is_critical_and_fails_closed() {
        let gate = PolicyGate::default();
        let outcome = gate.check_pre("please rm -rf / the workspace", &PolicyContext::default());
        assert!(!outcome.allowed);
        assert_eq!(outcome.violations[0].severity, PolicySeverity::Critical);
    }

    #[test]
    fn benign_intent_passes() {
        let gate = PolicyGate::default();
        let outcome = gate.check_pre("write a function that sorts a list", &PolicyContext::default());
        assert!(outcome.allowed);
        assert!(outcome.violations.is_empty());
    }

    #[test]
    fn banned_call_detected_post_generation() {
        let gate = PolicyGate::default();
        let outcome = gate.check_post("def run(cmd):\n    os.system(cmd)\n", &PolicyContext::default());
        assert!(!outcome.allowed);
    }

    #[test]
    fn hardcoded_credential_is_error_not_critical() {
        let gate = PolicyGate::default();
        let outcome = gate.check_post("api_key = \"sk-abcdef123456\"", &PolicyContext::default());
        assert!(outcome.allowed);
        assert_eq!(outcome.violations[0].severity, PolicySeverity::Error);
    }

    #[test]
    fn routing_policy_respects_deny_list() {
        let mut policy = ModelRoutingPolicy::permissive("claude-haiku");
        policy.denied_models.push("gpt-4-turbo".to_string());
        assert!(!policy.is_allowed("gpt-4-turbo"));
        assert!(policy.is_allowed("claude-haiku"));
    }
}
