//! Tier 2 — actually run the candidate against test cases in a sandbox.

use std::time::{Duration, Instant};

use ivcu_types::TierResult;

use crate::sandbox::{Sandbox, SandboxRequest};

#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub stdin: Option<String>,
    pub expected_stdout: String,
}

pub async fn check(
    sandbox: &dyn Sandbox,
    code: &str,
    language: &str,
    test_cases: &[TestCase],
    per_case_timeout: Duration,
) -> TierResult {
    let start = Instant::now();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut passed_count = 0usize;

    if test_cases.is_empty() {
        warnings.push("no test cases supplied, tier 2 ran as a smoke test only".to_string());
    }

    let cases = if test_cases.is_empty() {
        vec![TestCase {
            name: "smoke".to_string(),
            stdin: None,
            expected_stdout: String::new(),
        }]
    } else {
        test_cases.to_vec()
    };

    for case in &cases {
        let request = SandboxRequest {
            code: code.to_string(),
            language: language.to_string(),
            stdin: case.stdin.clone(),
            timeout: per_case_timeout,
            allow_network: false,
            allow_filesystem: false,
        };
        match sandbox.run(&request).await {
            Ok(result) if result.timed_out => {
                errors.push(format!("test `{}` timed out", case.name));
            }
            Ok(result) if result.exit_code != 0 => {
                errors.push(format!(
                    "test `{}` exited {}: {}",
                    case.name, result.exit_code, result.stderr
                ));
            }
            Ok(result) => {
                if case.expected_stdout.is_empty() || result.stdout.trim() == case.expected_stdout.trim() {
                    passed_count += 1;
                } else {
                    errors.push(format!(
                        "test `{}` expected `{}`, got `{}`",
                        case.name,
                        case.expected_stdout.trim(),
                        result.stdout.trim()
                    ));
                }
            }
            Err(e) => {
                errors.push(format!("test `{}` sandbox error: {e}", case.name));
            }
        }
    }

    let total = cases.len();
    let confidence = passed_count as f64 / total as f64;
    let passed = passed_count == total;

    TierResult {
        tier: 2,
        name: "dynamic_execution".to_string(),
        passed,
        confidence,
        errors,
        warnings,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::FakeSandbox;

    #[tokio::test]
    async fn all_cases_passing_yields_full_confidence() {
        let sandbox = FakeSandbox::new();
        sandbox.push_success("4\n");
        let cases = vec![TestCase {
            name: "add".to_string(),
            stdin: None,
            expected_stdout: "4".to_string(),
        }];
        let result = check(&sandbox, "print(2+2)", "python", &cases, Duration::from_secs(5)).await;
        assert!(result.passed);
        assert_eq!(result.confidence, 1.0);
    }

    #[tokio::test]
    async fn a_failing_case_reduces_confidence_without_panicking() {
        let sandbox = FakeSandbox::new();
        sandbox.push_success("4\n");
        sandbox.push_failure(1, "Traceback...");
        let cases = vec![
            TestCase {
                name: "a".to_string(),
                stdin: None,
                expected_stdout: "4".to_string(),
            },
            TestCase {
                name: "b".to_string(),
                stdin: None,
                expected_stdout: "9".to_string(),
            },
        ];
        let result = check(&sandbox, "print(2+2)", "python", &cases, Duration::from_secs(5)).await;
        assert!(!result.passed);
        assert_eq!(result.confidence, 0.5);
    }
}
