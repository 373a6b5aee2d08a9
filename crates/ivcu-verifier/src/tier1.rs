//! Tier 1 — lightweight static analysis: is this actually an
//! implementation, not just a stub, and does it avoid obvious smells.
//!
//! Deliberately shallow (line/indentation heuristics, not a real data-flow
//! analysis) — Tier 2's sandboxed execution is what actually proves
//! behavior; this tier is a cheap filter to avoid burning sandbox time on
//! candidates that are trivially incomplete.

use std::time::Instant;

use ivcu_types::TierResult;

const MAX_LINE_LENGTH: usize = 200;
const MAX_NESTING_DEPTH: usize = 6;

pub fn check(code: &str) -> TierResult {
    let start = Instant::now();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if is_stub_only(code) {
        errors.push("candidate body is a stub (`pass`/`...`/`raise NotImplementedError` only)".to_string());
    }

    for (lineno, line) in code.lines().enumerate() {
        if line.len() > MAX_LINE_LENGTH {
            warnings.push(format!("line {} exceeds {} characters", lineno + 1, MAX_LINE_LENGTH));
        }
    }

    if let Some(depth) = max_indent_depth(code) {
        if depth > MAX_NESTING_DEPTH {
            warnings.push(format!("nesting depth {depth} exceeds {MAX_NESTING_DEPTH}"));
        }
    }

    let passed = errors.is_empty();
    let confidence = if !passed {
        0.0
    } else {
        1.0 - (warnings.len() as f64 * 0.1).min(0.5)
    };

    TierResult {
        tier: 1,
        name: "static_analysis".to_string(),
        passed,
        confidence,
        errors,
        warnings,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

fn is_stub_only(code: &str) -> bool {
    let meaningful_lines: Vec<&str> = code
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with("def ") && !l.starts_with("\"\"\""))
        .collect();
    !meaningful_lines.is_empty()
        && meaningful_lines
            .iter()
            .all(|l| matches!(*l, "pass" | "..." | "raise NotImplementedError" | "raise NotImplementedError()"))
}

fn max_indent_depth(code: &str) -> Option<usize> {
    code.lines()
        .map(|line| {
            let spaces = line.chars().take_while(|c| *c == ' ').count();
            spaces / 4
        })
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_implementation_passes() {
        let result = check("def add(a, b):\n    return a + b\n");
        assert!(result.passed);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn stub_body_fails() {
        let result = check("def add(a, b):\n    pass\n");
        assert!(!result.passed);
    }

    #[test]
    fn deep_nesting_warns_but_does_not_fail() {
        let code = "def f():\n".to_string()
            + &"    ".repeat(0)
            + &(0..8)
                .map(|i| format!("{}if True:\n", "    ".repeat(i + 1)))
                .collect::<String>()
            + &"        return 1\n";
        let result = check(&code);
        assert!(result.passed);
        assert!(!result.warnings.is_empty());
    }
}
