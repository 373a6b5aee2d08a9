//! Tier 0 — does the candidate even parse?
//!
//! Uses `tree-sitter` + `tree-sitter-python` rather than hand-rolled
//! parsing, the same parser technology the sibling `dsl-lsp` crate's own
//! `tree-sitter-dsl` grammar is built on.

use std::time::Instant;

use ivcu_types::TierResult;
use tree_sitter::Parser;

pub fn check(code: &str) -> TierResult {
    let start = Instant::now();
    let mut parser = Parser::new();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    match parser.set_language(tree_sitter_python::language()) {
        Ok(()) => {}
        Err(e) => {
            errors.push(format!("failed to initialize parser: {e}"));
            return TierResult {
                tier: 0,
                name: "parse".to_string(),
                passed: false,
                confidence: 0.0,
                errors,
                warnings,
                duration_ms: start.elapsed().as_millis() as u64,
            };
        }
    }

    let passed = match parser.parse(code, None) {
        Some(tree) => {
            if tree.root_node().has_error() {
                errors.push("syntax error in candidate code".to_string());
                false
            } else {
                true
            }
        }
        None => {
            errors.push("parser produced no tree".to_string());
            false
        }
    };

    if code.trim().is_empty() {
        warnings.push("candidate code is empty".to_string());
    }

    let confidence = 1.0 - 0.3 * errors.len().min(3) as f64;

    TierResult {
        tier: 0,
        name: "parse".to_string(),
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

    #[test]
    fn valid_python_parses() {
        let result = check("def add(a, b):\n    return a + b\n");
        assert!(result.passed);
    }

    #[test]
    fn malformed_python_fails() {
        let result = check("def add(a, b:\n    return a +\n");
        assert!(!result.passed);
        assert!(!result.errors.is_empty());
    }
}
