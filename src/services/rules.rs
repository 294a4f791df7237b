//! Data-driven candidate rewrites.
//!
//! Recurring syntax mistakes in candidate translations (an old relation
//! syntax, a deprecated keyword) are handled by a declared rule set instead
//! of per-item hardcoded fixes. Each rule pairs a regex predicate with a
//! replacement and rules apply in declaration order, so a rule file fully
//! determines the rewrite behavior and each rule is testable on its own.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::api::middleware::AppError;

#[derive(Debug, Deserialize)]
struct RuleSpec {
    name: String,
    pattern: String,
    replacement: String,
}

#[derive(Debug)]
pub struct RewriteRule {
    pub name: String,
    pattern: Regex,
    replacement: String,
}

impl RewriteRule {
    pub fn new(name: &str, pattern: &str, replacement: &str) -> Result<Self, AppError> {
        let pattern = Regex::new(pattern)
            .map_err(|e| AppError::Internal(format!("rule '{}': bad pattern: {}", name, e)))?;
        Ok(Self {
            name: name.to_string(),
            pattern,
            replacement: replacement.to_string(),
        })
    }
}

/// Ordered set of rewrite rules applied to every candidate before
/// validation.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<RewriteRule>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self { rules }
    }

    /// Load rules from a JSON file:
    /// `[{"name": ..., "pattern": ..., "replacement": ...}, ...]`.
    /// A missing file is an empty rule set.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            return Ok(Self::empty());
        }
        let text = std::fs::read_to_string(path)?;
        let specs: Vec<RuleSpec> = serde_json::from_str(&text)
            .map_err(|e| AppError::Internal(format!("{}: {}", path.display(), e)))?;
        let rules = specs
            .iter()
            .map(|s| RewriteRule::new(&s.name, &s.pattern, &s.replacement))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::info!("Loaded {} rewrite rules from {}", rules.len(), path.display());
        Ok(Self::new(rules))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every matching rule in declaration order. Returns the rewritten
    /// candidate and the names of the rules that fired.
    pub fn apply(&self, candidate: &str) -> (String, Vec<&str>) {
        let mut text = candidate.to_string();
        let mut fired = Vec::new();
        for rule in &self.rules {
            if rule.pattern.is_match(&text) {
                text = rule
                    .pattern
                    .replace_all(&text, rule.replacement.as_str())
                    .into_owned();
                fired.push(rule.name.as_str());
            }
        }
        (text, fired)
    }
}
