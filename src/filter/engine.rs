use log::debug;
use regex::Regex;

use super::types::{FilterRule, FilterVerdict, RuleAction, RuleKind};
use crate::error_handling::types::FilterError;
use crate::recording::types::RiskLevel;

#[derive(Debug)]
enum Matcher {
    Exact(Vec<String>),
    Regex(Vec<Regex>),
}

#[derive(Debug)]
struct CompiledRule {
    rule: FilterRule,
    matcher: Matcher,
}

impl CompiledRule {
    fn compile(rule: FilterRule) -> Result<Self, FilterError> {
        if rule.patterns.iter().all(|p| p.trim().is_empty()) {
            return Err(FilterError::EmptyRule(rule.priority));
        }
        let matcher = match rule.kind {
            RuleKind::Exact => Matcher::Exact(
                rule.patterns.iter().map(|p| p.trim().to_string()).collect(),
            ),
            RuleKind::Regex => {
                let mut compiled = Vec::with_capacity(rule.patterns.len());
                for pattern in &rule.patterns {
                    let re = Regex::new(pattern).map_err(|e| FilterError::InvalidPattern {
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    })?;
                    compiled.push(re);
                }
                Matcher::Regex(compiled)
            }
        };
        Ok(Self { rule, matcher })
    }

    fn find(&self, command: &str) -> Option<String> {
        match &self.matcher {
            Matcher::Exact(commands) => {
                let trimmed = command.trim();
                commands.iter().find(|c| c.as_str() == trimmed).cloned()
            }
            Matcher::Regex(patterns) => patterns
                .iter()
                .find_map(|re| re.find(command).map(|m| m.as_str().to_string())),
        }
    }
}

/// Ordered rule set; the first matching rule decides.
///
/// Rules are sorted once by ascending priority (stable, so rules sharing a
/// priority keep their configured order) and never change afterwards.
#[derive(Debug, Default)]
pub struct FilterEngine {
    rules: Vec<CompiledRule>,
}

impl FilterEngine {
    pub fn new(mut rules: Vec<FilterRule>) -> Result<Self, FilterError> {
        rules.sort_by_key(|r| r.priority);
        let rules = rules
            .into_iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Matches `command`; no matching rule means allow.
    pub fn check(&self, command: &str) -> FilterVerdict {
        for compiled in &self.rules {
            let Some(fragment) = compiled.find(command) else {
                continue;
            };
            let risk = match (compiled.rule.action, compiled.rule.high_risk) {
                (RuleAction::Deny, _) | (RuleAction::Allow, true) => RiskLevel::Danger,
                _ => RiskLevel::Normal,
            };
            debug!(
                "filter: rule {} ({:?}) matched {:?} on {:?}",
                compiled.rule.priority, compiled.rule.action, fragment, command
            );
            return FilterVerdict {
                action: compiled.rule.action,
                fragment: Some(fragment),
                risk,
            };
        }
        FilterVerdict::allow()
    }
}
