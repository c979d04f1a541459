use serde::{Deserialize, Serialize};

use crate::recording::types::RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Whole command compared for equality after trimming.
    Exact,
    /// Each pattern is a regular expression searched within the command.
    Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
}

/// One policy rule as configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    pub priority: u32,
    pub kind: RuleKind,
    pub patterns: Vec<String>,
    pub action: RuleAction,
    /// Tags allowed commands as dangerous for notification purposes.
    #[serde(default)]
    pub high_risk: bool,
}

impl FilterRule {
    pub fn exact(priority: u32, command: &str, action: RuleAction) -> Self {
        Self {
            priority,
            kind: RuleKind::Exact,
            patterns: vec![command.to_string()],
            action,
            high_risk: false,
        }
    }

    pub fn regex(priority: u32, pattern: &str, action: RuleAction) -> Self {
        Self {
            priority,
            kind: RuleKind::Regex,
            patterns: vec![pattern.to_string()],
            action,
            high_risk: false,
        }
    }
}

/// Outcome of matching a command against the rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterVerdict {
    pub action: RuleAction,
    /// Pattern or exact command that matched, if any rule matched.
    pub fragment: Option<String>,
    pub risk: RiskLevel,
}

impl FilterVerdict {
    pub fn allow() -> Self {
        Self {
            action: RuleAction::Allow,
            fragment: None,
            risk: RiskLevel::Normal,
        }
    }

    pub fn is_denied(&self) -> bool {
        self.action == RuleAction::Deny
    }
}
