use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Normal,
    Danger,
}

/// Identity labels attached to every command saved for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLabels {
    pub session_id: Uuid,
    pub org_id: String,
    pub user: String,
    pub asset: String,
    pub account: String,
}

/// One audited command as persisted by command storages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub session_id: Uuid,
    pub org_id: String,
    pub input: String,
    pub output: String,
    pub user: String,
    pub asset: String,
    pub account: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub risk_level: RiskLevel,
}

impl CommandRecord {
    pub fn new(
        labels: &SessionLabels,
        input: String,
        output: String,
        timestamp: DateTime<Utc>,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            session_id: labels.session_id,
            org_id: labels.org_id.clone(),
            input,
            output,
            user: labels.user.clone(),
            asset: labels.asset.clone(),
            account: labels.account.clone(),
            timestamp: timestamp.timestamp(),
            risk_level,
        }
    }
}

/// First line of a cast file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastHeader {
    pub version: u32,
    pub width: u16,
    pub height: u16,
    pub timestamp: i64,
    pub title: String,
    pub env: CastEnv,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastEnv {
    #[serde(rename = "SHELL")]
    pub shell: String,
    #[serde(rename = "TERM")]
    pub term: String,
}
