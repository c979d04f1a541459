use serde::Serialize;
use uuid::Uuid;

use crate::configuration::types::Protocol;
use crate::session_management::{Session, SessionStatus};

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub user: String,
    pub asset: String,
    pub account: String,
    pub org_id: String,
    pub client_addr: String,
    pub protocol: Protocol,
    pub start_time: String,
    pub status: SessionStatus,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id,
            user: session.user.clone(),
            asset: session.asset.clone(),
            account: session.account.clone(),
            org_id: session.org_id.clone(),
            client_addr: session.client_addr.to_string(),
            protocol: session.protocol,
            start_time: session.start_time.to_rfc3339(),
            status: session.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct KillResponse {
    pub id: Uuid,
    pub killed: bool,
}
