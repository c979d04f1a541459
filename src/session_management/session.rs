use crate::configuration::types::Protocol;
use crate::session_management::SessionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

/// Identity and lifecycle of one bridged user/target pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user: String,
    pub asset: String,
    pub account: String,
    pub org_id: String,
    pub client_addr: SocketAddr,
    pub protocol: Protocol,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(
        user: impl Into<String>,
        asset: impl Into<String>,
        account: impl Into<String>,
        org_id: impl Into<String>,
        client_addr: SocketAddr,
        protocol: Protocol,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user: user.into(),
            asset: asset.into(),
            account: account.into(),
            org_id: org_id.into(),
            client_addr,
            protocol,
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::Pending,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn mark_connected(&mut self) {
        self.status = SessionStatus::Active;
    }

    pub fn mark_finished(&mut self, status: SessionStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_flags() {
        let mut s = Session::new("alice", "web-01", "root", "default", "127.0.0.1:5000".parse().unwrap(), Protocol::Ssh);
        assert_eq!(s.status, SessionStatus::Pending);
        assert!(!s.is_connected());
        s.mark_connected();
        assert!(s.is_connected());
        assert!(!s.is_finished());
        s.mark_finished(SessionStatus::Completed);
        assert!(s.is_finished());
        assert!(s.end_time.unwrap() >= s.start_time);
    }
}
