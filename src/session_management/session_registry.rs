use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use log::{debug, info};
use uuid::Uuid;

use crate::bridge::RoomViewer;
use crate::error_handling::types::BridgeError;
use crate::session_management::active_session::ActiveSession;
use crate::session_management::session::Session;

/// Table of live sessions keyed by session id.
///
/// One instance is shared (through an `Arc`) by the listener, every bridge and
/// the admin API; nothing is global.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, ActiveSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ActiveSession>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn register(&self, active: ActiveSession) -> Result<(), BridgeError> {
        let mut sessions = self.lock();
        let id = active.session.id;
        if sessions.contains_key(&id) {
            return Err(BridgeError::AlreadyRegistered);
        }
        sessions.insert(id, active);
        debug!("[{}] registered, {} live session(s)", id, sessions.len());
        Ok(())
    }

    pub fn deregister(&self, id: Uuid) -> Option<ActiveSession> {
        let mut sessions = self.lock();
        let removed = sessions.remove(&id);
        if removed.is_some() {
            debug!("[{}] deregistered, {} live session(s)", id, sessions.len());
        }
        removed
    }

    /// Cancels the session's bridge. Returns `false` for unknown ids.
    pub fn kill(&self, id: Uuid) -> bool {
        match self.lock().get(&id) {
            Some(active) => {
                info!("[{}] kill requested", id);
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn alive_ids(&self) -> Vec<Uuid> {
        self.lock().keys().copied().collect()
    }

    /// Snapshots of the live sessions, oldest first.
    pub fn sessions(&self) -> Vec<Session> {
        let mut list: Vec<Session> = self.lock().values().map(|a| a.session.clone()).collect();
        list.sort_by_key(|s| s.start_time);
        list
    }

    pub fn get(&self, id: Uuid) -> Option<Session> {
        self.lock().get(&id).map(|a| a.session.clone())
    }

    /// Subscribes a viewer to a live session's room.
    pub fn join(&self, id: Uuid) -> Option<RoomViewer> {
        self.lock().get(&id).and_then(|a| a.room.subscribe())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{CancelToken, Room, RoomMessage};
    use crate::configuration::types::Protocol;

    fn active() -> ActiveSession {
        let session = Session::new("alice", "web-01", "root", "default", "127.0.0.1:40000".parse().unwrap(), Protocol::Ssh);
        let room = Room::new(session.id);
        ActiveSession {
            session,
            cancel: CancelToken::new(),
            room,
        }
    }

    #[test]
    fn test_register_kill_deregister() {
        let registry = SessionRegistry::new();
        let a = active();
        let id = a.session.id;
        let token = a.cancel.clone();

        registry.register(a.clone()).unwrap();
        assert!(matches!(registry.register(a), Err(BridgeError::AlreadyRegistered)));
        assert_eq!(registry.alive_ids(), vec![id]);
        assert_eq!(registry.get(id).unwrap().user, "alice");

        assert!(registry.kill(id));
        assert!(token.is_cancelled());
        assert!(!registry.kill(Uuid::new_v4()));

        assert!(registry.deregister(id).is_some());
        assert!(registry.deregister(id).is_none());
        assert!(registry.is_empty());
        assert!(!registry.kill(id));
    }

    #[tokio::test]
    async fn test_join_observes_room() {
        let registry = SessionRegistry::new();
        let a = active();
        let id = a.session.id;
        let room = a.room.clone();
        registry.register(a).unwrap();

        let mut viewer = registry.join(id).unwrap();
        room.broadcast(RoomMessage::Data(b"top".to_vec()));
        assert_eq!(viewer.recv().await, Some(RoomMessage::Data(b"top".to_vec())));
        assert!(registry.join(Uuid::new_v4()).is_none());
    }
}
