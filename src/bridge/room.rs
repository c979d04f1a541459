use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::conn::WindowSize;

const ROOM_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomMessage {
    /// Output as the user sees it.
    Data(Vec<u8>),
    Resize(WindowSize),
    /// The session ended; no more messages follow.
    Closed,
}

/// Broadcast of one session's output to any number of viewers.
pub struct Room {
    session_id: Uuid,
    tx: broadcast::Sender<RoomMessage>,
    closed: AtomicBool,
}

impl Room {
    pub fn new(session_id: Uuid) -> Arc<Self> {
        let (tx, _) = broadcast::channel(ROOM_CAPACITY);
        Arc::new(Self {
            session_id,
            tx,
            closed: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn broadcast(&self, msg: RoomMessage) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        // no viewers is the common case
        let _ = self.tx.send(msg);
    }

    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// A new viewer, or `None` once the room is closed.
    pub fn subscribe(&self) -> Option<RoomViewer> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        debug!("[{}] viewer joined", self.session_id);
        Some(RoomViewer {
            session_id: self.session_id,
            rx: self.tx.subscribe(),
        })
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(RoomMessage::Closed);
        }
    }
}

pub struct RoomViewer {
    session_id: Uuid,
    rx: broadcast::Receiver<RoomMessage>,
}

impl RoomViewer {
    /// Next message; `None` after the room closed. A viewer that falls behind
    /// skips what it missed.
    pub async fn recv(&mut self) -> Option<RoomMessage> {
        loop {
            match self.rx.recv().await {
                Ok(RoomMessage::Closed) => return None,
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("[{}] viewer lagged, skipped {} message(s)", self.session_id, n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_viewers_receive_until_close() {
        let room = Room::new(Uuid::new_v4());
        room.broadcast(RoomMessage::Data(b"before".to_vec()));
        let mut a = room.subscribe().unwrap();
        let mut b = room.subscribe().unwrap();
        assert_eq!(room.viewer_count(), 2);

        room.broadcast(RoomMessage::Data(b"hello".to_vec()));
        room.broadcast(RoomMessage::Resize(WindowSize { width: 100, height: 30 }));
        room.close();
        room.close();

        for viewer in [&mut a, &mut b] {
            assert_eq!(viewer.recv().await, Some(RoomMessage::Data(b"hello".to_vec())));
            assert_eq!(viewer.recv().await, Some(RoomMessage::Resize(WindowSize { width: 100, height: 30 })));
            assert_eq!(viewer.recv().await, None);
        }
        assert!(room.subscribe().is_none());
    }

    #[tokio::test]
    async fn test_lagging_viewer_skips_ahead() {
        let room = Room::new(Uuid::new_v4());
        let mut viewer = room.subscribe().unwrap();
        for i in 0..(ROOM_CAPACITY + 10) {
            room.broadcast(RoomMessage::Data(vec![i as u8]));
        }
        let first = viewer.recv().await.unwrap();
        assert_ne!(first, RoomMessage::Data(vec![0]));
    }
}
