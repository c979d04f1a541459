use std::sync::Arc;

use crate::bridge::{CancelToken, Room};
use crate::session_management::session::Session;

/// Registry entry of a live session: a snapshot of its record, the token
/// that cancels its bridge, and the room its output is broadcast to.
#[derive(Clone)]
pub struct ActiveSession {
    /// The session metadata as it was when the bridge started.
    pub session: Session,
    /// Cancelling this ends the bridge loop.
    pub cancel: CancelToken,
    /// Broadcast room viewers join.
    pub room: Arc<Room>,
}
