//! Session management core module.
//!
//! This module provides the core types for tracking live sessions: the
//! session record and its status, the registry used for lookup and
//! administrative kill, and the shared client cache.

use serde::{Deserialize, Serialize};

/// Submodule for handling active session logic.
pub mod active_session;
/// Submodule for the reference-counted client cache.
pub mod client_cache;
/// Submodule for session data structures and utilities.
pub mod session;
/// Submodule for the process-wide table of live sessions.
pub mod session_registry;

pub use active_session::ActiveSession;
pub use client_cache::{CachedClient, ClientCache, ClientHandle};
pub use session::Session;
pub use session_registry::SessionRegistry;

/// Represents the current status of a session.
///
/// Variants:
/// - `Pending`: created, the target is not connected yet.
/// - `Active`: bridged and exchanging data.
/// - `Completed`: the bridge exited normally.
/// - `Error`: the bridge exited on a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
    Error,
}
