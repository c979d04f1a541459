//! Session bridging.
//!
//! A [`SessionBridge`] owns both connections of one session and runs its event
//! loop; viewers observe the session through its [`Room`], and administrators
//! end it through its [`CancelToken`].

pub mod cancel;
pub mod conn;
pub mod room;
pub mod session_bridge;

pub use cancel::CancelToken;
pub use conn::{BoxedReader, BoxedWriter, RawControl, ServerConn, ServerControl, UserConn, WindowSize};
pub use room::{Room, RoomMessage, RoomViewer};
pub use session_bridge::{BridgeDeps, BridgeOptions, SessionBridge};
