//! Admin HTTP API: list live sessions and kill them.
//!
//! - `GET /sessions`: snapshots of live sessions
//! - `GET /sessions/alive`: ids only, for heartbeat reporting
//! - `DELETE /sessions/{id}`: cancels a session (200, 404 unknown, 400 malformed id)

pub mod routes;
pub mod types;
pub mod web_server;

pub use web_server::WebServer;
