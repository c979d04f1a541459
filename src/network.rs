//! Gateway networking: the user-facing accept loop, target dialing through
//! shared clients, and in-band Telnet control.

pub mod dialer;
pub mod network_listener;
pub mod session_request;
pub mod target_pool;
pub mod telnet;

pub use dialer::TargetDialer;
pub use network_listener::NetworkListener;
pub use session_request::SessionRequest;
pub use target_pool::{TargetClient, TargetPool};
pub use telnet::TelnetControl;
