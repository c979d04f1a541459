pub mod bridge;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod filter;
pub mod network;
pub mod proxy;
pub mod recording;
pub mod session_management;
pub mod storage;
pub mod terminal;
pub mod web_interface;
pub mod zmodem;

pub use session_management::SessionStatus;
