use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// A user connection accepted by the gateway, waiting to be bridged.
pub struct SessionRequest<S = TcpStream> {
    pub stream: S,
    pub client_addr: SocketAddr,
    pub timestamp: DateTime<Utc>,
}
