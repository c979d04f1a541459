//! # Network Listener Module
//!
//! Accepts user connections on the gateway address and hands each one, as a
//! [`SessionRequest`], to whoever owns the receiving end of the channel.
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │ Incoming        │───▶│ NetworkListener  │───▶│ Controller      │
//! │ Connections     │    │                  │    │ (via mpsc)      │
//! └─────────────────┘    └──────────────────┘    └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tokio::sync::mpsc;
//! use gangway::network::network_listener::NetworkListener;
//! use gangway::error_handling::types::NetworkError;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), NetworkError> {
//!     let (tx, mut rx) = mpsc::channel(100);
//!     let mut listener = NetworkListener::new(tx);
//!     listener.bind("127.0.0.1:2222".parse().unwrap()).await?;
//!     tokio::spawn(async move { listener.start_listening().await });
//!
//!     while let Some(request) = rx.recv().await {
//!         println!("user from {}", request.client_addr);
//!     }
//!     Ok(())
//! }
//! ```

use super::session_request::SessionRequest;
use crate::error_handling::types::NetworkError;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc::Sender;

/// The gateway's TCP accept loop.
pub struct NetworkListener {
    /// Bound socket, set by [`bind`](Self::bind)
    listener: Option<TcpListener>,

    /// Channel sender for forwarding accepted users
    session_tx: Sender<SessionRequest>,
}

impl NetworkListener {
    pub fn new(session_tx: Sender<SessionRequest>) -> Self {
        Self {
            listener: None,
            session_tx,
        }
    }

    /// Binds the gateway address and returns the address actually bound
    /// (useful with port 0).
    ///
    /// # Errors
    ///
    /// `NetworkError::BindError` when the address is taken or not permitted.
    pub async fn bind(&mut self, addr: SocketAddr) -> Result<SocketAddr, NetworkError> {
        let listener = TcpListener::bind(addr).await.map_err(|err| {
            error!("[!] Unable to bind {}: {:?}", addr, err);
            NetworkError::BindError(err)
        })?;
        let local = listener.local_addr().map_err(NetworkError::SockError)?;
        info!("Gateway listening on {}", local);
        self.listener = Some(listener);
        Ok(local)
    }

    /// Accepts users until the receiving end of the channel is dropped.
    ///
    /// A failed accept is logged and skipped; it does not stop the loop.
    pub async fn start_listening(&self) -> Result<(), NetworkError> {
        let Some(listener) = &self.listener else {
            return Err(NetworkError::SockError(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "listener is not bound",
            )));
        };

        loop {
            let (stream, client_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!("Accept failed: {:?}", err);
                    continue;
                }
            };
            if let Err(err) = stream.set_nodelay(true) {
                debug!("set_nodelay on {} failed: {:?}", client_addr, err);
            }
            debug!("Accepted connection from {}", client_addr);

            let request = SessionRequest {
                stream,
                client_addr,
                timestamp: Utc::now(),
            };
            if self.session_tx.send(request).await.is_err() {
                info!("Session channel closed, gateway stops accepting");
                return Ok(());
            }
        }
    }
}
