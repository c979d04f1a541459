//! The two ends a bridge joins.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::configuration::types::Protocol;
use crate::error_handling::types::BridgeError;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u16,
    pub height: u16,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self { width: 80, height: 24 }
    }
}

/// The user's side of a session.
pub struct UserConn {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    /// Window changes reported by the user's terminal, if the transport has any.
    pub resize: Option<mpsc::Receiver<WindowSize>>,
    pub window: WindowSize,
    pub term: String,
    pub user: String,
    pub remote_addr: SocketAddr,
}

impl UserConn {
    pub fn new<R, W>(reader: R, writer: W, user: impl Into<String>, remote_addr: SocketAddr) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            resize: None,
            window: WindowSize::default(),
            term: "xterm".to_string(),
            user: user.into(),
            remote_addr,
        }
    }
}

/// Out-of-band operations on the target connection.
///
/// Implementations either act on their transport directly and return `None`,
/// or return bytes the bridge writes in-band to the target.
pub trait ServerControl: Send + Sync {
    fn resize(&self, size: WindowSize) -> Result<Option<Vec<u8>>, BridgeError>;
    fn keepalive(&self) -> Result<Option<Vec<u8>>, BridgeError>;
}

/// A plain byte stream with no control channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawControl;

impl ServerControl for RawControl {
    fn resize(&self, _size: WindowSize) -> Result<Option<Vec<u8>>, BridgeError> {
        Ok(None)
    }

    fn keepalive(&self) -> Result<Option<Vec<u8>>, BridgeError> {
        Ok(None)
    }
}

/// The target's side of a session.
pub struct ServerConn {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub control: Arc<dyn ServerControl>,
    pub protocol: Protocol,
}

impl ServerConn {
    pub fn new<R, W>(reader: R, writer: W, control: Arc<dyn ServerControl>, protocol: Protocol) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            control,
            protocol,
        }
    }
}
