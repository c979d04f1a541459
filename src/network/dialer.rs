use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use tokio::net::TcpStream;

use super::telnet::TelnetControl;
use crate::bridge::{RawControl, ServerConn, ServerControl};
use crate::configuration::types::Protocol;
use crate::error_handling::types::NetworkError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens target connections for new sessions.
#[derive(Debug, Clone)]
pub struct TargetDialer {
    address: SocketAddr,
    protocol: Protocol,
    timeout: Duration,
}

impl TargetDialer {
    pub fn new(address: SocketAddr, protocol: Protocol) -> Self {
        Self {
            address,
            protocol,
            timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub async fn dial(&self) -> Result<ServerConn, NetworkError> {
        let stream = match tokio::time::timeout(self.timeout, TcpStream::connect(self.address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                error!("[!] Unable to reach target {}: {:?}", self.address, err);
                return Err(NetworkError::ConnectionFailed(err));
            }
            Err(_) => {
                error!("[!] Timed out reaching target {}", self.address);
                return Err(NetworkError::ConnectionFailed(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                )));
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!("set_nodelay on {} failed: {:?}", self.address, err);
        }
        let control: Arc<dyn ServerControl> = match self.protocol {
            Protocol::Telnet => Arc::new(TelnetControl),
            _ => Arc::new(RawControl),
        };
        let (reader, writer) = stream.into_split();
        Ok(ServerConn::new(reader, writer, control, self.protocol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::WindowSize;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_picks_control_by_protocol() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let telnet = TargetDialer::new(addr, Protocol::Telnet).dial().await.unwrap();
        assert_eq!(telnet.protocol, Protocol::Telnet);
        assert!(telnet.control.keepalive().unwrap().is_some());

        let mysql = TargetDialer::new(addr, Protocol::Mysql).dial().await.unwrap();
        assert!(mysql.control.resize(WindowSize::default()).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_target() {
        // bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let result = TargetDialer::new(addr, Protocol::Ssh).dial().await;
        assert!(matches!(result, Err(NetworkError::ConnectionFailed(_))));
    }
}
