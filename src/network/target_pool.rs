//! Target clients shared between sessions of the same user, asset and account.
//!
//! A [`TargetClient`] is the per-identity handle sessions open their target
//! connections through. Over plain TCP every session still gets its own
//! socket; the shared part is the client's health. Once a dial through it
//! fails the client is stale, the cache evicts it on the next lookup and a
//! fresh client takes its place.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{info, warn};

use super::dialer::TargetDialer;
use crate::bridge::ServerConn;
use crate::error_handling::types::NetworkError;
use crate::session_management::{CachedClient, ClientCache, ClientHandle};

pub struct TargetClient {
    dialer: TargetDialer,
    alive: AtomicBool,
    opened: AtomicUsize,
}

impl TargetClient {
    pub fn new(dialer: TargetDialer) -> Self {
        Self {
            dialer,
            alive: AtomicBool::new(true),
            opened: AtomicUsize::new(0),
        }
    }

    /// Opens one session's connection to the target. A failed dial marks the
    /// client stale.
    pub async fn open_session(&self) -> Result<ServerConn, NetworkError> {
        if !self.is_alive() {
            return Err(NetworkError::ConnectionFailed(io::Error::new(
                io::ErrorKind::NotConnected,
                "target client closed",
            )));
        }
        match self.dialer.dial().await {
            Ok(conn) => {
                self.opened.fetch_add(1, Ordering::SeqCst);
                Ok(conn)
            }
            Err(e) => {
                self.alive.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Sessions opened through this client so far.
    pub fn sessions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl CachedClient for TargetClient {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Hands out target connections through cached [`TargetClient`]s.
#[derive(Clone)]
pub struct TargetPool {
    dialer: TargetDialer,
    cache: Arc<ClientCache<TargetClient>>,
}

impl TargetPool {
    pub fn new(dialer: TargetDialer) -> Self {
        Self {
            dialer,
            cache: ClientCache::new(),
        }
    }

    pub fn cache(&self) -> &Arc<ClientCache<TargetClient>> {
        &self.cache
    }

    /// A target connection for `user@asset` as `account`, plus the handle that
    /// keeps the shared client alive. Hold the handle for the whole session.
    pub async fn connect(
        &self,
        user: &str,
        asset: &str,
        account: &str,
    ) -> Result<(ClientHandle<TargetClient>, ServerConn), NetworkError> {
        let key = ClientCache::<TargetClient>::key(user, asset, account);
        if let Some(handle) = self.cache.acquire(&key) {
            match handle.open_session().await {
                Ok(conn) => return Ok((handle, conn)),
                Err(e) => warn!("Cached client {} failed ({}), dialing a fresh one", key, e),
            }
        }
        let handle = self.cache.insert(&key, TargetClient::new(self.dialer.clone()));
        let conn = handle.open_session().await?;
        info!("New target client {}", key);
        Ok((handle, conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::Protocol;
    use tokio::net::TcpListener;

    async fn listening_pool() -> (TcpListener, TargetPool) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let pool = TargetPool::new(TargetDialer::new(listener.local_addr().unwrap(), Protocol::Telnet));
        (listener, pool)
    }

    #[tokio::test]
    async fn test_sessions_of_one_identity_share_a_client() {
        let (_listener, pool) = listening_pool().await;
        let key = ClientCache::<TargetClient>::key("alice", "web-01", "root");

        let (first, _c1) = pool.connect("alice", "web-01", "root").await.unwrap();
        let (second, _c2) = pool.connect("alice", "web-01", "root").await.unwrap();
        let (_other, _c3) = pool.connect("bob", "web-01", "root").await.unwrap();
        assert_eq!(pool.cache().len(), 2);
        assert_eq!(pool.cache().ref_count(&key), 2);
        assert_eq!(second.sessions_opened(), 2);

        drop(first);
        assert_eq!(pool.cache().ref_count(&key), 1);
        assert!(second.is_alive());
        drop(second);
        assert_eq!(pool.cache().ref_count(&key), 0);
        assert_eq!(pool.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_client_is_replaced_by_a_fresh_one() {
        let (_listener, pool) = listening_pool().await;
        let key = ClientCache::<TargetClient>::key("alice", "web-01", "root");

        let (stale, _c1) = pool.connect("alice", "web-01", "root").await.unwrap();
        stale.close();
        let (fresh, _c2) = pool.connect("alice", "web-01", "root").await.unwrap();
        assert!(fresh.is_alive());
        assert_eq!(fresh.sessions_opened(), 1);
        assert_eq!(pool.cache().ref_count(&key), 1);

        drop(stale);
        assert_eq!(pool.cache().ref_count(&key), 1);
    }

    #[tokio::test]
    async fn test_failed_dial_leaves_nothing_cached() {
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let pool = TargetPool::new(TargetDialer::new(addr, Protocol::Telnet));
        let result = pool.connect("alice", "web-01", "root").await;
        assert!(matches!(result, Err(NetworkError::ConnectionFailed(_))));
        assert!(pool.cache().is_empty());
    }

    #[tokio::test]
    async fn test_dead_target_marks_cached_client_stale() {
        let (listener, pool) = listening_pool().await;
        let (held, _conn) = pool.connect("alice", "web-01", "root").await.unwrap();
        drop(listener);

        assert!(pool.connect("alice", "web-01", "root").await.is_err());
        assert!(!held.is_alive());
        drop(held);
        assert!(pool.cache().is_empty());
    }
}
