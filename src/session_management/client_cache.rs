//! Cross-session cache of reusable target clients.
//!
//! Sessions for the same user, asset and account may share one underlying
//! client. Every holder owns a [`ClientHandle`]; the client is closed when the
//! last handle is dropped, never earlier.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};

/// A client that can be shared between sessions.
pub trait CachedClient: Send + Sync + 'static {
    /// Whether the client can still carry a new session.
    fn is_alive(&self) -> bool;
    fn close(&self);
}

struct Shared<C> {
    client: C,
    // only changed while the cache map is locked
    refs: AtomicUsize,
}

pub struct ClientCache<C: CachedClient> {
    clients: Mutex<HashMap<String, Arc<Shared<C>>>>,
}

impl<C: CachedClient> Default for ClientCache<C> {
    fn default() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl<C: CachedClient> ClientCache<C> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn key(user: &str, asset: &str, account: &str) -> String {
        format!("{}|{}|{}", user, asset, account)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Shared<C>>>> {
        self.clients.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// A new handle on the cached client for `key`. A client that is no longer
    /// alive is evicted and `None` returned; the caller dials a fresh one.
    pub fn acquire(self: &Arc<Self>, key: &str) -> Option<ClientHandle<C>> {
        let mut clients = self.lock();
        let shared = clients.get(key)?.clone();
        if !shared.client.is_alive() {
            info!("cached client {} is stale, evicting", key);
            clients.remove(key);
            return None;
        }
        let refs = shared.refs.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("cached client {} reused, {} holder(s)", key, refs);
        Some(ClientHandle {
            cache: Arc::clone(self),
            key: key.to_string(),
            shared,
        })
    }

    /// Caches `client` under `key` and returns the first handle on it. A client
    /// already cached under the key stays open for its current holders but is
    /// no longer handed out.
    pub fn insert(self: &Arc<Self>, key: &str, client: C) -> ClientHandle<C> {
        let shared = Arc::new(Shared {
            client,
            refs: AtomicUsize::new(1),
        });
        if self.lock().insert(key.to_string(), shared.clone()).is_some() {
            debug!("cached client {} replaced", key);
        }
        ClientHandle {
            cache: Arc::clone(self),
            key: key.to_string(),
            shared,
        }
    }

    /// Holders of the client cached under `key`.
    pub fn ref_count(&self, key: &str) -> usize {
        self.lock()
            .get(key)
            .map(|s| s.refs.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn release(&self, key: &str, shared: &Arc<Shared<C>>) {
        let last = {
            let mut clients = self.lock();
            let refs = shared.refs.fetch_sub(1, Ordering::SeqCst) - 1;
            debug!("cached client {} released, {} holder(s)", key, refs);
            if refs == 0 && clients.get(key).is_some_and(|s| Arc::ptr_eq(s, shared)) {
                clients.remove(key);
            }
            refs == 0
        };
        if last {
            info!("closing cached client {}", key);
            shared.client.close();
        }
    }
}

/// One session's hold on a cached client. Dropping it releases the hold.
pub struct ClientHandle<C: CachedClient> {
    cache: Arc<ClientCache<C>>,
    key: String,
    shared: Arc<Shared<C>>,
}

impl<C: CachedClient> ClientHandle<C> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<C: CachedClient> Deref for ClientHandle<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.shared.client
    }
}

impl<C: CachedClient> Drop for ClientHandle<C> {
    fn drop(&mut self) {
        self.cache.release(&self.key, &self.shared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct FakeClient {
        dead: AtomicBool,
        closes: AtomicUsize,
    }

    impl CachedClient for Arc<FakeClient> {
        fn is_alive(&self) -> bool {
            !self.dead.load(Ordering::SeqCst)
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_closed_only_when_last_holder_leaves() {
        let cache = ClientCache::new();
        let key = ClientCache::<Arc<FakeClient>>::key("alice", "web-01", "root");
        assert_eq!(key, "alice|web-01|root");
        let client = Arc::new(FakeClient::default());

        let first = cache.insert(&key, client.clone());
        let second = cache.acquire(&key).unwrap();
        assert_eq!(cache.ref_count(&key), 2);

        drop(first);
        assert_eq!(client.closes.load(Ordering::SeqCst), 0);
        assert!(second.is_alive());
        assert_eq!(cache.ref_count(&key), 1);

        drop(second);
        assert_eq!(client.closes.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
        assert!(cache.acquire(&key).is_none());
    }

    #[test]
    fn test_concurrent_sessions_share_one_client() {
        let cache = ClientCache::new();
        let key = ClientCache::<Arc<FakeClient>>::key("bob", "db-01", "admin");
        let client = Arc::new(FakeClient::default());
        let seed = cache.insert(&key, client.clone());

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let key = key.clone();
                let client = client.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let handle = cache.acquire(&key).unwrap();
                        assert_eq!(client.closes.load(Ordering::SeqCst), 0);
                        drop(handle);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(client.closes.load(Ordering::SeqCst), 0);
        assert_eq!(cache.ref_count(&key), 1);
        drop(seed);
        assert_eq!(client.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stale_client_is_evicted() {
        let cache = ClientCache::new();
        let key = ClientCache::<Arc<FakeClient>>::key("carol", "web-02", "root");
        let client = Arc::new(FakeClient::default());
        let handle = cache.insert(&key, client.clone());
        client.dead.store(true, Ordering::SeqCst);

        assert!(cache.acquire(&key).is_none());
        assert!(cache.is_empty());
        // the existing holder still owns it until it lets go
        assert_eq!(client.closes.load(Ordering::SeqCst), 0);
        drop(handle);
        assert_eq!(client.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replaced_client_closes_with_its_own_holders() {
        let cache = ClientCache::new();
        let key = ClientCache::<Arc<FakeClient>>::key("dave", "web-03", "root");
        let old = Arc::new(FakeClient::default());
        let new = Arc::new(FakeClient::default());
        let old_handle = cache.insert(&key, old.clone());
        let new_handle = cache.insert(&key, new.clone());

        drop(old_handle);
        assert_eq!(old.closes.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.ref_count(&key), 1);
        drop(new_handle);
        assert_eq!(new.closes.load(Ordering::SeqCst), 1);
    }
}
