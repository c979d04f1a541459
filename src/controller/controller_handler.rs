use crate::bridge::{BridgeDeps, BridgeOptions, SessionBridge, UserConn, WindowSize};
use crate::configuration::config::Config;
use crate::configuration::types::StorageKind;
use crate::error_handling::types::*;
use crate::filter::FilterEngine;
use crate::network::{NetworkListener, SessionRequest, TargetDialer, TargetPool};
use crate::session_management::{Session, SessionRegistry};
use crate::storage::{CommandStorage, FileStorage, NullStorage, ReplayStorage};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

const SESSION_CHANNEL_SIZE: usize = 100;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Wires the configuration into a running gateway: storages, the session
/// registry, the accept loop, the admin API and one bridge task per user.
pub struct Controller {
    pub config: Config,
    registry: Arc<SessionRegistry>,
    deps: BridgeDeps,
    bridge_opts: BridgeOptions,
    targets: TargetPool,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing controller");
        let registry = Arc::new(SessionRegistry::new());

        let filter = FilterEngine::new(config.filter.rules.clone()).map_err(ConfigError::from)?;
        let replay_storage: Arc<dyn ReplayStorage> = match config.storage.replay {
            StorageKind::File => Arc::new(FileStorage::new(&config.storage.replay_path)?),
            StorageKind::Null => Arc::new(NullStorage),
        };
        let replay_fallback: Option<Arc<dyn ReplayStorage>> = match &config.storage.fallback_path {
            Some(path) => Some(Arc::new(FileStorage::new(path)?)),
            None => None,
        };
        let command_storage: Arc<dyn CommandStorage> = match config.storage.command {
            StorageKind::File => Arc::new(FileStorage::new(&config.storage.command_path)?),
            StorageKind::Null => Arc::new(NullStorage),
        };
        debug!(
            "Storages: replay={} command={} fallback={}",
            replay_storage.type_name(),
            command_storage.type_name(),
            replay_fallback.as_ref().map(|f| f.type_name()).unwrap_or("none")
        );

        let mut deps = BridgeDeps::new(registry.clone());
        deps.filter = Arc::new(filter);
        deps.replay_storage = replay_storage;
        deps.replay_fallback = replay_fallback;
        deps.command_storage = command_storage;

        let target_addr: SocketAddr = config
            .target
            .address
            .parse()
            .map_err(|e| ConfigError::BadAddress(format!("{}: {}", config.target.address, e)))?;
        let targets = TargetPool::new(TargetDialer::new(target_addr, config.target.protocol));

        Ok(Self {
            bridge_opts: BridgeOptions::from_config(&config),
            config,
            registry,
            deps,
            targets,
        })
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub fn targets(&self) -> &TargetPool {
        &self.targets
    }

    /// Runs until Ctrl-C or until the accept loop stops, then ends every
    /// live session.
    pub async fn run(&mut self) -> Result<(), ControllerError> {
        info!("Starting controller");
        let (tx, mut rx) = mpsc::channel(SESSION_CHANNEL_SIZE);
        let mut listener = NetworkListener::new(tx);
        listener.bind(self.config.listen_addr()?).await?;
        let listen_task = tokio::spawn(async move { listener.start_listening().await });

        if self.config.admin.enabled {
            let addr = self.config.admin_addr()?;
            let server = crate::web_interface::WebServer::new(self.registry.clone());
            tokio::spawn(async move { server.start(addr).await });
        }

        let mut sessions = JoinSet::new();
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(request) => self.handle_session(request, &mut sessions),
                    None => {
                        warn!("Gateway listener stopped");
                        break;
                    }
                },
                Some(done) = sessions.join_next() => {
                    if let Err(e) = done {
                        error!("Session task failed: {:?}", e);
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        listen_task.abort();
        self.shutdown(&mut sessions).await;
        Ok(())
    }

    /// Dials the target for an accepted user and bridges the two on a new task.
    pub fn handle_session(&self, request: SessionRequest, sessions: &mut JoinSet<()>) {
        let targets = self.targets.clone();
        let deps = self.deps.clone();
        let opts = self.bridge_opts.clone();
        let target = self.config.target.clone();
        let window = WindowSize {
            width: self.config.session.width,
            height: self.config.session.height,
        };
        let term = self.config.session.term.clone();

        sessions.spawn(async move {
            let SessionRequest {
                mut stream,
                client_addr,
                ..
            } = request;
            let user_label = client_addr.ip().to_string();
            let asset = if target.name.is_empty() { target.address.clone() } else { target.name };
            // the client handle stays held until the bridge returns
            let (client, server) = match targets.connect(&user_label, &asset, &target.account).await {
                Ok(connected) => connected,
                Err(e) => {
                    warn!("Dropping user {}: {}", client_addr, e);
                    let _ = stream.write_all(b"\r\nUnable to reach target, disconnecting\r\n").await;
                    let _ = stream.shutdown().await;
                    return;
                }
            };

            let session = Session::new(
                user_label,
                asset,
                target.account,
                target.org_id,
                client_addr,
                target.protocol,
            );
            let (reader, writer) = stream.into_split();
            let mut user = UserConn::new(reader, writer, session.user.clone(), client_addr);
            user.window = window;
            user.term = term;

            let bridge = SessionBridge::new(session, opts, deps);
            let id = bridge.session_id();
            if let Err(e) = bridge.bridge(user, server).await {
                warn!("[{}] session ended with error: {}", id, e);
            }
            drop(client);
        });
    }

    /// Kills every live session and waits for the bridges to wind down.
    pub async fn shutdown(&self, sessions: &mut JoinSet<()>) {
        let alive = self.registry.alive_ids();
        info!("Shutting down, ending {} live session(s)", alive.len());
        for id in alive {
            self.registry.kill(id);
        }
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(done) = sessions.join_next().await {
                if let Err(e) = done {
                    error!("Session task failed: {:?}", e);
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!("Sessions did not end in time, aborting {}", sessions.len());
            sessions.abort_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::TargetClient;
    use crate::session_management::ClientCache;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    fn null_config(target: SocketAddr) -> Config {
        let mut config = Config::default();
        config.storage.replay = StorageKind::Null;
        config.storage.command = StorageKind::Null;
        config.target.address = target.to_string();
        config
    }

    #[test]
    fn test_new_builds_file_storages() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.replay_path = dir.path().join("replays").to_string_lossy().to_string();
        config.storage.command_path = dir.path().join("commands").to_string_lossy().to_string();
        config.storage.fallback_path = Some(dir.path().join("fallback").to_string_lossy().to_string());

        let controller = Controller::new(config).unwrap();
        assert_eq!(controller.deps.replay_storage.type_name(), "file");
        assert!(controller.deps.replay_fallback.is_some());
        assert!(dir.path().join("commands").join("commands").is_dir());
        assert!(controller.registry().is_empty());
    }

    #[test]
    fn test_new_rejects_bad_target() {
        let mut config = null_config("127.0.0.1:23".parse().unwrap());
        config.target.address = "nowhere".to_string();
        assert!(matches!(
            Controller::new(config),
            Err(ControllerError::ConfigurationError(ConfigError::BadAddress(_)))
        ));
    }

    #[tokio::test]
    async fn test_handle_session_bridges_user_to_target() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let controller = Controller::new(null_config(target.local_addr().unwrap())).unwrap();
        let registry = controller.registry();

        let gateway = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut user = TcpStream::connect(gateway.local_addr().unwrap()).await.unwrap();
        let (stream, client_addr) = gateway.accept().await.unwrap();

        let mut sessions = JoinSet::new();
        controller.handle_session(
            SessionRequest {
                stream,
                client_addr,
                timestamp: chrono::Utc::now(),
            },
            &mut sessions,
        );
        let (mut target_side, _) = target.accept().await.unwrap();

        user.write_all(b"id").await.unwrap();
        let mut buf = [0u8; 2];
        target_side.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"id");

        let live = registry.sessions();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].user, "127.0.0.1");
        assert_eq!(live[0].asset, "localhost");
        let key = ClientCache::<TargetClient>::key("127.0.0.1", "localhost", &controller.config.target.account);
        assert_eq!(controller.targets().cache().ref_count(&key), 1);

        controller.shutdown(&mut sessions).await;
        assert!(registry.is_empty());
        assert!(sessions.is_empty());
        assert!(controller.targets().cache().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_target_disconnects_user() {
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let controller = Controller::new(null_config(dead)).unwrap();

        let gateway = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut user = TcpStream::connect(gateway.local_addr().unwrap()).await.unwrap();
        let (stream, client_addr) = gateway.accept().await.unwrap();
        let mut sessions = JoinSet::new();
        controller.handle_session(
            SessionRequest {
                stream,
                client_addr,
                timestamp: chrono::Utc::now(),
            },
            &mut sessions,
        );

        let mut shown = String::new();
        user.read_to_string(&mut shown).await.unwrap();
        assert!(shown.contains("Unable to reach target"));
        sessions.join_next().await.unwrap().unwrap();
    }
}
