use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use warp::Filter;

use super::routes::{alive_sessions_route, kill_session_route, list_sessions_route};
use crate::session_management::SessionRegistry;

/// Admin HTTP API over the live session registry.
pub struct WebServer {
    registry: Arc<SessionRegistry>,
}

impl WebServer {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Serves the API on `addr` until the task is dropped.
    pub async fn start(&self, addr: SocketAddr) {
        let routes = list_sessions_route(self.registry.clone())
            .or(alive_sessions_route(self.registry.clone()))
            .or(kill_session_route(self.registry.clone()));

        info!("Admin API listening on {}", addr);
        warp::serve(routes).run(addr).await;
    }
}
