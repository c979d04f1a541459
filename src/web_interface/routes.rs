use std::sync::Arc;

use log::info;
use uuid::Uuid;
use warp::reply::Response;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{ApiError, KillResponse, SessionResponse};
use crate::session_management::SessionRegistry;

pub fn list_sessions(registry: &SessionRegistry) -> Response {
    let list: Vec<SessionResponse> = registry.sessions().iter().map(SessionResponse::from).collect();
    reply::with_status(reply::json(&list), StatusCode::OK).into_response()
}

pub fn alive_sessions(registry: &SessionRegistry) -> Response {
    reply::with_status(reply::json(&registry.alive_ids()), StatusCode::OK).into_response()
}

pub fn kill_session(registry: &SessionRegistry, id_str: &str) -> Response {
    let id = match Uuid::parse_str(id_str) {
        Ok(u) => u,
        Err(_) => {
            return reply::with_status(reply::json(&ApiError::new("Invalid session id")), StatusCode::BAD_REQUEST)
                .into_response();
        }
    };
    if registry.kill(id) {
        info!("[{}] killed through the admin API", id);
        reply::with_status(reply::json(&KillResponse { id, killed: true }), StatusCode::OK).into_response()
    } else {
        reply::with_status(reply::json(&ApiError::new("Session not found")), StatusCode::NOT_FOUND)
            .into_response()
    }
}

/// GET /sessions
pub fn list_sessions_route(
    registry: Arc<SessionRegistry>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("sessions")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || list_sessions(&registry))
}

/// GET /sessions/alive
pub fn alive_sessions_route(
    registry: Arc<SessionRegistry>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("sessions" / "alive")
        .and(warp::get())
        .map(move || alive_sessions(&registry))
}

/// DELETE /sessions/:id
pub fn kill_session_route(
    registry: Arc<SessionRegistry>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("sessions" / String)
        .and(warp::delete())
        .map(move |id_str: String| kill_session(&registry, &id_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{CancelToken, Room};
    use crate::configuration::types::Protocol;
    use crate::session_management::{ActiveSession, Session};

    fn registry_with_session() -> (SessionRegistry, Uuid, CancelToken) {
        let registry = SessionRegistry::new();
        let session = Session::new("alice", "web-01", "root", "default", "127.0.0.1:40000".parse().unwrap(), Protocol::Ssh);
        let id = session.id;
        let cancel = CancelToken::new();
        registry
            .register(ActiveSession {
                room: Room::new(id),
                session,
                cancel: cancel.clone(),
            })
            .unwrap();
        (registry, id, cancel)
    }

    #[test]
    fn test_kill_status_codes() {
        let (registry, id, cancel) = registry_with_session();
        assert_eq!(kill_session(&registry, "not-a-uuid").status(), StatusCode::BAD_REQUEST);
        assert_eq!(kill_session(&registry, &Uuid::new_v4().to_string()).status(), StatusCode::NOT_FOUND);
        assert!(!cancel.is_cancelled());
        assert_eq!(kill_session(&registry, &id.to_string()).status(), StatusCode::OK);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_listing() {
        let (registry, _, _) = registry_with_session();
        assert_eq!(list_sessions(&registry).status(), StatusCode::OK);
        assert_eq!(alive_sessions(&registry).status(), StatusCode::OK);
        let empty = SessionRegistry::new();
        assert_eq!(list_sessions(&empty).status(), StatusCode::OK);
    }
}
