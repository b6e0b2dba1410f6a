use std::collections::HashMap;
use std::convert::Infallible;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value};
use warp::http::StatusCode;
use warp::Filter;

use super::presence_websocket::{self, SocketSettings};
use crate::presence::{Handshake, PresenceHandle};

/// Activity records are small JSON objects
const ACTIVITY_BODY_LIMIT: u64 = 64 * 1024;

/// Every route the server exposes, with permissive CORS.
pub fn presence_routes(
    handle: PresenceHandle,
    settings: SocketSettings,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST"])
        .allow_headers(vec!["content-type"]);

    presence_websocket_route(handle.clone(), settings)
        .or(presence_health_check(handle.clone()))
        .or(presence_snapshot_endpoint(handle.clone()))
        .or(activity_relay_endpoint(handle))
        .with(cors)
}

/// `GET /ws?userId=..&userName=..&role=..&groupCode=..`
pub fn presence_websocket_route(
    handle: PresenceHandle,
    settings: SocketSettings,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_presence(handle))
        .map(move |ws: warp::ws::Ws, query: HashMap<String, String>, handle: PresenceHandle| {
            let handshake = Handshake::from_query(&query);
            ws.on_upgrade(move |websocket| {
                presence_websocket::handle_presence_websocket(websocket, handle, handshake, settings)
            })
        })
}

pub fn presence_health_check(
    handle: PresenceHandle,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "health")
        .and(warp::get())
        .and(with_presence(handle))
        .and_then(|handle: PresenceHandle| async move {
            let reply = match handle.stats().await {
                Ok(stats) => warp::reply::with_status(
                    warp::reply::json(&serde_json::json!({
                        "status": "ok",
                        "service": "Exam Presence Server",
                        "version": env!("CARGO_PKG_VERSION"),
                        "time": unix_time(),
                        "connections": stats.connections,
                        "participants": stats.participants
                    })),
                    StatusCode::OK,
                ),
                Err(e) => unavailable(&e.to_string()),
            };
            Ok::<_, Infallible>(reply)
        })
}

/// `GET /api/presence` returns the same list `online_students` carries.
pub fn presence_snapshot_endpoint(
    handle: PresenceHandle,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "presence")
        .and(warp::get())
        .and(with_presence(handle))
        .and_then(|handle: PresenceHandle| async move {
            let reply = match handle.snapshot().await {
                Ok(participants) => {
                    warp::reply::with_status(warp::reply::json(&participants), StatusCode::OK)
                }
                Err(e) => unavailable(&e.to_string()),
            };
            Ok::<_, Infallible>(reply)
        })
}

/// `POST /api/activity` relays a record-store activity entry as `activity_update`.
pub fn activity_relay_endpoint(
    handle: PresenceHandle,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "activity")
        .and(warp::post())
        .and(warp::body::content_length_limit(ACTIVITY_BODY_LIMIT))
        .and(warp::body::json::<Map<String, Value>>())
        .and(with_presence(handle))
        .map(|activity: Map<String, Value>, handle: PresenceHandle| {
            match handle.relay_activity(activity) {
                Ok(()) => warp::reply::with_status(
                    warp::reply::json(&serde_json::json!({ "success": true })),
                    StatusCode::ACCEPTED,
                ),
                Err(e) => unavailable(&e.to_string()),
            }
        })
}

fn unavailable(reason: &str) -> warp::reply::WithStatus<warp::reply::Json> {
    tracing::error!(reason = %reason, "Presence dispatcher unavailable");
    warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "success": false, "error": reason })),
        StatusCode::SERVICE_UNAVAILABLE,
    )
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

fn with_presence(
    handle: PresenceHandle,
) -> impl Filter<Extract = (PresenceHandle,), Error = Infallible> + Clone {
    warp::any().map(move || handle.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::presence::PresenceService;
    use std::time::Duration;

    fn spawn_handle() -> PresenceHandle {
        PresenceHandle::spawn(PresenceService::new(Box::new(StaticDirectory::empty())))
    }

    fn settings() -> SocketSettings {
        SocketSettings {
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let routes = presence_routes(spawn_handle(), settings());

        let resp = warp::test::request().method("GET").path("/api/health").reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["participants"], 0);
    }

    #[tokio::test]
    async fn test_presence_endpoint_starts_empty() {
        let routes = presence_routes(spawn_handle(), settings());

        let resp = warp::test::request().method("GET").path("/api/presence").reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body().as_ref(), b"[]");
    }

    #[tokio::test]
    async fn test_activity_endpoint_accepts_object() {
        let routes = presence_routes(spawn_handle(), settings());

        let resp = warp::test::request()
            .method("POST")
            .path("/api/activity")
            .json(&serde_json::json!({ "activity": "registration", "userName": "Ali" }))
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_activity_endpoint_rejects_non_object() {
        let routes = presence_routes(spawn_handle(), settings());

        let resp = warp::test::request()
            .method("POST")
            .path("/api/activity")
            .json(&serde_json::json!(["not", "an", "object"]))
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_websocket_receives_presence_on_connect() {
        let routes = presence_routes(spawn_handle(), settings());

        let mut client = warp::test::ws()
            .path("/ws?userId=s1&userName=Ali&groupCode=G1")
            .handshake(routes)
            .await
            .expect("handshake");

        let message = client.recv().await.expect("presence frame");
        let frame: Value = serde_json::from_str(message.to_str().unwrap()).unwrap();
        assert_eq!(frame["event"], "online_students");
        assert_eq!(frame["data"][0]["id"], "s1");
        assert_eq!(frame["data"][0]["displayName"], "Ali");
    }
}
