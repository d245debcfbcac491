use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::CoverCommand;
use crate::engine::DoorId;
use crate::engine::DoorSnapshot;
use crate::engine::EngineError;
use crate::engine::EngineHandle;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    garages: usize,
}

/// Response for accepted cover commands
#[derive(Serialize)]
struct CommandResponse {
    door: DoorId,
    command: CoverCommand,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    engine: EngineHandle,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            garages: state.engine.snapshot().doors.len(),
        }),
    )
}

/// Handler for GET /v1/garages
#[tracing::instrument(skip(state))]
async fn list_garages(State(state): State<Arc<AppState>>) -> Json<Vec<DoorSnapshot>> {
    let snapshot = state.engine.snapshot();
    Json(snapshot.doors.values().cloned().collect())
}

/// Handler for GET /v1/garages/:id
#[tracing::instrument(skip(state))]
async fn get_garage(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let door_id = DoorId::from_name(&id);
    match state.engine.door(&door_id) {
        Some(door) => (StatusCode::OK, Json(door)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            EngineError::UnknownDoor(door_id),
        ),
    }
}

/// Handler for POST /v1/garages/:id/:command
///
/// Commands are queued to the engine and answered with 202. Whether the
/// door accepts the command is only visible in its published state.
#[tracing::instrument(skip(state))]
async fn cover_command(
    State(state): State<Arc<AppState>>,
    Path((id, command)): Path<(String, String)>,
) -> Response {
    let Ok(command) = command.parse::<CoverCommand>() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("unknown cover command '{}'", command),
        );
    };
    let door_id = DoorId::from_name(&id);

    match state.engine.cover_command(door_id.clone(), command) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(CommandResponse {
                door: door_id,
                command,
            }),
        )
            .into_response(),
        Err(e @ EngineError::UnknownDoor(_)) => error_response(StatusCode::NOT_FOUND, e),
        Err(e @ EngineError::NotRunning) => error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/garages", get(list_garages))
        .route("/v1/garages/:id", get(get_garage))
        .route("/v1/garages/:id/:command", post(cover_command))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// This function will bind to the specified address and serve the API endpoints.
/// It will run until the provided shutdown signal is triggered.
///
/// # Arguments
/// * `listen` - The IP address to listen on (e.g., "127.0.0.1")
/// * `port` - The port to listen on (e.g., 8565)
/// * `engine` - Handle used to read door state and queue cover commands
/// * `shutdown_rx` - A oneshot receiver that will trigger graceful shutdown
///
/// # Returns
/// Returns Ok(()) if the server shuts down gracefully, or an error if startup fails
pub async fn serve(
    listen: String,
    port: u16,
    engine: EngineHandle,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let version = env!("CARGO_PKG_VERSION");

    let state = Arc::new(AppState { version, engine });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use axum::body::Body;
    use axum::http::Request;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use super::*;
    use crate::engine::ControlMessage;
    use crate::engine::CoverState;
    use crate::engine::DoorState;
    use crate::engine::Snapshot;
    use crate::engine::state::CoverSnapshot;
    use crate::engine::state::DoorAttributes;

    fn door(name: &str, state: DoorState) -> DoorSnapshot {
        let id = DoorId::from_name(name);
        DoorSnapshot {
            sensor_entity_id: id.sensor_entity_id(),
            cover_entity_id: id.cover_entity_id(),
            id,
            name: name.to_string(),
            state,
            available: true,
            cover: CoverSnapshot {
                state: CoverState::from(state),
                available: true,
                is_closed: Some(state == DoorState::Closed),
                is_opening: state == DoorState::Opening,
                icon: "mdi:garage",
            },
            attributes: DoorAttributes {
                open_sensor: "binary_sensor.garage_open".to_string(),
                closed_sensor: "binary_sensor.garage_closed".to_string(),
                toggle_entity: "switch.garage_relay".to_string(),
                opening_duration: 35,
            },
        }
    }

    fn router() -> (Router, mpsc::UnboundedReceiver<ControlMessage>) {
        let main = door("Main Garage", DoorState::Closed);
        let snapshot = Snapshot {
            doors: BTreeMap::from([(main.id.clone(), main)]),
        };
        let (engine, control_rx) = EngineHandle::detached(snapshot);
        let state = Arc::new(AppState {
            version: "test",
            engine,
        });
        (create_router(state), control_rx)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let (app, _rx) = router();
        let response = app.oneshot(get("/v1/ping")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_list_garages() {
        let (app, _rx) = router();
        let response = app.oneshot(get("/v1/garages")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body[0]["id"], "main_garage");
        assert_eq!(body[0]["state"], "closed");
        assert_eq!(body[0]["cover_entity_id"], "cover.smart_garage_main_garage");
    }

    #[tokio::test]
    async fn test_get_garage() {
        let (app, _rx) = router();
        let response = app.clone().oneshot(get("/v1/garages/main_garage")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["cover"]["icon"], "mdi:garage");

        let response = app.oneshot(get("/v1/garages/shed")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cover_command_is_queued() {
        let (app, mut rx) = router();
        let response = app
            .oneshot(post("/v1/garages/main_garage/open"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        match rx.try_recv().unwrap() {
            ControlMessage::Cover { door_id, command } => {
                assert_eq!(door_id, DoorId::from_name("main_garage"));
                assert_eq!(command, CoverCommand::Open);
            }
            other => panic!("unexpected control message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cover_command_errors() {
        let (app, rx) = router();

        let response = app
            .clone()
            .oneshot(post("/v1/garages/main_garage/jump"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(post("/v1/garages/shed/open"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        drop(rx);
        let response = app
            .oneshot(post("/v1/garages/main_garage/close"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
