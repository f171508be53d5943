use crate::core::EngineEvent;
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};
use tunes_proto::protocol::{Command, EngineStatus};

#[derive(Clone)]
struct HttpState {
    event_tx: mpsc::Sender<EngineEvent>,
}

pub fn router(event_tx: mpsc::Sender<EngineEvent>) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/next", get(next).post(next))
        .route("/api/stop", get(stop).post(stop))
        .route("/api/play", get(play).post(play))
        .route("/api/quit", get(quit).post(quit))
        .with_state(HttpState { event_tx })
}

pub fn start_server(
    bind_address: String,
    port: u16,
    event_tx: mpsc::Sender<EngineEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(event_tx);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_state(State(state): State<HttpState>) -> Result<Json<EngineStatus>, StatusCode> {
    let (reply_tx, reply_rx) = oneshot::channel();
    state
        .event_tx
        .send(EngineEvent::StatusRequest(reply_tx))
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    let status = reply_rx.await.map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(status))
}

async fn send_command(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.event_tx.send(EngineEvent::Command(cmd)).await.is_err() {
        error!("Failed to send {:?} command", cmd);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn next(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Next).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Stop).await
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Play).await
}

async fn quit(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Quit).await
}
