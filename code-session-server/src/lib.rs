use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use code_session::{
    ClientEvent, ClientMessage, ConnectionRouter, LanguageStatus, ServerMessage, SessionManager,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown language: {0}")]
    UnknownLanguage(String),
    #[error("Session error: {0}")]
    Session(#[from] code_session::Error),
    #[error("Server error: {0}")]
    ServerError(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ServerError::UnknownLanguage(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Session(code_session::Error::UnsupportedLanguage(ref language)) => (
                StatusCode::NOT_FOUND,
                format!("Unknown language: {}", language),
            ),
            ServerError::Session(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::ServerError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    router: ConnectionRouter,
}

pub fn create_app(manager: Arc<SessionManager>) -> Router {
    let state = AppState {
        router: ConnectionRouter::new(manager),
    };

    let cors = CorsLayer::permissive();

    Router::new()
        .route("/health", get(health_check))
        .route("/languages", get(list_languages))
        .route("/languages/{language}", get(language_status))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), ServerError> {
    info!("Starting code session server on {}", addr);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| ServerError::ServerError(e.to_string()))?;

    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn list_languages(State(state): State<AppState>) -> Json<Vec<LanguageStatus>> {
    Json(state.router.manager().languages().availability())
}

async fn language_status(
    State(state): State<AppState>,
    Path(language): Path<String>,
) -> Result<Json<LanguageStatus>, ServerError> {
    let status = state.router.manager().languages().status(&language)?;
    Ok(Json(status))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.router))
}

/// What an inbound websocket frame means for the connection
#[derive(Debug, PartialEq, Eq)]
enum Inbound {
    Event(ClientEvent),
    Ignore,
    Close,
}

fn decode_frame(message: Message) -> Inbound {
    match message {
        Message::Text(text) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(message) => Inbound::Event(message.into()),
            Err(e) => {
                warn!("Ignoring malformed message: {}", e);
                Inbound::Ignore
            }
        },
        Message::Binary(bytes) => Inbound::Event(ClientEvent::Input(bytes.to_vec())),
        Message::Close(_) => Inbound::Close,
        Message::Ping(_) | Message::Pong(_) => Inbound::Ignore,
    }
}

async fn handle_socket(socket: WebSocket, router: ConnectionRouter) {
    let (connection, mut events) = router.connect();
    let (mut sink, mut stream) = socket.split();
    let id = connection.id();

    let writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match serde_json::to_string(&ServerMessage::from(event)) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode message for {}: {}", id, e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                debug!("Socket of {} closed while sending", id);
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                debug!("Socket of {} failed: {}", id, e);
                break;
            }
        };
        match decode_frame(message) {
            Inbound::Event(event) => {
                if !connection.send(event) {
                    break;
                }
            }
            Inbound::Ignore => {}
            Inbound::Close => break,
        }
    }

    connection.close().await;
    writer.abort();
}
