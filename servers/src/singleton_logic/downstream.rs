use crate::singleton_logic::config::ServerConfig;
use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use axum_server::tls_rustls::RustlsConfig;
use futures_util::{SinkExt, StreamExt};
use lib_common::core::{Attachment, CoordinatorHandle, CoordinatorSnapshot, Inbound};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast;

/// Builds the HTTP surface: `/ws` for connections, `/health` and `/status`.
pub fn router(coordinator: CoordinatorHandle) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(coordinator)
}

pub async fn run(
    config: ServerConfig,
    coordinator: CoordinatorHandle,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = router(coordinator);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    if let Some(tls) = config.tls {
        let tls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .map_err(|e| anyhow::anyhow!("TLS Configuration Error: {}", e))?;
        log::info!("Downstream server listening on wss://{}", addr);

        let handle = axum_server::Handle::new();
        let signal_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
            signal_handle.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        log::info!("Downstream server listening on ws://{}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await.ok();
                log::info!("Downstream server shutting down.");
            })
            .await?;
    }
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(coordinator): State<CoordinatorHandle>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, coordinator))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn status_handler(
    State(coordinator): State<CoordinatorHandle>,
) -> Result<Json<CoordinatorSnapshot>, StatusCode> {
    coordinator
        .snapshot()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

/// One WebSocket is one connection. Inbound frames are forwarded in order;
/// outbound messages are written until the coordinator closes the queue
/// (departure or expiry), at which point the socket is closed too.
///
/// A socket that dies without a Close frame is not reported as a departure:
/// the liveness monitor expires it once its heartbeats stop.
async fn handle_socket(socket: WebSocket, coordinator: CoordinatorHandle) {
    let Attachment { id, mut outbound } = match coordinator.attach().await {
        Ok(attachment) => attachment,
        Err(e) => {
            log::error!("Could not attach connection: {}", e);
            return;
        }
    };
    log::info!("Client {} connected", id);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if coordinator.send(id, Inbound::from_text(text.as_str())).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        let _ = coordinator.send(id, Inbound::Closing);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::debug!("Client {} socket error: {}", id, e);
                        break;
                    }
                    None => {
                        log::debug!("Client {} stream ended without a close frame", id);
                        break;
                    }
                }
            }
            message = outbound.recv() => {
                match message {
                    Some(message) => {
                        let json = match message.to_json() {
                            Ok(json) => json,
                            Err(e) => {
                                log::warn!("Failed to serialize message for {}: {}", id, e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break; // client disconnected
                        }
                    }
                    None => {
                        // The coordinator removed this connection.
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    log::info!("Client {} disconnected", id);
}
