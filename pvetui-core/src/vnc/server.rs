//! Local per-session HTTP+WebSocket server that bridges a downstream
//! client to PVE's authenticated upstream VNC WebSocket.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::PveError;

use super::session::VncSession;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = PING_INTERVAL.saturating_mul(2);
/// Read/write deadline reset on every successful frame, distinct from
/// the ping/pong liveness check above: a session that is actively
/// exchanging VNC frames should never be torn down mid-interaction just
/// because it outlived some fixed wall-clock age.
const FRAME_DEADLINE: Duration = Duration::from_secs(30 * 60);

#[derive(Clone)]
struct ServerState {
    session: Arc<VncSession>,
}

/// Binds an OS-assigned ephemeral loopback port and returns it along
/// with a future that serves the session's router until cancelled.
pub async fn bind_ephemeral() -> Result<(u16, TcpListener), PveError> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| PveError::Internal(format!("failed to bind local VNC server: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| PveError::Internal(format!("failed to read bound port: {e}")))?
        .port();
    Ok((port, listener))
}

pub fn serve(listener: TcpListener, session: Arc<VncSession>) -> tokio::task::JoinHandle<()> {
    let state = ServerState { session };
    let router = Router::new()
        .route("/vnc.html", get(vnc_html))
        .route("/websockify", get(websockify))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, router.into_make_service()).await {
            warn!(%err, "vnc local server exited");
        }
    })
}

/// The real graphical client bundle is out of scope; this stands in
/// with the upstream ticket-bearing URL as JSON so a test client can
/// still drive the bridge.
async fn vnc_html(State(state): State<ServerState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "upstream_url": state.session.upstream_url.to_string(),
        "ticket": state.session.ticket,
    }))
}

async fn websockify(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| bridge(socket, state.session))
}

async fn bridge(downstream: WebSocket, session: Arc<VncSession>) {
    let (upstream, _response) = match tokio_tungstenite::connect_async(session.upstream_url.to_string()).await {
        Ok(pair) => pair,
        Err(err) => {
            warn!(%err, "failed to connect to upstream VNC websocket");
            return;
        }
    };

    session.on_client_connected();
    let (mut down_tx, mut down_rx) = downstream.split();
    let (mut up_tx, mut up_rx) = upstream.split();

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    let mut awaiting_pong = false;
    let pong_deadline = tokio::time::sleep(PONG_TIMEOUT);
    tokio::pin!(pong_deadline);
    let frame_deadline = tokio::time::sleep(FRAME_DEADLINE);
    tokio::pin!(frame_deadline);

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong {
                    warn!("vnc session missed pong within deadline, closing bridge");
                    break;
                }
                if down_tx.send(AxumMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
                pong_deadline.as_mut().reset(tokio::time::Instant::now() + PONG_TIMEOUT);
            }
            () = &mut pong_deadline, if awaiting_pong => {
                warn!("vnc session pong deadline elapsed, closing bridge");
                break;
            }
            () = &mut frame_deadline => {
                warn!("vnc session exceeded frame deadline without activity, closing bridge");
                break;
            }
            frame = down_rx.next() => {
                let Some(frame) = frame else { break };
                match frame {
                    Ok(AxumMessage::Pong(_)) => {
                        awaiting_pong = false;
                        session.touch();
                        frame_deadline.as_mut().reset(tokio::time::Instant::now() + FRAME_DEADLINE);
                    }
                    Ok(AxumMessage::Close(_)) => break,
                    Ok(AxumMessage::Binary(data)) => {
                        session.touch();
                        frame_deadline.as_mut().reset(tokio::time::Instant::now() + FRAME_DEADLINE);
                        if up_tx.send(UpstreamMessage::Binary(data.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(AxumMessage::Text(text)) => {
                        session.touch();
                        frame_deadline.as_mut().reset(tokio::time::Instant::now() + FRAME_DEADLINE);
                        if up_tx.send(UpstreamMessage::Text(text.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(AxumMessage::Ping(_)) => {}
                    Err(err) => {
                        warn!(%err, "downstream vnc read failed");
                        break;
                    }
                }
            }
            frame = up_rx.next() => {
                let Some(frame) = frame else { break };
                match frame {
                    Ok(UpstreamMessage::Binary(data)) => {
                        session.touch();
                        frame_deadline.as_mut().reset(tokio::time::Instant::now() + FRAME_DEADLINE);
                        if down_tx.send(AxumMessage::Binary(data.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(UpstreamMessage::Text(text)) => {
                        session.touch();
                        frame_deadline.as_mut().reset(tokio::time::Instant::now() + FRAME_DEADLINE);
                        if down_tx.send(AxumMessage::Text(text.as_str().to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(UpstreamMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "upstream vnc read failed");
                        break;
                    }
                }
            }
        }
    }

    session.on_client_disconnected();
}
