// src/socket_handlers.rs
use super::{
    error::{AppError, AuthError},
    registry::OutboundRx,
    types::{ConnectionId, SubjectId},
    ServerState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

// how long a closing connection may spend flushing queued frames
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
const MIN_HEARTBEAT: Duration = Duration::from_millis(100);
// heartbeats a peer may leave unanswered before it is considered gone
const MISSED_HEARTBEATS: u32 = 2;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

/// Authenticates during the handshake. A missing or bad token is answered with
/// 401 and the socket is never upgraded.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<ServerState>,
) -> Result<Response, AppError> {
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;
    let subject = state.verifier.verify(&token)?;
    Ok(ws.on_upgrade(move |socket| on_socket_connect(socket, subject, state)))
}

pub async fn on_socket_connect(socket: WebSocket, subject: SubjectId, state: ServerState) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel(state.config.outbound_buffer.max(1));
    let (session, guard) = state.relay.connect(subject, tx).await;
    info!("🔌 [WS] Client connected: {} as {}", session.id, session.subject);

    let heartbeat = state.config.heartbeat_interval.max(MIN_HEARTBEAT);
    let mut writer = tokio::spawn(write_loop(sink, rx, heartbeat, session.id));
    let mut writer_done = false;

    // any inbound frame, pongs included, counts as a sign of life
    let idle_limit = heartbeat * MISSED_HEARTBEATS;
    let mut last_seen = Instant::now();
    let mut liveness = interval(heartbeat);
    liveness.tick().await;

    loop {
        tokio::select! {
            // frames already buffered are read before the liveness check judges the peer
            biased;
            incoming = stream.next() => {
                if matches!(incoming, Some(Ok(_))) {
                    last_seen = Instant::now();
                }
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        state.relay.handle_text(&session, text.as_str()).await
                    }
                    Some(Ok(Message::Binary(bin))) => {
                        debug!("[WS] Ignoring {} binary bytes from {}", bin.len(), session.id);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    // pongs only refresh `last_seen`; axum answers pings itself
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("⚠️ [WS] Transport error on {}: {}", session.id, e);
                        break;
                    }
                }
            }
            _ = liveness.tick() => {
                if last_seen.elapsed() > idle_limit {
                    warn!(
                        "💀 [WS] No response from {} for {:?}, dropping connection",
                        session.id, idle_limit
                    );
                    break;
                }
            }
            _ = &mut writer, if !writer_done => {
                writer_done = true;
                break;
            }
        }
    }

    let rooms = guard.release().await;
    info!("🔌 [WS] Client disconnected: {} ({} room(s) refreshed)", session.id, rooms);
    drop(session);

    if !writer_done && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
}

// Exits on the first failed write. Dropping `rx` then marks the connection
// non-writable for every later fan-out.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: OutboundRx,
    heartbeat: Duration,
    id: ConnectionId,
) {
    let mut ticker = interval(heartbeat);
    ticker.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(json) => {
                    if let Err(e) = sink.send(Message::Text((&*json).into())).await {
                        warn!("⚠️ [WS] Write to {} failed: {}", id, e);
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    warn!("⚠️ [WS] Heartbeat to {} failed: {}", id, e);
                    break;
                }
            }
        }
    }
}
