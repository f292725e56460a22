//! WebSocket endpoint for bridge clients.
//!
//! `GET /channels/{channel_id}` upgrades, the first frame must be a
//! `connect` request, and the session then lives until the socket closes
//! or a newer connection for the same account replaces it.

use std::{sync::Arc, time::Duration};

use {
    axum::{
        Json, Router,
        extract::{
            Path, State, WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::get,
    },
    futures::{SinkExt, stream::StreamExt},
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
    volery_channels::SharedChannels,
};

use crate::{
    protocol::{
        self, BridgeFrame, ConnectParams, ConnectResult, HANDSHAKE_TIMEOUT_MS, MAX_FRAME_BYTES,
        PROTOCOL_VERSION, RequestId, ResponseFrame, RpcError, error_codes, methods,
    },
    registry::{BridgeEvent, BridgeRegistry},
    session::BridgeSession,
};

/// Everything the WebSocket handlers need, owned by the composition root.
pub struct BridgeServerState {
    pub registry: Arc<BridgeRegistry>,
    pub channels: SharedChannels,
    /// Shared secret clients must present in `connect`. `None` accepts
    /// any client.
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
    /// Keep-alive interval; zero disables pings.
    pub ping_interval: Duration,
}

/// Assemble the bridge routes.
pub fn router(state: Arc<BridgeServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/channels/{channel_id}", get(upgrade))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn upgrade(
    ws: WebSocketUpgrade,
    Path(channel_id): Path<String>,
    State(state): State<Arc<BridgeServerState>>,
) -> Response {
    if !state.channels.contains(&channel_id).await {
        warn!(channel = %channel_id, "bridge upgrade for unknown channel refused");
        return StatusCode::NOT_FOUND.into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(socket, state, channel_id))
}

/// One connection, handshake through cleanup.
async fn handle_connection(socket: WebSocket, state: Arc<BridgeServerState>, channel_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (writer, mut writer_rx) = mpsc::unbounded_channel::<String>();

    let write_task = tokio::spawn(async move {
        while let Some(frame) = writer_rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // ── Handshake ────────────────────────────────────────────────────────

    let connect = tokio::time::timeout(
        Duration::from_millis(HANDSHAKE_TIMEOUT_MS),
        wait_for_connect(&mut ws_rx),
    )
    .await;
    let (request_id, params) = match connect {
        Ok(Ok(handshake)) => handshake,
        Ok(Err(err)) => {
            warn!(channel = %channel_id, %err, "bridge handshake failed");
            write_task.abort();
            return;
        },
        Err(_) => {
            warn!(channel = %channel_id, "bridge handshake timed out");
            write_task.abort();
            return;
        },
    };

    if let Some(expected) = state.auth_token.as_deref() {
        if params.token.as_deref() != Some(expected) {
            warn!(
                channel = %channel_id,
                account = %params.account_id,
                "bridge client rejected: bad token"
            );
            send_frame(
                &writer,
                &ResponseFrame::err(
                    request_id,
                    RpcError::new(error_codes::UNAUTHORIZED, "invalid token"),
                ),
            );
            // Give the writer a moment to flush the rejection.
            tokio::task::yield_now().await;
            write_task.abort();
            return;
        }
    }

    let session = Arc::new(BridgeSession::new(
        &channel_id,
        &params.account_id,
        writer.clone(),
        state.request_timeout,
    ));
    session.set_client(params.client.clone());
    session.touch();

    let hello = ConnectResult {
        protocol: PROTOCOL_VERSION,
        server: format!("volery/{}", env!("CARGO_PKG_VERSION")),
        keep_alive_ms: state.ping_interval.as_millis() as u64,
    };
    match serde_json::to_value(&hello) {
        Ok(result) => send_frame(&writer, &ResponseFrame::ok(request_id, result)),
        Err(err) => {
            warn!(%err, "could not encode connect result");
            write_task.abort();
            return;
        },
    }

    // Insert the replacement before the old session closes; the account
    // never has a gap with no registered session.
    state.registry.insert(session.clone());
    info!(
        channel = %channel_id,
        account = %params.account_id,
        conn = session.conn_id(),
        client = params.client.as_deref().unwrap_or("unknown"),
        "bridge client connected"
    );
    state.registry.emit(BridgeEvent::Status {
        channel_id: channel_id.clone(),
        account_id: params.account_id.clone(),
        state: "connected".into(),
    });

    let ping_task = spawn_ping(session.clone(), state.ping_interval);

    // ── Read loop ────────────────────────────────────────────────────────

    let closed = session.closed();
    loop {
        let message = tokio::select! {
            // Cancelled: replaced by a newer connection or shutting down.
            () = closed.cancelled() => break,
            message = ws_rx.next() => message,
        };
        let text = match message {
            Some(Ok(Message::Text(text))) => text.to_string(),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                debug!(conn = session.conn_id(), %err, "bridge read error");
                break;
            },
        };
        if text.len() > MAX_FRAME_BYTES {
            warn!(
                conn = session.conn_id(),
                bytes = text.len(),
                "oversized bridge frame; closing connection"
            );
            break;
        }

        let frames = protocol::parse_frames(&text);
        if frames.is_empty() {
            warn!(conn = session.conn_id(), "unparseable bridge frame; discarding");
            continue;
        }
        session.touch();
        for frame in frames {
            handle_frame(&state, &session, frame);
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    session.close();
    ping_task.abort();
    let was_current = state.registry.remove_if_current(&session);
    if was_current {
        state.registry.emit(BridgeEvent::Status {
            channel_id: channel_id.clone(),
            account_id: params.account_id.clone(),
            state: "disconnected".into(),
        });
    }
    info!(
        channel = %channel_id,
        account = %params.account_id,
        conn = session.conn_id(),
        replaced = !was_current,
        "bridge client disconnected"
    );
    write_task.abort();
}

/// Route one classified frame.
fn handle_frame(state: &Arc<BridgeServerState>, session: &Arc<BridgeSession>, frame: BridgeFrame) {
    match frame {
        BridgeFrame::Response(response) => session.handle_response(response),
        BridgeFrame::Notification { method, params } => match method.as_str() {
            methods::MESSAGE => {
                state.registry.emit(BridgeEvent::Inbound {
                    channel_id: session.channel_id().to_string(),
                    account_id: session.account_id().to_string(),
                    payload: params.unwrap_or(serde_json::Value::Null),
                });
            },
            methods::STATUS => {
                let reported = params
                    .as_ref()
                    .and_then(|p| p.get("state"))
                    .and_then(|s| s.as_str())
                    .unwrap_or("unknown")
                    .to_string();
                session.note_status(&reported);
                state.registry.emit(BridgeEvent::Status {
                    channel_id: session.channel_id().to_string(),
                    account_id: session.account_id().to_string(),
                    state: reported,
                });
            },
            other => {
                debug!(conn = session.conn_id(), method = other, "ignoring notification");
            },
        },
        BridgeFrame::Request { id, method, .. } => {
            let response = match method.as_str() {
                methods::PING => ResponseFrame::ok(id, serde_json::json!({})),
                methods::CONNECT => ResponseFrame::err(
                    id,
                    RpcError::new(error_codes::INVALID_REQUEST, "already connected"),
                ),
                other => ResponseFrame::err(
                    id,
                    RpcError::new(
                        error_codes::METHOD_NOT_FOUND,
                        format!("unknown method '{other}'"),
                    ),
                ),
            };
            if let Ok(encoded) = serde_json::to_string(&response) {
                let _ = session.send_raw(encoded);
            }
        },
    }
}

/// Periodic keep-alive. Failures are logged and swallowed: the read
/// loop's closure is the authoritative disconnect signal.
fn spawn_ping(session: Arc<BridgeSession>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if interval.is_zero() {
            return;
        }
        let closed = session.closed();
        loop {
            tokio::select! {
                () = closed.cancelled() => break,
                () = tokio::time::sleep(interval) => {
                    if let Err(err) = session.call("ping", None).await {
                        debug!(conn = session.conn_id(), %err, "keep-alive ping failed");
                    }
                },
            }
        }
    })
}

/// Await the first frame; it must be a `connect` request.
async fn wait_for_connect(
    rx: &mut futures::stream::SplitStream<WebSocket>,
) -> anyhow::Result<(RequestId, ConnectParams)> {
    while let Some(message) = rx.next().await {
        let text = match message? {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => anyhow::bail!("connection closed before handshake"),
            _ => continue,
        };
        let mut frames = protocol::parse_frames(&text);
        if frames.is_empty() {
            anyhow::bail!("first frame was not valid JSON-RPC");
        }
        match frames.remove(0) {
            BridgeFrame::Request { id, method, params } if method == methods::CONNECT => {
                let params: ConnectParams =
                    serde_json::from_value(params.unwrap_or(serde_json::Value::Null))?;
                if params.account_id.trim().is_empty() {
                    anyhow::bail!("connect without accountId");
                }
                return Ok((id, params));
            },
            BridgeFrame::Request { method, .. } => {
                anyhow::bail!("first request must be 'connect', got '{method}'");
            },
            _ => anyhow::bail!("first frame must be a 'connect' request"),
        }
    }
    anyhow::bail!("connection closed before handshake")
}

fn send_frame(writer: &mpsc::UnboundedSender<String>, frame: &ResponseFrame) {
    if let Ok(encoded) = serde_json::to_string(frame) {
        let _ = writer.send(encoded);
    }
}
