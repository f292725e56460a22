//! End-to-end bridge tests: a real axum server and a tungstenite client.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    serde_json::{Value, json},
    tokio::{net::TcpStream, sync::mpsc},
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    volery_bridge::{
        BridgeEvent, BridgePlugin, BridgeRegistry, BridgeServerState,
        protocol::error_codes,
        router,
    },
    volery_channels::{ChannelRegistry, SharedChannels},
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    registry: Arc<BridgeRegistry>,
    events: mpsc::UnboundedReceiver<BridgeEvent>,
    channels: SharedChannels,
}

async fn start_server(auth_token: Option<&str>) -> TestServer {
    let (registry, events) = BridgeRegistry::new();
    let mut channel_registry = ChannelRegistry::new();
    channel_registry
        .register(Box::new(BridgePlugin::new(registry.clone())))
        .unwrap();
    let channels = SharedChannels::new(channel_registry);

    let state = Arc::new(BridgeServerState {
        registry: registry.clone(),
        channels: channels.clone(),
        auth_token: auth_token.map(String::from),
        request_timeout: Duration::from_secs(2),
        ping_interval: Duration::ZERO,
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });

    TestServer {
        addr,
        registry,
        events,
        channels,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (socket, _) = connect_async(format!("ws://{addr}/channels/bridge"))
        .await
        .unwrap();
    socket
}

async fn send_json(client: &mut Client, value: Value) {
    client
        .send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

async fn recv_json(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Handshake as `account_id`; returns the connect result.
async fn handshake(client: &mut Client, account_id: &str, token: Option<&str>) -> Value {
    let mut params = json!({ "accountId": account_id, "client": "e2e-test/1.0" });
    if let Some(token) = token {
        params["token"] = json!(token);
    }
    send_json(
        client,
        json!({ "jsonrpc": "2.0", "id": "connect-1", "method": "connect", "params": params }),
    )
    .await;
    recv_json(client).await
}

#[tokio::test]
async fn handshake_then_inbound_message_flows_to_events() {
    let mut server = start_server(None).await;
    let mut client = connect(server.addr).await;

    let hello = handshake(&mut client, "main", None).await;
    assert_eq!(hello["id"], "connect-1");
    assert_eq!(hello["result"]["protocol"], 1);
    assert!(hello.get("error").is_none());

    // Connection status event fires first.
    let event = server.events.recv().await.unwrap();
    assert!(matches!(event, BridgeEvent::Status { state, .. } if state == "connected"));

    send_json(
        &mut client,
        json!({
            "jsonrpc": "2.0",
            "method": "message",
            "params": { "chatId": "c1", "senderId": "ada", "text": "hello from afar" },
        }),
    )
    .await;

    let event = server.events.recv().await.unwrap();
    let BridgeEvent::Inbound {
        channel_id,
        account_id,
        payload,
    } = event
    else {
        panic!("expected inbound event");
    };
    assert_eq!(channel_id, "bridge");
    assert_eq!(account_id, "main");
    assert_eq!(payload["text"], "hello from afar");
}

#[tokio::test]
async fn bad_token_is_rejected_before_registration() {
    let server = start_server(Some("s3cret")).await;
    let mut client = connect(server.addr).await;

    let response = handshake(&mut client, "main", Some("wrong")).await;
    assert_eq!(response["error"]["code"], error_codes::UNAUTHORIZED);
    assert_eq!(server.registry.active_count(), 0);
}

#[tokio::test]
async fn good_token_is_accepted() {
    let server = start_server(Some("s3cret")).await;
    let mut client = connect(server.addr).await;
    let hello = handshake(&mut client, "main", Some("s3cret")).await;
    assert!(hello.get("error").is_none());
    wait_for_session(&server.registry, 1).await;
}

#[tokio::test]
async fn unknown_channel_refuses_the_upgrade() {
    let server = start_server(None).await;
    let result = connect_async(format!("ws://{}/channels/carrier-pigeon", server.addr)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn second_connection_replaces_the_first() {
    let server = start_server(None).await;

    let mut first = connect(server.addr).await;
    handshake(&mut first, "main", None).await;
    wait_for_session(&server.registry, 1).await;
    let first_conn = server.registry.get("bridge", "main").unwrap().conn_id().to_string();

    let mut second = connect(server.addr).await;
    handshake(&mut second, "main", None).await;

    // Still exactly one session, and it is the new one.
    wait_for(|| {
        server
            .registry
            .get("bridge", "main")
            .is_some_and(|s| s.conn_id() != first_conn)
    })
    .await;
    assert_eq!(server.registry.active_count(), 1);

    // The first client's socket goes away.
    let outcome = tokio::time::timeout(Duration::from_secs(5), first.next()).await;
    match outcome.expect("first socket should close") {
        None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {},
        Some(Ok(other)) => panic!("unexpected frame on replaced socket: {other:?}"),
    }
}

#[tokio::test]
async fn outbound_send_round_trips_through_the_client() {
    let server = start_server(None).await;
    let mut client = connect(server.addr).await;
    handshake(&mut client, "main", None).await;
    wait_for_session(&server.registry, 1).await;

    let outbound = server.channels.outbound("bridge").await.unwrap();
    let send = tokio::spawn(async move { outbound.send_text("main", "c1", "are you there?").await });

    // The client sees a correlated `send` request and answers it.
    let request = recv_json(&mut client).await;
    assert_eq!(request["method"], "send");
    assert_eq!(request["params"]["to"], "c1");
    send_json(
        &mut client,
        json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": { "ok": true, "messageId": "m-77" },
        }),
    )
    .await;

    let receipt = send.await.unwrap().unwrap();
    assert!(receipt.ok);
    assert_eq!(receipt.message_id.as_deref(), Some("m-77"));
}

#[tokio::test]
async fn unanswered_request_times_out_and_disconnect_rejects_pending() {
    let server = start_server(None).await;
    let mut client = connect(server.addr).await;
    handshake(&mut client, "main", None).await;
    wait_for_session(&server.registry, 1).await;

    let session = server.registry.get("bridge", "main").unwrap();
    let err = session
        .call_with_timeout("getStatus", None, Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timed out"));
    assert_eq!(session.pending_count(), 0);

    // Leave one in flight, then drop the socket.
    let pending_session = session.clone();
    let pending = tokio::spawn(async move { pending_session.call("getStatus", None).await });
    wait_for(|| session.pending_count() == 1).await;
    client.close(None).await.unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, volery_bridge::BridgeError::Disconnected));
    wait_for(|| server.registry.active_count() == 0).await;
}

#[tokio::test]
async fn client_ping_request_gets_an_answer() {
    let server = start_server(None).await;
    let mut client = connect(server.addr).await;
    handshake(&mut client, "main", None).await;

    send_json(
        &mut client,
        json!({ "jsonrpc": "2.0", "id": 42, "method": "ping" }),
    )
    .await;
    let response = recv_json(&mut client).await;
    assert_eq!(response["id"], 42);
    assert!(response.get("error").is_none());

    send_json(
        &mut client,
        json!({ "jsonrpc": "2.0", "id": 43, "method": "fly-to-the-moon" }),
    )
    .await;
    let response = recv_json(&mut client).await;
    assert_eq!(response["error"]["code"], error_codes::METHOD_NOT_FOUND);
}

#[tokio::test]
async fn malformed_frames_do_not_kill_the_session() {
    let mut server = start_server(None).await;
    let mut client = connect(server.addr).await;
    handshake(&mut client, "main", None).await;
    let _ = server.events.recv().await; // connected

    client
        .send(Message::Text("this is not json".into()))
        .await
        .unwrap();
    send_json(&mut client, json!({ "jsonrpc": "2.0" })).await;

    // Session survives: a message notification still comes through.
    send_json(
        &mut client,
        json!({
            "jsonrpc": "2.0",
            "method": "message",
            "params": { "chatId": "c1", "senderId": "ada", "text": "still alive" },
        }),
    )
    .await;
    let event = tokio::time::timeout(Duration::from_secs(5), server.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, BridgeEvent::Inbound { payload, .. } if payload["text"] == "still alive"));
}

async fn wait_for_session(registry: &Arc<BridgeRegistry>, count: usize) {
    wait_for(|| registry.active_count() == count).await;
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
