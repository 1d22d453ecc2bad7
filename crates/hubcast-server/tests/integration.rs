//! End-to-end tests against a real listener on an ephemeral port.

use std::net::SocketAddr;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::{SinkExt, StreamExt};
use hubcast_hub::HubConfig;
use hubcast_server::{HubServer, ServerConfig};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn start(max_connections: usize) -> (HubServer, SocketAddr, JoinHandle<()>) {
    let config = ServerConfig {
        max_connections,
        ..ServerConfig::default()
    };
    let hub_config = HubConfig {
        heartbeat: None,
        ..HubConfig::default()
    };
    let server = HubServer::new(config, hub_config, None);
    let (addr, handle) = server.listen().await.unwrap();
    (server, addr, handle)
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

/// Registration finishes after the upgrade response, so poll for it.
async fn wait_for_connections(server: &HubServer, n: usize) {
    tokio::time::timeout(WAIT, async {
        while server.hub().connection_count() != n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection count never reached target");
}

async fn next_payload(ws: &mut Client) -> Message {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(_) | Message::Binary(_) => return msg,
            _ => {}
        }
    }
}

async fn next_text(ws: &mut Client) -> String {
    match next_payload(ws).await {
        Message::Text(text) => text.as_str().to_owned(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn hello_reaches_every_client_once() {
    let (server, addr, handle) = start(16).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;
    wait_for_connections(&server, 3).await;

    a.send(Message::text("hello")).await.unwrap();

    for ws in [&mut a, &mut b, &mut c] {
        assert_eq!(next_text(ws).await, "Server broadcasted: hello");
    }

    // Nothing else was queued
    a.send(Message::text("second")).await.unwrap();
    for ws in [&mut a, &mut b, &mut c] {
        assert_eq!(next_text(ws).await, "Server broadcasted: second");
    }

    assert!(server.shutdown().graceful_shutdown(vec![handle], None).await.is_drained());
}

#[tokio::test]
async fn sender_order_is_preserved() {
    let (server, addr, handle) = start(16).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_connections(&server, 2).await;

    for i in 0..20 {
        a.send(Message::text(format!("m{i}"))).await.unwrap();
    }
    for i in 0..20 {
        assert_eq!(next_text(&mut b).await, format!("Server broadcasted: m{i}"));
    }

    assert!(server.shutdown().graceful_shutdown(vec![handle], None).await.is_drained());
}

#[tokio::test]
async fn binary_payload_is_relayed_as_binary() {
    let (server, addr, handle) = start(16).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_connections(&server, 2).await;

    a.send(Message::binary(vec![0xff, 0x00])).await.unwrap();

    let mut expected = b"Server broadcasted: ".to_vec();
    expected.extend_from_slice(&[0xff, 0x00]);
    assert_matches!(next_payload(&mut b).await, Message::Binary(data) if data.as_ref() == expected.as_slice());

    assert!(server.shutdown().graceful_shutdown(vec![handle], None).await.is_drained());
}

#[tokio::test]
async fn client_close_deregisters() {
    let (server, addr, handle) = start(16).await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_connections(&server, 2).await;

    a.close(None).await.unwrap();
    wait_for_connections(&server, 1).await;

    // The survivor keeps working
    b.send(Message::text("still here")).await.unwrap();
    assert_eq!(next_text(&mut b).await, "Server broadcasted: still here");

    assert!(server.shutdown().graceful_shutdown(vec![handle], None).await.is_drained());
}

#[tokio::test]
async fn health_reports_connection_count() {
    let (server, addr, handle) = start(16).await;
    let _a = connect(addr).await;
    let _b = connect(addr).await;
    wait_for_connections(&server, 2).await;

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 2);

    assert!(server.shutdown().graceful_shutdown(vec![handle], None).await.is_drained());
}

#[tokio::test]
async fn upgrade_beyond_limit_is_refused() {
    let (server, addr, handle) = start(1).await;
    let _a = connect(addr).await;
    wait_for_connections(&server, 1).await;

    let err = connect_async(format!("ws://{addr}/ws")).await.unwrap_err();
    assert_matches!(err, WsError::Http(resp) if resp.status().as_u16() == 503);
    assert_eq!(server.hub().connection_count(), 1);

    assert!(server.shutdown().graceful_shutdown(vec![handle], None).await.is_drained());
}

#[tokio::test]
async fn graceful_shutdown_closes_clients() {
    let (server, addr, handle) = start(16).await;
    let mut a = connect(addr).await;
    wait_for_connections(&server, 1).await;

    assert!(server.shutdown().graceful_shutdown(vec![handle], None).await.is_drained());
    assert_eq!(server.hub().connection_count(), 0);

    // The client sees a close frame or the stream ending
    let ended = tokio::time::timeout(WAIT, async {
        loop {
            match a.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok());
}
