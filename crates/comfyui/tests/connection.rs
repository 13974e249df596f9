//! Connection lifecycle tests: connect, reconnect, timeout, disconnect and
//! frame delivery to subscribers.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use comfyui_client::{ClientConfig, ComfyUIClient, ComfyUIError, ComfyUIMessage, ConnectionState, Frame};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use wiremock::MockServer;

use common::{executing, test_client, wait_until, MockEventServer};

async fn next_frame(rx: &mut tokio::sync::broadcast::Receiver<Frame>) -> Frame {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("frame should arrive")
        .expect("channel should be open")
}

// ---------------------------------------------------------------------------
// Test: connect() opens one channel bound to the client id
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_opens_channel() {
    let http = MockServer::start().await;
    let ws = MockEventServer::start().await;
    let client = test_client(&http, &ws);

    assert_eq!(client.state(), ConnectionState::Disconnected);
    client.connect().await.unwrap();

    assert_eq!(client.state(), ConnectionState::Open);
    ws.wait_for_open(1).await;
    assert_eq!(ws.request_uris(), vec!["/ws?clientId=test-client".to_string()]);
}

// ---------------------------------------------------------------------------
// Test: a second connect() tears the first channel down
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_twice_leaves_one_open_channel() {
    let http = MockServer::start().await;
    let ws = MockEventServer::start().await;
    let client = test_client(&http, &ws);

    client.connect().await.unwrap();
    ws.wait_for_open(1).await;
    let mut old_frames = client.subscribe().await.unwrap();

    client.connect().await.unwrap();

    assert_eq!(client.state(), ConnectionState::Open);
    wait_until(|| ws.accepted() == 2).await;
    ws.wait_for_open(1).await;

    // The first channel's subscribers were told it closed.
    assert_matches!(next_frame(&mut old_frames).await, Frame::Closed);
}

// ---------------------------------------------------------------------------
// Test: a handshake that never completes times out and the socket is closed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_times_out_and_closes_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Accept the TCP connection, swallow the upgrade request, never answer.
    let peer = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    });

    let config = ClientConfig::new(addr.to_string(), "slow-client")
        .with_connect_timeout(Duration::from_millis(200));
    let client = ComfyUIClient::new(config);

    let err = client.connect().await.unwrap_err();

    assert_matches!(err, ComfyUIError::ConnectTimeout(d) if d == Duration::from_millis(200));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // The peer sees EOF once the half-open socket is dropped.
    tokio::time::timeout(Duration::from_secs(2), peer)
        .await
        .expect("socket should be closed after the timeout")
        .unwrap();
}

// ---------------------------------------------------------------------------
// Test: a refused connection is a transport error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refused_connection_is_a_connection_error() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let client = ComfyUIClient::new(ClientConfig::new(addr.to_string(), "c1"));
    let err = client.connect().await.unwrap_err();

    assert_matches!(err, ComfyUIError::Connection(_));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_matches!(client.subscribe().await, Err(ComfyUIError::NotConnected));
}

// ---------------------------------------------------------------------------
// Test: disconnect() closes the channel and is idempotent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_is_idempotent() {
    let http = MockServer::start().await;
    let ws = MockEventServer::start().await;
    let client = test_client(&http, &ws);

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    client.connect().await.unwrap();
    ws.wait_for_open(1).await;

    client.disconnect().await;
    client.disconnect().await;

    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.listener_count().await, 0);
    ws.wait_for_open(0).await;
}

// ---------------------------------------------------------------------------
// Test: the channel can be reopened after a disconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_after_disconnect() {
    let http = MockServer::start().await;
    let ws = MockEventServer::start().await;
    let client = test_client(&http, &ws);

    client.connect().await.unwrap();
    client.disconnect().await;
    client.connect().await.unwrap();

    assert_eq!(client.state(), ConnectionState::Open);
    wait_until(|| ws.accepted() == 2).await;
    ws.wait_for_open(1).await;
}

// ---------------------------------------------------------------------------
// Test: subscribers see parsed messages and raw previews, not garbage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscribers_receive_messages_and_previews() {
    let http = MockServer::start().await;
    let ws = MockEventServer::start().await;
    let client = test_client(&http, &ws);

    client.connect().await.unwrap();
    ws.wait_for_open(1).await;
    let mut frames = client.subscribe().await.unwrap();
    assert_eq!(client.listener_count().await, 1);

    ws.send_text("not json");
    ws.send_binary(vec![0, 0, 0, 1, 0, 0, 0, 2, 0xff]);
    ws.send_json(executing(Some("3"), "p1"));
    ws.send_json(serde_json::json!({"type": "crystools.monitor", "data": {}}));

    assert_matches!(next_frame(&mut frames).await, Frame::Preview(bytes) if bytes.len() == 9);
    assert_matches!(
        next_frame(&mut frames).await,
        Frame::Message(ComfyUIMessage::Executing(data)) if data.node.as_deref() == Some("3")
    );
    assert_matches!(
        next_frame(&mut frames).await,
        Frame::Message(ComfyUIMessage::Other { kind, .. }) if kind == "crystools.monitor"
    );

    drop(frames);
    assert_eq!(client.listener_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: a server-side close moves the state to Closed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_close_is_observed() {
    let http = MockServer::start().await;
    let ws = MockEventServer::start().await;
    let client = test_client(&http, &ws);

    client.connect().await.unwrap();
    ws.wait_for_open(1).await;
    let mut frames = client.subscribe().await.unwrap();

    ws.close_all();

    assert_matches!(next_frame(&mut frames).await, Frame::Closed);
    wait_until(|| client.state() == ConnectionState::Closed).await;
    assert_matches!(client.subscribe().await, Err(ComfyUIError::NotConnected));
}
