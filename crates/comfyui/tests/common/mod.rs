//! Shared fixtures: an in-process WebSocket event server standing in for
//! ComfyUI's `/ws` endpoint, and helpers for the `wiremock` HTTP side.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use comfyui_client::{ClientConfig, ComfyUIClient};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use wiremock::MockServer;

pub const CLIENT_ID: &str = "test-client";

#[derive(Debug, Clone)]
enum Command {
    Send(Message),
    CloseAll,
}

/// A WebSocket server that records handshakes and pushes frames on demand
/// to every connected client.
pub struct MockEventServer {
    addr: SocketAddr,
    commands: broadcast::Sender<Command>,
    accepted: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    request_uris: Arc<Mutex<Vec<String>>>,
}

impl MockEventServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (commands, _) = broadcast::channel(64);

        let server = Self {
            addr,
            commands: commands.clone(),
            accepted: Arc::new(AtomicUsize::new(0)),
            open: Arc::new(AtomicUsize::new(0)),
            request_uris: Arc::new(Mutex::new(Vec::new())),
        };

        let accepted = Arc::clone(&server.accepted);
        let open = Arc::clone(&server.open);
        let request_uris = Arc::clone(&server.request_uris);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let uris = Arc::clone(&request_uris);
                let record_uri = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    uris.lock().unwrap().push(req.uri().to_string());
                    Ok(resp)
                };

                let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, record_uri).await else {
                    continue;
                };
                let mut rx = commands.subscribe();
                accepted.fetch_add(1, Ordering::SeqCst);
                open.fetch_add(1, Ordering::SeqCst);

                let open = Arc::clone(&open);
                tokio::spawn(async move {
                    let (mut sink, mut incoming) = ws.split();
                    loop {
                        tokio::select! {
                            cmd = rx.recv() => match cmd {
                                Ok(Command::Send(msg)) => {
                                    if sink.send(msg).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(Command::CloseAll) | Err(_) => {
                                    let _ = sink.send(Message::Close(None)).await;
                                    break;
                                }
                            },
                            frame = incoming.next() => match frame {
                                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                        }
                    }
                    open.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        server
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn send_json(&self, value: serde_json::Value) {
        self.send_text(&value.to_string());
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.commands.send(Command::Send(Message::Text(text.to_string())));
    }

    pub fn send_binary(&self, data: Vec<u8>) {
        let _ = self.commands.send(Command::Send(Message::Binary(data)));
    }

    /// Send a Close frame on every open connection and hang up.
    pub fn close_all(&self) {
        let _ = self.commands.send(Command::CloseAll);
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn request_uris(&self) -> Vec<String> {
        self.request_uris.lock().unwrap().clone()
    }

    /// Poll until exactly `n` connections are open.
    pub async fn wait_for_open(&self, n: usize) {
        wait_until(|| self.open_connections() == n).await;
    }
}

/// Build a client whose HTTP calls go to `http` and whose event channel
/// goes to `ws`.
pub fn test_client(http: &MockServer, ws: &MockEventServer) -> ComfyUIClient {
    let config = ClientConfig::new("127.0.0.1:8188", CLIENT_ID)
        .with_api_url(http.uri())
        .with_ws_url(ws.ws_url())
        .with_connect_timeout(Duration::from_secs(5));
    ComfyUIClient::new(config)
}

/// Poll `condition` every 10 ms for up to 5 seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

/// Poll until the mock HTTP server has seen `count` requests to `path`.
pub async fn wait_for_requests(server: &MockServer, path: &str, count: usize) {
    for _ in 0..500 {
        let seen = server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == path)
            .count();
        if seen >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} request(s) to {path}");
}

pub fn executing(node: Option<&str>, prompt_id: &str) -> serde_json::Value {
    serde_json::json!({"type": "executing", "data": {"node": node, "prompt_id": prompt_id}})
}
