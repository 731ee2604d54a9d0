//! End-to-end tests driving real WebSocket clients against a live
//! listener.
//!
//! The listener runs on its own worker runtime, so these tests are plain
//! `#[test]` functions that spin up a separate client runtime for the
//! peer side.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error, Message};

use ocpp_core::{
    ActionListPolicy, Communicator, CommunicatorEvents, DefaultSessionFactory, JsonCodec, Session,
    SessionInformation,
};
use ocpp_ws::{AuthenticationError, ListenerConfig, ListenerEvents, WebSocketListener, WsTransmitter};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ── Test application ────────────────────────────────────────────────

/// Replies to `Heartbeat` calls and records everything it sees.
struct Responder {
    communicator: Weak<Communicator<JsonCodec>>,
    calls_seen: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl CommunicatorEvents for Responder {
    async fn on_connected(&self) {}

    async fn on_disconnected(&self) {}

    async fn on_call(&self, id: &str, action: &str, _payload: Value) {
        self.calls_seen.lock().push((id.into(), action.into()));
        if action == "Heartbeat" {
            if let Some(communicator) = self.communicator.upgrade() {
                let _ = communicator
                    .send_call_result(
                        id,
                        action,
                        &json!({"currentTime": "2024-01-01T00:00:00Z"}),
                        None,
                    )
                    .await;
            }
        }
    }

    async fn on_call_result(&self, _id: &str, _action: Option<&str>, _payload: Value) {}

    async fn on_error(&self, _id: &str, _code: &str, _description: &str, _context: Value) {}
}

#[derive(Default)]
struct App {
    reject_with: Option<AuthenticationError>,
    auth_calls: Arc<Mutex<Vec<(Option<String>, Option<String>)>>>,
    sessions: Arc<Mutex<Vec<(Arc<Session>, SessionInformation)>>>,
    calls_seen: Arc<Mutex<Vec<(String, String)>>>,
}

impl ListenerEvents for App {
    fn authenticate_session(
        &self,
        _information: &SessionInformation,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), AuthenticationError> {
        self.auth_calls
            .lock()
            .push((username.map(str::to_owned), password.map(str::to_owned)));
        match &self.reject_with {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn new_session(&self, session: Arc<Session>, information: SessionInformation) {
        let communicator = Arc::clone(session.communicator());
        communicator.accept(Arc::new(Responder {
            communicator: Arc::downgrade(&communicator),
            calls_seen: Arc::clone(&self.calls_seen),
        }));
        self.sessions.lock().push((session, information));
    }
}

// ── Harness ─────────────────────────────────────────────────────────

fn boot(app: Arc<App>) -> (WebSocketListener, SocketAddr) {
    let policy = Arc::new(ActionListPolicy::new([
        "StartTransaction",
        "StopTransaction",
        "MeterValues",
    ]));
    let factory = Arc::new(DefaultSessionFactory::new(policy));
    let mut listener = WebSocketListener::new(factory, ListenerConfig::default());
    let addr = listener.open("127.0.0.1", 0, app).unwrap();
    (listener, addr)
}

fn client_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

async fn expect_text(ws: &mut WsStream) -> String {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no frame within 5s")
            .expect("stream ended")
            .expect("frame error");
        match frame {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

// ── Scenarios ───────────────────────────────────────────────────────

#[test]
fn call_receives_result_with_matching_id() {
    let app = Arc::new(App::default());
    let (mut listener, addr) = boot(app.clone());

    client_runtime().block_on(async {
        let (mut ws, _) = connect_async(format!("ws://{addr}/CP001")).await.unwrap();
        ws.send(Message::Text(r#"[2,"abc","Heartbeat",{}]"#.into()))
            .await
            .unwrap();

        let reply = expect_text(&mut ws).await;
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed[0], 3);
        assert_eq!(parsed[1], "abc");
        assert_eq!(parsed[2]["currentTime"], "2024-01-01T00:00:00Z");

        let calls = app.calls_seen.lock();
        assert_eq!(calls.as_slice(), [("abc".to_owned(), "Heartbeat".to_owned())]);
    });

    listener.close();
}

#[test]
fn session_information_captures_handshake_details() {
    let app = Arc::new(App::default());
    let (mut listener, addr) = boot(app.clone());

    client_runtime().block_on(async {
        let mut request = format!("ws://{addr}/CP007").into_client_request().unwrap();
        let _ = request.headers_mut().insert(
            "X-Forwarded-For",
            HeaderValue::from_static("203.0.113.9"),
        );
        let (_ws, _) = connect_async(request).await.unwrap();

        wait_until(|| !app.sessions.lock().is_empty()).await;
        let sessions = app.sessions.lock();
        let information = &sessions[0].1;
        assert_eq!(information.identifier, "/CP007");
        assert_eq!(information.proxied_address.as_deref(), Some("203.0.113.9"));
        assert!(information.internet_address.ip().is_loopback());
    });

    listener.close();
}

#[test]
fn negotiates_offered_subprotocol() {
    let app = Arc::new(App::default());
    let (mut listener, addr) = boot(app);

    client_runtime().block_on(async {
        let mut request = format!("ws://{addr}/CP001").into_client_request().unwrap();
        let _ = request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static("ocpp1.6"),
        );
        let (_ws, response) = connect_async(request).await.unwrap();
        let negotiated = response
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|value| value.to_str().ok());
        assert_eq!(negotiated, Some("ocpp1.6"));
    });

    listener.close();
}

#[test]
fn short_password_is_rejected_before_authentication() {
    let app = Arc::new(App::default());
    let (mut listener, addr) = boot(app.clone());

    client_runtime().block_on(async {
        let mut request = format!("ws://{addr}/CP001").into_client_request().unwrap();
        let credentials = base64::engine::general_purpose::STANDARD.encode("user:short");
        let _ = request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Basic {credentials}")).unwrap(),
        );

        let error = connect_async(request).await.unwrap_err();
        match error {
            Error::Http(response) => assert_eq!(response.status(), 401),
            other => panic!("expected http rejection, got: {other:?}"),
        }
    });

    // The application was never consulted and no session exists.
    assert!(app.auth_calls.lock().is_empty());
    assert!(app.sessions.lock().is_empty());
    assert_eq!(listener.session_count(), 0);

    listener.close();
}

#[test]
fn valid_credentials_reach_the_application() {
    let app = Arc::new(App::default());
    let (mut listener, addr) = boot(app.clone());

    client_runtime().block_on(async {
        let mut request = format!("ws://{addr}/CP001").into_client_request().unwrap();
        let credentials =
            base64::engine::general_purpose::STANDARD.encode("CP001:0123456789abcdef");
        let _ = request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Basic {credentials}")).unwrap(),
        );
        let (_ws, _) = connect_async(request).await.unwrap();

        wait_until(|| !app.sessions.lock().is_empty()).await;
    });

    let auth_calls = app.auth_calls.lock();
    assert_eq!(auth_calls.len(), 1);
    assert_eq!(auth_calls[0].0.as_deref(), Some("CP001"));
    assert_eq!(auth_calls[0].1.as_deref(), Some("0123456789abcdef"));

    listener.close();
}

#[test]
fn authentication_rejection_status_is_propagated() {
    let app = Arc::new(App {
        reject_with: Some(AuthenticationError::new(404, "unknown charge point")),
        ..App::default()
    });
    let (mut listener, addr) = boot(app.clone());

    client_runtime().block_on(async {
        let error = connect_async(format!("ws://{addr}/CP404")).await.unwrap_err();
        match error {
            Error::Http(response) => assert_eq!(response.status(), 404),
            other => panic!("expected http rejection, got: {other:?}"),
        }
    });

    assert!(app.sessions.lock().is_empty());
    listener.close();
}

#[test]
fn health_probe_is_answered_without_bookkeeping() {
    let app = Arc::new(App::default());
    let (mut listener, addr) = boot(app.clone());

    client_runtime().block_on(async {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nhost: cs\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        let _ = stream.read_to_end(&mut response).await.unwrap();
        assert!(response.starts_with(b"HTTP/1.1 200"));
    });

    assert_eq!(listener.session_count(), 0);
    assert!(app.sessions.lock().is_empty());
    assert!(app.auth_calls.lock().is_empty());

    listener.close();
}

#[test]
fn disconnection_is_recorded_and_retrieved_once() {
    let app = Arc::new(App::default());
    let (mut listener, addr) = boot(app.clone());

    client_runtime().block_on(async {
        let (mut ws, _) = connect_async(format!("ws://{addr}/CP001")).await.unwrap();
        wait_until(|| !app.sessions.lock().is_empty()).await;

        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "done".into(),
        }))
        .await
        .unwrap();
        // Drain until the close handshake completes.
        while ws.next().await.is_some() {}

        wait_until(|| listener.session_count() == 0).await;
    });

    let session_id = app.sessions.lock()[0].0.id();
    let information = listener.remove_disconnection_information(session_id).unwrap();
    assert_eq!(information.code, 1000);
    assert!(information.remote);
    assert_eq!(information.reason, "done");

    // Exactly-once pickup.
    assert!(listener.remove_disconnection_information(session_id).is_none());

    listener.close();
}

#[test]
fn server_initiated_call_reaches_the_client() {
    let app = Arc::new(App::default());
    let (mut listener, addr) = boot(app.clone());

    client_runtime().block_on(async {
        let (mut ws, _) = connect_async(format!("ws://{addr}/CP001")).await.unwrap();
        wait_until(|| !app.sessions.lock().is_empty()).await;

        let session = Arc::clone(&app.sessions.lock()[0].0);
        session
            .communicator()
            .send_call("srv1", "GetConfiguration", &json!({}))
            .await
            .unwrap();

        let frame = expect_text(&mut ws).await;
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed[0], 2);
        assert_eq!(parsed[1], "srv1");
        assert_eq!(parsed[2], "GetConfiguration");
    });

    listener.close();
}

// ── Client radio against the listener ───────────────────────────────

#[derive(Default)]
struct ClientSide {
    results: Arc<Mutex<Vec<(String, Value)>>>,
    connected: Arc<Mutex<bool>>,
}

#[async_trait]
impl CommunicatorEvents for ClientSide {
    async fn on_connected(&self) {
        *self.connected.lock() = true;
    }

    async fn on_disconnected(&self) {}

    async fn on_call(&self, _id: &str, _action: &str, _payload: Value) {}

    async fn on_call_result(&self, id: &str, _action: Option<&str>, payload: Value) {
        self.results.lock().push((id.into(), payload));
    }

    async fn on_error(&self, _id: &str, _code: &str, _description: &str, _context: Value) {}
}

#[test]
fn transmitter_backed_communicator_round_trips() {
    let app = Arc::new(App::default());
    let (mut listener, addr) = boot(app.clone());

    client_runtime().block_on(async {
        let policy = Arc::new(ActionListPolicy::new(["StartTransaction"]));
        let transmitter = WsTransmitter::with_default_protocols();
        let communicator =
            Communicator::from_transmitter(transmitter, JsonCodec, policy, true);

        let client = Arc::new(ClientSide::default());
        communicator
            .connect(&format!("ws://{addr}/CP042"), client.clone())
            .await
            .unwrap();
        wait_until(|| *client.connected.lock()).await;

        communicator
            .send_call("hb1", "Heartbeat", &json!({}))
            .await
            .unwrap();

        wait_until(|| !client.results.lock().is_empty()).await;
        let results = client.results.lock();
        assert_eq!(results[0].0, "hb1");
        assert_eq!(results[0].1["currentTime"], "2024-01-01T00:00:00Z");

        communicator.disconnect().await;
    });

    listener.close();
}
