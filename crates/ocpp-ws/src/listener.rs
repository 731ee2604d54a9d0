//! The WebSocket listener: one server socket, many charge-point sessions.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ocpp_core::{
    DisconnectionInformation, Session, SessionFactory, SessionId, SessionInformation,
};

use crate::auth::{self, AuthenticationError};
use crate::capture::FrameCapture;
use crate::config::ListenerConfig;
use crate::probe::{self, HTTP_HEALTH_CHECK_CLOSE_CODE};
use crate::receiver::WsReceiver;

/// Budget for the graceful half of `close()`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Budget for one client handshake, sniff included.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const HEADER_PROXIED_ADDRESS: &str = "X-Forwarded-For";
const HEADER_AUTHORIZATION: &str = "Authorization";
const HEADER_PROTOCOL: &str = "Sec-WebSocket-Protocol";

/// Callbacks the listener makes into the application.
pub trait ListenerEvents: Send + Sync {
    /// Accept or reject a handshake.
    ///
    /// Called for every upgrade, with credentials when an `Authorization`
    /// header was present. An [`AuthenticationError`] turns into an HTTP
    /// response with its own status code.
    fn authenticate_session(
        &self,
        information: &SessionInformation,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), AuthenticationError>;

    /// A session finished its handshake and is ready to exchange
    /// messages. Bind a sink via
    /// [`Communicator::accept`](ocpp_core::Communicator::accept) here to
    /// start receiving.
    fn new_session(&self, session: Arc<Session>, information: SessionInformation);
}

/// State shared between the accept loop, connection tasks, and the
/// listener handle. Maps have many readers and writers only on
/// open/close.
struct Shared {
    config: ListenerConfig,
    factory: Arc<dyn SessionFactory>,
    sessions: Mutex<HashMap<SessionId, Arc<WsReceiver>>>,
    disconnections: Mutex<HashMap<SessionId, DisconnectionInformation>>,
    cancel: Mutex<CancellationToken>,
}

/// WebSocket server for a central system.
///
/// Owns a dedicated multi-thread runtime sized by
/// [`ListenerConfig::worker_count`]; `open()` and `close()` are blocking
/// calls meant for a non-async context, matching the listener's role as
/// the outermost surface of the process.
pub struct WebSocketListener {
    shared: Arc<Shared>,
    runtime: Option<tokio::runtime::Runtime>,
}

impl WebSocketListener {
    /// Create a listener. No socket is bound until [`open`](Self::open).
    pub fn new(factory: Arc<dyn SessionFactory>, config: ListenerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                factory,
                sessions: Mutex::new(HashMap::new()),
                disconnections: Mutex::new(HashMap::new()),
                cancel: Mutex::new(CancellationToken::new()),
            }),
            runtime: None,
        }
    }

    /// Bind `(host, port)` and start accepting. Returns the bound
    /// address, useful with port 0.
    ///
    /// Binding failure is fatal for the listener; everything after it is
    /// handled per connection.
    pub fn open(
        &mut self,
        host: &str,
        port: u16,
        events: Arc<dyn ListenerEvents>,
    ) -> io::Result<SocketAddr> {
        if self.runtime.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "listener already open",
            ));
        }

        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unresolvable host"))?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.shared.config.worker_count.max(1))
            .thread_name("ocpp-ws-worker")
            .enable_all()
            .build()?;

        let listener = {
            let _guard = runtime.enter();
            let socket = match addr {
                SocketAddr::V4(_) => TcpSocket::new_v4()?,
                SocketAddr::V6(_) => TcpSocket::new_v6()?,
            };
            socket.set_reuseaddr(self.shared.config.reuse_addr)?;
            socket.bind(addr)?;
            socket.listen(1024)?
        };
        let local_addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        *self.shared.cancel.lock() = cancel.clone();
        runtime.spawn(accept_loop(Arc::clone(&self.shared), listener, events, cancel));
        self.runtime = Some(runtime);

        info!(addr = %local_addr, workers = self.shared.config.worker_count, "listener open");
        Ok(local_addr)
    }

    /// Retrieve and clear the disconnection record of a closed session.
    ///
    /// Exactly-once: the second call for the same id returns `None`.
    pub fn remove_disconnection_information(
        &self,
        session_id: SessionId,
    ) -> Option<DisconnectionInformation> {
        self.shared.disconnections.lock().remove(&session_id)
    }

    /// Number of sessions currently connected.
    pub fn session_count(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    /// Whether the listener is not accepting connections.
    pub fn is_closed(&self) -> bool {
        self.runtime.is_none()
    }

    /// Stop accepting and tear down all sessions: graceful within a 10 s
    /// budget, forceful after. Idempotent.
    pub fn close(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        self.shared.cancel.lock().cancel();

        let shared = Arc::clone(&self.shared);
        runtime.block_on(async move {
            let drained = tokio::time::timeout(CLOSE_TIMEOUT, async {
                while !shared.sessions.lock().is_empty() {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            })
            .await;
            if drained.is_err() {
                warn!("close timed out waiting for sessions; stopping forcefully");
            }
        });
        runtime.shutdown_timeout(Duration::from_millis(250));
        self.shared.sessions.lock().clear();
        info!("listener closed");
    }
}

impl Drop for WebSocketListener {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            self.shared.cancel.lock().cancel();
            runtime.shutdown_timeout(Duration::from_millis(250));
        }
    }
}

async fn accept_loop(
    shared: Arc<Shared>,
    listener: TcpListener,
    events: Arc<dyn ListenerEvents>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let shared = Arc::clone(&shared);
                    let events = Arc::clone(&events);
                    let cancel = cancel.clone();
                    tokio::spawn(handle_connection(shared, events, cancel, stream, peer));
                }
                Err(e) => warn!("accept failed: {e}"),
            }
        }
    }
    debug!("accept loop stopped");
}

async fn handle_connection(
    shared: Arc<Shared>,
    events: Arc<dyn ListenerEvents>,
    cancel: CancellationToken,
    stream: TcpStream,
    peer: SocketAddr,
) {
    if let Err(e) = stream.set_nodelay(shared.config.tcp_no_delay) {
        debug!(peer = %peer, "set_nodelay failed: {e}");
    }

    // Plain HTTP probes are answered before the upgrade path and never
    // become sessions.
    match tokio::time::timeout(HANDSHAKE_TIMEOUT, probe::sniff(&stream)).await {
        Ok(Ok(true)) => {
            probe::answer(stream).await;
            return;
        }
        Ok(Ok(false)) => {}
        Ok(Err(e)) => {
            debug!(peer = %peer, "dropping connection before handshake: {e}");
            return;
        }
        Err(_) => {
            debug!(peer = %peer, "no request head within budget");
            return;
        }
    }

    let (stream, frame_tail) = FrameCapture::new(stream);

    let mut handshake_info: Option<SessionInformation> = None;
    let config = &shared.config;
    let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let information = SessionInformation {
            identifier: request.uri().to_string(),
            internet_address: peer,
            proxied_address: header(request, HEADER_PROXIED_ADDRESS),
        };

        if let Some(offered) = header(request, HEADER_PROTOCOL) {
            let selected = offered
                .split(',')
                .map(str::trim)
                .find(|candidate| config.protocols.iter().any(|p| p == candidate));
            if let Some(protocol) = selected {
                if let Ok(value) = HeaderValue::from_str(protocol) {
                    let _ = response.headers_mut().insert(HEADER_PROTOCOL, value);
                }
            }
        }

        let mut username = None;
        let mut password = None;
        if let Some(authorization) = header(request, HEADER_AUTHORIZATION) {
            let credentials = auth::parse_basic(&authorization);
            username = credentials.username;
            password = credentials.password;
            if let Err(e) = auth::check_password_length(password.as_deref(), config) {
                warn!(identifier = %information.identifier, peer = %peer, "handshake rejected: {e}");
                return Err(reject(&e));
            }
        }

        if let Err(e) =
            events.authenticate_session(&information, username.as_deref(), password.as_deref())
        {
            warn!(identifier = %information.identifier, peer = %peer, "authentication failed: {e}");
            return Err(reject(&e));
        }

        handshake_info = Some(information);
        Ok(response)
    };

    let websocket =
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, accept_hdr_async(stream, callback)).await {
            Ok(Ok(websocket)) => websocket,
            Ok(Err(e)) => {
                debug!(peer = %peer, "handshake failed: {e}");
                return;
            }
            Err(_) => {
                debug!(peer = %peer, "handshake timed out");
                return;
            }
        };
    let Some(information) = handshake_info else {
        return;
    };

    let child_cancel = cancel.child_token();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
    let receiver = WsReceiver::new(out_tx, child_cancel.clone());
    let session = shared.factory.create_session(receiver.clone());
    let session_id = session.id();
    let _ = shared.sessions.lock().insert(session_id, receiver.clone());

    info!(
        session_id = %session_id,
        identifier = %information.identifier,
        peer = %peer,
        proxied = ?information.proxied_address,
        "connection open"
    );
    events.new_session(Arc::clone(&session), information.clone());
    receiver.notify_connected().await;

    let (mut ws_tx, mut ws_rx) = websocket.split();
    let ping_interval = Duration::from_secs(shared.config.ping_interval_secs.max(1));
    let mut ping =
        tokio::time::interval_at(tokio::time::Instant::now() + ping_interval, ping_interval);
    let mut last_seen = tokio::time::Instant::now();

    let closing: DisconnectionInformation = loop {
        tokio::select! {
            () = child_cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break DisconnectionInformation { code: 1000, remote: false, reason: String::new() };
            }
            outbound = out_rx.recv() => match outbound {
                Some(text) => {
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break DisconnectionInformation { code: 1006, remote: false, reason: "send failed".into() };
                    }
                }
                // The receiver owns the only sender and outlives this task.
                None => break DisconnectionInformation { code: 1006, remote: false, reason: String::new() },
            },
            _ = ping.tick() => {
                if last_seen.elapsed() > ping_interval * 2 {
                    info!(session_id = %session_id, "connection lost: peer silent past timeout");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break DisconnectionInformation { code: 1006, remote: false, reason: "connection lost".into() };
                }
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break DisconnectionInformation { code: 1006, remote: false, reason: "ping failed".into() };
                }
            }
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    last_seen = tokio::time::Instant::now();
                    receiver.relay(text).await;
                }
                Some(Ok(Message::Binary(bytes))) => {
                    last_seen = tokio::time::Instant::now();
                    match String::from_utf8(bytes) {
                        Ok(text) => receiver.relay(text).await,
                        Err(e) => debug!(
                            session_id = %session_id,
                            frame = %hex::encode(e.as_bytes()),
                            "non-utf8 binary frame dropped"
                        ),
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    last_seen = tokio::time::Instant::now();
                    let _ = ws_tx.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    last_seen = tokio::time::Instant::now();
                }
                Some(Ok(Message::Close(frame))) => {
                    // Acknowledge so the closing handshake completes.
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break match frame {
                        Some(frame) => DisconnectionInformation {
                            code: frame.code.into(),
                            remote: true,
                            reason: frame.reason.into_owned(),
                        },
                        None => DisconnectionInformation { code: 1005, remote: true, reason: String::new() },
                    };
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    // The frame parser consumed the bytes; the capture
                    // still holds them for diagnostics.
                    debug!(
                        session_id = %session_id,
                        frame = %frame_tail.hex(),
                        "failed to translate frame: {e}"
                    );
                    break DisconnectionInformation { code: 1002, remote: true, reason: "protocol error".into() };
                }
                None => break DisconnectionInformation { code: 1006, remote: true, reason: String::new() },
            }
        }
    };

    info!(
        session_id = %session_id,
        identifier = %information.identifier,
        code = closing.code,
        reason = %closing.reason,
        remote = closing.remote,
        "connection closed"
    );
    receiver.mark_closed();
    if closing.code != HTTP_HEALTH_CHECK_CLOSE_CODE {
        let _ = shared.disconnections.lock().insert(session_id, closing);
    }
    let _ = shared.sessions.lock().remove(&session_id);
    receiver.notify_disconnected().await;
}

fn header(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn reject(error: &AuthenticationError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(error.message.clone()));
    *response.status_mut() =
        StatusCode::from_u16(error.error_code).unwrap_or(StatusCode::UNAUTHORIZED);
    response
}
