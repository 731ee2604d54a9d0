//! The client-side radio a charge point dials out with.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ocpp_core::{Radio, RadioError, RadioEvents, Transmitter};

use crate::config::DEFAULT_PROTOCOLS;

/// WebSocket client radio over `tokio-tungstenite`.
///
/// One-shot: after a disconnect, dial again with a fresh transmitter.
pub struct WsTransmitter {
    protocols: Vec<String>,
    out_tx: Mutex<Option<mpsc::Sender<String>>>,
    closed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl WsTransmitter {
    /// Create a transmitter offering the given subprotocols.
    pub fn new<I, S>(protocols: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            protocols: protocols.into_iter().map(Into::into).collect(),
            out_tx: Mutex::new(None),
            closed: Arc::new(AtomicBool::new(true)),
            cancel: CancellationToken::new(),
        })
    }

    /// Create a transmitter offering `ocpp1.6` and `ocpp2.0.1`.
    pub fn with_default_protocols() -> Arc<Self> {
        Self::new(DEFAULT_PROTOCOLS)
    }
}

#[async_trait]
impl Radio for WsTransmitter {
    async fn send(&self, wire: String) -> Result<(), RadioError> {
        if self.is_closed() {
            return Err(RadioError::NotConnected);
        }
        let sender = self.out_tx.lock().clone();
        match sender {
            Some(sender) => sender.send(wire).await.map_err(|_| RadioError::NotConnected),
            None => Err(RadioError::NotConnected),
        }
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transmitter for WsTransmitter {
    async fn connect(&self, uri: &str, events: Arc<dyn RadioEvents>) -> Result<(), RadioError> {
        let mut request = uri
            .into_client_request()
            .map_err(|e| RadioError::ConnectFailed {
                message: e.to_string(),
            })?;
        if !self.protocols.is_empty() {
            let offered = self.protocols.join(", ");
            let value =
                HeaderValue::from_str(&offered).map_err(|e| RadioError::ConnectFailed {
                    message: e.to_string(),
                })?;
            request
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", value);
        }

        let (stream, _response) =
            connect_async(request)
                .await
                .map_err(|e| RadioError::ConnectFailed {
                    message: e.to_string(),
                })?;
        let (mut ws_tx, mut ws_rx) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        *self.out_tx.lock() = Some(out_tx);
        self.closed.store(false, Ordering::SeqCst);

        events.connected().await;

        let closed = Arc::clone(&self.closed);
        let cancel = self.cancel.clone();
        let task_events = Arc::clone(&events);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                    outbound = out_rx.recv() => match outbound {
                        Some(text) => {
                            if ws_tx.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    frame = ws_rx.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            task_events.received_message(text).await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws_tx.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!("client socket error: {e}");
                            break;
                        }
                    }
                }
            }
            closed.store(true, Ordering::SeqCst);
            task_events.disconnected().await;
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopEvents;

    #[async_trait]
    impl RadioEvents for NoopEvents {
        async fn connected(&self) {}
        async fn received_message(&self, _wire: String) {}
        async fn disconnected(&self) {}
    }

    #[tokio::test]
    async fn starts_closed() {
        let transmitter = WsTransmitter::with_default_protocols();
        assert!(transmitter.is_closed());
    }

    #[tokio::test]
    async fn send_before_connect_is_not_connected() {
        let transmitter = WsTransmitter::with_default_protocols();
        let err = transmitter.send("x".into()).await.unwrap_err();
        assert!(matches!(err, RadioError::NotConnected));
    }

    #[tokio::test]
    async fn connect_to_malformed_uri_fails() {
        let transmitter = WsTransmitter::with_default_protocols();
        let err = transmitter
            .connect("not a uri", Arc::new(NoopEvents))
            .await
            .unwrap_err();
        assert!(matches!(err, RadioError::ConnectFailed { .. }));
    }

    #[tokio::test]
    async fn connect_to_unreachable_peer_fails() {
        let transmitter = WsTransmitter::with_default_protocols();
        // A port nothing listens on; the dial itself must fail.
        let err = transmitter
            .connect("ws://127.0.0.1:9/", Arc::new(NoopEvents))
            .await
            .unwrap_err();
        assert!(matches!(err, RadioError::ConnectFailed { .. }));
        assert!(transmitter.is_closed());
    }
}
