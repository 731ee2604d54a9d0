//! The per-socket server-side radio.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use ocpp_core::{Radio, RadioError, RadioEvents, Receiver};

/// One accepted WebSocket, as seen by its communicator.
///
/// Outbound sends are queued onto the connection task's write channel;
/// inbound text frames are relayed into the accepted
/// [`RadioEvents`] sink. `disconnect()` cancels the connection task,
/// which then tears the socket down.
pub struct WsReceiver {
    out_tx: mpsc::Sender<String>,
    closed: AtomicBool,
    cancel: CancellationToken,
    events: Mutex<Option<Arc<dyn RadioEvents>>>,
}

impl WsReceiver {
    pub(crate) fn new(out_tx: mpsc::Sender<String>, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            out_tx,
            closed: AtomicBool::new(false),
            cancel,
            events: Mutex::new(None),
        })
    }

    fn events(&self) -> Option<Arc<dyn RadioEvents>> {
        self.events.lock().clone()
    }

    /// Dispatch one inbound text frame.
    pub(crate) async fn relay(&self, wire: String) {
        match self.events() {
            Some(events) => events.received_message(wire).await,
            None => debug!("message before accept(): dropped"),
        }
    }

    pub(crate) async fn notify_connected(&self) {
        if let Some(events) = self.events() {
            events.connected().await;
        }
    }

    pub(crate) async fn notify_disconnected(&self) {
        self.mark_closed();
        if let Some(events) = self.events() {
            events.disconnected().await;
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Radio for WsReceiver {
    async fn send(&self, wire: String) -> Result<(), RadioError> {
        if self.is_closed() {
            return Err(RadioError::NotConnected);
        }
        self.out_tx
            .send(wire)
            .await
            .map_err(|_| RadioError::NotConnected)
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Receiver for WsReceiver {
    fn accept(&self, events: Arc<dyn RadioEvents>) {
        *self.events.lock() = Some(events);
    }
}
