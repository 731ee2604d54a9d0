//! The per-session message pump.
//!
//! A [`Communicator`] packs and transmits outgoing messages, parses and
//! routes incoming ones, and runs the offline-queue retry loop for
//! transaction-related calls. It is oblivious to which side of the
//! connection it sits on: the same pump serves a charge point dialing out
//! and a central system's accepted socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::codec::{FrameCodec, JsonCodec};
use crate::error::{self, CodecError, RadioError};
use crate::events::{self, CommunicatorEvents};
use crate::message::Message;
use crate::queue::TransactionQueue;
use crate::radio::{Radio, RadioEvents, Receiver, Transmitter};
use crate::session::{SessionId, TransactionPolicy};

/// Pause between retry transmissions of the queue head.
const RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Hook invoked after a confirmation has been put on the wire.
///
/// An `Err` is surfaced through
/// [`CommunicatorEvents::on_error`] with the
/// [`CONFIRMATION_COMPLETED_HANDLER_FAILED`](error::CONFIRMATION_COMPLETED_HANDLER_FAILED)
/// code and never propagates further.
pub type CompletedHook =
    Box<dyn FnOnce() -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send>;

/// Which specialization of the radio this communicator drives.
enum Link {
    Transmitter(Arc<dyn Transmitter>),
    Receiver(Arc<dyn Receiver>),
}

/// Message framing, correlation, and transaction-retry engine for one
/// session.
pub struct Communicator<C: FrameCodec = JsonCodec> {
    codec: C,
    radio: Arc<dyn Radio>,
    link: Link,
    policy: Arc<dyn TransactionPolicy>,
    queue: Option<TransactionQueue>,
    /// Raised when the peer answers with a call error; gates the retry
    /// loop's queue-pop. Coarse on purpose: an error for any in-flight id
    /// holds back the head.
    failed: AtomicBool,
    retry_active: AtomicBool,
    session_id: Mutex<Option<SessionId>>,
    events: Mutex<Option<Arc<dyn CommunicatorEvents>>>,
    /// Serializes `send_call` per session so outbound order matches call
    /// order.
    send_gate: tokio::sync::Mutex<()>,
}

impl<C: FrameCodec> Communicator<C> {
    /// Build a communicator over a client-side radio.
    pub fn from_transmitter(
        transmitter: Arc<dyn Transmitter>,
        codec: C,
        policy: Arc<dyn TransactionPolicy>,
        queue_enabled: bool,
    ) -> Arc<Self> {
        let radio: Arc<dyn Radio> = transmitter.clone();
        Self::build(radio, Link::Transmitter(transmitter), codec, policy, queue_enabled)
    }

    /// Build a communicator over a server-side radio.
    pub fn from_receiver(
        receiver: Arc<dyn Receiver>,
        codec: C,
        policy: Arc<dyn TransactionPolicy>,
        queue_enabled: bool,
    ) -> Arc<Self> {
        let radio: Arc<dyn Radio> = receiver.clone();
        Self::build(radio, Link::Receiver(receiver), codec, policy, queue_enabled)
    }

    fn build(
        radio: Arc<dyn Radio>,
        link: Link,
        codec: C,
        policy: Arc<dyn TransactionPolicy>,
        queue_enabled: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            codec,
            radio,
            link,
            policy,
            queue: queue_enabled.then(TransactionQueue::new),
            failed: AtomicBool::new(false),
            retry_active: AtomicBool::new(false),
            session_id: Mutex::new(None),
            events: Mutex::new(None),
            send_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// Bind the event sink and connect the underlying transmitter.
    ///
    /// On a receiver-bound communicator only the sink is bound; the
    /// listener drives the socket.
    pub async fn connect(
        self: &Arc<Self>,
        uri: &str,
        events: Arc<dyn CommunicatorEvents>,
    ) -> Result<(), RadioError> {
        self.bind_events(Arc::clone(&events));
        match &self.link {
            Link::Transmitter(transmitter) => transmitter.connect(uri, self.adapter(events)).await,
            Link::Receiver(_) => {
                debug!("connect() on a receiver-bound communicator; sink bound only");
                Ok(())
            }
        }
    }

    /// Bind the event sink and start receiving on the underlying
    /// server-side radio.
    pub fn accept(self: &Arc<Self>, events: Arc<dyn CommunicatorEvents>) {
        self.bind_events(Arc::clone(&events));
        match &self.link {
            Link::Receiver(receiver) => receiver.accept(self.adapter(events)),
            Link::Transmitter(_) => {
                debug!("accept() on a transmitter-bound communicator; sink bound only");
            }
        }
    }

    /// Send a new call.
    ///
    /// Transaction-related calls are stored while offline and resent on
    /// reconnect; new ones line up behind any stored ones so transaction
    /// traffic stays FIFO. Everything else is dropped with an
    /// `on_error("Not connected", …)` when the transport is down.
    pub async fn send_call<T: Serialize>(
        self: &Arc<Self>,
        id: &str,
        action: &str,
        request: &T,
    ) -> Result<(), CodecError> {
        let payload = self.codec.pack(request)?;
        let wire = self.codec.make_call(id, action, payload.clone());
        let transactional = self.policy.is_transaction_related(action);

        let _gate = self.send_gate.lock().await;
        trace!(id, action, "send a message: {wire}");

        if self.radio.is_closed() {
            self.queue_or_reject(id, action, wire, transactional, payload).await;
        } else if transactional && self.queue.as_ref().is_some_and(|q| !q.is_empty()) {
            if let Some(queue) = &self.queue {
                queue.push(wire);
            }
            self.kick_retry();
        } else if self.transmit(&wire).await.is_err() {
            self.queue_or_reject(id, action, wire, transactional, payload).await;
        }
        Ok(())
    }

    /// Send a confirmation reply to a call the peer made.
    ///
    /// Replies are never queued: if the transport is down the
    /// confirmation is dropped with an `on_error`.
    pub async fn send_call_result<T: Serialize>(
        &self,
        id: &str,
        action: &str,
        confirmation: &T,
        completed: Option<CompletedHook>,
    ) -> Result<(), CodecError> {
        let payload = self.codec.pack(confirmation)?;
        let wire = self.codec.make_call_result(id, action, payload.clone());
        match self.transmit(&wire).await {
            Ok(()) => {
                if let Some(hook) = completed {
                    if let Err(e) = hook() {
                        self.emit_error(
                            id,
                            error::CONFIRMATION_COMPLETED_HANDLER_FAILED,
                            &format!("the confirmation completion hook failed: {e}"),
                            payload,
                        )
                        .await;
                    }
                }
            }
            Err(e) => {
                warn!(id, action, "send_call_result failed: {e}");
                self.emit_error(
                    id,
                    error::NOT_CONNECTED,
                    "The confirmation couldn't be sent due to the lack of connection",
                    payload,
                )
                .await;
            }
        }
        Ok(())
    }

    /// Send a call error. Dropped with an `on_error` if offline, never
    /// queued.
    pub async fn send_call_error(
        &self,
        id: &str,
        action: &str,
        error_code: &str,
        error_description: &str,
    ) {
        error!(id, action, error_code, error_description, "sending call error");
        let wire = self
            .codec
            .make_call_error(id, action, error_code, error_description);
        if let Err(e) = self.transmit(&wire).await {
            warn!(id, action, "send_call_error failed: {e}");
            self.emit_error(
                id,
                error::NOT_CONNECTED,
                "The error couldn't be sent due to the lack of connection",
                Value::String(error_code.to_owned()),
            )
            .await;
        }
    }

    /// Unpack a received payload into its typed form.
    pub fn unpack<T: serde::de::DeserializeOwned>(&self, payload: &Value) -> Result<T, CodecError> {
        self.codec.unpack(payload)
    }

    /// Close down the connection.
    pub async fn disconnect(&self) {
        self.radio.disconnect().await;
    }

    /// Stamp this communicator with its session's id. Idempotent.
    pub fn set_session_id(&self, session_id: SessionId) {
        *self.session_id.lock() = Some(session_id);
    }

    /// The session id, once assigned.
    pub fn session_id(&self) -> Option<SessionId> {
        *self.session_id.lock()
    }

    // ── Internals ───────────────────────────────────────────────────

    fn bind_events(&self, events: Arc<dyn CommunicatorEvents>) {
        *self.events.lock() = Some(events);
    }

    fn events(&self) -> Option<Arc<dyn CommunicatorEvents>> {
        self.events.lock().clone()
    }

    fn adapter(self: &Arc<Self>, events: Arc<dyn CommunicatorEvents>) -> Arc<dyn RadioEvents> {
        Arc::new(RadioEventAdapter {
            communicator: Arc::downgrade(self),
            events,
        })
    }

    /// Put a wire object on the radio and notify the process-wide tap.
    async fn transmit(&self, wire: &str) -> Result<(), RadioError> {
        self.radio.send(wire.to_owned()).await?;
        events::notify_sent(self.session_id(), wire, &self.codec.parse(wire));
        Ok(())
    }

    async fn queue_or_reject(
        &self,
        id: &str,
        action: &str,
        wire: String,
        transactional: bool,
        context: Value,
    ) {
        match &self.queue {
            Some(queue) if transactional => {
                warn!(id, action, "not connected: storing call in transaction queue");
                queue.push(wire);
            }
            _ => {
                warn!(id, action, "not connected: dropping call");
                self.emit_error(
                    id,
                    error::NOT_CONNECTED,
                    "The request can't be sent due to the lack of connection",
                    context,
                )
                .await;
            }
        }
    }

    async fn emit_error(&self, id: &str, code: &str, description: &str, context: Value) {
        match self.events() {
            Some(events) => events.on_error(id, code, description, context).await,
            None => debug!(id, code, "error event with no bound sink"),
        }
    }

    /// Route one received wire object.
    pub(crate) async fn dispatch(&self, wire: &str) {
        let message = self.codec.parse(wire);
        events::notify_received(self.session_id(), wire, &message);
        trace!("receive a message: {wire}");

        let Some(events) = self.events() else {
            debug!("inbound message with no bound sink");
            return;
        };
        match message {
            Message::CallResult { id, payload } => {
                events.on_call_result(&id, None, payload).await;
            }
            Message::CallError {
                id,
                error_code,
                error_description,
                raw_payload,
            } => {
                self.failed.store(true, Ordering::SeqCst);
                events
                    .on_error(&id, &error_code, &error_description, raw_payload)
                    .await;
            }
            Message::Call { id, action, payload } => {
                events.on_call(&id, &action, payload).await;
            }
            Message::Unparseable => debug!("dropping unparseable message: {wire}"),
        }
    }

    /// Start a retry worker unless one is already running.
    pub(crate) fn kick_retry(self: &Arc<Self>) {
        if self.queue.is_none() {
            return;
        }
        if self
            .retry_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let communicator = Arc::clone(self);
            tokio::spawn(async move { communicator.run_retry().await });
        }
    }

    /// Resend stored transaction calls until the queue drains or the
    /// transport drops.
    ///
    /// Each pass clears the failed flag, retransmits the head, waits out
    /// the retry delay, and pops only if no call error arrived meanwhile.
    async fn run_retry(self: Arc<Self>) {
        let mut aborted = false;
        while let Some(head) = self.queue.as_ref().and_then(TransactionQueue::peek) {
            self.failed.store(false, Ordering::SeqCst);
            if let Err(e) = self.transmit(&head).await {
                debug!("retry transmission failed: {e}");
                aborted = true;
                break;
            }
            tokio::time::sleep(RETRY_DELAY).await;
            if !self.failed.load(Ordering::SeqCst) {
                if let Some(queue) = &self.queue {
                    queue.pop();
                }
            }
        }
        self.retry_active.store(false, Ordering::SeqCst);
        // An enqueue can race the wind-down; pick it up rather than strand
        // it until the next reconnect.
        if !aborted
            && self.queue.as_ref().is_some_and(|q| !q.is_empty())
            && !self.radio.is_closed()
        {
            self.kick_retry();
        }
    }
}

/// Bridge from radio callbacks into the communicator.
///
/// Holds the communicator weakly: the session owns its communicator, and a
/// radio outliving its session must not keep the pump alive.
struct RadioEventAdapter<C: FrameCodec> {
    communicator: Weak<Communicator<C>>,
    events: Arc<dyn CommunicatorEvents>,
}

#[async_trait]
impl<C: FrameCodec> RadioEvents for RadioEventAdapter<C> {
    async fn connected(&self) {
        self.events.on_connected().await;
        if let Some(communicator) = self.communicator.upgrade() {
            communicator.kick_retry();
        }
    }

    async fn received_message(&self, wire: String) {
        if let Some(communicator) = self.communicator.upgrade() {
            communicator.dispatch(&wire).await;
        }
    }

    async fn disconnected(&self) {
        self.events.on_disconnected().await;
    }
}
