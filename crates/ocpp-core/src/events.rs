//! Application-facing event sinks and the process-wide message tap.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use serde_json::Value;

use crate::message::Message;
use crate::session::SessionId;

/// Per-session callbacks into the application.
#[async_trait]
pub trait CommunicatorEvents: Send + Sync {
    /// The session's transport came up.
    async fn on_connected(&self);

    /// The session's transport went down.
    async fn on_disconnected(&self);

    /// The peer sent a call.
    async fn on_call(&self, id: &str, action: &str, payload: Value);

    /// The peer answered one of our calls.
    ///
    /// `action` is absent from the wire form of a call result, so it is
    /// `None` unless the caller tracked it out of band.
    async fn on_call_result(&self, id: &str, action: Option<&str>, payload: Value);

    /// Something went wrong: the peer sent a call error, a send failed
    /// while offline, or a completion hook misbehaved.
    async fn on_error(&self, id: &str, code: &str, description: &str, context: Value);
}

/// Process-wide tap observing every wire send and receive, across all
/// sessions. Tracing only: core logic never depends on it.
///
/// Implementations must tolerate concurrent invocation from any session.
pub trait MessageListener: Send + Sync {
    /// A wire object was handed to a transport.
    fn on_sent_message(&self, session_id: Option<SessionId>, wire: &str, parsed: &Message);

    /// A wire object arrived from a transport.
    fn on_received_message(&self, session_id: Option<SessionId>, wire: &str, parsed: &Message);
}

static MESSAGE_LISTENER: OnceLock<Arc<dyn MessageListener>> = OnceLock::new();

/// Install the process-wide [`MessageListener`].
///
/// First installation wins and is immutable afterwards; returns `false`
/// when a listener was already installed.
pub fn install_message_listener(listener: Arc<dyn MessageListener>) -> bool {
    MESSAGE_LISTENER.set(listener).is_ok()
}

pub(crate) fn notify_sent(session_id: Option<SessionId>, wire: &str, parsed: &Message) {
    if let Some(listener) = MESSAGE_LISTENER.get() {
        listener.on_sent_message(session_id, wire, parsed);
    }
}

pub(crate) fn notify_received(session_id: Option<SessionId>, wire: &str, parsed: &Message) {
    if let Some(listener) = MESSAGE_LISTENER.get() {
        listener.on_received_message(session_id, wire, parsed);
    }
}
