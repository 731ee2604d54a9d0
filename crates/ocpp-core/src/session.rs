//! Session identity, metadata, and construction.

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use uuid::Uuid;

use crate::codec::JsonCodec;
use crate::communicator::Communicator;
use crate::radio::Receiver;

/// Opaque 128-bit identifier, unique per process, assigned at session
/// creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Classifies which actions must survive an offline period.
///
/// Transaction-related calls (`StartTransaction`, `StopTransaction`,
/// `MeterValues`, …) are queued while disconnected because losing them
/// would corrupt billing state. The classification belongs to the feature
/// catalog, not to this engine, so it arrives injected.
pub trait TransactionPolicy: Send + Sync {
    /// Whether losing a call with this action would corrupt transaction
    /// state.
    fn is_transaction_related(&self, action: &str) -> bool;
}

/// A [`TransactionPolicy`] backed by an explicit action list.
#[derive(Debug, Default)]
pub struct ActionListPolicy {
    actions: HashSet<String>,
}

impl ActionListPolicy {
    /// Build a policy from the given action names.
    pub fn new<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
        }
    }
}

impl TransactionPolicy for ActionListPolicy {
    fn is_transaction_related(&self, action: &str) -> bool {
        self.actions.contains(action)
    }
}

/// Observable metadata of a connected peer, captured at handshake time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInformation {
    /// The HTTP resource descriptor, conventionally
    /// `/<chargePointIdentity>`.
    pub identifier: String,
    /// Remote socket address of the peer.
    pub internet_address: SocketAddr,
    /// Value of `X-Forwarded-For`, when the peer arrived through a proxy.
    pub proxied_address: Option<String>,
}

/// How a session's transport went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectionInformation {
    /// WebSocket close code.
    pub code: u16,
    /// Whether the close was initiated by the remote peer.
    pub remote: bool,
    /// Close reason text.
    pub reason: String,
}

/// A single connected peer: exclusive owner of its communicator and,
/// through it, the offline queue and retry worker.
pub struct Session {
    id: SessionId,
    communicator: Arc<Communicator<JsonCodec>>,
}

impl Session {
    /// Wrap a communicator into a session and stamp it with a fresh id.
    pub fn new(communicator: Arc<Communicator<JsonCodec>>) -> Arc<Self> {
        let id = SessionId::new();
        communicator.set_session_id(id);
        Arc::new(Self { id, communicator })
    }

    /// This session's id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The message pump bound to this session's socket.
    pub fn communicator(&self) -> &Arc<Communicator<JsonCodec>> {
        &self.communicator
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

/// Manufactures a session over a freshly accepted socket.
pub trait SessionFactory: Send + Sync {
    /// Build a session whose communicator runs on `receiver`.
    fn create_session(&self, receiver: Arc<dyn Receiver>) -> Arc<Session>;
}

/// Standard factory: a JSON communicator with the injected transaction
/// policy and an optional offline queue.
pub struct DefaultSessionFactory {
    policy: Arc<dyn TransactionPolicy>,
    queue_enabled: bool,
}

impl DefaultSessionFactory {
    /// Create a factory producing queue-enabled sessions.
    pub fn new(policy: Arc<dyn TransactionPolicy>) -> Self {
        Self {
            policy,
            queue_enabled: true,
        }
    }

    /// Create a factory with the offline queue switched off.
    pub fn without_queue(policy: Arc<dyn TransactionPolicy>) -> Self {
        Self {
            policy,
            queue_enabled: false,
        }
    }
}

impl SessionFactory for DefaultSessionFactory {
    fn create_session(&self, receiver: Arc<dyn Receiver>) -> Arc<Session> {
        let communicator = Communicator::from_receiver(
            receiver,
            JsonCodec,
            Arc::clone(&self.policy),
            self.queue_enabled,
        );
        Session::new(communicator)
    }
}
