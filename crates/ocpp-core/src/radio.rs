//! The transport abstraction the engine runs on.
//!
//! A [`Radio`] is one bound WebSocket (or any other framed text
//! transport). The communicator is oblivious to which side of the
//! connection it sits on: a client binds a [`Transmitter`], the server's
//! listener binds a [`Receiver`] per accepted socket.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RadioError;

/// Callbacks a radio fires toward its communicator.
#[async_trait]
pub trait RadioEvents: Send + Sync {
    /// The transport is up and messages can flow.
    async fn connected(&self);

    /// A text frame arrived.
    async fn received_message(&self, wire: String);

    /// The transport went down.
    async fn disconnected(&self);
}

/// Uniform send/close surface over one connection.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Transmit a wire object.
    async fn send(&self, wire: String) -> Result<(), RadioError>;

    /// Close down the connection.
    async fn disconnect(&self);

    /// Whether the transport is currently unusable for sends.
    fn is_closed(&self) -> bool;
}

/// Client-side radio: dials out to a server.
#[async_trait]
pub trait Transmitter: Radio {
    /// Connect to `uri` and start relaying events.
    async fn connect(&self, uri: &str, events: Arc<dyn RadioEvents>) -> Result<(), RadioError>;
}

/// Server-side radio: one accepted socket.
pub trait Receiver: Radio {
    /// Install the event sink for this socket.
    fn accept(&self, events: Arc<dyn RadioEvents>);
}
