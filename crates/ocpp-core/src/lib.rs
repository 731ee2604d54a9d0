//! # ocpp-core
//!
//! Transport-independent core of an OCPP endpoint: message framing,
//! request/response correlation, and the offline transaction queue.
//!
//! OCPP is a bidirectional request/response protocol: either peer may
//! originate a [`Message::Call`], and every call carries a caller-chosen
//! correlation id that the other side echoes in its reply. This crate
//! provides:
//!
//! - [`message::Message`] — the four OCPP-J wire shapes
//! - [`codec::FrameCodec`] / [`codec::JsonCodec`] — payload packing and
//!   envelope building for the JSON binding
//! - [`radio::Radio`] — the uniform transport surface the engine runs on,
//!   with [`radio::Transmitter`] (client side) and [`radio::Receiver`]
//!   (server side) specializations
//! - [`communicator::Communicator`] — the per-session message pump and
//!   retry loop
//! - [`session::Session`] — session identity and ownership
//!
//! The OCPP feature catalog (which actions exist and their JSON schemas) is
//! deliberately out of scope: callers supply payloads as `serde` values and
//! classify transaction-related actions via [`session::TransactionPolicy`].

#![deny(unsafe_code)]

pub mod codec;
pub mod communicator;
pub mod error;
pub mod events;
pub mod logging;
pub mod message;
pub mod queue;
pub mod radio;
pub mod session;

pub use codec::{FrameCodec, JsonCodec};
pub use communicator::{CompletedHook, Communicator};
pub use error::{CodecError, RadioError};
pub use events::{CommunicatorEvents, MessageListener};
pub use message::Message;
pub use radio::{Radio, RadioEvents, Receiver, Transmitter};
pub use session::{
    ActionListPolicy, DefaultSessionFactory, DisconnectionInformation, Session, SessionFactory,
    SessionId, SessionInformation, TransactionPolicy,
};
