//! # ocpp-ws
//!
//! OCPP-J over WebSocket: the server-side listener that multiplexes many
//! charge-point sessions onto one endpoint, and the client-side
//! transmitter a charge point dials out with.
//!
//! - [`listener::WebSocketListener`] — accepts connections, performs HTTP
//!   Basic authentication at handshake time, manufactures one
//!   communicator-backed session per socket, and bookkeeps
//!   disconnections
//! - [`transmitter::WsTransmitter`] — client radio over
//!   `tokio-tungstenite`
//! - [`receiver::WsReceiver`] — per-socket server radio
//! - [`probe`] — tells plain-HTTP health checks apart from WebSocket
//!   upgrades
//! - [`capture`] — keeps raw bytes of undecodable frames recoverable for
//!   hex diagnostics

#![deny(unsafe_code)]

pub mod auth;
pub mod capture;
pub mod config;
pub mod listener;
pub mod probe;
pub mod receiver;
pub mod transmitter;

pub use auth::{AuthenticationError, Credentials};
pub use config::ListenerConfig;
pub use listener::{ListenerEvents, WebSocketListener};
pub use probe::HTTP_HEALTH_CHECK_CLOSE_CODE;
pub use receiver::WsReceiver;
pub use transmitter::WsTransmitter;
