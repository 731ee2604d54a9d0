//! Listener configuration.

use serde::{Deserialize, Serialize};

/// Subprotocols offered by default.
pub const DEFAULT_PROTOCOLS: [&str; 2] = ["ocpp1.6", "ocpp2.0.1"];

/// Configuration for the WebSocket listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Size of the listener's worker-thread pool.
    pub worker_count: usize,
    /// `SO_REUSEADDR` on the listen socket.
    pub reuse_addr: bool,
    /// `TCP_NODELAY` on accepted sockets (disables Nagle).
    pub tcp_no_delay: bool,
    /// Ping/pong liveness interval in seconds; a peer silent for two
    /// intervals is closed as lost.
    pub ping_interval_secs: u64,
    /// Lower bound for Basic-auth passwords.
    pub min_password_length: usize,
    /// Upper bound for Basic-auth passwords.
    pub max_password_length: usize,
    /// Subprotocols accepted during negotiation, in preference order.
    pub protocols: Vec<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            reuse_addr: true,
            tcp_no_delay: false,
            ping_interval_secs: 60,
            min_password_length: 16,
            max_password_length: 40,
            protocols: DEFAULT_PROTOCOLS.map(str::to_owned).to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_worker_count() {
        assert_eq!(ListenerConfig::default().worker_count, 4);
    }

    #[test]
    fn default_socket_options() {
        let cfg = ListenerConfig::default();
        assert!(cfg.reuse_addr);
        assert!(!cfg.tcp_no_delay);
    }

    #[test]
    fn default_ping_interval() {
        assert_eq!(ListenerConfig::default().ping_interval_secs, 60);
    }

    #[test]
    fn default_password_bounds() {
        let cfg = ListenerConfig::default();
        assert_eq!(cfg.min_password_length, 16);
        assert_eq!(cfg.max_password_length, 40);
    }

    #[test]
    fn default_protocols() {
        let cfg = ListenerConfig::default();
        assert_eq!(cfg.protocols, ["ocpp1.6", "ocpp2.0.1"]);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ListenerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ListenerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.worker_count, cfg.worker_count);
        assert_eq!(back.reuse_addr, cfg.reuse_addr);
        assert_eq!(back.tcp_no_delay, cfg.tcp_no_delay);
        assert_eq!(back.ping_interval_secs, cfg.ping_interval_secs);
        assert_eq!(back.min_password_length, cfg.min_password_length);
        assert_eq!(back.max_password_length, cfg.max_password_length);
        assert_eq!(back.protocols, cfg.protocols);
    }
}
