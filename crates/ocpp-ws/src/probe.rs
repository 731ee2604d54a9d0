//! Plain-HTTP health probes.
//!
//! Load balancers check liveness with ordinary HTTP requests against the
//! WebSocket port. Those must be answered and forgotten: no session, no
//! disconnection record. The request head is peeked off the socket before
//! the WebSocket handshake so a probe never enters the upgrade path.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Reserved close code for health-check connections; never bookkept.
pub const HTTP_HEALTH_CHECK_CLOSE_CODE: u16 = 4004;

/// Response a probe receives.
const HEALTH_CHECK_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

/// Largest request head we are willing to inspect.
const MAX_HEAD: usize = 4096;

/// How long to wait for the head to arrive before letting the handshake
/// machinery deal with the socket.
const SNIFF_PATIENCE: Duration = Duration::from_millis(2000);

/// Whether a complete request head describes a plain HTTP request rather
/// than a WebSocket upgrade.
pub fn is_http_probe(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head);
    !text.lines().skip(1).any(|line| {
        line.split_once(':').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("upgrade")
                && value.to_ascii_lowercase().contains("websocket")
        })
    })
}

/// Whether the buffer holds a complete request head.
pub fn head_complete(buf: &[u8]) -> bool {
    buf.windows(4).any(|window| window == b"\r\n\r\n")
}

/// Peek the request head off `stream` without consuming it and decide
/// whether this connection is a health probe.
///
/// Inconclusive sniffs (oversized or slow heads) report `false` so the
/// regular handshake gets to reject the socket with full diagnostics.
pub(crate) async fn sniff(stream: &TcpStream) -> std::io::Result<bool> {
    let mut buf = vec![0u8; MAX_HEAD];
    let deadline = tokio::time::Instant::now() + SNIFF_PATIENCE;
    let mut seen = 0;
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "peer closed during handshake",
            ));
        }
        if head_complete(&buf[..n]) {
            return Ok(is_http_probe(&buf[..n]));
        }
        if n == buf.len() || tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        if n == seen {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        seen = n;
    }
}

/// Answer a probe with a minimal 200 and drop the connection.
pub(crate) async fn answer(mut stream: TcpStream) {
    if let Err(e) = stream.write_all(HEALTH_CHECK_RESPONSE).await {
        debug!("failed to answer health check: {e}");
    }
    let _ = stream.shutdown().await;
    debug!(code = HTTP_HEALTH_CHECK_CLOSE_CODE, "plain http health check answered");
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN_GET: &[u8] =
        b"GET /health HTTP/1.1\r\nhost: cs.example\r\nconnection: close\r\n\r\n";
    const UPGRADE: &[u8] = b"GET /CP001 HTTP/1.1\r\nhost: cs.example\r\nupgrade: websocket\r\nconnection: Upgrade\r\nsec-websocket-key: abc\r\n\r\n";

    #[test]
    fn plain_get_is_a_probe() {
        assert!(is_http_probe(PLAIN_GET));
    }

    #[test]
    fn websocket_upgrade_is_not_a_probe() {
        assert!(!is_http_probe(UPGRADE));
    }

    #[test]
    fn upgrade_header_is_case_insensitive() {
        let head = b"GET / HTTP/1.1\r\nUpgrade: WebSocket\r\n\r\n";
        assert!(!is_http_probe(head));
    }

    #[test]
    fn upgrade_to_something_else_is_a_probe() {
        let head = b"GET / HTTP/1.1\r\nupgrade: h2c\r\n\r\n";
        assert!(is_http_probe(head));
    }

    #[test]
    fn head_completion() {
        assert!(head_complete(PLAIN_GET));
        assert!(!head_complete(b"GET / HTTP/1.1\r\nhost: x\r\n"));
        assert!(!head_complete(b""));
    }

    #[test]
    fn close_code_is_in_private_range() {
        assert!((4000..5000).contains(&HTTP_HEALTH_CHECK_CLOSE_CODE));
    }
}
