//! HTTP Basic authentication at handshake time.

use base64::Engine;

use crate::config::ListenerConfig;

/// A handshake rejection carrying its own HTTP status code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct AuthenticationError {
    /// HTTP status the handshake response uses.
    pub error_code: u16,
    /// Reason, also used as the response body.
    pub message: String,
}

impl AuthenticationError {
    /// Create a rejection with an explicit status code.
    pub fn new(error_code: u16, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
        }
    }
}

/// Credentials extracted from an `Authorization` header.
///
/// Both fields stay `None` when the header is not a decodable Basic
/// scheme; `password` alone stays `None` when the decoded credentials
/// hold nothing after the first `:` (or no `:` at all).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Everything before the first `:` of the decoded credentials.
    pub username: Option<String>,
    /// Everything after the first `:`.
    pub password: Option<String>,
}

/// Parse an `Authorization` header value as Basic credentials.
///
/// Total: anything unusable yields empty credentials, which fail the
/// password-length check downstream.
pub fn parse_basic(header: &str) -> Credentials {
    let Some(encoded) = strip_basic_prefix(header) else {
        return Credentials::default();
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
        return Credentials::default();
    };
    let Some(separator) = decoded.iter().position(|byte| *byte == b':') else {
        return Credentials::default();
    };
    let username = String::from_utf8_lossy(&decoded[..separator]).into_owned();
    let password = (separator + 1 < decoded.len())
        .then(|| String::from_utf8_lossy(&decoded[separator + 1..]).into_owned());
    Credentials {
        username: Some(username),
        password,
    }
}

fn strip_basic_prefix(header: &str) -> Option<&str> {
    let (scheme, rest) = header.split_once(' ')?;
    scheme.eq_ignore_ascii_case("basic").then_some(rest)
}

/// Enforce the configured password-length bounds.
///
/// Applied only when an `Authorization` header was present; a missing or
/// out-of-bounds password rejects the handshake with 401 before the
/// application is consulted.
pub fn check_password_length(
    password: Option<&str>,
    config: &ListenerConfig,
) -> Result<(), AuthenticationError> {
    let acceptable = password.is_some_and(|p| {
        (config.min_password_length..=config.max_password_length).contains(&p.len())
    });
    if acceptable {
        Ok(())
    } else {
        Err(AuthenticationError::new(401, "Invalid password length"))
    }
}
