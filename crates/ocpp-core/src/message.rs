//! The OCPP-J message model.

use serde_json::Value;

/// Wire tag for a call message.
pub const CALL_TYPE: u64 = 2;
/// Wire tag for a call result.
pub const CALL_RESULT_TYPE: u64 = 3;
/// Wire tag for a call error.
pub const CALL_ERROR_TYPE: u64 = 4;

// ── Standard OCPP call-error codes ──────────────────────────────────

/// Payload is syntactically incorrect for the action.
pub const FORMATION_VIOLATION: &str = "FormationViolation";
/// Any other error not covered by a specific code.
pub const GENERIC_ERROR: &str = "GenericError";
/// An internal error occurred while processing.
pub const INTERNAL_ERROR: &str = "InternalError";
/// Requested action is recognized but not supported.
pub const NOT_SUPPORTED: &str = "NotSupported";
/// Requested action is not known by the receiver.
pub const NOT_IMPLEMENTED: &str = "NotImplemented";
/// Payload is valid but violates occurrence constraints.
pub const OCCURRENCE_CONSTRAINT_VIOLATION: &str = "OccurrenceConstraintViolation";
/// Payload is valid but at least one field violates value constraints.
pub const PROPERTY_CONSTRAINT_VIOLATION: &str = "PropertyConstraintViolation";
/// Message violates the OCPP protocol itself.
pub const PROTOCOL_ERROR: &str = "ProtocolError";
/// Message failed a security check.
pub const SECURITY_ERROR: &str = "SecurityError";
/// A field holds a value of the wrong type.
pub const TYPE_CONSTRAINT_VIOLATION: &str = "TypeConstraintViolation";

/// A parsed OCPP message.
///
/// The correlation `id` is a caller-chosen opaque token (a UUID in
/// practice); the engine only ever echoes it. `action` appears on the wire
/// for calls only, so replies carry no action of their own.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A request, initiated by either peer.
    Call {
        /// Correlation id the receiver must echo in its reply.
        id: String,
        /// Feature action name, e.g. `StartTransaction`.
        action: String,
        /// Packed request payload.
        payload: Value,
    },
    /// The positive reply to a call.
    CallResult {
        /// Correlation id of the call being answered.
        id: String,
        /// Packed confirmation payload.
        payload: Value,
    },
    /// The negative reply to a call.
    CallError {
        /// Correlation id of the call being answered.
        id: String,
        /// One of the standard OCPP error codes.
        error_code: String,
        /// Human-readable description.
        error_description: String,
        /// The error-details element, passed through untouched.
        raw_payload: Value,
    },
    /// Input that could not be recognized as any of the above.
    Unparseable,
}

impl Message {
    /// Correlation id, when the variant carries one.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Call { id, .. } | Self::CallResult { id, .. } | Self::CallError { id, .. } => {
                Some(id)
            }
            Self::Unparseable => None,
        }
    }

    /// Action name. Only calls carry one on the wire.
    pub fn action(&self) -> Option<&str> {
        match self {
            Self::Call { action, .. } => Some(action),
            _ => None,
        }
    }

    /// Packed payload, when the variant carries one.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Call { payload, .. } | Self::CallResult { payload, .. } => Some(payload),
            Self::CallError { raw_payload, .. } => Some(raw_payload),
            Self::Unparseable => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_accessors() {
        let msg = Message::Call {
            id: "abc".into(),
            action: "Heartbeat".into(),
            payload: json!({}),
        };
        assert_eq!(msg.id(), Some("abc"));
        assert_eq!(msg.action(), Some("Heartbeat"));
        assert_eq!(msg.payload(), Some(&json!({})));
    }

    #[test]
    fn call_result_has_no_action() {
        let msg = Message::CallResult {
            id: "abc".into(),
            payload: json!({"status": "Accepted"}),
        };
        assert_eq!(msg.id(), Some("abc"));
        assert_eq!(msg.action(), None);
    }

    #[test]
    fn call_error_payload_is_details() {
        let msg = Message::CallError {
            id: "e1".into(),
            error_code: GENERIC_ERROR.into(),
            error_description: "boom".into(),
            raw_payload: json!({"hint": 1}),
        };
        assert_eq!(msg.payload(), Some(&json!({"hint": 1})));
    }

    #[test]
    fn unparseable_has_nothing() {
        let msg = Message::Unparseable;
        assert_eq!(msg.id(), None);
        assert_eq!(msg.action(), None);
        assert_eq!(msg.payload(), None);
    }
}
