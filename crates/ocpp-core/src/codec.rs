//! Payload packing and OCPP-J envelope building.
//!
//! The codec is a capability injected into the
//! [`Communicator`](crate::communicator::Communicator) rather than a
//! subclassing point: format variants are data, not types. Envelope
//! builders are pure so they can be reused for logging and tracing.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::CodecError;
use crate::message::{Message, CALL_ERROR_TYPE, CALL_RESULT_TYPE, CALL_TYPE};

/// Packs payloads and builds/parses wire envelopes for one OCPP binding.
pub trait FrameCodec: Send + Sync + 'static {
    /// Convert a typed payload into its packed wire fragment.
    fn pack<T: Serialize>(&self, payload: &T) -> Result<Value, CodecError>;

    /// Convert a packed wire fragment back into a typed payload.
    ///
    /// This is how call results are read, where the confirmation type is
    /// known to the caller but absent from the wire.
    fn unpack<T: DeserializeOwned>(&self, payload: &Value) -> Result<T, CodecError>;

    /// Build a call envelope ready to transmit.
    fn make_call(&self, id: &str, action: &str, payload: Value) -> String;

    /// Build a call-result envelope ready to transmit.
    ///
    /// `action` is not part of the wire form; it is carried for logging.
    fn make_call_result(&self, id: &str, action: &str, payload: Value) -> String;

    /// Build a call-error envelope ready to transmit.
    fn make_call_error(
        &self,
        id: &str,
        action: &str,
        error_code: &str,
        error_description: &str,
    ) -> String;

    /// Identify an incoming wire object.
    ///
    /// Total: malformed input yields [`Message::Unparseable`], never an
    /// error.
    fn parse(&self, wire: &str) -> Message;
}

/// The OCPP-J binding: JSON arrays tagged by a leading message-type
/// integer.
///
/// | Tag | Shape |
/// |-----|-------|
/// | 2   | `[2, id, action, payload]` |
/// | 3   | `[3, id, payload]` |
/// | 4   | `[4, id, errorCode, errorDescription, errorDetails]` |
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl FrameCodec for JsonCodec {
    fn pack<T: Serialize>(&self, payload: &T) -> Result<Value, CodecError> {
        serde_json::to_value(payload).map_err(|e| CodecError::Conversion {
            message: e.to_string(),
        })
    }

    fn unpack<T: DeserializeOwned>(&self, payload: &Value) -> Result<T, CodecError> {
        serde_json::from_value(payload.clone()).map_err(|e| CodecError::Conversion {
            message: e.to_string(),
        })
    }

    fn make_call(&self, id: &str, action: &str, payload: Value) -> String {
        json!([CALL_TYPE, id, action, payload]).to_string()
    }

    fn make_call_result(&self, id: &str, _action: &str, payload: Value) -> String {
        json!([CALL_RESULT_TYPE, id, payload]).to_string()
    }

    fn make_call_error(
        &self,
        id: &str,
        _action: &str,
        error_code: &str,
        error_description: &str,
    ) -> String {
        json!([CALL_ERROR_TYPE, id, error_code, error_description, {}]).to_string()
    }

    fn parse(&self, wire: &str) -> Message {
        let Ok(value) = serde_json::from_str::<Value>(wire) else {
            return Message::Unparseable;
        };
        let Some(elements) = value.as_array() else {
            return Message::Unparseable;
        };
        let Some(tag) = elements.first().and_then(Value::as_u64) else {
            return Message::Unparseable;
        };
        let id = match elements.get(1).and_then(Value::as_str) {
            Some(id) => id.to_owned(),
            None => return Message::Unparseable,
        };

        match (tag, elements.len()) {
            (CALL_TYPE, 4) => {
                let Some(action) = elements[2].as_str() else {
                    return Message::Unparseable;
                };
                Message::Call {
                    id,
                    action: action.to_owned(),
                    payload: elements[3].clone(),
                }
            }
            (CALL_RESULT_TYPE, 3) => Message::CallResult {
                id,
                payload: elements[2].clone(),
            },
            (CALL_ERROR_TYPE, 5) => {
                let (Some(code), Some(description)) =
                    (elements[2].as_str(), elements[3].as_str())
                else {
                    return Message::Unparseable;
                };
                Message::CallError {
                    id,
                    error_code: code.to_owned(),
                    error_description: description.to_owned(),
                    raw_payload: elements[4].clone(),
                }
            }
            _ => Message::Unparseable,
        }
    }
}
