//! fanout wire frames.
//!
//! Every frame is a JSON object sent as a WebSocket text message. The
//! `type` field names the frame kind; the remaining fields depend on it.
//! Server-to-client frames are a closed set ([`ServerFrame`]). Client
//! frames ([`ClientFrame`]) are open: kinds the server does not know are
//! still accepted and surface as [`ClientFrame::Other`].

use crate::types::ClientId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// `welcome` kind: server → client, carries the assigned identity.
pub const KIND_WELCOME: &str = "welcome";
/// `acknowledged` kind: server → client, generic receipt.
pub const KIND_ACKNOWLEDGED: &str = "acknowledged";
/// `execute` kind: server → client, operator-issued command.
pub const KIND_EXECUTE: &str = "execute";
/// `execution_result` kind: client → server, outcome of an `execute`.
pub const KIND_EXECUTION_RESULT: &str = "execution_result";
/// `bulk_data` kind: client → server, opaque data snapshot.
pub const KIND_BULK_DATA: &str = "bulk_data";
/// `ping` kind: client → server, application-level keepalive.
pub const KIND_PING: &str = "ping";

/// Errors that can occur while decoding or encoding a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The text is not valid JSON, or a known kind has malformed fields.
    #[error("invalid frame json: {0}")]
    Json(#[from] serde_json::Error),
    /// The JSON value is not an object.
    #[error("frame is not a json object")]
    NotAnObject,
    /// The object has no string `type` field.
    #[error("frame has no type")]
    MissingKind,
    /// A binary message did not contain UTF-8 text.
    #[error("frame is not utf-8")]
    NotUtf8,
}

/// A frame sent by the server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame on every admitted link.
    Welcome {
        /// Identity assigned to this link.
        identity: ClientId,
        /// Human-readable greeting.
        message: String,
    },
    /// Reply to any client frame of an unrecognized kind.
    Acknowledged {
        /// Human-readable receipt text.
        message: String,
        /// Server time of the reply.
        timestamp: DateTime<Utc>,
    },
    /// Command distributed to every admitted client.
    Execute {
        /// Opaque command payload.
        payload: String,
        /// Server time of the broadcast.
        timestamp: DateTime<Utc>,
    },
}

impl ServerFrame {
    /// Creates a `Welcome` frame.
    #[must_use]
    pub fn welcome(identity: ClientId) -> Self {
        Self::Welcome {
            identity,
            message: crate::types::WELCOME_MESSAGE.to_string(),
        }
    }

    /// Creates an `Acknowledged` frame stamped with the current time.
    #[must_use]
    pub fn acknowledged() -> Self {
        Self::Acknowledged {
            message: crate::types::ACK_MESSAGE.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Creates an `Execute` frame stamped with the current time.
    #[must_use]
    pub fn execute(payload: &str) -> Self {
        Self::Execute {
            payload: payload.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// The wire kind of this frame.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => KIND_WELCOME,
            Self::Acknowledged { .. } => KIND_ACKNOWLEDGED,
            Self::Execute { .. } => KIND_EXECUTE,
        }
    }

    /// Encodes this frame as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Json`] if serialization fails.
    pub fn to_text(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a server frame from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Json`] if the text is not a known server frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// A frame sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Outcome of a previously distributed `execute` frame.
    ExecutionResult {
        /// Whether the command ran without error.
        success: bool,
        /// Result value reported on success.
        result: Option<Value>,
        /// Error text reported on failure.
        error: Option<String>,
        /// Client-side timestamp, as sent.
        timestamp: Option<String>,
    },
    /// Opaque bulk data; replaces the previous snapshot for this client.
    BulkData {
        /// Data as sent by the client.
        data: String,
        /// Client-side timestamp, as sent.
        timestamp: Option<String>,
    },
    /// Keepalive; never answered.
    Ping {
        /// Client-side timestamp, as sent.
        timestamp: Option<String>,
    },
    /// Any kind the server does not interpret.
    Other {
        /// The declared `type` value.
        kind: String,
    },
}

/// Serde mirror of the client kinds the server interprets.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownClientFrame {
    ExecutionResult {
        #[serde(default)]
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    BulkData {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
}

impl From<KnownClientFrame> for ClientFrame {
    fn from(known: KnownClientFrame) -> Self {
        match known {
            KnownClientFrame::ExecutionResult {
                success,
                result,
                error,
                timestamp,
            } => Self::ExecutionResult {
                success,
                result,
                error,
                timestamp,
            },
            KnownClientFrame::BulkData { data, timestamp } => Self::BulkData { data, timestamp },
            KnownClientFrame::Ping { timestamp } => Self::Ping { timestamp },
        }
    }
}

impl ClientFrame {
    /// Creates a `Ping` frame stamped with the current time.
    #[must_use]
    pub fn ping() -> Self {
        Self::Ping {
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    /// The wire kind of this frame.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::ExecutionResult { .. } => KIND_EXECUTION_RESULT,
            Self::BulkData { .. } => KIND_BULK_DATA,
            Self::Ping { .. } => KIND_PING,
            Self::Other { kind } => kind,
        }
    }

    /// Parses JSON text into a typed `ClientFrame`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the text is not a JSON object with a
    /// string `type`, or if a known kind carries fields of the wrong shape.
    ///
    /// # Examples
    ///
    /// ```
    /// use fanout_common::frame::ClientFrame;
    /// let frame = ClientFrame::parse(r#"{"type":"hello"}"#).unwrap();
    /// assert_eq!(frame, ClientFrame::Other { kind: "hello".into() });
    /// ```
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .as_object()
            .ok_or(FrameError::NotAnObject)?
            .get("type")
            .and_then(Value::as_str)
            .ok_or(FrameError::MissingKind)?;

        if !matches!(kind, KIND_EXECUTION_RESULT | KIND_BULK_DATA | KIND_PING) {
            return Ok(Self::Other {
                kind: kind.to_string(),
            });
        }
        let known: KnownClientFrame = serde_json::from_value(value)?;
        Ok(known.into())
    }

    /// Parses a binary message as UTF-8 JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::NotUtf8`] for non-UTF-8 data, otherwise the
    /// same errors as [`ClientFrame::parse`].
    pub fn parse_bytes(data: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(data).map_err(|_| FrameError::NotUtf8)?;
        Self::parse(text)
    }

    /// Encodes this frame as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Json`] if serialization fails.
    pub fn to_text(&self) -> Result<String, FrameError> {
        let known = match self.clone() {
            Self::ExecutionResult {
                success,
                result,
                error,
                timestamp,
            } => KnownClientFrame::ExecutionResult {
                success,
                result,
                error,
                timestamp,
            },
            Self::BulkData { data, timestamp } => KnownClientFrame::BulkData { data, timestamp },
            Self::Ping { timestamp } => KnownClientFrame::Ping { timestamp },
            Self::Other { kind } => {
                return Ok(serde_json::json!({ "type": kind }).to_string());
            }
        };
        Ok(serde_json::to_string(&known)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_encodes_type_and_identity() {
        let id = ClientId::from(7);
        let text = ServerFrame::welcome(id).to_text().unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "welcome");
        assert_eq!(v["identity"], id.to_string());
    }

    #[test]
    fn execute_encodes_payload_and_rfc3339_timestamp() {
        let text = ServerFrame::execute("do it").to_text().unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "execute");
        assert_eq!(v["payload"], "do it");
        let ts = v["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn server_frame_parses_back() {
        let frame = ServerFrame::acknowledged();
        let parsed = ServerFrame::parse(&frame.to_text().unwrap()).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(parsed.kind(), KIND_ACKNOWLEDGED);
    }

    #[test]
    fn parse_execution_result_success() {
        let frame = ClientFrame::parse(
            r#"{"type":"execution_result","success":true,"result":42,"timestamp":"t"}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            ClientFrame::ExecutionResult {
                success: true,
                result: Some(serde_json::json!(42)),
                error: None,
                timestamp: Some("t".into()),
            }
        );
    }

    #[test]
    fn parse_execution_result_defaults_success_to_false() {
        let frame = ClientFrame::parse(r#"{"type":"execution_result","error":"boom"}"#).unwrap();
        let ClientFrame::ExecutionResult { success, error, .. } = frame else {
            panic!("expected execution result");
        };
        assert!(!success);
        assert_eq!(error.as_deref(), Some("boom"));
    }

    #[test]
    fn parse_bulk_data() {
        let frame = ClientFrame::parse(r#"{"type":"bulk_data","data":"abc"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::BulkData {
                data: "abc".into(),
                timestamp: None,
            }
        );
    }

    #[test]
    fn bulk_data_without_data_is_error() {
        assert!(matches!(
            ClientFrame::parse(r#"{"type":"bulk_data"}"#),
            Err(FrameError::Json(_))
        ));
    }

    #[test]
    fn parse_ping() {
        let frame = ClientFrame::parse(r#"{"type":"ping","timestamp":"now"}"#).unwrap();
        assert_eq!(frame.kind(), KIND_PING);
    }

    #[test]
    fn unknown_kind_is_other() {
        let frame = ClientFrame::parse(r#"{"type":"status","extra":[1,2]}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Other {
                kind: "status".into()
            }
        );
    }

    #[test]
    fn invalid_json_is_error() {
        assert!(matches!(
            ClientFrame::parse("not json"),
            Err(FrameError::Json(_))
        ));
    }

    #[test]
    fn non_object_is_error() {
        assert!(matches!(
            ClientFrame::parse("[1,2,3]"),
            Err(FrameError::NotAnObject)
        ));
    }

    #[test]
    fn missing_or_non_string_type_is_error() {
        assert!(matches!(
            ClientFrame::parse(r#"{"data":1}"#),
            Err(FrameError::MissingKind)
        ));
        assert!(matches!(
            ClientFrame::parse(r#"{"type":5}"#),
            Err(FrameError::MissingKind)
        ));
    }

    #[test]
    fn parse_bytes_rejects_invalid_utf8() {
        assert!(matches!(
            ClientFrame::parse_bytes(&[0xff, 0xfe]),
            Err(FrameError::NotUtf8)
        ));
    }

    #[test]
    fn client_frame_text_parses_back() {
        for frame in [
            ClientFrame::ping(),
            ClientFrame::BulkData {
                data: "x".into(),
                timestamp: None,
            },
            ClientFrame::Other {
                kind: "hello".into(),
            },
        ] {
            assert_eq!(ClientFrame::parse(&frame.to_text().unwrap()).unwrap(), frame);
        }
    }
}
