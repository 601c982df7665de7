//! JSONL protocol envelopes.
//!
//! Every exchange with an instrument is one JSON object per line. The
//! request carries a type, a freshly generated id and an optional payload;
//! the reply mirrors the type and id and adds a result code. The id exists
//! for correlation and is never persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Outer structure of a message sent to the instrument.
///
/// `PartialEq` is deep equality over all fields, which the controller uses
/// to recognize lines the transport echoed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEnvelope {
    #[serde(rename = "type")]
    pub ty: String,
    pub id: Uuid,
    #[serde(default)]
    pub msg: Value,
}

impl SendEnvelope {
    /// A request of the given type with a random id and no payload.
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            id: Uuid::new_v4(),
            msg: Value::Null,
        }
    }

    /// A request of the given type carrying a payload.
    pub fn with_msg(ty: impl Into<String>, msg: Value) -> Self {
        Self {
            msg,
            ..Self::new(ty)
        }
    }
}

/// Outer structure of a message received from the instrument.
///
/// By convention type and id match the request that triggered the reply;
/// the controller only warns on a type mismatch and never checks the id.
/// All fields default so that sparse replies still deserialize.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecvEnvelope {
    #[serde(rename = "type", default)]
    pub ty: String,
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub msg: serde_json::Map<String, Value>,
}

impl RecvEnvelope {
    /// A zero code means success; anything else is a failure with `error`
    /// populated by the instrument.
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_envelope_wire_shape() {
        let envelope = SendEnvelope::new("net_status");
        let line = serde_json::to_string(&envelope).unwrap();
        let wire: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(wire["type"], "net_status");
        assert!(wire["msg"].is_null());
        Uuid::parse_str(wire["id"].as_str().unwrap()).unwrap();
    }

    #[test]
    fn fresh_envelopes_differ_in_id() {
        assert_ne!(SendEnvelope::new("a").id, SendEnvelope::new("a").id);
    }

    #[test]
    fn recv_envelope_tolerates_sparse_replies() {
        let reply: RecvEnvelope = serde_json::from_str(r#"{"type":"help"}"#).unwrap();
        assert_eq!(reply.ty, "help");
        assert!(reply.is_success());
        assert!(reply.error.is_empty());
        assert!(reply.msg.is_empty());
    }

    #[test]
    fn nonzero_code_is_failure() {
        let reply: RecvEnvelope = serde_json::from_str(
            r#"{"type":"net_set","id":"11f3b56f-3a05-44f0-9b70-1d3f57f712ad","code":7,"error":"nope","msg":{}}"#,
        )
        .unwrap();
        assert!(!reply.is_success());
        assert_eq!(reply.error, "nope");
    }
}
