use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The triple transmitted on the wire: `{id, from, message}`.
///
/// `message` is an arbitrary JSON value supplied by the producer; `from` is
/// the name of the sending queue. Fields this version does not know about
/// are carried through `extra` so envelopes from newer producers survive a
/// round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub from: String,
    pub message: serde_json::Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Envelope {
    pub(crate) fn new(from: impl Into<String>, message: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            message,
            extra: serde_json::Map::new(),
        }
    }
}
