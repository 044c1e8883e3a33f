use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::{ErrorSource, ImqError};

/// Events observable through [`crate::MessageQueue::subscribe`].
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// One received envelope: the user payload, the envelope id, and the
    /// name of the sending queue.
    Message {
        payload: serde_json::Value,
        id: String,
        from: String,
    },
    /// A non-fatal error, tagged with where it originated.
    Error {
        source: ErrorSource,
        error: Arc<ImqError>,
    },
}

/// Logs and broadcasts an error event. Lagging or absent subscribers are
/// not an error.
pub(crate) fn emit_error(
    sender: &broadcast::Sender<QueueEvent>,
    source: ErrorSource,
    error: ImqError,
) {
    tracing::error!(source = %source, error = %error, "queue error");
    let _ = sender.send(QueueEvent::Error {
        source,
        error: Arc::new(error),
    });
}
