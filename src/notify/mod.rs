//! Outgoing notifications and the single observer that receives them.

pub mod emitter;
pub mod status;

use serde_json::{Map, Value, json};

pub use emitter::{FieldFilter, ObjectRequest, StatusEmitter, filter_status};
pub use status::StatusMap;

/// One message for the observer, in Moonraker notification terms.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// `notify_status_update`: only the fields that changed, keyed by object name.
    StatusUpdate { status: Map<String, Value>, eventtime: f64 },
    /// `notify_gcode_response`: one console line.
    GcodeResponse(String),
    KlippyReady,
    KlippyDisconnected,
}

impl Notification {
    pub fn method(&self) -> &'static str {
        match self {
            Notification::StatusUpdate { .. } => "notify_status_update",
            Notification::GcodeResponse(_) => "notify_gcode_response",
            Notification::KlippyReady => "notify_klippy_ready",
            Notification::KlippyDisconnected => "notify_klippy_disconnected",
        }
    }

    /// The delta document of a status update.
    pub fn status(&self) -> Option<&Map<String, Value>> {
        match self {
            Notification::StatusUpdate { status, .. } => Some(status),
            _ => None,
        }
    }

    /// Full JSON-RPC envelope as a websocket client would receive it.
    pub fn to_jsonrpc(&self) -> Value {
        match self {
            Notification::StatusUpdate { status, eventtime } => json!({
                "jsonrpc": "2.0",
                "method": self.method(),
                "params": [status, eventtime],
            }),
            Notification::GcodeResponse(line) => json!({
                "jsonrpc": "2.0",
                "method": self.method(),
                "params": [line],
            }),
            Notification::KlippyReady | Notification::KlippyDisconnected => json!({
                "jsonrpc": "2.0",
                "method": self.method(),
            }),
        }
    }
}

/// The observer. Called from the notifier thread, one notification at a
/// time and in emission order.
pub trait NotificationSink: Send {
    fn deliver(&mut self, notification: Notification);
}

impl<F> NotificationSink for F
where
    F: FnMut(Notification) + Send,
{
    fn deliver(&mut self, notification: Notification) {
        self(notification)
    }
}
