//! Messages between the `Printer` handle and its owner thread.

use serde_json::Value;
use tokio::sync::oneshot;

use crate::gcode::CommandError;
use crate::notify::{Notification, NotificationSink};
use crate::rpc::RpcError;
use crate::simulator::SimulationError;

/// A request for the worker that owns the machine.
#[derive(Debug)]
pub enum PrinterRequest {
    /// Run a G-code script (one or more lines).
    ExecuteGcode {
        script: String,
        respond_to: oneshot::Sender<Result<(), CommandError>>,
    },
    /// Dispatch a remote call. `None` means no handler is registered.
    RemoteCall {
        method: String,
        params: Value,
        respond_to: oneshot::Sender<Option<Result<Value, RpcError>>>,
    },
    /// Advance the simulation by one tick now.
    Tick {
        respond_to: oneshot::Sender<Result<(), SimulationError>>,
    },
    /// Change the simulation speedup. Replies with the clamped value.
    SetSpeedup {
        speedup: f64,
        respond_to: oneshot::Sender<f64>,
    },
    Shutdown,
}

/// Work for the notifier thread. Observer changes travel in the same queue
/// as notifications so both keep their relative order.
pub enum NotifierMessage {
    Deliver(Notification),
    SetObserver(Box<dyn NotificationSink>),
    ClearObserver,
}

impl std::fmt::Debug for NotifierMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifierMessage::Deliver(n) => f.debug_tuple("Deliver").field(n).finish(),
            NotifierMessage::SetObserver(_) => f.write_str("SetObserver(..)"),
            NotifierMessage::ClearObserver => f.write_str("ClearObserver"),
        }
    }
}
