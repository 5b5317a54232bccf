//! The engine handle.
//!
//! `Printer` owns two threads. The worker runs a current-thread tokio
//! runtime and is the only code that touches the machine: commands, remote
//! calls and ticks are all requests in one queue, so they never interleave.
//! After every request the worker publishes an immutable snapshot, which is
//! what the query accessors read. The notifier thread hands notifications to
//! the observer in emission order, outside the worker.
//!
//! The handle's methods block on the worker's reply and must not be called
//! from inside an async runtime.

pub mod channel;
mod notifier;
mod worker;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::{Config, ConfigError};
use crate::gcode::CommandError;
use crate::machine::Machine;
use crate::notify::NotificationSink;
use crate::print_job::PrintJob;
use crate::rpc::RpcError;
use crate::simulator::SimulationError;
use crate::state::{
    BedMesh, ExclusionSet, FanState, HeaterState, KlippyState, LedEffectState, LedState, MachinePose,
    MachineState, ManualProbeSession, SensorState,
};
use channel::{NotifierMessage, PrinterRequest};
use worker::Worker;

/// Code reported to `on_error` when the engine is no longer running.
pub const ENGINE_STOPPED: i64 = 503;

#[derive(Debug, Error)]
pub enum PrinterError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to build worker runtime: {0}")]
    Runtime(std::io::Error),
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn { name: &'static str, source: std::io::Error },
    #[error("{0}")]
    Rejected(#[from] CommandError),
    #[error("Tick failed: {0}")]
    Simulation(#[from] SimulationError),
    #[error("Printer engine is stopped")]
    Stopped,
    #[error("Worker did not stop within {0:?}, detached")]
    ShutdownTimeout(Duration),
    #[error("Worker thread panicked")]
    WorkerPanicked,
}

/// What the worker published after its last event.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: MachineState,
    /// Message of the most recent rejected command, kept until the next rejection.
    pub last_error: Option<String>,
}

pub struct Printer {
    requests: mpsc::UnboundedSender<PrinterRequest>,
    notifier: Option<mpsc::UnboundedSender<NotifierMessage>>,
    snapshot: watch::Receiver<Arc<Snapshot>>,
    worker: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl Printer {
    pub fn new(config: Config) -> Result<Self, PrinterError> {
        config.validate()?;
        let config = Arc::new(config);
        let shutdown_timeout = config.simulation.shutdown_timeout();
        let machine = Machine::new(config);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(PrinterError::Runtime)?;

        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("printer-notifier".to_string())
            .spawn(move || notifier::run(notify_rx))
            .map_err(|source| PrinterError::Spawn { name: "notifier", source })?;

        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(Snapshot {
            state: machine.state.clone(),
            last_error: None,
        }));
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let worker = Worker::new(machine, notify_tx.clone(), snapshot_tx);
        let handle = std::thread::Builder::new()
            .name("printer-worker".to_string())
            .spawn(move || runtime.block_on(worker.run(request_rx)))
            .map_err(|source| PrinterError::Spawn { name: "worker", source })?;

        tracing::info!("Virtual printer started");
        Ok(Self {
            requests: request_tx,
            notifier: Some(notify_tx),
            snapshot: snapshot_rx,
            worker: Some(handle),
            shutdown_timeout,
        })
    }

    fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> PrinterRequest) -> Result<T, PrinterError> {
        let (tx, rx) = oneshot::channel();
        self.requests.send(build(tx)).map_err(|_| PrinterError::Stopped)?;
        rx.blocking_recv().map_err(|_| PrinterError::Stopped)
    }

    /// Run a G-code script. Stops at the first rejected line.
    pub fn gcode_script(&self, script: &str) -> Result<(), PrinterError> {
        self.request(|respond_to| PrinterRequest::ExecuteGcode {
            script: script.to_string(),
            respond_to,
        })??;
        Ok(())
    }

    /// 0 when accepted, 1 when rejected; see `last_error` for the reason.
    pub fn execute_text_command(&self, command: &str) -> i32 {
        match self.gcode_script(command) {
            Ok(()) => 0,
            Err(e) => {
                tracing::debug!("Command '{}' not accepted: {}", command, e);
                1
            }
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.snapshot.borrow().last_error.clone()
    }

    /// Dispatch a remote call. `Ok(None)` when the method is not registered.
    pub fn call(&self, method: &str, params: Value) -> Result<Option<Result<Value, RpcError>>, PrinterError> {
        self.request(|respond_to| PrinterRequest::RemoteCall {
            method: method.to_string(),
            params,
            respond_to,
        })
    }

    /// Callback form of `call`. Neither callback fires for an unknown method.
    pub fn invoke_remote_call<S, E>(&self, method: &str, params: Value, on_success: S, on_error: E)
    where
        S: FnOnce(Value),
        E: FnOnce(RpcError),
    {
        match self.call(method, params) {
            Ok(Some(Ok(result))) => on_success(result),
            Ok(Some(Err(e))) => on_error(e),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Remote call {} failed: {}", method, e);
                on_error(RpcError { code: ENGINE_STOPPED, message: e.to_string() });
            }
        }
    }

    /// Register the single observer, replacing any previous one.
    pub fn set_observer<S>(&self, sink: S)
    where
        S: NotificationSink + 'static,
    {
        self.notify(NotifierMessage::SetObserver(Box::new(sink)));
    }

    pub fn clear_observer(&self) {
        self.notify(NotifierMessage::ClearObserver);
    }

    fn notify(&self, message: NotifierMessage) {
        let sent = self.notifier.as_ref().is_some_and(|tx| tx.send(message).is_ok());
        if !sent {
            tracing::warn!("Notifier is stopped, observer change ignored");
        }
    }

    /// Run one simulation tick now, independent of the automatic schedule.
    pub fn tick(&self) -> Result<(), PrinterError> {
        self.request(|respond_to| PrinterRequest::Tick { respond_to })??;
        Ok(())
    }

    /// Returns the speedup actually applied after clamping.
    pub fn set_speedup(&self, speedup: f64) -> Result<f64, PrinterError> {
        self.request(|respond_to| PrinterRequest::SetSpeedup { speedup, respond_to })
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> MachineState {
        self.snapshot.borrow().state.clone()
    }

    pub fn position(&self) -> MachinePose {
        self.snapshot.borrow().state.pose().clone()
    }

    pub fn heaters(&self) -> BTreeMap<String, HeaterState> {
        self.snapshot.borrow().state.heaters().clone()
    }

    pub fn heater(&self, name: &str) -> Option<HeaterState> {
        self.snapshot.borrow().state.heater(name)
    }

    pub fn fans(&self) -> BTreeMap<String, FanState> {
        self.snapshot.borrow().state.fans().clone()
    }

    pub fn leds(&self) -> BTreeMap<String, LedState> {
        self.snapshot.borrow().state.leds().clone()
    }

    pub fn led_effects(&self) -> BTreeMap<String, LedEffectState> {
        self.snapshot.borrow().state.led_effects().clone()
    }

    pub fn sensors(&self) -> BTreeMap<String, SensorState> {
        self.snapshot.borrow().state.sensors().clone()
    }

    pub fn bed_mesh(&self) -> BedMesh {
        self.snapshot.borrow().state.bed_mesh().clone()
    }

    pub fn print_job(&self) -> PrintJob {
        self.snapshot.borrow().state.print_job().clone()
    }

    pub fn excluded_objects(&self) -> ExclusionSet {
        self.snapshot.borrow().state.exclusions().clone()
    }

    pub fn manual_probe(&self) -> ManualProbeSession {
        self.snapshot.borrow().state.manual_probe()
    }

    pub fn klippy_state(&self) -> KlippyState {
        self.snapshot.borrow().state.klippy_state()
    }

    pub fn speedup(&self) -> f64 {
        self.snapshot.borrow().state.speedup()
    }

    /// Stop the worker, waiting at most the configured shutdown timeout.
    /// A worker that does not stop in time is detached. Idempotent.
    pub fn shutdown(&mut self) -> Result<(), PrinterError> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        tracing::info!("Shutting down virtual printer");
        let _ = self.requests.send(PrinterRequest::Shutdown);
        // The notifier exits once the worker's sender is gone too.
        self.notifier = None;

        let deadline = Instant::now() + self.shutdown_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!("Worker still busy after {:?}, detaching", self.shutdown_timeout);
                return Err(PrinterError::ShutdownTimeout(self.shutdown_timeout));
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        handle.join().map_err(|_| PrinterError::WorkerPanicked)
    }
}

impl Drop for Printer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!("Unclean shutdown: {}", e);
        }
    }
}
