//! The owner loop. Only this thread touches the `Machine`; callers talk to
//! it through `PrinterRequest`s and read published snapshots.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use super::Snapshot;
use super::channel::{NotifierMessage, PrinterRequest};
use crate::config::clamp_speedup;
use crate::gcode::{CommandError, Interpreter};
use crate::machine::Machine;
use crate::notify::Notification;
use crate::notify::StatusEmitter;
use crate::notify::status::{forced_fields, full_status};
use crate::rpc::{RpcContext, RpcRegistry, SCRIPT_ERROR};
use crate::simulator::{SimulationError, clock::scaled_step, guarded_tick};

pub(crate) struct Worker {
    machine: Machine,
    interpreter: Interpreter,
    registry: RpcRegistry,
    emitter: StatusEmitter,
    notifier: mpsc::UnboundedSender<NotifierMessage>,
    snapshot: watch::Sender<Arc<Snapshot>>,
    last_error: Option<String>,
}

impl Worker {
    pub(crate) fn new(
        machine: Machine,
        notifier: mpsc::UnboundedSender<NotifierMessage>,
        snapshot: watch::Sender<Arc<Snapshot>>,
    ) -> Self {
        let mut emitter = StatusEmitter::new();
        emitter.prime(full_status(&machine.state, &machine.config));
        Self {
            machine,
            interpreter: Interpreter::new(),
            registry: RpcRegistry::new(),
            emitter,
            notifier,
            snapshot,
            last_error: None,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<PrinterRequest>) {
        let period = self.machine.config.simulation.tick_interval();
        let auto_tick = self.machine.config.simulation.auto_tick;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!("Printer worker started (tick {:?}, auto tick {})", period, auto_tick);

        loop {
            tokio::select! {
                request = rx.recv() => {
                    match request {
                        Some(PrinterRequest::Shutdown) | None => break,
                        Some(request) => self.handle(request),
                    }
                }
                _ = interval.tick(), if auto_tick => {
                    let _ = self.tick();
                }
            }
        }
        tracing::info!("Printer worker stopped");
    }

    fn handle(&mut self, request: PrinterRequest) {
        match request {
            PrinterRequest::ExecuteGcode { script, respond_to } => {
                let result = self.execute(&script);
                let _ = respond_to.send(result);
            }
            PrinterRequest::RemoteCall { method, params, respond_to } => {
                let mut ctx = RpcContext {
                    machine: &mut self.machine,
                    interpreter: &self.interpreter,
                    emitter: &mut self.emitter,
                };
                let result = self.registry.call(&mut ctx, &method, &params);
                if let Some(Err(e)) = &result {
                    if e.code == SCRIPT_ERROR {
                        self.last_error = Some(e.message.clone());
                    }
                }
                self.publish(false);
                let _ = respond_to.send(result);
            }
            PrinterRequest::Tick { respond_to } => {
                let result = self.tick();
                let _ = respond_to.send(result);
            }
            PrinterRequest::SetSpeedup { speedup, respond_to } => {
                let clamped = clamp_speedup(speedup);
                if clamped != speedup {
                    tracing::warn!("Speedup {} clamped to {}", speedup, clamped);
                }
                self.machine.state.speedup = clamped;
                self.publish(false);
                let _ = respond_to.send(clamped);
            }
            PrinterRequest::Shutdown => {}
        }
    }

    fn execute(&mut self, script: &str) -> Result<(), CommandError> {
        let result = self.interpreter.run_script(&mut self.machine, script);
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        self.publish(false);
        result
    }

    fn tick(&mut self) -> Result<(), SimulationError> {
        let step = scaled_step(self.machine.config.simulation.tick_interval(), self.machine.state.speedup);
        match guarded_tick(&mut self.machine, step) {
            Ok(()) => {
                self.publish(true);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Skipping faulty tick: {}", e);
                Err(e)
            }
        }
    }

    /// Flush console lines, send the status delta and publish a snapshot.
    /// Heater and sensor temperatures are forced on ticks only.
    fn publish(&mut self, forced: bool) {
        for notification in self.machine.take_outbox() {
            self.send(notification);
        }
        let forced = if forced { forced_fields(&self.machine.state) } else { Vec::new() };
        let status = full_status(&self.machine.state, &self.machine.config);
        if let Some(delta) = self.emitter.diff(status, &forced) {
            self.send(Notification::StatusUpdate {
                status: delta,
                eventtime: self.machine.state.eventtime(),
            });
        }
        self.snapshot.send_replace(Arc::new(Snapshot {
            state: self.machine.state.clone(),
            last_error: self.last_error.clone(),
        }));
    }

    fn send(&self, notification: Notification) {
        if self.notifier.send(NotifierMessage::Deliver(notification)).is_err() {
            tracing::debug!("Notifier gone, dropping notification");
        }
    }
}
