//! The worker-owned machine: canonical state plus everything a command
//! handler or the tick needs to touch while mutating it.

use std::collections::VecDeque;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::Config;
use crate::gcode::CommandError;
use crate::notify::Notification;
use crate::state::{Axis, KlippyState, MachineState};
use crate::simulator::clock::SimClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartKind {
    /// Host restart (`RESTART`, `SAVE_CONFIG`).
    Host,
    /// MCU reset (`FIRMWARE_RESTART`).
    Firmware,
}

#[derive(Debug, Clone)]
pub struct Machine {
    pub(crate) state: MachineState,
    pub(crate) config: Arc<Config>,
    pub(crate) rng: StdRng,
    pub(crate) clock: SimClock,
    /// Console lines produced while handling the current event.
    pub(crate) outbox: Vec<Notification>,
    /// Calibration output streamed a few lines per tick.
    pub(crate) pending_lines: VecDeque<String>,
    /// Simulated time at which klippy becomes ready again.
    pub(crate) pending_restart: Option<f64>,
    pub(crate) last_activity: f64,
}

impl Machine {
    pub fn new(config: Arc<Config>) -> Self {
        let rng = match config.simulation.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            state: MachineState::new(&config),
            config,
            rng,
            clock: SimClock::new(),
            outbox: Vec::new(),
            pending_lines: VecDeque::new(),
            pending_restart: None,
            last_activity: 0.0,
        }
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    pub fn now(&self) -> f64 {
        self.clock.seconds()
    }

    pub fn respond(&mut self, line: impl Into<String>) {
        self.outbox.push(Notification::GcodeResponse(line.into()));
    }

    /// Queue lines for the tick to stream out.
    pub fn stream<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending_lines.extend(lines.into_iter().map(Into::into));
    }

    pub fn take_outbox(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }

    /// Any command counts as activity and cancels an idle timeout.
    pub fn mark_activity(&mut self) {
        self.last_activity = self.now();
        self.state.idle_timeout_triggered = false;
    }

    pub fn set_heater_target(&mut self, heater: &str, target: f64) -> Result<(), CommandError> {
        if !self.state.heaters.contains_key(heater) {
            return Err(CommandError::UnknownHeater(heater.to_string()));
        }
        let thermal = self.config.thermal_for(heater);
        if target != 0.0 && (target < thermal.min_temp || target > thermal.max_temp) {
            return Err(CommandError::TemperatureOutOfRange {
                value: target,
                min: thermal.min_temp,
                max: thermal.max_temp,
            });
        }
        if let Some(state) = self.state.heaters.get_mut(heater) {
            state.target_temp = target;
        }
        tracing::info!("Setting {} target temperature to {:.1}C", heater, target);
        Ok(())
    }

    /// Home the given axes, or all of them when `axes` is empty.
    pub fn home(&mut self, axes: &[Axis]) {
        let axes: &[Axis] = if axes.is_empty() { &Axis::ALL } else { axes };
        for &axis in axes {
            self.state.pose.set(axis, 0.0);
            self.state.pose.homed_axes.insert(axis);
        }
        self.state.motors_enabled = true;
        tracing::debug!("Homed {}", self.state.pose.homed_axes_string());
    }

    pub fn disable_motors(&mut self) {
        self.state.disable_motors();
        tracing::info!("Motors disabled");
    }

    pub fn start_print(&mut self, filename: &str) {
        let metadata = self.config.job_metadata(filename);
        if let Err(e) = self.state.job.start(filename, &metadata) {
            tracing::warn!("Ignoring print start for {}: {}", filename, e);
            return;
        }
        self.state.exclusions.clear();
        for object in &metadata.objects {
            self.state.exclusions.define(object);
        }
        for (heater, target) in [("extruder", metadata.nozzle_temp), ("heater_bed", metadata.bed_temp)] {
            if let Some(state) = self.state.heaters.get_mut(heater) {
                state.target_temp = target;
            }
        }
        if self.config.simulation.simulate_print_start {
            self.home(&[]);
            self.stream([
                format!("// PRINT_START BED={:.0} EXTRUDER={:.0}", metadata.bed_temp, metadata.nozzle_temp),
                "// Homing all axes".to_string(),
                format!("// Heating bed to {:.0}C", metadata.bed_temp),
                format!("// Heating extruder to {:.0}C", metadata.nozzle_temp),
            ]);
        }
    }

    pub fn pause_print(&mut self) {
        if let Err(e) = self.state.job.pause() {
            tracing::warn!("Ignoring pause: {}", e);
        }
    }

    pub fn resume_print(&mut self) {
        if let Err(e) = self.state.job.resume() {
            tracing::warn!("Ignoring resume: {}", e);
        }
    }

    pub fn cancel_print(&mut self) {
        match self.state.job.cancel() {
            Ok(()) => {
                self.state.clear_heater_targets();
                self.state.exclusions.current_object = None;
            }
            Err(e) => tracing::warn!("Ignoring cancel: {}", e),
        }
    }

    pub fn emergency_stop(&mut self) {
        self.state.job.emergency_stop();
        self.state.clear_heater_targets();
        self.pending_lines.clear();
        self.respond("!! Emergency stop");
    }

    /// Drop to startup and schedule the return to ready in simulated time.
    pub fn restart(&mut self, kind: RestartKind) {
        let delay = match kind {
            RestartKind::Host => self.config.simulation.restart_delay,
            RestartKind::Firmware => self.config.simulation.firmware_restart_delay,
        };
        tracing::info!("{:?} restart, ready in {:.1}s simulated", kind, delay);
        self.state.klippy = KlippyState::Startup;
        self.state.job.reset();
        self.state.clear_heater_targets();
        self.state.exclusions.clear();
        self.state.probe.active = false;
        self.pending_lines.clear();
        self.pending_restart = Some(self.now() + delay);
        self.outbox.push(Notification::KlippyDisconnected);
    }

    /// Complete a pending restart once its deadline has passed.
    pub(crate) fn poll_restart(&mut self) {
        if let Some(deadline) = self.pending_restart {
            if self.now() >= deadline {
                self.pending_restart = None;
                self.state.klippy = KlippyState::Ready;
                self.outbox.push(Notification::KlippyReady);
                tracing::info!("Klippy ready");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::print_job::PrintPhase;

    fn machine() -> Machine {
        let mut config = Config::default();
        config.simulation.seed = Some(1);
        Machine::new(Arc::new(config))
    }

    #[test]
    fn test_heater_target_validation() {
        let mut m = machine();
        m.set_heater_target("extruder", 200.0).unwrap();
        assert_eq!(m.state.heater("extruder").unwrap().target_temp, 200.0);
        assert!(matches!(
            m.set_heater_target("extruder", 400.0),
            Err(CommandError::TemperatureOutOfRange { .. })
        ));
        assert!(matches!(m.set_heater_target("chamber", 40.0), Err(CommandError::UnknownHeater(_))));
        assert_eq!(m.state.heater("extruder").unwrap().target_temp, 200.0);
    }

    #[test]
    fn test_home_subset_and_all() {
        let mut m = machine();
        m.state.pose.x = 10.0;
        m.state.pose.y = 20.0;
        m.home(&[Axis::X]);
        assert_eq!(m.state.pose.x, 0.0);
        assert_eq!(m.state.pose.y, 20.0);
        assert_eq!(m.state.pose.homed_axes_string(), "x");
        m.home(&[]);
        assert!(m.state.pose.is_homed());
        assert!(m.state.motors_enabled);
    }

    #[test]
    fn test_start_print_sets_preheat_targets() {
        let mut m = machine();
        m.state.exclusions.exclude("old");
        m.start_print("cube.gcode");
        assert_eq!(m.state.job.phase, PrintPhase::Preheat);
        assert_eq!(m.state.heater("extruder").unwrap().target_temp, 210.0);
        assert_eq!(m.state.heater("heater_bed").unwrap().target_temp, 60.0);
        assert!(m.state.exclusions.excluded.is_empty());
        assert!(!m.pending_lines.is_empty());
    }

    #[test]
    fn test_restart_schedules_ready() {
        let mut m = machine();
        m.start_print("cube.gcode");
        m.restart(RestartKind::Firmware);
        assert_eq!(m.state.klippy, KlippyState::Startup);
        assert_eq!(m.state.job.phase, PrintPhase::Idle);
        assert_eq!(m.state.heater("extruder").unwrap().target_temp, 0.0);
        m.poll_restart();
        assert_eq!(m.state.klippy, KlippyState::Startup);
        m.clock.advance(std::time::Duration::from_secs(3));
        m.poll_restart();
        assert_eq!(m.state.klippy, KlippyState::Ready);
        assert_eq!(m.take_outbox(), vec![Notification::KlippyDisconnected, Notification::KlippyReady]);
    }
}
