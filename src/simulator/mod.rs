pub mod clock;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use thiserror::Error;

use crate::hardware::{advance_heater, sensor_temperature};
use crate::machine::Machine;
use crate::print_job::PrintPhase;

/// Streamed console lines released per tick.
pub const LINES_PER_TICK: usize = 4;
/// Preheat ends once every heated target is within this many degrees.
pub const PREHEAT_TOLERANCE: f64 = 2.0;
/// A finished job returns to standby below these temperatures.
pub const COOLDOWN_EXTRUDER: f64 = 50.0;
pub const COOLDOWN_BED: f64 = 35.0;

#[derive(Debug, Error, PartialEq)]
pub enum SimulationError {
    #[error("Heater {0} produced a non-finite temperature")]
    NonFiniteTemperature(String),
    #[error("Tick panicked: {0}")]
    Panicked(String),
}

/// Run one tick on a copy of the machine and keep the result only if the
/// tick succeeds. A failed or panicking tick leaves `machine` untouched.
pub fn guarded_tick(machine: &mut Machine, step: Duration) -> Result<(), SimulationError> {
    let mut next = machine.clone();
    let outcome = catch_unwind(AssertUnwindSafe(|| tick(&mut next, step)));
    match outcome {
        Ok(Ok(())) => {
            *machine = next;
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(SimulationError::Panicked(message))
        }
    }
}

/// Advance the simulation by `step` of simulated time.
pub fn tick(machine: &mut Machine, step: Duration) -> Result<(), SimulationError> {
    machine.clock.advance(step);
    let dt = step.as_secs_f64();
    let now = machine.now();
    machine.state.eventtime = now;
    machine.poll_restart();

    update_thermals(machine, dt)?;
    update_job(machine, dt);
    check_idle_timeout(machine);

    for _ in 0..LINES_PER_TICK {
        match machine.pending_lines.pop_front() {
            Some(line) => machine.respond(line),
            None => break,
        }
    }
    Ok(())
}

fn update_thermals(machine: &mut Machine, dt: f64) -> Result<(), SimulationError> {
    let ambient = machine.config.simulation.ambient_temp;
    for (name, heater) in machine.state.heaters.iter_mut() {
        let thermal = machine.config.thermal_for(name);
        advance_heater(heater, &thermal, ambient, dt, &mut machine.rng);
        if !heater.current_temp.is_finite() {
            return Err(SimulationError::NonFiniteTemperature(name.clone()));
        }
    }
    let printing = machine.state.job.phase.is_active();
    let now = machine.state.eventtime;
    for (name, sensor) in machine.state.sensors.iter_mut() {
        sensor.temperature = sensor_temperature(name, now, ambient, printing);
    }
    Ok(())
}

fn within_target(machine: &Machine, heater: &str, tolerance: f64) -> bool {
    match machine.state.heater(heater) {
        Some(h) if h.target_temp > 0.0 => (h.current_temp - h.target_temp).abs() <= tolerance,
        _ => true,
    }
}

fn below(machine: &Machine, heater: &str, limit: f64) -> bool {
    machine.state.heater(heater).is_none_or(|h| h.current_temp < limit)
}

fn update_job(machine: &mut Machine, dt: f64) {
    match machine.state.job.phase {
        PrintPhase::Preheat => {
            if within_target(machine, "extruder", PREHEAT_TOLERANCE)
                && within_target(machine, "heater_bed", PREHEAT_TOLERANCE)
                && machine.state.job.heated().is_ok()
                && machine.config.simulation.simulate_print_start
            {
                machine.stream([
                    "// Running bed mesh",
                    "// Purging nozzle",
                    "SET_PRINT_STATS_INFO CURRENT_LAYER=1",
                ]);
            }
        }
        PrintPhase::Complete | PrintPhase::Cancelled => {
            if below(machine, "extruder", COOLDOWN_EXTRUDER) && below(machine, "heater_bed", COOLDOWN_BED) {
                if let Err(e) = machine.state.job.cooled() {
                    tracing::warn!("Cooldown transition refused: {}", e);
                }
            }
        }
        _ => {}
    }

    if machine.state.job.advance(dt) {
        machine.state.clear_heater_targets();
        machine.state.exclusions.current_object = None;
        let filename = machine.state.job.filename.clone();
        machine.respond(format!("// Done printing file {}", filename));
    }
}

fn check_idle_timeout(machine: &mut Machine) {
    if machine.state.job.phase.is_active() {
        machine.last_activity = machine.now();
        return;
    }
    let timeout = machine.config.simulation.idle_timeout;
    if !machine.state.idle_timeout_triggered && machine.now() - machine.last_activity >= timeout {
        machine.state.idle_timeout_triggered = true;
        machine.state.motors_enabled = false;
        tracing::info!("Idle timeout after {:.0}s, motors off", timeout);
    }
}
