// src/hardware/temperature.rs
//! Heater and sensor models driven by the simulation tick.
//!
//! Heaters follow a first-order lag toward their target (ambient when off),
//! with separate time constants for heating and passive cooling. Noise is
//! scaled by the remaining error and clamped so a reading never steps
//! backwards or past the target.

use rand::Rng;

use crate::config::ThermalConfig;
use crate::state::HeaterState;

/// Within this band of the target a heater counts as settled.
pub const SETTLED_BAND: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThermalEvent {
    Heating,
    Cooling,
    Settled,
}

/// Temperature a heater drifts toward: its target, or ambient when off.
pub fn effective_target(heater: &HeaterState, ambient: f64) -> f64 {
    if heater.target_temp > 0.0 {
        heater.target_temp
    } else {
        ambient
    }
}

/// Advance one heater by `dt` simulated seconds.
pub fn advance_heater<R: Rng>(
    heater: &mut HeaterState,
    config: &ThermalConfig,
    ambient: f64,
    dt: f64,
    rng: &mut R,
) -> ThermalEvent {
    let target = effective_target(heater, ambient);
    let current = heater.current_temp;
    let delta = target - current;
    // Garbage in stays garbage; the tick reports non-finite readings.
    if !delta.is_finite() || delta.abs() < 1e-9 || dt <= 0.0 {
        return ThermalEvent::Settled;
    }

    let heating = delta > 0.0;
    let time_constant = if heating {
        config.heat_time_constant
    } else {
        config.cool_time_constant
    };
    let fraction = 1.0 - (-dt / time_constant).exp();
    let mut next = current + delta * fraction;

    if config.jitter > 0.0 {
        let remaining = (target - next).abs().min(1.0);
        next += rng.random_range(-config.jitter..=config.jitter) * remaining;
    }

    let (low, high) = if heating { (current, target) } else { (target, current) };
    next = next.clamp(low, high);
    heater.current_temp = next;

    if (target - next).abs() <= SETTLED_BAND {
        ThermalEvent::Settled
    } else if heating {
        ThermalEvent::Heating
    } else {
        ThermalEvent::Cooling
    }
}

/// Reading for a passive `temperature_sensor`. MCU and host sensors wobble
/// around their own baselines; anything else tracks the chamber.
pub fn sensor_temperature(name: &str, eventtime: f64, ambient: f64, printing: bool) -> f64 {
    let short = name.rsplit(' ').next().unwrap_or(name);
    let (baseline, amplitude, period, load) = if short.contains("mcu") {
        (42.0, 3.0, 30.0, 5.0)
    } else if short.contains("host") || short.contains("pi") {
        (52.0, 4.0, 45.0, 8.0)
    } else if short.contains("chamber") {
        (ambient + 3.0, 0.5, 120.0, 15.0)
    } else {
        (ambient + 5.0, 2.0, 60.0, 0.0)
    };
    let wobble = amplitude * (std::f64::consts::TAU * eventtime / period).sin();
    let value = baseline + wobble + if printing { load } else { 0.0 };
    (value * 100.0).round() / 100.0
}
