//! Fans, LED strips and LED effects.
//!
//! Names that do not match a configured object are logged and ignored,
//! the same way klipper's macros treat optional hardware.

use super::{CommandError, GCodeCommand};
use crate::machine::Machine;
use crate::state::{LedState, MachineState};

fn fan_name(cmd: &GCodeCommand) -> Result<String, CommandError> {
    match cmd.get_f64("P")? {
        Some(index) if index > 0.0 => Ok(format!("fan{}", index as u32)),
        _ => Ok("fan".to_string()),
    }
}

fn apply_fan_speed(machine: &mut Machine, fan: &str, speed: f64) {
    match machine.state.fans.get_mut(fan) {
        Some(state) => state.speed = speed.clamp(0.0, 1.0),
        None => tracing::warn!("Fan '{}' not configured, ignoring", fan),
    }
}

/// M106 [P<index>] [S<0-255>].
pub fn fan_on(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let fan = fan_name(cmd)?;
    let value = cmd.get_f64("S")?.unwrap_or(255.0);
    apply_fan_speed(machine, &fan, value / 255.0);
    Ok(())
}

/// M107 [P<index>].
pub fn fan_off(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let fan = fan_name(cmd)?;
    apply_fan_speed(machine, &fan, 0.0);
    Ok(())
}

/// SET_FAN_SPEED FAN=<name> SPEED=<0-1>.
pub fn set_fan_speed(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let wanted = cmd.require_str("FAN")?;
    let speed = cmd.get_f64("SPEED")?.unwrap_or(0.0);
    match MachineState::resolve_name(machine.state.fans.keys(), wanted) {
        Some(fan) => apply_fan_speed(machine, &fan, speed),
        None => tracing::warn!("Fan '{}' not configured, ignoring", wanted),
    }
    Ok(())
}

/// SET_LED LED=<name> [RED=] [GREEN=] [BLUE=] [WHITE=]. Missing channels are off.
pub fn set_led(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let wanted = cmd.require_str("LED")?;
    let color = LedState::new(
        cmd.get_f64("RED")?.unwrap_or(0.0),
        cmd.get_f64("GREEN")?.unwrap_or(0.0),
        cmd.get_f64("BLUE")?.unwrap_or(0.0),
        cmd.get_f64("WHITE")?.unwrap_or(0.0),
    );
    match MachineState::resolve_name(machine.state.leds.keys(), wanted) {
        Some(led) => {
            machine.state.leds.insert(led, color);
        }
        None => tracing::warn!("LED '{}' not configured, ignoring", wanted),
    }
    Ok(())
}

/// Color an effect paints every strip with, if it has one.
pub fn effect_color(effect: &str) -> Option<LedState> {
    let short = effect.rsplit(' ').next().unwrap_or(effect);
    match short {
        "breathing" => Some(LedState::new(0.6, 0.6, 1.0, 0.0)),
        "fire_comet" => Some(LedState::new(1.0, 0.3, 0.0, 0.0)),
        "rainbow" => Some(LedState::new(0.5, 0.0, 1.0, 0.0)),
        "static_white" => Some(LedState::new(1.0, 1.0, 1.0, 0.0)),
        _ => None,
    }
}

/// SET_LED_EFFECT EFFECT=<name> [STOP=1]. At most one effect runs at a time.
pub fn set_led_effect(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let wanted = cmd.require_str("EFFECT")?;
    let Some(effect) = MachineState::resolve_name(machine.state.led_effects.keys(), wanted) else {
        tracing::warn!("LED effect '{}' not configured, ignoring", wanted);
        return Ok(());
    };
    if cmd.get_f64("STOP")?.is_some_and(|v| v != 0.0) {
        if let Some(state) = machine.state.led_effects.get_mut(&effect) {
            state.enabled = false;
        }
        return Ok(());
    }
    for (name, state) in machine.state.led_effects.iter_mut() {
        state.enabled = *name == effect;
    }
    if let Some(color) = effect_color(&effect) {
        for led in machine.state.leds.values_mut() {
            *led = color;
        }
    }
    Ok(())
}

/// STOP_LED_EFFECTS: every effect off, every strip dark.
pub fn stop_led_effects(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    for state in machine.state.led_effects.values_mut() {
        state.enabled = false;
    }
    for led in machine.state.leds.values_mut() {
        *led = LedState::default();
    }
    Ok(())
}
