//! Heater targets. The wait variants (M109/M190) set the target and return;
//! the printer does not block the console while heating.

use super::{CommandError, GCodeCommand};
use crate::machine::Machine;
use crate::state::MachineState;

fn extruder_name(cmd: &GCodeCommand) -> Result<String, CommandError> {
    match cmd.get_f64("T")? {
        Some(index) if index > 0.0 => Ok(format!("extruder{}", index as u32)),
        _ => Ok("extruder".to_string()),
    }
}

/// M104/M109 [T<index>] S<temp>.
pub fn set_extruder_temperature(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let heater = extruder_name(cmd)?;
    let target = cmd.get_f64("S")?.unwrap_or(0.0);
    machine.set_heater_target(&heater, target)
}

/// M140/M190 S<temp>.
pub fn set_bed_temperature(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let target = cmd.get_f64("S")?.unwrap_or(0.0);
    machine.set_heater_target("heater_bed", target)
}

/// SET_HEATER_TEMPERATURE HEATER=<name> [TARGET=<temp>].
pub fn set_heater_temperature(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let wanted = cmd.require_str("HEATER")?;
    let heater = MachineState::resolve_name(machine.state.heaters.keys(), wanted)
        .ok_or_else(|| CommandError::UnknownHeater(wanted.to_string()))?;
    let target = cmd.get_f64("TARGET")?.unwrap_or(0.0);
    machine.set_heater_target(&heater, target)
}
