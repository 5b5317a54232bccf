//! Print job control and object exclusion.

use super::{CommandError, GCodeCommand};
use crate::machine::Machine;

/// SDCARD_PRINT_FILE FILENAME=<name>.
pub fn print_file(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let filename = cmd.require_str("FILENAME")?.trim_start_matches('/').to_string();
    machine.start_print(&filename);
    Ok(())
}

pub fn pause(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    machine.pause_print();
    Ok(())
}

pub fn resume(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    machine.resume_print();
    Ok(())
}

pub fn cancel(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    machine.cancel_print();
    Ok(())
}

/// SET_PRINT_STATS_INFO [TOTAL_LAYER=<n>] [CURRENT_LAYER=<n>].
pub fn set_print_stats_info(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let job = &mut machine.state.job;
    if let Some(total) = cmd.get_f64("TOTAL_LAYER")? {
        job.total_layers = total.max(0.0) as u32;
    }
    if let Some(current) = cmd.get_f64("CURRENT_LAYER")? {
        job.current_layer = current.max(0.0) as u32;
    }
    Ok(())
}

/// EXCLUDE_OBJECT_DEFINE NAME=<name> [CENTER=..] [POLYGON=..].
pub fn exclude_object_define(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let name = cmd.require_str("NAME")?;
    machine.state.exclusions.define(name);
    Ok(())
}

/// EXCLUDE_OBJECT NAME=<name> | RESET=1. Without arguments, lists the
/// excluded objects.
pub fn exclude_object(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    if cmd.get_f64("RESET")?.is_some_and(|v| v != 0.0) {
        machine.state.exclusions.excluded.clear();
        return Ok(());
    }
    match cmd.get_str("NAME").filter(|n| !n.is_empty()) {
        Some(name) => {
            if machine.state.exclusions.exclude(name) {
                tracing::info!("Excluding object {}", name);
            } else {
                tracing::debug!("Object {} already excluded", name);
            }
        }
        None => {
            let listed = machine.state.exclusions.excluded.join(", ");
            machine.respond(format!("// Excluded objects: {}", listed));
        }
    }
    Ok(())
}

/// EXCLUDE_OBJECT_START NAME=<name>.
pub fn exclude_object_start(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let name = cmd.require_str("NAME")?;
    machine.state.exclusions.current_object = Some(name.to_string());
    Ok(())
}

pub fn exclude_object_end(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    machine.state.exclusions.current_object = None;
    Ok(())
}
