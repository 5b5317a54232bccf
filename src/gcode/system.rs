//! Emergency stop and restarts.

use super::{CommandError, GCodeCommand};
use crate::machine::{Machine, RestartKind};

/// M112. The job errors out and heaters go cold; klippy stays up.
pub fn emergency_stop(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    tracing::warn!("Emergency stop requested");
    machine.emergency_stop();
    Ok(())
}

pub fn restart(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    machine.restart(RestartKind::Host);
    Ok(())
}

pub fn firmware_restart(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    machine.restart(RestartKind::Firmware);
    Ok(())
}

/// SAVE_CONFIG acknowledges, then restarts the host to "load" the new config.
pub fn save_config(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    machine.respond("ok");
    machine.restart(RestartKind::Host);
    Ok(())
}
