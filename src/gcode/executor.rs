//! Dispatches parsed commands to their handlers.

use std::collections::HashMap;

use super::{
    CommandError, CommandKind, GCodeCommand, bed_mesh, calibration, job, motion, parse_line, peripherals,
    script_lines, system, thermal,
};
use crate::machine::Machine;

pub type Handler = fn(&mut Machine, &GCodeCommand) -> Result<(), CommandError>;

/// Command kind -> handler table, built once per engine.
pub struct Interpreter {
    handlers: HashMap<CommandKind, Handler>,
}

impl Interpreter {
    pub fn new() -> Self {
        let table: [(CommandKind, Handler); 44] = [
            (CommandKind::LinearMove, motion::linear_move),
            (CommandKind::Home, motion::home),
            (CommandKind::AbsolutePositioning, motion::absolute_positioning),
            (CommandKind::RelativePositioning, motion::relative_positioning),
            (CommandKind::SetPosition, motion::set_position),
            (CommandKind::DisableMotors, motion::disable_motors),
            (CommandKind::SpeedFactor, motion::speed_factor),
            (CommandKind::ExtrudeFactor, motion::extrude_factor),
            (CommandKind::SetExtruderTemperature, thermal::set_extruder_temperature),
            (CommandKind::WaitExtruderTemperature, thermal::set_extruder_temperature),
            (CommandKind::SetBedTemperature, thermal::set_bed_temperature),
            (CommandKind::WaitBedTemperature, thermal::set_bed_temperature),
            (CommandKind::SetHeaterTemperature, thermal::set_heater_temperature),
            (CommandKind::FanOn, peripherals::fan_on),
            (CommandKind::FanOff, peripherals::fan_off),
            (CommandKind::SetFanSpeed, peripherals::set_fan_speed),
            (CommandKind::SetLed, peripherals::set_led),
            (CommandKind::SetLedEffect, peripherals::set_led_effect),
            (CommandKind::StopLedEffects, peripherals::stop_led_effects),
            (CommandKind::BedMeshCalibrate, bed_mesh::calibrate),
            (CommandKind::BedMeshProfile, bed_mesh::profile),
            (CommandKind::BedMeshClear, bed_mesh::clear),
            (CommandKind::SetGcodeOffset, calibration::set_gcode_offset),
            (CommandKind::ProbeCalibrate, calibration::start_manual_probe),
            (CommandKind::ZEndstopCalibrate, calibration::start_manual_probe),
            (CommandKind::TestZ, calibration::test_z),
            (CommandKind::Accept, calibration::accept),
            (CommandKind::Abort, calibration::abort),
            (CommandKind::PidCalibrate, calibration::pid_calibrate),
            (CommandKind::ShaperCalibrate, calibration::shaper_calibrate),
            (CommandKind::MeasureAxesNoise, calibration::measure_axes_noise),
            (CommandKind::ExcludeObjectDefine, job::exclude_object_define),
            (CommandKind::ExcludeObject, job::exclude_object),
            (CommandKind::ExcludeObjectStart, job::exclude_object_start),
            (CommandKind::ExcludeObjectEnd, job::exclude_object_end),
            (CommandKind::SdcardPrintFile, job::print_file),
            (CommandKind::Pause, job::pause),
            (CommandKind::Resume, job::resume),
            (CommandKind::CancelPrint, job::cancel),
            (CommandKind::SetPrintStatsInfo, job::set_print_stats_info),
            (CommandKind::EmergencyStop, system::emergency_stop),
            (CommandKind::Restart, system::restart),
            (CommandKind::FirmwareRestart, system::firmware_restart),
            (CommandKind::SaveConfig, system::save_config),
        ];
        Self {
            handlers: table.into_iter().collect(),
        }
    }

    /// Run one parsed command. Unknown kinds are accepted and ignored.
    pub fn execute(&self, machine: &mut Machine, command: &GCodeCommand) -> Result<(), CommandError> {
        machine.mark_activity();
        match self.handlers.get(&command.kind) {
            Some(handler) => handler(machine, command),
            None => {
                tracing::debug!("Ignoring unknown command '{}'", command.command);
                Ok(())
            }
        }
    }

    /// Run a script line by line, stopping at the first rejected line.
    /// The rejection is echoed to the console as `!! <message>`.
    pub fn run_script(&self, machine: &mut Machine, script: &str) -> Result<(), CommandError> {
        for line in script_lines(script) {
            let result = parse_line(line).and_then(|parsed| match parsed {
                Some(command) => self.execute(machine, &command),
                None => Ok(()),
            });
            if let Err(e) = result {
                tracing::warn!("Rejected '{}': {}", line, e);
                machine.respond(format!("!! {}", e));
                return Err(e);
            }
        }
        Ok(())
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::notify::Notification;
    use std::sync::Arc;

    fn machine() -> Machine {
        let mut config = Config::default();
        config.simulation.seed = Some(3);
        Machine::new(Arc::new(config))
    }

    #[test]
    fn test_every_known_kind_has_a_handler() {
        let interpreter = Interpreter::new();
        for (name, kind) in super::super::COMMAND_NAMES {
            assert!(interpreter.handlers.contains_key(kind), "no handler for {}", name);
        }
    }

    #[test]
    fn test_unknown_command_is_accepted() {
        let interpreter = Interpreter::new();
        let mut m = machine();
        assert!(interpreter.run_script(&mut m, "FROBNICATE LEVEL=11").is_ok());
        assert!(m.take_outbox().is_empty());
    }

    #[test]
    fn test_script_stops_at_first_rejection() {
        let interpreter = Interpreter::new();
        let mut m = machine();
        let err = interpreter
            .run_script(&mut m, "G28\nG1 X400\nG1 X10")
            .unwrap_err();
        assert_eq!(err, CommandError::MoveOutOfRange { axis: 'X', value: 400.0 });
        assert_eq!(m.state().pose().x, 0.0);
        assert_eq!(
            m.take_outbox(),
            vec![Notification::GcodeResponse("!! Move out of range: X=400.000".to_string())]
        );
    }
}
