//! Calibration routines: manual Z probing, gcode offsets, PID tuning and
//! input shaper measurement. Long-running routines stream their console
//! output through the tick instead of replying all at once.

use super::{CommandError, GCodeCommand};
use crate::machine::Machine;
use crate::state::MachineState;

const PROBE_START_Z: f64 = 5.0;
const PROBE_MIN_Z: f64 = -0.5;
const PROBE_MAX_Z: f64 = 10.0;

/// Tuned (Kp, Ki, Kd) reported for a heater.
pub fn pid_result(heater: &str) -> (f64, f64, f64) {
    if heater.starts_with("extruder") {
        (22.865, 1.292, 101.178)
    } else if heater == "heater_bed" {
        (73.517, 1.132, 1194.093)
    } else {
        (45.0, 1.5, 340.0)
    }
}

/// SET_GCODE_OFFSET [Z=<abs>] [Z_ADJUST=<delta>].
pub fn set_gcode_offset(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let offset = &mut machine.state.gcode_move.homing_origin_z;
    if let Some(z) = cmd.get_f64("Z")? {
        *offset = z;
    }
    if let Some(adjust) = cmd.get_f64("Z_ADJUST")? {
        *offset += adjust;
    }
    Ok(())
}

/// PROBE_CALIBRATE / Z_ENDSTOP_CALIBRATE: home if needed and open a manual
/// probe session at the starting height.
pub fn start_manual_probe(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    if machine.state.probe.active {
        tracing::warn!("Already in manual probe mode, ignoring");
        return Ok(());
    }
    if !machine.state.pose.is_homed() {
        machine.home(&[]);
    }
    machine.state.probe.active = true;
    machine.state.probe.z = PROBE_START_Z;
    machine.state.pose.z = PROBE_START_Z;
    machine.respond("// Starting manual Z probe. Use TESTZ to adjust position.");
    machine.respond("// Finish with ACCEPT or ABORT command.");
    Ok(())
}

/// TESTZ Z=<value>. A leading sign makes the value relative.
pub fn test_z(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    if !machine.state.probe.active {
        tracing::warn!("TESTZ without an active manual probe, ignoring");
        return Ok(());
    }
    let raw = cmd.require_str("Z")?;
    let value = cmd.require_f64("Z")?;
    let z = if raw.starts_with('+') || raw.starts_with('-') {
        machine.state.probe.z + value
    } else {
        value
    };
    let z = z.clamp(PROBE_MIN_Z, PROBE_MAX_Z);
    machine.state.probe.z = z;
    machine.state.pose.z = z;
    machine.respond(format!("// Z position: {:.3}", z));
    Ok(())
}

/// ACCEPT ends the session and reports the accepted offset.
pub fn accept(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    if !machine.state.probe.active {
        tracing::warn!("ACCEPT without an active manual probe, ignoring");
        return Ok(());
    }
    machine.state.probe.active = false;
    let z = machine.state.probe.z;
    machine.respond(format!("// probe: z_offset: {:.3}", z));
    machine.respond("// The SAVE_CONFIG command will update the printer config file");
    Ok(())
}

/// ABORT ends the session without changes. Idempotent.
pub fn abort(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    if !machine.state.probe.active {
        tracing::debug!("ABORT without an active manual probe");
        return Ok(());
    }
    machine.state.probe.active = false;
    machine.respond("// Manual probe aborted");
    Ok(())
}

/// PID_CALIBRATE HEATER=<name> [TARGET=<temp>].
pub fn pid_calibrate(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let wanted = cmd.get_str("HEATER").filter(|h| !h.is_empty()).unwrap_or("extruder");
    let heater = MachineState::resolve_name(machine.state.heaters.keys(), wanted)
        .ok_or_else(|| CommandError::UnknownHeater(wanted.to_string()))?;
    let default_target = if heater == "heater_bed" { 60.0 } else { 200.0 };
    let target = cmd.get_f64("TARGET")?.unwrap_or(default_target);
    let thermal = machine.config.thermal_for(&heater);
    if target < thermal.min_temp || target > thermal.max_temp {
        return Err(CommandError::TemperatureOutOfRange {
            value: target,
            min: thermal.min_temp,
            max: thermal.max_temp,
        });
    }

    let (kp, ki, kd) = pid_result(&heater);
    let mut lines = Vec::with_capacity(8);
    for sample in 1..=5u32 {
        let spread = f64::from(6 - sample) * 0.012;
        lines.push(format!(
            "// sample:{} pwm:1.0000 asymm:{:.2} tune_pid: Kp={:.3} Ki={:.3} Kd={:.3}",
            sample,
            -spread,
            kp * (1.0 + spread),
            ki * (1.0 - spread),
            kd * (1.0 + spread),
        ));
    }
    lines.push(format!(
        "// PID parameters: pid_Kp={:.3} pid_Ki={:.3} pid_Kd={:.3}",
        kp, ki, kd
    ));
    lines.push(
        "// The SAVE_CONFIG command will update the printer config file with these parameters and restart the printer."
            .to_string(),
    );
    tracing::info!("PID calibrating {} at {:.1}C", heater, target);
    machine.stream(lines);
    Ok(())
}

/// (shaper, frequency Hz, vibrations %, smoothing, max accel) for each fit.
const SHAPER_FITS: [(&str, f64, f64, f64, u32); 5] = [
    ("zv", 59.0, 5.2, 0.045, 13400),
    ("mzv", 53.8, 1.6, 0.130, 4000),
    ("ei", 56.2, 0.7, 0.120, 4600),
    ("2hump_ei", 71.8, 0.0, 0.076, 8800),
    ("3hump_ei", 89.6, 0.0, 0.076, 8800),
];

fn shaper_lines(axis: char) -> Vec<String> {
    let mut lines: Vec<String> = (1..=20)
        .map(|step| format!("// Testing frequency {:.2} Hz", f64::from(step) * 5.0))
        .collect();
    lines.push("// Wait for calculations..".to_string());
    for (shaper, freq, vibrations, smoothing, accel) in SHAPER_FITS {
        lines.push(format!(
            "// Fitted shaper '{}' frequency = {:.1} Hz (vibrations = {:.1}%, smoothing ~= {:.3})",
            shaper, freq, vibrations, smoothing
        ));
        lines.push(format!(
            "// To avoid too much smoothing with '{}', suggested max_accel <= {} mm/sec^2",
            shaper, accel
        ));
    }
    let axis = axis.to_ascii_lowercase();
    lines.push(format!(
        "// Recommended shaper_type_{} = mzv, shaper_freq_{} = 53.8 Hz",
        axis, axis
    ));
    lines
}

/// SHAPER_CALIBRATE [AXIS=X|Y]. Both axes when AXIS is omitted.
pub fn shaper_calibrate(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let axes: Vec<char> = match cmd.get_str("AXIS").map(str::to_ascii_uppercase).as_deref() {
        None | Some("") => vec!['X', 'Y'],
        Some("X") => vec!['X'],
        Some("Y") => vec!['Y'],
        Some(other) => {
            return Err(CommandError::InvalidChoice {
                param: "AXIS".to_string(),
                value: other.to_string(),
            });
        }
    };
    if !machine.state.pose.is_homed() {
        machine.home(&[]);
    }
    for axis in axes {
        let lines = shaper_lines(axis);
        machine.stream(lines);
    }
    Ok(())
}

pub fn measure_axes_noise(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    machine.respond("// Axes noise for xy-axis accelerometer: 12.318 (x), 15.071 (y), 26.104 (z)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gcode::Interpreter;
    use crate::notify::Notification;
    use std::sync::Arc;

    fn setup() -> (Interpreter, Machine) {
        (Interpreter::new(), Machine::new(Arc::new(Config::default())))
    }

    #[test]
    fn test_manual_probe_session() {
        let (i, mut m) = setup();
        i.run_script(&mut m, "PROBE_CALIBRATE").unwrap();
        assert!(m.state.pose.is_homed());
        assert!(m.state.probe.active);
        assert_eq!(m.state.probe.z, 5.0);

        i.run_script(&mut m, "TESTZ Z=-1\nTESTZ Z=-0.25").unwrap();
        assert!((m.state.probe.z - 3.75).abs() < 1e-9);
        i.run_script(&mut m, "TESTZ Z=+20").unwrap();
        assert_eq!(m.state.probe.z, 10.0);
        i.run_script(&mut m, "TESTZ Z=0.2").unwrap();
        assert_eq!(m.state.probe.z, 0.2);
        assert_eq!(m.state.pose.z, 0.2);

        i.run_script(&mut m, "ACCEPT").unwrap();
        assert!(!m.state.probe.active);
    }

    #[test]
    fn test_reentering_probe_keeps_progress() {
        let (i, mut m) = setup();
        i.run_script(&mut m, "PROBE_CALIBRATE\nTESTZ Z=-4.5").unwrap();
        assert!((m.state.probe.z - 0.5).abs() < 1e-9);
        m.take_outbox();

        i.run_script(&mut m, "PROBE_CALIBRATE\nZ_ENDSTOP_CALIBRATE").unwrap();
        assert!(m.state.probe.active);
        assert!((m.state.probe.z - 0.5).abs() < 1e-9);
        assert!((m.state.pose.z - 0.5).abs() < 1e-9);
        assert!(m.take_outbox().is_empty());
    }

    #[test]
    fn test_testz_without_session_is_ignored() {
        let (i, mut m) = setup();
        i.run_script(&mut m, "TESTZ Z=-1").unwrap();
        assert_eq!(m.state.probe.z, 0.0);
        assert!(m.take_outbox().is_empty());
    }

    #[test]
    fn test_abort_is_idempotent() {
        let (i, mut m) = setup();
        i.run_script(&mut m, "Z_ENDSTOP_CALIBRATE\nABORT").unwrap();
        let after_first = m.state.clone();
        m.take_outbox();
        i.run_script(&mut m, "ABORT").unwrap();
        assert_eq!(m.state, after_first);
        assert!(m.take_outbox().is_empty());
    }

    #[test]
    fn test_gcode_offset() {
        let (i, mut m) = setup();
        i.run_script(&mut m, "SET_GCODE_OFFSET Z=0.1\nSET_GCODE_OFFSET Z_ADJUST=-0.025").unwrap();
        assert!((m.state.gcode_move.homing_origin_z - 0.075).abs() < 1e-9);
    }

    #[test]
    fn test_pid_calibrate_streams_result() {
        let (i, mut m) = setup();
        i.run_script(&mut m, "PID_CALIBRATE HEATER=extruder TARGET=210").unwrap();
        assert!(m.take_outbox().is_empty());
        let last = m.pending_lines.iter().rev().nth(1).cloned();
        assert_eq!(
            last.as_deref(),
            Some("// PID parameters: pid_Kp=22.865 pid_Ki=1.292 pid_Kd=101.178")
        );
        assert!(i.run_script(&mut m, "PID_CALIBRATE HEATER=chamber").is_err());
        assert!(i.run_script(&mut m, "PID_CALIBRATE HEATER=heater_bed TARGET=500").is_err());
    }

    #[test]
    fn test_shaper_calibrate_output() {
        let (i, mut m) = setup();
        i.run_script(&mut m, "SHAPER_CALIBRATE AXIS=x").unwrap();
        let lines: Vec<_> = m.pending_lines.iter().cloned().collect();
        assert_eq!(lines[0], "// Testing frequency 5.00 Hz");
        assert_eq!(lines[19], "// Testing frequency 100.00 Hz");
        assert_eq!(
            lines.last().map(String::as_str),
            Some("// Recommended shaper_type_x = mzv, shaper_freq_x = 53.8 Hz")
        );
        m.pending_lines.clear();
        i.run_script(&mut m, "SHAPER_CALIBRATE").unwrap();
        assert_eq!(m.pending_lines.len(), 2 * lines.len());
        assert!(i.run_script(&mut m, "SHAPER_CALIBRATE AXIS=Z").is_err());
    }

    #[test]
    fn test_measure_axes_noise_replies_immediately() {
        let (i, mut m) = setup();
        i.run_script(&mut m, "MEASURE_AXES_NOISE").unwrap();
        assert!(matches!(m.take_outbox().as_slice(), [Notification::GcodeResponse(_)]));
    }
}
