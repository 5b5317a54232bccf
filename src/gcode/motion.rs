//! Positioning: moves, homing, modes and motor enable.

use super::{CommandError, GCodeCommand};
use crate::config::{AxisLimits, Config};
use crate::machine::Machine;
use crate::state::{Axis, MotionMode};

fn limits_for(config: &Config, axis: Axis) -> AxisLimits {
    match axis {
        Axis::X => config.limits.x,
        Axis::Y => config.limits.y,
        Axis::Z => config.limits.z,
    }
}

/// G0/G1. Every axis is checked against the soft limits before anything moves.
pub fn linear_move(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let mut targets = Vec::with_capacity(3);
    for axis in Axis::ALL {
        if let Some(value) = cmd.get_f64(&axis.letter().to_string())? {
            let target = match machine.state.pose.motion_mode {
                MotionMode::Absolute => value,
                MotionMode::Relative => machine.state.pose.get(axis) + value,
            };
            targets.push((axis, target));
        }
    }
    if targets.is_empty() {
        return Ok(());
    }
    for &(axis, target) in &targets {
        if !limits_for(&machine.config, axis).contains(target) {
            return Err(CommandError::MoveOutOfRange { axis: axis.letter(), value: target });
        }
    }
    for (axis, target) in targets {
        machine.state.pose.set(axis, target);
    }
    machine.state.motors_enabled = true;
    Ok(())
}

/// G28 with no axes homes everything.
pub fn home(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let axes: Vec<Axis> = Axis::ALL
        .into_iter()
        .filter(|a| cmd.has(&a.letter().to_string()))
        .collect();
    machine.home(&axes);
    Ok(())
}

pub fn absolute_positioning(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    machine.state.pose.motion_mode = MotionMode::Absolute;
    Ok(())
}

pub fn relative_positioning(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    machine.state.pose.motion_mode = MotionMode::Relative;
    Ok(())
}

/// G92: redefine the current position without moving.
pub fn set_position(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    for axis in Axis::ALL {
        if let Some(value) = cmd.get_f64(&axis.letter().to_string())? {
            machine.state.pose.set(axis, value);
        }
    }
    Ok(())
}

/// M84/M18.
pub fn disable_motors(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    machine.disable_motors();
    Ok(())
}

fn percent_factor(cmd: &GCodeCommand) -> Result<Option<f64>, CommandError> {
    match cmd.get_f64("S")? {
        Some(pct) if pct <= 0.0 => Err(CommandError::InvalidNumber {
            command: cmd.command.clone(),
            param: "S".to_string(),
            value: pct.to_string(),
        }),
        Some(pct) => Ok(Some(pct / 100.0)),
        None => Ok(None),
    }
}

/// M220 S<percent>.
pub fn speed_factor(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    if let Some(factor) = percent_factor(cmd)? {
        machine.state.gcode_move.speed_factor = factor;
    }
    Ok(())
}

/// M221 S<percent>.
pub fn extrude_factor(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    if let Some(factor) = percent_factor(cmd)? {
        machine.state.gcode_move.extrude_factor = factor;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcode::Interpreter;
    use std::sync::Arc;

    fn setup() -> (Interpreter, Machine) {
        let mut config = Config::default();
        config.simulation.seed = Some(5);
        (Interpreter::new(), Machine::new(Arc::new(config)))
    }

    #[test]
    fn test_absolute_and_relative_moves() {
        let (i, mut m) = setup();
        i.run_script(&mut m, "G1 X10 Y20 Z5").unwrap();
        assert_eq!((m.state.pose.x, m.state.pose.y, m.state.pose.z), (10.0, 20.0, 5.0));
        i.run_script(&mut m, "G91\nG1 X5 Z-1").unwrap();
        assert_eq!((m.state.pose.x, m.state.pose.y, m.state.pose.z), (15.0, 20.0, 4.0));
        i.run_script(&mut m, "G90\nG0 x1").unwrap();
        assert_eq!(m.state.pose.x, 1.0);
        assert!(m.state.motors_enabled);
    }

    #[test]
    fn test_move_without_axes_is_noop() {
        let (i, mut m) = setup();
        i.run_script(&mut m, "G1 F3000").unwrap();
        assert_eq!(m.state.pose.x, 0.0);
        assert!(!m.state.motors_enabled);
    }

    #[test]
    fn test_out_of_range_moves_never_mutate_pose() {
        let (i, mut m) = setup();
        i.run_script(&mut m, "G1 X100 Y100 Z10").unwrap();
        let before = m.state.pose.clone();
        for line in ["G1 X351", "G1 X-0.1", "G1 Y400 X10", "G1 Z-0.6", "G1 Z340.5", "G91\nG1 X300", "G1 Y-101"] {
            assert!(i.run_script(&mut m, line).is_err(), "{} should be rejected", line);
            let mut expected = before.clone();
            expected.motion_mode = m.state.pose.motion_mode;
            assert_eq!(m.state.pose, expected);
        }
    }

    #[test]
    fn test_limits_are_inclusive() {
        let (i, mut m) = setup();
        i.run_script(&mut m, "G1 X350 Y0 Z-0.5").unwrap();
        assert_eq!((m.state.pose.x, m.state.pose.z), (350.0, -0.5));
    }

    #[test]
    fn test_home_subset_keeps_other_axes() {
        let (i, mut m) = setup();
        i.run_script(&mut m, "G1 X50 Y60 Z70\nG28 X Z").unwrap();
        assert_eq!((m.state.pose.x, m.state.pose.y, m.state.pose.z), (0.0, 60.0, 0.0));
        assert_eq!(m.state.pose.homed_axes_string(), "xz");
        i.run_script(&mut m, "G1 Y10\nG28").unwrap();
        assert_eq!(m.state.pose.homed_axes_string(), "xyz");
        assert_eq!(m.state.pose.y, 0.0);
    }

    #[test]
    fn test_disable_motors_clears_homing() {
        let (i, mut m) = setup();
        i.run_script(&mut m, "G28\nM84").unwrap();
        assert_eq!(m.state.pose.homed_axes_string(), "");
        assert!(!m.state.motors_enabled);
        i.run_script(&mut m, "G28 Y\nM18").unwrap();
        assert!(m.state.pose.homed_axes.is_empty());
    }

    #[test]
    fn test_set_position_and_factors() {
        let (i, mut m) = setup();
        i.run_script(&mut m, "G92 Z400\nM220 S150\nM221 S95").unwrap();
        assert_eq!(m.state.pose.z, 400.0);
        assert_eq!(m.state.gcode_move.speed_factor, 1.5);
        assert_eq!(m.state.gcode_move.extrude_factor, 0.95);
        assert!(i.run_script(&mut m, "M220 S0").is_err());
    }
}
