//! Builds the Klipper object model from `MachineState`.

use serde_json::{Map, Value, json};

use crate::config::Config;
use crate::print_job::PrintPhase;
use crate::state::{BedMeshProfile, MachineState};

/// Object name -> object fields.
pub type StatusMap = Map<String, Value>;

fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn heater_power(current: f64, target: f64) -> f64 {
    if target <= 0.0 {
        return 0.0;
    }
    round(((target - current) / 10.0).clamp(0.2, 1.0), 3)
}

fn mesh_params(profile: &BedMeshProfile) -> Value {
    json!({
        "min_x": profile.mesh_min.0,
        "min_y": profile.mesh_min.1,
        "max_x": profile.mesh_max.0,
        "max_y": profile.mesh_max.1,
        "x_count": profile.x_count(),
        "y_count": profile.y_count(),
        "algo": profile.algorithm,
    })
}

/// Every object the engine reports in notifications.
pub fn full_status(state: &MachineState, config: &Config) -> StatusMap {
    let mut status = Map::new();
    let pose = state.pose();
    let position = json!([round(pose.x, 3), round(pose.y, 3), round(pose.z, 3), 0.0]);
    let gcode_move = state.gcode_move();
    let job = state.print_job();

    let klippy = state.klippy_state();
    status.insert(
        "webhooks".to_string(),
        json!({ "state": klippy.as_str(), "state_message": klippy.message() }),
    );
    status.insert(
        "toolhead".to_string(),
        json!({
            "position": position,
            "homed_axes": pose.homed_axes_string(),
            "kinematics": config.printer.kinematics,
            "max_velocity": config.printer.max_velocity,
            "max_accel": config.printer.max_accel,
        }),
    );
    status.insert(
        "gcode_move".to_string(),
        json!({
            "position": position,
            "gcode_position": position,
            "homing_origin": [0.0, 0.0, round(gcode_move.homing_origin_z, 3), 0.0],
            "speed_factor": gcode_move.speed_factor,
            "extrude_factor": gcode_move.extrude_factor,
            "absolute_coordinates": pose.motion_mode == crate::state::MotionMode::Absolute,
        }),
    );

    for (name, heater) in state.heaters() {
        status.insert(
            name.clone(),
            json!({
                "temperature": round(heater.current_temp, 2),
                "target": heater.target_temp,
                "power": heater_power(heater.current_temp, heater.target_temp),
            }),
        );
    }
    for (name, sensor) in state.sensors() {
        status.insert(name.clone(), json!({ "temperature": round(sensor.temperature, 2) }));
    }
    for (name, fan) in state.fans() {
        status.insert(name.clone(), json!({ "speed": round(fan.speed, 3) }));
    }
    for (name, led) in state.leds() {
        status.insert(name.clone(), json!({ "color_data": [[led.r, led.g, led.b, led.w]] }));
    }
    for (name, effect) in state.led_effects() {
        status.insert(format!("led_effect {}", name), json!({ "enabled": effect.enabled }));
    }

    let mesh = state.bed_mesh();
    let profiles: Map<String, Value> = mesh
        .profiles
        .iter()
        .map(|(name, profile)| {
            (
                name.clone(),
                json!({ "points": profile.probed_matrix, "mesh_params": mesh_params(profile) }),
            )
        })
        .collect();
    status.insert(
        "bed_mesh".to_string(),
        json!({
            "profile_name": mesh.active.name,
            "probed_matrix": mesh.active.probed_matrix,
            "mesh_matrix": mesh.active.probed_matrix,
            "mesh_min": [mesh.active.mesh_min.0, mesh.active.mesh_min.1],
            "mesh_max": [mesh.active.mesh_max.0, mesh.active.mesh_max.1],
            "profiles": profiles,
            "mesh_params": { "algo": mesh.active.algorithm },
        }),
    );

    status.insert(
        "print_stats".to_string(),
        json!({
            "state": job.phase.print_stats_state(),
            "filename": job.filename,
            "print_duration": round(job.print_duration, 1),
            "total_duration": round(job.total_duration, 1),
            "estimated_time": job.estimated_total_seconds(),
            "filament_used": round(job.filament_used(), 1),
            "message": job.message,
            "info": { "current_layer": job.current_layer, "total_layer": job.total_layers },
        }),
    );
    let file_path = if job.filename.is_empty() {
        Value::Null
    } else {
        Value::String(format!("/gcodes/{}", job.filename))
    };
    status.insert(
        "virtual_sdcard".to_string(),
        json!({
            "file_path": file_path,
            "progress": round(job.progress, 4),
            "is_active": job.phase == PrintPhase::Printing,
        }),
    );
    status.insert(
        "display_status".to_string(),
        json!({ "progress": round(job.progress, 4), "message": Value::Null }),
    );

    let exclusions = state.exclusions();
    let objects: Vec<Value> = exclusions.defined.iter().map(|n| json!({ "name": n })).collect();
    status.insert(
        "exclude_object".to_string(),
        json!({
            "objects": objects,
            "excluded_objects": exclusions.excluded,
            "current_object": exclusions.current_object,
        }),
    );

    let probe = state.manual_probe();
    let z_position = if probe.active { json!(round(probe.z, 3)) } else { Value::Null };
    status.insert(
        "manual_probe".to_string(),
        json!({
            "is_active": probe.active,
            "z_position": z_position,
            "z_position_lower": Value::Null,
            "z_position_upper": Value::Null,
        }),
    );

    let enabled = state.motors_enabled();
    let mut steppers = Map::new();
    for stepper in ["stepper_x", "stepper_y", "stepper_z"] {
        steppers.insert(stepper.to_string(), json!(enabled));
    }
    for heater in state.heaters().keys().filter(|h| h.starts_with("extruder")) {
        steppers.insert(heater.clone(), json!(enabled));
    }
    status.insert("stepper_enable".to_string(), json!({ "steppers": steppers }));

    let idle_state = if matches!(job.phase, PrintPhase::Preheat | PrintPhase::Printing) {
        "Printing"
    } else if state.idle_timeout_triggered() {
        "Idle"
    } else {
        "Ready"
    };
    status.insert(
        "idle_timeout".to_string(),
        json!({ "state": idle_state, "printing_time": round(job.print_duration, 1) }),
    );

    status
}

/// Objects that only exist for queries: static config and MCU identity.
pub fn static_objects(config: &Config) -> StatusMap {
    let mut settings = Map::new();
    settings.insert(
        "printer".to_string(),
        json!({
            "kinematics": config.printer.kinematics,
            "max_velocity": config.printer.max_velocity,
            "max_accel": config.printer.max_accel,
        }),
    );
    for heater in &config.printer.heaters {
        let thermal = config.thermal_for(heater);
        let (kp, ki, kd) = crate::gcode::calibration::pid_result(heater);
        settings.insert(
            heater.clone(),
            json!({
                "control": "pid",
                "pid_kp": kp,
                "pid_ki": ki,
                "pid_kd": kd,
                "min_temp": thermal.min_temp,
                "max_temp": thermal.max_temp,
            }),
        );
    }
    for (stepper, limits) in [
        ("stepper_x", &config.limits.x),
        ("stepper_y", &config.limits.y),
        ("stepper_z", &config.limits.z),
    ] {
        settings.insert(
            stepper.to_string(),
            json!({ "position_min": limits.min, "position_max": limits.max }),
        );
    }
    settings.insert(
        "bed_mesh".to_string(),
        json!({
            "mesh_min": [config.bed_mesh.mesh_min.0, config.bed_mesh.mesh_min.1],
            "mesh_max": [config.bed_mesh.mesh_max.0, config.bed_mesh.mesh_max.1],
            "probe_count": [config.bed_mesh.x_count, config.bed_mesh.y_count],
            "algorithm": config.bed_mesh.algorithm,
        }),
    );

    let mut objects = Map::new();
    objects.insert("configfile".to_string(), json!({ "settings": settings }));
    objects.insert(
        "mcu".to_string(),
        json!({
            "mcu_version": concat!("v", env!("CARGO_PKG_VERSION"), "-virtual"),
            "mcu_constants": { "MCU": "virtual", "CLOCK_FREQ": 180_000_000 },
        }),
    );
    objects
}

/// Fields that go out on every tick even when unchanged.
pub fn forced_fields(state: &MachineState) -> Vec<(String, &'static str)> {
    state
        .heaters()
        .keys()
        .chain(state.sensors().keys())
        .map(|name| (name.clone(), "temperature"))
        .collect()
}
