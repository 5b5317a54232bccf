use std::sync::mpsc::{Receiver, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use virtual_printer::config::{Config, JobMetadata};
use virtual_printer::print_job::PrintPhase;
use virtual_printer::state::{Axis, KlippyState};
use virtual_printer::{Notification, Printer, PrinterError};

const SENTINEL: &str = "MEASURE_AXES_NOISE";

struct Harness {
    printer: Printer,
    rx: Receiver<Notification>,
}

impl Harness {
    fn new(config: Config) -> Self {
        let printer = Printer::new(config).unwrap();
        let (tx, rx) = channel();
        printer.set_observer(move |n: Notification| {
            let _ = tx.send(n);
        });
        Self { printer, rx }
    }

    fn manual() -> Self {
        Self::new(manual_config())
    }

    fn run(&self, command: &str) -> i32 {
        self.printer.execute_text_command(command)
    }

    /// Everything delivered before a marker command's reply.
    fn settle(&self) -> Vec<Notification> {
        assert_eq!(self.printer.execute_text_command(SENTINEL), 0);
        let mut seen = Vec::new();
        loop {
            let n = self.rx.recv_timeout(Duration::from_secs(5)).unwrap();
            if let Notification::GcodeResponse(line) = &n {
                if line.starts_with("// Axes noise") {
                    return seen;
                }
            }
            seen.push(n);
        }
    }

    fn status_updates(&self) -> Vec<serde_json::Map<String, Value>> {
        self.settle().iter().filter_map(|n| n.status().cloned()).collect()
    }
}

fn manual_config() -> Config {
    let mut config = Config::default();
    config.simulation.auto_tick = false;
    config.simulation.seed = Some(1234);
    config
}

#[test]
fn test_no_notification_before_first_change() {
    let h = Harness::manual();
    assert!(h.settle().is_empty());
}

#[test]
fn test_homing_zeroes_all_axes() {
    let h = Harness::manual();
    assert_eq!(h.run("G1 X120 Y80 Z30"), 0);
    assert_eq!(h.run("G28 X"), 0);
    assert_eq!(h.printer.position().homed_axes_string(), "x");
    assert_eq!(h.run("G28"), 0);
    let pose = h.printer.position();
    assert_eq!((pose.x, pose.y, pose.z), (0.0, 0.0, 0.0));
    assert_eq!(pose.homed_axes.iter().copied().collect::<Vec<_>>(), vec![Axis::X, Axis::Y, Axis::Z]);
}

#[test]
fn test_soft_limit_rejection() {
    let h = Harness::manual();
    h.run("G28");
    h.run("G1 X50 Y50 Z5");
    h.settle();
    let before = h.printer.position();

    assert_ne!(h.run("G1 X400"), 0);
    assert_eq!(h.printer.last_error().as_deref(), Some("Move out of range: X=400.000"));
    assert_eq!(h.printer.position(), before);

    let seen = h.settle();
    assert_eq!(
        seen,
        vec![Notification::GcodeResponse("!! Move out of range: X=400.000".to_string())]
    );
}

#[test]
fn test_unknown_command_is_accepted_silently() {
    let h = Harness::manual();
    assert_eq!(h.run("M900 K0.04"), 0);
    assert_eq!(h.run("FANCY_NEW_MACRO SPEED=3"), 0);
    assert_eq!(h.printer.last_error(), None);
    assert!(h.settle().is_empty());
}

#[test]
fn test_exclude_object_emits_exactly_one_update() {
    let h = Harness::manual();
    h.run("EXCLUDE_OBJECT_DEFINE NAME=part_a");
    h.run("EXCLUDE_OBJECT_DEFINE NAME=part_b");
    h.settle();

    assert_eq!(h.run("EXCLUDE_OBJECT NAME=part_a"), 0);
    let updates = h.status_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["exclude_object"]["excluded_objects"], json!(["part_a"]));
    assert_eq!(h.printer.excluded_objects().excluded, vec!["part_a"]);

    assert_eq!(h.run("EXCLUDE_OBJECT NAME=part_a"), 0);
    assert!(h.status_updates().is_empty());
}

#[test]
fn test_disable_motors_reports_position_and_steppers() {
    let h = Harness::manual();
    h.run("G28");
    h.settle();
    assert_eq!(h.run("M84"), 0);
    let updates = h.status_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["toolhead"]["homed_axes"], "");
    assert_eq!(updates[0]["stepper_enable"]["steppers"]["stepper_x"], false);
    assert!(h.printer.position().homed_axes.is_empty());
}

#[test]
fn test_bed_mesh_save_and_load() {
    let h = Harness::manual();
    let stock_default = h.printer.bed_mesh().profiles["default"].clone();

    assert_eq!(h.run("BED_MESH_CALIBRATE"), 0);
    let calibrated = h.printer.bed_mesh().profiles["default"].clone();
    assert_ne!(calibrated.probed_matrix, stock_default.probed_matrix);

    assert_eq!(h.run("BED_MESH_PROFILE SAVE=foo"), 0);
    let mesh = h.printer.bed_mesh();
    assert_eq!(mesh.profiles["foo"].probed_matrix, calibrated.probed_matrix);
    assert_eq!(mesh.active.name, "foo");

    assert_eq!(h.run("BED_MESH_PROFILE LOAD=default"), 0);
    assert_eq!(h.printer.bed_mesh().active, calibrated);

    assert_ne!(h.run("BED_MESH_PROFILE LOAD=missing"), 0);
    assert_eq!(h.printer.bed_mesh().active, calibrated);
}

#[test]
fn test_extruder_converges_at_high_speedup() {
    let h = Harness::manual();
    assert_eq!(h.printer.set_speedup(100.0).unwrap(), 100.0);
    assert_eq!(h.run("M104 S200"), 0);
    let mut previous = h.printer.heater("extruder").unwrap().current_temp;
    for _ in 0..8 {
        h.printer.tick().unwrap();
        let current = h.printer.heater("extruder").unwrap().current_temp;
        assert!(current >= previous, "{} dropped below {}", current, previous);
        assert!(current <= 200.0);
        previous = current;
    }
    assert!((previous - 200.0).abs() < 0.5, "extruder at {}", previous);
}

fn ticks_to_reach(speedup: f64, target: f64) -> usize {
    let h = Harness::manual();
    h.printer.set_speedup(speedup).unwrap();
    h.run(&format!("M104 S{}", target));
    for ticks in 1..=500 {
        h.printer.tick().unwrap();
        let current = h.printer.heater("extruder").unwrap().current_temp;
        if (current - target).abs() < 0.5 {
            return ticks;
        }
    }
    panic!("extruder never reached {} at {}x", target, speedup);
}

#[test]
fn test_convergence_ticks_scale_with_speedup() {
    let fast = ticks_to_reach(200.0, 100.0);
    let slow = ticks_to_reach(200.0, 10.0);
    assert!(fast <= 5, "{} ticks at 100x", fast);
    // Ten times the speedup should need several times fewer ticks.
    assert!(slow >= 3 * fast, "{} ticks at 10x vs {} at 100x", slow, fast);
    assert!(slow <= 12 * fast + 5, "{} ticks at 10x vs {} at 100x", slow, fast);
}

#[test]
fn test_target_holds_across_idle_timeouts() {
    let h = Harness::manual();
    h.run("G28");
    assert_eq!(h.printer.set_speedup(10000.0).unwrap(), 10000.0);
    assert_eq!(h.run("M104 S200"), 0);
    // One tick is 2500 simulated seconds, past the 600 s idle timeout.
    for _ in 0..6 {
        h.printer.tick().unwrap();
    }
    let extruder = h.printer.heater("extruder").unwrap();
    assert_eq!(extruder.target_temp, 200.0);
    assert!((extruder.current_temp - 200.0).abs() < 0.5);

    let state = h.printer.state();
    assert!(state.idle_timeout_triggered());
    assert!(!state.motors_enabled());
    assert_eq!(h.printer.position().homed_axes_string(), "xyz");
}

#[test]
fn test_ticks_force_temperature_samples() {
    let h = Harness::manual();
    h.printer.tick().unwrap();
    h.printer.tick().unwrap();
    let updates = h.status_updates();
    assert_eq!(updates.len(), 2);
    for update in &updates {
        assert!(update["extruder"].get("temperature").is_some());
        assert!(update["heater_bed"].get("temperature").is_some());
        assert!(update["temperature_sensor mcu_temp"].get("temperature").is_some());
    }
}

#[test]
fn test_subscription_narrows_notifications() {
    let h = Harness::manual();
    h.printer
        .call("printer.objects.subscribe", json!({"objects": {"fan": null}}))
        .unwrap()
        .unwrap()
        .unwrap();
    h.run("M104 S200");
    assert!(h.status_updates().is_empty());
    h.run("M106 S255");
    let updates = h.status_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(Value::Object(updates[0].clone()), json!({"fan": {"speed": 1.0}}));
}

#[test]
fn test_manual_probe_abort_is_idempotent() {
    let h = Harness::manual();
    h.run("PROBE_CALIBRATE");
    h.run("TESTZ Z=-2");
    assert_eq!(h.printer.manual_probe().z, 3.0);
    h.run("ABORT");
    let after_first = h.printer.state();
    h.settle();
    assert_eq!(h.run("ABORT"), 0);
    assert_eq!(h.printer.state(), after_first);
    assert!(h.settle().is_empty());
}

#[test]
fn test_print_runs_to_completion_and_restarts_same_file() {
    let mut config = manual_config();
    config.jobs.insert(
        "cube.gcode".to_string(),
        JobMetadata {
            estimated_time: 100.0,
            layer_count: 20,
            ..JobMetadata::default()
        },
    );
    let h = Harness::new(config);
    h.printer.set_speedup(100.0).unwrap();
    h.printer
        .call("printer.print.start", json!({"filename": "cube.gcode"}))
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(h.printer.print_job().phase, PrintPhase::Preheat);

    for _ in 0..30 {
        h.printer.tick().unwrap();
        if h.printer.print_job().phase == PrintPhase::Complete {
            break;
        }
    }
    let job = h.printer.print_job();
    assert_eq!(job.phase, PrintPhase::Complete);
    assert_eq!(job.progress_percent(), 100);
    assert_eq!(job.current_layer, 20);

    assert_eq!(h.run("SET_PRINT_STATS_INFO TOTAL_LAYER=42"), 0);
    assert_eq!(h.run("SDCARD_PRINT_FILE FILENAME=cube.gcode"), 0);
    let job = h.printer.print_job();
    assert_eq!(job.phase, PrintPhase::Preheat);
    assert_eq!(job.progress, 0.0);
    assert_eq!(job.current_layer, 0);
    assert_eq!(job.filename, "cube.gcode");
    assert_eq!(job.estimated_time, 100.0);
    assert_eq!(job.total_layers, 42);
}

#[test]
fn test_pause_outside_printing_is_noop() {
    let h = Harness::manual();
    assert_eq!(h.run("PAUSE"), 0);
    assert_eq!(h.run("RESUME"), 0);
    assert_eq!(h.run("CANCEL_PRINT"), 0);
    assert_eq!(h.printer.print_job().phase, PrintPhase::Idle);
    assert!(h.settle().is_empty());
}

#[test]
fn test_unknown_remote_call_fires_no_callback() {
    let h = Harness::manual();
    let fired = Arc::new(Mutex::new(Vec::new()));
    let (ok, err) = (fired.clone(), fired.clone());
    h.printer.invoke_remote_call(
        "printer.does_not_exist",
        json!({}),
        move |_| ok.lock().unwrap().push("success"),
        move |_| err.lock().unwrap().push("error"),
    );
    assert!(fired.lock().unwrap().is_empty());

    let (ok, err) = (fired.clone(), fired.clone());
    h.printer.invoke_remote_call(
        "printer.gcode.script",
        json!({"script": "G1 Z-10"}),
        move |_| ok.lock().unwrap().push("success"),
        move |e| {
            assert_eq!(e.code, 400);
            err.lock().unwrap().push("error");
        },
    );
    assert_eq!(*fired.lock().unwrap(), vec!["error"]);
}

#[test]
fn test_firmware_restart_round_trip() {
    let h = Harness::manual();
    assert_eq!(h.run("FIRMWARE_RESTART"), 0);
    assert_eq!(h.printer.klippy_state(), KlippyState::Startup);
    let seen = h.settle();
    assert!(seen.contains(&Notification::KlippyDisconnected));

    // 250 ms per tick at 1x; the firmware restart takes 3 simulated seconds.
    for _ in 0..12 {
        h.printer.tick().unwrap();
    }
    assert_eq!(h.printer.klippy_state(), KlippyState::Ready);
    assert!(h.settle().contains(&Notification::KlippyReady));
}

#[test]
fn test_emergency_stop_keeps_session_alive() {
    let h = Harness::manual();
    h.run("M104 S220");
    h.run("SDCARD_PRINT_FILE FILENAME=x.gcode");
    assert_eq!(h.run("M112"), 0);
    assert_eq!(h.printer.print_job().phase, PrintPhase::Error);
    assert!(h.printer.heaters().values().all(|heater| heater.target_temp == 0.0));
    assert_eq!(h.run("G28"), 0);
}

#[test]
fn test_shutdown_with_background_ticks() {
    let mut config = Config::default();
    config.simulation.tick_interval_ms = 10;
    config.simulation.speedup = 50.0;
    let mut printer = Printer::new(config).unwrap();
    printer.execute_text_command("M140 S80");
    std::thread::sleep(Duration::from_millis(100));
    assert!(printer.heater("heater_bed").unwrap().current_temp > 25.0);

    printer.shutdown().unwrap();
    assert!(matches!(printer.tick(), Err(PrinterError::Stopped)));
}
