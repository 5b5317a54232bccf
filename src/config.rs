//! # Virtual Printer Configuration
//!
//! Everything the engine needs to know about the machine it pretends to be:
//! object names (heaters, fans, LEDs, sensors), soft limits, simulation
//! timing, thermal constants, bed mesh shape and a small catalog of job
//! metadata keyed by filename.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [printer]
//! name = "Voron 2.4"
//! heaters = ["extruder", "heater_bed"]
//! fans = ["fan", "fan_generic nevermore"]
//!
//! [simulation]
//! speedup = 100.0
//! auto_tick = false
//!
//! [thermal.extruder]
//! heat_time_constant = 6.0
//! cool_time_constant = 35.0
//! max_temp = 285.0
//!
//! [jobs."benchy.gcode"]
//! estimated_time = 2400.0
//! layer_count = 240
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub const MIN_SPEEDUP: f64 = 0.1;
pub const MAX_SPEEDUP: f64 = 10_000.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Clamp a speedup factor into the supported range. Non-finite input falls back to real time.
pub fn clamp_speedup(speedup: f64) -> f64 {
    if !speedup.is_finite() {
        return 1.0;
    }
    speedup.clamp(MIN_SPEEDUP, MAX_SPEEDUP)
}

/// Main configuration struct for the virtual printer.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub printer: PrinterConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub thermal: HashMap<String, ThermalConfig>,
    #[serde(default)]
    pub bed_mesh: BedMeshConfig,
    #[serde(default)]
    pub jobs: HashMap<String, JobMetadata>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.printer.heaters.is_empty() {
            return Err(ConfigError::Invalid("at least one heater is required".to_string()));
        }
        for (axis, limits) in [("x", &self.limits.x), ("y", &self.limits.y), ("z", &self.limits.z)] {
            if !(limits.min < limits.max) {
                return Err(ConfigError::Invalid(format!(
                    "soft limits for {} are inverted: {} >= {}",
                    axis, limits.min, limits.max
                )));
            }
        }
        if self.bed_mesh.x_count < 2 || self.bed_mesh.y_count < 2 {
            return Err(ConfigError::Invalid("bed mesh needs at least 2x2 points".to_string()));
        }
        if self.simulation.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".to_string()));
        }
        for (name, thermal) in &self.thermal {
            if thermal.heat_time_constant <= 0.0 || thermal.cool_time_constant <= 0.0 {
                return Err(ConfigError::Invalid(format!("time constants for {} must be positive", name)));
            }
        }
        Ok(())
    }

    /// Thermal constants for a heater, falling back to per-kind defaults.
    pub fn thermal_for(&self, heater: &str) -> ThermalConfig {
        self.thermal
            .get(heater)
            .cloned()
            .unwrap_or_else(|| ThermalConfig::default_for(heater))
    }

    /// Metadata for a job file, or generic defaults when the file is not cataloged.
    pub fn job_metadata(&self, filename: &str) -> JobMetadata {
        self.jobs.get(filename).cloned().unwrap_or_default()
    }
}

/// Printer-level configuration: identity and the Klipper object names to emulate.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_kinematics")]
    pub kinematics: String,
    #[serde(default = "default_max_velocity")]
    pub max_velocity: f64,
    #[serde(default = "default_max_accel")]
    pub max_accel: f64,
    #[serde(default = "default_heaters")]
    pub heaters: Vec<String>,
    #[serde(default = "default_fans")]
    pub fans: Vec<String>,
    #[serde(default = "default_leds")]
    pub leds: Vec<String>,
    #[serde(default = "default_led_effects")]
    pub led_effects: Vec<String>,
    #[serde(default = "default_sensors")]
    pub sensors: Vec<String>,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            kinematics: default_kinematics(),
            max_velocity: default_max_velocity(),
            max_accel: default_max_accel(),
            heaters: default_heaters(),
            fans: default_fans(),
            leds: default_leds(),
            led_effects: default_led_effects(),
            sensors: default_sensors(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct AxisLimits {
    pub min: f64,
    pub max: f64,
}

impl AxisLimits {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Software position bounds per axis.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_xy_limits")]
    pub x: AxisLimits,
    #[serde(default = "default_xy_limits")]
    pub y: AxisLimits,
    #[serde(default = "default_z_limits")]
    pub z: AxisLimits,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            x: default_xy_limits(),
            y: default_xy_limits(),
            z: default_z_limits(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    #[serde(default = "default_speedup")]
    pub speedup: f64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// When false, ticks only happen through `Printer::tick`.
    #[serde(default = "default_true")]
    pub auto_tick: bool,
    /// Simulated seconds without commands before motors are released.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: f64,
    #[serde(default = "default_ambient_temp")]
    pub ambient_temp: f64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_restart_delay")]
    pub restart_delay: f64,
    #[serde(default = "default_firmware_restart_delay")]
    pub firmware_restart_delay: f64,
    /// Stream PRINT_START style response lines while preheating.
    #[serde(default = "default_true")]
    pub simulate_print_start: bool,
}

impl SimulationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            speedup: default_speedup(),
            tick_interval_ms: default_tick_interval_ms(),
            auto_tick: true,
            idle_timeout: default_idle_timeout(),
            ambient_temp: default_ambient_temp(),
            seed: None,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            restart_delay: default_restart_delay(),
            firmware_restart_delay: default_firmware_restart_delay(),
            simulate_print_start: true,
        }
    }
}

/// First-order lag constants for one heater, in simulated seconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ThermalConfig {
    pub heat_time_constant: f64,
    pub cool_time_constant: f64,
    #[serde(default)]
    pub min_temp: f64,
    pub max_temp: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl ThermalConfig {
    pub fn default_for(heater: &str) -> Self {
        if heater.starts_with("extruder") {
            Self {
                heat_time_constant: 8.0,
                cool_time_constant: 40.0,
                min_temp: 0.0,
                max_temp: 300.0,
                jitter: default_jitter(),
            }
        } else if heater == "heater_bed" {
            Self {
                heat_time_constant: 30.0,
                cool_time_constant: 120.0,
                min_temp: 0.0,
                max_temp: 130.0,
                jitter: default_jitter(),
            }
        } else {
            Self {
                heat_time_constant: 20.0,
                cool_time_constant: 90.0,
                min_temp: 0.0,
                max_temp: 100.0,
                jitter: default_jitter(),
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BedMeshConfig {
    #[serde(default = "default_mesh_count")]
    pub x_count: usize,
    #[serde(default = "default_mesh_count")]
    pub y_count: usize,
    #[serde(default = "default_mesh_min")]
    pub mesh_min: (f64, f64),
    #[serde(default = "default_mesh_max")]
    pub mesh_max: (f64, f64),
    #[serde(default = "default_mesh_algorithm")]
    pub algorithm: String,
}

impl Default for BedMeshConfig {
    fn default() -> Self {
        Self {
            x_count: default_mesh_count(),
            y_count: default_mesh_count(),
            mesh_min: default_mesh_min(),
            mesh_max: default_mesh_max(),
            algorithm: default_mesh_algorithm(),
        }
    }
}

/// What the engine knows about a job file without reading it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JobMetadata {
    #[serde(default = "default_estimated_time")]
    pub estimated_time: f64,
    #[serde(default = "default_layer_count")]
    pub layer_count: u32,
    #[serde(default = "default_bed_temp")]
    pub bed_temp: f64,
    #[serde(default = "default_nozzle_temp")]
    pub nozzle_temp: f64,
    #[serde(default = "default_filament_total")]
    pub filament_total: f64,
    #[serde(default)]
    pub objects: Vec<String>,
}

impl Default for JobMetadata {
    fn default() -> Self {
        Self {
            estimated_time: default_estimated_time(),
            layer_count: default_layer_count(),
            bed_temp: default_bed_temp(),
            nozzle_temp: default_nozzle_temp(),
            filament_total: default_filament_total(),
            objects: Vec::new(),
        }
    }
}

fn default_name() -> String { "Virtual Printer".to_string() }
fn default_kinematics() -> String { "corexy".to_string() }
fn default_max_velocity() -> f64 { 500.0 }
fn default_max_accel() -> f64 { 10_000.0 }
fn default_heaters() -> Vec<String> { vec!["extruder".to_string(), "heater_bed".to_string()] }
fn default_fans() -> Vec<String> {
    vec![
        "fan".to_string(),
        "heater_fan hotend_fan".to_string(),
        "controller_fan controller_fan".to_string(),
        "fan_generic nevermore".to_string(),
    ]
}
fn default_leds() -> Vec<String> {
    vec!["neopixel chamber_light".to_string(), "neopixel status_led".to_string()]
}
fn default_led_effects() -> Vec<String> {
    ["breathing", "fire_comet", "rainbow", "static_white"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_sensors() -> Vec<String> {
    vec![
        "temperature_sensor chamber".to_string(),
        "temperature_sensor mcu_temp".to_string(),
        "temperature_sensor host_temp".to_string(),
    ]
}
fn default_xy_limits() -> AxisLimits { AxisLimits { min: 0.0, max: 350.0 } }
fn default_z_limits() -> AxisLimits { AxisLimits { min: -0.5, max: 340.0 } }
fn default_speedup() -> f64 { 1.0 }
fn default_tick_interval_ms() -> u64 { 250 }
fn default_true() -> bool { true }
fn default_idle_timeout() -> f64 { 600.0 }
fn default_ambient_temp() -> f64 { 25.0 }
fn default_shutdown_timeout_ms() -> u64 { 2000 }
fn default_restart_delay() -> f64 { 2.0 }
fn default_firmware_restart_delay() -> f64 { 3.0 }
fn default_jitter() -> f64 { 0.15 }
fn default_mesh_count() -> usize { 7 }
fn default_mesh_min() -> (f64, f64) { (25.0, 25.0) }
fn default_mesh_max() -> (f64, f64) { (325.0, 325.0) }
fn default_mesh_algorithm() -> String { "lagrange".to_string() }
fn default_estimated_time() -> f64 { 300.0 }
fn default_layer_count() -> u32 { 100 }
fn default_bed_temp() -> f64 { 60.0 }
fn default_nozzle_temp() -> f64 { 210.0 }
fn default_filament_total() -> f64 { 5400.0 }

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            e
        })?;
    let mut config: Config = toml::from_str(&content)
        .map_err(|e| {
            tracing::error!("Failed to parse config file '{}': {}", path, e);
            e
        })?;
    config.validate()?;
    let clamped = clamp_speedup(config.simulation.speedup);
    if clamped != config.simulation.speedup {
        tracing::warn!("Speedup {} out of range, clamped to {}", config.simulation.speedup, clamped);
        config.simulation.speedup = clamped;
    }
    Ok(config)
}
