//! Canonical machine state.
//!
//! `MachineState` is plain data. It is owned by the worker thread and only
//! mutated by command handlers and the simulation tick; everyone else sees
//! immutable snapshots.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{BedMeshConfig, Config};
use crate::print_job::PrintJob;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionMode {
    Absolute,
    Relative,
}

/// Toolhead position in mm plus homing and positioning mode.
#[derive(Debug, Clone, PartialEq)]
pub struct MachinePose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub homed_axes: BTreeSet<Axis>,
    pub motion_mode: MotionMode,
}

impl MachinePose {
    pub fn new() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            homed_axes: BTreeSet::new(),
            motion_mode: MotionMode::Absolute,
        }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
    }

    pub fn is_homed(&self) -> bool {
        Axis::ALL.iter().all(|a| self.homed_axes.contains(a))
    }

    /// Klipper spelling of the homed set, e.g. "xyz" or "".
    pub fn homed_axes_string(&self) -> String {
        self.homed_axes
            .iter()
            .map(|a| a.letter().to_ascii_lowercase())
            .collect()
    }
}

impl Default for MachinePose {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaterState {
    pub current_temp: f64,
    pub target_temp: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FanState {
    pub speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LedState {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub w: f64,
}

impl LedState {
    pub fn new(r: f64, g: f64, b: f64, w: f64) -> Self {
        Self {
            r: r.clamp(0.0, 1.0),
            g: g.clamp(0.0, 1.0),
            b: b.clamp(0.0, 1.0),
            w: w.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LedEffectState {
    pub enabled: bool,
}

/// Passive temperature sensor (chamber, MCU, host).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorState {
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BedMeshProfile {
    pub name: String,
    pub probed_matrix: Vec<Vec<f64>>,
    pub mesh_min: (f64, f64),
    pub mesh_max: (f64, f64),
    pub algorithm: String,
}

impl BedMeshProfile {
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            probed_matrix: Vec::new(),
            mesh_min: (0.0, 0.0),
            mesh_max: (0.0, 0.0),
            algorithm: String::new(),
        }
    }

    pub fn x_count(&self) -> usize {
        self.probed_matrix.first().map_or(0, Vec::len)
    }

    pub fn y_count(&self) -> usize {
        self.probed_matrix.len()
    }
}

/// Stored profiles plus the active slot. Loading copies into `active`.
#[derive(Debug, Clone, PartialEq)]
pub struct BedMesh {
    pub active: BedMeshProfile,
    pub profiles: BTreeMap<String, BedMeshProfile>,
}

impl BedMesh {
    /// The stock "default" and "adaptive" dome profiles; "default" starts active.
    pub fn with_stock_profiles(config: &BedMeshConfig) -> Self {
        let default = dome_profile("default", config, 0.3, 0.0, 0.0);
        let adaptive = dome_profile("adaptive", config, 0.25, 0.5, -0.3);
        let mut profiles = BTreeMap::new();
        profiles.insert(default.name.clone(), default.clone());
        profiles.insert(adaptive.name.clone(), adaptive);
        Self { active: default, profiles }
    }
}

/// Dome-shaped mesh with optional linear tilt, the same surface a slightly
/// warped bed probes as.
pub fn dome_profile(name: &str, config: &BedMeshConfig, amplitude: f64, x_tilt: f64, y_tilt: f64) -> BedMeshProfile {
    let cx = (config.x_count as f64 - 1.0) / 2.0;
    let cy = (config.y_count as f64 - 1.0) / 2.0;
    let max_radius = (cx * cx + cy * cy).sqrt().max(f64::EPSILON);
    let probed_matrix = (0..config.y_count)
        .map(|row| {
            (0..config.x_count)
                .map(|col| {
                    let dx = col as f64 - cx;
                    let dy = row as f64 - cy;
                    let dist = (dx * dx + dy * dy).sqrt() / max_radius;
                    let height = amplitude * (1.0 - dist * dist)
                        + x_tilt * dx / cx.max(f64::EPSILON) * 0.1
                        + y_tilt * dy / cy.max(f64::EPSILON) * 0.1;
                    (height * 1000.0).round() / 1000.0
                })
                .collect()
        })
        .collect();
    BedMeshProfile {
        name: name.to_string(),
        probed_matrix,
        mesh_min: config.mesh_min,
        mesh_max: config.mesh_max,
        algorithm: config.algorithm.clone(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ManualProbeSession {
    pub active: bool,
    pub z: f64,
}

/// Objects known to the current print and the subset excluded from it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExclusionSet {
    pub defined: Vec<String>,
    pub excluded: Vec<String>,
    pub current_object: Option<String>,
}

impl ExclusionSet {
    pub fn define(&mut self, name: &str) {
        if !self.defined.iter().any(|n| n == name) {
            self.defined.push(name.to_string());
        }
    }

    /// Returns false when the object was already excluded.
    pub fn exclude(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.excluded.push(name.to_string());
        if self.current_object.as_deref() == Some(name) {
            self.current_object = None;
        }
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.excluded.iter().any(|n| n == name)
    }

    pub fn clear(&mut self) {
        self.defined.clear();
        self.excluded.clear();
        self.current_object = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KlippyState {
    Ready,
    Startup,
}

impl KlippyState {
    pub fn as_str(self) -> &'static str {
        match self {
            KlippyState::Ready => "ready",
            KlippyState::Startup => "startup",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            KlippyState::Ready => "Printer is ready",
            KlippyState::Startup => "Klipper restarting...",
        }
    }
}

/// G-code transform state reported through `gcode_move`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcodeMoveState {
    pub homing_origin_z: f64,
    pub speed_factor: f64,
    pub extrude_factor: f64,
}

impl Default for GcodeMoveState {
    fn default() -> Self {
        Self {
            homing_origin_z: 0.0,
            speed_factor: 1.0,
            extrude_factor: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MachineState {
    pub(crate) pose: MachinePose,
    pub(crate) heaters: BTreeMap<String, HeaterState>,
    pub(crate) fans: BTreeMap<String, FanState>,
    pub(crate) leds: BTreeMap<String, LedState>,
    pub(crate) led_effects: BTreeMap<String, LedEffectState>,
    pub(crate) sensors: BTreeMap<String, SensorState>,
    pub(crate) bed_mesh: BedMesh,
    pub(crate) probe: ManualProbeSession,
    pub(crate) job: PrintJob,
    pub(crate) exclusions: ExclusionSet,
    pub(crate) klippy: KlippyState,
    pub(crate) gcode_move: GcodeMoveState,
    pub(crate) motors_enabled: bool,
    pub(crate) idle_timeout_triggered: bool,
    pub(crate) speedup: f64,
    /// Simulated seconds since the engine started.
    pub(crate) eventtime: f64,
}

impl MachineState {
    pub fn new(config: &Config) -> Self {
        let ambient = config.simulation.ambient_temp;
        let heaters = config
            .printer
            .heaters
            .iter()
            .map(|name| (name.clone(), HeaterState { current_temp: ambient, target_temp: 0.0 }))
            .collect();
        let fans = config
            .printer
            .fans
            .iter()
            .map(|name| (name.clone(), FanState::default()))
            .collect();
        let leds = config
            .printer
            .leds
            .iter()
            .map(|name| (name.clone(), LedState::default()))
            .collect();
        let led_effects = config
            .printer
            .led_effects
            .iter()
            .map(|name| (name.clone(), LedEffectState::default()))
            .collect();
        let sensors = config
            .printer
            .sensors
            .iter()
            .map(|name| (name.clone(), SensorState { temperature: ambient }))
            .collect();
        Self {
            pose: MachinePose::new(),
            heaters,
            fans,
            leds,
            led_effects,
            sensors,
            bed_mesh: BedMesh::with_stock_profiles(&config.bed_mesh),
            probe: ManualProbeSession::default(),
            job: PrintJob::new(),
            exclusions: ExclusionSet::default(),
            klippy: KlippyState::Ready,
            gcode_move: GcodeMoveState::default(),
            motors_enabled: false,
            idle_timeout_triggered: false,
            speedup: crate::config::clamp_speedup(config.simulation.speedup),
            eventtime: 0.0,
        }
    }

    pub fn pose(&self) -> &MachinePose {
        &self.pose
    }

    pub fn heaters(&self) -> &BTreeMap<String, HeaterState> {
        &self.heaters
    }

    pub fn heater(&self, name: &str) -> Option<HeaterState> {
        self.heaters.get(name).copied()
    }

    pub fn fans(&self) -> &BTreeMap<String, FanState> {
        &self.fans
    }

    pub fn leds(&self) -> &BTreeMap<String, LedState> {
        &self.leds
    }

    pub fn led_effects(&self) -> &BTreeMap<String, LedEffectState> {
        &self.led_effects
    }

    pub fn sensors(&self) -> &BTreeMap<String, SensorState> {
        &self.sensors
    }

    pub fn bed_mesh(&self) -> &BedMesh {
        &self.bed_mesh
    }

    pub fn manual_probe(&self) -> ManualProbeSession {
        self.probe
    }

    pub fn print_job(&self) -> &PrintJob {
        &self.job
    }

    pub fn exclusions(&self) -> &ExclusionSet {
        &self.exclusions
    }

    pub fn klippy_state(&self) -> KlippyState {
        self.klippy
    }

    pub fn gcode_move(&self) -> GcodeMoveState {
        self.gcode_move
    }

    pub fn motors_enabled(&self) -> bool {
        self.motors_enabled
    }

    pub fn idle_timeout_triggered(&self) -> bool {
        self.idle_timeout_triggered
    }

    pub fn speedup(&self) -> f64 {
        self.speedup
    }

    pub fn eventtime(&self) -> f64 {
        self.eventtime
    }

    pub(crate) fn disable_motors(&mut self) {
        self.motors_enabled = false;
        self.pose.homed_axes.clear();
    }

    /// Zero every heater target.
    pub(crate) fn clear_heater_targets(&mut self) {
        for heater in self.heaters.values_mut() {
            heater.target_temp = 0.0;
        }
    }

    /// Resolve a user-supplied object name against a configured list: exact
    /// match first, then an entry whose last word matches ("nevermore" finds
    /// "fan_generic nevermore").
    pub(crate) fn resolve_name<'a, I>(names: I, wanted: &str) -> Option<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut suffix_match = None;
        for name in names {
            if name == wanted {
                return Some(name.clone());
            }
            if suffix_match.is_none() && name.rsplit(' ').next() == Some(wanted) {
                suffix_match = Some(name.clone());
            }
        }
        suffix_match
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_from_config() {
        let config = Config::default();
        let state = MachineState::new(&config);
        assert_eq!(state.heaters().len(), 2);
        assert_eq!(state.heater("extruder").unwrap().current_temp, 25.0);
        assert!(state.fans().contains_key("fan_generic nevermore"));
        assert_eq!(state.pose().homed_axes_string(), "");
        assert_eq!(state.klippy_state(), KlippyState::Ready);
        assert_eq!(state.bed_mesh().active.name, "default");
        assert_eq!(state.bed_mesh().profiles.len(), 2);
    }

    #[test]
    fn test_dome_profile_shape() {
        let config = BedMeshConfig::default();
        let profile = dome_profile("default", &config, 0.3, 0.0, 0.0);
        assert_eq!(profile.x_count(), 7);
        assert_eq!(profile.y_count(), 7);
        // Center is the peak, corners are at zero.
        assert_eq!(profile.probed_matrix[3][3], 0.3);
        assert_eq!(profile.probed_matrix[0][0], 0.0);
        assert_eq!(profile.probed_matrix[6][6], 0.0);
        let adaptive = dome_profile("adaptive", &config, 0.25, 0.5, -0.3);
        assert_ne!(adaptive.probed_matrix, profile.probed_matrix);
    }

    #[test]
    fn test_resolve_name_by_suffix() {
        let names = vec!["fan".to_string(), "fan_generic nevermore".to_string()];
        assert_eq!(MachineState::resolve_name(&names, "fan").as_deref(), Some("fan"));
        assert_eq!(
            MachineState::resolve_name(&names, "nevermore").as_deref(),
            Some("fan_generic nevermore")
        );
        assert_eq!(MachineState::resolve_name(&names, "exhaust"), None);
    }

    #[test]
    fn test_exclusion_set() {
        let mut set = ExclusionSet::default();
        set.define("Part_1");
        set.define("Part_1");
        assert_eq!(set.defined.len(), 1);
        set.current_object = Some("Part_1".to_string());
        assert!(set.exclude("Part_1"));
        assert!(!set.exclude("Part_1"));
        assert_eq!(set.excluded, vec!["Part_1".to_string()]);
        assert!(set.contains("Part_1"));
        assert!(!set.contains("Part_2"));
        assert_eq!(set.current_object, None);
        set.clear();
        assert!(set.excluded.is_empty());
    }
}
