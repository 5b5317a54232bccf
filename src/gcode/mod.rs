// src/gcode/mod.rs
pub mod bed_mesh;
pub mod calibration;
pub mod executor;
pub mod job;
pub mod motion;
pub mod parser;
pub mod peripherals;
pub mod system;
pub mod thermal;

use std::collections::BTreeMap;
use thiserror::Error;

pub use executor::Interpreter;
pub use parser::{parse_line, script_lines};

/// A command the interpreter refused. The `Display` text is what callers
/// read back as the last error; the response line gets a `!! ` prefix.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    #[error("Move out of range: {axis}={value:.3}")]
    MoveOutOfRange { axis: char, value: f64 },
    #[error("Unable to parse '{value}' as a number for {param} in '{command}'")]
    InvalidNumber { command: String, param: String, value: String },
    #[error("Error on '{command}': missing {param}")]
    MissingParameter { command: String, param: String },
    #[error("The value '{0}' is not valid for HEATER")]
    UnknownHeater(String),
    #[error("Requested temperature ({value:.1}) out of range ({min:.1}:{max:.1})")]
    TemperatureOutOfRange { value: f64, min: f64, max: f64 },
    #[error("Invalid {param} '{value}'")]
    InvalidChoice { param: String, value: String },
    #[error("bed_mesh: Unknown profile [{0}]")]
    UnknownProfile(String),
    #[error("bed_mesh: no active mesh to save")]
    NoActiveMesh,
    #[error("Malformed command '{0}'")]
    Malformed(String),
}

/// Every command the interpreter knows. Anything else parses as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    LinearMove,
    Home,
    AbsolutePositioning,
    RelativePositioning,
    SetPosition,
    SetExtruderTemperature,
    WaitExtruderTemperature,
    SetBedTemperature,
    WaitBedTemperature,
    SetHeaterTemperature,
    FanOn,
    FanOff,
    SetFanSpeed,
    SpeedFactor,
    ExtrudeFactor,
    DisableMotors,
    EmergencyStop,
    SetLed,
    SetLedEffect,
    StopLedEffects,
    BedMeshCalibrate,
    BedMeshProfile,
    BedMeshClear,
    SetGcodeOffset,
    ProbeCalibrate,
    ZEndstopCalibrate,
    TestZ,
    Accept,
    Abort,
    ExcludeObjectDefine,
    ExcludeObject,
    ExcludeObjectStart,
    ExcludeObjectEnd,
    SdcardPrintFile,
    Pause,
    Resume,
    CancelPrint,
    SetPrintStatsInfo,
    Restart,
    FirmwareRestart,
    SaveConfig,
    PidCalibrate,
    ShaperCalibrate,
    MeasureAxesNoise,
    Unknown,
}

const COMMAND_NAMES: &[(&str, CommandKind)] = &[
    ("G0", CommandKind::LinearMove),
    ("G1", CommandKind::LinearMove),
    ("G28", CommandKind::Home),
    ("G90", CommandKind::AbsolutePositioning),
    ("G91", CommandKind::RelativePositioning),
    ("G92", CommandKind::SetPosition),
    ("M104", CommandKind::SetExtruderTemperature),
    ("M109", CommandKind::WaitExtruderTemperature),
    ("M140", CommandKind::SetBedTemperature),
    ("M190", CommandKind::WaitBedTemperature),
    ("SET_HEATER_TEMPERATURE", CommandKind::SetHeaterTemperature),
    ("M106", CommandKind::FanOn),
    ("M107", CommandKind::FanOff),
    ("SET_FAN_SPEED", CommandKind::SetFanSpeed),
    ("M220", CommandKind::SpeedFactor),
    ("M221", CommandKind::ExtrudeFactor),
    ("M84", CommandKind::DisableMotors),
    ("M18", CommandKind::DisableMotors),
    ("M112", CommandKind::EmergencyStop),
    ("SET_LED", CommandKind::SetLed),
    ("SET_LED_EFFECT", CommandKind::SetLedEffect),
    ("STOP_LED_EFFECTS", CommandKind::StopLedEffects),
    ("BED_MESH_CALIBRATE", CommandKind::BedMeshCalibrate),
    ("BED_MESH_PROFILE", CommandKind::BedMeshProfile),
    ("BED_MESH_CLEAR", CommandKind::BedMeshClear),
    ("SET_GCODE_OFFSET", CommandKind::SetGcodeOffset),
    ("PROBE_CALIBRATE", CommandKind::ProbeCalibrate),
    ("Z_ENDSTOP_CALIBRATE", CommandKind::ZEndstopCalibrate),
    ("TESTZ", CommandKind::TestZ),
    ("ACCEPT", CommandKind::Accept),
    ("ABORT", CommandKind::Abort),
    ("EXCLUDE_OBJECT_DEFINE", CommandKind::ExcludeObjectDefine),
    ("EXCLUDE_OBJECT", CommandKind::ExcludeObject),
    ("EXCLUDE_OBJECT_START", CommandKind::ExcludeObjectStart),
    ("EXCLUDE_OBJECT_END", CommandKind::ExcludeObjectEnd),
    ("SDCARD_PRINT_FILE", CommandKind::SdcardPrintFile),
    ("PAUSE", CommandKind::Pause),
    ("RESUME", CommandKind::Resume),
    ("CANCEL_PRINT", CommandKind::CancelPrint),
    ("SET_PRINT_STATS_INFO", CommandKind::SetPrintStatsInfo),
    ("RESTART", CommandKind::Restart),
    ("FIRMWARE_RESTART", CommandKind::FirmwareRestart),
    ("SAVE_CONFIG", CommandKind::SaveConfig),
    ("PID_CALIBRATE", CommandKind::PidCalibrate),
    ("SHAPER_CALIBRATE", CommandKind::ShaperCalibrate),
    ("MEASURE_AXES_NOISE", CommandKind::MeasureAxesNoise),
];

impl CommandKind {
    /// Resolve an upper-cased command name.
    pub fn from_name(name: &str) -> CommandKind {
        COMMAND_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, kind)| *kind)
            .unwrap_or(CommandKind::Unknown)
    }
}

/// One parsed command line.
///
/// Traditional commands store their letter words under the upper-case
/// letter (`"X" -> "10"`, a bare `"X" -> ""`); extended commands store
/// `KEY=VALUE` pairs under the upper-case key with quotes removed.
#[derive(Debug, Clone, PartialEq)]
pub struct GCodeCommand {
    pub kind: CommandKind,
    pub command: String,
    pub parameters: BTreeMap<String, String>,
    pub raw: String,
}

impl GCodeCommand {
    pub fn has(&self, param: &str) -> bool {
        self.parameters.contains_key(param)
    }

    pub fn get_str(&self, param: &str) -> Option<&str> {
        self.parameters.get(param).map(String::as_str)
    }

    /// Numeric parameter. A bare flag (empty value) reads as absent.
    pub fn get_f64(&self, param: &str) -> Result<Option<f64>, CommandError> {
        let Some(value) = self.parameters.get(param) else {
            return Ok(None);
        };
        if value.is_empty() {
            return Ok(None);
        }
        match value.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(CommandError::InvalidNumber {
                command: self.command.clone(),
                param: param.to_string(),
                value: value.clone(),
            }),
        }
    }

    pub fn require_f64(&self, param: &str) -> Result<f64, CommandError> {
        self.get_f64(param)?.ok_or_else(|| self.missing(param))
    }

    pub fn require_str(&self, param: &str) -> Result<&str, CommandError> {
        match self.get_str(param) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(self.missing(param)),
        }
    }

    pub fn missing(&self, param: &str) -> CommandError {
        CommandError::MissingParameter {
            command: self.command.clone(),
            param: param.to_string(),
        }
    }
}
