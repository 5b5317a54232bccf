// src/print_job.rs
use thiserror::Error;

use crate::config::JobMetadata;

#[derive(Debug, Error, PartialEq)]
pub enum PrintJobError {
    #[error("Invalid state transition: cannot {action} while {from:?}")]
    InvalidTransition { from: PrintPhase, action: &'static str },
}

/// Print lifecycle: Idle -> Preheat -> Printing <-> Paused -> Complete/Cancelled/Error -> Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintPhase {
    Idle,
    Preheat,
    Printing,
    Paused,
    Complete,
    Cancelled,
    Error,
}

impl PrintPhase {
    /// Value of `print_stats.state`. Preheating already reports as printing.
    pub fn print_stats_state(self) -> &'static str {
        match self {
            PrintPhase::Idle => "standby",
            PrintPhase::Preheat | PrintPhase::Printing => "printing",
            PrintPhase::Paused => "paused",
            PrintPhase::Complete => "complete",
            PrintPhase::Cancelled => "cancelled",
            PrintPhase::Error => "error",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, PrintPhase::Preheat | PrintPhase::Printing | PrintPhase::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PrintPhase::Complete | PrintPhase::Cancelled | PrintPhase::Error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrintJob {
    pub id: Option<String>,
    pub phase: PrintPhase,
    pub filename: String,
    /// Fraction complete, 0.0 to 1.0.
    pub progress: f64,
    pub current_layer: u32,
    pub total_layers: u32,
    /// Seconds spent in Printing.
    pub print_duration: f64,
    /// Seconds since start, including preheat and pauses.
    pub total_duration: f64,
    pub estimated_time: f64,
    pub filament_total: f64,
    pub message: String,
}

impl PrintJob {
    pub fn new() -> Self {
        Self {
            id: None,
            phase: PrintPhase::Idle,
            filename: String::new(),
            progress: 0.0,
            current_layer: 0,
            total_layers: 0,
            print_duration: 0.0,
            total_duration: 0.0,
            estimated_time: 0.0,
            filament_total: 0.0,
            message: String::new(),
        }
    }

    pub fn progress_percent(&self) -> u8 {
        (self.progress.clamp(0.0, 1.0) * 100.0).floor() as u8
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.print_duration as u64
    }

    pub fn duration_seconds(&self) -> u64 {
        self.total_duration as u64
    }

    pub fn estimated_total_seconds(&self) -> u64 {
        self.estimated_time as u64
    }

    pub fn filament_used(&self) -> f64 {
        self.filament_total * self.progress
    }

    /// Begin a new print. Terminal phases reset to Idle first; active prints refuse.
    ///
    /// Restarting the file that was printed last keeps its known estimate and
    /// layer count; a different file takes both from `metadata`.
    pub fn start(&mut self, filename: &str, metadata: &JobMetadata) -> Result<(), PrintJobError> {
        if self.phase.is_active() {
            return Err(PrintJobError::InvalidTransition { from: self.phase, action: "start" });
        }
        if self.phase.is_terminal() {
            tracing::debug!("Resetting {:?} job before starting {}", self.phase, filename);
            self.phase = PrintPhase::Idle;
        }
        let same_file = !self.filename.is_empty() && self.filename == filename && self.estimated_time > 0.0;
        if !same_file {
            self.filename = filename.to_string();
            self.estimated_time = metadata.estimated_time;
            self.total_layers = metadata.layer_count;
            self.filament_total = metadata.filament_total;
        }
        self.id = Some(uuid::Uuid::new_v4().to_string());
        self.progress = 0.0;
        self.current_layer = 0;
        self.print_duration = 0.0;
        self.total_duration = 0.0;
        self.message.clear();
        self.phase = PrintPhase::Preheat;
        tracing::info!("Print job started: {} (estimated {:.0}s)", self.filename, self.estimated_time);
        Ok(())
    }

    /// Preheat finished.
    pub fn heated(&mut self) -> Result<(), PrintJobError> {
        if self.phase != PrintPhase::Preheat {
            return Err(PrintJobError::InvalidTransition { from: self.phase, action: "finish preheat" });
        }
        self.phase = PrintPhase::Printing;
        if self.total_layers > 0 {
            self.current_layer = 1;
        }
        tracing::info!("Preheat complete, printing {}", self.filename);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), PrintJobError> {
        if self.phase != PrintPhase::Printing {
            return Err(PrintJobError::InvalidTransition { from: self.phase, action: "pause" });
        }
        self.phase = PrintPhase::Paused;
        tracing::info!("Print job paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), PrintJobError> {
        if self.phase != PrintPhase::Paused {
            return Err(PrintJobError::InvalidTransition { from: self.phase, action: "resume" });
        }
        self.phase = PrintPhase::Printing;
        tracing::info!("Print job resumed");
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), PrintJobError> {
        if !self.phase.is_active() {
            return Err(PrintJobError::InvalidTransition { from: self.phase, action: "cancel" });
        }
        self.phase = PrintPhase::Cancelled;
        tracing::info!("Print job cancelled");
        Ok(())
    }

    /// Forced from any phase.
    pub fn emergency_stop(&mut self) {
        self.phase = PrintPhase::Error;
        self.message = "Emergency stop".to_string();
        tracing::warn!("Print job forced to error by emergency stop");
    }

    /// Terminal job has cooled down and returns to standby.
    pub fn cooled(&mut self) -> Result<(), PrintJobError> {
        if !matches!(self.phase, PrintPhase::Complete | PrintPhase::Cancelled) {
            return Err(PrintJobError::InvalidTransition { from: self.phase, action: "return to idle" });
        }
        self.phase = PrintPhase::Idle;
        Ok(())
    }

    /// Drop everything, as after a restart.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Advance the job clocks by `dt` simulated seconds. Progress only moves
    /// while Printing. Returns true when this step completed the print.
    pub fn advance(&mut self, dt: f64) -> bool {
        if !self.phase.is_active() {
            return false;
        }
        self.total_duration += dt;
        if self.phase != PrintPhase::Printing {
            return false;
        }
        self.print_duration += dt;
        let estimate = self.estimated_time.max(1.0);
        self.progress = (self.print_duration / estimate).min(1.0);
        if self.total_layers > 0 {
            let layer = (self.progress * self.total_layers as f64).ceil() as u32;
            self.current_layer = layer.clamp(1, self.total_layers);
        }
        if self.progress >= 1.0 {
            self.phase = PrintPhase::Complete;
            tracing::info!("Print job complete: {}", self.filename);
            return true;
        }
        false
    }
}

impl Default for PrintJob {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(estimate: f64, layers: u32) -> JobMetadata {
        JobMetadata {
            estimated_time: estimate,
            layer_count: layers,
            ..JobMetadata::default()
        }
    }

    #[test]
    fn test_progress_reaches_completion() {
        let mut job = PrintJob::new();
        job.start("cube.gcode", &metadata(100.0, 50)).unwrap();
        assert!(!job.advance(10.0), "preheat does not advance progress");
        assert_eq!(job.progress, 0.0);
        assert_eq!(job.total_duration, 10.0);
        job.heated().unwrap();
        assert_eq!(job.current_layer, 1);
        assert!(!job.advance(50.0));
        assert_eq!(job.progress_percent(), 50);
        assert_eq!(job.current_layer, 25);
        assert!(job.advance(60.0));
        assert_eq!(job.phase, PrintPhase::Complete);
        assert_eq!(job.progress_percent(), 100);
        assert_eq!(job.current_layer, 50);
        assert_eq!(job.elapsed_seconds(), 110);
        assert!(!job.advance(10.0));
    }

    #[test]
    fn test_paused_job_does_not_progress() {
        let mut job = PrintJob::new();
        job.start("cube.gcode", &metadata(100.0, 10)).unwrap();
        job.heated().unwrap();
        job.advance(10.0);
        job.pause().unwrap();
        job.advance(30.0);
        assert_eq!(job.print_duration, 10.0);
        assert_eq!(job.total_duration, 40.0);
    }

    #[test]
    fn test_phase_strings() {
        assert_eq!(PrintPhase::Idle.print_stats_state(), "standby");
        assert_eq!(PrintPhase::Preheat.print_stats_state(), "printing");
        assert_eq!(PrintPhase::Cancelled.print_stats_state(), "cancelled");
    }
}
