// src/hardware/mod.rs - Simulated hardware models
pub mod temperature;

pub use temperature::{ThermalEvent, advance_heater, sensor_temperature};
