//! Bed mesh probing and profile management.

use rand::Rng;

use super::{CommandError, GCodeCommand};
use crate::config::BedMeshConfig;
use crate::machine::Machine;
use crate::state::BedMeshProfile;

/// Probe a fresh mesh: a dome of random height, tilt and center offset with
/// per-point probe noise.
pub fn probe_mesh<R: Rng>(name: &str, config: &BedMeshConfig, rng: &mut R) -> BedMeshProfile {
    let amplitude = rng.random_range(0.15..=0.35);
    let x_tilt = rng.random_range(-0.08..=0.08);
    let y_tilt = rng.random_range(-0.08..=0.08);
    let cx = (config.x_count as f64 - 1.0) / 2.0 + rng.random_range(-0.5..=0.5);
    let cy = (config.y_count as f64 - 1.0) / 2.0 + rng.random_range(-0.5..=0.5);
    let max_radius = (cx * cx + cy * cy).sqrt().max(f64::EPSILON);

    let mut probed_matrix = Vec::with_capacity(config.y_count);
    for row in 0..config.y_count {
        let mut points = Vec::with_capacity(config.x_count);
        for col in 0..config.x_count {
            let dx = col as f64 - cx;
            let dy = row as f64 - cy;
            let dist = (dx * dx + dy * dy).sqrt() / max_radius;
            let noise = rng.random_range(-0.03..=0.03);
            let height = amplitude * (1.0 - dist * dist) + x_tilt * dx + y_tilt * dy + noise;
            points.push((height * 1000.0).round() / 1000.0);
        }
        probed_matrix.push(points);
    }
    BedMeshProfile {
        name: name.to_string(),
        probed_matrix,
        mesh_min: config.mesh_min,
        mesh_max: config.mesh_max,
        algorithm: config.algorithm.clone(),
    }
}

/// BED_MESH_CALIBRATE [PROFILE=<name>]. The result becomes the active mesh
/// and overwrites the named profile, `default` when none is given.
pub fn calibrate(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let name = cmd.get_str("PROFILE").filter(|p| !p.is_empty()).unwrap_or("default");
    let mesh = probe_mesh(name, &machine.config.bed_mesh, &mut machine.rng);
    machine.state.bed_mesh.profiles.insert(name.to_string(), mesh.clone());
    machine.state.bed_mesh.active = mesh;
    tracing::info!("Probed {}x{} bed mesh '{}'", machine.config.bed_mesh.x_count, machine.config.bed_mesh.y_count, name);
    machine.respond("// Mesh Bed Leveling Complete");
    Ok(())
}

/// BED_MESH_PROFILE LOAD=|SAVE=|REMOVE=<name>.
pub fn profile(machine: &mut Machine, cmd: &GCodeCommand) -> Result<(), CommandError> {
    let mesh = &mut machine.state.bed_mesh;
    if let Some(name) = cmd.get_str("LOAD") {
        let stored = mesh
            .profiles
            .get(name)
            .ok_or_else(|| CommandError::UnknownProfile(name.to_string()))?;
        mesh.active = stored.clone();
    } else if let Some(name) = cmd.get_str("SAVE") {
        if mesh.active.probed_matrix.is_empty() {
            return Err(CommandError::NoActiveMesh);
        }
        let mut saved = mesh.active.clone();
        saved.name = name.to_string();
        mesh.profiles.insert(name.to_string(), saved);
        mesh.active.name = name.to_string();
    } else if let Some(name) = cmd.get_str("REMOVE") {
        if mesh.profiles.remove(name).is_none() {
            return Err(CommandError::UnknownProfile(name.to_string()));
        }
    } else {
        return Err(cmd.missing("LOAD, SAVE or REMOVE"));
    }
    Ok(())
}

/// BED_MESH_CLEAR: empty the active slot; stored profiles stay.
pub fn clear(machine: &mut Machine, _cmd: &GCodeCommand) -> Result<(), CommandError> {
    machine.state.bed_mesh.active = BedMeshProfile::empty();
    Ok(())
}
