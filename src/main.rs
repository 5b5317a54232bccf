// src/main.rs - Virtual printer console: G-code and JSON-RPC over stdio
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use serde_json::{Value, json};
use virtual_printer::{Config, Notification, Printer, load_config};

/// Virtual Klipper/Moonraker printer.
///
/// Each stdin line is either a G-code script line or a JSON-RPC request
/// object. Notifications and replies are written to stdout as JSON.
#[derive(Parser, Debug)]
#[command(name = "virtual-printer", version, about = "Virtual Klipper/Moonraker printer engine")]
struct Cli {
    /// Path to a TOML config file (defaults are used otherwise)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulation speedup, 0.1 to 10000
    #[arg(short, long)]
    speedup: Option<f64>,

    /// Log level written to stderr
    #[arg(long, default_value = "info")]
    log_level: String,

    /// G-code file to run before reading stdin
    #[arg(long)]
    script: Option<PathBuf>,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

fn print_line(value: &Value) {
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{}", value) {
        tracing::error!("Failed to write to stdout: {}", e);
    }
}

fn handle_rpc(printer: &Printer, line: &str) {
    let request: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            print_line(&json!({"jsonrpc": "2.0", "error": {"code": -32700, "message": e.to_string()}, "id": null}));
            return;
        }
    };
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = request.get("params").cloned().unwrap_or_else(|| json!({}));
    printer.invoke_remote_call(
        method,
        params,
        |result| print_line(&json!({"jsonrpc": "2.0", "result": result, "id": id})),
        |error| print_line(&json!({"jsonrpc": "2.0", "error": error.to_json(), "id": id})),
    );
}

fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let level = tracing::Level::from_str(&cli.log_level).unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            load_config(&path.to_string_lossy())?
        }
        None => Config::default(),
    };
    if let Some(speedup) = cli.speedup {
        config.simulation.speedup = virtual_printer::config::clamp_speedup(speedup);
    }
    tracing::info!(
        "Printer: {} ({}), speedup {}x",
        config.printer.name,
        config.printer.kinematics,
        config.simulation.speedup
    );

    let mut printer = Printer::new(config)?;
    printer.set_observer(|notification: Notification| print_line(&notification.to_jsonrpc()));

    if let Some(path) = &cli.script {
        let script = std::fs::read_to_string(path)?;
        if let Err(e) = printer.gcode_script(&script) {
            tracing::error!("Script {} stopped: {}", path.display(), e);
        }
    }

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('{') {
            handle_rpc(&printer, trimmed);
        } else if printer.execute_text_command(trimmed) != 0 {
            tracing::warn!("Rejected: {}", printer.last_error().unwrap_or_default());
        }
    }

    printer.shutdown()?;
    Ok(())
}
