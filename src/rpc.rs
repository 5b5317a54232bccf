//! Moonraker-style remote calls, dispatched by method name.

use std::collections::HashMap;

use serde_json::{Value, json};
use thiserror::Error;

use crate::gcode::Interpreter;
use crate::machine::{Machine, RestartKind};
use crate::notify::status::{full_status, static_objects};
use crate::notify::{FieldFilter, ObjectRequest, StatusEmitter, StatusMap, filter_status};

pub const INVALID_PARAMS: i64 = -32602;
pub const SCRIPT_ERROR: i64 = 400;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self { code: INVALID_PARAMS, message: message.into() }
    }

    pub fn to_json(&self) -> Value {
        json!({ "code": self.code, "message": self.message })
    }
}

/// What a remote call handler may touch.
pub struct RpcContext<'a> {
    pub machine: &'a mut Machine,
    pub interpreter: &'a Interpreter,
    pub emitter: &'a mut StatusEmitter,
}

pub type RpcHandler = fn(&mut RpcContext<'_>, &Value) -> Result<Value, RpcError>;

/// Method name -> handler, populated once at construction.
pub struct RpcRegistry {
    handlers: HashMap<&'static str, RpcHandler>,
}

impl RpcRegistry {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, RpcHandler> = HashMap::new();
        handlers.insert("printer.info", printer_info);
        handlers.insert("server.info", server_info);
        handlers.insert("printer.objects.list", objects_list);
        handlers.insert("printer.objects.query", objects_query);
        handlers.insert("printer.objects.subscribe", objects_subscribe);
        handlers.insert("printer.gcode.script", gcode_script);
        handlers.insert("printer.print.start", print_start);
        handlers.insert("printer.print.pause", print_pause);
        handlers.insert("printer.print.resume", print_resume);
        handlers.insert("printer.print.cancel", print_cancel);
        handlers.insert("printer.emergency_stop", emergency_stop);
        handlers.insert("printer.restart", restart);
        handlers.insert("printer.firmware_restart", firmware_restart);
        Self { handlers }
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// `None` when no handler is registered for `method`.
    pub fn call(&self, ctx: &mut RpcContext<'_>, method: &str, params: &Value) -> Option<Result<Value, RpcError>> {
        match self.handlers.get(method) {
            Some(handler) => {
                ctx.machine.mark_activity();
                Some(handler(ctx, params))
            }
            None => {
                tracing::debug!("No handler registered for remote call {}", method);
                None
            }
        }
    }
}

impl Default for RpcRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `{"objects": {"name": null | ["field", ..]}}`.
pub fn parse_object_request(params: &Value) -> Result<ObjectRequest, RpcError> {
    let objects = params
        .get("objects")
        .and_then(Value::as_object)
        .ok_or_else(|| RpcError::invalid_params("Missing Argument [objects]"))?;
    let mut request = ObjectRequest::new();
    for (name, fields) in objects {
        let filter = match fields {
            Value::Null => FieldFilter::All,
            Value::Array(items) => {
                let names = items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| RpcError::invalid_params(format!("Invalid field list for {}", name)))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if names.is_empty() { FieldFilter::All } else { FieldFilter::Fields(names) }
            }
            _ => return Err(RpcError::invalid_params(format!("Invalid field list for {}", name))),
        };
        request.insert(name.clone(), filter);
    }
    Ok(request)
}

fn required_str<'v>(params: &'v Value, key: &str) -> Result<&'v str, RpcError> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params(format!("Missing Argument [{}]", key)))
}

fn queryable(machine: &Machine) -> StatusMap {
    let mut status = full_status(&machine.state, &machine.config);
    status.extend(static_objects(&machine.config));
    status
}

fn ok() -> Value {
    Value::String("ok".to_string())
}

fn printer_info(ctx: &mut RpcContext<'_>, _params: &Value) -> Result<Value, RpcError> {
    let klippy = ctx.machine.state.klippy_state();
    Ok(json!({
        "state": klippy.as_str(),
        "state_message": klippy.message(),
        "hostname": ctx.machine.config.printer.name,
        "software_version": concat!("v", env!("CARGO_PKG_VERSION"), "-virtual"),
        "cpu_info": "virtual",
        "klipper_path": "/virtual/klipper",
        "python_path": "/virtual/klippy-env/bin/python",
        "log_file": "/virtual/logs/klippy.log",
        "config_file": "/virtual/config/printer.cfg",
    }))
}

fn server_info(ctx: &mut RpcContext<'_>, _params: &Value) -> Result<Value, RpcError> {
    let klippy = ctx.machine.state.klippy_state();
    Ok(json!({
        "klippy_connected": true,
        "klippy_state": klippy.as_str(),
        "components": ["klippy_apis", "file_manager", "machine", "data_store", "history"],
        "failed_components": [],
        "registered_directories": ["config", "logs", "gcodes"],
        "warnings": [],
        "websocket_count": 1,
        "moonraker_version": concat!("v", env!("CARGO_PKG_VERSION"), "-virtual"),
        "api_version": [1, 5, 0],
        "api_version_string": "1.5.0",
    }))
}

fn objects_list(ctx: &mut RpcContext<'_>, _params: &Value) -> Result<Value, RpcError> {
    let names: Vec<String> = queryable(ctx.machine).keys().cloned().collect();
    Ok(json!({ "objects": names }))
}

fn objects_query(ctx: &mut RpcContext<'_>, params: &Value) -> Result<Value, RpcError> {
    let request = parse_object_request(params)?;
    let status = filter_status(&queryable(ctx.machine), &request);
    Ok(json!({ "eventtime": ctx.machine.state.eventtime(), "status": status }))
}

/// Query, then narrow future status notifications to the same objects.
fn objects_subscribe(ctx: &mut RpcContext<'_>, params: &Value) -> Result<Value, RpcError> {
    let response = objects_query(ctx, params)?;
    let request = parse_object_request(params)?;
    ctx.emitter.set_subscription(Some(request));
    Ok(response)
}

fn gcode_script(ctx: &mut RpcContext<'_>, params: &Value) -> Result<Value, RpcError> {
    let script = required_str(params, "script")?;
    ctx.interpreter
        .run_script(ctx.machine, script)
        .map(|()| ok())
        .map_err(|e| RpcError { code: SCRIPT_ERROR, message: e.to_string() })
}

fn print_start(ctx: &mut RpcContext<'_>, params: &Value) -> Result<Value, RpcError> {
    let filename = required_str(params, "filename")?;
    ctx.machine.start_print(filename.trim_start_matches('/'));
    Ok(ok())
}

fn print_pause(ctx: &mut RpcContext<'_>, _params: &Value) -> Result<Value, RpcError> {
    ctx.machine.pause_print();
    Ok(ok())
}

fn print_resume(ctx: &mut RpcContext<'_>, _params: &Value) -> Result<Value, RpcError> {
    ctx.machine.resume_print();
    Ok(ok())
}

fn print_cancel(ctx: &mut RpcContext<'_>, _params: &Value) -> Result<Value, RpcError> {
    ctx.machine.cancel_print();
    Ok(ok())
}

fn emergency_stop(ctx: &mut RpcContext<'_>, _params: &Value) -> Result<Value, RpcError> {
    ctx.machine.emergency_stop();
    Ok(ok())
}

fn restart(ctx: &mut RpcContext<'_>, _params: &Value) -> Result<Value, RpcError> {
    ctx.machine.restart(RestartKind::Host);
    Ok(ok())
}

fn firmware_restart(ctx: &mut RpcContext<'_>, _params: &Value) -> Result<Value, RpcError> {
    ctx.machine.restart(RestartKind::Firmware);
    Ok(ok())
}
