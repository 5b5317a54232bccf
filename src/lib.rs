pub mod config;
pub mod gcode;
pub mod hardware;
pub mod machine;
pub mod notify;
pub mod print_job;
pub mod printer;
pub mod rpc;
pub mod simulator;
pub mod state;

pub use config::{Config, load_config};
pub use gcode::{CommandError, GCodeCommand};
pub use notify::{Notification, NotificationSink};
pub use printer::{Printer, PrinterError};
pub use rpc::RpcError;
