//! Websocket front door for container terminals.
//!
//! Each connection to `/exec/<resource_id>` is authorized once, then handed to
//! [`exec_bridge::run_exec_session`] with the websocket wrapped as a byte
//! stream.

pub mod config;
pub mod gate;
pub mod registry;
pub mod server;
pub mod telemetry;
pub mod ws_io;

pub use config::{Cli, ServerConfig};
pub use server::{router, AppState};
