//! Infrastructure layer: sockets, files and the outside world.
//!
//! - [`ws_server`]   – WebSocket accept loop and per-session tasks.
//! - [`tcp_gateway`] – device transport over TCP to a gateway process.
//! - [`config_file`] – optional TOML configuration file.

pub mod config_file;
pub mod tcp_gateway;
pub mod ws_server;
