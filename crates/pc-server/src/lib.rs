//! pc-server: SSH front door of pcompose
//!
//! Accepts SSH connections, authenticates them, and turns each session
//! channel into a pseudoterminal shell, a git service or an orchestration
//! command chosen by the router in `pc-core`.

pub mod auth;
pub mod connection;
pub mod server;
pub mod session;
pub mod state;

pub use server::{load_or_generate_host_key, ConnectionHandler, ServerConfig, SshServer};
pub use state::ServerState;
