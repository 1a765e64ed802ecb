//! Connection management

mod registry;
mod state;

pub use registry::{ConnectionId, ConnectionInfo, ConnectionRegistry};
pub use state::{pty_size, ConnectionState};
