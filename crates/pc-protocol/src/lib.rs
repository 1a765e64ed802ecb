//! pc-protocol: SSH session request payloads for pcompose
//!
//! Decodes the byte layouts of the `pty-req` and `window-change` channel
//! requests into a [`TerminalGeometry`].
//!
//! The SSH transport decodes these requests itself and hands the server the
//! `(columns, rows)` pair, which becomes a geometry via
//! `TerminalGeometry::from`. The parsers here define the wire layout that
//! pair has to agree with, and their tests pin both paths to the same result.

pub mod error;
pub mod geometry;
pub mod request;

pub use error::ProtocolError;
pub use geometry::TerminalGeometry;
pub use request::{parse_pty_req, parse_window_change, DIMENSIONS_SIZE};
