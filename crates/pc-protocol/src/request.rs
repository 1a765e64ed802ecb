//! `pty-req` and `window-change` payload decoding
//!
//! `window-change` carries four big-endian u32 values:
//! - width in characters
//! - height in characters
//! - width in pixels
//! - height in pixels
//!
//! `pty-req` carries a length-prefixed terminal name followed by the same
//! four values and an encoded mode list. Only the character dimensions are
//! consumed from either payload.

use bytes::Buf;

use crate::error::ProtocolError;
use crate::geometry::TerminalGeometry;

/// Size of the (width, height) pair at the start of the dimensions block
pub const DIMENSIONS_SIZE: usize = 8;

/// Offset of the terminal name inside a `pty-req` payload
const TERM_NAME_OFFSET: usize = 4;

/// Decode the leading (width, height) pair of a dimensions block
fn parse_dims(mut src: &[u8]) -> Result<TerminalGeometry, ProtocolError> {
    if src.len() < DIMENSIONS_SIZE {
        return Err(ProtocolError::Truncated {
            expected: DIMENSIONS_SIZE,
            actual: src.len(),
        });
    }

    let width = src.get_u32();
    let height = src.get_u32();
    Ok(TerminalGeometry::new(width, height))
}

/// Decode a `window-change` request payload
pub fn parse_window_change(payload: &[u8]) -> Result<TerminalGeometry, ProtocolError> {
    parse_dims(payload)
}

/// Decode a `pty-req` request payload
///
/// The terminal name length is read from the low byte of its 4-byte length
/// prefix, so names of 256 bytes or more are not supported.
pub fn parse_pty_req(payload: &[u8]) -> Result<TerminalGeometry, ProtocolError> {
    if payload.len() < TERM_NAME_OFFSET {
        return Err(ProtocolError::Truncated {
            expected: TERM_NAME_OFFSET,
            actual: payload.len(),
        });
    }

    let term_len = payload[3] as usize;
    let start = term_len + TERM_NAME_OFFSET;
    let dims = payload.get(start..).ok_or(ProtocolError::Truncated {
        expected: start + DIMENSIONS_SIZE,
        actual: payload.len(),
    })?;

    parse_dims(dims).map_err(|_| ProtocolError::Truncated {
        expected: start + DIMENSIONS_SIZE,
        actual: payload.len(),
    })
}
