//! Terminal geometry type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal dimensions in character cells
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalGeometry {
    /// Width in columns
    pub width: u32,
    /// Height in rows
    pub height: u32,
}

impl TerminalGeometry {
    /// Create a new geometry
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Columns clamped to what an OS-level winsize can hold
    pub fn cols(&self) -> u16 {
        u16::try_from(self.width).unwrap_or(u16::MAX)
    }

    /// Rows clamped to what an OS-level winsize can hold
    pub fn rows(&self) -> u16 {
        u16::try_from(self.height).unwrap_or(u16::MAX)
    }
}

impl fmt::Display for TerminalGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for TerminalGeometry {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}
