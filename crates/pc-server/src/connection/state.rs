//! Per-connection terminal state
//!
//! The geometry and the pseudoterminal master live behind one lock so a
//! `window-change` can never slip between allocating a pseudoterminal and
//! applying its initial size.

use portable_pty::{MasterPty, PtySize};
use tokio::sync::Mutex;

use pc_protocol::TerminalGeometry;

/// Initial geometry before the client sends `pty-req`
const DEFAULT_GEOMETRY: TerminalGeometry = TerminalGeometry {
    width: 80,
    height: 24,
};

/// Convert a geometry into the OS-level window size
pub fn pty_size(geometry: TerminalGeometry) -> PtySize {
    PtySize {
        rows: geometry.rows(),
        cols: geometry.cols(),
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Pseudoterminal ownership of a connection
enum PtySlot {
    /// No shell running
    Empty,
    /// A shell was accepted and is being set up
    Reserved,
    /// A shell is running on this master
    Attached(Box<dyn MasterPty + Send>),
}

struct Inner {
    geometry: TerminalGeometry,
    pty: PtySlot,
}

/// Terminal geometry and the single pseudoterminal of one connection
pub struct ConnectionState {
    inner: Mutex<Inner>,
}

impl ConnectionState {
    /// Create state with the default geometry and no pseudoterminal
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                geometry: DEFAULT_GEOMETRY,
                pty: PtySlot::Empty,
            }),
        }
    }

    /// Store a new geometry, resizing the attached pseudoterminal if any
    pub async fn set_geometry(&self, geometry: TerminalGeometry) {
        let mut inner = self.inner.lock().await;
        inner.geometry = geometry;

        if let PtySlot::Attached(master) = &inner.pty {
            if let Err(e) = master.resize(pty_size(geometry)) {
                tracing::warn!("Failed to resize pseudoterminal to {}: {}", geometry, e);
            }
        }
    }

    /// Current geometry
    pub async fn geometry(&self) -> TerminalGeometry {
        self.inner.lock().await.geometry
    }

    /// Claim the pseudoterminal slot; false if one is already in use
    pub async fn reserve_pty(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.pty {
            PtySlot::Empty => {
                inner.pty = PtySlot::Reserved;
                true
            }
            PtySlot::Reserved | PtySlot::Attached(_) => false,
        }
    }

    /// Attach an allocated master and bring it to the current geometry
    pub async fn attach_pty(&self, master: Box<dyn MasterPty + Send>) {
        let mut inner = self.inner.lock().await;
        if let Err(e) = master.resize(pty_size(inner.geometry)) {
            tracing::warn!("Failed to size pseudoterminal to {}: {}", inner.geometry, e);
        }
        inner.pty = PtySlot::Attached(master);
    }

    /// Drop the master (if attached) and free the slot
    pub async fn release_pty(&self) {
        let mut inner = self.inner.lock().await;
        inner.pty = PtySlot::Empty;
    }

    /// Whether a pseudoterminal is reserved or attached
    pub async fn has_pty(&self) -> bool {
        !matches!(self.inner.lock().await.pty, PtySlot::Empty)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
