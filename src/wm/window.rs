//! Window Module
//!
//! Per-window state held by the registry.

use bitflags::bitflags;
use tessera_proto::{ClientId, Point, Region, WindowId};

bitflags! {
    /// Window state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WindowFlags: u32 {
        /// The region hides whatever lies below it
        const OPAQUE       = 1 << 0;
        /// Member of the stays-on-top tier
        const STAYS_ON_TOP = 1 << 1;
        /// Has a non-empty region and takes part in compositing
        const VISIBLE      = 1 << 2;
    }
}

impl Default for WindowFlags {
    fn default() -> Self {
        Self::OPAQUE
    }
}

/// A client-owned region of the screen
#[derive(Debug, Clone)]
pub struct Window {
    pub id: WindowId,
    /// Owning client; a handle, never a reference to the connection
    pub owner: ClientId,
    pub name: String,
    pub caption: String,
    /// Screen pixels the client wants shown
    pub requested: Region,
    /// Screen position of backing-store pixel (0, 0)
    pub origin: Point,
    pub opacity: u8,
    pub flags: WindowFlags,
    /// Higher values regain focus first
    pub focus_priority: u64,
    /// Cursor shown while the pointer is over this window
    pub cursor: u32,
}

impl Window {
    /// Create a new, not yet visible window
    pub fn new(id: WindowId, owner: ClientId) -> Self {
        Self {
            id,
            owner,
            name: String::new(),
            caption: String::new(),
            requested: Region::new(),
            origin: Point::default(),
            opacity: 255,
            flags: WindowFlags::default(),
            focus_priority: 0,
            cursor: 0,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.flags.contains(WindowFlags::VISIBLE)
    }

    pub fn stays_on_top(&self) -> bool {
        self.flags.contains(WindowFlags::STAYS_ON_TOP)
    }

    pub fn is_opaque(&self) -> bool {
        self.flags.contains(WindowFlags::OPAQUE)
    }

    /// Whether the window hides everything below it: opaque and fully opaque
    pub fn occludes(&self) -> bool {
        self.is_opaque() && self.opacity == 255
    }

    /// Whether the window contributes any pixels at all
    pub fn is_painted(&self) -> bool {
        self.is_visible() && self.opacity > 0
    }
}
