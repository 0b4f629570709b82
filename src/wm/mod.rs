//! Window Manager Module
//!
//! The window registry: every window, its owner, and the stacking order.
//! Each mutator reports the screen area its change exposed together with
//! the first stack index that needs repainting, which is all the
//! compositor needs to redraw just the affected pixels.

pub mod focus;
pub mod properties;
pub mod stacking;
pub mod window;

use std::collections::HashMap;

use tessera_proto::{Altitude, ClientId, Point, Region, WindowId};
use tracing::debug;

pub use focus::{FocusChange, FocusManager};
pub use properties::PropertyStore;
pub use stacking::{Restack, StackingManager};
pub use window::{Window, WindowFlags};

/// Screen area to recomposite after a registry change
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Damage {
    pub region: Region,
    /// Stack index of the changed window; windows in front of it are
    /// already correct on screen and are not repainted
    pub changing: usize,
}

impl Damage {
    pub fn new(region: Region, changing: usize) -> Self {
        Self { region, changing }
    }

    /// Repaint everything in `region`
    pub fn full(region: Region) -> Self {
        Self {
            region,
            changing: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }
}

/// Window registry
#[derive(Debug, Default)]
pub struct WindowManager {
    windows: HashMap<WindowId, Window>,
    stacking: StackingManager,
}

impl WindowManager {
    /// Create a new, empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a window for `owner`; `false` if the id is already taken
    pub fn create_window(&mut self, id: WindowId, owner: ClientId) -> bool {
        if self.windows.contains_key(&id) {
            return false;
        }
        debug!("Creating window {} for client {}", id, owner);
        self.windows.insert(id, Window::new(id, owner));
        self.stacking.add_window(id);
        true
    }

    pub fn get(&self, id: WindowId) -> Option<&Window> {
        self.windows.get(&id)
    }

    pub fn get_mut(&mut self, id: WindowId) -> Option<&mut Window> {
        self.windows.get_mut(&id)
    }

    pub fn contains(&self, id: WindowId) -> bool {
        self.windows.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Window> {
        self.windows.values()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Windows owned by `client`, front to back
    pub fn windows_of(&self, client: ClientId) -> Vec<WindowId> {
        self.stacked()
            .filter(|w| w.owner == client)
            .map(|w| w.id)
            .collect()
    }

    /// Windows in paint order, front to back
    pub fn stacked(&self) -> impl Iterator<Item = &Window> {
        self.stacking
            .order()
            .iter()
            .filter_map(|id| self.windows.get(id))
    }

    pub fn stacking(&self) -> &StackingManager {
        &self.stacking
    }

    pub fn index_of(&self, id: WindowId) -> Option<usize> {
        self.stacking.index_of(id)
    }

    /// Topmost visible window whose region contains the point
    pub fn window_at(&self, x: i32, y: i32) -> Option<&Window> {
        self.stacked()
            .find(|w| w.is_painted() && w.requested.contains(x, y))
    }

    /// Replace the requested region; an empty region hides the window.
    ///
    /// The backing-store origin follows the new region's top-left corner.
    pub fn set_region(&mut self, id: WindowId, region: Region) -> Damage {
        let Some(index) = self.stacking.index_of(id) else {
            return Damage::default();
        };
        let Some(window) = self.windows.get_mut(&id) else {
            return Damage::default();
        };
        let exposed = window.requested.union(&region);
        if region.is_empty() {
            window.flags.remove(WindowFlags::VISIBLE);
        } else {
            window.flags.insert(WindowFlags::VISIBLE);
            window.origin = region.bounding_rect().top_left();
        }
        window.requested = region;
        Damage::new(exposed, index)
    }

    /// Translate the requested region and the backing-store origin.
    ///
    /// `None` when the window is unknown or the move would carry it out of
    /// the coordinate range; the window is left untouched then.
    pub fn move_region(&mut self, id: WindowId, dx: i32, dy: i32) -> Option<Damage> {
        let index = self.stacking.index_of(id)?;
        let window = self.windows.get_mut(&id)?;
        let moved = window.requested.checked_translated(dx, dy)?;
        let origin = Point::new(
            window.origin.x.checked_add(dx)?,
            window.origin.y.checked_add(dy)?,
        );
        let exposed = window.requested.union(&moved);
        window.requested = moved;
        window.origin = origin;
        Some(Damage::new(exposed, index))
    }

    /// Remove a window, returning it with the area it used to cover
    pub fn destroy_window(&mut self, id: WindowId) -> Option<(Window, Damage)> {
        let window = self.windows.remove(&id)?;
        let index = self.stacking.remove_window(id).unwrap_or(0);
        debug!("Destroyed window {} (was at {})", id, index);
        let damage = Damage::new(window.requested.clone(), index);
        Some((window, damage))
    }

    pub fn raise(&mut self, id: WindowId) -> Damage {
        let before = self.stacking.order().to_vec();
        match self.stacking.raise_window(id) {
            Some(restack) => self.restack_damage(id, &before, restack),
            None => Damage::default(),
        }
    }

    pub fn lower(&mut self, id: WindowId) -> Damage {
        let before = self.stacking.order().to_vec();
        match self.stacking.lower_window(id) {
            Some(restack) => self.restack_damage(id, &before, restack),
            None => Damage::default(),
        }
    }

    /// Change a window's tier.
    ///
    /// `Lower` leaves the stays-on-top tier and goes to the very back.
    /// `StaysOnTop` joins the tier only when `fixed`; otherwise it raises.
    pub fn set_altitude(&mut self, id: WindowId, altitude: Altitude, fixed: bool) -> Damage {
        let before = self.stacking.order().to_vec();
        let restack = match altitude {
            Altitude::Lower => self.stacking.send_to_bottom(id),
            Altitude::Raise => self.stacking.raise_window(id),
            Altitude::StaysOnTop if fixed => self.stacking.set_on_top(id, true),
            Altitude::StaysOnTop => self.stacking.raise_window(id),
        };
        let on_top = self.stacking.is_on_top(id);
        if let Some(window) = self.windows.get_mut(&id) {
            window.flags.set(WindowFlags::STAYS_ON_TOP, on_top);
        }
        match restack {
            Some(restack) => self.restack_damage(id, &before, restack),
            None => Damage::default(),
        }
    }

    /// Change opacity; the whole window is recomposited from its own index
    pub fn set_opacity(&mut self, id: WindowId, opacity: u8) -> Damage {
        let Some(index) = self.stacking.index_of(id) else {
            return Damage::default();
        };
        match self.windows.get_mut(&id) {
            Some(window) if window.opacity != opacity => {
                window.opacity = opacity;
                Damage::new(window.requested.clone(), index)
            }
            _ => Damage::default(),
        }
    }

    /// Toggle whether the window occludes what lies below it
    pub fn set_opaque(&mut self, id: WindowId, opaque: bool) -> Damage {
        let Some(index) = self.stacking.index_of(id) else {
            return Damage::default();
        };
        match self.windows.get_mut(&id) {
            Some(window) if window.is_opaque() != opaque => {
                window.flags.set(WindowFlags::OPAQUE, opaque);
                Damage::new(window.requested.clone(), index)
            }
            _ => Damage::default(),
        }
    }

    /// Area whose visibility changed when `id` moved within the stack.
    ///
    /// Only the overlap between the moved window and the windows it passed
    /// can change.
    fn restack_damage(&self, id: WindowId, before: &[WindowId], restack: Restack) -> Damage {
        let Restack { from, to } = restack;
        let (passed, changing) = if to < from {
            (&before[to..from], to)
        } else if to > from {
            (&before[from + 1..=to], from)
        } else {
            return Damage::default();
        };
        let Some(window) = self.windows.get(&id) else {
            return Damage::default();
        };
        let others = passed
            .iter()
            .filter_map(|other| self.windows.get(other))
            .fold(Region::new(), |acc, w| acc.union(&w.requested));
        Damage::new(window.requested.intersect(&others), changing)
    }
}
