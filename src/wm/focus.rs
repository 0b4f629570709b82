//! Focus Module
//!
//! Tracks the keyboard-focus window. Every focus gain stamps the window
//! with a rising priority; when the focused window goes away, the visible
//! window with the highest stamp takes over.

use tessera_proto::{ClientId, WindowId};
use tracing::debug;

use crate::wm::{Window, WindowManager};

/// Focus transition to report to the affected clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FocusChange {
    pub lost: Option<WindowId>,
    pub gained: Option<WindowId>,
}

impl FocusChange {
    pub fn is_empty(&self) -> bool {
        self.lost.is_none() && self.gained.is_none()
    }
}

/// Focus manager
#[derive(Debug, Default)]
pub struct FocusManager {
    /// Currently focused window
    focused_window: Option<WindowId>,
    /// Last priority stamp handed out
    counter: u64,
}

impl FocusManager {
    /// Create a new focus manager
    pub fn new() -> Self {
        Self::default()
    }

    pub fn focused(&self) -> Option<WindowId> {
        self.focused_window
    }

    /// Give focus to a visible window
    pub fn set_focus(&mut self, windows: &mut WindowManager, window: WindowId) -> FocusChange {
        if self.focused_window == Some(window) {
            return FocusChange::default();
        }
        let Some(target) = windows.get_mut(window) else {
            return FocusChange::default();
        };
        if !target.is_visible() {
            debug!("Window {} is not visible, skipping focus", window);
            return FocusChange::default();
        }
        self.counter += 1;
        target.focus_priority = self.counter;

        let lost = self.focused_window.replace(window);
        debug!("Focus {:?} -> {}", lost, window);
        FocusChange {
            lost,
            gained: Some(window),
        }
    }

    /// Give up focus held by `window`, passing it to the best other window
    pub fn release_focus(&mut self, windows: &WindowManager, window: WindowId) -> FocusChange {
        if self.focused_window != Some(window) {
            return FocusChange::default();
        }
        let next = Self::successor(windows, |w| w.id == window);
        self.focused_window = next;
        debug!("Focus released by {}, now {:?}", window, next);
        FocusChange {
            lost: Some(window),
            gained: next,
        }
    }

    /// Give up focus held by any window of `client`
    pub fn release_owner(&mut self, windows: &WindowManager, client: ClientId) -> FocusChange {
        let Some(current) = self.focused_window else {
            return FocusChange::default();
        };
        if windows.get(current).is_none_or(|w| w.owner != client) {
            return FocusChange::default();
        }
        let next = Self::successor(windows, |w| w.owner == client);
        self.focused_window = next;
        debug!("Client {} released focus, now {:?}", client, next);
        FocusChange {
            lost: Some(current),
            gained: next,
        }
    }

    /// Re-check focus after windows were hidden or destroyed.
    ///
    /// The lost window is reported even when it no longer exists; its owner
    /// still has to hear about it.
    pub fn revalidate(&mut self, windows: &WindowManager) -> FocusChange {
        let Some(current) = self.focused_window else {
            return FocusChange::default();
        };
        if windows.get(current).is_some_and(|w| w.is_visible()) {
            return FocusChange::default();
        }
        let next = Self::successor(windows, |w| w.id == current);
        self.focused_window = next;
        debug!("Focused window {} went away, now {:?}", current, next);
        FocusChange {
            lost: Some(current),
            gained: next,
        }
    }

    /// Visible window with the highest priority that has held focus before
    fn successor(windows: &WindowManager, exclude: impl Fn(&Window) -> bool) -> Option<WindowId> {
        windows
            .iter()
            .filter(|w| !exclude(*w) && w.is_visible() && w.focus_priority > 0)
            .max_by_key(|w| w.focus_priority)
            .map(|w| w.id)
    }
}
