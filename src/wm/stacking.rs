//! Stacking Module
//!
//! Manages window z-order. The order is kept front-to-back (index 0 is the
//! topmost window) and the stays-on-top tier is always a prefix of it.

use tessera_proto::WindowId;
use tracing::debug;

/// Stacking manager
#[derive(Debug, Default)]
pub struct StackingManager {
    /// Paint order, front to back
    order: Vec<WindowId>,
    /// Length of the stays-on-top prefix
    on_top: usize,
}

/// A window that changed position in the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restack {
    pub from: usize,
    pub to: usize,
}

impl StackingManager {
    /// Create a new stacking manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a window at the front of the normal tier
    pub fn add_window(&mut self, window: WindowId) -> usize {
        if let Some(index) = self.index_of(window) {
            return index;
        }
        self.order.insert(self.on_top, window);
        self.on_top
    }

    /// Remove a window, returning its former index
    pub fn remove_window(&mut self, window: WindowId) -> Option<usize> {
        let index = self.index_of(window)?;
        self.order.remove(index);
        if index < self.on_top {
            self.on_top -= 1;
        }
        Some(index)
    }

    /// Bring a window to the front of its tier
    pub fn raise_window(&mut self, window: WindowId) -> Option<Restack> {
        let from = self.index_of(window)?;
        let to = if from < self.on_top { 0 } else { self.on_top };
        debug!("Raising window {} from {} to {}", window, from, to);
        Some(self.shift(from, to))
    }

    /// Send a window to the back of its tier
    pub fn lower_window(&mut self, window: WindowId) -> Option<Restack> {
        let from = self.index_of(window)?;
        let to = if from < self.on_top {
            self.on_top - 1
        } else {
            self.order.len() - 1
        };
        debug!("Lowering window {} from {} to {}", window, from, to);
        Some(self.shift(from, to))
    }

    /// Move a window into (`true`) or out of the stays-on-top tier.
    ///
    /// Joining places it at the very front; leaving places it at the front
    /// of the normal tier.
    pub fn set_on_top(&mut self, window: WindowId, on_top: bool) -> Option<Restack> {
        let from = self.index_of(window)?;
        let was_on_top = from < self.on_top;
        if on_top == was_on_top {
            return Some(Restack { from, to: from });
        }
        let restack = if on_top {
            let restack = self.shift(from, 0);
            self.on_top += 1;
            restack
        } else {
            // Last slot of the prefix is the first slot of the normal tier
            // once the prefix shrinks.
            let restack = self.shift(from, self.on_top - 1);
            self.on_top -= 1;
            restack
        };
        Some(restack)
    }

    /// Leave the stays-on-top tier (if in it) and go to the very back
    pub fn send_to_bottom(&mut self, window: WindowId) -> Option<Restack> {
        let from = self.index_of(window)?;
        if from < self.on_top {
            self.on_top -= 1;
        }
        let to = self.order.len() - 1;
        Some(self.shift(from, to))
    }

    fn shift(&mut self, from: usize, to: usize) -> Restack {
        let window = self.order.remove(from);
        self.order.insert(to, window);
        Restack { from, to }
    }

    pub fn index_of(&self, window: WindowId) -> Option<usize> {
        self.order.iter().position(|&w| w == window)
    }

    pub fn is_on_top(&self, window: WindowId) -> bool {
        self.index_of(window).is_some_and(|i| i < self.on_top)
    }

    /// Get stacking order (front to back)
    pub fn order(&self) -> &[WindowId] {
        &self.order
    }

    pub fn on_top_count(&self) -> usize {
        self.on_top
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(ids: &[WindowId]) -> StackingManager {
        let mut s = StackingManager::new();
        // add_window puts each new window in front
        for &id in ids.iter().rev() {
            s.add_window(id);
        }
        s
    }

    #[test]
    fn new_windows_go_below_the_on_top_tier() {
        let mut s = stack(&[1, 2, 3]);
        s.set_on_top(3, true);
        assert_eq!(s.order(), &[3, 1, 2]);
        assert_eq!(s.add_window(4), 1);
        assert_eq!(s.order(), &[3, 4, 1, 2]);
    }

    #[test]
    fn raise_and_lower_stay_in_tier() {
        let mut s = stack(&[1, 2, 3, 4]);
        s.set_on_top(4, true);
        s.set_on_top(3, true);
        assert_eq!(s.order(), &[3, 4, 1, 2]);

        assert_eq!(s.raise_window(2), Some(Restack { from: 3, to: 2 }));
        assert_eq!(s.order(), &[3, 4, 2, 1]);

        assert_eq!(s.lower_window(3), Some(Restack { from: 0, to: 1 }));
        assert_eq!(s.order(), &[4, 3, 2, 1]);
        assert_eq!(s.on_top_count(), 2);
    }

    #[test]
    fn leaving_the_tier_lands_at_front_of_normal() {
        let mut s = stack(&[1, 2, 3]);
        s.set_on_top(2, true);
        s.set_on_top(3, true);
        assert_eq!(s.order(), &[3, 2, 1]);
        assert_eq!(s.set_on_top(3, false), Some(Restack { from: 0, to: 1 }));
        assert_eq!(s.order(), &[2, 3, 1]);
        assert_eq!(s.on_top_count(), 1);
    }

    #[test]
    fn remove_adjusts_prefix() {
        let mut s = stack(&[1, 2, 3]);
        s.set_on_top(1, true);
        assert_eq!(s.remove_window(1), Some(0));
        assert_eq!(s.on_top_count(), 0);
        assert_eq!(s.remove_window(1), None);
    }

    #[test]
    fn send_to_bottom_clears_tier() {
        let mut s = stack(&[1, 2, 3]);
        s.set_on_top(2, true);
        assert_eq!(s.send_to_bottom(2), Some(Restack { from: 0, to: 2 }));
        assert_eq!(s.order(), &[1, 3, 2]);
        assert_eq!(s.on_top_count(), 0);
    }
}
