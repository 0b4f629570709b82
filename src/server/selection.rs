//! Selection ownership

use tessera_proto::{ClientId, WindowId};

/// Current selection owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionOwner {
    pub window: WindowId,
    pub client: ClientId,
    pub time: u32,
}

#[derive(Debug, Default)]
pub struct SelectionManager {
    owner: Option<SelectionOwner>,
}

impl SelectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self) -> Option<SelectionOwner> {
        self.owner
    }

    /// Take ownership, returning the previous owner if it was another window
    pub fn set_owner(
        &mut self,
        window: WindowId,
        client: ClientId,
        time: u32,
    ) -> Option<SelectionOwner> {
        let previous = self.owner.replace(SelectionOwner {
            window,
            client,
            time,
        });
        previous.filter(|p| p.window != window)
    }

    pub fn window_gone(&mut self, window: WindowId) {
        if self.owner.is_some_and(|o| o.window == window) {
            self.owner = None;
        }
    }

    pub fn drop_client(&mut self, client: ClientId) {
        if self.owner.is_some_and(|o| o.client == client) {
            self.owner = None;
        }
    }
}
