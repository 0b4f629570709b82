//! Per-window property store

use std::collections::HashMap;

use tessera_proto::{PropertyMode, PropertyState, WindowId};

/// Byte-string properties keyed by window and property id
#[derive(Debug, Default)]
pub struct PropertyStore {
    values: HashMap<(WindowId, u32), Vec<u8>>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty property; `None` when it already exists
    pub fn add(&mut self, window: WindowId, property: u32) -> Option<PropertyState> {
        if self.values.contains_key(&(window, property)) {
            return None;
        }
        self.values.insert((window, property), Vec::new());
        Some(PropertyState::New)
    }

    pub fn set(
        &mut self,
        window: WindowId,
        property: u32,
        mode: PropertyMode,
        data: &[u8],
    ) -> PropertyState {
        match self.values.get_mut(&(window, property)) {
            None => {
                self.values.insert((window, property), data.to_vec());
                PropertyState::New
            }
            Some(value) => {
                match mode {
                    PropertyMode::Replace => *value = data.to_vec(),
                    PropertyMode::Prepend => {
                        value.splice(0..0, data.iter().copied());
                    }
                    PropertyMode::Append => value.extend_from_slice(data),
                }
                PropertyState::Changed
            }
        }
    }

    /// Delete a property; `None` when it did not exist
    pub fn remove(&mut self, window: WindowId, property: u32) -> Option<PropertyState> {
        self.values
            .remove(&(window, property))
            .map(|_| PropertyState::Deleted)
    }

    pub fn get(&self, window: WindowId, property: u32) -> Option<&[u8]> {
        self.values.get(&(window, property)).map(Vec::as_slice)
    }

    /// Drop every property of a destroyed window
    pub fn drop_window(&mut self, window: WindowId) {
        self.values.retain(|&(w, _), _| w != window);
    }
}
