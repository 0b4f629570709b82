//! State shared between the registry and the compositor

pub mod backing_store;

pub use backing_store::{BackingStore, BackingStoreManager, LocalBuffer, PixelView, StoreError};
