//! Tessera
//!
//! A small display server for embedded systems: clients describe windows
//! as pixel regions backed by shared memory, and the server composites
//! them onto a linear frame buffer and routes pointer and keyboard input.

pub mod app;
pub mod compositor;
pub mod config;
pub mod error;
pub mod input;
pub mod server;
pub mod shared;
pub mod wm;

pub use config::Config;
pub use error::ServerError;
pub use server::{DisplayServer, ServerNotice};
