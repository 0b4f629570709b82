//! Tessera wire protocol
//!
//! Shared types for communication between the `tessera` display server and
//! its clients: geometry and region algebra, the tagged command/event
//! framing, shared-memory pixel buffers, and an async client connection.

pub mod client;
pub mod command;
pub mod event;
pub mod geometry;
pub mod region;
pub mod shm;
pub mod wire;

pub use command::{Altitude, Command, CommandTag, PropertyMode};
pub use event::{Buttons, Event, EventTag, Modifiers, PropertyState};
pub use geometry::{Point, Rect, COORD_LIMIT};
pub use region::Region;
pub use wire::{encode_frame, FrameDecoder, Message, ProtocolError, DEFAULT_MAX_PAYLOAD};

/// Server-wide window identifier
pub type WindowId = u32;

/// Connection identifier; [`SERVER_CLIENT_ID`] is the in-process pseudo-client
pub type ClientId = i32;

/// The server's own in-process client
pub const SERVER_CLIENT_ID: ClientId = -1;

/// Protocol revision announced in `Connected`
pub const PROTOCOL_VERSION: u32 = 1;

/// Socket path for client connections
pub fn socket_path() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("TESSERA_SOCKET") {
        return std::path::PathBuf::from(path);
    }
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));
    std::path::PathBuf::from(runtime_dir).join("tessera.sock")
}
