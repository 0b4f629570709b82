//! Server error taxonomy

use tessera_proto::shm::ShmError;
use tessera_proto::{ClientId, ProtocolError, WindowId};
use thiserror::Error;

/// Errors raised while executing a client command
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("client {client} does not own window {window}")]
    NotOwner { client: ClientId, window: WindowId },

    #[error("unknown window {0}")]
    UnknownWindow(WindowId),

    #[error("unknown client {0}")]
    UnknownClient(ClientId),

    #[error("invalid altitude {0}")]
    InvalidAltitude(i32),

    #[error("shared memory: {0}")]
    SharedMemory(#[from] ShmError),

    #[error("window id pool exhausted")]
    IdPoolExhausted,
}

impl ServerError {
    /// Whether the offending connection must be dropped.
    ///
    /// Malformed streams and references to windows the client does not own
    /// disconnect it; everything else is rejected or degraded in place.
    pub fn disconnects_client(&self) -> bool {
        matches!(self, ServerError::Protocol(_) | ServerError::NotOwner { .. })
    }
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;
