//! Socket front end
//!
//! Accepts client connections on a Unix socket and turns each byte stream
//! into [`ClientMessage`]s for the server task. Every connection gets a
//! reader task (client → server) and a writer task (server → client); when
//! either ends the other is stopped and the server is told.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use nix::fcntl::{Flock, FlockArg};
use tessera_proto::{encode_frame, ClientId, Command, Event, FrameDecoder, ProtocolError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What the socket side reports to the server task
#[derive(Debug)]
pub enum ClientMessage {
    Connected {
        client: ClientId,
        events: mpsc::UnboundedSender<Event>,
    },
    Command {
        client: ClientId,
        command: Command,
    },
    /// The stream could not be decoded; the connection is already closing
    Malformed {
        client: ClientId,
        error: ProtocolError,
    },
    Disconnected {
        client: ClientId,
    },
}

/// Socket listener configuration
pub struct IpcServer {
    socket_path: PathBuf,
    max_payload: usize,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: PathBuf, max_payload: usize) -> Self {
        Self {
            socket_path,
            max_payload,
        }
    }

    /// Take the instance lock, bind the socket and spawn the acceptor
    pub async fn start(self) -> Result<IpcHandle> {
        let socket_path = self.socket_path;

        // Create parent directory if needed
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let lock_path = socket_path.with_extension("lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {:?}", lock_path))?;
        let lock = Flock::lock(lock_file, FlockArg::LockExclusiveNonblock).map_err(
            |(_, errno)| anyhow!("Another display server holds {:?}: {}", lock_path, errno),
        )?;

        // Holding the lock means any socket left behind is stale
        if socket_path.exists() {
            debug!("Removing stale socket {:?}", socket_path);
            std::fs::remove_file(&socket_path)?;
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind {:?}", socket_path))?;
        info!("IPC server listening on {:?}", socket_path);

        let (message_tx, message_rx) = mpsc::channel(256);
        let max_payload = self.max_payload;

        // Spawn acceptor task
        let acceptor = tokio::spawn(async move {
            let mut next_client: ClientId = 1;
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let client = next_client;
                        next_client += 1;
                        debug!("Accepted connection for client {}", client);
                        tokio::spawn(handle_client(
                            client,
                            stream,
                            max_payload,
                            message_tx.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
        });

        Ok(IpcHandle {
            messages: message_rx,
            socket_path,
            acceptor,
            _lock: lock,
        })
    }
}

/// Running listener; dropping it closes the socket and releases the lock
pub struct IpcHandle {
    messages: mpsc::Receiver<ClientMessage>,
    socket_path: PathBuf,
    acceptor: JoinHandle<()>,
    _lock: Flock<File>,
}

impl IpcHandle {
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        self.messages.recv().await
    }

    /// Try to receive a message (non-blocking)
    pub fn try_recv(&mut self) -> Option<ClientMessage> {
        self.messages.try_recv().ok()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for IpcHandle {
    fn drop(&mut self) {
        self.acceptor.abort();
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!("Could not remove socket {:?}: {}", self.socket_path, e);
        }
    }
}

/// Handle a connected client
async fn handle_client(
    client: ClientId,
    stream: UnixStream,
    max_payload: usize,
    message_tx: mpsc::Sender<ClientMessage>,
) {
    let (mut reader, mut writer) = stream.into_split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    if message_tx
        .send(ClientMessage::Connected {
            client,
            events: event_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    // Reader task (client → server)
    let tx = message_tx.clone();
    let mut reader_task = tokio::spawn(async move {
        let mut decoder = FrameDecoder::<Command>::new(max_payload);
        let mut buf = vec![0u8; 4096];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            decoder.feed(&buf[..n]);
            loop {
                match decoder.next_message() {
                    Ok(Some(command)) => {
                        if tx
                            .send(ClientMessage::Command { client, command })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!("Client {} sent a bad frame: {}", client, error);
                        let _ = tx.send(ClientMessage::Malformed { client, error }).await;
                        return;
                    }
                }
            }
        }
        debug!("Reader task for client {} ended", client);
    });

    // Writer task (server → client); ends when the server drops the client
    let mut writer_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if writer.write_all(&encode_frame(&event)).await.is_err() {
                break;
            }
        }
        debug!("Writer task for client {} ended", client);
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut reader_task => writer_task.abort(),
        _ = &mut writer_task => reader_task.abort(),
    }

    let _ = message_tx.send(ClientMessage::Disconnected { client }).await;
    info!("Client {} connection closed", client);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_instance_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.sock");
        let first = IpcServer::new(path.clone(), 1024).start().await.unwrap();
        assert!(path.exists());
        assert!(IpcServer::new(path.clone(), 1024).start().await.is_err());
        drop(first);
        assert!(!path.exists());
        // The lock went with the handle
        let again = IpcServer::new(path.clone(), 1024).start().await.unwrap();
        drop(again);
    }

    #[tokio::test]
    async fn commands_arrive_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.sock");
        let mut handle = IpcServer::new(path.clone(), 1024).start().await.unwrap();

        let mut stream = UnixStream::connect(&path).await.unwrap();
        let mut bytes = encode_frame(&Command::Create { count: 2 });
        bytes.extend(encode_frame(&Command::RegionDestroy { window: 4 }));
        stream.write_all(&bytes).await.unwrap();

        assert!(matches!(
            handle.recv().await,
            Some(ClientMessage::Connected { client: 1, .. })
        ));
        assert!(matches!(
            handle.recv().await,
            Some(ClientMessage::Command {
                command: Command::Create { count: 2 },
                ..
            })
        ));
        assert!(matches!(
            handle.recv().await,
            Some(ClientMessage::Command {
                command: Command::RegionDestroy { window: 4 },
                ..
            })
        ));
        drop(stream);
        assert!(matches!(
            handle.recv().await,
            Some(ClientMessage::Disconnected { client: 1 })
        ));
    }

    #[tokio::test]
    async fn garbage_is_reported_then_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tessera.sock");
        let mut handle = IpcServer::new(path.clone(), 1024).start().await.unwrap();

        let mut stream = UnixStream::connect(&path).await.unwrap();
        // Unknown tag with an empty payload
        let mut frame = 0xdead_u32.to_ne_bytes().to_vec();
        frame.extend(0u32.to_ne_bytes());
        stream.write_all(&frame).await.unwrap();

        assert!(matches!(handle.recv().await, Some(ClientMessage::Connected { .. })));
        assert!(matches!(handle.recv().await, Some(ClientMessage::Malformed { .. })));
        assert!(matches!(
            handle.recv().await,
            Some(ClientMessage::Disconnected { .. })
        ));
    }
}
