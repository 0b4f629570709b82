//! Async client connection to the display server

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::event::Event;
use crate::geometry::Rect;
use crate::region::Region;
use crate::wire::{encode_frame, FrameDecoder, DEFAULT_MAX_PAYLOAD};
use crate::{ClientId, WindowId};

/// Ids requested per `Create` when the local pool runs dry
const ID_BATCH: u32 = 16;

/// Attempts made when the server reports an exhausted id pool
const ID_RETRIES: u32 = 6;

/// A connected client
pub struct Connection {
    writer: OwnedWriteHalf,
    events: mpsc::Receiver<Event>,
    /// Events read while waiting for a specific reply
    pending: VecDeque<Event>,
    client_id: ClientId,
    max_window_rect: Rect,
    ids: VecDeque<WindowId>,
}

impl Connection {
    /// Connect and wait for the server greeting
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        info!("Connecting to display server at {:?}", socket_path);

        // Wait for socket to be available
        let mut retries = 50;
        while !socket_path.exists() && retries > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            retries -= 1;
        }

        let stream = UnixStream::connect(socket_path)
            .await
            .context("Failed to connect to display server socket")?;
        Self::from_stream(stream).await
    }

    /// Speak the protocol over an already connected stream
    pub async fn from_stream(stream: UnixStream) -> Result<Self> {
        let (mut reader, writer) = stream.into_split();
        let (event_tx, event_rx) = mpsc::channel(256);

        // Reader task (server → client)
        tokio::spawn(async move {
            let mut decoder = FrameDecoder::<Event>::new(DEFAULT_MAX_PAYLOAD);
            let mut buf = vec![0u8; 4096];
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                decoder.feed(&buf[..n]);
                loop {
                    match decoder.next_message() {
                        Ok(Some(event)) => {
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Failed to decode server event: {}", e);
                            return;
                        }
                    }
                }
            }
            debug!("Client reader task ended");
        });

        let mut conn = Self {
            writer,
            events: event_rx,
            pending: VecDeque::new(),
            client_id: 0,
            max_window_rect: Rect::default(),
            ids: VecDeque::new(),
        };

        if let Event::Connected { client_id, version } = conn
            .wait_for(|e| matches!(e, Event::Connected { .. }))
            .await?
        {
            info!("Connected as client {} (protocol {})", client_id, version);
            conn.client_id = client_id;
        }
        Ok(conn)
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Largest rectangle a window may cover, once announced
    pub fn max_window_rect(&self) -> Rect {
        self.max_window_rect
    }

    pub async fn send(&mut self, command: &Command) -> Result<()> {
        debug!("Sending command: {:?}", command.kind());
        self.writer
            .write_all(&encode_frame(command))
            .await
            .context("Failed to send command")
    }

    /// Next event, including ones stashed while waiting for replies
    pub async fn next_event(&mut self) -> Option<Event> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        let event = self.events.recv().await?;
        self.observe(&event);
        Some(event)
    }

    pub async fn identify(&mut self, name: &str) -> Result<()> {
        self.send(&Command::Identify {
            name: name.to_string(),
            pid: std::process::id(),
        })
        .await
    }

    /// Take a window id from the pre-granted pool, topping it up when empty
    pub async fn new_window_id(&mut self) -> Result<WindowId> {
        let mut backoff = Duration::from_millis(10);
        let mut attempts = 0;
        loop {
            self.absorb_pending_grants();
            if let Some(id) = self.ids.pop_front() {
                return Ok(id);
            }
            if attempts == ID_RETRIES {
                anyhow::bail!("no window ids available after {} attempts", ID_RETRIES);
            }
            attempts += 1;
            self.send(&Command::Create { count: ID_BATCH }).await?;
            if let Event::Creation { count: 0, .. } = self
                .wait_for(|e| matches!(e, Event::Creation { .. }))
                .await?
            {
                warn!("Server id pool exhausted, retrying in {:?}", backoff);
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }

    /// Change a window region and block until the server acknowledges it.
    ///
    /// Until the acknowledgement arrives the server may still be reading the
    /// backing store, so the caller must not paint into it.
    pub async fn set_region(
        &mut self,
        window: WindowId,
        shm_key: u32,
        width: u32,
        height: u32,
        opaque: bool,
        region: Region,
    ) -> Result<Region> {
        self.send(&Command::Region {
            window,
            shm_key,
            width,
            height,
            opaque,
            region,
        })
        .await?;
        self.wait_for_ack(window).await
    }

    /// Move a window region and wait for the acknowledgement
    pub async fn move_region(&mut self, window: WindowId, dx: i32, dy: i32) -> Result<Region> {
        self.send(&Command::RegionMove { window, dx, dy }).await?;
        self.wait_for_ack(window).await
    }

    async fn wait_for_ack(&mut self, window: WindowId) -> Result<Region> {
        let ack = self
            .wait_for(|e| matches!(e, Event::RegionModified { window: w, ack: true, .. } if *w == window))
            .await?;
        match ack {
            Event::RegionModified { region, .. } => Ok(region),
            other => anyhow::bail!("unexpected reply {:?}", other.kind()),
        }
    }

    /// Read events until one matches, stashing the rest in order
    async fn wait_for(&mut self, want: impl Fn(&Event) -> bool) -> Result<Event> {
        if let Some(pos) = self.pending.iter().position(&want) {
            if let Some(event) = self.pending.remove(pos) {
                return Ok(event);
            }
        }
        loop {
            let event = self
                .events
                .recv()
                .await
                .context("Display server closed the connection")?;
            self.observe(&event);
            if want(&event) {
                return Ok(event);
            }
            self.pending.push_back(event);
        }
    }

    /// Track connection-level state carried by events
    fn observe(&mut self, event: &Event) {
        match event {
            Event::MaxWindowRect { rect } => self.max_window_rect = *rect,
            Event::Creation { first_id, count } => {
                self.ids.extend(*first_id..first_id.saturating_add(*count));
            }
            _ => {}
        }
    }

    fn absorb_pending_grants(&mut self) {
        self.pending.retain(|e| !matches!(e, Event::Creation { count: 0, .. }));
    }
}
