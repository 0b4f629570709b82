//! Application loop
//!
//! Owns the [`DisplayServer`] and feeds it from three sources: the socket
//! front end, the input device readers and the screensaver timer. After
//! every wake-up the command FIFO is drained. Screen areas skipped because
//! a client was mid-paint are retried on a short timer.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::compositor::screen::{FramebufferScreen, MemoryScreen, Screen};
use crate::config::{Config, DisplayConfig};
use crate::input::device::spawn_reader;
use crate::input::RawInput;
use crate::server::client::EventSink;
use crate::server::ipc::{ClientMessage, IpcHandle, IpcServer};
use crate::server::DisplayServer;

/// Delay before retrying areas whose backing store was busy
const DEFERRED_RETRY: Duration = Duration::from_millis(4);

/// Main application state
pub struct TesseraApp {
    server: DisplayServer,
    ipc: IpcHandle,
    input_rx: mpsc::UnboundedReceiver<RawInput>,
    readers: Vec<JoinHandle<()>>,
}

impl TesseraApp {
    /// Open the screen, bind the socket and start the input readers
    pub async fn new(config: Config, socket: PathBuf, headless: bool) -> Result<Self> {
        let screen = open_screen(&config.display, headless)?;
        let ipc = IpcServer::new(socket, config.server.max_payload)
            .start()
            .await?;

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let readers = config
            .input
            .pointer_devices
            .iter()
            .chain(config.input.keyboard_devices.iter())
            .map(|path| spawn_reader(path.clone(), config.input.pointer_speed, input_tx.clone()))
            .collect();

        let mut server = DisplayServer::new(config, screen);
        server.start();

        Ok(Self {
            server,
            ipc,
            input_rx,
            readers,
        })
    }

    /// Run until a shutdown request arrives or the socket side goes away
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        info!("Starting main event loop");
        loop {
            let deadline = self.server.screensaver_deadline();
            let deferred = self.server.has_deferred_damage();
            tokio::select! {
                message = self.ipc.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => {
                        warn!("IPC front end stopped");
                        break;
                    }
                },
                Some(input) = self.input_rx.recv() => self.server.handle_input(input),
                _ = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at.into()).await,
                        None => std::future::pending::<()>().await,
                    }
                } => self.server.screensaver_tick(std::time::Instant::now()),
                _ = tokio::time::sleep(DEFERRED_RETRY), if deferred => self.server.repaint_deferred(),
                _ = shutdown.recv() => {
                    info!("Shutdown signal received, cleaning up...");
                    break;
                }
            }
            self.server.dispatch_pending();
        }

        self.server.shutdown();
        for reader in self.readers {
            reader.abort();
        }
        Ok(())
    }

    fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Connected { client, events } => {
                self.server.connect_client(client, EventSink::Remote(events))
            }
            ClientMessage::Command { client, command } => self.server.queue_command(client, command),
            ClientMessage::Malformed { client, error } => self.server.protocol_error(client, error),
            ClientMessage::Disconnected { client } => self.server.disconnect_client(client),
        }
    }
}

/// The configured frame buffer, or an in-memory screen when headless
fn open_screen(config: &DisplayConfig, headless: bool) -> Result<Box<dyn Screen>> {
    let (width, height) = (config.width, config.height);
    match &config.framebuffer {
        Some(device) if !headless => Ok(Box::new(FramebufferScreen::open(device, width, height)?)),
        _ => {
            info!("Running headless ({}x{})", width, height);
            Ok(Box::new(MemoryScreen::new(width, height)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_screen_uses_the_configured_size() {
        let config = DisplayConfig {
            framebuffer: Some(PathBuf::from("/dev/fb-does-not-exist")),
            width: 320,
            height: 200,
        };
        let screen = open_screen(&config, true).unwrap();
        assert_eq!((screen.width(), screen.height()), (320, 200));

        assert!(open_screen(&config, false).is_err());
    }
}
