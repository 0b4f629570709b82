//! Server Module
//!
//! The display server proper. Commands from every client go through one
//! FIFO and run in arrival order; input samples and timer expiries are
//! handled on the same task, so the registry, the compositor and the
//! router are never touched concurrently.

pub mod channels;
pub mod client;
mod dispatch;
pub mod id_pool;
pub mod ipc;
pub mod screensaver;
pub mod selection;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::process::Stdio;
use std::time::Instant;

use tessera_proto::{
    Buttons, ClientId, Command, Event, Point, ProtocolError, Rect, Region, WindowId,
    PROTOCOL_VERSION, SERVER_CLIENT_ID,
};
use tracing::{debug, info, warn};

use crate::compositor::cursor::{CursorManager, CursorRef};
use crate::compositor::screen::Screen;
use crate::compositor::{full_screen, CompositeReport, Compositor};
use crate::config::Config;
use crate::error::{Result, ServerError};
use crate::input::{Delivery, InputMethod, InputRouter, RawInput};
use crate::shared::{BackingStoreManager, LocalBuffer};
use crate::wm::{Damage, FocusChange, PropertyStore, WindowManager};
use channels::ChannelRegistry;
use client::{ClientConnection, EventSink};
use id_pool::IdPool;
use screensaver::{IdleLevel, Screensaver};
use selection::SelectionManager;

/// Things the server reports to whoever embeds it
#[derive(Debug, Clone, PartialEq)]
pub enum ServerNotice {
    ClientConnected(ClientId),
    ClientDisconnected(ClientId),
    WindowCreated { window: WindowId, owner: ClientId },
    WindowDestroyed { window: WindowId, owner: ClientId },
    WindowRaised { window: WindowId },
    WindowLowered { window: WindowId },
    WindowGeometry { window: WindowId, region: Region },
    WindowOpacity { window: WindowId, opacity: u8 },
    FocusChanged { window: Option<WindowId> },
    Mouse {
        window: WindowId,
        position: Point,
        buttons: Buttons,
    },
    Key {
        window: WindowId,
        keycode: u32,
        pressed: bool,
    },
    /// Screen area flushed by one compositing pass
    Damage { region: Region },
}

/// Display server state
pub struct DisplayServer {
    config: Config,
    windows: WindowManager,
    stores: BackingStoreManager,
    compositor: Compositor,
    cursor: CursorManager,
    screen: Box<dyn Screen>,
    input: InputRouter,
    properties: PropertyStore,
    selection: SelectionManager,
    channels: ChannelRegistry,
    clients: BTreeMap<ClientId, ClientConnection>,
    /// Commands waiting to run, in arrival order
    queue: VecDeque<(ClientId, Command)>,
    ids: IdPool,
    screensaver: Screensaver,
    notices: VecDeque<ServerNotice>,
    /// In-process clients count down from here; socket clients count up from 1
    next_local_id: ClientId,
    started: Instant,
    last_report: CompositeReport,
    /// Screen area skipped because a backing store was being painted
    deferred: Region,
    /// Clients to drop once the current operation is done
    doomed: BTreeSet<ClientId>,
}

impl DisplayServer {
    /// Create a new display server drawing onto `screen`
    pub fn new(config: Config, screen: Box<dyn Screen>) -> Self {
        let now = Instant::now();
        let mut clients = BTreeMap::new();
        let mut server_client =
            ClientConnection::new(SERVER_CLIENT_ID, EventSink::Local(VecDeque::new()));
        server_client.name = "server".to_string();
        server_client.pid = std::process::id();
        clients.insert(SERVER_CLIENT_ID, server_client);

        Self {
            compositor: Compositor::new(
                config.compositor.background,
                config.compositor.software_cursor,
            ),
            ids: IdPool::new(config.server.id_limit),
            screensaver: Screensaver::new(&config.screensaver, now),
            windows: WindowManager::new(),
            stores: BackingStoreManager::new(),
            cursor: CursorManager::new(),
            screen,
            input: InputRouter::new(),
            properties: PropertyStore::new(),
            selection: SelectionManager::new(),
            channels: ChannelRegistry::new(),
            clients,
            queue: VecDeque::new(),
            notices: VecDeque::new(),
            next_local_id: SERVER_CLIENT_ID - 1,
            started: now,
            last_report: CompositeReport::default(),
            deferred: Region::new(),
            doomed: BTreeSet::new(),
            config,
        }
    }

    /// Paint the initial screen
    pub fn start(&mut self) {
        let rect = self.screen.rect();
        info!("Display server started ({}x{})", rect.width, rect.height);
        let damage = full_screen(self.screen.as_ref());
        self.repaint(&damage);
    }

    /// Disconnect every client, the server's own windows included
    pub fn shutdown(&mut self) {
        info!("Display server shutting down");
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in ids {
            self.disconnect_client(id);
        }
        self.queue.clear();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn windows(&self) -> &WindowManager {
        &self.windows
    }

    pub fn input(&self) -> &InputRouter {
        &self.input
    }

    pub fn cursor(&self) -> &CursorManager {
        &self.cursor
    }

    pub fn screen(&self) -> &dyn Screen {
        self.screen.as_ref()
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// Report of the most recent compositing pass that painted anything
    pub fn last_report(&self) -> &CompositeReport {
        &self.last_report
    }

    pub fn client(&self, id: ClientId) -> Option<&ClientConnection> {
        self.clients.get(&id)
    }

    pub fn is_connected(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Largest rectangle a window may cover
    pub fn max_window_rect(&self) -> Rect {
        self.screen.rect()
    }

    /// Register a connection and send it the greeting
    pub fn connect_client(&mut self, id: ClientId, sink: EventSink) {
        let mut client = ClientConnection::new(id, sink);
        client.send(Event::Connected {
            client_id: id,
            version: PROTOCOL_VERSION,
        });
        client.send(Event::MaxWindowRect {
            rect: self.max_window_rect(),
        });
        if let Some((first_id, count)) = self.ids.allocate(self.config.server.initial_ids) {
            client.reserve(first_id, count);
            client.send(Event::Creation { first_id, count });
        }
        self.clients.insert(id, client);
        info!("Client {} connected", id);
        self.notices.push_back(ServerNotice::ClientConnected(id));
    }

    /// Connect an in-process client whose events are kept in memory
    pub fn connect_local(&mut self) -> ClientId {
        let id = self.next_local_id;
        self.next_local_id -= 1;
        self.connect_client(id, EventSink::Local(VecDeque::new()));
        id
    }

    /// Events queued for an in-process client
    pub fn take_events(&mut self, client: ClientId) -> Vec<Event> {
        self.clients
            .get_mut(&client)
            .map(ClientConnection::take_events)
            .unwrap_or_default()
    }

    pub fn take_notices(&mut self) -> Vec<ServerNotice> {
        self.notices.drain(..).collect()
    }

    /// Append a command to the FIFO
    pub fn queue_command(&mut self, client: ClientId, command: Command) {
        self.queue.push_back((client, command));
    }

    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Run every queued command in arrival order
    pub fn dispatch_pending(&mut self) {
        self.reap_clients();
        while let Some((client, command)) = self.queue.pop_front() {
            if !self.clients.contains_key(&client) {
                debug!("Dropping {:?} from departed client {}", command.kind(), client);
                continue;
            }
            let kind = command.kind();
            if let Err(e) = self.dispatch(client, command) {
                if e.disconnects_client() {
                    warn!("Client {} failed {:?}: {}, disconnecting", client, kind, e);
                    self.disconnect_client(client);
                } else {
                    warn!("Rejected {:?} from client {}: {}", kind, client, e);
                }
            }
            self.reap_clients();
        }
    }

    /// Whether some screen area still waits for a busy backing store
    pub fn has_deferred_damage(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Retry the areas earlier passes skipped
    pub fn repaint_deferred(&mut self) {
        let region = std::mem::take(&mut self.deferred);
        self.repaint(&Damage::full(region));
        self.reap_clients();
    }

    /// Drop clients whose backing store turned out to be unreadable
    fn reap_clients(&mut self) {
        while let Some(client) = self.doomed.pop_first() {
            self.disconnect_client(client);
        }
    }

    /// A client's byte stream could not be decoded
    pub fn protocol_error(&mut self, client: ClientId, error: ProtocolError) {
        warn!("Protocol error from client {}: {}", client, error);
        self.disconnect_client(client);
    }

    /// Tear down a client: grabs and focus first, then its windows, then
    /// everything else scoped to it
    pub fn disconnect_client(&mut self, id: ClientId) {
        let Some(client) = self.clients.remove(&id) else {
            return;
        };
        info!(
            "Client {} ({}) disconnected, {} ids unused",
            id,
            if client.name.is_empty() { "unnamed" } else { client.name.as_str() },
            client.reserved()
        );
        drop(client);

        let change = self.input.release_client(&self.windows, id);
        self.send_focus(change);
        for window in self.windows.windows_of(id) {
            self.destroy_window(window);
        }
        if self.cursor.drop_client(id) {
            self.update_cursor();
        }
        self.channels.drop_client(id);
        self.selection.drop_client(id);
        self.queue.retain(|(client, _)| *client != id);
        self.notices.push_back(ServerNotice::ClientDisconnected(id));
    }

    /// Route one input sample.
    ///
    /// Input that wakes a blanked screen is consumed by the wake-up.
    pub fn handle_input(&mut self, input: RawInput) {
        self.route_input(input);
        self.reap_clients();
    }

    fn route_input(&mut self, input: RawInput) {
        if self.screensaver.activity(Instant::now()) {
            self.compositor.resume();
            let damage = full_screen(self.screen.as_ref());
            self.repaint(&damage);
            return;
        }
        match input {
            RawInput::PointerMotion {
                dx,
                dy,
                buttons,
                wheel,
            } => {
                let at = self.input.position();
                let to = Point::new(at.x.saturating_add(dx), at.y.saturating_add(dy));
                self.pointer_to(to, buttons, wheel);
            }
            RawInput::Pointer {
                x,
                y,
                buttons,
                wheel,
            } => self.pointer_to(Point::new(x, y), buttons, wheel),
            RawInput::Key(key) => {
                if let Some(delivery) = self.input.key(&self.windows, key) {
                    if let Event::Key {
                        window, keycode, pressed, ..
                    } = delivery.event
                    {
                        self.notices.push_back(ServerNotice::Key {
                            window,
                            keycode,
                            pressed,
                        });
                    }
                    self.deliver(delivery);
                }
            }
        }
    }

    /// When the screensaver wants to be woken next
    pub fn screensaver_deadline(&self) -> Option<Instant> {
        self.screensaver.deadline()
    }

    pub fn screensaver_tick(&mut self, now: Instant) {
        if let Some(IdleLevel::Blanked) = self.screensaver.expire(now) {
            self.compositor.suspend(self.screen.as_mut());
        }
    }

    /// Create a window backed by a server-owned buffer for an in-process client
    pub fn create_local_window(
        &mut self,
        owner: ClientId,
        region: Region,
        buffer: LocalBuffer,
    ) -> Result<WindowId> {
        if !self.clients.contains_key(&owner) {
            return Err(ServerError::UnknownClient(owner));
        }
        let (window, _) = self.ids.allocate(1).ok_or(ServerError::IdPoolExhausted)?;
        self.windows.create_window(window, owner);
        self.stores.attach_local(window, buffer);
        self.notices
            .push_back(ServerNotice::WindowCreated { window, owner });
        let region = region.intersect_rect(self.max_window_rect());
        let damage = self.windows.set_region(window, region.clone());
        self.notices
            .push_back(ServerNotice::WindowGeometry { window, region });
        self.restacked(&damage);
        Ok(window)
    }

    /// Draw into a server-owned buffer and show the result
    pub fn paint_local(
        &mut self,
        window: WindowId,
        paint: impl FnOnce(&mut LocalBuffer),
    ) -> Result<()> {
        let buffer = self
            .stores
            .local_mut(window)
            .ok_or(ServerError::UnknownWindow(window))?;
        paint(buffer);
        let index = self
            .windows
            .index_of(window)
            .ok_or(ServerError::UnknownWindow(window))?;
        if let Some(w) = self.windows.get(window) {
            let damage = Damage::new(w.requested.clone(), index);
            self.repaint(&damage);
        }
        Ok(())
    }

    /// Restrict pointer input to the windows of `window`'s owner
    pub fn set_modal(&mut self, window: Option<WindowId>) {
        self.input.set_modal(window);
        self.input.refresh_pointer_window(&self.windows);
        self.update_cursor();
    }

    pub fn install_input_method(&mut self, method: Option<Box<dyn InputMethod>>) {
        self.input.install_input_method(method);
    }

    pub fn push_override_cursor(&mut self, cursor: CursorRef) {
        self.cursor.push_override(cursor);
        self.update_cursor();
    }

    pub fn pop_override_cursor(&mut self) {
        self.cursor.pop_override();
        self.update_cursor();
    }

    /// Milliseconds since the server started, wrapping
    fn timestamp(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    fn pointer_to(&mut self, position: Point, buttons: Buttons, wheel: i32) {
        let screen = self.screen.rect();
        let position = Point::new(
            position.x.clamp(screen.x, screen.right() - 1),
            position.y.clamp(screen.y, screen.bottom() - 1),
        );
        let time = self.timestamp();
        let delivery = self
            .input
            .pointer(&self.windows, position, buttons, wheel, time);
        let moved = self.cursor.move_to(position);
        self.repaint(&Damage::full(moved));
        self.update_cursor();

        if let Some(delivery) = delivery {
            if let Event::Mouse { window, .. } = delivery.event {
                self.notices.push_back(ServerNotice::Mouse {
                    window,
                    position,
                    buttons,
                });
            }
            self.deliver(delivery);
        }
    }

    /// Recomposite `damage` and record what was flushed
    fn repaint(&mut self, damage: &Damage) {
        if damage.is_empty() {
            return;
        }
        let report = self.compositor.composite(
            damage,
            &self.windows,
            &self.stores,
            &self.cursor,
            self.screen.as_mut(),
        );
        if !report.deferred.is_empty() {
            self.deferred = self.deferred.union(&report.deferred);
        }
        for &window in &report.unreadable {
            self.stores.mark_unreadable(window);
            if let Some(owner) = self.owner_of(window) {
                warn!(
                    "Backing store of window {} is unreadable, dropping client {}",
                    window, owner
                );
                self.doomed.insert(owner);
            }
        }
        if !report.damaged.is_empty() {
            self.notices.push_back(ServerNotice::Damage {
                region: report.damaged.clone(),
            });
            self.last_report = report;
        }
    }

    /// Repaint after the stack or a region changed, then refresh what lies
    /// under the pointer
    fn restacked(&mut self, damage: &Damage) {
        self.repaint(damage);
        self.input.refresh_pointer_window(&self.windows);
        self.update_cursor();
    }

    /// Show the cursor the override stack or the window under the pointer asks for
    fn update_cursor(&mut self) {
        let under = self.input.cursor_under_pointer(&self.windows);
        let wanted = self.cursor.resolve(under);
        if let Some(area) = self.cursor.set_current(wanted) {
            debug!("Cursor changed to {:?}", wanted);
            self.repaint(&Damage::full(area));
        }
    }

    /// Remove a window and everything attached to it
    fn destroy_window(&mut self, window: WindowId) {
        let Some((gone, damage)) = self.windows.destroy_window(window) else {
            return;
        };
        self.stores.detach(window);
        self.properties.drop_window(window);
        self.selection.window_gone(window);
        let change = self.input.window_gone(&self.windows, window);
        self.send_focus_from(change, Some((window, gone.owner)));
        self.restacked(&damage);
        self.notices.push_back(ServerNotice::WindowDestroyed {
            window,
            owner: gone.owner,
        });
    }

    fn owner_of(&self, window: WindowId) -> Option<ClientId> {
        self.windows.get(window).map(|w| w.owner)
    }

    fn send(&mut self, client: ClientId, event: Event) {
        if let Some(connection) = self.clients.get_mut(&client) {
            if !connection.send(event) {
                debug!("Client {} writer is gone, dropping event", client);
            }
        }
    }

    fn deliver(&mut self, delivery: Delivery) {
        self.send(delivery.client, delivery.event);
    }

    fn send_focus(&mut self, change: FocusChange) {
        self.send_focus_from(change, None);
    }

    /// Send focus events; `gone` names a window already removed from the
    /// registry together with its owner
    fn send_focus_from(&mut self, change: FocusChange, gone: Option<(WindowId, ClientId)>) {
        if change.is_empty() {
            return;
        }
        if let Some(lost) = change.lost {
            let owner = match gone {
                Some((window, owner)) if window == lost => Some(owner),
                _ => self.owner_of(lost),
            };
            if let Some(owner) = owner {
                self.send(
                    owner,
                    Event::Focus {
                        window: lost,
                        gained: false,
                    },
                );
            }
        }
        if let Some(gained) = change.gained {
            if let Some(owner) = self.owner_of(gained) {
                self.send(
                    owner,
                    Event::Focus {
                        window: gained,
                        gained: true,
                    },
                );
            }
        }
        self.notices.push_back(ServerNotice::FocusChanged {
            window: self.input.focused(),
        });
    }

    fn play_sound(&self, file: &str) {
        let Some(player) = self.config.sound.player.as_deref() else {
            debug!("No sound player configured, ignoring {}", file);
            return;
        };
        info!("Playing sound: {}", file);
        if let Err(e) = std::process::Command::new(player)
            .arg(file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
        {
            warn!("Failed to start sound player {}: {}", player, e);
        }
    }
}
