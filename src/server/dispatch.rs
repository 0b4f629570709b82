//! Command dispatch
//!
//! One handler per command. Handlers validate ownership first, mutate the
//! registry, recomposite what changed and answer the client.

use tessera_proto::{
    Altitude, ClientId, Command, CommandTag, Event, Point, ProtocolError, Region, WindowId,
};
use tracing::{debug, info, warn};

use super::{DisplayServer, ServerNotice};
use crate::compositor::cursor::{CursorImage, CursorRef};
use crate::error::{Result, ServerError};
use crate::wm::Damage;

impl DisplayServer {
    /// Execute one command from `client`
    pub(super) fn dispatch(&mut self, client: ClientId, command: Command) -> Result<()> {
        debug!("Client {} -> {:?}", client, command.kind());
        match command {
            Command::Identify { name, pid } => {
                let connection = self
                    .clients
                    .get_mut(&client)
                    .ok_or(ServerError::UnknownClient(client))?;
                info!("Client {} is {} (pid {})", client, name, pid);
                connection.name = name;
                connection.pid = pid;
            }
            Command::Create { count } => self.grant_ids(client, count)?,
            Command::RegionName {
                window,
                name,
                caption,
            } => {
                self.check_owner(client, window)?;
                if let Some(w) = self.windows.get_mut(window) {
                    w.name = name;
                    w.caption = caption;
                }
            }
            Command::Region {
                window,
                shm_key,
                width,
                height,
                opaque,
                region,
            } => self.set_region(client, window, shm_key, width, height, opaque, region)?,
            Command::RegionMove { window, dx, dy } => {
                self.check_owner(client, window)?;
                let damage = self.windows.move_region(window, dx, dy).ok_or(
                    ProtocolError::Malformed {
                        tag: CommandTag::RegionMove as u32,
                        reason: "move leaves the coordinate range",
                    },
                )?;
                self.restacked(&damage);
                let region = self
                    .windows
                    .get(window)
                    .map(|w| w.requested.clone())
                    .unwrap_or_default();
                self.notices.push_back(ServerNotice::WindowGeometry {
                    window,
                    region: region.clone(),
                });
                self.send(
                    client,
                    Event::RegionModified {
                        window,
                        ack: true,
                        region,
                    },
                );
            }
            Command::RegionDestroy { window } => {
                self.check_owner(client, window)?;
                self.destroy_window(window);
            }
            Command::ChangeAltitude {
                window,
                altitude,
                fixed,
            } => {
                self.check_owner(client, window)?;
                let tier =
                    Altitude::from_raw(altitude).ok_or(ServerError::InvalidAltitude(altitude))?;
                let damage = self.windows.set_altitude(window, tier, fixed);
                self.restacked(&damage);
                self.notices.push_back(match tier {
                    Altitude::Lower => ServerNotice::WindowLowered { window },
                    Altitude::Raise | Altitude::StaysOnTop => ServerNotice::WindowRaised { window },
                });
            }
            Command::SetOpacity { window, opacity } => {
                self.check_owner(client, window)?;
                let damage = self.windows.set_opacity(window, opacity);
                self.restacked(&damage);
                self.notices
                    .push_back(ServerNotice::WindowOpacity { window, opacity });
            }
            Command::RequestFocus { window, gain } => {
                self.check_owner(client, window)?;
                let change = if gain {
                    self.input.set_focus(&mut self.windows, window)
                } else {
                    self.input.release_focus(&self.windows, window)
                };
                self.send_focus(change);
            }
            Command::GrabMouse { window, grab } => {
                self.check_owner(client, window)?;
                self.input.grab_mouse(window, grab);
            }
            Command::GrabKeyboard { window, grab } => {
                self.check_owner(client, window)?;
                self.input.grab_keyboard(window, grab);
            }
            Command::DefineCursor {
                id,
                hot_x,
                hot_y,
                width,
                height,
                pixels,
            } => {
                let before = self.cursor.rect();
                let image = CursorImage {
                    width,
                    height,
                    hot_x,
                    hot_y,
                    pixels,
                };
                if !self.cursor.define(client, id, image) {
                    warn!("Client {} tried to redefine built-in cursor {}", client, id);
                } else if self.cursor.current() == CursorRef::for_window(client, id) {
                    let area = Region::from_rect(before).union(&Region::from_rect(self.cursor.rect()));
                    self.repaint(&Damage::full(area));
                }
            }
            Command::SelectCursor { window, id } => {
                self.check_owner(client, window)?;
                if let Some(w) = self.windows.get_mut(window) {
                    w.cursor = id;
                }
                self.update_cursor();
            }
            Command::PositionCursor { x, y } => {
                let buttons = self.input.buttons();
                self.pointer_to(Point::new(x, y), buttons, 0);
            }
            Command::SetSelectionOwner { window, time } => {
                self.check_owner(client, window)?;
                if let Some(previous) = self.selection.set_owner(window, client, time) {
                    self.send(
                        previous.client,
                        Event::SelectionClear {
                            window: previous.window,
                        },
                    );
                }
            }
            Command::ConvertSelection {
                requestor,
                property,
                mime_type,
            } => {
                self.check_owner(client, requestor)?;
                // The owner answers by setting `property` on the requestor
                match self.selection.owner() {
                    Some(owner) => self.send(
                        owner.client,
                        Event::SelectionRequest {
                            owner: owner.window,
                            requestor,
                            property,
                            mime_type,
                        },
                    ),
                    None => self.send(
                        client,
                        Event::SelectionNotify {
                            requestor,
                            property,
                            converted: false,
                        },
                    ),
                }
            }
            Command::PlaySound { file } => self.play_sound(&file),
            Command::RegisterChannel { channel } => {
                debug!("Client {} subscribed to {}", client, channel);
                self.channels.register(&channel, client);
            }
            Command::Send {
                channel,
                message,
                data,
            } => {
                for subscriber in self.channels.subscribers(&channel) {
                    self.send(
                        subscriber,
                        Event::ChannelMessage {
                            channel: channel.clone(),
                            message: message.clone(),
                            data: data.clone(),
                        },
                    );
                }
            }
            Command::AddProperty { window, property } => {
                self.check_exists(window)?;
                if let Some(state) = self.properties.add(window, property) {
                    self.notify_property(window, property, state);
                }
            }
            Command::SetProperty {
                window,
                property,
                mode,
                data,
            } => {
                self.check_exists(window)?;
                let state = self.properties.set(window, property, mode, &data);
                self.notify_property(window, property, state);
            }
            Command::RemoveProperty { window, property } => {
                self.check_exists(window)?;
                if let Some(state) = self.properties.remove(window, property) {
                    self.notify_property(window, property, state);
                }
            }
            Command::GetProperty { window, property } => {
                self.check_exists(window)?;
                let data = self.properties.get(window, property).map(<[u8]>::to_vec);
                self.send(
                    client,
                    Event::PropertyReply {
                        window,
                        property,
                        data,
                    },
                );
            }
            Command::ImResponse {
                window,
                property,
                result,
            } => {
                self.check_owner(client, window)?;
                self.input.im_response(window, property, &result);
            }
            Command::RepaintRegion { window, region } => {
                self.check_owner(client, window)?;
                let index = self
                    .windows
                    .index_of(window)
                    .ok_or(ServerError::UnknownWindow(window))?;
                if let Some(w) = self.windows.get(window) {
                    let damage = Damage::new(region.intersect(&w.requested), index);
                    self.repaint(&damage);
                }
            }
        }
        Ok(())
    }

    /// Set a window's region, creating the window on first use of a
    /// granted id. An empty region destroys the window.
    #[allow(clippy::too_many_arguments)]
    fn set_region(
        &mut self,
        client: ClientId,
        window: WindowId,
        shm_key: u32,
        width: u32,
        height: u32,
        opaque: bool,
        region: Region,
    ) -> Result<()> {
        if self.windows.contains(window) {
            self.check_owner(client, window)?;
        } else {
            let granted = self
                .clients
                .get_mut(&client)
                .is_some_and(|c| c.claim(window));
            if !granted {
                return Err(ServerError::NotOwner { client, window });
            }
            self.windows.create_window(window, client);
            info!("Client {} created window {}", client, window);
            self.notices.push_back(ServerNotice::WindowCreated {
                window,
                owner: client,
            });
        }

        let region = region.intersect_rect(self.max_window_rect());
        if region.is_empty() {
            self.destroy_window(window);
        } else {
            if let Err(e) = self.stores.attach(window, shm_key, width, height) {
                warn!("Window {} left without backing store: {}", window, e);
            }
            let opaque_damage = self.windows.set_opaque(window, opaque);
            let mut damage = self.windows.set_region(window, region.clone());
            damage.region = damage.region.union(&opaque_damage.region);
            self.restacked(&damage);
            self.notices.push_back(ServerNotice::WindowGeometry {
                window,
                region: region.clone(),
            });
        }
        self.send(
            client,
            Event::RegionModified {
                window,
                ack: true,
                region,
            },
        );
        Ok(())
    }

    fn grant_ids(&mut self, client: ClientId, count: u32) -> Result<()> {
        let count = count.min(self.config.server.max_ids_per_request);
        if count == 0 {
            debug!("Client {} asked for no window ids", client);
            self.send(
                client,
                Event::Creation {
                    first_id: 0,
                    count: 0,
                },
            );
            return Ok(());
        }
        match self.ids.allocate(count) {
            Some((first_id, granted)) => {
                if let Some(connection) = self.clients.get_mut(&client) {
                    connection.reserve(first_id, granted);
                }
                self.send(
                    client,
                    Event::Creation {
                        first_id,
                        count: granted,
                    },
                );
                Ok(())
            }
            None => {
                self.send(
                    client,
                    Event::Creation {
                        first_id: 0,
                        count: 0,
                    },
                );
                Err(ServerError::IdPoolExhausted)
            }
        }
    }

    fn notify_property(
        &mut self,
        window: WindowId,
        property: u32,
        state: tessera_proto::PropertyState,
    ) {
        if let Some(owner) = self.owner_of(window) {
            self.send(
                owner,
                Event::PropertyNotify {
                    window,
                    property,
                    state,
                },
            );
        }
    }

    fn check_exists(&self, window: WindowId) -> Result<()> {
        if self.windows.contains(window) {
            Ok(())
        } else {
            Err(ServerError::UnknownWindow(window))
        }
    }

    /// A window that exists but belongs to someone else is a protocol
    /// violation; one that is already gone is only rejected
    fn check_owner(&self, client: ClientId, window: WindowId) -> Result<()> {
        match self.windows.get(window) {
            Some(w) if w.owner == client => Ok(()),
            Some(_) => Err(ServerError::NotOwner { client, window }),
            None => Err(ServerError::UnknownWindow(window)),
        }
    }
}
