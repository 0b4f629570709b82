//! Events sent from the server to clients.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::geometry::Rect;
use crate::region::Region;
use crate::wire::{push_str, read_rects, read_simple, Message, PayloadReader, ProtocolError};
use crate::{ClientId, WindowId};

bitflags! {
    /// Pointer buttons held down
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Buttons: u32 {
        const LEFT   = 1 << 0;
        const RIGHT  = 1 << 1;
        const MIDDLE = 1 << 2;
    }
}

bitflags! {
    /// Keyboard modifiers active for a key event
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Modifiers: u32 {
        const SHIFT   = 1 << 0;
        const CONTROL = 1 << 1;
        const ALT     = 1 << 2;
        const META    = 1 << 3;
    }
}

/// What happened to a property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyState {
    New = 0,
    Changed = 1,
    Deleted = 2,
}

/// Wire tags for [`Event`]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTag {
    Connected = 1,
    MaxWindowRect = 2,
    Mouse = 3,
    Focus = 4,
    Key = 5,
    RegionModified = 6,
    Creation = 7,
    PropertyNotify = 8,
    PropertyReply = 9,
    SelectionClear = 10,
    SelectionRequest = 11,
    SelectionNotify = 12,
    ImEvent = 13,
    ImQuery = 14,
    ChannelMessage = 15,
}

impl EventTag {
    pub fn from_u32(tag: u32) -> Option<Self> {
        use EventTag::*;
        Some(match tag {
            1 => Connected,
            2 => MaxWindowRect,
            3 => Mouse,
            4 => Focus,
            5 => Key,
            6 => RegionModified,
            7 => Creation,
            8 => PropertyNotify,
            9 => PropertyReply,
            10 => SelectionClear,
            11 => SelectionRequest,
            12 => SelectionNotify,
            13 => ImEvent,
            14 => ImQuery,
            15 => ChannelMessage,
            _ => return None,
        })
    }
}

/// A server event
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected {
        client_id: ClientId,
        version: u32,
    },
    MaxWindowRect {
        rect: Rect,
    },
    Mouse {
        window: WindowId,
        x: i32,
        y: i32,
        buttons: Buttons,
        wheel: i32,
        time: u32,
    },
    Focus {
        window: WindowId,
        gained: bool,
    },
    Key {
        window: WindowId,
        unicode: u32,
        keycode: u32,
        modifiers: Modifiers,
        pressed: bool,
        repeat: bool,
    },
    /// `ack` is set when this answers the client's own region change
    RegionModified {
        window: WindowId,
        ack: bool,
        region: Region,
    },
    /// Window ids `first_id .. first_id + count` now belong to the client
    Creation {
        first_id: WindowId,
        count: u32,
    },
    PropertyNotify {
        window: WindowId,
        property: u32,
        state: PropertyState,
    },
    /// `data` is `None` when the property does not exist
    PropertyReply {
        window: WindowId,
        property: u32,
        data: Option<Vec<u8>>,
    },
    SelectionClear {
        window: WindowId,
    },
    SelectionRequest {
        owner: WindowId,
        requestor: WindowId,
        property: u32,
        mime_type: u32,
    },
    SelectionNotify {
        requestor: WindowId,
        property: u32,
        converted: bool,
    },
    ImEvent {
        window: WindowId,
        preedit: String,
        commit: String,
        cursor: i32,
    },
    ImQuery {
        window: WindowId,
        property: u32,
    },
    ChannelMessage {
        channel: String,
        message: String,
        data: Vec<u8>,
    },
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ConnectedData {
    client_id: i32,
    version: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MouseData {
    window: u32,
    x: i32,
    y: i32,
    buttons: u32,
    wheel: i32,
    time: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct WindowValueData {
    window: u32,
    value: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct KeyData {
    window: u32,
    unicode: u32,
    keycode: u32,
    modifiers: u32,
    pressed: u32,
    repeat: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PropertyData {
    window: u32,
    property: u32,
    state: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SelectionRequestData {
    owner: u32,
    requestor: u32,
    property: u32,
    mime_type: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ImEventData {
    window: u32,
    preedit_len: u32,
    commit_len: u32,
    cursor: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ChannelData {
    channel_len: u32,
    message_len: u32,
}

fn body<T: Pod>(simple: T, payload: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
    (bytemuck::bytes_of(&simple).to_vec(), payload)
}

impl Event {
    pub fn kind(&self) -> EventTag {
        match self {
            Event::Connected { .. } => EventTag::Connected,
            Event::MaxWindowRect { .. } => EventTag::MaxWindowRect,
            Event::Mouse { .. } => EventTag::Mouse,
            Event::Focus { .. } => EventTag::Focus,
            Event::Key { .. } => EventTag::Key,
            Event::RegionModified { .. } => EventTag::RegionModified,
            Event::Creation { .. } => EventTag::Creation,
            Event::PropertyNotify { .. } => EventTag::PropertyNotify,
            Event::PropertyReply { .. } => EventTag::PropertyReply,
            Event::SelectionClear { .. } => EventTag::SelectionClear,
            Event::SelectionRequest { .. } => EventTag::SelectionRequest,
            Event::SelectionNotify { .. } => EventTag::SelectionNotify,
            Event::ImEvent { .. } => EventTag::ImEvent,
            Event::ImQuery { .. } => EventTag::ImQuery,
            Event::ChannelMessage { .. } => EventTag::ChannelMessage,
        }
    }
}

impl Message for Event {
    fn tag(&self) -> u32 {
        self.kind() as u32
    }

    fn simple_size(tag: u32) -> Option<usize> {
        use std::mem::size_of;
        Some(match EventTag::from_u32(tag)? {
            EventTag::Connected => size_of::<ConnectedData>(),
            EventTag::MaxWindowRect => size_of::<Rect>(),
            EventTag::Mouse => size_of::<MouseData>(),
            EventTag::Focus
            | EventTag::RegionModified
            | EventTag::Creation
            | EventTag::SelectionClear
            | EventTag::ImQuery => size_of::<WindowValueData>(),
            EventTag::Key => size_of::<KeyData>(),
            EventTag::PropertyNotify | EventTag::PropertyReply | EventTag::SelectionNotify => {
                size_of::<PropertyData>()
            }
            EventTag::SelectionRequest => size_of::<SelectionRequestData>(),
            EventTag::ImEvent => size_of::<ImEventData>(),
            EventTag::ChannelMessage => size_of::<ChannelData>(),
        })
    }

    fn encode_body(&self) -> (Vec<u8>, Vec<u8>) {
        match self {
            Event::Connected { client_id, version } => body(
                ConnectedData {
                    client_id: *client_id,
                    version: *version,
                },
                Vec::new(),
            ),
            Event::MaxWindowRect { rect } => body(*rect, Vec::new()),
            Event::Mouse {
                window,
                x,
                y,
                buttons,
                wheel,
                time,
            } => body(
                MouseData {
                    window: *window,
                    x: *x,
                    y: *y,
                    buttons: buttons.bits(),
                    wheel: *wheel,
                    time: *time,
                },
                Vec::new(),
            ),
            Event::Focus { window, gained } => body(
                WindowValueData {
                    window: *window,
                    value: *gained as u32,
                },
                Vec::new(),
            ),
            Event::Key {
                window,
                unicode,
                keycode,
                modifiers,
                pressed,
                repeat,
            } => body(
                KeyData {
                    window: *window,
                    unicode: *unicode,
                    keycode: *keycode,
                    modifiers: modifiers.bits(),
                    pressed: *pressed as u32,
                    repeat: *repeat as u32,
                },
                Vec::new(),
            ),
            Event::RegionModified {
                window,
                ack,
                region,
            } => body(
                WindowValueData {
                    window: *window,
                    value: *ack as u32,
                },
                bytemuck::cast_slice(region.rects()).to_vec(),
            ),
            Event::Creation { first_id, count } => body(
                WindowValueData {
                    window: *first_id,
                    value: *count,
                },
                Vec::new(),
            ),
            Event::PropertyNotify {
                window,
                property,
                state,
            } => body(
                PropertyData {
                    window: *window,
                    property: *property,
                    state: *state as u32,
                },
                Vec::new(),
            ),
            Event::PropertyReply {
                window,
                property,
                data,
            } => body(
                PropertyData {
                    window: *window,
                    property: *property,
                    state: data.is_some() as u32,
                },
                data.clone().unwrap_or_default(),
            ),
            Event::SelectionClear { window } => body(
                WindowValueData {
                    window: *window,
                    value: 0,
                },
                Vec::new(),
            ),
            Event::SelectionRequest {
                owner,
                requestor,
                property,
                mime_type,
            } => body(
                SelectionRequestData {
                    owner: *owner,
                    requestor: *requestor,
                    property: *property,
                    mime_type: *mime_type,
                },
                Vec::new(),
            ),
            Event::SelectionNotify {
                requestor,
                property,
                converted,
            } => body(
                PropertyData {
                    window: *requestor,
                    property: *property,
                    state: *converted as u32,
                },
                Vec::new(),
            ),
            Event::ImEvent {
                window,
                preedit,
                commit,
                cursor,
            } => {
                let mut payload = Vec::new();
                let preedit_len = push_str(&mut payload, preedit);
                let commit_len = push_str(&mut payload, commit);
                body(
                    ImEventData {
                        window: *window,
                        preedit_len,
                        commit_len,
                        cursor: *cursor,
                    },
                    payload,
                )
            }
            Event::ImQuery { window, property } => body(
                WindowValueData {
                    window: *window,
                    value: *property,
                },
                Vec::new(),
            ),
            Event::ChannelMessage {
                channel,
                message,
                data,
            } => {
                let mut payload = Vec::new();
                let channel_len = push_str(&mut payload, channel);
                let message_len = push_str(&mut payload, message);
                payload.extend_from_slice(data);
                body(
                    ChannelData {
                        channel_len,
                        message_len,
                    },
                    payload,
                )
            }
        }
    }

    fn decode_body(tag: u32, simple: &[u8], payload: &[u8]) -> Result<Self, ProtocolError> {
        let kind = EventTag::from_u32(tag).ok_or(ProtocolError::UnknownTag(tag))?;
        let mut reader = PayloadReader::new(tag, payload);
        let event = match kind {
            EventTag::Connected => {
                let d: ConnectedData = read_simple(tag, simple)?;
                Event::Connected {
                    client_id: d.client_id,
                    version: d.version,
                }
            }
            EventTag::MaxWindowRect => Event::MaxWindowRect {
                rect: read_simple(tag, simple)?,
            },
            EventTag::Mouse => {
                let d: MouseData = read_simple(tag, simple)?;
                Event::Mouse {
                    window: d.window,
                    x: d.x,
                    y: d.y,
                    buttons: Buttons::from_bits_truncate(d.buttons),
                    wheel: d.wheel,
                    time: d.time,
                }
            }
            EventTag::Focus => {
                let d: WindowValueData = read_simple(tag, simple)?;
                Event::Focus {
                    window: d.window,
                    gained: d.value != 0,
                }
            }
            EventTag::Key => {
                let d: KeyData = read_simple(tag, simple)?;
                Event::Key {
                    window: d.window,
                    unicode: d.unicode,
                    keycode: d.keycode,
                    modifiers: Modifiers::from_bits_truncate(d.modifiers),
                    pressed: d.pressed != 0,
                    repeat: d.repeat != 0,
                }
            }
            EventTag::RegionModified => {
                let d: WindowValueData = read_simple(tag, simple)?;
                Event::RegionModified {
                    window: d.window,
                    ack: d.value != 0,
                    region: Region::from_rects(&read_rects(tag, payload)?),
                }
            }
            EventTag::Creation => {
                let d: WindowValueData = read_simple(tag, simple)?;
                Event::Creation {
                    first_id: d.window,
                    count: d.value,
                }
            }
            EventTag::PropertyNotify => {
                let d: PropertyData = read_simple(tag, simple)?;
                let state = match d.state {
                    0 => PropertyState::New,
                    1 => PropertyState::Changed,
                    2 => PropertyState::Deleted,
                    _ => {
                        return Err(ProtocolError::Malformed {
                            tag,
                            reason: "unknown property state",
                        });
                    }
                };
                Event::PropertyNotify {
                    window: d.window,
                    property: d.property,
                    state,
                }
            }
            EventTag::PropertyReply => {
                let d: PropertyData = read_simple(tag, simple)?;
                Event::PropertyReply {
                    window: d.window,
                    property: d.property,
                    data: (d.state != 0).then(|| payload.to_vec()),
                }
            }
            EventTag::SelectionClear => {
                let d: WindowValueData = read_simple(tag, simple)?;
                Event::SelectionClear { window: d.window }
            }
            EventTag::SelectionRequest => {
                let d: SelectionRequestData = read_simple(tag, simple)?;
                Event::SelectionRequest {
                    owner: d.owner,
                    requestor: d.requestor,
                    property: d.property,
                    mime_type: d.mime_type,
                }
            }
            EventTag::SelectionNotify => {
                let d: PropertyData = read_simple(tag, simple)?;
                Event::SelectionNotify {
                    requestor: d.window,
                    property: d.property,
                    converted: d.state != 0,
                }
            }
            EventTag::ImEvent => {
                let d: ImEventData = read_simple(tag, simple)?;
                Event::ImEvent {
                    window: d.window,
                    preedit: reader.string(d.preedit_len)?,
                    commit: reader.string(d.commit_len)?,
                    cursor: d.cursor,
                }
            }
            EventTag::ImQuery => {
                let d: WindowValueData = read_simple(tag, simple)?;
                Event::ImQuery {
                    window: d.window,
                    property: d.value,
                }
            }
            EventTag::ChannelMessage => {
                let d: ChannelData = read_simple(tag, simple)?;
                Event::ChannelMessage {
                    channel: reader.string(d.channel_len)?,
                    message: reader.string(d.message_len)?,
                    data: reader.remaining().to_vec(),
                }
            }
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{encode_frame, FrameDecoder, DEFAULT_MAX_PAYLOAD};

    #[test]
    fn test_roundtrip_region_modified() {
        let event = Event::RegionModified {
            window: 9,
            ack: true,
            region: Region::from_rect(Rect::new(0, 0, 100, 100)),
        };
        let mut decoder = FrameDecoder::<Event>::new(DEFAULT_MAX_PAYLOAD);
        decoder.feed(&encode_frame(&event));
        assert_eq!(decoder.next_message().unwrap(), Some(event));
    }

    #[test]
    fn test_property_reply_distinguishes_absent_from_empty() {
        for data in [None, Some(Vec::new()), Some(b"abc".to_vec())] {
            let event = Event::PropertyReply {
                window: 1,
                property: 2,
                data: data.clone(),
            };
            let mut decoder = FrameDecoder::<Event>::new(DEFAULT_MAX_PAYLOAD);
            decoder.feed(&encode_frame(&event));
            match decoder.next_message().unwrap() {
                Some(Event::PropertyReply { data: decoded, .. }) => assert_eq!(decoded, data),
                other => panic!("Wrong event type: {:?}", other),
            }
        }
    }
}
