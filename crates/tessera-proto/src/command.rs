//! Commands sent from clients to the server.

use bytemuck::{Pod, Zeroable};

use crate::region::Region;
use crate::wire::{push_str, read_rects, read_simple, Message, PayloadReader, ProtocolError};
use crate::WindowId;

/// Largest cursor image side accepted from a client
pub const MAX_CURSOR_SIZE: u32 = 256;

/// Wire tags for [`Command`]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTag {
    Identify = 1,
    Create = 2,
    RegionName = 3,
    Region = 4,
    RegionMove = 5,
    RegionDestroy = 6,
    ChangeAltitude = 7,
    SetOpacity = 8,
    RequestFocus = 9,
    GrabMouse = 10,
    GrabKeyboard = 11,
    DefineCursor = 12,
    SelectCursor = 13,
    PositionCursor = 14,
    SetSelectionOwner = 15,
    ConvertSelection = 16,
    PlaySound = 17,
    RegisterChannel = 18,
    Send = 19,
    AddProperty = 20,
    SetProperty = 21,
    RemoveProperty = 22,
    GetProperty = 23,
    ImResponse = 24,
    RepaintRegion = 25,
}

impl CommandTag {
    pub fn from_u32(tag: u32) -> Option<Self> {
        use CommandTag::*;
        Some(match tag {
            1 => Identify,
            2 => Create,
            3 => RegionName,
            4 => Region,
            5 => RegionMove,
            6 => RegionDestroy,
            7 => ChangeAltitude,
            8 => SetOpacity,
            9 => RequestFocus,
            10 => GrabMouse,
            11 => GrabKeyboard,
            12 => DefineCursor,
            13 => SelectCursor,
            14 => PositionCursor,
            15 => SetSelectionOwner,
            16 => ConvertSelection,
            17 => PlaySound,
            18 => RegisterChannel,
            19 => Send,
            20 => AddProperty,
            21 => SetProperty,
            22 => RemoveProperty,
            23 => GetProperty,
            24 => ImResponse,
            25 => RepaintRegion,
            _ => return None,
        })
    }
}

/// Stacking tier requested through `ChangeAltitude`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Altitude {
    /// Send the window to the back of its tier
    Lower,
    /// Bring the window to the front of its tier
    Raise,
    /// Bring the window to the front; with `fixed` it joins the stays-on-top tier
    StaysOnTop,
}

impl Altitude {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            -1 => Some(Self::Lower),
            0 => Some(Self::Raise),
            1 => Some(Self::StaysOnTop),
            _ => None,
        }
    }

    pub fn to_raw(self) -> i32 {
        match self {
            Self::Lower => -1,
            Self::Raise => 0,
            Self::StaysOnTop => 1,
        }
    }
}

/// How `SetProperty` combines new data with the stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyMode {
    Replace = 0,
    Prepend = 1,
    Append = 2,
}

impl PropertyMode {
    fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Replace),
            1 => Some(Self::Prepend),
            2 => Some(Self::Append),
            _ => None,
        }
    }
}

/// A decoded client command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Identify {
        name: String,
        pid: u32,
    },
    /// Ask for `count` more window ids
    Create {
        count: u32,
    },
    RegionName {
        window: WindowId,
        name: String,
        caption: String,
    },
    /// Set the requested region; `shm_key == 0` means no backing store.
    /// Opaque windows occlude what lies below and ignore per-pixel alpha.
    Region {
        window: WindowId,
        shm_key: u32,
        width: u32,
        height: u32,
        opaque: bool,
        region: Region,
    },
    RegionMove {
        window: WindowId,
        dx: i32,
        dy: i32,
    },
    RegionDestroy {
        window: WindowId,
    },
    /// `altitude` is kept raw so the server can reject unknown tiers
    ChangeAltitude {
        window: WindowId,
        altitude: i32,
        fixed: bool,
    },
    SetOpacity {
        window: WindowId,
        opacity: u8,
    },
    RequestFocus {
        window: WindowId,
        gain: bool,
    },
    GrabMouse {
        window: WindowId,
        grab: bool,
    },
    GrabKeyboard {
        window: WindowId,
        grab: bool,
    },
    /// ARGB cursor image, row-major, `width * height` pixels
    DefineCursor {
        id: u32,
        hot_x: i32,
        hot_y: i32,
        width: u32,
        height: u32,
        pixels: Vec<u32>,
    },
    SelectCursor {
        window: WindowId,
        id: u32,
    },
    PositionCursor {
        x: i32,
        y: i32,
    },
    SetSelectionOwner {
        window: WindowId,
        time: u32,
    },
    ConvertSelection {
        requestor: WindowId,
        property: u32,
        mime_type: u32,
    },
    PlaySound {
        file: String,
    },
    RegisterChannel {
        channel: String,
    },
    Send {
        channel: String,
        message: String,
        data: Vec<u8>,
    },
    AddProperty {
        window: WindowId,
        property: u32,
    },
    SetProperty {
        window: WindowId,
        property: u32,
        mode: PropertyMode,
        data: Vec<u8>,
    },
    RemoveProperty {
        window: WindowId,
        property: u32,
    },
    GetProperty {
        window: WindowId,
        property: u32,
    },
    ImResponse {
        window: WindowId,
        property: u32,
        result: String,
    },
    /// The client painted into its backing store; recomposite `region`
    RepaintRegion {
        window: WindowId,
        region: Region,
    },
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct IdentifyData {
    pid: u32,
    name_len: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CountData {
    count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct WindowData {
    window: u32,
}

/// Window plus one scalar argument (flag, opacity, cursor id, ...)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct WindowValueData {
    window: u32,
    value: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RegionNameData {
    window: u32,
    name_len: u32,
    caption_len: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct RegionData {
    window: u32,
    shm_key: u32,
    width: u32,
    height: u32,
    opaque: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MoveData {
    window: u32,
    dx: i32,
    dy: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct AltitudeData {
    window: u32,
    altitude: i32,
    fixed: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DefineCursorData {
    id: u32,
    hot_x: i32,
    hot_y: i32,
    width: u32,
    height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PointData {
    x: i32,
    y: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ConvertSelectionData {
    requestor: u32,
    property: u32,
    mime_type: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SendData {
    channel_len: u32,
    message_len: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SetPropertyData {
    window: u32,
    property: u32,
    mode: u32,
}

fn body<T: Pod>(simple: T, payload: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
    (bytemuck::bytes_of(&simple).to_vec(), payload)
}

fn rect_payload(region: &Region) -> Vec<u8> {
    bytemuck::cast_slice(region.rects()).to_vec()
}

impl Command {
    pub fn kind(&self) -> CommandTag {
        match self {
            Command::Identify { .. } => CommandTag::Identify,
            Command::Create { .. } => CommandTag::Create,
            Command::RegionName { .. } => CommandTag::RegionName,
            Command::Region { .. } => CommandTag::Region,
            Command::RegionMove { .. } => CommandTag::RegionMove,
            Command::RegionDestroy { .. } => CommandTag::RegionDestroy,
            Command::ChangeAltitude { .. } => CommandTag::ChangeAltitude,
            Command::SetOpacity { .. } => CommandTag::SetOpacity,
            Command::RequestFocus { .. } => CommandTag::RequestFocus,
            Command::GrabMouse { .. } => CommandTag::GrabMouse,
            Command::GrabKeyboard { .. } => CommandTag::GrabKeyboard,
            Command::DefineCursor { .. } => CommandTag::DefineCursor,
            Command::SelectCursor { .. } => CommandTag::SelectCursor,
            Command::PositionCursor { .. } => CommandTag::PositionCursor,
            Command::SetSelectionOwner { .. } => CommandTag::SetSelectionOwner,
            Command::ConvertSelection { .. } => CommandTag::ConvertSelection,
            Command::PlaySound { .. } => CommandTag::PlaySound,
            Command::RegisterChannel { .. } => CommandTag::RegisterChannel,
            Command::Send { .. } => CommandTag::Send,
            Command::AddProperty { .. } => CommandTag::AddProperty,
            Command::SetProperty { .. } => CommandTag::SetProperty,
            Command::RemoveProperty { .. } => CommandTag::RemoveProperty,
            Command::GetProperty { .. } => CommandTag::GetProperty,
            Command::ImResponse { .. } => CommandTag::ImResponse,
            Command::RepaintRegion { .. } => CommandTag::RepaintRegion,
        }
    }

    /// Window the command acts on, if any
    pub fn window(&self) -> Option<WindowId> {
        match self {
            Command::RegionName { window, .. }
            | Command::Region { window, .. }
            | Command::RegionMove { window, .. }
            | Command::RegionDestroy { window }
            | Command::ChangeAltitude { window, .. }
            | Command::SetOpacity { window, .. }
            | Command::RequestFocus { window, .. }
            | Command::GrabMouse { window, .. }
            | Command::GrabKeyboard { window, .. }
            | Command::SelectCursor { window, .. }
            | Command::SetSelectionOwner { window, .. }
            | Command::AddProperty { window, .. }
            | Command::SetProperty { window, .. }
            | Command::RemoveProperty { window, .. }
            | Command::GetProperty { window, .. }
            | Command::ImResponse { window, .. }
            | Command::RepaintRegion { window, .. } => Some(*window),
            Command::ConvertSelection { requestor, .. } => Some(*requestor),
            _ => None,
        }
    }
}

impl Message for Command {
    fn tag(&self) -> u32 {
        self.kind() as u32
    }

    fn simple_size(tag: u32) -> Option<usize> {
        use std::mem::size_of;
        let kind = CommandTag::from_u32(tag)?;
        Some(match kind {
            CommandTag::Identify => size_of::<IdentifyData>(),
            CommandTag::Create => size_of::<CountData>(),
            CommandTag::RegionName => size_of::<RegionNameData>(),
            CommandTag::Region => size_of::<RegionData>(),
            CommandTag::RegionMove => size_of::<MoveData>(),
            CommandTag::RegionDestroy | CommandTag::RepaintRegion => size_of::<WindowData>(),
            CommandTag::ChangeAltitude => size_of::<AltitudeData>(),
            CommandTag::SetOpacity
            | CommandTag::RequestFocus
            | CommandTag::GrabMouse
            | CommandTag::GrabKeyboard
            | CommandTag::SelectCursor
            | CommandTag::SetSelectionOwner
            | CommandTag::AddProperty
            | CommandTag::RemoveProperty
            | CommandTag::GetProperty
            | CommandTag::ImResponse => size_of::<WindowValueData>(),
            CommandTag::DefineCursor => size_of::<DefineCursorData>(),
            CommandTag::PositionCursor => size_of::<PointData>(),
            CommandTag::ConvertSelection => size_of::<ConvertSelectionData>(),
            CommandTag::PlaySound | CommandTag::RegisterChannel => 0,
            CommandTag::Send => size_of::<SendData>(),
            CommandTag::SetProperty => size_of::<SetPropertyData>(),
        })
    }

    fn encode_body(&self) -> (Vec<u8>, Vec<u8>) {
        match self {
            Command::Identify { name, pid } => {
                let mut payload = Vec::new();
                let name_len = push_str(&mut payload, name);
                body(IdentifyData { pid: *pid, name_len }, payload)
            }
            Command::Create { count } => body(CountData { count: *count }, Vec::new()),
            Command::RegionName {
                window,
                name,
                caption,
            } => {
                let mut payload = Vec::new();
                let name_len = push_str(&mut payload, name);
                let caption_len = push_str(&mut payload, caption);
                body(
                    RegionNameData {
                        window: *window,
                        name_len,
                        caption_len,
                    },
                    payload,
                )
            }
            Command::Region {
                window,
                shm_key,
                width,
                height,
                opaque,
                region,
            } => body(
                RegionData {
                    window: *window,
                    shm_key: *shm_key,
                    width: *width,
                    height: *height,
                    opaque: *opaque as u32,
                },
                rect_payload(region),
            ),
            Command::RegionMove { window, dx, dy } => body(
                MoveData {
                    window: *window,
                    dx: *dx,
                    dy: *dy,
                },
                Vec::new(),
            ),
            Command::RegionDestroy { window } => body(WindowData { window: *window }, Vec::new()),
            Command::ChangeAltitude {
                window,
                altitude,
                fixed,
            } => body(
                AltitudeData {
                    window: *window,
                    altitude: *altitude,
                    fixed: *fixed as u32,
                },
                Vec::new(),
            ),
            Command::SetOpacity { window, opacity } => value(*window, *opacity as u32),
            Command::RequestFocus { window, gain } => value(*window, *gain as u32),
            Command::GrabMouse { window, grab } => value(*window, *grab as u32),
            Command::GrabKeyboard { window, grab } => value(*window, *grab as u32),
            Command::DefineCursor {
                id,
                hot_x,
                hot_y,
                width,
                height,
                pixels,
            } => body(
                DefineCursorData {
                    id: *id,
                    hot_x: *hot_x,
                    hot_y: *hot_y,
                    width: *width,
                    height: *height,
                },
                bytemuck::cast_slice(pixels).to_vec(),
            ),
            Command::SelectCursor { window, id } => value(*window, *id),
            Command::PositionCursor { x, y } => body(PointData { x: *x, y: *y }, Vec::new()),
            Command::SetSelectionOwner { window, time } => value(*window, *time),
            Command::ConvertSelection {
                requestor,
                property,
                mime_type,
            } => body(
                ConvertSelectionData {
                    requestor: *requestor,
                    property: *property,
                    mime_type: *mime_type,
                },
                Vec::new(),
            ),
            Command::PlaySound { file } => (Vec::new(), file.as_bytes().to_vec()),
            Command::RegisterChannel { channel } => (Vec::new(), channel.as_bytes().to_vec()),
            Command::Send {
                channel,
                message,
                data,
            } => {
                let mut payload = Vec::new();
                let channel_len = push_str(&mut payload, channel);
                let message_len = push_str(&mut payload, message);
                payload.extend_from_slice(data);
                body(
                    SendData {
                        channel_len,
                        message_len,
                    },
                    payload,
                )
            }
            Command::AddProperty { window, property } => value(*window, *property),
            Command::SetProperty {
                window,
                property,
                mode,
                data,
            } => body(
                SetPropertyData {
                    window: *window,
                    property: *property,
                    mode: *mode as u32,
                },
                data.clone(),
            ),
            Command::RemoveProperty { window, property } => value(*window, *property),
            Command::GetProperty { window, property } => value(*window, *property),
            Command::ImResponse {
                window,
                property,
                result,
            } => body(
                WindowValueData {
                    window: *window,
                    value: *property,
                },
                result.as_bytes().to_vec(),
            ),
            Command::RepaintRegion { window, region } => {
                body(WindowData { window: *window }, rect_payload(region))
            }
        }
    }

    fn decode_body(tag: u32, simple: &[u8], payload: &[u8]) -> Result<Self, ProtocolError> {
        let kind = CommandTag::from_u32(tag).ok_or(ProtocolError::UnknownTag(tag))?;
        let mut reader = PayloadReader::new(tag, payload);
        let cmd = match kind {
            CommandTag::Identify => {
                let d: IdentifyData = read_simple(tag, simple)?;
                Command::Identify {
                    name: reader.string(d.name_len)?,
                    pid: d.pid,
                }
            }
            CommandTag::Create => {
                let d: CountData = read_simple(tag, simple)?;
                Command::Create { count: d.count }
            }
            CommandTag::RegionName => {
                let d: RegionNameData = read_simple(tag, simple)?;
                Command::RegionName {
                    window: d.window,
                    name: reader.string(d.name_len)?,
                    caption: reader.string(d.caption_len)?,
                }
            }
            CommandTag::Region => {
                let d: RegionData = read_simple(tag, simple)?;
                Command::Region {
                    window: d.window,
                    shm_key: d.shm_key,
                    width: d.width,
                    height: d.height,
                    opaque: d.opaque != 0,
                    region: Region::from_rects(&read_rects(tag, payload)?),
                }
            }
            CommandTag::RegionMove => {
                let d: MoveData = read_simple(tag, simple)?;
                Command::RegionMove {
                    window: d.window,
                    dx: d.dx,
                    dy: d.dy,
                }
            }
            CommandTag::RegionDestroy => {
                let d: WindowData = read_simple(tag, simple)?;
                Command::RegionDestroy { window: d.window }
            }
            CommandTag::ChangeAltitude => {
                let d: AltitudeData = read_simple(tag, simple)?;
                Command::ChangeAltitude {
                    window: d.window,
                    altitude: d.altitude,
                    fixed: d.fixed != 0,
                }
            }
            CommandTag::SetOpacity => {
                let d: WindowValueData = read_simple(tag, simple)?;
                Command::SetOpacity {
                    window: d.window,
                    opacity: d.value.min(255) as u8,
                }
            }
            CommandTag::RequestFocus => {
                let d: WindowValueData = read_simple(tag, simple)?;
                Command::RequestFocus {
                    window: d.window,
                    gain: d.value != 0,
                }
            }
            CommandTag::GrabMouse => {
                let d: WindowValueData = read_simple(tag, simple)?;
                Command::GrabMouse {
                    window: d.window,
                    grab: d.value != 0,
                }
            }
            CommandTag::GrabKeyboard => {
                let d: WindowValueData = read_simple(tag, simple)?;
                Command::GrabKeyboard {
                    window: d.window,
                    grab: d.value != 0,
                }
            }
            CommandTag::DefineCursor => {
                let d: DefineCursorData = read_simple(tag, simple)?;
                if d.width > MAX_CURSOR_SIZE || d.height > MAX_CURSOR_SIZE {
                    return Err(ProtocolError::Malformed {
                        tag,
                        reason: "cursor image is too large",
                    });
                }
                let inside = |hot: i32, extent: u32| hot >= 0 && (hot as u32) < extent.max(1);
                if !inside(d.hot_x, d.width) || !inside(d.hot_y, d.height) {
                    return Err(ProtocolError::Malformed {
                        tag,
                        reason: "cursor hotspot lies outside the image",
                    });
                }
                let expected = d.width as usize * d.height as usize * 4;
                if payload.len() != expected {
                    return Err(ProtocolError::Malformed {
                        tag,
                        reason: "cursor image size does not match its dimensions",
                    });
                }
                Command::DefineCursor {
                    id: d.id,
                    hot_x: d.hot_x,
                    hot_y: d.hot_y,
                    width: d.width,
                    height: d.height,
                    pixels: payload
                        .chunks_exact(4)
                        .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                        .collect(),
                }
            }
            CommandTag::SelectCursor => {
                let d: WindowValueData = read_simple(tag, simple)?;
                Command::SelectCursor {
                    window: d.window,
                    id: d.value,
                }
            }
            CommandTag::PositionCursor => {
                let d: PointData = read_simple(tag, simple)?;
                Command::PositionCursor { x: d.x, y: d.y }
            }
            CommandTag::SetSelectionOwner => {
                let d: WindowValueData = read_simple(tag, simple)?;
                Command::SetSelectionOwner {
                    window: d.window,
                    time: d.value,
                }
            }
            CommandTag::ConvertSelection => {
                let d: ConvertSelectionData = read_simple(tag, simple)?;
                Command::ConvertSelection {
                    requestor: d.requestor,
                    property: d.property,
                    mime_type: d.mime_type,
                }
            }
            CommandTag::PlaySound => Command::PlaySound {
                file: reader.string(payload.len() as u32)?,
            },
            CommandTag::RegisterChannel => Command::RegisterChannel {
                channel: reader.string(payload.len() as u32)?,
            },
            CommandTag::Send => {
                let d: SendData = read_simple(tag, simple)?;
                Command::Send {
                    channel: reader.string(d.channel_len)?,
                    message: reader.string(d.message_len)?,
                    data: reader.remaining().to_vec(),
                }
            }
            CommandTag::AddProperty => {
                let d: WindowValueData = read_simple(tag, simple)?;
                Command::AddProperty {
                    window: d.window,
                    property: d.value,
                }
            }
            CommandTag::SetProperty => {
                let d: SetPropertyData = read_simple(tag, simple)?;
                let mode = PropertyMode::from_u32(d.mode).ok_or(ProtocolError::Malformed {
                    tag,
                    reason: "unknown property mode",
                })?;
                Command::SetProperty {
                    window: d.window,
                    property: d.property,
                    mode,
                    data: payload.to_vec(),
                }
            }
            CommandTag::RemoveProperty => {
                let d: WindowValueData = read_simple(tag, simple)?;
                Command::RemoveProperty {
                    window: d.window,
                    property: d.value,
                }
            }
            CommandTag::GetProperty => {
                let d: WindowValueData = read_simple(tag, simple)?;
                Command::GetProperty {
                    window: d.window,
                    property: d.value,
                }
            }
            CommandTag::ImResponse => {
                let d: WindowValueData = read_simple(tag, simple)?;
                Command::ImResponse {
                    window: d.window,
                    property: d.value,
                    result: reader.string(payload.len() as u32)?,
                }
            }
            CommandTag::RepaintRegion => {
                let d: WindowData = read_simple(tag, simple)?;
                Command::RepaintRegion {
                    window: d.window,
                    region: Region::from_rects(&read_rects(tag, payload)?),
                }
            }
        };
        Ok(cmd)
    }
}

fn value(window: WindowId, value: u32) -> (Vec<u8>, Vec<u8>) {
    body(WindowValueData { window, value }, Vec::new())
}
