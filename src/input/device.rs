//! Linux evdev input devices
//!
//! Each configured device gets a reader task that decodes `struct
//! input_event` records and posts [`RawInput`] samples to the server.
//! Pointer changes are accumulated until `SYN_REPORT`; keys are posted as
//! they arrive.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use tessera_proto::{Buttons, Modifiers};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{KeyInput, RawInput};

const EV_SYN: u16 = 0x00;
const EV_KEY: u16 = 0x01;
const EV_REL: u16 = 0x02;
const EV_ABS: u16 = 0x03;

const SYN_REPORT: u16 = 0;

const REL_X: u16 = 0x00;
const REL_Y: u16 = 0x01;
const REL_WHEEL: u16 = 0x08;

const ABS_X: u16 = 0x00;
const ABS_Y: u16 = 0x01;

const BTN_LEFT: u16 = 0x110;
const BTN_RIGHT: u16 = 0x111;
const BTN_MIDDLE: u16 = 0x112;

const KEY_LEFTCTRL: u16 = 29;
const KEY_LEFTSHIFT: u16 = 42;
const KEY_RIGHTSHIFT: u16 = 54;
const KEY_LEFTALT: u16 = 56;
const KEY_RIGHTCTRL: u16 = 97;
const KEY_RIGHTALT: u16 = 100;
const KEY_LEFTMETA: u16 = 125;
const KEY_RIGHTMETA: u16 = 126;

/// `struct input_event` on 64-bit Linux
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct InputEvent {
    pub tv_sec: i64,
    pub tv_usec: i64,
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl InputEvent {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(kind: u16, code: u16, value: i32) -> Self {
        Self {
            kind,
            code,
            value,
            ..Self::default()
        }
    }
}

/// US layout: (key code, plain, shifted)
const US_KEYMAP: &[(u16, char, char)] = &[
    (1, '\u{1b}', '\u{1b}'),
    (2, '1', '!'),
    (3, '2', '@'),
    (4, '3', '#'),
    (5, '4', '$'),
    (6, '5', '%'),
    (7, '6', '^'),
    (8, '7', '&'),
    (9, '8', '*'),
    (10, '9', '('),
    (11, '0', ')'),
    (12, '-', '_'),
    (13, '=', '+'),
    (14, '\u{8}', '\u{8}'),
    (15, '\t', '\t'),
    (16, 'q', 'Q'),
    (17, 'w', 'W'),
    (18, 'e', 'E'),
    (19, 'r', 'R'),
    (20, 't', 'T'),
    (21, 'y', 'Y'),
    (22, 'u', 'U'),
    (23, 'i', 'I'),
    (24, 'o', 'O'),
    (25, 'p', 'P'),
    (26, '[', '{'),
    (27, ']', '}'),
    (28, '\r', '\r'),
    (30, 'a', 'A'),
    (31, 's', 'S'),
    (32, 'd', 'D'),
    (33, 'f', 'F'),
    (34, 'g', 'G'),
    (35, 'h', 'H'),
    (36, 'j', 'J'),
    (37, 'k', 'K'),
    (38, 'l', 'L'),
    (39, ';', ':'),
    (40, '\'', '"'),
    (41, '`', '~'),
    (43, '\\', '|'),
    (44, 'z', 'Z'),
    (45, 'x', 'X'),
    (46, 'c', 'C'),
    (47, 'v', 'V'),
    (48, 'b', 'B'),
    (49, 'n', 'N'),
    (50, 'm', 'M'),
    (51, ',', '<'),
    (52, '.', '>'),
    (53, '/', '?'),
    (57, ' ', ' '),
];

/// Unicode for a key code under the US layout; 0 when the key has no text
pub fn keymap(code: u16, shift: bool) -> u32 {
    US_KEYMAP
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|&(_, plain, shifted)| (if shift { shifted } else { plain }) as u32)
        .unwrap_or(0)
}

/// Turns evdev records into [`RawInput`] samples
#[derive(Debug)]
pub struct EventDecoder {
    speed: f32,
    dx: i32,
    dy: i32,
    wheel: i32,
    abs_x: Option<i32>,
    abs_y: Option<i32>,
    buttons: Buttons,
    modifiers: Modifiers,
    pointer_dirty: bool,
}

impl EventDecoder {
    pub fn new(speed: f32) -> Self {
        Self {
            speed,
            dx: 0,
            dy: 0,
            wheel: 0,
            abs_x: None,
            abs_y: None,
            buttons: Buttons::empty(),
            modifiers: Modifiers::empty(),
            pointer_dirty: false,
        }
    }

    pub fn feed(&mut self, event: InputEvent) -> Option<RawInput> {
        match (event.kind, event.code) {
            (EV_REL, REL_X) => self.dx = self.dx.saturating_add(event.value),
            (EV_REL, REL_Y) => self.dy = self.dy.saturating_add(event.value),
            (EV_REL, REL_WHEEL) => self.wheel = self.wheel.saturating_add(event.value),
            (EV_ABS, ABS_X) => self.abs_x = Some(event.value),
            (EV_ABS, ABS_Y) => self.abs_y = Some(event.value),
            (EV_KEY, code @ (BTN_LEFT | BTN_RIGHT | BTN_MIDDLE)) => {
                let button = match code {
                    BTN_LEFT => Buttons::LEFT,
                    BTN_RIGHT => Buttons::RIGHT,
                    _ => Buttons::MIDDLE,
                };
                self.buttons.set(button, event.value != 0);
            }
            (EV_KEY, code) => return Some(self.key(code, event.value)),
            (EV_SYN, SYN_REPORT) => return self.report(),
            _ => return None,
        }
        self.pointer_dirty = true;
        None
    }

    fn key(&mut self, code: u16, value: i32) -> RawInput {
        let modifier = match code {
            KEY_LEFTSHIFT | KEY_RIGHTSHIFT => Modifiers::SHIFT,
            KEY_LEFTCTRL | KEY_RIGHTCTRL => Modifiers::CONTROL,
            KEY_LEFTALT | KEY_RIGHTALT => Modifiers::ALT,
            KEY_LEFTMETA | KEY_RIGHTMETA => Modifiers::META,
            _ => Modifiers::empty(),
        };
        if !modifier.is_empty() {
            self.modifiers.set(modifier, value != 0);
        }
        RawInput::Key(KeyInput {
            keycode: code as u32,
            unicode: keymap(code, self.modifiers.contains(Modifiers::SHIFT)),
            modifiers: self.modifiers,
            pressed: value != 0,
            repeat: value == 2,
        })
    }

    fn report(&mut self) -> Option<RawInput> {
        if !std::mem::take(&mut self.pointer_dirty) {
            return None;
        }
        let wheel = std::mem::take(&mut self.wheel);
        if let (Some(x), Some(y)) = (self.abs_x, self.abs_y) {
            return Some(RawInput::Pointer {
                x,
                y,
                buttons: self.buttons,
                wheel,
            });
        }
        let dx = std::mem::take(&mut self.dx);
        let dy = std::mem::take(&mut self.dy);
        Some(RawInput::PointerMotion {
            dx: (dx as f32 * self.speed).round() as i32,
            dy: (dy as f32 * self.speed).round() as i32,
            buttons: self.buttons,
            wheel,
        })
    }
}

/// Start a reader task for one device
pub fn spawn_reader(
    path: PathBuf,
    speed: f32,
    tx: mpsc::UnboundedSender<RawInput>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = read_device(&path, speed, &tx).await {
            warn!("Input device {:?} stopped: {:#}", path, e);
        }
    })
}

async fn read_device(
    path: &Path,
    speed: f32,
    tx: &mpsc::UnboundedSender<RawInput>,
) -> Result<()> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open input device {:?}", path))?;
    info!("Reading input device {:?}", path);

    let mut decoder = EventDecoder::new(speed);
    let mut buf = vec![0u8; InputEvent::SIZE * 64];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let n = file.read(&mut buf).await.context("Input device read failed")?;
        if n == 0 {
            debug!("Input device {:?} closed", path);
            return Ok(());
        }
        pending.extend_from_slice(&buf[..n]);
        let whole = pending.len() / InputEvent::SIZE * InputEvent::SIZE;
        for record in pending[..whole].chunks_exact(InputEvent::SIZE) {
            let event: InputEvent = bytemuck::pod_read_unaligned(record);
            if let Some(input) = decoder.feed(event) {
                if tx.send(input).is_err() {
                    return Ok(());
                }
            }
        }
        pending.drain(..whole);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layout_matches_the_kernel() {
        assert_eq!(InputEvent::SIZE, 24);
    }

    #[test]
    fn motion_is_reported_on_sync() {
        let mut decoder = EventDecoder::new(2.0);
        assert_eq!(decoder.feed(InputEvent::new(EV_REL, REL_X, 3)), None);
        assert_eq!(decoder.feed(InputEvent::new(EV_REL, REL_Y, -1)), None);
        assert_eq!(decoder.feed(InputEvent::new(EV_KEY, BTN_LEFT, 1)), None);
        assert_eq!(
            decoder.feed(InputEvent::new(EV_SYN, SYN_REPORT, 0)),
            Some(RawInput::PointerMotion {
                dx: 6,
                dy: -2,
                buttons: Buttons::LEFT,
                wheel: 0
            })
        );
        // Nothing new since the last report
        assert_eq!(decoder.feed(InputEvent::new(EV_SYN, SYN_REPORT, 0)), None);
    }

    #[test]
    fn shift_changes_the_character() {
        let mut decoder = EventDecoder::new(1.0);
        decoder.feed(InputEvent::new(EV_KEY, KEY_LEFTSHIFT, 1));
        match decoder.feed(InputEvent::new(EV_KEY, 30, 1)) {
            Some(RawInput::Key(key)) => {
                assert_eq!(key.unicode, 'A' as u32);
                assert!(key.modifiers.contains(Modifiers::SHIFT));
                assert!(key.pressed);
            }
            other => panic!("unexpected {:?}", other),
        }
        decoder.feed(InputEvent::new(EV_KEY, KEY_LEFTSHIFT, 0));
        match decoder.feed(InputEvent::new(EV_KEY, 30, 2)) {
            Some(RawInput::Key(key)) => {
                assert_eq!(key.unicode, 'a' as u32);
                assert!(key.repeat);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn absolute_devices_report_positions() {
        let mut decoder = EventDecoder::new(1.0);
        decoder.feed(InputEvent::new(EV_ABS, ABS_X, 100));
        decoder.feed(InputEvent::new(EV_ABS, ABS_Y, 40));
        assert!(matches!(
            decoder.feed(InputEvent::new(EV_SYN, SYN_REPORT, 0)),
            Some(RawInput::Pointer { x: 100, y: 40, .. })
        ));
    }

    #[test]
    fn unmapped_keys_have_no_text() {
        assert_eq!(keymap(200, false), 0);
        assert_eq!(keymap(57, true), ' ' as u32);
    }
}
