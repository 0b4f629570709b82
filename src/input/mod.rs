//! Input Module
//!
//! Routes pointer and key samples to windows. Routing honours, in order:
//! an explicit or implicit pointer grab, the modal window, and the window
//! under the pointer; keys go to the keyboard grabber, else the focus
//! window, after the input method has had a look.

pub mod device;
pub mod method;

use tessera_proto::{Buttons, ClientId, Event, Modifiers, Point, WindowId};
use tracing::debug;

use crate::compositor::cursor::CursorRef;
use crate::wm::{FocusChange, FocusManager, WindowManager};
pub use method::{DeadKeys, ImAction, InputMethod, KeyInput};

/// A sample from an input device, before routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawInput {
    /// Relative pointer motion
    PointerMotion {
        dx: i32,
        dy: i32,
        buttons: Buttons,
        wheel: i32,
    },
    /// Absolute pointer position
    Pointer {
        x: i32,
        y: i32,
        buttons: Buttons,
        wheel: i32,
    },
    Key(KeyInput),
}

/// An event addressed to a client
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub client: ClientId,
    pub event: Event,
}

/// Input router
pub struct InputRouter {
    mouse_grabber: Option<WindowId>,
    /// The pointer grab was taken by a button press, not a command
    implicit_grab: bool,
    keyboard_grabber: Option<WindowId>,
    focus: FocusManager,
    position: Point,
    buttons: Buttons,
    /// Window last found under the pointer
    pointer_window: Option<WindowId>,
    modal: Option<WindowId>,
    method: Option<Box<dyn InputMethod>>,
}

impl Default for InputRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl InputRouter {
    pub fn new() -> Self {
        Self {
            mouse_grabber: None,
            implicit_grab: false,
            keyboard_grabber: None,
            focus: FocusManager::new(),
            position: Point::default(),
            buttons: Buttons::empty(),
            pointer_window: None,
            modal: None,
            method: None,
        }
    }

    pub fn mouse_grabber(&self) -> Option<WindowId> {
        self.mouse_grabber
    }

    pub fn keyboard_grabber(&self) -> Option<WindowId> {
        self.keyboard_grabber
    }

    pub fn focused(&self) -> Option<WindowId> {
        self.focus.focused()
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn buttons(&self) -> Buttons {
        self.buttons
    }

    pub fn modal(&self) -> Option<WindowId> {
        self.modal
    }

    pub fn set_modal(&mut self, window: Option<WindowId>) {
        self.modal = window;
    }

    pub fn install_input_method(&mut self, method: Option<Box<dyn InputMethod>>) {
        self.method = method;
    }

    /// Route a pointer sample.
    ///
    /// The first button going down starts an implicit grab on the target
    /// unless a grab is already held; releasing every button ends it.
    pub fn pointer(
        &mut self,
        windows: &WindowManager,
        position: Point,
        buttons: Buttons,
        wheel: i32,
        time: u32,
    ) -> Option<Delivery> {
        self.position = position;
        let under = windows
            .window_at(position.x, position.y)
            .filter(|w| self.modal_allows(windows, w.owner))
            .map(|w| w.id);
        self.pointer_window = under;

        if self.buttons.is_empty() && !buttons.is_empty() && self.mouse_grabber.is_none() {
            if let Some(window) = under {
                debug!("Implicit pointer grab on window {}", window);
                self.mouse_grabber = Some(window);
                self.implicit_grab = true;
            }
        }
        self.buttons = buttons;

        let target = self.mouse_grabber.or(under);
        if self.implicit_grab && buttons.is_empty() {
            debug!("Implicit pointer grab released");
            self.mouse_grabber = None;
            self.implicit_grab = false;
        }

        let window = target?;
        let owner = windows.get(window)?.owner;
        Some(Delivery {
            client: owner,
            event: Event::Mouse {
                window,
                x: position.x,
                y: position.y,
                buttons,
                wheel,
                time,
            },
        })
    }

    /// Route a key, consulting the input method first
    pub fn key(&mut self, windows: &WindowManager, key: KeyInput) -> Option<Delivery> {
        let window = self.keyboard_grabber.or(self.focus.focused())?;
        let owner = windows.get(window)?.owner;

        let key = match self.method.as_mut().map(|m| m.filter(window, &key)) {
            None | Some(ImAction::Pass) => key,
            Some(ImAction::Swallow) => return None,
            Some(ImAction::Replace(replacement)) => replacement,
            Some(ImAction::Compose {
                preedit,
                commit,
                cursor,
            }) => {
                return Some(Delivery {
                    client: owner,
                    event: Event::ImEvent {
                        window,
                        preedit,
                        commit,
                        cursor,
                    },
                });
            }
            Some(ImAction::Query { property }) => {
                return Some(Delivery {
                    client: owner,
                    event: Event::ImQuery { window, property },
                });
            }
        };

        Some(Delivery {
            client: owner,
            event: Event::Key {
                window,
                unicode: key.unicode,
                keycode: key.keycode,
                modifiers: key.modifiers,
                pressed: key.pressed,
                repeat: key.repeat,
            },
        })
    }

    /// Forward a client's answer to the input method
    pub fn im_response(&mut self, window: WindowId, property: u32, result: &str) {
        if let Some(method) = self.method.as_mut() {
            method.response(window, property, result);
        }
    }

    pub fn grab_mouse(&mut self, window: WindowId, grab: bool) {
        if grab {
            debug!("Window {} grabbed the pointer", window);
            self.mouse_grabber = Some(window);
            self.implicit_grab = false;
        } else if self.mouse_grabber == Some(window) {
            debug!("Window {} released the pointer", window);
            self.mouse_grabber = None;
            self.implicit_grab = false;
        }
    }

    pub fn grab_keyboard(&mut self, window: WindowId, grab: bool) {
        if grab {
            debug!("Window {} grabbed the keyboard", window);
            self.keyboard_grabber = Some(window);
        } else if self.keyboard_grabber == Some(window) {
            debug!("Window {} released the keyboard", window);
            self.keyboard_grabber = None;
        }
    }

    pub fn set_focus(&mut self, windows: &mut WindowManager, window: WindowId) -> FocusChange {
        let change = self.focus.set_focus(windows, window);
        if !change.is_empty() {
            self.reset_method();
        }
        change
    }

    pub fn release_focus(&mut self, windows: &WindowManager, window: WindowId) -> FocusChange {
        let change = self.focus.release_focus(windows, window);
        if !change.is_empty() {
            self.reset_method();
        }
        change
    }

    /// Drop every grab and the focus held by `client`'s windows
    pub fn release_client(&mut self, windows: &WindowManager, client: ClientId) -> FocusChange {
        let owned = |w: Option<WindowId>| {
            w.and_then(|id| windows.get(id))
                .is_some_and(|window| window.owner == client)
        };
        if owned(self.mouse_grabber) {
            debug!("Releasing pointer grab of client {}", client);
            self.mouse_grabber = None;
            self.implicit_grab = false;
        }
        if owned(self.keyboard_grabber) {
            debug!("Releasing keyboard grab of client {}", client);
            self.keyboard_grabber = None;
        }
        if owned(self.modal) {
            self.modal = None;
        }
        let change = self.focus.release_owner(windows, client);
        if !change.is_empty() {
            self.reset_method();
        }
        change
    }

    /// Forget a window that was destroyed or hidden
    pub fn window_gone(&mut self, windows: &WindowManager, window: WindowId) -> FocusChange {
        let visible = windows.get(window).is_some_and(|w| w.is_visible());
        if !visible {
            if self.mouse_grabber == Some(window) {
                self.mouse_grabber = None;
                self.implicit_grab = false;
            }
            if self.keyboard_grabber == Some(window) {
                self.keyboard_grabber = None;
            }
            if self.modal == Some(window) {
                self.modal = None;
            }
            if self.pointer_window == Some(window) {
                self.pointer_window = None;
            }
        }
        let change = self.focus.revalidate(windows);
        if !change.is_empty() {
            self.reset_method();
        }
        change
    }

    /// Cursor selected by the window under the pointer
    pub fn cursor_under_pointer(&self, windows: &WindowManager) -> Option<CursorRef> {
        let window = windows.get(self.pointer_window?)?;
        Some(CursorRef::for_window(window.owner, window.cursor))
    }

    /// Re-evaluate the window under the pointer after the stack changed
    pub fn refresh_pointer_window(&mut self, windows: &WindowManager) {
        self.pointer_window = windows
            .window_at(self.position.x, self.position.y)
            .filter(|w| self.modal_allows(windows, w.owner))
            .map(|w| w.id);
    }

    fn modal_allows(&self, windows: &WindowManager, owner: ClientId) -> bool {
        match self.modal.and_then(|m| windows.get(m)) {
            Some(modal) => modal.owner == owner,
            None => true,
        }
    }

    fn reset_method(&mut self) {
        if let Some(method) = self.method.as_mut() {
            method.reset();
        }
    }
}

/// Key transition helper for callers that build [`KeyInput`] by hand
pub fn key_input(keycode: u32, unicode: u32, modifiers: Modifiers, pressed: bool) -> KeyInput {
    KeyInput {
        keycode,
        unicode,
        modifiers,
        pressed,
        repeat: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_proto::{Rect, Region};

    fn windows() -> WindowManager {
        let mut wm = WindowManager::new();
        wm.create_window(2, 20);
        wm.set_region(2, Region::from_rect(Rect::new(50, 0, 50, 50)));
        wm.create_window(1, 10);
        wm.set_region(1, Region::from_rect(Rect::new(0, 0, 50, 50)));
        wm
    }

    fn target(delivery: Option<Delivery>) -> Option<WindowId> {
        match delivery?.event {
            Event::Mouse { window, .. } | Event::Key { window, .. } => Some(window),
            _ => None,
        }
    }

    #[test]
    fn press_grabs_until_release() {
        let wm = windows();
        let mut router = InputRouter::new();
        let at = |x, y| Point::new(x, y);

        assert_eq!(target(router.pointer(&wm, at(10, 10), Buttons::empty(), 0, 0)), Some(1));
        assert_eq!(target(router.pointer(&wm, at(10, 10), Buttons::LEFT, 0, 1)), Some(1));
        assert_eq!(router.mouse_grabber(), Some(1));
        // Dragging over window 2 still reports to window 1
        assert_eq!(target(router.pointer(&wm, at(70, 10), Buttons::LEFT, 0, 2)), Some(1));
        // The release goes to the grabber, then the grab ends
        assert_eq!(target(router.pointer(&wm, at(70, 10), Buttons::empty(), 0, 3)), Some(1));
        assert_eq!(router.mouse_grabber(), None);
        assert_eq!(target(router.pointer(&wm, at(71, 10), Buttons::empty(), 0, 4)), Some(2));
    }

    #[test]
    fn explicit_grab_survives_button_release() {
        let wm = windows();
        let mut router = InputRouter::new();
        router.grab_mouse(2, true);
        router.pointer(&wm, Point::new(10, 10), Buttons::LEFT, 0, 0);
        let d = router.pointer(&wm, Point::new(10, 10), Buttons::empty(), 0, 1);
        assert_eq!(target(d), Some(2));
        assert_eq!(router.mouse_grabber(), Some(2));
    }

    #[test]
    fn releasing_a_client_clears_its_grabs() {
        let wm = windows();
        let mut router = InputRouter::new();
        router.grab_mouse(1, true);
        router.grab_keyboard(1, true);
        router.release_client(&wm, 10);
        assert_eq!(router.mouse_grabber(), None);
        assert_eq!(router.keyboard_grabber(), None);
        assert_eq!(target(router.pointer(&wm, Point::new(60, 5), Buttons::empty(), 0, 0)), Some(2));
    }

    #[test]
    fn modal_window_blocks_other_clients() {
        let wm = windows();
        let mut router = InputRouter::new();
        router.set_modal(Some(2));
        assert_eq!(router.pointer(&wm, Point::new(10, 10), Buttons::empty(), 0, 0), None);
        assert_eq!(target(router.pointer(&wm, Point::new(60, 10), Buttons::LEFT, 0, 1)), Some(2));
    }

    #[test]
    fn keys_follow_grab_then_focus() {
        let mut wm = windows();
        let mut router = InputRouter::new();
        let key = key_input(30, 'a' as u32, Modifiers::empty(), true);
        assert_eq!(router.key(&wm, key), None);

        router.set_focus(&mut wm, 2);
        assert_eq!(target(router.key(&wm, key)), Some(2));
        router.grab_keyboard(1, true);
        assert_eq!(target(router.key(&wm, key)), Some(1));
    }

    #[test]
    fn input_method_runs_first() {
        let mut wm = windows();
        let mut router = InputRouter::new();
        router.set_focus(&mut wm, 1);
        router.install_input_method(Some(Box::new(DeadKeys::new())));

        let accent = key_input(40, '`' as u32, Modifiers::empty(), true);
        let delivery = router.key(&wm, accent).unwrap();
        assert!(matches!(delivery.event, Event::ImEvent { window: 1, .. }));
        let delivery = router.key(&wm, key_input(18, 'e' as u32, Modifiers::empty(), true));
        assert!(matches!(
            delivery.unwrap().event,
            Event::ImEvent { ref commit, .. } if commit == "è"
        ));
    }
}
