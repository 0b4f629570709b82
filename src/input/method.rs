//! Input method hook
//!
//! An installed [`InputMethod`] sees every key event before it is routed
//! and decides whether it passes, disappears, is replaced, or turns into
//! composition text for the focus window.

use tessera_proto::{Modifiers, WindowId};
use tracing::debug;

/// A key transition as seen by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyInput {
    pub keycode: u32,
    /// Unicode scalar value, 0 for keys without text
    pub unicode: u32,
    pub modifiers: Modifiers,
    pub pressed: bool,
    pub repeat: bool,
}

/// Outcome of filtering one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImAction {
    /// Deliver the key unchanged
    Pass,
    /// Drop the key
    Swallow,
    /// Deliver a different key instead
    Replace(KeyInput),
    /// Send composition state to the target instead of the key
    Compose {
        preedit: String,
        commit: String,
        cursor: i32,
    },
    /// Ask the target window's client for a property value
    Query { property: u32 },
}

/// Composition engine consulted before key routing
pub trait InputMethod: Send {
    fn filter(&mut self, window: WindowId, key: &KeyInput) -> ImAction;

    /// Answer to an earlier [`ImAction::Query`]
    fn response(&mut self, _window: WindowId, _property: u32, _result: &str) {}

    /// Drop any composition in progress (focus moved away)
    fn reset(&mut self) {}
}

/// Dead-key composer: a dead accent followed by a letter commits the
/// accented letter.
#[derive(Debug, Default)]
pub struct DeadKeys {
    pending: Option<char>,
}

/// Dead accents the composer understands
const ACCENTS: &[char] = &['\u{b4}', '`', '^', '\u{a8}', '~'];

impl DeadKeys {
    pub fn new() -> Self {
        Self::default()
    }

    fn compose(accent: char, base: char) -> Option<char> {
        let table: &[(char, &str, &str)] = &[
            ('\u{b4}', "aeiouAEIOU", "áéíóúÁÉÍÓÚ"),
            ('`', "aeiouAEIOU", "àèìòùÀÈÌÒÙ"),
            ('^', "aeiouAEIOU", "âêîôûÂÊÎÔÛ"),
            ('\u{a8}', "aeiouAEIOU", "äëïöüÄËÏÖÜ"),
            ('~', "anoANO", "ãñõÃÑÕ"),
        ];
        let (_, bases, composed) = table.iter().find(|(a, _, _)| *a == accent)?;
        let index = bases.chars().position(|c| c == base)?;
        composed.chars().nth(index)
    }
}

impl InputMethod for DeadKeys {
    fn filter(&mut self, window: WindowId, key: &KeyInput) -> ImAction {
        let Some(ch) = char::from_u32(key.unicode).filter(|c| *c != '\0') else {
            return ImAction::Pass;
        };
        if !key.pressed {
            // Releases of keys that took part in composition
            return if self.pending.is_some() || ACCENTS.contains(&ch) {
                ImAction::Swallow
            } else {
                ImAction::Pass
            };
        }
        match self.pending.take() {
            None if ACCENTS.contains(&ch) => {
                debug!("Dead key {:?} for window {}", ch, window);
                self.pending = Some(ch);
                ImAction::Compose {
                    preedit: ch.to_string(),
                    commit: String::new(),
                    cursor: 1,
                }
            }
            None => ImAction::Pass,
            Some(accent) => {
                let commit = match Self::compose(accent, ch) {
                    Some(composed) => composed.to_string(),
                    None => format!("{}{}", accent, ch),
                };
                ImAction::Compose {
                    preedit: String::new(),
                    commit,
                    cursor: 0,
                }
            }
        }
    }

    fn reset(&mut self) {
        self.pending = None;
    }
}
