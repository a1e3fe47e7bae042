//! Key mapping for terminal input
//!
//! Converts crossterm key events into the key-down/key-up stream the
//! console's input forwarder consumes.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers, ModifierKeyCode};

use crate::core::input::{Key, KeyInput};

/// Key mapper for converting key events to console input
pub struct KeyMapper;

impl KeyMapper {
    /// Map a crossterm KeyEvent to console key input
    ///
    /// With `enhanced` set the terminal reports modifier keys and releases
    /// on its own. Otherwise a Ctrl chord arrives as a single event and is
    /// expanded into Ctrl down, the key, Ctrl up.
    pub fn translate(event: &KeyEvent, enhanced: bool) -> Vec<KeyInput> {
        if let KeyCode::Modifier(code) = event.code {
            let Some(key) = Self::modifier_key(code) else {
                return Vec::new();
            };
            return match event.kind {
                KeyEventKind::Release => vec![KeyInput::Up(key)],
                KeyEventKind::Press | KeyEventKind::Repeat => vec![KeyInput::Down(key)],
            };
        }

        let Some(key) = Self::map_code(event.code) else {
            return Vec::new();
        };

        if event.kind == KeyEventKind::Release {
            return vec![KeyInput::Up(key)];
        }

        if !enhanced && event.modifiers.contains(KeyModifiers::CONTROL) {
            return vec![
                KeyInput::Down(Key::Ctrl),
                KeyInput::Down(key),
                KeyInput::Up(key),
                KeyInput::Up(Key::Ctrl),
            ];
        }

        vec![KeyInput::Down(key)]
    }

    fn modifier_key(code: ModifierKeyCode) -> Option<Key> {
        match code {
            ModifierKeyCode::LeftControl | ModifierKeyCode::RightControl => Some(Key::Ctrl),
            ModifierKeyCode::LeftShift | ModifierKeyCode::RightShift => Some(Key::Shift),
            _ => None,
        }
    }

    fn map_code(code: KeyCode) -> Option<Key> {
        match code {
            KeyCode::Enter => Some(Key::Enter),
            KeyCode::Backspace => Some(Key::Backspace),
            KeyCode::Tab => Some(Key::Char('\t')),
            KeyCode::Char(' ') => Some(Key::Space),
            KeyCode::Char(ch) => Some(Key::Char(ch)),
            _ => None,
        }
    }
}
