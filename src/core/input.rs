//! Keystroke forwarding
//!
//! Translates key events into the exact bytes the child reads from stdin,
//! or into console actions for the Ctrl chords.

use bitflags::bitflags;

/// Enter is sent as LF followed by a space, the line terminator the
/// programs run by this console expect.
pub const ENTER_SEQUENCE: &[u8] = &[0x0A, 0x20];

const BACKSPACE: u8 = 0x08;
const SPACE: u8 = 0x20;

bitflags! {
    /// Modifier keys currently held down
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ControlKeys: u8 {
        const CTRL  = 0b01;
        const SHIFT = 0b10;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Ctrl,
    Shift,
    Enter,
    Backspace,
    Space,
    /// Any other key producing a character
    Char(char),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyInput {
    Down(Key),
    Up(Key),
}

/// What the console should do for one key event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputAction {
    Ignore,
    /// Write these bytes to stdin and flush
    Write(Vec<u8>),
    /// Send SIGINT to the child
    Interrupt,
    /// Clear the local display, nothing reaches the child
    ClearDisplay,
}

#[derive(Debug, Default)]
pub struct InputForwarder {
    keys: ControlKeys,
}

impl InputForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn control_keys(&self) -> ControlKeys {
        self.keys
    }

    /// Translate one key event
    ///
    /// Modifier state is tracked regardless of `process_alive`; everything
    /// else is ignored while no process runs.
    pub fn translate(&mut self, input: KeyInput, process_alive: bool) -> InputAction {
        let key = match input {
            KeyInput::Down(Key::Ctrl) => {
                self.keys.insert(ControlKeys::CTRL);
                return InputAction::Ignore;
            }
            KeyInput::Down(Key::Shift) => {
                self.keys.insert(ControlKeys::SHIFT);
                return InputAction::Ignore;
            }
            KeyInput::Up(Key::Ctrl) => {
                self.keys.remove(ControlKeys::CTRL);
                return InputAction::Ignore;
            }
            KeyInput::Up(Key::Shift) => {
                self.keys.remove(ControlKeys::SHIFT);
                return InputAction::Ignore;
            }
            KeyInput::Up(_) => return InputAction::Ignore,
            KeyInput::Down(key) => key,
        };

        if !process_alive {
            return InputAction::Ignore;
        }

        if self.keys.contains(ControlKeys::CTRL) {
            return match key {
                Key::Char('c') => InputAction::Interrupt,
                Key::Char('l') => InputAction::ClearDisplay,
                _ => InputAction::Ignore,
            };
        }

        InputAction::Write(Self::bytes_for(key))
    }

    fn bytes_for(key: Key) -> Vec<u8> {
        match key {
            Key::Enter => ENTER_SEQUENCE.to_vec(),
            Key::Backspace => vec![BACKSPACE],
            Key::Space => vec![SPACE],
            Key::Char(ch) if ch.is_ascii_alphabetic() => vec![ch as u8],
            Key::Char(ch) => ch.to_string().into_bytes(),
            // Modifiers returned early in translate
            Key::Ctrl | Key::Shift => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(forwarder: &mut InputForwarder, key: Key) -> InputAction {
        forwarder.translate(KeyInput::Down(key), true)
    }

    #[test]
    fn test_plain_keys() {
        let mut f = InputForwarder::new();
        assert_eq!(press(&mut f, Key::Char('a')), InputAction::Write(b"a".to_vec()));
        assert_eq!(press(&mut f, Key::Char('Z')), InputAction::Write(b"Z".to_vec()));
        assert_eq!(press(&mut f, Key::Enter), InputAction::Write(vec![0x0A, 0x20]));
        assert_eq!(press(&mut f, Key::Backspace), InputAction::Write(vec![0x08]));
        assert_eq!(press(&mut f, Key::Space), InputAction::Write(vec![0x20]));
        assert_eq!(press(&mut f, Key::Char('7')), InputAction::Write(b"7".to_vec()));
        assert_eq!(
            press(&mut f, Key::Char('\u{e9}')),
            InputAction::Write("\u{e9}".as_bytes().to_vec())
        );
    }

    #[test]
    fn test_modifiers_produce_no_bytes() {
        let mut f = InputForwarder::new();
        assert_eq!(press(&mut f, Key::Shift), InputAction::Ignore);
        assert_eq!(f.control_keys(), ControlKeys::SHIFT);
        assert_eq!(press(&mut f, Key::Ctrl), InputAction::Ignore);
        assert_eq!(f.control_keys(), ControlKeys::SHIFT | ControlKeys::CTRL);

        assert_eq!(f.translate(KeyInput::Up(Key::Shift), true), InputAction::Ignore);
        assert_eq!(f.translate(KeyInput::Up(Key::Ctrl), true), InputAction::Ignore);
        assert!(f.control_keys().is_empty());
    }

    #[test]
    fn test_ctrl_chords() {
        let mut f = InputForwarder::new();
        press(&mut f, Key::Ctrl);
        assert_eq!(press(&mut f, Key::Char('l')), InputAction::ClearDisplay);
        assert_eq!(press(&mut f, Key::Char('x')), InputAction::Ignore);
        assert_eq!(press(&mut f, Key::Enter), InputAction::Ignore);

        f.translate(KeyInput::Up(Key::Ctrl), true);
        assert_eq!(press(&mut f, Key::Char('c')), InputAction::Write(b"c".to_vec()));
    }

    #[test]
    fn test_one_interrupt_per_press() {
        let mut f = InputForwarder::new();
        press(&mut f, Key::Ctrl);

        let interrupts = (0..5)
            .map(|_| {
                let action = press(&mut f, Key::Char('c'));
                f.translate(KeyInput::Up(Key::Char('c')), true);
                action
            })
            .filter(|a| *a == InputAction::Interrupt)
            .count();
        assert_eq!(interrupts, 5);
    }

    #[test]
    fn test_no_process_is_noop() {
        let mut f = InputForwarder::new();
        assert_eq!(f.translate(KeyInput::Down(Key::Char('a')), false), InputAction::Ignore);
        assert_eq!(f.translate(KeyInput::Down(Key::Ctrl), false), InputAction::Ignore);
        assert_eq!(f.control_keys(), ControlKeys::CTRL);
        assert_eq!(f.translate(KeyInput::Down(Key::Char('c')), false), InputAction::Ignore);
    }
}
