//! Input Encoding Module
//!
//! Handles encoding of keyboard and mouse input into terminal escape sequences.
//! Keys arrive either as a character plus modifiers (`KEY`) or as a named
//! special key plus modifiers (`SPECIAL`); both carry small integer codes on
//! the control socket.
//!
//! # Keyboard Encoding
//!
//! Different keys produce different sequences depending on:
//! - Application cursor mode (DECCKM)
//! - Application keypad mode (DECKPAM/DECKPNM)
//! - Modifier keys (Shift, Ctrl, Alt)
//!
//! # Mouse Encoding
//!
//! Mouse events are encoded according to the active mouse mode:
//! - X10: Button press only
//! - Normal (VT200): Button press and release
//! - SGR: Extended encoding for large terminals

use bitflags::bitflags;

use crate::core::{Modes, MouseEncoding, MouseMode};

bitflags! {
    /// Keyboard modifiers, with the bit values used on the wire
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        const SHIFT = 1;
        const ALT   = 2;
        const CTRL  = 4;
    }
}

impl Modifiers {
    /// Decode a wire modifier mask, ignoring unknown bits
    pub fn from_wire(mask: u32) -> Self {
        Self::from_bits_truncate((mask & 0xff) as u8)
    }

    pub fn to_wire(self) -> u32 {
        self.bits() as u32
    }

    /// The modifier parameter for CSI sequences (1 + bitmask)
    pub fn as_csi_param(&self) -> u8 {
        1 + self.bits()
    }
}

/// Named keys that produce escape sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialKey {
    Enter,
    Tab,
    Backspace,
    Escape,
    Up,
    Down,
    Left,
    Right,
    Insert,
    Delete,
    Home,
    End,
    PageUp,
    PageDown,
    /// F1, F2, ...
    Function(u8),
    /// Keypad digit 0-9
    KeypadDigit(u8),
    KeypadMultiply,
    KeypadPlus,
    KeypadComma,
    KeypadMinus,
    KeypadPeriod,
    KeypadDivide,
    KeypadEnter,
    KeypadEqual,
}

const FUNCTION_BASE: u32 = 256;
const KEYPAD_BASE: u32 = 512;

impl SpecialKey {
    /// Decode a wire key code
    pub fn from_code(code: u32) -> Option<Self> {
        let key = match code {
            1 => Self::Enter,
            2 => Self::Tab,
            3 => Self::Backspace,
            4 => Self::Escape,
            5 => Self::Up,
            6 => Self::Down,
            7 => Self::Left,
            8 => Self::Right,
            9 => Self::Insert,
            10 => Self::Delete,
            11 => Self::Home,
            12 => Self::End,
            13 => Self::PageUp,
            14 => Self::PageDown,
            257..=511 => Self::Function((code - FUNCTION_BASE).min(255) as u8),
            512..=521 => Self::KeypadDigit((code - KEYPAD_BASE) as u8),
            522 => Self::KeypadMultiply,
            523 => Self::KeypadPlus,
            524 => Self::KeypadComma,
            525 => Self::KeypadMinus,
            526 => Self::KeypadPeriod,
            527 => Self::KeypadDivide,
            528 => Self::KeypadEnter,
            529 => Self::KeypadEqual,
            _ => return None,
        };
        Some(key)
    }

    /// The wire key code
    pub fn code(&self) -> u32 {
        match self {
            Self::Enter => 1,
            Self::Tab => 2,
            Self::Backspace => 3,
            Self::Escape => 4,
            Self::Up => 5,
            Self::Down => 6,
            Self::Left => 7,
            Self::Right => 8,
            Self::Insert => 9,
            Self::Delete => 10,
            Self::Home => 11,
            Self::End => 12,
            Self::PageUp => 13,
            Self::PageDown => 14,
            Self::Function(n) => FUNCTION_BASE + *n as u32,
            Self::KeypadDigit(d) => KEYPAD_BASE + *d as u32,
            Self::KeypadMultiply => 522,
            Self::KeypadPlus => 523,
            Self::KeypadComma => 524,
            Self::KeypadMinus => 525,
            Self::KeypadPeriod => 526,
            Self::KeypadDivide => 527,
            Self::KeypadEnter => 528,
            Self::KeypadEqual => 529,
        }
    }
}

/// Terminal modes that change how keys are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyModes {
    pub application_cursor: bool,
    pub application_keypad: bool,
}

impl From<&Modes> for KeyModes {
    fn from(modes: &Modes) -> Self {
        Self {
            application_cursor: modes.application_cursor,
            application_keypad: modes.application_keypad,
        }
    }
}

/// Encode a special key press into terminal escape sequence
pub fn encode_special(key: SpecialKey, modifiers: Modifiers, modes: KeyModes) -> Vec<u8> {
    let alt = modifiers.contains(Modifiers::ALT);
    let app_keypad = modes.application_keypad;

    match key {
        SpecialKey::Up => encode_cursor_key(b'A', modifiers, modes.application_cursor),
        SpecialKey::Down => encode_cursor_key(b'B', modifiers, modes.application_cursor),
        SpecialKey::Right => encode_cursor_key(b'C', modifiers, modes.application_cursor),
        SpecialKey::Left => encode_cursor_key(b'D', modifiers, modes.application_cursor),
        SpecialKey::Home => encode_cursor_key(b'H', modifiers, modes.application_cursor),
        SpecialKey::End => encode_cursor_key(b'F', modifiers, modes.application_cursor),

        SpecialKey::Insert => encode_tilde_key(2, modifiers),
        SpecialKey::Delete => encode_tilde_key(3, modifiers),
        SpecialKey::PageUp => encode_tilde_key(5, modifiers),
        SpecialKey::PageDown => encode_tilde_key(6, modifiers),

        SpecialKey::Function(n) => encode_function_key(n, modifiers),

        SpecialKey::Backspace => {
            if modifiers.contains(Modifiers::CTRL) {
                vec![0x08]
            } else if alt {
                vec![0x1b, 0x7f]
            } else {
                vec![0x7f]
            }
        }
        SpecialKey::Tab => {
            if modifiers.contains(Modifiers::SHIFT) {
                b"\x1b[Z".to_vec()
            } else if alt {
                vec![0x1b, 0x09]
            } else {
                vec![0x09]
            }
        }
        SpecialKey::Enter => {
            if alt {
                vec![0x1b, 0x0d]
            } else {
                vec![0x0d]
            }
        }
        SpecialKey::Escape => vec![0x1b],

        SpecialKey::KeypadDigit(d) => encode_keypad(b'p' + d.min(9), b'0' + d.min(9), app_keypad),
        SpecialKey::KeypadMultiply => encode_keypad(b'j', b'*', app_keypad),
        SpecialKey::KeypadPlus => encode_keypad(b'k', b'+', app_keypad),
        SpecialKey::KeypadComma => encode_keypad(b'l', b',', app_keypad),
        SpecialKey::KeypadMinus => encode_keypad(b'm', b'-', app_keypad),
        SpecialKey::KeypadPeriod => encode_keypad(b'n', b'.', app_keypad),
        SpecialKey::KeypadDivide => encode_keypad(b'o', b'/', app_keypad),
        SpecialKey::KeypadEnter => encode_keypad(b'M', b'\r', app_keypad),
        SpecialKey::KeypadEqual => encode_keypad(b'X', b'=', app_keypad),
    }
}

/// Encode a cursor key (arrows, Home, End)
fn encode_cursor_key(code: u8, modifiers: Modifiers, application_mode: bool) -> Vec<u8> {
    if !modifiers.is_empty() {
        format!("\x1b[1;{}{}", modifiers.as_csi_param(), code as char).into_bytes()
    } else if application_mode {
        vec![0x1b, b'O', code]
    } else {
        vec![0x1b, b'[', code]
    }
}

/// Encode a `CSI n ~` key (Insert, Delete, PgUp, PgDn, F5-F12)
fn encode_tilde_key(number: u8, modifiers: Modifiers) -> Vec<u8> {
    if modifiers.is_empty() {
        format!("\x1b[{}~", number).into_bytes()
    } else {
        format!("\x1b[{};{}~", number, modifiers.as_csi_param()).into_bytes()
    }
}

/// Encode function keys; F1-F4 use SS3, the rest `CSI n ~`
fn encode_function_key(number: u8, modifiers: Modifiers) -> Vec<u8> {
    let tilde = match number {
        1..=4 => {
            let code = b'P' + (number - 1);
            return if modifiers.is_empty() {
                vec![0x1b, b'O', code]
            } else {
                format!("\x1b[1;{}{}", modifiers.as_csi_param(), code as char).into_bytes()
            };
        }
        5 => 15,
        6 => 17,
        7 => 18,
        8 => 19,
        9 => 20,
        10 => 21,
        11 => 23,
        12 => 24,
        _ => return Vec::new(),
    };
    encode_tilde_key(tilde, modifiers)
}

fn encode_keypad(app_code: u8, normal: u8, application_mode: bool) -> Vec<u8> {
    if application_mode {
        vec![0x1b, b'O', app_code]
    } else {
        vec![normal]
    }
}

/// Encode a character with modifiers
pub fn encode_char(c: char, modifiers: Modifiers) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(5);
    if modifiers.contains(Modifiers::ALT) {
        bytes.push(0x1b);
    }

    let control = if modifiers.contains(Modifiers::CTRL) {
        match c {
            'a'..='z' | 'A'..='Z' => Some((c.to_ascii_uppercase() as u8) - b'@'),
            '@' | ' ' | '2' => Some(0x00),
            '[' | '3' => Some(0x1b),
            '\\' | '4' => Some(0x1c),
            ']' | '5' => Some(0x1d),
            '^' | '6' => Some(0x1e),
            '_' | '7' | '/' => Some(0x1f),
            '?' | '8' => Some(0x7f),
            _ => None,
        }
    } else {
        None
    };

    match control {
        Some(byte) => bytes.push(byte),
        None => {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }
    bytes
}

/// Mouse button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    /// Motion with no button held
    None,
    WheelUp,
    WheelDown,
}

/// Mouse event type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEventType {
    Press,
    Release,
    Move,
}

/// Encode a mouse event, or `None` when the active mode does not report it
pub fn encode_mouse(
    button: MouseButton,
    event_type: MouseEventType,
    col: u16,
    row: u16,
    modifiers: Modifiers,
    mode: MouseMode,
    encoding: MouseEncoding,
) -> Option<Vec<u8>> {
    let is_wheel = matches!(button, MouseButton::WheelUp | MouseButton::WheelDown);
    let reported = match mode {
        MouseMode::None => false,
        MouseMode::X10 => event_type == MouseEventType::Press && !is_wheel,
        MouseMode::Normal => event_type != MouseEventType::Move,
        MouseMode::ButtonEvent => event_type != MouseEventType::Move || button != MouseButton::None,
        MouseMode::AnyEvent => true,
    };
    if !reported {
        return None;
    }

    let mut button_code: u16 = match button {
        MouseButton::Left => 0,
        MouseButton::Middle => 1,
        MouseButton::Right => 2,
        MouseButton::None => 3,
        MouseButton::WheelUp => 64,
        MouseButton::WheelDown => 65,
    };

    // X10 has no modifier bits
    if mode != MouseMode::X10 {
        if modifiers.contains(Modifiers::SHIFT) {
            button_code |= 4;
        }
        if modifiers.contains(Modifiers::ALT) {
            button_code |= 8;
        }
        if modifiers.contains(Modifiers::CTRL) {
            button_code |= 16;
        }
    }
    if event_type == MouseEventType::Move {
        button_code |= 32;
    }

    match encoding {
        MouseEncoding::Sgr => {
            let final_char = if event_type == MouseEventType::Release { 'm' } else { 'M' };
            Some(format!("\x1b[<{};{};{}{}", button_code, col + 1, row + 1, final_char).into_bytes())
        }
        MouseEncoding::X10 | MouseEncoding::Utf8 => {
            // Legacy encodings report a release as button 3
            let cb = if event_type == MouseEventType::Release {
                (button_code & !3) | 3
            } else {
                button_code
            };
            let mut out = b"\x1b[M".to_vec();
            for value in [cb, col + 1, row + 1] {
                let value = value + 32;
                if encoding == MouseEncoding::X10 {
                    out.push(value.min(255) as u8);
                } else {
                    let c = char::from_u32(value as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
                    let mut buf = [0u8; 4];
                    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
            Some(out)
        }
    }
}

/// Encode focus in/out events
pub fn encode_focus(focused: bool) -> Vec<u8> {
    if focused {
        b"\x1b[I".to_vec()
    } else {
        b"\x1b[O".to_vec()
    }
}

/// Wrap pasted text in bracketed-paste markers when the mode is on
pub fn encode_paste(text: &str, bracketed: bool) -> Vec<u8> {
    if !bracketed {
        return text.as_bytes().to_vec();
    }
    let mut out = Vec::with_capacity(text.len() + 12);
    out.extend_from_slice(b"\x1b[200~");
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(b"\x1b[201~");
    out
}
