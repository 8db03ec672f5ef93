//! Byte-level VT parser
//!
//! Follows the DEC ANSI parser model (<https://vt100.net/emu/dec_ansi_parser>)
//! closely enough for xterm-style output. Input may be split anywhere, so all
//! partial state (a half-read UTF-8 character, a CSI still collecting
//! parameters, an unterminated OSC string) lives in the parser between calls.
//!
//! Text is decoded as UTF-8. Raw 8-bit C1 controls are therefore not
//! recognised; their 7-bit `ESC` forms are.

use tracing::trace;

use super::actions::{Action, CsiAction, EscAction, OscAction};

/// Parameters beyond this count are dropped.
const MAX_PARAMS: usize = 32;
/// OSC/DCS payloads are truncated at this size.
const MAX_STRING: usize = 4096;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;
const CAN: u8 = 0x18;
const SUB: u8 = 0x1a;
const DEL: u8 = 0x7f;

/// Where a CSI or DCS header is in its collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Header {
    /// Right after the introducer; a marker byte may follow
    Entry,
    Params,
    Intermediates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    EscapeIntermediate,
    Csi(Header),
    /// Malformed CSI: swallow bytes up to its final byte
    CsiIgnore,
    Osc,
    Dcs(Header),
    DcsPassthrough,
    DcsIgnore,
    /// SOS, PM and APC strings
    Opaque,
}

impl State {
    /// States terminated by ST rather than by a final byte
    fn takes_string(self) -> bool {
        matches!(
            self,
            State::Osc | State::Dcs(_) | State::DcsPassthrough | State::DcsIgnore | State::Opaque
        )
    }
}

/// Incremental UTF-8 decoder for ground-state text
#[derive(Debug, Default)]
struct Utf8Decoder {
    bytes: [u8; 4],
    len: usize,
    /// Continuation bytes still expected
    missing: usize,
}

impl Utf8Decoder {
    fn is_pending(&self) -> bool {
        self.missing > 0
    }

    fn clear(&mut self) {
        self.len = 0;
        self.missing = 0;
    }

    /// Begin a character with a non-ASCII lead byte. Returns a replacement
    /// character when the byte cannot start a sequence.
    fn start(&mut self, lead: u8) -> Option<char> {
        self.missing = match lead {
            0xc2..=0xdf => 1,
            0xe0..=0xef => 2,
            0xf0..=0xf4 => 3,
            _ => return Some(char::REPLACEMENT_CHARACTER),
        };
        self.bytes[0] = lead;
        self.len = 1;
        None
    }

    /// Add a continuation byte, returning the character once complete
    fn push(&mut self, byte: u8) -> Option<char> {
        self.bytes[self.len] = byte;
        self.len += 1;
        self.missing -= 1;
        if self.missing > 0 {
            return None;
        }
        let decoded = std::str::from_utf8(&self.bytes[..self.len])
            .ok()
            .and_then(|s| s.chars().next());
        self.clear();
        Some(decoded.unwrap_or(char::REPLACEMENT_CHARACTER))
    }
}

/// Numeric parameters of a CSI or DCS header
#[derive(Debug, Default)]
struct Params {
    values: Vec<u32>,
    current: u32,
    has_digit: bool,
}

impl Params {
    fn clear(&mut self) {
        self.values.clear();
        self.current = 0;
        self.has_digit = false;
    }

    fn digit(&mut self, byte: u8) {
        self.current = self
            .current
            .saturating_mul(10)
            .saturating_add(u32::from(byte - b'0'));
        self.has_digit = true;
    }

    fn separator(&mut self) {
        if self.values.len() < MAX_PARAMS {
            self.values.push(self.current);
        }
        self.current = 0;
        self.has_digit = false;
    }

    /// Close the parameter list before an intermediate or final byte. A
    /// trailing empty parameter after `;` counts as 0.
    fn finish(&mut self) {
        if self.has_digit || !self.values.is_empty() {
            self.separator();
        }
    }

    fn take(&mut self) -> Vec<u32> {
        let values = std::mem::take(&mut self.values);
        self.clear();
        values
    }
}

/// The terminal parser
#[derive(Debug)]
pub struct Parser {
    state: State,
    utf8: Utf8Decoder,
    params: Params,
    /// Intermediate bytes of the current ESC, CSI or DCS sequence, including
    /// any CSI marker byte
    intermediates: Vec<u8>,
    /// The CSI carried the `?` marker
    private: bool,
    osc_command: u32,
    /// The `;` after the OSC command number was seen
    osc_payload: bool,
    /// OSC, DCS or SOS/PM/APC payload
    string: Vec<u8>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            utf8: Utf8Decoder::default(),
            params: Params::default(),
            intermediates: Vec::with_capacity(4),
            private: false,
            osc_command: 0,
            osc_payload: false,
            string: Vec::with_capacity(256),
        }
    }

    /// Drop any partial sequence and return to the ground state
    pub fn reset(&mut self) {
        self.state = State::Ground;
        self.utf8.clear();
        self.begin_sequence();
        self.string.clear();
    }

    /// Whether the parser sits between sequences
    pub fn is_ground(&self) -> bool {
        self.state == State::Ground && !self.utf8.is_pending()
    }

    /// Feed a chunk of bytes, returning the actions it completes
    pub fn parse(&mut self, data: &[u8]) -> Vec<Action> {
        let mut out = Vec::new();
        for &byte in data {
            self.step(byte, &mut out);
        }
        out
    }

    fn begin_sequence(&mut self) {
        self.params.clear();
        self.intermediates.clear();
        self.private = false;
    }

    fn step(&mut self, byte: u8, out: &mut Vec<Action>) {
        if self.utf8.is_pending() {
            if (0x80..=0xbf).contains(&byte) {
                if let Some(c) = self.utf8.push(byte) {
                    out.push(Action::Print(c));
                }
                return;
            }
            // Truncated character; the interrupting byte is handled normally
            self.utf8.clear();
            out.push(Action::Print(char::REPLACEMENT_CHARACTER));
        }

        match byte {
            0x00..=0x1f => self.control(byte, out),
            DEL => {}
            _ => {
                if let Some(action) = self.byte(byte) {
                    out.push(action);
                }
            }
        }
    }

    /// C0 controls act in every state, even in the middle of a sequence
    fn control(&mut self, byte: u8, out: &mut Vec<Action>) {
        match byte {
            CAN | SUB => self.state = State::Ground,
            ESC => {
                // In a string this is the first half of ST (ESC \)
                if self.state.takes_string() {
                    out.extend(self.end_string());
                }
                self.state = State::Escape;
                self.begin_sequence();
            }
            BEL if self.state == State::Osc => out.extend(self.end_osc()),
            _ if self.state.takes_string() => {}
            _ => out.push(Action::Execute(byte)),
        }
    }

    /// A byte from 0x20 up, except DEL
    fn byte(&mut self, byte: u8) -> Option<Action> {
        match self.state {
            State::Ground => match byte {
                0x20..=0x7e => Some(Action::Print(byte as char)),
                _ => self.utf8.start(byte).map(Action::Print),
            },
            State::Escape => self.escape(byte),
            State::EscapeIntermediate => match byte {
                0x20..=0x2f => {
                    self.intermediates.push(byte);
                    None
                }
                0x30..=0x7e => {
                    self.state = State::Ground;
                    Some(self.esc_dispatch(byte))
                }
                _ => {
                    self.state = State::Ground;
                    None
                }
            },
            State::Csi(header) => self.csi(header, byte),
            State::CsiIgnore => {
                if (0x40..=0x7e).contains(&byte) {
                    self.state = State::Ground;
                }
                None
            }
            State::Osc => {
                self.osc_byte(byte);
                None
            }
            State::Dcs(header) => {
                self.dcs(header, byte);
                None
            }
            State::DcsPassthrough | State::Opaque => {
                if self.string.len() < MAX_STRING {
                    self.string.push(byte);
                }
                None
            }
            State::DcsIgnore => None,
        }
    }

    fn escape(&mut self, byte: u8) -> Option<Action> {
        self.state = match byte {
            0x20..=0x2f => {
                self.intermediates.push(byte);
                State::EscapeIntermediate
            }
            b'[' => State::Csi(Header::Entry),
            b']' => {
                self.osc_command = 0;
                self.osc_payload = false;
                self.string.clear();
                State::Osc
            }
            b'P' => {
                self.string.clear();
                State::Dcs(Header::Entry)
            }
            b'X' | b'^' | b'_' => {
                self.string.clear();
                State::Opaque
            }
            // Lone ST; whatever it closed was already dispatched
            b'\\' => State::Ground,
            0x30..=0x7e => {
                self.state = State::Ground;
                return Some(self.esc_dispatch(byte));
            }
            _ => State::Ground,
        };
        None
    }

    fn esc_dispatch(&mut self, final_byte: u8) -> Action {
        let action = match (self.intermediates.as_slice(), final_byte) {
            ([], b'7') => EscAction::SaveCursor,
            ([], b'8') => EscAction::RestoreCursor,
            ([], b'D') => EscAction::Index,
            ([], b'E') => EscAction::NextLine,
            ([], b'H') => EscAction::HorizontalTabSet,
            ([], b'M') => EscAction::ReverseIndex,
            ([], b'c') => EscAction::FullReset,
            ([], b'=') => EscAction::ApplicationKeypad,
            ([], b'>') => EscAction::NormalKeypad,
            ([b'#'], b'8') => EscAction::AlignmentTest,
            (&[slot @ b'('..=b'+'], charset) => EscAction::DesignateCharset {
                slot: slot - b'(',
                charset,
            },
            (intermediates, _) => EscAction::Unknown([intermediates, std::slice::from_ref(&final_byte)].concat()),
        };
        Action::EscDispatch(action)
    }

    fn csi(&mut self, header: Header, byte: u8) -> Option<Action> {
        match (header, byte) {
            (Header::Entry, b'<'..=b'?') => {
                self.private = byte == b'?';
                self.intermediates.push(byte);
                self.state = State::Csi(Header::Params);
                None
            }
            (Header::Entry | Header::Params, b'0'..=b'9') => {
                self.params.digit(byte);
                self.state = State::Csi(Header::Params);
                None
            }
            // `:` sub-parameters are flattened into the list
            (Header::Entry | Header::Params, b';' | b':') => {
                self.params.separator();
                self.state = State::Csi(Header::Params);
                None
            }
            (_, 0x20..=0x2f) => {
                if header != Header::Intermediates {
                    self.params.finish();
                }
                self.intermediates.push(byte);
                self.state = State::Csi(Header::Intermediates);
                None
            }
            (_, 0x40..=0x7e) => {
                if header != Header::Intermediates {
                    self.params.finish();
                }
                self.state = State::Ground;
                self.csi_dispatch(byte)
            }
            _ => {
                self.state = State::CsiIgnore;
                None
            }
        }
    }

    fn csi_dispatch(&mut self, final_byte: u8) -> Option<Action> {
        let is_marker = |b: &u8| matches!(b, b'<'..=b'?');
        // `>`, `<` and `=` forms (DA2, xterm key modifiers) are not
        // interpreted; they must not alias their unmarked forms
        if !self.private && self.intermediates.iter().any(is_marker) {
            trace!(final_byte, "ignoring CSI with secondary marker");
            self.params.clear();
            return None;
        }
        Some(Action::CsiDispatch(CsiAction {
            params: self.params.take(),
            intermediates: self.intermediates.iter().filter(|b| !is_marker(b)).copied().collect(),
            final_byte,
            private: self.private,
        }))
    }

    fn dcs(&mut self, header: Header, byte: u8) {
        self.state = match (header, byte) {
            // Markers are accepted but not recorded
            (Header::Entry, b'<'..=b'?') => State::Dcs(Header::Params),
            (Header::Entry | Header::Params, b'0'..=b'9') => {
                self.params.digit(byte);
                State::Dcs(Header::Params)
            }
            (Header::Entry | Header::Params, b';') => {
                self.params.separator();
                State::Dcs(Header::Params)
            }
            (_, 0x20..=0x2f) => {
                self.intermediates.push(byte);
                State::Dcs(Header::Intermediates)
            }
            (_, 0x40..=0x7e) => State::DcsPassthrough,
            _ => State::DcsIgnore,
        };
    }

    fn osc_byte(&mut self, byte: u8) {
        if !self.osc_payload {
            match byte {
                b'0'..=b'9' => {
                    self.osc_command = self
                        .osc_command
                        .saturating_mul(10)
                        .saturating_add(u32::from(byte - b'0'));
                    return;
                }
                b';' => {
                    self.osc_payload = true;
                    return;
                }
                // No number: the whole string is payload
                _ => self.osc_payload = true,
            }
        }
        if self.string.len() < MAX_STRING {
            self.string.push(byte);
        }
    }

    fn end_osc(&mut self) -> Option<Action> {
        self.state = State::Ground;
        let payload = String::from_utf8_lossy(&self.string).into_owned();
        self.string.clear();

        let two_fields = |payload: String| match payload.split_once(';') {
            Some((first, rest)) => (first.to_string(), rest.to_string()),
            None => (String::new(), payload),
        };
        let action = match self.osc_command {
            0 | 2 => OscAction::SetTitle(payload),
            1 => OscAction::SetIconName(payload),
            8 => {
                let (params, uri) = two_fields(payload);
                OscAction::Hyperlink { params, uri }
            }
            52 => {
                let (clipboard, data) = two_fields(payload);
                OscAction::Clipboard { clipboard, data }
            }
            104 | 110 | 111 => OscAction::ResetColor(self.osc_command - 100),
            command => OscAction::Unknown { command, data: payload },
        };
        Some(Action::OscDispatch(action))
    }

    /// ST seen inside a string state
    fn end_string(&mut self) -> Option<Action> {
        let action = match self.state {
            State::Osc => return self.end_osc(),
            State::DcsPassthrough => Some(Action::DcsDispatch(std::mem::take(&mut self.string))),
            State::Opaque => Some(Action::ApcDispatch(std::mem::take(&mut self.string))),
            _ => None,
        };
        self.state = State::Ground;
        action
    }
}
