//! Terminal Executor
//!
//! Ties together the parser and the screen model: bytes from the PTY are
//! parsed into actions which are applied to the screen. Everything the
//! screen reports while doing so comes back from [`Terminal::feed`] as a
//! list of [`TerminalEvent`]s, and any replies the terminal owes the child
//! (device status reports and the like) are queued for the caller to write.

use tracing::{debug, trace};

use crate::core::{
    Attributes, Color, CursorState, MouseEncoding, MouseMode, Palette, Screen, TerminalEvent,
};
use crate::parser::{Action, ColorSpec, CsiAction, EscAction, OscAction, Parser, SgrAttribute};

/// G0/G1 character set designations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Charset {
    #[default]
    Ascii,
    /// DEC Special Graphics (line drawing), `ESC ( 0`
    DecSpecial,
}

impl Charset {
    fn translate(self, c: char) -> char {
        if self == Charset::Ascii {
            return c;
        }
        match c {
            '`' => '◆',
            'a' => '▒',
            'f' => '°',
            'g' => '±',
            'j' => '┘',
            'k' => '┐',
            'l' => '┌',
            'm' => '└',
            'n' => '┼',
            'o' => '⎺',
            'p' => '⎻',
            'q' => '─',
            'r' => '⎼',
            's' => '⎽',
            't' => '├',
            'u' => '┤',
            'v' => '┴',
            'w' => '┬',
            'x' => '│',
            'y' => '≤',
            'z' => '≥',
            '{' => 'π',
            '|' => '≠',
            '}' => '£',
            '~' => '·',
            _ => c,
        }
    }
}

/// Terminal executor that processes parsed actions and updates the screen
pub struct Terminal {
    /// The terminal screen
    screen: Screen,
    /// The escape sequence parser
    parser: Parser,
    charsets: [Charset; 2],
    /// Index into `charsets` selected by SI/SO
    active_charset: usize,
    /// Replies owed to the child process
    output: Vec<u8>,
}

impl Terminal {
    /// Create a new terminal with the given dimensions
    pub fn new(cols: usize, rows: usize, scrollback_capacity: usize) -> Self {
        Self::with_palette(cols, rows, scrollback_capacity, Palette::default())
    }

    pub fn with_palette(cols: usize, rows: usize, scrollback_capacity: usize, palette: Palette) -> Self {
        Self {
            screen: Screen::with_palette(cols, rows, scrollback_capacity, palette),
            parser: Parser::new(),
            charsets: [Charset::Ascii; 2],
            active_charset: 0,
            output: Vec::new(),
        }
    }

    /// Get a reference to the screen
    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    /// Get a mutable reference to the screen
    pub fn screen_mut(&mut self) -> &mut Screen {
        &mut self.screen
    }

    pub fn cursor(&self) -> CursorState {
        self.screen.cursor().state()
    }

    /// Feed bytes from the PTY.
    ///
    /// Returns the events produced, in order. A `CursorMoved` event is
    /// appended once when the cursor ended up somewhere else than it started.
    pub fn feed(&mut self, data: &[u8]) -> Vec<TerminalEvent> {
        let before = self.cursor();
        for action in self.parser.parse(data) {
            self.apply_action(action);
        }
        let mut events = self.screen.take_events();
        let after = self.cursor();
        if after != before {
            events.push(TerminalEvent::CursorMoved(after));
        }
        events
    }

    /// Take bytes that must be written back to the child (DSR/DA replies)
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }

    /// Resize the terminal, returning the events it produced
    pub fn resize(&mut self, cols: usize, rows: usize) -> Vec<TerminalEvent> {
        let before = self.cursor();
        self.screen.resize(cols, rows);
        let mut events = self.screen.take_events();
        let after = self.cursor();
        if after != before {
            events.push(TerminalEvent::CursorMoved(after));
        }
        events
    }

    /// Apply a single parsed action to the screen
    fn apply_action(&mut self, action: Action) {
        match action {
            Action::Print(c) => {
                let c = self.charsets[self.active_charset].translate(c);
                self.screen.print_char(c);
            }
            Action::Execute(byte) => self.execute_c0(byte),
            Action::CsiDispatch(csi) => self.execute_csi(csi),
            Action::EscDispatch(esc) => self.execute_esc(esc),
            Action::OscDispatch(osc) => self.execute_osc(osc),
            Action::DcsDispatch(data) => {
                debug!(len = data.len(), "DCS sequence ignored");
            }
            Action::ApcDispatch(_) => {}
        }
    }

    /// Execute a C0 control character
    fn execute_c0(&mut self, byte: u8) {
        match byte {
            0x07 => self.screen.bell(),
            0x08 => self.screen.backspace(),
            0x09 => self.screen.tab(1),
            // LF, VT, FF
            0x0A..=0x0C => self.screen.linefeed(),
            0x0D => self.screen.carriage_return(),
            // SO / SI
            0x0E => self.active_charset = 1,
            0x0F => self.active_charset = 0,
            _ => trace!(byte, "C0 control ignored"),
        }
    }

    /// Execute a CSI sequence
    fn execute_csi(&mut self, csi: CsiAction) {
        if csi.private {
            self.execute_csi_private(&csi);
            return;
        }
        let n = csi.param_or_default(0, 1) as usize;

        match csi.final_byte {
            // CUU
            b'A' => self.screen.move_cursor_up(n),
            // CUD, VPR
            b'B' | b'e' => self.screen.move_cursor_down(n),
            // CUF, HPR
            b'C' | b'a' => self.screen.move_cursor_forward(n),
            // CUB
            b'D' => self.screen.move_cursor_backward(n),
            // CNL
            b'E' => {
                self.screen.move_cursor_down(n);
                self.screen.carriage_return();
            }
            // CPL
            b'F' => {
                self.screen.move_cursor_up(n);
                self.screen.carriage_return();
            }
            // CHA, HPA
            b'G' | b'`' => self.screen.move_cursor_to_col(n - 1),
            // CUP, HVP
            b'H' | b'f' => {
                let row = csi.param_or_default(0, 1) as usize - 1;
                let col = csi.param_or_default(1, 1) as usize - 1;
                self.screen.move_cursor_to(row, col);
            }
            // VPA
            b'd' => self.screen.move_cursor_to_row(n - 1),
            // CHT / CBT
            b'I' => self.screen.tab(n),
            b'Z' => self.screen.back_tab(n),

            b'J' => self.screen.erase_in_display(csi.param(0, 0)),
            b'K' => self.screen.erase_in_line(csi.param(0, 0)),
            b'X' => self.screen.erase_chars(n),

            b'L' => self.screen.insert_lines(n),
            b'M' => self.screen.delete_lines(n),
            b'@' => self.screen.insert_chars(n),
            b'P' => self.screen.delete_chars(n),

            // SU / SD
            b'S' => self.screen.scroll_up(n),
            b'T' => self.screen.scroll_down(n),

            // DECSTBM
            b'r' if csi.intermediates.is_empty() => {
                let top = csi.param_or_default(0, 1) as usize - 1;
                let bottom = csi.param_or_default(1, self.screen.rows() as u32) as usize - 1;
                self.screen.set_scroll_region(top, bottom);
            }

            b'm' => self.execute_sgr(&csi),

            // TBC
            b'g' => match csi.param(0, 0) {
                0 => self.screen.clear_tab_stop(),
                3 => self.screen.clear_all_tab_stops(),
                _ => {}
            },

            // SCOSC / SCORC
            b's' if csi.params.is_empty() => self.screen.save_cursor(),
            b'u' if csi.params.is_empty() => self.screen.restore_cursor(),

            b'h' => self.set_mode(&csi, true),
            b'l' => self.set_mode(&csi, false),

            // DSR
            b'n' => match csi.param(0, 0) {
                5 => self.output.extend_from_slice(b"\x1b[0n"),
                6 => {
                    let cursor = self.screen.cursor();
                    let row = if cursor.origin_mode {
                        cursor.row.saturating_sub(self.screen.scroll_top())
                    } else {
                        cursor.row
                    };
                    let reply = format!("\x1b[{};{}R", row + 1, cursor.col + 1);
                    self.output.extend_from_slice(reply.as_bytes());
                }
                _ => {}
            },

            // DA
            b'c' if csi.param(0, 0) == 0 => self.output.extend_from_slice(b"\x1b[?1;2c"),

            // REP
            b'b' => self.screen.repeat_last(n),

            // DECSTR
            b'p' if csi.intermediates.contains(&b'!') => self.soft_reset(),

            _ => {
                debug!(
                    params = ?csi.params,
                    intermediates = ?csi.intermediates,
                    final_byte = %(csi.final_byte as char),
                    "unhandled CSI"
                );
            }
        }
    }

    /// Execute a private CSI sequence (starts with ?)
    fn execute_csi_private(&mut self, csi: &CsiAction) {
        match csi.final_byte {
            b'h' => {
                for &param in &csi.params {
                    self.set_dec_mode(param, true);
                }
            }
            b'l' => {
                for &param in &csi.params {
                    self.set_dec_mode(param, false);
                }
            }
            _ => {
                debug!(
                    params = ?csi.params,
                    final_byte = %(csi.final_byte as char),
                    "unhandled private CSI"
                );
            }
        }
    }

    fn set_mouse_mode(&mut self, mode: MouseMode, enable: bool) {
        if enable {
            self.screen.set_mouse_mode(mode);
        } else if self.screen.modes.mouse_tracking == mode {
            self.screen.set_mouse_mode(MouseMode::None);
        }
    }

    /// Set or reset a DEC private mode
    fn set_dec_mode(&mut self, mode: u32, enable: bool) {
        match mode {
            // DECCKM
            1 => self.screen.modes.application_cursor = enable,
            // DECSCNM
            5 => self.screen.set_reverse_video(enable),
            // DECOM
            6 => {
                self.screen.cursor_mut().origin_mode = enable;
                let scroll_top = self.screen.scroll_top();
                self.screen.cursor_mut().home(scroll_top);
            }
            // DECAWM
            7 => self.screen.cursor_mut().autowrap = enable,
            9 => self.set_mouse_mode(MouseMode::X10, enable),
            // Cursor blinking is left to the renderer
            12 => {}
            // DECTCEM
            25 => self.screen.set_cursor_visible(enable),
            47 | 1047 => {
                if enable {
                    self.screen.enter_alternate_screen();
                } else {
                    self.screen.exit_alternate_screen();
                }
            }
            // DECNKM
            66 => self.screen.modes.application_keypad = enable,
            1000 => self.set_mouse_mode(MouseMode::Normal, enable),
            1002 => self.set_mouse_mode(MouseMode::ButtonEvent, enable),
            1003 => self.set_mouse_mode(MouseMode::AnyEvent, enable),
            1004 => self.screen.modes.focus_reporting = enable,
            1005 => {
                self.screen.modes.mouse_encoding = if enable {
                    MouseEncoding::Utf8
                } else {
                    MouseEncoding::X10
                };
            }
            1006 => {
                self.screen.modes.mouse_encoding = if enable {
                    MouseEncoding::Sgr
                } else {
                    MouseEncoding::X10
                };
            }
            1048 => {
                if enable {
                    self.screen.save_cursor();
                } else {
                    self.screen.restore_cursor();
                }
            }
            1049 => {
                if enable {
                    self.screen.save_cursor();
                    self.screen.enter_alternate_screen();
                } else {
                    self.screen.exit_alternate_screen();
                    self.screen.restore_cursor();
                }
            }
            2004 => self.screen.modes.bracketed_paste = enable,
            _ => debug!(mode, enable, "unknown DEC mode"),
        }
    }

    /// Set or reset an ANSI mode
    fn set_mode(&mut self, csi: &CsiAction, enable: bool) {
        for &param in &csi.params {
            match param {
                // IRM
                4 => self.screen.cursor_mut().insert_mode = enable,
                // LNM
                20 => self.screen.modes.linefeed_mode = enable,
                _ => debug!(mode = param, enable, "unknown ANSI mode"),
            }
        }
    }

    /// Execute SGR (Select Graphic Rendition)
    fn execute_sgr(&mut self, csi: &CsiAction) {
        let pen = &mut self.screen.cursor_mut().pen;
        for attr in csi.parse_sgr() {
            match attr {
                SgrAttribute::Reset => *pen = Default::default(),
                SgrAttribute::Bold => pen.attrs.insert(Attributes::BOLD),
                SgrAttribute::Faint => pen.attrs.insert(Attributes::FAINT),
                SgrAttribute::Italic => pen.attrs.insert(Attributes::ITALIC),
                SgrAttribute::Underline => pen.attrs.insert(Attributes::UNDERLINE),
                SgrAttribute::DoubleUnderline => pen.attrs.insert(Attributes::DOUBLE_UNDERLINE),
                SgrAttribute::Blink => pen.attrs.insert(Attributes::BLINK),
                SgrAttribute::Inverse => pen.attrs.insert(Attributes::INVERSE),
                SgrAttribute::Hidden => pen.attrs.insert(Attributes::HIDDEN),
                SgrAttribute::Strikethrough => pen.attrs.insert(Attributes::STRIKETHROUGH),
                SgrAttribute::NormalIntensity => pen.attrs.remove(Attributes::BOLD | Attributes::FAINT),
                SgrAttribute::NotItalic => pen.attrs.remove(Attributes::ITALIC),
                SgrAttribute::NotUnderlined => {
                    pen.attrs.remove(Attributes::UNDERLINE | Attributes::DOUBLE_UNDERLINE)
                }
                SgrAttribute::NotBlinking => pen.attrs.remove(Attributes::BLINK),
                SgrAttribute::NotInverse => pen.attrs.remove(Attributes::INVERSE),
                SgrAttribute::NotHidden => pen.attrs.remove(Attributes::HIDDEN),
                SgrAttribute::NotStrikethrough => pen.attrs.remove(Attributes::STRIKETHROUGH),
                SgrAttribute::Foreground(spec) => pen.fg = color_from_spec(spec),
                SgrAttribute::Background(spec) => pen.bg = color_from_spec(spec),
            }
        }
    }

    /// Execute an ESC sequence
    fn execute_esc(&mut self, esc: EscAction) {
        match esc {
            EscAction::SaveCursor => self.screen.save_cursor(),
            EscAction::RestoreCursor => self.screen.restore_cursor(),
            EscAction::Index => self.screen.index(),
            EscAction::ReverseIndex => self.screen.reverse_index(),
            EscAction::NextLine => self.screen.next_line(),
            EscAction::HorizontalTabSet => self.screen.set_tab_stop(),
            EscAction::FullReset => {
                self.screen.reset();
                self.parser.reset();
                self.charsets = [Charset::Ascii; 2];
                self.active_charset = 0;
            }
            EscAction::ApplicationKeypad => self.screen.modes.application_keypad = true,
            EscAction::NormalKeypad => self.screen.modes.application_keypad = false,
            EscAction::AlignmentTest => self.screen.alignment_test(),
            EscAction::DesignateCharset { slot, charset } => {
                let set = if charset == b'0' {
                    Charset::DecSpecial
                } else {
                    Charset::Ascii
                };
                if let Some(target) = self.charsets.get_mut(slot as usize) {
                    *target = set;
                }
            }
            EscAction::Unknown(bytes) => debug!(?bytes, "unknown ESC sequence"),
        }
    }

    /// Execute an OSC sequence
    fn execute_osc(&mut self, osc: OscAction) {
        match osc {
            OscAction::SetTitle(title) => self.screen.set_title(title),
            OscAction::SetIconName(_) => {}
            OscAction::Hyperlink { uri, .. } => trace!(%uri, "hyperlink ignored"),
            OscAction::Clipboard { clipboard, data } => {
                debug!(%clipboard, len = data.len(), "clipboard request ignored");
            }
            OscAction::ResetColor(index) => trace!(index, "color reset ignored"),
            OscAction::Unknown { command, data } => debug!(command, %data, "unknown OSC"),
        }
    }

    /// Perform a soft terminal reset
    fn soft_reset(&mut self) {
        let cursor = self.screen.cursor_mut();
        cursor.pen = Default::default();
        cursor.origin_mode = false;
        cursor.autowrap = true;
        cursor.insert_mode = false;
        cursor.visible = true;

        self.screen.reset_scroll_region();
        self.screen.modes.application_cursor = false;
        self.screen.modes.application_keypad = false;
        self.charsets = [Charset::Ascii; 2];
        self.active_charset = 0;
        debug!("soft reset performed");
    }
}

fn color_from_spec(spec: ColorSpec) -> Color {
    match spec {
        ColorSpec::Default => Color::Default,
        ColorSpec::Indexed(i) => Color::Indexed(i),
        ColorSpec::Rgb(r, g, b) => Color::Rgb(r, g, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DamageRect, Rgb, Snapshot};

    fn text(term: &Terminal) -> String {
        Snapshot::from_screen(term.screen()).to_text()
    }

    #[test]
    fn test_terminal_print() {
        let mut term = Terminal::new(80, 24, 1000);
        term.feed(b"Hello, World!");
        assert!(text(&term).contains("Hello, World!"));
    }

    #[test]
    fn test_feed_reports_damage_and_cursor() {
        let mut term = Terminal::new(10, 5, 100);
        let events = term.feed(b"\x1b[3;3HX");
        assert_eq!(
            events,
            vec![
                TerminalEvent::Damage(DamageRect::new(2, 2, 3, 3)),
                TerminalEvent::CursorMoved(CursorState {
                    row: 2,
                    col: 3,
                    visible: true
                }),
            ]
        );
    }

    #[test]
    fn test_cursor_event_only_when_moved() {
        let mut term = Terminal::new(10, 5, 100);
        assert!(term.feed(b"\x1b[H").is_empty());
        let events = term.feed(b"\x1b[?25l");
        assert_eq!(
            events,
            vec![TerminalEvent::CursorMoved(CursorState {
                row: 0,
                col: 0,
                visible: false
            })]
        );
    }

    #[test]
    fn test_terminal_cursor_movement() {
        let mut term = Terminal::new(80, 24, 1000);
        term.feed(b"\x1b[10;20H");
        assert_eq!(term.screen().cursor().row, 9);
        assert_eq!(term.screen().cursor().col, 19);

        term.feed(b"\x1b[2A\x1b[3D");
        assert_eq!(term.screen().cursor().row, 7);
        assert_eq!(term.screen().cursor().col, 16);
    }

    #[test]
    fn test_terminal_colors() {
        let mut term = Terminal::new(80, 24, 1000);
        term.feed(b"\x1b[1;31mR\x1b[0mN");
        let red = term.screen().cell(0, 0).unwrap();
        assert_eq!(red.fg, Rgb::new(205, 0, 0));
        assert!(red.attributes().contains(Attributes::BOLD));
        let normal = term.screen().cell(0, 1).unwrap();
        assert_eq!(normal.fg, Palette::DEFAULT_FG);
        assert!(normal.attributes().is_empty());
    }

    #[test]
    fn test_terminal_truecolor() {
        let mut term = Terminal::new(80, 24, 1000);
        term.feed(b"\x1b[38;2;255;128;0;48;5;21mX");
        let cell = term.screen().cell(0, 0).unwrap();
        assert_eq!(cell.fg, Rgb::new(255, 128, 0));
        assert_eq!(cell.bg, Rgb::new(0, 0, 255));
    }

    #[test]
    fn test_terminal_erase() {
        let mut term = Terminal::new(10, 3, 1000);
        term.feed(b"AAAAAAAAAA\r\nBBBBBBBBBB\x1b[2;5H\x1b[K");
        assert_eq!(term.screen().row_text(1), "BBBB");
        term.feed(b"\x1b[2J");
        assert_eq!(text(&term), "\n");
    }

    #[test]
    fn test_terminal_scroll_region() {
        let mut term = Terminal::new(10, 5, 1000);
        term.feed(b"0\r\n1\r\n2\r\n3\r\n4\x1b[2;4r\x1b[4;1H\n");
        assert_eq!(term.screen().row_text(1), "2");
        assert_eq!(term.screen().row_text(3), "");
        assert_eq!(term.screen().row_text(4), "4");
    }

    #[test]
    fn test_scroll_up_feeds_scrollback() {
        let mut term = Terminal::new(80, 24, 100);
        term.feed(b"A\r\nB");
        let events = term.feed(b"\x1b[S");
        assert_eq!(term.screen().row_text(0), "B");
        assert_eq!(term.screen().scrollback().get_from_end(0).unwrap().text(), "A");
        assert!(events.contains(&TerminalEvent::ScrollbackPushed(1)));
    }

    #[test]
    fn test_terminal_alternate_screen() {
        let mut term = Terminal::new(10, 3, 1000);
        term.feed(b"main");
        let events = term.feed(b"\x1b[?1049halt");
        assert!(events.contains(&TerminalEvent::AltScreenChanged(true)));
        assert_eq!(term.screen().row_text(0), "    alt");

        term.feed(b"\x1b[?1049l");
        assert_eq!(term.screen().row_text(0), "main");
        assert_eq!(term.screen().cursor().col, 4);
    }

    #[test]
    fn test_terminal_title_and_bell() {
        let mut term = Terminal::new(80, 24, 1000);
        let events = term.feed(b"\x1b]0;My Title\x07\x07");
        assert_eq!(
            events,
            vec![TerminalEvent::TitleChanged("My Title".into()), TerminalEvent::Bell]
        );
        assert_eq!(term.screen().title(), "My Title");
    }

    #[test]
    fn test_mouse_mode_events() {
        let mut term = Terminal::new(80, 24, 1000);
        let events = term.feed(b"\x1b[?1002h\x1b[?1006h");
        assert_eq!(events, vec![TerminalEvent::MouseModeChanged(MouseMode::ButtonEvent)]);
        assert_eq!(term.screen().modes.mouse_encoding, MouseEncoding::Sgr);

        // Resetting a mode that is not active changes nothing
        assert!(term.feed(b"\x1b[?1000l").is_empty());
        let events = term.feed(b"\x1b[?1002l");
        assert_eq!(events, vec![TerminalEvent::MouseModeChanged(MouseMode::None)]);
    }

    #[test]
    fn test_terminal_bracketed_paste() {
        let mut term = Terminal::new(80, 24, 1000);
        term.feed(b"\x1b[?2004h");
        assert!(term.screen().modes.bracketed_paste);
        term.feed(b"\x1b[?2004l");
        assert!(!term.screen().modes.bracketed_paste);
    }

    #[test]
    fn test_terminal_insert_delete_lines() {
        let mut term = Terminal::new(10, 4, 1000);
        term.feed(b"a\r\nb\r\nc\x1b[2;1H\x1b[L");
        assert_eq!(term.screen().row_text(1), "");
        assert_eq!(term.screen().row_text(2), "b");
        term.feed(b"\x1b[M");
        assert_eq!(term.screen().row_text(1), "b");
    }

    #[test]
    fn test_device_status_reports() {
        let mut term = Terminal::new(80, 24, 1000);
        term.feed(b"\x1b[5;7H\x1b[6n\x1b[5n");
        assert_eq!(term.take_output(), b"\x1b[5;7R\x1b[0n");
        assert!(term.take_output().is_empty());
    }

    #[test]
    fn test_dec_line_drawing() {
        let mut term = Terminal::new(10, 1, 10);
        term.feed(b"\x1b(0lqk\x1b(Bq");
        assert_eq!(term.screen().row_text(0), "┌─┐q");
    }

    #[test]
    fn test_repeat_last_char() {
        let mut term = Terminal::new(10, 1, 10);
        term.feed(b"x\x1b[3b");
        assert_eq!(term.screen().row_text(0), "xxxx");
    }

    #[test]
    fn test_split_sequence_across_feeds() {
        let mut term = Terminal::new(10, 3, 10);
        term.feed(b"\x1b[2");
        term.feed(b";3H\xe4\xb8");
        term.feed(b"\x96");
        assert_eq!(term.screen().row_text(1), "  世");
    }

    #[test]
    fn test_resize_reports_full_damage() {
        let mut term = Terminal::new(10, 3, 10);
        let events = term.resize(20, 5);
        assert_eq!(events, vec![TerminalEvent::Damage(DamageRect::full(5, 20))]);
    }
}
