//! VT scenarios driven through the interpreter
//!
//! Each test feeds a byte stream into a `Terminal` and checks the resulting
//! screen, scrollback and cursor.

use gridmux::backend::{LocalBackend, LocalConfig, TerminalBackend};
use gridmux::core::{Attributes, Color, SelectionMode, Snapshot};
use gridmux::terminal::Terminal;
use proptest::prelude::*;

#[test]
fn test_scroll_up_moves_row_into_scrollback() {
    let mut term = Terminal::new(80, 24, 1000);
    term.feed(b"A\r\nB");
    assert_eq!(term.screen().cell(0, 0).unwrap().codepoint, 'A' as u32);
    let second = *term.screen().cell(1, 0).unwrap();

    // Full-screen region, then scroll up one line
    term.feed(b"\x1b[1;24r\x1b[S");

    assert_eq!(*term.screen().cell(0, 0).unwrap(), second);
    let newest = term.screen().scrollback().get_from_end(0).unwrap();
    assert_eq!(newest.text(), "A");
    assert_eq!(term.screen().scrollback().len(), 1);
}

#[test]
fn test_linefeed_at_bottom_feeds_history() {
    let mut term = Terminal::new(80, 24, 1000);
    for i in 0..30 {
        term.feed(format!("line {i}\r\n").as_bytes());
    }
    let scrollback = term.screen().scrollback();
    assert_eq!(scrollback.len(), 7);
    assert_eq!(scrollback.get_from_end(0).unwrap().text(), "line 6");
    assert_eq!(term.screen().row_text(0), "line 7");
    assert_eq!(term.cursor().row, 23);
}

#[test]
fn test_scroll_region_keeps_outside_rows() {
    let mut term = Terminal::new(10, 5, 100);
    term.feed(b"top\r\n1\r\n2\r\n3\r\nbottom");
    term.feed(b"\x1b[2;4r\x1b[4;1H\n");

    assert_eq!(term.screen().row_text(0), "top");
    assert_eq!(term.screen().row_text(1), "2");
    assert_eq!(term.screen().row_text(2), "3");
    assert_eq!(term.screen().row_text(3), "");
    assert_eq!(term.screen().row_text(4), "bottom");
    // Lines scrolled out of a partial region are not history
    assert!(term.screen().scrollback().is_empty());
}

#[test]
fn test_sgr_styles_cells() {
    let mut term = Terminal::new(20, 2, 100);
    term.feed(b"\x1b[1;31mR\x1b[0mN\x1b[38;2;1;2;3mT");

    let red = term.screen().cell(0, 0).unwrap();
    assert!(red.attributes().contains(Attributes::BOLD));
    assert_eq!(red.fg, Color::indexed_to_rgb(1));

    let plain = term.screen().cell(0, 1).unwrap();
    assert!(!plain.attributes().contains(Attributes::BOLD));
    assert_eq!(plain.fg, term.screen().palette().foreground);

    let truecolor = term.screen().cell(0, 2).unwrap();
    assert_eq!((truecolor.fg.r, truecolor.fg.g, truecolor.fg.b), (1, 2, 3));
}

#[test]
fn test_autowrap_marks_wrapped_rows() {
    let mut term = Terminal::new(10, 3, 100);
    term.feed(b"abcdefghijkl");

    let snapshot = Snapshot::from_screen(term.screen());
    assert_eq!(snapshot.lines[0].text, "abcdefghij");
    assert!(snapshot.lines[0].wrapped);
    assert_eq!(snapshot.lines[1].text, "kl");
    assert!(!snapshot.lines[1].wrapped);
    assert_eq!((snapshot.cursor.row, snapshot.cursor.col), (1, 2));
}

#[test]
fn test_erase_and_cursor_addressing() {
    let mut term = Terminal::new(10, 3, 100);
    term.feed(b"0123456789\r\nabcdefghij");
    term.feed(b"\x1b[1;4H\x1b[K\x1b[2;3H\x1b[1K");

    assert_eq!(term.screen().row_text(0), "012");
    assert_eq!(term.screen().row_text(1), "   defghij");

    term.feed(b"\x1b[2J");
    assert_eq!(Snapshot::from_screen(term.screen()).to_text(), "\n");
}

#[test]
fn test_alternate_screen_round_trip() {
    let mut term = Terminal::new(10, 3, 100);
    term.feed(b"shell$ ");
    term.feed(b"\x1b[?1049h\x1b[Hvim");
    assert!(term.screen().is_alternate());
    assert_eq!(term.screen().row_text(0), "vim");

    term.feed(b"\x1b[?1049l");
    assert!(!term.screen().is_alternate());
    assert_eq!(term.screen().row_text(0), "shell$");
}

#[test]
fn test_title_reaches_snapshot() {
    let mut term = Terminal::new(10, 3, 100);
    term.feed(b"\x1b]2;build\x07");
    assert_eq!(Snapshot::from_screen(term.screen()).title, "build");
}

#[test]
fn test_single_cell_selection_round_trip() {
    let mut backend = LocalBackend::new(LocalConfig {
        cols: 10,
        rows: 3,
        ..LocalConfig::default()
    });
    backend.process_output(b"hello");
    backend.sync_to_grid();
    backend.start_selection(0, 1, SelectionMode::Character);
    backend.extend_selection(0, 1);
    assert_eq!(backend.selected_text(), "e");
}

proptest! {
    #[test]
    fn test_arbitrary_bytes_keep_cursor_in_bounds(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut term = Terminal::new(12, 4, 50);
        term.feed(&data);
        let cursor = term.cursor();
        prop_assert!(cursor.row < 4);
        prop_assert!(cursor.col < 12);
        prop_assert_eq!(term.screen().grid().cells().len(), 48);
    }
}
