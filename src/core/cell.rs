//! Terminal Cell
//!
//! A single styled character cell. Cells are plain old data so whole rows can
//! be copied into the shared memory region without translation.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// 24-bit color as stored in a cell
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb`
    pub fn parse_hex(s: &str) -> Option<Self> {
        let hex = s.strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Self { r, g, b })
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

bitflags! {
    /// SGR attributes plus wide-character bookkeeping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Attributes: u16 {
        const BOLD              = 1 << 0;
        const FAINT             = 1 << 1;
        const ITALIC            = 1 << 2;
        const UNDERLINE         = 1 << 3;
        const BLINK             = 1 << 4;
        const INVERSE           = 1 << 5;
        const HIDDEN            = 1 << 6;
        const STRIKETHROUGH     = 1 << 7;
        const DOUBLE_UNDERLINE  = 1 << 8;
        /// Leading cell of a double-width character.
        const WIDE              = 1 << 9;
        /// Trailing padding cell of a double-width character.
        const WIDE_CONTINUATION = 1 << 10;
    }
}

/// A single cell in the terminal grid
///
/// `codepoint == 0` marks a cell that was never written (or was erased).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct Cell {
    pub codepoint: u32,
    pub fg: Rgb,
    pub bg: Rgb,
    attrs: u16,
}

impl Default for Cell {
    fn default() -> Self {
        Self::blank(Palette::DEFAULT_FG, Palette::DEFAULT_BG)
    }
}

impl Cell {
    /// Create a cell holding `c` with default colors
    pub fn new(c: char) -> Self {
        Self {
            codepoint: c as u32,
            ..Self::default()
        }
    }

    /// Create a fully styled cell
    pub fn styled(c: char, fg: Rgb, bg: Rgb, attrs: Attributes) -> Self {
        Self {
            codepoint: c as u32,
            fg,
            bg,
            attrs: attrs.bits(),
        }
    }

    /// An empty cell painted with the given colors
    pub const fn blank(fg: Rgb, bg: Rgb) -> Self {
        Self {
            codepoint: 0,
            fg,
            bg,
            attrs: 0,
        }
    }

    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits_truncate(self.attrs)
    }

    pub fn with_attributes(mut self, attrs: Attributes) -> Self {
        self.attrs = attrs.bits();
        self
    }

    /// Check if this cell has no content
    pub fn is_empty(&self) -> bool {
        self.codepoint == 0
    }

    /// Check if this cell is the padding half of a wide character
    pub fn is_wide_continuation(&self) -> bool {
        self.attributes().contains(Attributes::WIDE_CONTINUATION)
    }

    /// The character to show for this cell (space for empty cells)
    pub fn display_char(&self) -> char {
        match char::from_u32(self.codepoint) {
            Some('\0') | None => ' ',
            Some(c) => c,
        }
    }
}

/// A pen color before palette resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Color {
    /// Default terminal color (foreground or background)
    #[default]
    Default,
    /// 256-color palette index
    Indexed(u8),
    /// 24-bit RGB color
    Rgb(u8, u8, u8),
}

impl Color {
    /// Convert a 256-color index to RGB using the standard xterm palette
    pub fn indexed_to_rgb(index: u8) -> Rgb {
        let (r, g, b) = match index {
            0 => (0, 0, 0),
            1 => (205, 0, 0),
            2 => (0, 205, 0),
            3 => (205, 205, 0),
            4 => (0, 0, 238),
            5 => (205, 0, 205),
            6 => (0, 205, 205),
            7 => (229, 229, 229),
            8 => (127, 127, 127),
            9 => (255, 0, 0),
            10 => (0, 255, 0),
            11 => (255, 255, 0),
            12 => (92, 92, 255),
            13 => (255, 0, 255),
            14 => (0, 255, 255),
            15 => (255, 255, 255),
            // 6x6x6 color cube
            16..=231 => {
                let n = index - 16;
                let level = |v: u8| if v == 0 { 0 } else { 55 + v * 40 };
                (level(n / 36), level((n % 36) / 6), level(n % 6))
            }
            // Grayscale ramp
            232..=255 => {
                let gray = 8 + (index - 232) * 10;
                (gray, gray, gray)
            }
        };
        Rgb::new(r, g, b)
    }
}

/// Resolves pen colors to the RGB values stored in cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub foreground: Rgb,
    pub background: Rgb,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            foreground: Self::DEFAULT_FG,
            background: Self::DEFAULT_BG,
        }
    }
}

impl Palette {
    pub const DEFAULT_FG: Rgb = Rgb::new(229, 229, 229);
    pub const DEFAULT_BG: Rgb = Rgb::new(0, 0, 0);

    pub fn foreground(&self, color: Color) -> Rgb {
        self.resolve(color, self.foreground)
    }

    pub fn background(&self, color: Color) -> Rgb {
        self.resolve(color, self.background)
    }

    fn resolve(&self, color: Color, default: Rgb) -> Rgb {
        match color {
            Color::Default => default,
            Color::Indexed(i) => Color::indexed_to_rgb(i),
            Color::Rgb(r, g, b) => Rgb::new(r, g, b),
        }
    }

    /// An erased cell under the given background pen
    pub fn blank(&self, bg: Color) -> Cell {
        Cell::blank(self.foreground, self.background(bg))
    }
}
