//! Parsed control functions, handed from the parser to the terminal.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// A printable character, already UTF-8 decoded
    Print(char),
    /// C0 control other than ESC
    Execute(u8),
    CsiDispatch(CsiAction),
    EscDispatch(EscAction),
    OscDispatch(OscAction),
    /// DCS payload, collected until ST
    DcsDispatch(Vec<u8>),
    /// SOS/PM/APC payload, collected until ST
    ApcDispatch(Vec<u8>),
}

/// `ESC [ [?] params intermediates final`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CsiAction {
    /// Empty parameters read as 0
    pub params: Vec<u32>,
    /// 0x20..=0x2F, excluding private markers
    pub intermediates: Vec<u8>,
    pub final_byte: u8,
    /// `?` marker present
    pub private: bool,
}

fn sgr_simple(code: u32) -> Option<SgrAttribute> {
    use SgrAttribute::*;
    Some(match code {
        0 => Reset,
        1 => Bold,
        2 => Faint,
        3 => Italic,
        4 => Underline,
        5 | 6 => Blink,
        7 => Inverse,
        8 => Hidden,
        9 => Strikethrough,
        21 => DoubleUnderline,
        22 => NormalIntensity,
        23 => NotItalic,
        24 => NotUnderlined,
        25 => NotBlinking,
        27 => NotInverse,
        28 => NotHidden,
        29 => NotStrikethrough,
        30..=37 => Foreground(ColorSpec::Indexed((code - 30) as u8)),
        39 => Foreground(ColorSpec::Default),
        40..=47 => Background(ColorSpec::Indexed((code - 40) as u8)),
        49 => Background(ColorSpec::Default),
        90..=97 => Foreground(ColorSpec::Indexed((code - 82) as u8)),
        100..=107 => Background(ColorSpec::Indexed((code - 92) as u8)),
        _ => return None,
    })
}

fn channel(value: u32) -> u8 {
    value.min(255) as u8
}

impl CsiAction {
    /// Parameter `index`, or `default` when absent
    pub fn param(&self, index: usize, default: u32) -> u32 {
        self.params.get(index).copied().unwrap_or(default)
    }

    /// Like [`CsiAction::param`] but an explicit 0 also means `default`
    pub fn param_or_default(&self, index: usize, default: u32) -> u32 {
        match self.param(index, 0) {
            0 => default,
            v => v,
        }
    }

    /// Decode an SGR (`m`) parameter list. Unknown codes are skipped.
    pub fn parse_sgr(&self) -> Vec<SgrAttribute> {
        if self.params.is_empty() {
            return vec![SgrAttribute::Reset];
        }
        let mut attrs = Vec::with_capacity(self.params.len());
        let mut rest = self.params.as_slice();
        while let Some((&code, tail)) = rest.split_first() {
            rest = tail;
            let attr = match code {
                38 => extended_color(&mut rest).map(SgrAttribute::Foreground),
                48 => extended_color(&mut rest).map(SgrAttribute::Background),
                _ => sgr_simple(code),
            };
            attrs.extend(attr);
        }
        attrs
    }
}

/// `5;n` or `2;r;g;b` after a 38/48, consuming what it reads. A truncated
/// form consumes nothing.
fn extended_color(rest: &mut &[u32]) -> Option<ColorSpec> {
    let params: &[u32] = *rest;
    let (color, used) = match *params {
        [5, n, ..] => (ColorSpec::Indexed(channel(n)), 2),
        [2, r, g, b, ..] => (ColorSpec::Rgb(channel(r), channel(g), channel(b)), 4),
        _ => return None,
    };
    *rest = &params[used..];
    Some(color)
}

/// Color named by an SGR sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpec {
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

/// One decoded SGR parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SgrAttribute {
    Reset,
    Bold,
    Faint,
    Italic,
    Underline,
    DoubleUnderline,
    Blink,
    Inverse,
    Hidden,
    Strikethrough,
    NormalIntensity,
    NotItalic,
    NotUnderlined,
    NotBlinking,
    NotInverse,
    NotHidden,
    NotStrikethrough,
    Foreground(ColorSpec),
    Background(ColorSpec),
}

/// Escape sequences outside CSI, OSC and DCS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscAction {
    /// DECSC (`ESC 7`)
    SaveCursor,
    /// DECRC (`ESC 8`)
    RestoreCursor,
    /// IND (`ESC D`)
    Index,
    /// RI (`ESC M`)
    ReverseIndex,
    /// NEL (`ESC E`)
    NextLine,
    /// HTS (`ESC H`)
    HorizontalTabSet,
    /// RIS (`ESC c`)
    FullReset,
    /// DECKPAM (`ESC =`)
    ApplicationKeypad,
    /// DECKPNM (`ESC >`)
    NormalKeypad,
    /// DECALN (`ESC # 8`)
    AlignmentTest,
    /// SCS: `ESC (`, `)`, `*` or `+` followed by the charset
    DesignateCharset { slot: u8, charset: u8 },
    /// Anything else, intermediates followed by the final byte
    Unknown(Vec<u8>),
}

/// Operating system commands, `ESC ] n ; data ST`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OscAction {
    /// OSC 0 / OSC 2
    SetTitle(String),
    /// OSC 1
    SetIconName(String),
    /// OSC 8 ; params ; uri
    Hyperlink { params: String, uri: String },
    /// OSC 52 ; clipboard ; data
    Clipboard { clipboard: String, data: String },
    /// OSC 104 / 110 / 111
    ResetColor(u32),
    Unknown { command: u32, data: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csi(params: &[u32], final_byte: u8) -> CsiAction {
        CsiAction {
            params: params.to_vec(),
            final_byte,
            ..Default::default()
        }
    }

    #[test]
    fn test_param_defaults() {
        let action = csi(&[0, 7], b'H');
        assert_eq!(action.param(0, 1), 0);
        assert_eq!(action.param(1, 1), 7);
        assert_eq!(action.param(5, 3), 3);
        assert_eq!(action.param_or_default(0, 1), 1);
        assert_eq!(action.param_or_default(1, 1), 7);
        assert_eq!(action.param_or_default(9, 4), 4);
    }

    #[test]
    fn test_sgr_empty_is_reset() {
        assert_eq!(csi(&[], b'm').parse_sgr(), vec![SgrAttribute::Reset]);
    }

    #[test]
    fn test_sgr_extended_colors() {
        let attrs = csi(&[1, 38, 2, 300, 128, 0, 48, 5, 17, 4], b'm').parse_sgr();
        assert_eq!(
            attrs,
            vec![
                SgrAttribute::Bold,
                SgrAttribute::Foreground(ColorSpec::Rgb(255, 128, 0)),
                SgrAttribute::Background(ColorSpec::Indexed(17)),
                SgrAttribute::Underline,
            ]
        );
    }

    #[test]
    fn test_sgr_truncated_extended_color_is_skipped() {
        let attrs = csi(&[38, 2, 10, 3], b'm').parse_sgr();
        // The leftovers are read as plain codes: faint, unknown, italic
        assert_eq!(attrs, vec![SgrAttribute::Faint, SgrAttribute::Italic]);
    }

    #[test]
    fn test_sgr_bright_and_default_colors() {
        let attrs = csi(&[91, 102, 39, 49], b'm').parse_sgr();
        assert_eq!(
            attrs,
            vec![
                SgrAttribute::Foreground(ColorSpec::Indexed(9)),
                SgrAttribute::Background(ColorSpec::Indexed(10)),
                SgrAttribute::Foreground(ColorSpec::Default),
                SgrAttribute::Background(ColorSpec::Default),
            ]
        );
    }

    #[test]
    fn test_actions_serialize() {
        let action = Action::CsiDispatch(CsiAction {
            params: vec![1049],
            final_byte: b'l',
            private: true,
            ..Default::default()
        });
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(serde_json::from_str::<Action>(&json).unwrap(), action);
    }
}
