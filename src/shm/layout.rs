//! Fixed byte layout of the shared grid region
//!
//! ```text
//! 0        control block (64 bytes)
//!            0  magic        u32
//!            4  version      u32
//!            8  cols         u32
//!           12  rows         u32
//!           16  active slot  AtomicU32
//!           24  slot 0 guard AtomicU64 (odd while the slot is written)
//!           32  slot 1 guard AtomicU64
//! 64       slot 0: BufferHeader (40 bytes) + rows*cols cells (12 bytes each)
//! 64+S     slot 1
//! ```
//!
//! Each slot size `S` is rounded up to 8 bytes so both headers and guards
//! stay naturally aligned.

use bytemuck::{Pod, Zeroable};

use crate::core::{Cell, CursorState, DamageRect};

/// "GMUX" in little-endian
pub const MAGIC: u32 = 0x5855_4d47;
pub const VERSION: u32 = 1;

pub const CONTROL_SIZE: usize = 64;
pub const MAGIC_OFFSET: usize = 0;
pub const VERSION_OFFSET: usize = 4;
pub const COLS_OFFSET: usize = 8;
pub const ROWS_OFFSET: usize = 12;
pub const ACTIVE_OFFSET: usize = 16;
pub const GUARD_OFFSETS: [usize; 2] = [24, 32];

pub const HEADER_SIZE: usize = std::mem::size_of::<BufferHeader>();
pub const CELL_SIZE: usize = std::mem::size_of::<Cell>();

/// Per-slot frame metadata, stored verbatim in shared memory
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct BufferHeader {
    pub seq: u64,
    pub cursor_row: u32,
    pub cursor_col: u32,
    pub cursor_visible: u8,
    pub alt_screen: u8,
    pub full_damage: u8,
    _pad: u8,
    pub damage_start_row: u32,
    pub damage_start_col: u32,
    pub damage_end_row: u32,
    pub damage_end_col: u32,
    pub scroll_offset: i32,
}

/// What the writer knows about a frame besides its cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMeta {
    pub cursor: CursorState,
    pub alt_screen: bool,
    pub full_damage: bool,
    pub damage: DamageRect,
    pub scroll_offset: i32,
}

fn to_u32(v: usize) -> u32 {
    v.min(u32::MAX as usize) as u32
}

impl BufferHeader {
    pub fn new(seq: u64, meta: &FrameMeta) -> Self {
        Self {
            seq,
            cursor_row: to_u32(meta.cursor.row),
            cursor_col: to_u32(meta.cursor.col),
            cursor_visible: meta.cursor.visible as u8,
            alt_screen: meta.alt_screen as u8,
            full_damage: meta.full_damage as u8,
            _pad: 0,
            damage_start_row: to_u32(meta.damage.start_row),
            damage_start_col: to_u32(meta.damage.start_col),
            damage_end_row: to_u32(meta.damage.end_row),
            damage_end_col: to_u32(meta.damage.end_col),
            scroll_offset: meta.scroll_offset,
        }
    }

    pub fn cursor(&self) -> CursorState {
        CursorState {
            row: self.cursor_row as usize,
            col: self.cursor_col as usize,
            visible: self.cursor_visible != 0,
        }
    }

    pub fn damage(&self) -> DamageRect {
        DamageRect::new(
            self.damage_start_row as usize,
            self.damage_start_col as usize,
            self.damage_end_row as usize,
            self.damage_end_col as usize,
        )
    }

    pub fn is_full_damage(&self) -> bool {
        self.full_damage != 0
    }

    pub fn is_alt_screen(&self) -> bool {
        self.alt_screen != 0
    }

    pub fn meta(&self) -> FrameMeta {
        FrameMeta {
            cursor: self.cursor(),
            alt_screen: self.is_alt_screen(),
            full_damage: self.is_full_damage(),
            damage: self.damage(),
            scroll_offset: self.scroll_offset,
        }
    }
}

/// Offsets of a region holding a `cols` x `rows` grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmLayout {
    pub cols: usize,
    pub rows: usize,
}

impl ShmLayout {
    pub fn new(cols: usize, rows: usize) -> Self {
        Self { cols, rows }
    }

    pub fn cell_count(&self) -> usize {
        self.cols * self.rows
    }

    pub fn cells_len(&self) -> usize {
        self.cell_count() * CELL_SIZE
    }

    pub fn slot_size(&self) -> usize {
        (HEADER_SIZE + self.cells_len()).next_multiple_of(8)
    }

    pub fn header_offset(&self, slot: usize) -> usize {
        CONTROL_SIZE + slot * self.slot_size()
    }

    pub fn cells_offset(&self, slot: usize) -> usize {
        self.header_offset(slot) + HEADER_SIZE
    }

    pub fn total_size(&self) -> usize {
        CONTROL_SIZE + 2 * self.slot_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_sizes() {
        assert_eq!(HEADER_SIZE, 40);
        assert_eq!(CELL_SIZE, 12);
        assert_eq!(std::mem::align_of::<BufferHeader>(), 8);
    }

    #[test]
    fn test_slots_are_aligned() {
        // 3 cells = 36 bytes, 76 with the header, padded to 80
        let layout = ShmLayout::new(3, 1);
        assert_eq!(layout.slot_size(), 80);
        assert_eq!(layout.header_offset(0), 64);
        assert_eq!(layout.header_offset(1), 144);
        assert_eq!(layout.cells_offset(1), 184);
        assert_eq!(layout.total_size(), 224);
        assert!(GUARD_OFFSETS.iter().all(|o| o % 8 == 0));
    }

    #[test]
    fn test_header_roundtrips_meta() {
        let meta = FrameMeta {
            cursor: CursorState { row: 3, col: 7, visible: true },
            alt_screen: true,
            full_damage: false,
            damage: DamageRect::new(2, 2, 4, 4),
            scroll_offset: -1,
        };
        let header = BufferHeader::new(9, &meta);
        assert_eq!(header.seq, 9);
        assert_eq!(header.meta(), meta);
    }
}
