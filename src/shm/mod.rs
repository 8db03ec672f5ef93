//! Shared grid replication
//!
//! A named POSIX shared-memory region holding two complete copies of the
//! grid. The server writes the slot readers are not looking at, then flips
//! an atomic index to publish it. Readers never take a lock: they read the
//! active index, copy the slot, and check the slot's write guard to detect
//! the rare case of being lapped by two swaps during the copy.

mod layout;
mod reader;

pub use layout::{BufferHeader, FrameMeta, ShmLayout, CELL_SIZE, HEADER_SIZE};
pub use reader::SharedGridReader;

use std::ffi::c_void;
use std::fs::File;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use tracing::{debug, info};

use crate::core::Grid;
use layout::{ACTIVE_OFFSET, COLS_OFFSET, GUARD_OFFSETS, MAGIC, MAGIC_OFFSET, ROWS_OFFSET, VERSION, VERSION_OFFSET};

/// Error type for shared grid operations
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("Invalid shared memory name {0:?}: must start with '/' and contain no other '/'")]
    InvalidName(String),

    #[error("Shared memory region {0} already exists")]
    AlreadyExists(String),

    #[error("Failed to open shared memory region {name}: {source}")]
    Open {
        name: String,
        #[source]
        source: Errno,
    },

    #[error("Failed to size shared memory region: {0}")]
    Size(#[source] std::io::Error),

    #[error("Failed to map shared memory region: {0}")]
    Map(#[source] Errno),

    #[error("Failed to unlink shared memory region {name}: {source}")]
    Unlink {
        name: String,
        #[source]
        source: Errno,
    },

    #[error("Invalid grid geometry {cols}x{rows}")]
    InvalidGeometry { cols: usize, rows: usize },

    #[error("Grid is {found_cols}x{found_rows} but the region holds {cols}x{rows}")]
    GeometryMismatch {
        cols: usize,
        rows: usize,
        found_cols: usize,
        found_rows: usize,
    },

    #[error("Region has bad magic {0:#010x}")]
    BadMagic(u32),

    #[error("Unsupported region version {0}")]
    UnsupportedVersion(u32),

    #[error("Region is {actual} bytes, expected at least {expected}")]
    TooSmall { expected: usize, actual: usize },

    #[error("No consistent frame after {0} attempts")]
    Contended(usize),
}

pub type ShmResult<T> = Result<T, ShmError>;

impl ShmError {
    /// Errors a reader sees while the server is still setting the region up
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ShmError::Open {
                source: Errno::ENOENT,
                ..
            } | ShmError::BadMagic(_)
                | ShmError::TooSmall { .. }
        )
    }
}

/// Largest dimension accepted for a shared grid
pub const MAX_DIMENSION: usize = 4096;

/// Check a region name: one leading '/', no other '/'
pub fn validate_name(name: &str) -> ShmResult<()> {
    let valid = name.len() > 1 && name.starts_with('/') && !name[1..].contains('/') && !name.contains('\0');
    if valid {
        Ok(())
    } else {
        Err(ShmError::InvalidName(name.to_string()))
    }
}

/// Remove a region by name. A missing region is not an error.
pub fn unlink(name: &str) -> ShmResult<()> {
    validate_name(name)?;
    match shm_unlink(name) {
        Ok(()) | Err(Errno::ENOENT) => Ok(()),
        Err(source) => Err(ShmError::Unlink {
            name: name.to_string(),
            source,
        }),
    }
}

/// A mapped view of a region; unmapped on drop
struct Mapping {
    ptr: NonNull<c_void>,
    len: usize,
}

// SAFETY: the mapping is plain shared memory; all cross-process access goes
// through atomics or is guarded by the slot protocol
unsafe impl Send for Mapping {}

impl Mapping {
    fn new(file: &File, len: usize, writable: bool) -> ShmResult<Self> {
        let length = NonZeroUsize::new(len).ok_or(ShmError::TooSmall { expected: 1, actual: 0 })?;
        let prot = if writable {
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE
        } else {
            ProtFlags::PROT_READ
        };
        // SAFETY: a fresh shared mapping at an address chosen by the kernel
        let ptr = unsafe { mmap(None, length, prot, MapFlags::MAP_SHARED, file, 0) }.map_err(ShmError::Map)?;
        Ok(Self { ptr, len })
    }

    fn base(&self) -> *mut u8 {
        self.ptr.as_ptr().cast()
    }

    fn read_u32(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.len);
        // SAFETY: in bounds and 4-byte aligned (page-aligned base, fixed offsets)
        unsafe { self.base().add(offset).cast::<u32>().read_volatile() }
    }

    fn atomic_u32(&self, offset: usize) -> &AtomicU32 {
        debug_assert!(offset + 4 <= self.len && offset % 4 == 0);
        // SAFETY: in bounds, aligned, and only ever accessed atomically
        unsafe { &*self.base().add(offset).cast::<AtomicU32>() }
    }

    fn atomic_u64(&self, offset: usize) -> &AtomicU64 {
        debug_assert!(offset + 8 <= self.len && offset % 8 == 0);
        // SAFETY: in bounds, aligned, and only ever accessed atomically
        unsafe { &*self.base().add(offset).cast::<AtomicU64>() }
    }

    /// Copy `dst.len()` bytes out of the region at `offset`
    fn copy_out(&self, offset: usize, dst: &mut [u8]) {
        assert!(offset + dst.len() <= self.len, "read past end of shared region");
        // SAFETY: bounds checked above; the destination is private memory
        unsafe { std::ptr::copy_nonoverlapping(self.base().add(offset), dst.as_mut_ptr(), dst.len()) }
    }

    /// Copy `src` into the region at `offset`
    fn copy_in(&mut self, offset: usize, src: &[u8]) {
        assert!(offset + src.len() <= self.len, "write past end of shared region");
        // SAFETY: bounds checked above; only the writer maps the region writable
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), self.base().add(offset), src.len()) }
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.copy_in(offset, &value.to_ne_bytes());
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap
        let _ = unsafe { munmap(self.ptr, self.len) };
    }
}

/// Frame state: nothing written yet
pub struct Blank;
/// Frame state: cells are in the back slot, header is not
pub struct CellsCopied;
/// Frame state: cells and header are in the back slot
pub struct Complete;

/// A frame being written into the back slot.
///
/// Only a `Frame<Complete>` can be published, so a reader can never be
/// handed a slot whose header and cells come from different frames.
#[must_use = "a frame is only visible to readers after swap_buffers"]
pub struct Frame<'a, S> {
    grid: &'a mut SharedGrid,
    slot: usize,
    _state: PhantomData<S>,
}

impl<'a> Frame<'a, Blank> {
    /// Copy the whole cell array into the back slot
    pub fn copy_from_grid(self, grid: &Grid) -> ShmResult<Frame<'a, CellsCopied>> {
        let layout = self.grid.layout;
        if grid.cols() != layout.cols || grid.rows() != layout.rows {
            return Err(ShmError::GeometryMismatch {
                cols: layout.cols,
                rows: layout.rows,
                found_cols: grid.cols(),
                found_rows: grid.rows(),
            });
        }
        let bytes: &[u8] = bytemuck::cast_slice(grid.cells());
        self.grid.mapping.copy_in(layout.cells_offset(self.slot), bytes);
        Ok(Frame {
            grid: self.grid,
            slot: self.slot,
            _state: PhantomData,
        })
    }
}

impl<'a> Frame<'a, CellsCopied> {
    /// Fill the back slot's header; the sequence number is assigned here
    pub fn update_back_buffer(self, meta: FrameMeta) -> Frame<'a, Complete> {
        let seq = self.grid.seq + 1;
        let header = BufferHeader::new(seq, &meta);
        let offset = self.grid.layout.header_offset(self.slot);
        self.grid.mapping.copy_in(offset, bytemuck::bytes_of(&header));
        Frame {
            grid: self.grid,
            slot: self.slot,
            _state: PhantomData,
        }
    }
}

impl Frame<'_, Complete> {
    /// Publish the back slot and return its sequence number
    pub fn swap_buffers(self) -> u64 {
        let mapping = &self.grid.mapping;
        // Close the write: guard becomes even again
        mapping.atomic_u64(GUARD_OFFSETS[self.slot]).fetch_add(1, Ordering::Release);
        mapping.atomic_u32(ACTIVE_OFFSET).store(self.slot as u32, Ordering::Release);
        self.grid.active = self.slot;
        self.grid.seq += 1;
        self.grid.seq
    }
}

/// Writer side of a shared grid region.
///
/// Owns the region: it is created exclusively and unlinked on drop.
pub struct SharedGrid {
    name: String,
    layout: ShmLayout,
    mapping: Mapping,
    active: usize,
    seq: u64,
}

impl SharedGrid {
    /// Create a region for a `cols` x `rows` grid. Fails if `name` exists.
    pub fn create(name: &str, cols: usize, rows: usize) -> ShmResult<Self> {
        validate_name(name)?;
        if cols == 0 || rows == 0 || cols > MAX_DIMENSION || rows > MAX_DIMENSION {
            return Err(ShmError::InvalidGeometry { cols, rows });
        }
        let layout = ShmLayout::new(cols, rows);

        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::from_bits_truncate(0o644),
        )
        .map_err(|source| match source {
            Errno::EEXIST => ShmError::AlreadyExists(name.to_string()),
            source => ShmError::Open {
                name: name.to_string(),
                source,
            },
        })?;
        let file = File::from(fd);

        let mapping = match file
            .set_len(layout.total_size() as u64)
            .map_err(ShmError::Size)
            .and_then(|_| Mapping::new(&file, layout.total_size(), true))
        {
            Ok(mapping) => mapping,
            Err(e) => {
                let _ = shm_unlink(name);
                return Err(e);
            }
        };

        let mut grid = Self {
            name: name.to_string(),
            layout,
            mapping,
            active: 0,
            seq: 0,
        };
        grid.mapping.write_u32(VERSION_OFFSET, VERSION);
        grid.mapping.write_u32(COLS_OFFSET, cols as u32);
        grid.mapping.write_u32(ROWS_OFFSET, rows as u32);
        grid.mapping.atomic_u32(ACTIVE_OFFSET).store(0, Ordering::Relaxed);
        // Magic last: a reader that sees it sees a complete control block
        fence(Ordering::Release);
        grid.mapping.atomic_u32(MAGIC_OFFSET).store(MAGIC, Ordering::Release);

        info!(name, cols, rows, bytes = layout.total_size(), "shared grid created");
        Ok(grid)
    }

    /// Continue numbering frames after `seq`, e.g. from a region this one
    /// replaces
    pub fn with_start_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cols(&self) -> usize {
        self.layout.cols
    }

    pub fn rows(&self) -> usize {
        self.layout.rows
    }

    pub fn layout(&self) -> ShmLayout {
        self.layout
    }

    /// Sequence number of the last published frame (0 before the first)
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Header of the slot readers currently see
    pub fn active_buffer_header(&self) -> BufferHeader {
        let mut header = BufferHeader::default();
        let offset = self.layout.header_offset(self.active);
        self.mapping.copy_out(offset, bytemuck::bytes_of_mut(&mut header));
        header
    }

    /// Start writing the back slot
    pub fn begin_frame(&mut self) -> Frame<'_, Blank> {
        let slot = 1 - self.active;
        let guard = self.mapping.atomic_u64(GUARD_OFFSETS[slot]);
        // An abandoned frame leaves the guard odd already
        if guard.load(Ordering::Relaxed) % 2 == 0 {
            guard.fetch_add(1, Ordering::Relaxed);
        }
        fence(Ordering::Release);
        Frame {
            grid: self,
            slot,
            _state: PhantomData,
        }
    }

    /// Copy, describe and publish a grid in one go
    pub fn publish(&mut self, grid: &Grid, meta: FrameMeta) -> ShmResult<u64> {
        let seq = self
            .begin_frame()
            .copy_from_grid(grid)?
            .update_back_buffer(meta)
            .swap_buffers();
        debug!(seq, full = meta.full_damage, "frame published");
        Ok(seq)
    }
}

impl Drop for SharedGrid {
    fn drop(&mut self) {
        if let Err(e) = unlink(&self.name) {
            tracing::warn!(error = %e, "failed to unlink shared grid");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Cell, CursorState, DamageRect};

    pub(crate) fn unique_name(tag: &str) -> String {
        use std::sync::atomic::AtomicUsize;
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        format!(
            "/gridmux-test-{}-{}-{}",
            tag,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("/gridmux-grid-0").is_ok());
        assert!(validate_name("gridmux").is_err());
        assert!(validate_name("/a/b").is_err());
        assert!(validate_name("/").is_err());
    }

    #[test]
    fn test_create_is_exclusive() {
        let name = unique_name("excl");
        let _grid = SharedGrid::create(&name, 10, 4).unwrap();
        assert!(matches!(
            SharedGrid::create(&name, 10, 4),
            Err(ShmError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_drop_unlinks() {
        let name = unique_name("drop");
        drop(SharedGrid::create(&name, 10, 4).unwrap());
        let again = SharedGrid::create(&name, 10, 4);
        assert!(again.is_ok());
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let name = unique_name("geom");
        assert!(matches!(
            SharedGrid::create(&name, 0, 4),
            Err(ShmError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_swap_flips_slot_and_bumps_seq() {
        let name = unique_name("swap");
        let mut shm = SharedGrid::create(&name, 4, 2).unwrap();
        assert_eq!(shm.active_buffer_header().seq, 0);

        let mut grid = Grid::new(4, 2);
        grid.write(1, 1, Cell::new('z'));
        let meta = FrameMeta {
            cursor: CursorState { row: 1, col: 2, visible: true },
            damage: DamageRect::cell(1, 1),
            ..FrameMeta::default()
        };
        let seq = shm.publish(&grid, meta).unwrap();
        assert_eq!(seq, 1);
        assert_eq!(shm.active_buffer_header().seq, 1);
        assert_eq!(shm.active_buffer_header().cursor(), meta.cursor);

        let seq = shm.publish(&grid, meta).unwrap();
        assert_eq!(seq, 2);
    }

    #[test]
    fn test_copy_rejects_wrong_geometry() {
        let name = unique_name("mismatch");
        let mut shm = SharedGrid::create(&name, 4, 2).unwrap();
        let grid = Grid::new(5, 2);
        assert!(matches!(
            shm.begin_frame().copy_from_grid(&grid),
            Err(ShmError::GeometryMismatch { .. })
        ));
        // The abandoned frame does not disturb the next one
        assert_eq!(shm.publish(&Grid::new(4, 2), FrameMeta::default()).unwrap(), 1);
    }
}
