//! Read-only client mapping of a shared grid

use std::fs::File;
use std::sync::atomic::{fence, Ordering};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::shm_open;
use nix::sys::stat::Mode;
use tracing::{debug, trace};

use super::layout::{ACTIVE_OFFSET, COLS_OFFSET, GUARD_OFFSETS, MAGIC, MAGIC_OFFSET, ROWS_OFFSET, VERSION, VERSION_OFFSET};
use super::{validate_name, BufferHeader, Mapping, ShmError, ShmLayout, ShmResult, MAX_DIMENSION};
use crate::core::{Cell, Grid};

/// Attempts at a consistent copy before giving up
const MAX_READ_ATTEMPTS: usize = 64;

/// Reader side of a shared grid region
pub struct SharedGridReader {
    name: String,
    layout: ShmLayout,
    mapping: Mapping,
}

impl SharedGridReader {
    /// Map an existing region read-only and check its control block
    pub fn open(name: &str) -> ShmResult<Self> {
        validate_name(name)?;
        let fd = shm_open(name, OFlag::O_RDONLY, Mode::empty()).map_err(|source| ShmError::Open {
            name: name.to_string(),
            source,
        })?;
        let file = File::from(fd);
        let actual = file.metadata().map_err(ShmError::Size)?.len() as usize;
        if actual < super::layout::CONTROL_SIZE {
            return Err(ShmError::TooSmall {
                expected: super::layout::CONTROL_SIZE,
                actual,
            });
        }

        let mapping = Mapping::new(&file, actual, false)?;
        let magic = mapping.atomic_u32(MAGIC_OFFSET).load(Ordering::Acquire);
        if magic != MAGIC {
            return Err(ShmError::BadMagic(magic));
        }
        let version = mapping.read_u32(VERSION_OFFSET);
        if version != VERSION {
            return Err(ShmError::UnsupportedVersion(version));
        }
        let cols = mapping.read_u32(COLS_OFFSET) as usize;
        let rows = mapping.read_u32(ROWS_OFFSET) as usize;
        if cols == 0 || rows == 0 || cols > MAX_DIMENSION || rows > MAX_DIMENSION {
            return Err(ShmError::InvalidGeometry { cols, rows });
        }
        let layout = ShmLayout::new(cols, rows);
        if actual < layout.total_size() {
            return Err(ShmError::TooSmall {
                expected: layout.total_size(),
                actual,
            });
        }

        debug!(name, cols, rows, "shared grid attached");
        Ok(Self {
            name: name.to_string(),
            layout,
            mapping,
        })
    }

    /// Retry `open` while the server is still creating the region
    pub fn open_when_ready(name: &str, attempts: usize) -> ShmResult<Self> {
        let mut last = None;
        for _ in 0..attempts.max(1) {
            match Self::open(name) {
                Ok(reader) => return Ok(reader),
                Err(e) if e.is_transient() => last = Some(e),
                Err(e) => return Err(e),
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        Err(last.unwrap_or(ShmError::Contended(attempts)))
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

    fn active_slot(&self) -> usize {
        (self.mapping.atomic_u32(ACTIVE_OFFSET).load(Ordering::Acquire) & 1) as usize
    }

    /// Header of the slot currently marked active
    pub fn active_buffer_header(&self) -> BufferHeader {
        let mut header = BufferHeader::default();
        let offset = self.layout.header_offset(self.active_slot());
        self.mapping.copy_out(offset, bytemuck::bytes_of_mut(&mut header));
        header
    }

    /// Copy the active frame into `cells`, returning its header.
    ///
    /// The slot guard is read before and after the copy; a change means the
    /// writer reused the slot meanwhile and the copy is retried.
    pub fn read_frame(&self, cells: &mut Vec<Cell>) -> ShmResult<BufferHeader> {
        cells.resize(self.layout.cell_count(), Cell::default());
        for attempt in 0..MAX_READ_ATTEMPTS {
            let slot = self.active_slot();
            let guard = self.mapping.atomic_u64(GUARD_OFFSETS[slot]);
            let before = guard.load(Ordering::Acquire);
            if before % 2 == 1 {
                std::thread::yield_now();
                continue;
            }

            let mut header = BufferHeader::default();
            self.mapping
                .copy_out(self.layout.header_offset(slot), bytemuck::bytes_of_mut(&mut header));
            self.mapping
                .copy_out(self.layout.cells_offset(slot), bytemuck::cast_slice_mut(cells.as_mut_slice()));

            fence(Ordering::Acquire);
            if guard.load(Ordering::Relaxed) == before {
                return Ok(header);
            }
            trace!(attempt, "frame changed during copy, retrying");
        }
        Err(ShmError::Contended(MAX_READ_ATTEMPTS))
    }

    /// Copy the active frame into `grid`, resizing it if needed
    pub fn read_into_grid(&self, grid: &mut Grid) -> ShmResult<BufferHeader> {
        let mut cells = Vec::with_capacity(self.layout.cell_count());
        let header = self.read_frame(&mut cells)?;
        if grid.cols() != self.cols() || grid.rows() != self.rows() {
            *grid = Grid::new(self.cols(), self.rows());
        }
        grid.cells_mut().copy_from_slice(&cells);
        Ok(header)
    }

    /// The active frame as a new grid
    pub fn snapshot(&self) -> ShmResult<(BufferHeader, Grid)> {
        let mut grid = Grid::new(self.cols(), self.rows());
        let header = self.read_into_grid(&mut grid)?;
        Ok((header, grid))
    }
}
