//! Sector Log Module
//!
//! The on-storage format and every algorithm that touches it.
//!
//! ## Responsibilities
//! - Sector geometry and address arithmetic
//! - Appending data records and their allocation table entries (ATEs)
//! - Walking the ATE log backward in time
//! - Mount-time recovery of write addresses and interrupted compactions
//! - Garbage collection of the oldest sector into the active one
//! - Free space accounting
//!
//! ## Sector Format
//! ```text
//! offset 0                                               sector_size
//! ┌──────────────────────────────┬──────────────┬───────┬──────┬──────┐
//! │ data 0 │ data 1 │ ...  ──►   │    ◄── ...   │ ATE 1 │ ATE 0│ close│
//! └──────────────────────────────┴──────────────┴───────┴──────┴──────┘
//!            data_wra ▲                ▲ ate_wra
//! ```
//! ATE 0 of a sector is normally the gc-done marker. Sectors form a ring;
//! the sector after the active one is always kept erased so a compaction
//! target exists.
//!
//! ## ATE Format
//! ```text
//! ┌────────┬────────────┬─────────┬──────────┬──────────────┬──────────┬─────────┐
//! │ id (2) │ offset (2) │ len (2) │ kind (1) │ reserved (1) │ CRC (4)  │ padding │
//! └────────┴────────────┴─────────┴──────────┴──────────────┴──────────┴─────────┘
//! ```

mod address;
mod ate;
mod compaction;
mod io;
mod recovery;
mod space;
mod walker;
mod writer;

pub use address::Address;
pub(crate) use ate::{Ate, AteKind, AteSlot, ATE_RAW_SIZE, MAX_ATE_SIZE, RESERVED_ID};

use tracing::info;

use crate::backend::{StorageBackend, StorageParameters};
use crate::cache::LookupCache;
use crate::config::Config;
use crate::error::{NvsError, Result};

/// Offsets within a sector must fit the 16-bit ATE offset field
const MAX_SECTOR_SIZE: u32 = 0x1_0000;

/// Write blocks larger than this are not supported
const MAX_WRITE_BLOCK_SIZE: usize = MAX_ATE_SIZE;

/// Validated geometry of one file system instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Layout {
    pub offset: u64,
    pub sector_size: u32,
    pub sector_count: u16,
    pub ate_size: u32,
    pub write_block_size: u32,
    pub erase_value: u8,
}

impl Layout {
    /// Checks `config` against the backend and derives the geometry.
    pub fn new(config: &Config, params: &StorageParameters, backend_size: u64) -> Result<Self> {
        let invalid = |msg: String| Err(NvsError::InvalidArgument(msg));

        let wbs = params.write_block_size;
        if wbs == 0 || wbs > MAX_WRITE_BLOCK_SIZE {
            return invalid(format!("unsupported write block size {}", wbs));
        }
        if params.page_size == 0 || config.sector_size as usize % params.page_size != 0 {
            return invalid(format!(
                "sector size {} is not a multiple of page size {}",
                config.sector_size, params.page_size
            ));
        }
        if config.sector_size as usize % wbs != 0 {
            return invalid(format!(
                "sector size {} is not a multiple of write block size {}",
                config.sector_size, wbs
            ));
        }
        if config.sector_size > MAX_SECTOR_SIZE {
            return invalid(format!(
                "sector size {} exceeds {}",
                config.sector_size, MAX_SECTOR_SIZE
            ));
        }
        if config.sector_count < 2 {
            return invalid(format!("at least 2 sectors required, got {}", config.sector_count));
        }
        if config.offset % params.page_size as u64 != 0 {
            return invalid(format!("offset {:#x} is not page aligned", config.offset));
        }

        let ate_size = align_up(ATE_RAW_SIZE as u32, wbs as u32);
        if config.sector_size <= 4 * ate_size {
            return invalid(format!(
                "sector size {} leaves no room for data with {}-byte ATEs",
                config.sector_size, ate_size
            ));
        }

        let end = config.offset.checked_add(config.region_size());
        if end.map_or(true, |end| end > backend_size) {
            return invalid(format!(
                "region {:#x}+{:#x} exceeds backend size {:#x}",
                config.offset,
                config.region_size(),
                backend_size
            ));
        }

        Ok(Self {
            offset: config.offset,
            sector_size: config.sector_size,
            sector_count: config.sector_count,
            ate_size,
            write_block_size: wbs as u32,
            erase_value: params.erase_value,
        })
    }

    /// Rounds `len` up to the write block size.
    pub fn align(&self, len: u32) -> u32 {
        align_up(len, self.write_block_size)
    }

    pub fn base(&self, sector: u16) -> Address {
        Address::new(sector, 0)
    }

    /// Slot reserved for the close marker.
    pub fn close_slot(&self, sector: u16) -> Address {
        Address::new(sector, self.sector_size - self.ate_size)
    }

    /// First regular ATE slot, directly below the close slot.
    pub fn first_slot(&self, sector: u16) -> Address {
        Address::new(sector, self.sector_size - 2 * self.ate_size)
    }

    pub fn next_sector(&self, sector: u16) -> u16 {
        (sector + 1) % self.sector_count
    }

    pub fn prev_sector(&self, sector: u16) -> u16 {
        if sector == 0 {
            self.sector_count - 1
        } else {
            sector - 1
        }
    }

    /// Backend byte offset of `addr`.
    pub fn physical(&self, addr: Address) -> u64 {
        self.offset
            + u64::from(addr.sector()) * u64::from(self.sector_size)
            + u64::from(addr.offset())
    }

    /// Largest record: a fresh sector minus close, gc-done, its own ATE and
    /// one spare slot.
    pub fn max_data_len(&self) -> usize {
        (self.sector_size - 4 * self.ate_size) as usize
    }

    /// Bytes of a sector usable for entries (everything but the close and
    /// gc-done slots).
    pub fn sector_capacity(&self) -> u32 {
        self.sector_size - 2 * self.ate_size
    }

    /// Upper bound on the number of slots a full log walk can visit.
    pub fn total_slots(&self) -> usize {
        usize::from(self.sector_count) * (self.sector_size / self.ate_size) as usize
    }

    /// Structural sanity of a checksummed ATE.
    pub fn ate_in_bounds(&self, ate: &Ate) -> bool {
        match ate.kind {
            AteKind::Entry | AteKind::GcDone => ate.data_end() <= self.sector_capacity(),
            AteKind::Close => {
                let offset = u32::from(ate.offset);
                let first = self.first_slot(0).offset();
                offset <= first && (first - offset) % self.ate_size == 0
            }
        }
    }
}

fn align_up(len: u32, align: u32) -> u32 {
    len.div_ceil(align) * align
}

/// Write addresses of the active sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Cursor {
    /// Next free ATE slot; moves down
    pub ate_wra: Address,
    /// Next free data byte; moves up
    pub data_wra: Address,
}

impl Cursor {
    /// Write addresses of an empty sector.
    pub fn fresh(layout: &Layout, sector: u16) -> Self {
        Self {
            ate_wra: layout.first_slot(sector),
            data_wra: layout.base(sector),
        }
    }

    /// Bytes between the data head and the next ATE slot.
    pub fn free(&self) -> u32 {
        self.ate_wra.offset().saturating_sub(self.data_wra.offset())
    }
}

/// All mutable state of a file system instance; always accessed under the
/// instance lock.
pub(crate) struct Store<B> {
    pub backend: B,
    pub layout: Layout,
    pub cursor: Cursor,
    pub cache: Option<LookupCache>,
    pub ready: bool,
}

impl<B: StorageBackend> Store<B> {
    pub fn new(backend: B, layout: Layout, cache: Option<LookupCache>) -> Self {
        let cursor = Cursor::fresh(&layout, 0);
        Self {
            backend,
            layout,
            cursor,
            cache,
            ready: false,
        }
    }

    pub fn ensure_ready(&self) -> Result<()> {
        if self.ready {
            Ok(())
        } else {
            Err(NvsError::NotReady)
        }
    }

    /// Erases every sector and leaves the instance unmounted.
    pub fn clear(&mut self) -> Result<()> {
        self.ready = false;
        for sector in 0..self.layout.sector_count {
            self.erase_sector(sector)?;
        }
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }
        self.cursor = Cursor::fresh(&self.layout, 0);
        info!(sectors = self.layout.sector_count, "file system cleared");
        Ok(())
    }
}
