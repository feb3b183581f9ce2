//! Storage Backend Module
//!
//! The narrow interface the file system consumes from the underlying
//! device. Backends are **opaque byte stores**: they know nothing about
//! sectors, ATEs or ids, they only read, program and erase bytes.
//!
//! ## Responsibilities
//! - Synchronous read / write / erase over byte offsets
//! - Report fixed device parameters (write block size, erase value, page size)
//! - Either complete an operation or return a definitive error
//!
//! ## Available Backends
//! - [`MemoryFlash`] - RAM model of NOR/NAND flash, with fault injection
//! - [`MemoryEeprom`] - RAM model of an EEPROM with emulated erase
//! - [`FileFlash`] - flash image kept in a regular file

mod eeprom;
mod file;
mod memory;

use thiserror::Error;

pub use eeprom::MemoryEeprom;
pub use file::FileFlash;
pub use memory::MemoryFlash;

/// Result type for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Errors reported by a storage backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("access out of bounds: offset {offset}, len {len}, size {size}")]
    OutOfBounds { offset: u64, len: usize, size: u64 },

    #[error("misaligned {op}: offset {offset}, len {len}, alignment {align}")]
    Misaligned {
        op: &'static str,
        offset: u64,
        len: usize,
        align: usize,
    },

    #[error("power lost during {0}")]
    PowerLoss(&'static str),
}

/// Fixed parameters of a storage device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageParameters {
    /// Alignment and minimum size of a program operation
    pub write_block_size: usize,

    /// Byte value left behind by an erase
    pub erase_value: u8,

    /// Erase granularity; sector sizes must be a multiple of it
    pub page_size: usize,
}

impl StorageParameters {
    pub const fn new(write_block_size: usize, erase_value: u8, page_size: usize) -> Self {
        Self {
            write_block_size,
            erase_value,
            page_size,
        }
    }
}

impl Default for StorageParameters {
    fn default() -> Self {
        Self::new(4, 0xff, 4096)
    }
}

/// A synchronous storage device the file system runs on.
///
/// # Invariants
///
/// - `read` fills the whole buffer or fails
/// - `write` offsets and lengths are multiples of `write_block_size`
/// - `erase` offsets and lengths are multiples of `page_size`
/// - After a successful `erase`, every byte in the range reads as `erase_value`
/// - A failed call has no effect, except when power is lost mid-operation
pub trait StorageBackend: Send {
    /// Reads `buf.len()` bytes starting at `offset`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> BackendResult<()>;

    /// Programs `data` at `offset`.
    fn write(&mut self, offset: u64, data: &[u8]) -> BackendResult<()>;

    /// Erases `len` bytes starting at `offset`.
    fn erase(&mut self, offset: u64, len: usize) -> BackendResult<()>;

    /// Device parameters.
    fn parameters(&self) -> &StorageParameters;

    /// Total addressable size in bytes.
    fn size(&self) -> u64;
}

/// Returns the start index of `offset..offset + len` if it fits in `size`.
pub(crate) fn check_bounds(offset: u64, len: usize, size: u64) -> BackendResult<usize> {
    match offset.checked_add(len as u64) {
        Some(end) if end <= size => Ok(offset as usize),
        _ => Err(BackendError::OutOfBounds { offset, len, size }),
    }
}

pub(crate) fn check_alignment(
    op: &'static str,
    offset: u64,
    len: usize,
    align: usize,
) -> BackendResult<()> {
    let align = align.max(1);
    if offset % align as u64 != 0 || len % align != 0 {
        return Err(BackendError::Misaligned {
            op,
            offset,
            len,
            align,
        });
    }
    Ok(())
}
