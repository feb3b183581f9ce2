//! Sector-relative addresses.

use std::fmt;

/// A position inside the sector ring: sector index plus byte offset
/// within that sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    sector: u16,
    offset: u32,
}

impl Address {
    pub const fn new(sector: u16, offset: u32) -> Self {
        Self { sector, offset }
    }

    /// Sector index in the ring
    pub const fn sector(self) -> u16 {
        self.sector
    }

    /// Byte offset from the start of the sector
    pub const fn offset(self) -> u32 {
        self.offset
    }

    /// Same sector, `n` bytes higher.
    pub(crate) const fn up(self, n: u32) -> Self {
        Self::new(self.sector, self.offset + n)
    }

    /// Same sector, `n` bytes lower. Callers keep the offset non-negative.
    pub(crate) const fn down(self, n: u32) -> Self {
        Self::new(self.sector, self.offset - n)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#06x}", self.sector, self.offset)
    }
}
