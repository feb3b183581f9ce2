//! Sector-relative storage access.
//!
//! Every backend call made by the log goes through here, translated from
//! an [`Address`] to a backend offset.

use tracing::debug;

use crate::backend::StorageBackend;
use crate::error::Result;

use super::{Address, Ate, AteSlot, Store, MAX_ATE_SIZE};

/// Scratch buffer size for chunked comparisons
const CHUNK: usize = 64;

impl<B: StorageBackend> Store<B> {
    pub(crate) fn read_at(&self, addr: Address, buf: &mut [u8]) -> Result<()> {
        self.backend.read(self.layout.physical(addr), buf)?;
        Ok(())
    }

    /// Writes `data` at `addr`, padding the final block with the erase value.
    pub(crate) fn write_aligned(&mut self, addr: Address, data: &[u8]) -> Result<()> {
        let wbs = self.layout.write_block_size as usize;
        let body = data.len() - data.len() % wbs;
        let offset = self.layout.physical(addr);

        if body > 0 {
            self.backend.write(offset, &data[..body])?;
        }

        let tail = &data[body..];
        if !tail.is_empty() {
            let mut block = [self.layout.erase_value; MAX_ATE_SIZE];
            block[..tail.len()].copy_from_slice(tail);
            self.backend.write(offset + body as u64, &block[..wbs])?;
        }
        Ok(())
    }

    pub(crate) fn read_ate(&self, addr: Address) -> Result<AteSlot> {
        let mut raw = [0u8; MAX_ATE_SIZE];
        let raw = &mut raw[..self.layout.ate_size as usize];
        self.read_at(addr, raw)?;
        Ok(AteSlot::parse(raw, &self.layout))
    }

    /// Programs one ATE slot in a single backend write.
    pub(crate) fn write_ate(&mut self, addr: Address, ate: &Ate) -> Result<()> {
        let encoded = ate.encode()?;
        let mut slot = [self.layout.erase_value; MAX_ATE_SIZE];
        slot[..encoded.len()].copy_from_slice(&encoded);
        let len = self.layout.ate_size as usize;
        self.backend.write(self.layout.physical(addr), &slot[..len])?;
        Ok(())
    }

    /// Whether `len` bytes starting at `addr` all hold the erase value.
    pub(crate) fn is_erased(&self, addr: Address, len: u32) -> Result<bool> {
        let mut buf = [0u8; CHUNK];
        let mut done = 0;
        while done < len {
            let n = (len - done).min(CHUNK as u32) as usize;
            self.read_at(addr.up(done), &mut buf[..n])?;
            if buf[..n].iter().any(|&b| b != self.layout.erase_value) {
                return Ok(false);
            }
            done += n as u32;
        }
        Ok(true)
    }

    /// Whether the bytes stored at `addr` equal `data`.
    pub(crate) fn data_matches(&self, addr: Address, data: &[u8]) -> Result<bool> {
        let mut buf = [0u8; CHUNK];
        for (i, expected) in data.chunks(CHUNK).enumerate() {
            let stored = &mut buf[..expected.len()];
            self.read_at(addr.up((i * CHUNK) as u32), stored)?;
            if stored != expected {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) fn erase_sector(&mut self, sector: u16) -> Result<()> {
        debug!(sector, "erasing sector");
        let offset = self.layout.physical(self.layout.base(sector));
        self.backend.erase(offset, self.layout.sector_size as usize)?;
        if let Some(cache) = self.cache.as_mut() {
            cache.invalidate_sector(sector);
        }
        Ok(())
    }
}
