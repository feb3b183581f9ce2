//! Appending entries.
//!
//! Data goes in first, then the ATE that makes it visible. A failed append
//! never exposes half an entry: the write addresses skip whatever it may
//! have programmed, exactly as the next mount would, and the instance stays
//! usable.

use tracing::{debug, error, warn};

use crate::backend::StorageBackend;
use crate::error::{NvsError, Result};

use super::{Address, Ate, Cursor, Store, RESERVED_ID};

impl<B: StorageBackend> Store<B> {
    /// Stores `data` as the newest version of `id`; an empty slice deletes.
    ///
    /// Returns the number of bytes written, or 0 when the stored value
    /// already matches and nothing was written.
    pub(crate) fn write_entry(&mut self, id: u16, data: &[u8]) -> Result<usize> {
        if id == RESERVED_ID {
            return Err(NvsError::InvalidArgument(format!("id {:#06x} is reserved", id)));
        }
        if data.len() > self.layout.max_data_len() {
            return Err(NvsError::InvalidArgument(format!(
                "{} bytes exceeds the {}-byte record limit",
                data.len(),
                self.layout.max_data_len()
            )));
        }

        match self.lookup(id)? {
            Some((addr, latest)) => {
                if data.is_empty() {
                    if latest.is_delete() {
                        return Ok(0);
                    }
                } else if usize::from(latest.len) == data.len()
                    && self.data_matches(latest.data_address(addr.sector()), data)?
                {
                    return Ok(0);
                }
            }
            // Nothing to delete
            None if data.is_empty() => return Ok(0),
            None => {}
        }

        let required = self.required_space(data.len());
        self.reserve(required)?;

        if let Err(err) = self.append(id, data) {
            warn!(id, error = %err, "append failed, entry discarded");
            return Err(err);
        }
        Ok(data.len())
    }

    /// Space an entry of `len` bytes consumes, ATE included.
    pub(crate) fn required_space(&self, len: usize) -> u32 {
        self.layout.align(len as u32) + self.layout.ate_size
    }

    /// Makes room for `required` bytes in the active sector, closing
    /// sectors and collecting garbage as needed.
    fn reserve(&mut self, required: u32) -> Result<()> {
        for _ in 0..self.layout.sector_count {
            if self.cursor.free() >= required {
                return Ok(());
            }
            if let Err(err) = self.close_sector().and_then(|()| self.collect_garbage()) {
                self.ready = false;
                error!(error = %err, "garbage collection aborted, remount required");
                return Err(err);
            }
        }

        if self.cursor.free() >= required {
            Ok(())
        } else {
            Err(NvsError::NoSpace)
        }
    }

    /// Writes data and ATE at the write addresses and returns the ATE
    /// address. The caller has checked that the entry fits.
    pub(crate) fn append(&mut self, id: u16, data: &[u8]) -> Result<Address> {
        if self.cursor.free() < self.required_space(data.len()) {
            return Err(NvsError::NoSpace);
        }

        let Cursor { ate_wra: addr, data_wra } = self.cursor;
        let ate = Ate::entry(id, data_wra.offset(), data.len());
        let next = Cursor {
            ate_wra: addr.down(self.layout.ate_size),
            data_wra: data_wra.up(self.layout.align(data.len() as u32)),
        };

        if !data.is_empty() {
            if let Err(err) = self.write_aligned(data_wra, data) {
                // Part of the record may be on storage; never program it twice.
                self.cursor.data_wra = next.data_wra;
                return Err(err);
            }
        }

        // A torn ATE reads back as invalid and is skipped by every walk.
        let written = self.write_ate(addr, &ate);
        self.cursor = next;
        written?;

        if let Some(cache) = self.cache.as_mut() {
            cache.insert(id, addr);
        }
        Ok(addr)
    }

    /// Writes a marker ATE at the ATE write address.
    pub(crate) fn append_marker(&mut self, ate: &Ate) -> Result<()> {
        let addr = self.cursor.ate_wra;
        self.write_ate(addr, ate)?;
        self.cursor.ate_wra = addr.down(self.layout.ate_size);
        Ok(())
    }

    /// Seals the active sector and moves the write addresses to the start
    /// of the next one.
    pub(crate) fn close_sector(&mut self) -> Result<()> {
        let sector = self.cursor.ate_wra.sector();
        let newest = self.cursor.ate_wra.up(self.layout.ate_size);

        self.write_ate(self.layout.close_slot(sector), &Ate::close(newest.offset()))?;

        let next = self.layout.next_sector(sector);
        self.cursor = Cursor::fresh(&self.layout, next);
        debug!(sector, next, "sector closed");
        Ok(())
    }
}
