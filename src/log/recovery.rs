//! Mount-time recovery.
//!
//! Rebuilds the write addresses from storage and repairs what an
//! interrupted operation left behind:
//!
//! 1. Locate the active sector: the open sector following a closed one.
//! 2. Scan its ATEs downward; torn ATEs are skipped and the first erased
//!    slot becomes the ATE write address.
//! 3. If the spare sector is not erased a compaction was cut short. With
//!    a gc-done marker present only the erase is missing; without one the
//!    compaction is redone from scratch.
//! 4. Skip torn data written after the last valid entry.
//! 5. Make sure a fresh sector starts with a gc-done marker.

use tracing::{info, warn};

use crate::backend::StorageBackend;
use crate::error::{NvsError, Result};

use super::{Address, Ate, AteKind, AteSlot, Cursor, Store};

impl<B: StorageBackend> Store<B> {
    pub(crate) fn mount(&mut self) -> Result<()> {
        self.ready = false;
        if let Some(cache) = self.cache.as_mut() {
            cache.clear();
        }

        let active = self.find_active_sector()?;
        self.cursor = self.recover_cursor(active)?;

        let spare = self.layout.next_sector(active);
        if !self.is_erased(self.layout.base(spare), self.layout.sector_size)? {
            self.finish_interrupted_gc(active, spare)?;
        }

        self.skip_torn_data()?;

        let first = self.layout.first_slot(active);
        if self.cursor.ate_wra == first {
            if self.cursor.data_wra != self.layout.base(active) {
                warn!(sector = active, "sector holds data but no entries, erasing");
                self.erase_sector(active)?;
                self.cursor = Cursor::fresh(&self.layout, active);
            }
            self.append_marker(&Ate::gc_done(self.cursor.data_wra.offset()))?;
        }

        self.ready = true;
        info!(
            sector = active,
            ate_wra = %self.cursor.ate_wra,
            data_wra = %self.cursor.data_wra,
            free = self.cursor.free(),
            "file system mounted"
        );
        Ok(())
    }

    /// The open sector that follows a closed one, or the sector holding
    /// ATEs when none has been closed yet.
    fn find_active_sector(&self) -> Result<u16> {
        let count = self.layout.sector_count;
        let mut closed = 0;

        for sector in 0..count {
            if self.slot_erased(self.layout.close_slot(sector))? {
                continue;
            }
            closed += 1;
            let next = self.layout.next_sector(sector);
            if self.slot_erased(self.layout.close_slot(next))? {
                return Ok(next);
            }
        }

        if closed == count {
            return Err(NvsError::Corruption(
                "every sector is closed, no active sector to resume".into(),
            ));
        }

        // Without a closed sector, more than one sector holds ATEs only when
        // power was lost while a compaction victim was being erased. The
        // target of that compaction ends with its gc-done marker.
        let mut fallback = None;
        for sector in 0..count {
            if self.slot_erased(self.layout.first_slot(sector))? {
                continue;
            }
            if self.ends_with_gc_done(sector)? {
                return Ok(sector);
            }
            fallback.get_or_insert(sector);
        }
        Ok(fallback.unwrap_or(0))
    }

    /// Whether the newest valid ATE of `sector` is a gc-done marker.
    fn ends_with_gc_done(&self, sector: u16) -> Result<bool> {
        let newest = self.recover_last_ate(sector)?;
        Ok(matches!(
            self.read_ate(newest)?,
            AteSlot::Valid(ate) if ate.kind == AteKind::GcDone
        ))
    }

    fn slot_erased(&self, addr: Address) -> Result<bool> {
        self.is_erased(addr, self.layout.ate_size)
    }

    /// Scans the active sector down from its newest valid ATE.
    fn recover_cursor(&self, sector: u16) -> Result<Cursor> {
        let last = self.recover_last_ate(sector)?;
        let mut data_end = 0;
        let mut slot = last.offset();

        loop {
            let addr = Address::new(sector, slot);
            match self.read_ate(addr)? {
                AteSlot::Erased => {
                    return Ok(Cursor {
                        ate_wra: addr,
                        data_wra: Address::new(sector, data_end),
                    });
                }
                AteSlot::Valid(ate) if ate.kind != AteKind::Close => {
                    data_end = self.layout.align(ate.data_end());
                }
                _ => warn!(%addr, "skipping torn ATE"),
            }

            match slot.checked_sub(self.layout.ate_size) {
                Some(next) if next >= data_end => slot = next,
                _ => break,
            }
        }

        // ATEs ran into data without an erased slot in between. The cursor
        // ends up with no free space so the next write closes the sector.
        warn!(sector, "no free ATE slot left in active sector");
        Ok(Cursor {
            ate_wra: Address::new(sector, slot.saturating_sub(self.layout.ate_size)),
            data_wra: Address::new(sector, data_end),
        })
    }

    fn finish_interrupted_gc(&mut self, active: u16, spare: u16) -> Result<()> {
        let first = self.layout.first_slot(active).offset();
        let mut offset = self.cursor.ate_wra.offset() + self.layout.ate_size;
        let mut gc_done = false;

        while offset <= first {
            if let AteSlot::Valid(ate) = self.read_ate(Address::new(active, offset))? {
                if ate.kind == AteKind::GcDone {
                    gc_done = true;
                    break;
                }
            }
            offset += self.layout.ate_size;
        }

        if gc_done {
            warn!(sector = spare, "erasing sector left by finished compaction");
            return self.erase_sector(spare);
        }

        warn!(target = active, victim = spare, "redoing interrupted compaction");
        self.erase_sector(active)?;
        self.cursor = Cursor::fresh(&self.layout, active);
        self.collect_garbage()
    }

    /// Moves the data write address past bytes written without an ATE.
    fn skip_torn_data(&mut self) -> Result<()> {
        let wbs = self.layout.write_block_size;
        loop {
            let Cursor { ate_wra, data_wra } = self.cursor;
            if data_wra.offset() >= ate_wra.offset() {
                return Ok(());
            }
            if self.is_erased(data_wra, ate_wra.offset() - data_wra.offset())? {
                return Ok(());
            }
            self.cursor.data_wra = data_wra.up(wbs);
        }
    }
}
