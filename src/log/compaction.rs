//! Garbage collection.
//!
//! The active sector has just been opened on the spare. The sector after
//! it is the oldest in the ring; its live entries are copied into the
//! active sector, a gc-done marker is written and the old sector is
//! erased to become the new spare.

use tracing::debug;

use crate::backend::StorageBackend;
use crate::error::Result;

use super::{Address, Ate, AteKind, AteSlot, Store};

impl<B: StorageBackend> Store<B> {
    pub(crate) fn collect_garbage(&mut self) -> Result<()> {
        let target = self.cursor.ate_wra.sector();
        let victim = self.layout.next_sector(target);

        let start = match self.read_ate(self.layout.close_slot(victim))? {
            // Never closed, nothing to move
            AteSlot::Erased => None,
            AteSlot::Valid(close) if close.kind == AteKind::Close => {
                Some(Address::new(victim, u32::from(close.offset)))
            }
            _ => Some(self.recover_last_ate(victim)?),
        };

        let mut moved = 0usize;
        let mut dropped = 0usize;
        if let Some(start) = start {
            let stop = self.layout.first_slot(victim).offset();
            let mut offset = start.offset();
            while offset <= stop {
                let addr = Address::new(victim, offset);
                offset += self.layout.ate_size;

                let ate = match self.read_ate(addr)? {
                    AteSlot::Valid(ate) if ate.is_entry() => ate,
                    _ => continue,
                };
                if self.is_newest(addr, &ate)? {
                    self.relocate(victim, &ate)?;
                    moved += 1;
                } else {
                    dropped += 1;
                }
            }
        }

        if self.cursor.free() >= self.layout.ate_size {
            self.append_marker(&Ate::gc_done(self.cursor.data_wra.offset()))?;
        }
        self.erase_sector(victim)?;

        debug!(target, victim, moved, dropped, "garbage collection finished");
        Ok(())
    }

    /// Whether the live entry at `addr` is the newest version of its id.
    fn is_newest(&mut self, addr: Address, ate: &Ate) -> Result<bool> {
        if ate.is_delete() {
            return Ok(false);
        }
        Ok(matches!(self.lookup(ate.id)?, Some((newest, _)) if newest == addr))
    }

    fn relocate(&mut self, sector: u16, ate: &Ate) -> Result<()> {
        let mut data = vec![0u8; usize::from(ate.len)];
        self.read_at(ate.data_address(sector), &mut data)?;
        self.append(ate.id, &data)?;
        Ok(())
    }
}
