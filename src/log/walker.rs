//! Backward traversal of the ATE log.
//!
//! The newest ATE sits just above `ate_wra`. Walking up through a sector
//! visits older entries; at the close slot the walk jumps to the previous
//! sector, entering it at the ATE its close marker points to. The walk ends
//! when it reaches a sector that was never closed, which wraps it back to
//! `ate_wra`.

use std::ops::ControlFlow;

use tracing::{trace, warn};

use crate::backend::StorageBackend;
use crate::error::Result;

use super::{Address, Ate, AteKind, AteSlot, Store};

impl<B: StorageBackend> Store<B> {
    /// Reads the slot at `addr` and moves `addr` one step back in time.
    pub(crate) fn step_back(&self, addr: &mut Address) -> Result<AteSlot> {
        let slot = self.read_ate(*addr)?;

        *addr = addr.up(self.layout.ate_size);
        if *addr != self.layout.close_slot(addr.sector()) {
            return Ok(slot);
        }

        let prev = self.layout.prev_sector(addr.sector());
        *addr = match self.read_ate(self.layout.close_slot(prev))? {
            AteSlot::Erased => self.cursor.ate_wra,
            AteSlot::Valid(close) if close.kind == AteKind::Close => {
                Address::new(prev, u32::from(close.offset))
            }
            _ => self.recover_last_ate(prev)?,
        };
        Ok(slot)
    }

    /// Finds the newest valid ATE of a sector without trusting its close
    /// marker. Returns the first slot when the sector holds no valid ATE.
    pub(crate) fn recover_last_ate(&self, sector: u16) -> Result<Address> {
        let mut last = self.layout.first_slot(sector);
        let mut slot = last.offset();
        let mut data_end = 0;

        while slot > data_end {
            let addr = Address::new(sector, slot);
            if let AteSlot::Valid(ate) = self.read_ate(addr)? {
                if ate.kind != AteKind::Close {
                    data_end = self.layout.align(ate.data_end());
                    last = addr;
                }
            }
            match slot.checked_sub(self.layout.ate_size) {
                Some(next) => slot = next,
                None => break,
            }
        }
        Ok(last)
    }

    /// Visits every valid entry ATE from newest to oldest until `visit`
    /// breaks or the log is exhausted.
    pub(crate) fn walk_entries<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(Address, &Ate) -> ControlFlow<()>,
    {
        let start = self.cursor.ate_wra;
        let mut addr = start;

        for _ in 0..=self.layout.total_slots() {
            let here = addr;
            if let AteSlot::Valid(ate) = self.step_back(&mut addr)? {
                if ate.is_entry() && visit(here, &ate).is_break() {
                    return Ok(());
                }
            }
            if addr == start {
                return Ok(());
            }
        }

        warn!(%start, "ATE walk did not return to the write address");
        Ok(())
    }

    /// Entry ATE for `id`, `skip` versions back from the newest. Delete
    /// markers count as versions.
    pub(crate) fn find_entry(&self, id: u16, skip: u16) -> Result<Option<(Address, Ate)>> {
        let mut seen = 0u16;
        let mut found = None;
        self.walk_entries(|addr, ate| {
            if ate.id != id {
                return ControlFlow::Continue(());
            }
            if seen == skip {
                found = Some((addr, *ate));
                return ControlFlow::Break(());
            }
            seen += 1;
            ControlFlow::Continue(())
        })?;
        Ok(found)
    }

    /// Newest entry ATE for `id`, consulting the lookup cache first.
    ///
    /// A cached address is only trusted once the slot it names reads back
    /// as a valid entry for the same id.
    pub(crate) fn lookup(&mut self, id: u16) -> Result<Option<(Address, Ate)>> {
        if let Some(addr) = self.cache.as_ref().and_then(|cache| cache.get(id)) {
            if let AteSlot::Valid(ate) = self.read_ate(addr)? {
                if ate.is_entry() && ate.id == id {
                    trace!(id, %addr, "lookup cache hit");
                    return Ok(Some((addr, ate)));
                }
            }
            trace!(id, %addr, "stale lookup cache slot");
        }

        let found = self.find_entry(id, 0)?;
        if let Some(cache) = self.cache.as_mut() {
            match found {
                Some((addr, _)) => {
                    trace!(id, %addr, "lookup cache fill");
                    cache.insert(id, addr);
                }
                None => cache.remove(id),
            }
        }
        Ok(found)
    }
}
