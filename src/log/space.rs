//! Free space accounting.

use std::collections::HashSet;
use std::ops::ControlFlow;

use crate::backend::StorageBackend;
use crate::error::Result;

use super::Store;

impl<B: StorageBackend> Store<B> {
    /// Bytes available for new entries.
    ///
    /// The unused gap of the active sector, plus whatever compaction would
    /// reclaim from every other sector except the spare: its capacity minus
    /// the entries still live in it. Walks the whole log.
    pub(crate) fn free_space(&self) -> Result<usize> {
        let active = self.cursor.ate_wra.sector();
        let others = usize::from(self.layout.sector_count - 2);
        let reclaimable = others * self.layout.sector_capacity() as usize;

        let mut seen = HashSet::new();
        let mut live = 0usize;
        self.walk_entries(|addr, ate| {
            let newest = seen.insert(ate.id);
            if newest && !ate.is_delete() && addr.sector() != active {
                live += self.required_space(usize::from(ate.len)) as usize;
            }
            ControlFlow::Continue(())
        })?;

        Ok(self.cursor.free() as usize + reclaimable.saturating_sub(live))
    }
}
