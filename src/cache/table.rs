//! Lookup cache table

use crate::log::Address;

use super::slot_index;

/// Fixed-size table of last known ATE addresses
#[derive(Debug)]
pub(crate) struct LookupCache {
    slots: Box<[Option<(u16, Address)>]>,
}

impl LookupCache {
    /// Creates a cache with `size` slots; `None` when `size` is zero.
    pub fn new(size: usize) -> Option<Self> {
        if size == 0 {
            return None;
        }
        Some(Self {
            slots: vec![None; size].into_boxed_slice(),
        })
    }

    /// Address last recorded for `id`.
    pub fn get(&self, id: u16) -> Option<Address> {
        match self.slots[slot_index(id, self.slots.len())] {
            Some((cached, addr)) if cached == id => Some(addr),
            _ => None,
        }
    }

    pub fn insert(&mut self, id: u16, addr: Address) {
        let index = slot_index(id, self.slots.len());
        self.slots[index] = Some((id, addr));
    }

    /// Forgets `id`; a slot held by another id is left alone.
    pub fn remove(&mut self, id: u16) {
        let index = slot_index(id, self.slots.len());
        if matches!(self.slots[index], Some((cached, _)) if cached == id) {
            self.slots[index] = None;
        }
    }

    /// Drops every address inside `sector`.
    pub fn invalidate_sector(&mut self, sector: u16) {
        for slot in self.slots.iter_mut() {
            if matches!(slot, Some((_, addr)) if addr.sector() == sector) {
                *slot = None;
            }
        }
    }

    pub fn clear(&mut self) {
        self.slots.fill(None);
    }
}
