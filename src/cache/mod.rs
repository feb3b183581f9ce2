//! Lookup Cache Module
//!
//! Optional in-memory accelerator mapping an id to the address of its
//! newest ATE.
//!
//! ## Responsibilities
//! - Skip the backward log walk for ids seen recently
//! - Forget addresses in a sector as soon as it is erased
//!
//! ## Data Structure Choice
//! A fixed array of slots indexed by a hash of the id, one address per
//! slot. Collisions simply evict. Nothing read from the cache is trusted:
//! the log re-reads and checks the ATE at the cached address and falls
//! back to a full walk when it does not match.

mod table;

pub(crate) use table::LookupCache;

/// Slot index for `id` in a cache of `size` slots.
///
/// 16-bit integer hash with good avalanche, so sequential ids spread
/// across the table.
fn slot_index(id: u16, size: usize) -> usize {
    let mut hash = u32::from(id);
    hash ^= hash >> 8;
    hash = hash.wrapping_mul(0x88b5) & 0xffff;
    hash ^= hash >> 7;
    hash = hash.wrapping_mul(0xdb2d) & 0xffff;
    hash ^= hash >> 9;
    hash as usize % size
}
