//! Engine Module
//!
//! The public file system handle that serializes access to the log.
//!
//! ## Responsibilities
//! - Validate the configuration against the backend at construction
//! - Gate every operation on a successful mount
//! - Hold the instance lock for the full duration of each call
//! - Translate log results into the public API

use parking_lot::Mutex;

use crate::backend::StorageBackend;
use crate::cache::LookupCache;
use crate::config::Config;
use crate::error::{NvsError, Result};
use crate::log::{Address, Layout, Store};

/// A non-volatile storage instance over one region of a backend
///
/// ## Concurrency Model: one exclusive lock per instance
///
/// - Every public call (mount, clear, write, read, read_history, delete,
///   calc_free_space) takes the lock on entry and releases it on return
/// - Garbage collection runs inside the write that triggered it, so the
///   lock is held across it
/// - Backend calls block; there is no cancellation or timeout
///
/// Instances over disjoint regions are independent.
pub struct Nvs<B: StorageBackend> {
    /// Validated configuration
    config: Config,

    /// Backend, geometry, write addresses and cache (exclusive access)
    store: Mutex<Store<B>>,
}

impl<B: StorageBackend> Nvs<B> {
    /// Create an unmounted instance
    ///
    /// Fails with [`NvsError::InvalidArgument`] when the geometry does not
    /// fit the backend. No storage is touched.
    pub fn new(config: Config, backend: B) -> Result<Self> {
        let layout = Layout::new(&config, backend.parameters(), backend.size())?;
        let cache = LookupCache::new(config.lookup_cache_size);

        Ok(Self {
            config,
            store: Mutex::new(Store::new(backend, layout, cache)),
        })
    }

    /// Recover the write position from storage and mark the instance ready
    ///
    /// Torn entries left by an interrupted write are discarded and an
    /// interrupted garbage collection is completed. Mounting an erased
    /// region initializes it.
    pub fn mount(&self) -> Result<()> {
        self.store.lock().mount()
    }

    /// Erase every sector; the instance must be mounted again before use
    pub fn clear(&self) -> Result<()> {
        self.store.lock().clear()
    }

    /// Whether the instance is mounted and usable
    pub fn is_ready(&self) -> bool {
        self.store.lock().ready
    }

    /// Store `data` under `id`
    ///
    /// Returns the number of bytes written, or 0 when `data` equals the
    /// stored value and nothing was written. An empty `data` deletes `id`.
    pub fn write(&self, id: u16, data: &[u8]) -> Result<usize> {
        let mut store = self.store.lock();
        store.ensure_ready()?;
        store.write_entry(id, data)
    }

    /// Read the newest value of `id` into `buf`
    ///
    /// Copies at most `buf.len()` bytes and returns the full stored length,
    /// which exceeds `buf.len()` when the value was truncated.
    pub fn read(&self, id: u16, buf: &mut [u8]) -> Result<usize> {
        self.read_history(id, buf, 0)
    }

    /// Read an older value of `id`: `cnt` 0 is the newest, 1 the one before
    ///
    /// Fails with [`NvsError::NotFound`] when the history does not reach
    /// that far or the selected version is a deletion.
    pub fn read_history(&self, id: u16, buf: &mut [u8], cnt: u16) -> Result<usize> {
        let mut store = self.store.lock();
        store.ensure_ready()?;

        let found = if cnt == 0 {
            store.lookup(id)?
        } else {
            store.find_entry(id, cnt)?
        };
        let (addr, ate) = match found {
            Some((addr, ate)) if !ate.is_delete() => (addr, ate),
            _ => return Err(NvsError::NotFound),
        };

        let len = usize::from(ate.len);
        let copy = len.min(buf.len());
        store.read_at(ate.data_address(addr.sector()), &mut buf[..copy])?;
        Ok(len)
    }

    /// Read the newest value of `id` into a new vector
    pub fn read_to_vec(&self, id: u16) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.max_value_len()];
        let len = self.read(id, &mut buf)?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Delete `id`; deleting an absent id succeeds without writing
    pub fn delete(&self, id: u16) -> Result<()> {
        self.write(id, &[]).map(|_| ())
    }

    /// Bytes available for new entries
    ///
    /// Walks the entire log, so it is slow on large or slow backends.
    pub fn calc_free_space(&self) -> Result<usize> {
        let store = self.store.lock();
        store.ensure_ready()?;
        store.free_space()
    }

    /// Largest value a single entry can hold
    pub fn max_value_len(&self) -> usize {
        self.store.lock().layout.max_data_len()
    }

    /// Current ATE and data write addresses
    pub fn write_addresses(&self) -> (Address, Address) {
        let store = self.store.lock();
        (store.cursor.ate_wra, store.cursor.data_wra)
    }

    /// Get the configuration this instance was created with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the instance and hand back the backend
    pub fn into_backend(self) -> B {
        self.store.into_inner().backend
    }
}
