//! In-memory EEPROM backend.

use std::sync::Arc;

use parking_lot::RwLock;

use super::{check_bounds, BackendResult, StorageBackend, StorageParameters};

/// An in-memory model of an EEPROM.
///
/// EEPROMs are byte writable and have no native erase; erasing is emulated
/// by writing the erase value over the range one page at a time. The write
/// block size is always 1. Clones share the same device.
#[derive(Debug, Clone)]
pub struct MemoryEeprom {
    data: Arc<RwLock<Vec<u8>>>,
    params: StorageParameters,
}

impl MemoryEeprom {
    /// Creates an erased device of `size` bytes.
    pub fn new(size: usize, erase_value: u8, page_size: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(vec![erase_value; size])),
            params: StorageParameters::new(1, erase_value, page_size),
        }
    }

    /// Returns a copy of the whole device.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for MemoryEeprom {
    fn read(&self, offset: u64, buf: &mut [u8]) -> BackendResult<()> {
        let data = self.data.read();
        let start = check_bounds(offset, buf.len(), data.len() as u64)?;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> BackendResult<()> {
        let mut data = self.data.write();
        let start = check_bounds(offset, bytes.len(), data.len() as u64)?;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn erase(&mut self, offset: u64, len: usize) -> BackendResult<()> {
        check_bounds(offset, len, self.size())?;
        let page = vec![self.params.erase_value; self.params.page_size.max(1)];
        let mut done = 0;
        while done < len {
            let chunk = (len - done).min(page.len());
            self.write(offset + done as u64, &page[..chunk])?;
            done += chunk;
        }
        Ok(())
    }

    fn parameters(&self) -> &StorageParameters {
        &self.params
    }

    fn size(&self) -> u64 {
        self.data.read().len() as u64
    }
}
