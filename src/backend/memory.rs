//! In-memory flash backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{
    check_alignment, check_bounds, BackendError, BackendResult, StorageBackend, StorageParameters,
};

/// An in-memory model of a flash chip.
///
/// Writes must be aligned to the write block size and erases to the page
/// size. Clones share the same chip, which lets a test drop one file system
/// instance and mount a new one on the same bytes, as after a reboot.
///
/// # Fault injection
///
/// [`cut_power_after`](Self::cut_power_after) arms a power cut: after the
/// given number of successful program/erase operations the next one is torn
/// (only its first half reaches the chip) and every later operation fails
/// until [`restore_power`](Self::restore_power).
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    chip: Arc<Chip>,
    params: StorageParameters,
}

#[derive(Debug, Default)]
struct Chip {
    data: RwLock<Vec<u8>>,
    power: Mutex<Power>,
    writes: AtomicUsize,
    erases: AtomicUsize,
}

#[derive(Debug, Default)]
struct Power {
    /// Operations left before the cut, `None` when no cut is armed
    budget: Option<usize>,
    lost: bool,
}

impl MemoryFlash {
    /// Creates an erased chip of `size` bytes.
    pub fn new(size: usize, params: StorageParameters) -> Self {
        Self::with_data(vec![params.erase_value; size], params)
    }

    /// Creates a chip holding pre-existing bytes.
    pub fn with_data(data: Vec<u8>, params: StorageParameters) -> Self {
        Self {
            chip: Arc::new(Chip {
                data: RwLock::new(data),
                ..Chip::default()
            }),
            params,
        }
    }

    /// Returns a copy of the whole chip.
    pub fn snapshot(&self) -> Vec<u8> {
        self.chip.data.read().clone()
    }

    /// Overwrites raw bytes, bypassing alignment rules and fault injection.
    pub fn poke(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.chip.data.write();
        let end = (offset + bytes.len()).min(data.len());
        if offset < end {
            data[offset..end].copy_from_slice(&bytes[..end - offset]);
        }
    }

    /// Number of successful write operations so far.
    pub fn write_count(&self) -> usize {
        self.chip.writes.load(Ordering::SeqCst)
    }

    /// Number of successful erase operations so far.
    pub fn erase_count(&self) -> usize {
        self.chip.erases.load(Ordering::SeqCst)
    }

    /// Lets `ops` more write/erase operations succeed, then tears the next one.
    pub fn cut_power_after(&self, ops: usize) {
        let mut power = self.chip.power.lock();
        power.budget = Some(ops);
        power.lost = false;
    }

    /// Disarms any pending cut and accepts operations again.
    pub fn restore_power(&self) {
        let mut power = self.chip.power.lock();
        power.budget = None;
        power.lost = false;
    }

    /// Whether an armed power cut has fired.
    pub fn power_lost(&self) -> bool {
        self.chip.power.lock().lost
    }

    /// Consumes one operation from the power budget; `Ok(false)` means this
    /// operation is the one that gets torn.
    fn draw_power(&self, op: &'static str) -> BackendResult<bool> {
        let mut guard = self.chip.power.lock();
        let power = &mut *guard;
        if power.lost {
            return Err(BackendError::PowerLoss(op));
        }
        match power.budget {
            Some(0) => {
                power.lost = true;
                Ok(false)
            }
            Some(left) => {
                power.budget = Some(left - 1);
                Ok(true)
            }
            None => Ok(true),
        }
    }
}

impl StorageBackend for MemoryFlash {
    fn read(&self, offset: u64, buf: &mut [u8]) -> BackendResult<()> {
        let data = self.chip.data.read();
        let start = check_bounds(offset, buf.len(), data.len() as u64)?;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u64, bytes: &[u8]) -> BackendResult<()> {
        check_alignment("write", offset, bytes.len(), self.params.write_block_size)?;
        let start = check_bounds(offset, bytes.len(), self.size())?;

        let powered = self.draw_power("write")?;
        let mut data = self.chip.data.write();
        if !powered {
            let torn = bytes.len() / 2;
            data[start..start + torn].copy_from_slice(&bytes[..torn]);
            return Err(BackendError::PowerLoss("write"));
        }

        data[start..start + bytes.len()].copy_from_slice(bytes);
        self.chip.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn erase(&mut self, offset: u64, len: usize) -> BackendResult<()> {
        check_alignment("erase", offset, len, self.params.page_size)?;
        let start = check_bounds(offset, len, self.size())?;

        let powered = self.draw_power("erase")?;
        let mut data = self.chip.data.write();
        let erased = if powered { len } else { len / 2 };
        data[start..start + erased].fill(self.params.erase_value);
        if !powered {
            return Err(BackendError::PowerLoss("erase"));
        }

        self.chip.erases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn parameters(&self) -> &StorageParameters {
        &self.params
    }

    fn size(&self) -> u64 {
        self.chip.data.read().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StorageParameters {
        StorageParameters::new(4, 0xff, 64)
    }

    #[test]
    fn new_chip_is_erased() {
        let flash = MemoryFlash::new(256, params());
        assert!(flash.snapshot().iter().all(|&b| b == 0xff));
        assert_eq!(flash.size(), 256);
    }

    #[test]
    fn write_then_read() {
        let mut flash = MemoryFlash::new(256, params());
        flash.write(8, b"abcd").unwrap();

        let mut buf = [0u8; 4];
        flash.read(8, &mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
        assert_eq!(flash.write_count(), 1);
    }

    #[test]
    fn misaligned_write_fails() {
        let mut flash = MemoryFlash::new(256, params());
        assert!(matches!(
            flash.write(2, b"abcd"),
            Err(BackendError::Misaligned { .. })
        ));
        assert!(matches!(
            flash.write(4, b"abc"),
            Err(BackendError::Misaligned { .. })
        ));
    }

    #[test]
    fn erase_requires_page_alignment() {
        let mut flash = MemoryFlash::new(256, params());
        assert!(flash.erase(32, 64).is_err());
        assert!(flash.erase(64, 64).is_ok());
        assert_eq!(flash.erase_count(), 1);
    }

    #[test]
    fn erase_restores_erase_value() {
        let mut flash = MemoryFlash::new(256, params());
        flash.write(64, &[0u8; 16]).unwrap();
        flash.erase(64, 64).unwrap();
        assert!(flash.snapshot()[64..128].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn clones_share_the_chip() {
        let mut flash = MemoryFlash::new(256, params());
        let other = flash.clone();
        flash.write(0, b"data").unwrap();
        assert_eq!(&other.snapshot()[..4], b"data");
    }

    #[test]
    fn power_cut_tears_the_failing_write() {
        let mut flash = MemoryFlash::new(256, params());
        flash.cut_power_after(1);

        flash.write(0, &[0u8; 8]).unwrap();
        assert!(matches!(
            flash.write(8, &[0u8; 8]),
            Err(BackendError::PowerLoss("write"))
        ));
        assert!(flash.power_lost());

        let snapshot = flash.snapshot();
        assert!(snapshot[8..12].iter().all(|&b| b == 0));
        assert!(snapshot[12..16].iter().all(|&b| b == 0xff));

        // Nothing reaches the chip until power returns.
        assert!(flash.erase(0, 64).is_err());
        flash.restore_power();
        assert!(flash.erase(0, 64).is_ok());
    }

    #[test]
    fn power_cut_tears_erase() {
        let mut flash = MemoryFlash::new(256, params());
        flash.write(0, &[0u8; 64]).unwrap();
        flash.cut_power_after(0);

        assert!(flash.erase(0, 64).is_err());
        let snapshot = flash.snapshot();
        assert!(snapshot[..32].iter().all(|&b| b == 0xff));
        assert!(snapshot[32..64].iter().all(|&b| b == 0));
    }

    #[test]
    fn poke_ignores_alignment() {
        let flash = MemoryFlash::new(16, params());
        flash.poke(3, &[1, 2, 3]);
        flash.poke(15, &[9, 9]);
        let snapshot = flash.snapshot();
        assert_eq!(&snapshot[3..6], &[1, 2, 3]);
        assert_eq!(snapshot[15], 9);
    }
}
