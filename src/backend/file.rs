//! File-backed flash image.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use super::{check_alignment, check_bounds, BackendResult, StorageBackend, StorageParameters};

/// Chunk used when filling the image with the erase value
const FILL_CHUNK: usize = 4096;

/// A flash image stored in a regular file.
///
/// The image has a fixed size chosen at creation and is filled with the
/// erase value. Every program and erase is synced to disk before returning,
/// so a completed operation survives process termination.
pub struct FileFlash {
    /// Interior mutability so reads can seek through `&self`
    file: Mutex<File>,
    size: u64,
    params: StorageParameters,
}

impl FileFlash {
    /// Creates (or truncates) an erased image of `size` bytes.
    pub fn create(path: &Path, size: u64, params: StorageParameters) -> BackendResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        fill(&mut file, 0, size, params.erase_value)?;
        file.sync_all()?;

        Ok(Self {
            file: Mutex::new(file),
            size,
            params,
        })
    }

    /// Opens an existing image; its size is the file length.
    pub fn open(path: &Path, params: StorageParameters) -> BackendResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            file: Mutex::new(file),
            size,
            params,
        })
    }

    /// Opens `path` if it exists, otherwise creates an erased image.
    pub fn open_or_create(
        path: &Path,
        size: u64,
        params: StorageParameters,
    ) -> BackendResult<Self> {
        if path.exists() {
            Self::open(path, params)
        } else {
            Self::create(path, size, params)
        }
    }
}

impl StorageBackend for FileFlash {
    fn read(&self, offset: u64, buf: &mut [u8]) -> BackendResult<()> {
        check_bounds(offset, buf.len(), self.size)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> BackendResult<()> {
        check_alignment("write", offset, data.len(), self.params.write_block_size)?;
        check_bounds(offset, data.len(), self.size)?;
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }

    fn erase(&mut self, offset: u64, len: usize) -> BackendResult<()> {
        check_alignment("erase", offset, len, self.params.page_size)?;
        check_bounds(offset, len, self.size)?;
        let file = self.file.get_mut();
        fill(file, offset, len as u64, self.params.erase_value)?;
        file.sync_data()?;
        Ok(())
    }

    fn parameters(&self) -> &StorageParameters {
        &self.params
    }

    fn size(&self) -> u64 {
        self.size
    }
}

fn fill(file: &mut File, offset: u64, len: u64, value: u8) -> BackendResult<()> {
    let chunk = [value; FILL_CHUNK];
    file.seek(SeekFrom::Start(offset))?;
    let mut left = len;
    while left > 0 {
        let n = left.min(FILL_CHUNK as u64) as usize;
        file.write_all(&chunk[..n])?;
        left -= n as u64;
    }
    Ok(())
}
