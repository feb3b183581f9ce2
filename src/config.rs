//! Configuration for nvstore
//!
//! Static geometry of one file system instance, with sensible defaults.
//! Backend properties (write block size, erase value, page size) are not
//! configured here; they are reported by the [`StorageBackend`].
//!
//! [`StorageBackend`]: crate::backend::StorageBackend

/// Main configuration for an nvstore instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Region Configuration
    // -------------------------------------------------------------------------
    /// Byte offset of the file system inside the backend (page aligned)
    pub offset: u64,

    /// Size of one sector in bytes, a multiple of the backend page size
    pub sector_size: u32,

    /// Number of sectors in the ring (at least 2)
    pub sector_count: u16,

    // -------------------------------------------------------------------------
    // Lookup Cache Configuration
    // -------------------------------------------------------------------------
    /// Number of lookup cache slots, 0 disables the cache
    pub lookup_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            offset: 0,
            sector_size: 4096,
            sector_count: 3,
            lookup_cache_size: 128,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Total number of bytes covered by the sector ring
    pub fn region_size(&self) -> u64 {
        u64::from(self.sector_size) * u64::from(self.sector_count)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the byte offset of the file system inside the backend
    pub fn offset(mut self, offset: u64) -> Self {
        self.config.offset = offset;
        self
    }

    /// Set the sector size (in bytes)
    pub fn sector_size(mut self, size: u32) -> Self {
        self.config.sector_size = size;
        self
    }

    /// Set the number of sectors
    pub fn sector_count(mut self, count: u16) -> Self {
        self.config.sector_count = count;
        self
    }

    /// Set the number of lookup cache slots (0 disables the cache)
    pub fn lookup_cache_size(mut self, slots: usize) -> Self {
        self.config.lookup_cache_size = slots;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
