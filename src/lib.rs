//! # nvstore
//!
//! A log-structured key-value store for small flash and EEPROM regions:
//! - 16-bit ids mapped to short binary values
//! - Append-only sectors with CRC-protected allocation table entries
//! - Crash recovery that discards torn writes at mount
//! - Ring-based garbage collection with a spare sector
//! - Optional lookup cache, always verified against storage
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Nvs<B>                               │
//! │                 (one exclusive lock per instance)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Sector Log                              │
//! │   write / lookup / history / GC / mount / free space         │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │                                  │
//!            ▼                                  ▼
//!   ┌─────────────────┐              ┌─────────────────────┐
//!   │  Lookup Cache   │              │   StorageBackend    │
//!   │  (id → ATE)     │              │ flash / eeprom /file│
//!   └─────────────────┘              └─────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use nvstore::{Config, MemoryFlash, Nvs, StorageParameters};
//!
//! let flash = MemoryFlash::new(3 * 4096, StorageParameters::default());
//! let nvs = Nvs::new(Config::default(), flash).unwrap();
//! nvs.mount().unwrap();
//!
//! nvs.write(1, b"hello").unwrap();
//! assert_eq!(nvs.read_to_vec(1).unwrap(), b"hello");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod backend;
pub mod engine;

mod cache;
mod log;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NvsError, Result};
pub use config::{Config, ConfigBuilder};
pub use backend::{
    BackendError, FileFlash, MemoryEeprom, MemoryFlash, StorageBackend, StorageParameters,
};
pub use engine::Nvs;
pub use log::Address;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of nvstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
