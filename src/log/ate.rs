//! Allocation table entries
//!
//! Encoding and validation of the fixed-size metadata records written from
//! the top of each sector downward.

use serde::{Deserialize, Serialize};

use crate::error::{NvsError, Result};

use super::{Address, Layout};

/// Encoded header size: id, offset, len (u16 each), kind, reserved
pub(crate) const HEADER_SIZE: usize = 8;

/// Header plus CRC32, before padding to the write block size
pub(crate) const ATE_RAW_SIZE: usize = HEADER_SIZE + 4;

/// Upper bound of an ATE slot once padded (write blocks are at most 32 bytes)
pub(crate) const MAX_ATE_SIZE: usize = 32;

/// Id carried by close and gc-done markers; never accepted from callers
pub(crate) const RESERVED_ID: u16 = 0xffff;

/// What an ATE describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum AteKind {
    /// Data record for an id; zero length marks a deletion
    Entry = 0x01,

    /// Last ATE of a full sector; offset points at the newest ATE below it
    Close = 0x02,

    /// Written once a compaction into this sector has finished
    GcDone = 0x03,
}

impl AteKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(AteKind::Entry),
            0x02 => Some(AteKind::Close),
            0x03 => Some(AteKind::GcDone),
            _ => None,
        }
    }
}

/// On-storage header, serialized little-endian with fixed-width integers
#[derive(Serialize, Deserialize)]
struct AteHeader {
    id: u16,
    offset: u16,
    len: u16,
    kind: u8,
    reserved: u8,
}

/// A decoded allocation table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ate {
    pub id: u16,
    /// Data offset within the sector (entries), or a marker-specific offset
    pub offset: u16,
    pub len: u16,
    pub kind: AteKind,
}

impl Ate {
    pub fn entry(id: u16, offset: u32, len: usize) -> Self {
        Self {
            id,
            offset: offset as u16,
            len: len as u16,
            kind: AteKind::Entry,
        }
    }

    /// Close marker pointing at the newest ATE of the sector.
    pub fn close(last_ate_offset: u32) -> Self {
        Self {
            id: RESERVED_ID,
            offset: last_ate_offset as u16,
            len: 0,
            kind: AteKind::Close,
        }
    }

    /// Gc-done marker recording the data write offset at completion.
    pub fn gc_done(data_offset: u32) -> Self {
        Self {
            id: RESERVED_ID,
            offset: data_offset as u16,
            len: 0,
            kind: AteKind::GcDone,
        }
    }

    pub fn is_entry(&self) -> bool {
        self.kind == AteKind::Entry
    }

    pub fn is_delete(&self) -> bool {
        self.is_entry() && self.len == 0
    }

    /// End of the data this entry covers, before alignment.
    pub fn data_end(&self) -> u32 {
        u32::from(self.offset) + u32::from(self.len)
    }

    /// Where the data of an entry stored in `sector` begins.
    pub fn data_address(&self, sector: u16) -> Address {
        Address::new(sector, u32::from(self.offset))
    }

    pub fn encode(&self) -> Result<[u8; ATE_RAW_SIZE]> {
        let header = bincode::serialize(&AteHeader {
            id: self.id,
            offset: self.offset,
            len: self.len,
            kind: self.kind as u8,
            reserved: 0,
        })?;
        if header.len() != HEADER_SIZE {
            return Err(NvsError::Serialization(format!(
                "ATE header encoded to {} bytes",
                header.len()
            )));
        }

        let mut raw = [0u8; ATE_RAW_SIZE];
        raw[..HEADER_SIZE].copy_from_slice(&header);
        raw[HEADER_SIZE..].copy_from_slice(&crc32fast::hash(&header).to_le_bytes());
        Ok(raw)
    }

    /// Decodes a raw slot; `None` when the checksum or kind is wrong.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() < ATE_RAW_SIZE {
            return None;
        }
        let (header, rest) = raw.split_at(HEADER_SIZE);
        let crc = u32::from_le_bytes(rest[..4].try_into().ok()?);
        if crc32fast::hash(header) != crc {
            return None;
        }

        let header: AteHeader = bincode::deserialize(header).ok()?;
        Some(Self {
            id: header.id,
            offset: header.offset,
            len: header.len,
            kind: AteKind::from_u8(header.kind)?,
        })
    }
}

/// Contents of one ATE slot as read from storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AteSlot {
    /// Never written since the last erase
    Erased,

    /// Written, but torn or otherwise unusable
    Invalid,

    Valid(Ate),
}

impl AteSlot {
    pub fn parse(raw: &[u8], layout: &Layout) -> Self {
        if raw.iter().all(|&b| b == layout.erase_value) {
            return AteSlot::Erased;
        }
        match Ate::decode(raw) {
            Some(ate) if layout.ate_in_bounds(&ate) => AteSlot::Valid(ate),
            _ => AteSlot::Invalid,
        }
    }

    pub fn valid(self) -> Option<Ate> {
        match self {
            AteSlot::Valid(ate) => Some(ate),
            _ => None,
        }
    }
}
