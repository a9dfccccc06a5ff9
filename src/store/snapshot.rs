//! Immutable per-module cache snapshots (memory-mapped)
//!
//! Each module the external compiler processes leaves behind snapshot files
//! describing that module's contribution to the index. A snapshot is written
//! once and never mutated, so the reader maps it and trusts it after a
//! single checksum pass over the payload.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{IndexError, Result};

/// Magic number for format validation
pub const MAGIC: [u8; 4] = *b"CRIX"; // Compiler Reference IndeX

/// Format version
pub const FORMAT_VERSION: u16 = 1;

/// Header size on disk (54 bytes, no padding)
pub const HEADER_SIZE_ON_DISK: usize = 4 + 2 + 8 + 8 + 32;

/// Snapshot header
#[derive(Debug, Clone, Copy)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub entry_count: u64,
    pub payload_len: u64,
    pub checksum: [u8; 32],
}

impl SnapshotHeader {
    pub fn new(entry_count: u64, payload_len: u64, checksum: [u8; 32]) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            entry_count,
            payload_len,
            checksum,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(IndexError::InvalidFormat(format!(
                "bad magic number: {:?}",
                self.magic
            )));
        }
        let version = self.version;
        if version != FORMAT_VERSION {
            return Err(IndexError::InvalidFormat(format!(
                "unsupported format version: {}",
                version
            )));
        }
        Ok(())
    }
}

/// Read-only view of one snapshot file.
///
/// Opening verifies the header and the BLAKE3 checksum of the whole payload,
/// so iteration afterwards only has to bounds-check.
#[derive(Debug)]
pub struct ModuleCache {
    mmap: Mmap,
    header: SnapshotHeader,
}

impl ModuleCache {
    /// Open and verify an existing snapshot.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        // Check the mapping, not file metadata: the compiler rewrites these
        // files, and they can shrink between a stat and the map.
        if mmap.len() < HEADER_SIZE_ON_DISK {
            return Err(IndexError::InvalidFormat(format!(
                "file too small: {} bytes",
                mmap.len()
            )));
        }

        // Manually parse header from bytes (54 bytes on disk)
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&mmap[0..4]);
        let version = u16::from_le_bytes([mmap[4], mmap[5]]);
        let entry_count = u64::from_le_bytes(mmap[6..14].try_into().unwrap());
        let payload_len = u64::from_le_bytes(mmap[14..22].try_into().unwrap());
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&mmap[22..54]);

        let header = SnapshotHeader {
            magic,
            version,
            entry_count,
            payload_len,
            checksum,
        };
        header.validate()?;

        let payload_end = HEADER_SIZE_ON_DISK
            .checked_add(header.payload_len as usize)
            .ok_or_else(|| IndexError::Corrupted("payload length overflows".into()))?;
        if payload_end != mmap.len() {
            return Err(IndexError::Corrupted(format!(
                "payload length {} does not match file size {}",
                header.payload_len,
                mmap.len()
            )));
        }

        let actual = blake3::hash(&mmap[HEADER_SIZE_ON_DISK..payload_end]);
        if actual.as_bytes() != &header.checksum {
            return Err(IndexError::Corrupted("payload checksum mismatch".into()));
        }

        Ok(Self { mmap, header })
    }

    pub fn entry_count(&self) -> usize {
        self.header.entry_count as usize
    }

    fn payload(&self) -> &[u8] {
        &self.mmap[HEADER_SIZE_ON_DISK..]
    }

    /// Iterate over `(key, values)` entries in file order.
    ///
    /// Entries are sorted by key at write time, so iteration order is the
    /// same for byte-identical files.
    pub fn entries(&self) -> CacheEntries<'_> {
        CacheEntries {
            data: self.payload(),
            pos: 0,
            remaining: self.header.entry_count,
        }
    }
}

/// Streaming decoder over a snapshot payload. Strings are borrowed straight
/// from the mapping, nothing is copied.
pub struct CacheEntries<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: u64,
}

impl<'a> CacheEntries<'a> {
    fn read_u32(&mut self) -> Result<u32> {
        let end = self.pos + 4;
        let bytes: [u8; 4] = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| IndexError::Corrupted("entry truncated".into()))?
            .try_into()
            .unwrap();
        self.pos = end;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_str(&mut self, len: usize) -> Result<&'a str> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| IndexError::Corrupted("entry length overflows".into()))?;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| IndexError::Corrupted("entry truncated".into()))?;
        self.pos = end;
        std::str::from_utf8(bytes)
            .map_err(|_| IndexError::Corrupted("entry contains non-UTF-8 string".into()))
    }

    fn read_entry(&mut self) -> Result<(&'a str, Vec<&'a str>)> {
        let key_len = self.read_u32()? as usize;
        let key = self.read_str(key_len)?;
        let value_count = self.read_u32()? as usize;
        let mut values = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            let len = self.read_u32()? as usize;
            values.push(self.read_str(len)?);
        }
        Ok((key, values))
    }
}

impl<'a> Iterator for CacheEntries<'a> {
    type Item = Result<(&'a str, Vec<&'a str>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.read_entry())
    }
}
