//! Snapshot image loader.
//!
//! Parses the versioned binary memory image produced by the reference side:
//! an `LXCOSIM1` header, a contiguous range table, and per-range payload at
//! absolute file offsets. The loader materializes bytes without interpreting
//! them; guest-address mapping and alias detection happen when the image is
//! loaded into DUT memory.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::common::error::SnapshotError;

/// Eight-byte ASCII magic at offset zero.
pub const SNAPSHOT_MAGIC: [u8; 8] = *b"LXCOSIM1";

/// The only supported header version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Size of one range-table entry: three little-endian u64 values.
const RANGE_ENTRY_BYTES: usize = 24;

/// One guest memory range with its materialized payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotRange {
    /// Guest base address of the range.
    pub guest_base: u64,
    /// Range size in bytes; equals `bytes.len()`.
    pub size: u64,
    /// Absolute file offset the payload was read from.
    pub file_offset: u64,
    /// Payload bytes.
    pub bytes: Vec<u8>,
}

/// A parsed snapshot image: an ordered list of guest ranges.
///
/// Ranges may be sparse and are not required to be sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotImage {
    /// Ranges in file order.
    pub ranges: Vec<SnapshotRange>,
}

/// Reads exactly `buf.len()` bytes, mapping early EOF to `ShortRead`.
fn read_exact_section(
    file: &mut File,
    buf: &mut [u8],
    section: &'static str,
) -> Result<(), SnapshotError> {
    file.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            SnapshotError::ShortRead(section)
        } else {
            SnapshotError::Io(e)
        }
    })
}

#[inline]
fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(word)
}

#[inline]
fn read_u32_le(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(word)
}

impl SnapshotImage {
    /// Loads a snapshot image from disk.
    ///
    /// A pure function of the bytes on disk: the same file always yields the
    /// same image or the same error.
    ///
    /// # Errors
    ///
    /// `BadMagic`, `UnsupportedVersion`, `ShortRead`, or an I/O failure.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let mut file = File::open(path)?;

        let mut header = [0u8; 16];
        read_exact_section(&mut file, &mut header, "header")?;
        if header[..8] != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let version = read_u32_le(&header[8..12]);
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        let range_count = read_u32_le(&header[12..16]) as usize;

        let mut table = vec![0u8; range_count * RANGE_ENTRY_BYTES];
        read_exact_section(&mut file, &mut table, "range table")?;

        let mut ranges = Vec::with_capacity(range_count);
        for entry in table.chunks_exact(RANGE_ENTRY_BYTES) {
            let guest_base = read_u64_le(&entry[0..8]);
            let size = read_u64_le(&entry[8..16]);
            let file_offset = read_u64_le(&entry[16..24]);

            let _ = file
                .seek(SeekFrom::Start(file_offset))
                .map_err(SnapshotError::Io)?;
            let mut bytes = vec![0u8; size as usize];
            read_exact_section(&mut file, &mut bytes, "payload")?;

            ranges.push(SnapshotRange {
                guest_base,
                size,
                file_offset,
                bytes,
            });
        }

        Ok(Self { ranges })
    }

    /// Total payload bytes across all ranges.
    pub fn total_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.size).sum()
    }
}
