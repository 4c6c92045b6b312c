//! On-disk record format: a fixed 16-byte header followed by key bytes then
//! value bytes, with a CRC32 covering everything after the CRC field itself.
//!
//! ```text
//! offset  size  field
//! 0       4     CRC32 (IEEE), over bytes 4..end
//! 4       4     timestamp, seconds since epoch, unsigned
//! 8       4     key_size
//! 12      4     value_size (0 => tombstone)
//! 16      key_size    key bytes
//! 16+key  value_size  value bytes
//! ```
//!
//! All integers are little-endian. Records are self-delimiting; there is no
//! separate framing or escaping.

use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 16;

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub timestamp: u32,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Entry {
    /// True if this record is a tombstone (logical delete) rather than a
    /// live value. Value size zero is reserved for this purpose.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }

    /// Total encoded size of this record.
    pub fn encoded_len(&self) -> usize {
        encoded_len(self.key.len(), self.value.len())
    }
}

/// Encoded size of a record with the given key/value lengths.
pub fn encoded_len(key_len: usize, value_len: usize) -> usize {
    HEADER_LEN + key_len + value_len
}

/// Encodes `key`/`value` with the given timestamp into a fresh buffer,
/// including the CRC. No I/O, no failure conditions.
pub fn encode(key: &[u8], value: &[u8], timestamp: u32) -> Vec<u8> {
    let mut buf = vec![0u8; encoded_len(key.len(), value.len())];
    buf[4..8].copy_from_slice(&timestamp.to_le_bytes());
    buf[8..12].copy_from_slice(&(key.len() as u32).to_le_bytes());
    buf[12..16].copy_from_slice(&(value.len() as u32).to_le_bytes());
    buf[16..16 + key.len()].copy_from_slice(key);
    buf[16 + key.len()..].copy_from_slice(value);
    let crc = crc32fast::hash(&buf[4..]);
    buf[0..4].copy_from_slice(&crc.to_le_bytes());
    buf
}

/// Decodes one record from `reader`, which is positioned at `offset` bytes
/// into `path` (used only to produce helpful errors).
///
/// Returns `Ok(None)` on a clean end-of-stream (zero bytes read for the
/// header). A short read of 1..16 header bytes, a short key/value body, or
/// a CRC mismatch are all reported as errors, never silently as EOF.
pub fn decode<R: Read>(reader: &mut R, path: &Path, offset: u64) -> Result<Option<Entry>> {
    let mut header = [0u8; HEADER_LEN];
    let n = read_fill(reader, &mut header)?;
    if n == 0 {
        return Ok(None);
    }
    if n < HEADER_LEN {
        return Err(Error::TruncatedHeader { path: path.to_path_buf(), offset });
    }

    let crc = u32::from_le_bytes(header[0..4].try_into().unwrap());
    let timestamp = u32::from_le_bytes(header[4..8].try_into().unwrap());
    let key_size = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;
    let value_size = u32::from_le_bytes(header[12..16].try_into().unwrap()) as usize;

    let mut key = vec![0u8; key_size];
    let mut value = vec![0u8; value_size];
    reader.read_exact(&mut key).map_err(|err| truncated_or_io(err, path, offset))?;
    reader.read_exact(&mut value).map_err(|err| truncated_or_io(err, path, offset))?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header[4..]);
    hasher.update(&key);
    hasher.update(&value);
    let actual = hasher.finalize();
    if actual != crc {
        return Err(Error::CorruptRecord { path: path.to_path_buf(), offset, expected: crc, actual });
    }

    Ok(Some(Entry { timestamp, key, value }))
}

/// Maps a short read of the key/value body into `Error::TruncatedBody`,
/// passing through any other I/O failure unchanged.
fn truncated_or_io(err: std::io::Error, path: &Path, offset: u64) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::TruncatedBody { path: path.to_path_buf(), offset }
    } else {
        Error::Io(err)
    }
}

/// Like `Read::read`, but keeps reading until the buffer is full or the
/// underlying reader is exhausted, returning the number of bytes actually
/// filled. Used to tell a clean EOF (0 bytes) apart from a truncated read
/// (1..buf.len() bytes).
fn read_fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
