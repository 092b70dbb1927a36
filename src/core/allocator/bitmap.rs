//! Recovery bitmap: the persisted one-bit-per-block record of allocation state
//!
//! The allocator only ever reads it through [`RecoveryBitmap`]. [`DiskBitmap`]
//! is the in-memory image the journal layer keeps up to date and flushes; it
//! is shared with the allocator behind an `Arc` so bit updates made by the
//! journal are visible to `is_allocated` queries.
//!
//! Bits:
//! - 0 = free block
//! - 1 = allocated block

use crate::core::error::{BlockSpaceError, Result};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Read-only view of the recovery bitmap
pub trait RecoveryBitmap: Send + Sync {
    /// Number of blocks covered
    fn total_bits(&self) -> u64;

    /// True if block `index` is recorded as in use
    fn is_bit_set(&self, index: u64) -> bool;

    /// True if every block in `[start, start + count)` is in use
    fn is_bits_set(&self, start: u64, count: u64) -> bool {
        (start..start + count).all(|i| self.is_bit_set(i))
    }
}

/// Bitmap image backed by atomic 64-bit words
#[derive(Debug)]
pub struct DiskBitmap {
    /// Bitmap words (each word = 64 bits = 64 blocks)
    words: Vec<AtomicU64>,

    /// Total number of blocks tracked
    total_bits: u64,
}

impl DiskBitmap {
    /// Create an all-free bitmap
    pub fn new(total_bits: u64) -> Self {
        let num_words = ((total_bits + 63) / 64) as usize;
        DiskBitmap {
            words: (0..num_words).map(|_| AtomicU64::new(0)).collect(),
            total_bits,
        }
    }

    /// Create a bitmap with the listed blocks already in use
    pub fn with_set_bits(total_bits: u64, set: &[u64]) -> Result<Self> {
        let bitmap = Self::new(total_bits);
        for &index in set {
            bitmap.set_bits(index, 1)?;
        }
        Ok(bitmap)
    }

    #[inline]
    fn locate(index: u64) -> (usize, u64) {
        ((index / 64) as usize, 1u64 << (index % 64))
    }

    fn check_range(&self, start: u64, count: u64) -> Result<()> {
        match start.checked_add(count) {
            Some(end) if end <= self.total_bits => Ok(()),
            _ => Err(BlockSpaceError::InvalidBlockId(start)),
        }
    }

    /// Mark `[start, start + count)` as in use
    pub fn set_bits(&self, start: u64, count: u64) -> Result<()> {
        self.check_range(start, count)?;
        for index in start..start + count {
            let (word_idx, mask) = Self::locate(index);
            self.words[word_idx].fetch_or(mask, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Mark `[start, start + count)` as free
    pub fn clear_bits(&self, start: u64, count: u64) -> Result<()> {
        self.check_range(start, count)?;
        for index in start..start + count {
            let (word_idx, mask) = Self::locate(index);
            self.words[word_idx].fetch_and(!mask, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Number of set bits in `[start, start + count)`
    pub fn count_set_in(&self, start: u64, count: u64) -> u64 {
        let end = start.saturating_add(count).min(self.total_bits);
        (start..end).filter(|&i| self.is_bit_set(i)).count() as u64
    }

    /// Number of set bits overall
    pub fn count_set(&self) -> u64 {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Acquire).count_ones() as u64)
            .sum()
    }

    /// Serialize as `total_bits | words... | crc32`, all little-endian
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.words.len() * 8 + 4);
        out.extend_from_slice(&self.total_bits.to_le_bytes());
        for word in &self.words {
            out.extend_from_slice(&word.load(Ordering::Acquire).to_le_bytes());
        }
        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    /// Parse an image produced by [`DiskBitmap::to_bytes`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 12 {
            return Err(BlockSpaceError::CorruptBitmap(format!(
                "image too short: {} bytes",
                bytes.len()
            )));
        }

        let (body, trailer) = bytes.split_at(bytes.len() - 4);
        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(trailer);
        let expected = u32::from_le_bytes(crc_bytes);
        let actual = crc32fast::hash(body);
        if expected != actual {
            tracing::warn!(expected, actual, "Recovery bitmap checksum mismatch");
            return Err(BlockSpaceError::CorruptBitmap(format!(
                "checksum mismatch: expected {:#010x}, got {:#010x}",
                expected, actual
            )));
        }

        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&body[..8]);
        let total_bits = u64::from_le_bytes(len_bytes);
        let num_words = total_bits.div_ceil(64);

        let word_bytes = &body[8..];
        if word_bytes.len() as u64 != num_words.saturating_mul(8) {
            return Err(BlockSpaceError::CorruptBitmap(format!(
                "expected {} words for {} bits, found {} bytes",
                num_words,
                total_bits,
                word_bytes.len()
            )));
        }

        let words: Vec<AtomicU64> = word_bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                AtomicU64::new(u64::from_le_bytes(raw))
            })
            .collect();

        // Bits past total_bits must be zero
        if total_bits % 64 != 0 {
            if let Some(last) = words.last() {
                let tail_mask = !((1u64 << (total_bits % 64)) - 1);
                if last.load(Ordering::Relaxed) & tail_mask != 0 {
                    return Err(BlockSpaceError::CorruptBitmap(
                        "bits set beyond the last block".to_string(),
                    ));
                }
            }
        }

        Ok(DiskBitmap { words, total_bits })
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_to(std::fs::File::create(path)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::read_from(std::fs::File::open(path)?)
    }
}

impl RecoveryBitmap for DiskBitmap {
    fn total_bits(&self) -> u64 {
        self.total_bits
    }

    fn is_bit_set(&self, index: u64) -> bool {
        if index >= self.total_bits {
            return false;
        }
        let (word_idx, mask) = Self::locate(index);
        self.words[word_idx].load(Ordering::Acquire) & mask != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_creation() {
        let bm = DiskBitmap::new(1000);
        assert_eq!(bm.total_bits(), 1000);
        assert_eq!(bm.count_set(), 0);
        assert!(!bm.is_bit_set(0));
        assert!(!bm.is_bit_set(999));
    }

    #[test]
    fn test_set_and_clear() {
        let bm = DiskBitmap::new(200);
        bm.set_bits(60, 10).unwrap();
        assert!(bm.is_bits_set(60, 10));
        assert!(!bm.is_bit_set(59));
        assert!(!bm.is_bit_set(70));
        assert_eq!(bm.count_set(), 10);
        assert_eq!(bm.count_set_in(64, 64), 6);

        bm.clear_bits(62, 2).unwrap();
        assert!(!bm.is_bits_set(60, 10));
        assert_eq!(bm.count_set(), 8);
    }

    #[test]
    fn test_out_of_range() {
        let bm = DiskBitmap::new(100);
        assert!(matches!(
            bm.set_bits(99, 2),
            Err(BlockSpaceError::InvalidBlockId(99))
        ));
        assert!(bm.clear_bits(u64::MAX, 2).is_err());
        assert!(!bm.is_bit_set(100));
    }

    #[test]
    fn test_image_roundtrip_preserves_bits() {
        let bm = DiskBitmap::with_set_bits(130, &[0, 64, 129]).unwrap();
        let restored = DiskBitmap::from_bytes(&bm.to_bytes()).unwrap();
        assert_eq!(restored.total_bits(), 130);
        assert!(restored.is_bit_set(0));
        assert!(restored.is_bit_set(64));
        assert!(restored.is_bit_set(129));
        assert_eq!(restored.count_set(), 3);
    }

    #[test]
    fn test_image_checksum_detects_flip() {
        let bm = DiskBitmap::with_set_bits(64, &[3]).unwrap();
        let mut bytes = bm.to_bytes();
        bytes[9] ^= 0x01;
        assert!(matches!(
            DiskBitmap::from_bytes(&bytes),
            Err(BlockSpaceError::CorruptBitmap(_))
        ));
    }

    #[test]
    fn test_image_truncated() {
        assert!(DiskBitmap::from_bytes(&[0u8; 5]).is_err());

        let bm = DiskBitmap::new(128);
        let bytes = bm.to_bytes();
        // Drop one word but recompute the checksum so only the length is wrong
        let mut body = bytes[..bytes.len() - 12].to_vec();
        let crc = crc32fast::hash(&body);
        body.extend_from_slice(&crc.to_le_bytes());
        assert!(matches!(
            DiskBitmap::from_bytes(&body),
            Err(BlockSpaceError::CorruptBitmap(_))
        ));
    }

    #[test]
    fn test_image_rejects_tail_bits() {
        let mut body = Vec::new();
        body.extend_from_slice(&10u64.to_le_bytes());
        body.extend_from_slice(&(1u64 << 20).to_le_bytes());
        let crc = crc32fast::hash(&body);
        body.extend_from_slice(&crc.to_le_bytes());
        assert!(DiskBitmap::from_bytes(&body).is_err());
    }
}
