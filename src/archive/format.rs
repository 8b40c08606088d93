//! Wire-level pieces shared by the source readers and the cache codec.

use std::io::{self, Read, Write};

use super::{Archive, ArchiveError, MAX_FRAME_HEIGHT, MAX_FRAME_WIDTH};
use crate::sparse::Element;
use crate::wire::{read_len, read_u16, read_u32, write_u32};

/// Length of the ROM name field at the start of every source file.
pub const ROM_NAME_LEN: usize = 64;

/// Header length (in 32-bit words) from which a source file uses the current layout.
pub const CURRENT_FORMAT_MIN_WORDS: u32 = 14;

/// Header word thresholds of the optional legacy sections.
pub const LEGACY_TRIGGERS_MIN_WORDS: u32 = 11;
pub const LEGACY_SPRITE_BOXES_MIN_WORDS: u32 = 12;
pub const LEGACY_BACKGROUNDS_MIN_WORDS: u32 = 13;

/// Header word threshold of the 256x64 comparison flag.
pub const CURRENT_256X64_MIN_WORDS: u32 = 20;

/// Upper bound on a flat array read back from a cache stream.
const MAX_FLAT_LEN: usize = 1 << 24;

/// Leading fields common to both source layouts.
#[derive(Debug, Clone)]
pub struct SourcePreamble {
    /// ROM name, truncated at the first NUL.
    pub name: String,
    /// Declared header length in bytes.
    pub header_len: u32,
}

impl SourcePreamble {
    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        let mut raw = [0u8; ROM_NAME_LEN];
        r.read_exact(&mut raw)?;
        let header_len = read_u32(r)?;
        Ok(Self {
            name: decode_name(&raw),
            header_len,
        })
    }

    /// Header length in 32-bit words.
    #[inline]
    pub fn header_words(&self) -> u32 {
        self.header_len / 4
    }

    pub fn is_current_format(&self) -> bool {
        self.header_words() >= CURRENT_FORMAT_MIN_WORDS
    }
}

/// Decode a NUL-padded name field.
pub fn decode_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Encode a name into a NUL-padded field, truncating if needed.
pub fn encode_name(name: &str) -> [u8; ROM_NAME_LEN] {
    let mut raw = [0u8; ROM_NAME_LEN];
    let bytes = name.as_bytes();
    let n = bytes.len().min(ROM_NAME_LEN - 1);
    raw[..n].copy_from_slice(&bytes[..n]);
    raw
}

/// Scalar header of a legacy source file.
#[derive(Debug, Clone, Default)]
pub struct LegacyHeader {
    pub width: u32,
    pub height: u32,
    pub nframes: u32,
    pub nocolors: u32,
    pub nccolors: u32,
    pub ncompmasks: u32,
    pub nmovmasks: u32,
    pub nsprites: u32,
    pub nbackgrounds: u16,
}

impl LegacyHeader {
    pub fn read_from<R: Read + ?Sized>(r: &mut R, header_words: u32) -> Result<Self, ArchiveError> {
        let width = read_u32(r)?;
        let height = read_u32(r)?;
        // Stored as 32 bits but frame ids never exceed 16 bits.
        let nframes = read_u32(r)? as u16 as u32;
        let nocolors = read_u32(r)?;
        let nccolors = read_u32(r)?;
        check_nonzero("width", width)?;
        check_nonzero("height", height)?;
        check_nonzero("frame count", nframes)?;
        check_nonzero("color count", nocolors)?;
        check_nonzero("palette color count", nccolors)?;

        let ncompmasks = read_u32(r)?;
        let nmovmasks = read_u32(r)?;
        let nsprites = read_u32(r)?;
        let nbackgrounds = if header_words >= LEGACY_BACKGROUNDS_MIN_WORDS {
            read_u16(r)?
        } else {
            0
        };

        let header = Self {
            width,
            height,
            nframes,
            nocolors,
            nccolors,
            ncompmasks,
            nmovmasks,
            nsprites,
            nbackgrounds,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), ArchiveError> {
        check_max("width", self.width, MAX_FRAME_WIDTH)?;
        check_max("height", self.height, MAX_FRAME_HEIGHT)?;
        check_max("color count", self.nocolors, super::MAX_COLORS)?;
        check_max("palette color count", self.nccolors, super::MAX_COLORS)?;
        check_max("mask count", self.ncompmasks, super::MAX_MASKS)?;
        check_max("sprite count", self.nsprites, super::MAX_SPRITES)?;
        Ok(())
    }
}

/// Scalar header of a current-format source file.
#[derive(Debug, Clone, Default)]
pub struct CurrentHeader {
    pub width: u32,
    pub height: u32,
    pub width_extra: u32,
    pub height_extra: u32,
    pub nframes: u32,
    pub nocolors: u32,
    pub ncompmasks: u32,
    pub nsprites: u32,
    pub nbackgrounds: u16,
    pub is256x64: bool,
}

impl CurrentHeader {
    pub fn read_from<R: Read + ?Sized>(r: &mut R, header_words: u32) -> Result<Self, ArchiveError> {
        let width = read_u32(r)?;
        let height = read_u32(r)?;
        let width_extra = read_u32(r)?;
        let height_extra = read_u32(r)?;
        let nframes = read_u32(r)?;
        let nocolors = read_u32(r)?;
        check_nonzero("width", width)?;
        check_nonzero("height", height)?;
        check_nonzero("frame count", nframes)?;
        check_nonzero("color count", nocolors)?;

        let ncompmasks = read_u32(r)?;
        let nsprites = read_u32(r)?;
        let nbackgrounds = read_u16(r)?;
        let is256x64 = if header_words >= CURRENT_256X64_MIN_WORDS {
            read_u32(r)? != 0
        } else {
            false
        };

        let header = Self {
            width,
            height,
            width_extra,
            height_extra,
            nframes,
            nocolors,
            ncompmasks,
            nsprites,
            nbackgrounds,
            is256x64,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), ArchiveError> {
        if self.height != 32 && self.height != 64 {
            return Err(ArchiveError::UnsupportedHeight(self.height));
        }
        check_max("width", self.width, MAX_FRAME_WIDTH)?;
        check_max("extra width", self.width_extra, MAX_FRAME_WIDTH)?;
        check_max("extra height", self.height_extra, MAX_FRAME_HEIGHT)?;
        check_max("frame count", self.nframes, super::MAX_FRAMES)?;
        check_max("color count", self.nocolors, super::MAX_COLORS)?;
        check_max("mask count", self.ncompmasks, super::MAX_MASKS)?;
        check_max("sprite count", self.nsprites, super::MAX_SPRITES)?;
        Ok(())
    }
}

pub(crate) fn check_nonzero(field: &'static str, value: u32) -> Result<(), ArchiveError> {
    if value == 0 {
        return Err(ArchiveError::ZeroScalar(field));
    }
    Ok(())
}

pub(crate) fn check_max(field: &'static str, value: u32, max: u32) -> Result<(), ArchiveError> {
    if value > max {
        return Err(ArchiveError::OutOfRange { field, value, max });
    }
    Ok(())
}

/// An optional table group appended to the current layout.
///
/// Present only when the declared header length reaches `min_header_words`;
/// otherwise `absent` sizes the tables so lookups return their sentinels.
pub struct TrailingSection {
    pub name: &'static str,
    pub min_header_words: u32,
    pub read: fn(&mut Archive, &mut dyn Read) -> io::Result<()>,
    pub absent: fn(&mut Archive),
}

/// Skip `n` bytes of a section that is parsed but not kept.
pub fn skip_bytes<R: Read + ?Sized>(r: &mut R, n: u64) -> io::Result<()> {
    let mut buf = [0u8; 4096];
    let mut left = n;
    while left > 0 {
        let chunk = left.min(buf.len() as u64) as usize;
        r.read_exact(&mut buf[..chunk])?;
        left -= chunk as u64;
    }
    Ok(())
}

/// Read `len` little-endian values.
pub fn read_values<T: Element, R: Read + ?Sized>(r: &mut R, len: usize) -> io::Result<Vec<T>> {
    let mut bytes = vec![0u8; len * T::WIDTH];
    r.read_exact(&mut bytes)?;
    let mut values = vec![T::default(); len];
    T::decode_le(&bytes, &mut values);
    Ok(values)
}

/// Write a length-prefixed flat array.
pub fn write_flat<T: Element, W: Write + ?Sized>(w: &mut W, values: &[T]) -> io::Result<()> {
    write_u32(w, values.len() as u32)?;
    let mut bytes = Vec::new();
    T::encode_le(values, &mut bytes);
    w.write_all(&bytes)
}

/// Read a length-prefixed flat array written by [`write_flat`].
pub fn read_flat<T: Element, R: Read + ?Sized>(r: &mut R) -> io::Result<Vec<T>> {
    let len = read_len(r, MAX_FLAT_LEN, "array")?;
    read_values(r, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_name_roundtrip() {
        let raw = encode_name("afm_113b");
        assert_eq!(decode_name(&raw), "afm_113b");
        let long = "x".repeat(100);
        assert_eq!(decode_name(&encode_name(&long)).len(), ROM_NAME_LEN - 1);
    }

    #[test]
    fn test_preamble_version_split() {
        let mut bytes = encode_name("t2_l8").to_vec();
        bytes.extend_from_slice(&(14u32 * 4).to_le_bytes());
        let preamble = SourcePreamble::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(preamble.name, "t2_l8");
        assert!(preamble.is_current_format());

        let mut bytes = encode_name("t2_l8").to_vec();
        bytes.extend_from_slice(&(13u32 * 4).to_le_bytes());
        let preamble = SourcePreamble::read_from(&mut Cursor::new(bytes)).unwrap();
        assert!(!preamble.is_current_format());
    }

    #[test]
    fn test_legacy_header_rejects_zero_scalars() {
        let mut bytes = Vec::new();
        for v in [128u32, 32, 0, 4, 4, 0, 0, 0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let err = LegacyHeader::read_from(&mut Cursor::new(bytes), 12).unwrap_err();
        assert!(matches!(err, ArchiveError::ZeroScalar("frame count")));
    }

    #[test]
    fn test_legacy_header_truncates_frame_count() {
        let mut bytes = Vec::new();
        for v in [128u32, 32, 0x0001_0002, 4, 4, 0, 0, 0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let header = LegacyHeader::read_from(&mut Cursor::new(bytes), 12).unwrap();
        assert_eq!(header.nframes, 2);
        assert_eq!(header.nbackgrounds, 0);
    }

    #[test]
    fn test_current_header_rejects_odd_height() {
        let mut bytes = Vec::new();
        for v in [128u32, 40, 256, 64, 1, 4, 0, 0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.extend_from_slice(&0u16.to_le_bytes());
        let err = CurrentHeader::read_from(&mut Cursor::new(bytes), 14).unwrap_err();
        assert!(matches!(err, ArchiveError::UnsupportedHeight(40)));
    }

    #[test]
    fn test_skip_bytes() {
        let mut cursor = Cursor::new(vec![0u8; 10_000]);
        skip_bytes(&mut cursor, 9_000).unwrap();
        assert_eq!(cursor.position(), 9_000);
        assert!(skip_bytes(&mut cursor, 2_000).is_err());
    }
}
