//! Frame checksums used for identification.
//!
//! All variants are the standard CRC-32 (IEEE) of a byte sequence: the whole
//! raster, or only the pixels whose mask byte is zero, optionally with every
//! value above 1 collapsed to 1 ("shape" comparison).

use crc32fast::Hasher;

/// Full checksum of a raster.
#[inline]
pub fn crc32(frame: &[u8]) -> u32 {
    crc32fast::hash(frame)
}

/// Checksum of `frame` restricted to pixels where `mask` is zero.
pub fn frame_checksum(frame: &[u8], mask: Option<&[u8]>, shape: bool) -> u32 {
    let mut hasher = Hasher::new();
    match mask {
        None => feed(&mut hasher, frame, shape),
        Some(mask) => {
            let n = frame.len().min(mask.len());
            let mut i = 0;
            while i < n {
                if mask[i] != 0 {
                    i += 1;
                    continue;
                }
                let start = i;
                while i < n && mask[i] == 0 {
                    i += 1;
                }
                feed(&mut hasher, &frame[start..i], shape);
            }
        }
    }
    hasher.finalize()
}

fn feed(hasher: &mut Hasher, run: &[u8], shape: bool) {
    if !shape {
        hasher.update(run);
        return;
    }
    let mut buf = [0u8; 256];
    for chunk in run.chunks(buf.len()) {
        for (dst, &src) in buf.iter_mut().zip(chunk) {
            *dst = src.min(1);
        }
        hasher.update(&buf[..chunk.len()]);
    }
}
