//! Element types storable in a sparse table.

use std::fmt::Debug;

use bytemuck::Pod;

/// A fixed-width little-endian scalar stored in a [`SparseVector`](super::SparseVector).
///
/// Tables hold `u8`, `u16` or `u32` values. Encoded bytes are always
/// little-endian regardless of host byte order.
pub trait Element: Pod + PartialEq + Debug + Default {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Convert from host order to little-endian.
    fn to_le(self) -> Self;

    /// Convert from little-endian to host order.
    fn from_le(self) -> Self;

    /// Append the little-endian encoding of `values` to `out`.
    fn encode_le(values: &[Self], out: &mut Vec<u8>) {
        out.reserve(values.len() * Self::WIDTH);
        for v in values {
            out.extend_from_slice(bytemuck::bytes_of(&v.to_le()));
        }
    }

    /// Decode `bytes` into `out`. `bytes.len()` must equal `out.len() * WIDTH`.
    fn decode_le(bytes: &[u8], out: &mut [Self]) {
        bytemuck::cast_slice_mut::<Self, u8>(out).copy_from_slice(bytes);
        Self::fix_order(out);
    }

    /// Convert a buffer filled with raw little-endian data to host order in place.
    fn fix_order(values: &mut [Self]) {
        if cfg!(target_endian = "big") {
            for v in values.iter_mut() {
                *v = v.from_le();
            }
        }
    }
}

macro_rules! impl_element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();

                #[inline]
                fn to_le(self) -> Self {
                    <$t>::to_le(self)
                }

                #[inline]
                fn from_le(self) -> Self {
                    <$t>::from_le(self)
                }
            }
        )*
    };
}

impl_element!(u8, u16, u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u16_encoding_is_little_endian() {
        let mut out = Vec::new();
        u16::encode_le(&[0x1234, 0xABCD], &mut out);
        assert_eq!(out, vec![0x34, 0x12, 0xCD, 0xAB]);

        let mut decoded = [0u16; 2];
        u16::decode_le(&out, &mut decoded);
        assert_eq!(decoded, [0x1234, 0xABCD]);
    }

    #[test]
    fn test_u32_decoding() {
        let mut decoded = [0u32; 1];
        u32::decode_le(&[0xFF, 0xFF, 0xFF, 0xFF], &mut decoded);
        assert_eq!(decoded[0], 0xFFFF_FFFF);
    }
}
