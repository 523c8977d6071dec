//! Little-endian byte representation of fixed-width numeric types.
//!
//! Every type is decomposed into (and reassembled from) its bytes with explicit shifts and masks,
//!  so the wire representation does not depend on the host's endianness or memory layout.

/// A fixed-width value with a stable little-endian byte representation. `Bytes` is always a
///  `[u8; N]` with `N * 8 == BITS`.
pub trait LeBytes: Copy {
    type Bytes: AsRef<[u8]> + AsMut<[u8]> + Default;
    const BITS: u32;

    fn to_le(self) -> Self::Bytes;
    fn from_le(bytes: Self::Bytes) -> Self;
}

macro_rules! le_bytes_unsigned {
    ($ty:ty, $n:literal) => {
        impl LeBytes for $ty {
            type Bytes = [u8; $n];
            const BITS: u32 = <$ty>::BITS;

            fn to_le(self) -> [u8; $n] {
                let mut result = [0u8; $n];
                for (i, b) in result.iter_mut().enumerate() {
                    *b = ((self >> (8 * i)) & 0xff) as u8;
                }
                result
            }

            fn from_le(bytes: [u8; $n]) -> $ty {
                bytes.iter()
                    .enumerate()
                    .fold(0, |acc, (i, b)| acc | ((*b as $ty) << (8 * i)))
            }
        }
    };
}

le_bytes_unsigned!(u8, 1);
le_bytes_unsigned!(u16, 2);
le_bytes_unsigned!(u32, 4);
le_bytes_unsigned!(u64, 8);

/// signed and floating point types are mapped onto the unsigned type of the same width
macro_rules! le_bytes_via {
    ($ty:ty, $unsigned:ty, $n:literal, $to:expr, $from:expr) => {
        impl LeBytes for $ty {
            type Bytes = [u8; $n];
            const BITS: u32 = <$unsigned>::BITS;

            fn to_le(self) -> [u8; $n] {
                let to: fn($ty) -> $unsigned = $to;
                <$unsigned as LeBytes>::to_le(to(self))
            }

            fn from_le(bytes: [u8; $n]) -> $ty {
                let from: fn($unsigned) -> $ty = $from;
                from(<$unsigned as LeBytes>::from_le(bytes))
            }
        }
    };
}

le_bytes_via!(i8, u8, 1, |v| v as u8, |v| v as i8);
le_bytes_via!(i16, u16, 2, |v| v as u16, |v| v as i16);
le_bytes_via!(i32, u32, 4, |v| v as u32, |v| v as i32);
le_bytes_via!(i64, u64, 8, |v| v as u64, |v| v as i64);
le_bytes_via!(f32, u32, 4, f32::to_bits, f32::from_bits);
le_bytes_via!(f64, u64, 8, f64::to_bits, f64::from_bits);
