use crate::stream::net_stream::{NetStream, StreamError};

/// A value that writes itself to a [NetStream] in write mode and reads itself back in read mode,
///  using the same sequence of calls in both directions.
pub trait NetSerialize {
    fn net_serialize(&mut self, ns: &mut NetStream) -> Result<(), StreamError>;
}

/// A value that can be truncated to its low order bits on the wire
pub trait BitSerialize: NetSerialize {
    fn net_serialize_bits(&mut self, ns: &mut NetStream, bits: u32) -> Result<(), StreamError>;
}

macro_rules! serialize_numeric {
    ($($ty:ty),*) => {
        $(
            impl NetSerialize for $ty {
                fn net_serialize(&mut self, ns: &mut NetStream) -> Result<(), StreamError> {
                    ns.serialize_le(self)
                }
            }

            impl BitSerialize for $ty {
                fn net_serialize_bits(&mut self, ns: &mut NetStream, bits: u32) -> Result<(), StreamError> {
                    ns.serialize_le_bits(self, bits)
                }
            }
        )*
    };
}

serialize_numeric!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// a single bit
impl NetSerialize for bool {
    fn net_serialize(&mut self, ns: &mut NetStream) -> Result<(), StreamError> {
        ns.serialize_bit(self)
    }
}

/// the Unicode scalar value as a `u32`
impl NetSerialize for char {
    fn net_serialize(&mut self, ns: &mut NetStream) -> Result<(), StreamError> {
        let mut raw = *self as u32;
        ns.serialize_le(&mut raw)?;
        if ns.is_reading() {
            *self = char::from_u32(raw)
                .ok_or(StreamError::InvalidChar(raw))?;
        }
        Ok(())
    }
}

/// length prefixed UTF-8
impl NetSerialize for String {
    fn net_serialize(&mut self, ns: &mut NetStream) -> Result<(), StreamError> {
        if ns.is_reading() {
            let mut raw = Vec::new();
            ns.serialize_blob(&mut raw)?;
            *self = String::from_utf8(raw)
                .map_err(|_| StreamError::InvalidUtf8)?;
            Ok(())
        }
        else {
            let mut raw = std::mem::take(self).into_bytes();
            let result = ns.serialize_blob(&mut raw);
            // the bytes came out of a String, so they are valid UTF-8
            *self = String::from_utf8(raw).unwrap_or_default();
            result
        }
    }
}

/// length prefixed bytes
impl NetSerialize for Vec<u8> {
    fn net_serialize(&mut self, ns: &mut NetStream) -> Result<(), StreamError> {
        ns.serialize_blob(self)
    }
}
