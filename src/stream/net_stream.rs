use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::stream::byte_order::LeBytes;
use crate::stream::serialize::{BitSerialize, NetSerialize};

/// Length of the envelope prefix that holds the bit buffer length (u32, big endian)
pub const HEADER_SIZE: usize = 4;

/// `BIT_MASK[n]` has the low `n` bits set
pub const BIT_MASK: [u8; 9] = [0x00, 0x01, 0x03, 0x07, 0x0F, 0x1F, 0x3F, 0x7F, 0xFF];

const BIT_CURSOR_START: i8 = 7;
const BIT_CURSOR_END: i8 = -1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream is not open")]
    Closed,
    #[error("envelope of {len} bytes is too short for its header")]
    TruncatedEnvelope { len: usize },
    #[error("envelope announces {bit_buffer_len} bit buffer bytes, but only {available} are available")]
    BitBufferOverrun { bit_buffer_len: usize, available: usize },
    #[error("attempted to read {requested} bytes past the end of the byte buffer ({remaining} remaining)")]
    ReadPastEnd { requested: usize, remaining: usize },
    #[error("attempted to read past the end of the bit buffer")]
    BitBufferExhausted,
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("{0:#x} is not a valid char")]
    InvalidChar(u32),
    #[error("expected a blob of {expected} bytes, was {actual}")]
    BlobLength { expected: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Closed,
    Write,
    Read,
}

/// NetStream serializes exactly one logical message. Whole bytes go into a byte buffer, while
///  sub-byte fields are packed MSB first into a separate bit buffer. The two are framed as
///
/// ```ascii
/// [bit buffer length: u32 BE][byte buffer][bit buffer]
/// ```
///
/// The same `serialize*` calls are used for writing and for reading, so a message's layout is
///  defined by a single function that works in both directions.
///
/// NB: Writing never fails. Reading past the end of either buffer fails with a [StreamError]
///  rather than producing garbage, so truncated and corrupt messages are detectable.
#[derive(Debug)]
pub struct NetStream {
    mode: StreamMode,
    byte_buffer: BytesMut,
    byte_read_cursor: usize,
    bit_buffer: BytesMut,
    bit_read_cursor: usize,
    working_bits: u8,
    bit_cursor: i8,
}

impl Default for NetStream {
    fn default() -> Self {
        NetStream::new()
    }
}

impl NetStream {
    pub fn new() -> NetStream {
        NetStream {
            mode: StreamMode::Closed,
            byte_buffer: BytesMut::new(),
            byte_read_cursor: 0,
            bit_buffer: BytesMut::new(),
            bit_read_cursor: 0,
            working_bits: 0,
            bit_cursor: BIT_CURSOR_START,
        }
    }

    pub fn writer() -> NetStream {
        let mut result = NetStream::new();
        result.open_write();
        result
    }

    pub fn reader(data: &[u8]) -> Result<NetStream, StreamError> {
        let mut result = NetStream::new();
        result.open_read(data)?;
        Ok(result)
    }

    /// `None` opens the stream for writing, `Some(data)` for reading `data`. Re-opening discards
    ///  all previous state.
    pub fn open(&mut self, data: Option<&[u8]>) -> Result<(), StreamError> {
        match data {
            None => {
                self.open_write();
                Ok(())
            }
            Some(data) => self.open_read(data),
        }
    }

    pub fn open_write(&mut self) {
        self.reset();
        self.byte_buffer.reserve(1024);
        self.bit_buffer.reserve(8);
        self.mode = StreamMode::Write;
    }

    pub fn open_read(&mut self, data: &[u8]) -> Result<(), StreamError> {
        self.reset();

        let mut buf = data;
        if buf.remaining() < HEADER_SIZE {
            return Err(StreamError::TruncatedEnvelope { len: data.len() });
        }
        let bit_buffer_len = buf.get_u32() as usize;
        if bit_buffer_len > buf.remaining() {
            return Err(StreamError::BitBufferOverrun { bit_buffer_len, available: buf.remaining() });
        }

        let (bytes, bits) = buf.split_at(buf.len() - bit_buffer_len);
        self.byte_buffer.put_slice(bytes);
        self.bit_buffer.put_slice(bits);
        self.bit_cursor = BIT_CURSOR_END;
        self.mode = StreamMode::Read;
        Ok(())
    }

    /// In write mode, this flushes a partially filled working byte and returns the framed message.
    ///  In read mode, it just resets the stream and returns `None`.
    pub fn close(&mut self) -> Option<Vec<u8>> {
        let result = if self.mode == StreamMode::Write {
            if self.bit_cursor != BIT_CURSOR_START {
                self.flush_bits();
            }

            let mut result = BytesMut::with_capacity(self.count());
            result.put_u32(self.bit_buffer.len() as u32);
            result.put_slice(&self.byte_buffer);
            result.put_slice(&self.bit_buffer);
            Some(result.to_vec())
        }
        else {
            None
        };

        self.reset();
        result
    }

    fn reset(&mut self) {
        self.mode = StreamMode::Closed;
        self.byte_buffer.clear();
        self.byte_read_cursor = 0;
        self.bit_buffer.clear();
        self.bit_read_cursor = 0;
        self.working_bits = 0;
        self.bit_cursor = BIT_CURSOR_START;
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    pub fn is_reading(&self) -> bool {
        self.mode == StreamMode::Read
    }

    /// In write mode, this is the exact length [NetStream::close] will return. In read mode it
    ///  is the length of the message being read.
    pub fn count(&self) -> usize {
        match self.mode {
            StreamMode::Closed => 0,
            StreamMode::Read => HEADER_SIZE + self.byte_buffer.len() + self.bit_buffer.len(),
            StreamMode::Write => {
                let pending = if self.bit_cursor == BIT_CURSOR_START { 0 } else { 1 };
                HEADER_SIZE + self.byte_buffer.len() + self.bit_buffer.len() + pending
            }
        }
    }

    /// number of bits of the working byte that were written or consumed
    pub fn working_bit_length(&self) -> usize {
        if self.bit_cursor < 0 {
            0
        }
        else {
            (BIT_CURSOR_START - self.bit_cursor) as usize
        }
    }

    pub fn serialize<T: NetSerialize + ?Sized>(&mut self, value: &mut T) -> Result<(), StreamError> {
        value.net_serialize(self)
    }

    /// Serializes only the low `bits` bits of `value`; the high order bits are silently discarded
    ///  on write and zero on read. `bits == 0` is a no-op, `bits` at or above the type's width
    ///  serializes the full value.
    pub fn serialize_bits<T: BitSerialize + ?Sized>(&mut self, value: &mut T, bits: u32) -> Result<(), StreamError> {
        value.net_serialize_bits(self, bits)
    }

    /// full width, byte by byte in little endian order
    pub fn serialize_le<T: LeBytes>(&mut self, value: &mut T) -> Result<(), StreamError> {
        match self.mode {
            StreamMode::Write => {
                self.byte_buffer.put_slice(value.to_le().as_ref());
                Ok(())
            }
            StreamMode::Read => {
                let mut bytes = T::Bytes::default();
                let len = bytes.as_ref().len();
                bytes.as_mut().copy_from_slice(self.take_bytes(len)?);
                *value = T::from_le(bytes);
                Ok(())
            }
            StreamMode::Closed => Err(StreamError::Closed),
        }
    }

    /// Whole bytes of the low `bits` bits go into the byte buffer, the remaining (at most 8) bits
    ///  into the bit buffer.
    pub fn serialize_le_bits<T: LeBytes>(&mut self, value: &mut T, bits: u32) -> Result<(), StreamError> {
        if bits == 0 {
            return Ok(());
        }
        if bits >= T::BITS {
            return self.serialize_le(value);
        }

        let mut bytes = match self.mode {
            StreamMode::Write => value.to_le(),
            StreamMode::Read => T::Bytes::default(),
            StreamMode::Closed => return Err(StreamError::Closed),
        };

        let full_bytes = ((bits - 1) / 8) as usize;
        let remainder = bits - 8 * full_bytes as u32;
        {
            let bytes = bytes.as_mut();
            for b in &mut bytes[..full_bytes] {
                self.serialize_byte(b)?;
            }
            self.serialize_byte_bits(&mut bytes[full_bytes], remainder)?;
        }

        if self.mode == StreamMode::Read {
            *value = T::from_le(bytes);
        }
        Ok(())
    }

    pub fn serialize_byte(&mut self, value: &mut u8) -> Result<(), StreamError> {
        self.serialize_le(value)
    }

    pub fn serialize_bit(&mut self, value: &mut bool) -> Result<(), StreamError> {
        match self.mode {
            StreamMode::Write => {
                if *value {
                    self.working_bits |= 1u8 << self.bit_cursor;
                }
                self.bit_cursor -= 1;
                if self.bit_cursor < 0 {
                    self.flush_bits();
                }
                Ok(())
            }
            StreamMode::Read => {
                if self.bit_cursor < 0 {
                    self.fetch_bits()?;
                }
                *value = self.working_bits & (1u8 << self.bit_cursor) != 0;
                self.bit_cursor -= 1;
                Ok(())
            }
            StreamMode::Closed => Err(StreamError::Closed),
        }
    }

    /// The bit packing core: the low `bits` bits of a single byte go into the working byte,
    ///  spilling into the next working byte if they do not fit.
    pub fn serialize_byte_bits(&mut self, value: &mut u8, bits: u32) -> Result<(), StreamError> {
        if bits == 0 {
            return Ok(());
        }
        if bits >= u8::BITS {
            return self.serialize_byte(value);
        }
        let bits = bits as i8;

        match self.mode {
            StreamMode::Write => {
                let writeable = self.bit_cursor + 1;
                if writeable >= bits {
                    let shift = writeable - bits;
                    self.working_bits |= (*value & BIT_MASK[bits as usize]) << shift;
                    self.bit_cursor -= bits;
                    if self.bit_cursor < 0 {
                        self.flush_bits();
                    }
                }
                else {
                    let remainder = bits - writeable;
                    self.working_bits |= (*value >> remainder) & BIT_MASK[writeable as usize];
                    self.flush_bits();
                    let shift = self.bit_cursor - remainder + 1;
                    self.working_bits |= (*value & BIT_MASK[remainder as usize]) << shift;
                    self.bit_cursor -= remainder;
                }
                Ok(())
            }
            StreamMode::Read => {
                if self.bit_cursor < 0 {
                    self.fetch_bits()?;
                }

                let readable = self.bit_cursor + 1;
                if readable >= bits {
                    let shift = readable - bits;
                    *value = (self.working_bits >> shift) & BIT_MASK[bits as usize];
                    self.bit_cursor -= bits;
                }
                else {
                    let high = self.working_bits & BIT_MASK[readable as usize];
                    self.fetch_bits()?;
                    let remainder = bits - readable;
                    let shift = self.bit_cursor + 1 - remainder;
                    *value = (high << remainder) | ((self.working_bits >> shift) & BIT_MASK[remainder as usize]);
                    self.bit_cursor -= remainder;
                }
                Ok(())
            }
            StreamMode::Closed => Err(StreamError::Closed),
        }
    }

    /// A `u32` length followed by the raw bytes, both in the byte buffer
    pub fn serialize_blob(&mut self, value: &mut Vec<u8>) -> Result<(), StreamError> {
        let mut len = value.len() as u32;
        self.serialize_le(&mut len)?;

        match self.mode {
            StreamMode::Write => {
                self.byte_buffer.put_slice(value);
            }
            StreamMode::Read => {
                let bytes = self.take_bytes(len as usize)?;
                value.clear();
                value.extend_from_slice(bytes);
            }
            StreamMode::Closed => return Err(StreamError::Closed),
        }
        Ok(())
    }

    fn take_bytes(&mut self, len: usize) -> Result<&[u8], StreamError> {
        let remaining = self.byte_buffer.len() - self.byte_read_cursor;
        if len > remaining {
            return Err(StreamError::ReadPastEnd { requested: len, remaining });
        }

        let start = self.byte_read_cursor;
        self.byte_read_cursor += len;
        Ok(&self.byte_buffer[start..start + len])
    }

    fn flush_bits(&mut self) {
        self.bit_buffer.put_u8(self.working_bits);
        self.working_bits = 0;
        self.bit_cursor = BIT_CURSOR_START;
    }

    fn fetch_bits(&mut self) -> Result<(), StreamError> {
        let Some(&bits) = self.bit_buffer.get(self.bit_read_cursor) else {
            return Err(StreamError::BitBufferExhausted);
        };
        self.bit_read_cursor += 1;
        self.working_bits = bits;
        self.bit_cursor = BIT_CURSOR_START;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_bit_mask() {
        for n in 0..=8 {
            assert_eq!(BIT_MASK[n] as u32, (1u32 << n) - 1);
        }
    }

    #[rstest]
    #[case::one(1, 0xA0)]
    #[case::two(2, 0xB0)]
    #[case::three(3, 0x98)]
    #[case::four(4, 0xAC)]
    #[case::five(5, 0x96)]
    fn test_write_bits_simple(#[case] bits: u32, #[case] expected_working: u8) {
        let mut ns = NetStream::writer();
        let mut prefix = 0xAAu8;
        ns.serialize_byte_bits(&mut prefix, 2).unwrap();
        assert_eq!(prefix, 0xAA);
        assert_eq!(ns.working_bits, 0x80);
        assert_eq!(ns.working_bit_length(), 2);

        let mut value = 0xABu8;
        ns.serialize_byte_bits(&mut value, bits).unwrap();
        assert_eq!(value, 0xAB);
        assert_eq!(ns.working_bits, expected_working);
        assert_eq!(ns.working_bit_length(), 2 + bits as usize);
        assert!(ns.bit_buffer.is_empty());
    }

    #[test]
    fn test_write_bits_fill_working_byte() {
        let mut ns = NetStream::writer();
        ns.serialize_byte_bits(&mut 0xAA, 2).unwrap();
        ns.serialize_byte_bits(&mut 0xAB, 6).unwrap();

        assert_eq!(ns.bit_buffer.as_ref(), &[0xAB]);
        assert_eq!(ns.working_bits, 0);
        assert_eq!(ns.working_bit_length(), 0);
    }

    #[rstest]
    #[case::five(5, vec![0xA5], 0x80, 1)]
    #[case::six(6, vec![0xAA], 0xC0, 2)]
    #[case::seven(7, vec![0xA5], 0x60, 3)]
    fn test_write_bits_overflow(#[case] bits: u32, #[case] expected_bit_buffer: Vec<u8>, #[case] expected_working: u8, #[case] expected_len: usize) {
        let mut ns = NetStream::writer();
        ns.serialize_byte_bits(&mut 0xAA, 4).unwrap();
        assert_eq!(ns.working_bits, 0xA0);

        let mut value = 0xABu8;
        ns.serialize_byte_bits(&mut value, bits).unwrap();
        assert_eq!(value, 0xAB);
        assert_eq!(ns.bit_buffer.as_ref(), expected_bit_buffer.as_slice());
        assert_eq!(ns.working_bits, expected_working);
        assert_eq!(ns.working_bit_length(), expected_len);
        assert!(ns.byte_buffer.is_empty());
    }

    #[test]
    fn test_write_bits_full_width_goes_to_byte_buffer() {
        let mut ns = NetStream::writer();
        ns.serialize_byte_bits(&mut 0xAA, 4).unwrap();
        ns.serialize_byte_bits(&mut 0xAB, 8).unwrap();

        assert_eq!(ns.byte_buffer.as_ref(), &[0xAB]);
        assert!(ns.bit_buffer.is_empty());
        assert_eq!(ns.working_bits, 0xA0);
        assert_eq!(ns.working_bit_length(), 4);
    }

    #[test]
    fn test_write_zero_bits_is_noop() {
        let mut ns = NetStream::writer();
        ns.serialize_byte_bits(&mut 0xFF, 0).unwrap();
        assert_eq!(ns.working_bit_length(), 0);
        assert_eq!(ns.close(), Some(vec![0, 0, 0, 0]));
    }

    #[test]
    fn test_read_bits_simple() {
        let mut ns = NetStream::writer();
        ns.serialize_byte_bits(&mut 0xA, 4).unwrap();
        ns.serialize_byte_bits(&mut 0xD, 4).unwrap();
        let data = ns.close().unwrap();
        assert_eq!(data, vec![0, 0, 0, 1, 0xAD]);

        let mut ns = NetStream::reader(&data).unwrap();
        let mut value = 0u8;
        ns.serialize_byte_bits(&mut value, 4).unwrap();
        assert_eq!(value, 0xA);
        assert_eq!(ns.working_bit_length(), 4);

        ns.serialize_byte_bits(&mut value, 4).unwrap();
        assert_eq!(value, 0xD);
        assert_eq!(ns.working_bit_length(), 0);
        assert_eq!(ns.close(), None);
    }

    #[test]
    fn test_read_bits_overflow() {
        let mut ns = NetStream::writer();
        ns.serialize_byte_bits(&mut 0xA, 4).unwrap();
        ns.serialize_byte_bits(&mut 0x27, 6).unwrap();
        let data = ns.close().unwrap();
        assert_eq!(data, vec![0, 0, 0, 2, 0xA9, 0xC0]);

        let mut ns = NetStream::reader(&data).unwrap();
        let mut value = 0u8;
        ns.serialize_byte_bits(&mut value, 4).unwrap();
        assert_eq!(value, 0xA);
        ns.serialize_byte_bits(&mut value, 6).unwrap();
        assert_eq!(value, 0x27);
        assert_eq!(ns.working_bit_length(), 2);
    }

    #[test]
    fn test_bits_round_trip_all_values() {
        let mut ns = NetStream::writer();
        for bits in 1..=8u32 {
            for v in 0..=255u8 {
                let mut value = v;
                ns.serialize_byte_bits(&mut value, bits).unwrap();
            }
        }
        let data = ns.close().unwrap();

        let mut ns = NetStream::reader(&data).unwrap();
        for bits in 1..=8u32 {
            for v in 0..=255u8 {
                let mut value = 0u8;
                ns.serialize_byte_bits(&mut value, bits).unwrap();
                assert_eq!(value, v & BIT_MASK[bits as usize], "{} bits of {:#x}", bits, v);
            }
        }
        // 1..=7 bits times 256 values is a whole number of bytes, so nothing is left over
        assert_eq!(ns.working_bit_length(), 0);
        assert_eq!(ns.bit_read_cursor, ns.bit_buffer.len());
        assert_eq!(ns.byte_read_cursor, ns.byte_buffer.len());
    }

    #[test]
    fn test_bools() {
        let pattern = [true, false, true, true, false, false, true, false, true, true];

        let mut ns = NetStream::writer();
        for b in pattern {
            let mut b = b;
            ns.serialize_bit(&mut b).unwrap();
        }
        assert_eq!(ns.count(), HEADER_SIZE + 2);
        let data = ns.close().unwrap();
        assert_eq!(data, vec![0, 0, 0, 2, 0b1011_0010, 0b1100_0000]);

        let mut ns = NetStream::reader(&data).unwrap();
        for expected in pattern {
            let mut b = !expected;
            ns.serialize_bit(&mut b).unwrap();
            assert_eq!(b, expected);
        }
    }

    #[test]
    fn test_exact_buffer_size() {
        let mut ns = NetStream::writer();
        ns.serialize_le(&mut 0xF33DB4DDu32).unwrap();
        ns.serialize_le(&mut 0xF33DB4DDAE66014Cu64).unwrap();
        let data = ns.close().unwrap();
        assert_eq!(data.len(), HEADER_SIZE + 12);

        let mut ns = NetStream::reader(&data).unwrap();
        let mut a = 0u32;
        let mut b = 0u64;
        ns.serialize_le(&mut a).unwrap();
        ns.serialize_le(&mut b).unwrap();
        assert_eq!(a, 0xF33DB4DD);
        assert_eq!(b, 0xF33DB4DDAE66014C);
    }

    #[test]
    fn test_read_past_end() {
        let mut ns = NetStream::writer();
        ns.serialize_le(&mut 7u16).unwrap();
        let data = ns.close().unwrap();

        let mut ns = NetStream::reader(&data).unwrap();
        let mut value = 0u32;
        assert_eq!(ns.serialize_le(&mut value), Err(StreamError::ReadPastEnd { requested: 4, remaining: 2 }));
    }

    #[test]
    fn test_read_past_bit_buffer() {
        let mut ns = NetStream::writer();
        ns.serialize_byte_bits(&mut 3, 2).unwrap();
        let data = ns.close().unwrap();

        let mut ns = NetStream::reader(&data).unwrap();
        let mut value = 0u8;
        ns.serialize_byte_bits(&mut value, 7).unwrap();
        assert_eq!(value, 0x60);
        assert_eq!(ns.serialize_byte_bits(&mut value, 2), Err(StreamError::BitBufferExhausted));
    }

    #[rstest]
    #[case::empty(vec![], StreamError::TruncatedEnvelope { len: 0 })]
    #[case::short(vec![0, 0, 0], StreamError::TruncatedEnvelope { len: 3 })]
    #[case::bit_overrun(vec![0, 0, 0, 3, 1, 2], StreamError::BitBufferOverrun { bit_buffer_len: 3, available: 2 })]
    fn test_malformed_envelope(#[case] data: Vec<u8>, #[case] expected: StreamError) {
        assert_eq!(NetStream::reader(&data).err(), Some(expected));
    }

    #[test]
    fn test_closed_stream() {
        let mut ns = NetStream::new();
        assert_eq!(ns.mode(), StreamMode::Closed);
        assert_eq!(ns.serialize_le(&mut 1u32), Err(StreamError::Closed));
        assert_eq!(ns.serialize_byte_bits(&mut 1, 3), Err(StreamError::Closed));
        assert_eq!(ns.close(), None);
        assert_eq!(ns.count(), 0);
    }

    #[test]
    fn test_count_is_exact() {
        let mut ns = NetStream::writer();
        assert_eq!(ns.count(), HEADER_SIZE);
        ns.serialize_le(&mut 1u32).unwrap();
        assert_eq!(ns.count(), HEADER_SIZE + 4);
        ns.serialize_byte_bits(&mut 1, 3).unwrap();
        assert_eq!(ns.count(), HEADER_SIZE + 5);
        ns.serialize_byte_bits(&mut 1, 5).unwrap();
        assert_eq!(ns.count(), HEADER_SIZE + 5);
        ns.serialize_byte_bits(&mut 1, 1).unwrap();
        assert_eq!(ns.count(), HEADER_SIZE + 6);

        let count = ns.count();
        assert_eq!(ns.close().unwrap().len(), count);
    }

    #[test]
    fn test_reopen_resets_state() {
        let mut ns = NetStream::new();

        let mut results = Vec::new();
        for _ in 0..3 {
            ns.open(None).unwrap();
            ns.serialize_le(&mut 0x1234u16).unwrap();
            ns.serialize_byte_bits(&mut 0x5, 3).unwrap();
            results.push(ns.close().unwrap());
        }
        assert!(results.iter().all(|r| r == &results[0]));

        let mut fresh = NetStream::writer();
        fresh.serialize_le(&mut 0x1234u16).unwrap();
        fresh.serialize_byte_bits(&mut 0x5, 3).unwrap();
        assert_eq!(fresh.close().unwrap(), results[0]);

        // a read that was abandoned halfway does not leak into the next cycle
        ns.open(Some(&results[0])).unwrap();
        let mut partial = 0u8;
        ns.serialize_byte(&mut partial).unwrap();
        ns.open(Some(&results[0])).unwrap();
        let mut value = 0u16;
        let mut bits = 0u8;
        ns.serialize_le(&mut value).unwrap();
        ns.serialize_byte_bits(&mut bits, 3).unwrap();
        assert_eq!(value, 0x1234);
        assert_eq!(bits, 0x5);
    }

    #[test]
    fn test_blob() {
        let mut ns = NetStream::writer();
        let mut blob = vec![1u8, 2, 3];
        ns.serialize_blob(&mut blob).unwrap();
        let data = ns.close().unwrap();
        assert_eq!(data, vec![0, 0, 0, 0, 3, 0, 0, 0, 1, 2, 3]);

        let mut ns = NetStream::reader(&data).unwrap();
        let mut read = vec![9u8; 10];
        ns.serialize_blob(&mut read).unwrap();
        assert_eq!(read, blob);
    }

    #[test]
    fn test_blob_length_past_end() {
        let data = vec![0, 0, 0, 0, 200, 0, 0, 0, 1, 2, 3];
        let mut ns = NetStream::reader(&data).unwrap();
        let mut read = Vec::new();
        assert_eq!(ns.serialize_blob(&mut read), Err(StreamError::ReadPastEnd { requested: 200, remaining: 3 }));
    }
}
