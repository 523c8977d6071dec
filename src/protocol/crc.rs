use std::fmt::{Debug, Formatter};

use crc::Crc;

use crate::protocol::packets::PacketError;
use crate::protocol::{CRC32_DOMAIN_START, OFFSET_CRC32};

const CRC32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// Checksum of a packet's datagram from its UID to the end, stored little endian in the packet
///  header.
#[derive(Clone, Copy, Eq, PartialEq, Default)]
pub struct Crc32(pub u32);
impl Debug for Crc32 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x?}", self.0)
    }
}

impl Crc32 {
    pub fn of_packet(data: &[u8]) -> Result<Crc32, PacketError> {
        if data.len() < CRC32_DOMAIN_START {
            return Err(PacketError::TooShort(data.len()));
        }
        Ok(Crc32(CRC32.checksum(&data[CRC32_DOMAIN_START..])))
    }

    pub fn stamped(data: &[u8]) -> Result<Crc32, PacketError> {
        if data.len() < CRC32_DOMAIN_START {
            return Err(PacketError::TooShort(data.len()));
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&data[OFFSET_CRC32..CRC32_DOMAIN_START]);
        Ok(Crc32(u32::from_le_bytes(raw)))
    }
}

/// Computes the checksum of a fully written packet and stamps it into the header's CRC32 slot
pub fn sign_packet(data: &mut [u8]) -> Result<Crc32, PacketError> {
    let crc = Crc32::of_packet(data)?;
    data[OFFSET_CRC32..CRC32_DOMAIN_START].copy_from_slice(&crc.0.to_le_bytes());
    Ok(crc)
}

pub fn verify_packet(data: &[u8]) -> Result<(), PacketError> {
    let computed = Crc32::of_packet(data)?;
    let stamped = Crc32::stamped(data)?;
    if computed != stamped {
        return Err(PacketError::Crc32Mismatch { stamped, computed });
    }
    Ok(())
}
