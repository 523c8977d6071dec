pub mod crc;
pub mod packets;

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::stream::{NetStream, HEADER_SIZE};

/// A packet's purpose, which determines how it is routed on the receiving side. This is the first
///  byte of every packet (after the stream envelope's header).
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum Protocol {
    /// heartbeats and other packets that carry no routable payload
    None = 0,
    FileTransfer = 1,
    WebRequest = 2,
    RemoteMethod = 3,
    Replication = 4,
    /// sent by a client or server to itself to unblock its own receive loop when closing
    Shutdown = 5,
    Connect = 6,
    Disconnect = 7,
    Acknowledgement = 8,
}

impl Protocol {
    pub const COUNT: usize = 9;

    /// Reads the protocol tag of a raw packet without parsing or verifying anything else
    pub fn peek(data: &[u8]) -> Option<Protocol> {
        if data.len() <= OFFSET_PROTOCOL {
            return None;
        }
        Protocol::try_from_primitive(data[OFFSET_PROTOCOL]).ok()
    }

    pub fn index(self) -> usize {
        u8::from(self) as usize
    }
}

bitflags! {
    #[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
    pub struct ProtocolFlags: u8 {
        /// the receiver must acknowledge the packet
        const RELIABLE = 0b0000_0001;
        const ORDERED  = 0b0000_0010;
    }
}

/// How a client or server closes its connection(s)
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ShutdownType {
    /// notify the peer and block until it acknowledged
    NotifyAndWait,
    /// notify the peer without waiting for a reply
    Notify,
    /// close without notifying anybody
    Immediate,
}

// Offsets of the fixed packet header fields, relative to the start of a packet's datagram. The
//  header itself starts after the stream envelope's length prefix.
pub const OFFSET_PROTOCOL: usize = HEADER_SIZE;
pub const OFFSET_FLAGS: usize = HEADER_SIZE + 1;
pub const OFFSET_CRC32: usize = HEADER_SIZE + 2;
pub const OFFSET_UID: usize = HEADER_SIZE + 6;

/// The CRC32 covers everything from the packet UID to the end of the datagram
pub const CRC32_DOMAIN_START: usize = OFFSET_UID;

/// A shutdown message is not a regular packet: it consists of nothing but the protocol tag, and it
///  is not signed.
pub fn shutdown_message() -> Vec<u8> {
    let mut ns = NetStream::writer();
    let mut protocol: u8 = Protocol::Shutdown.into();
    // writing to a freshly opened stream does not fail
    let _ = ns.serialize(&mut protocol);
    ns.close().unwrap_or_default()
}
