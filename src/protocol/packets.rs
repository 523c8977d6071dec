use num_enum::TryFromPrimitive;
use thiserror::Error;

use crate::connection::ConnectionUid;
use crate::protocol::crc::{sign_packet, verify_packet, Crc32};
use crate::protocol::{Protocol, ProtocolFlags};
use crate::stream::{NetSerialize, NetStream, StreamError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet of {0} bytes is too short for a packet header")]
    TooShort(usize),
    #[error("CRC32 mismatch: stamped {stamped:?}, computed {computed:?}")]
    Crc32Mismatch { stamped: Crc32, computed: Crc32 },
    #[error("unknown protocol {0}")]
    UnknownProtocol(u8),
    #[error("expected a {expected:?} packet, got {actual:?}")]
    ProtocolMismatch { expected: Protocol, actual: Protocol },
    #[error("malformed packet: {0}")]
    Stream(#[from] StreamError),
}

/// The fixed header shared by all packet kinds:
///
/// ```ascii
/// [protocol: u8][flags: u8][crc32: u32 LE][uid: u32 LE][payload...]
/// ```
///
/// The UID identifies a single packet for acknowledgement. It is assigned by the sender, and it
///  has nothing to do with the connection UID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub protocol: Protocol,
    pub flags: ProtocolFlags,
    pub crc32: Crc32,
    pub uid: u32,
}

impl PacketHeader {
    pub fn new(protocol: Protocol, flags: ProtocolFlags, uid: u32) -> PacketHeader {
        PacketHeader {
            protocol,
            flags,
            crc32: Crc32::default(),
            uid,
        }
    }

    pub fn is_reliable(&self) -> bool {
        self.flags.contains(ProtocolFlags::RELIABLE)
    }

    fn net_serialize(&mut self, ns: &mut NetStream) -> Result<(), PacketError> {
        let mut protocol: u8 = self.protocol.into();
        let mut flags = self.flags.bits();
        ns.serialize(&mut protocol)?;
        ns.serialize(&mut flags)?;
        ns.serialize(&mut self.crc32.0)?;
        ns.serialize(&mut self.uid)?;

        if ns.is_reading() {
            self.protocol = Protocol::try_from_primitive(protocol)
                .map_err(|_| PacketError::UnknownProtocol(protocol))?;
            self.flags = ProtocolFlags::from_bits_retain(flags);
        }
        Ok(())
    }
}

/// Common behavior of all packet kinds: a header followed by a payload that is serialized through
///  a [NetStream], with the packet signed by a CRC32.
pub trait ProtocolPacket: Sized {
    const PROTOCOL: Protocol;

    fn header(&self) -> &PacketHeader;
    fn header_mut(&mut self) -> &mut PacketHeader;

    /// an empty packet that `read` deserializes into
    fn empty() -> Self;

    fn serialize_payload(&mut self, ns: &mut NetStream) -> Result<(), StreamError>;

    /// Serializes the packet, stamping its CRC32 both into the returned bytes and into the header
    fn write(&mut self) -> Result<Vec<u8>, PacketError> {
        let mut ns = NetStream::writer();
        self.header_mut().net_serialize(&mut ns)?;
        self.serialize_payload(&mut ns)?;
        let mut data = ns.close().unwrap_or_default();

        self.header_mut().crc32 = sign_packet(&mut data)?;
        Ok(data)
    }

    /// Verifies the CRC32 before parsing anything, so a corrupt packet is rejected as a whole
    fn read(data: &[u8]) -> Result<Self, PacketError> {
        verify_packet(data)?;

        let mut packet = Self::empty();
        let mut ns = NetStream::reader(data)?;
        packet.header_mut().net_serialize(&mut ns)?;
        let actual = packet.header().protocol;
        if actual != Self::PROTOCOL {
            return Err(PacketError::ProtocolMismatch { expected: Self::PROTOCOL, actual });
        }
        packet.serialize_payload(&mut ns)?;
        ns.close();
        Ok(packet)
    }
}

macro_rules! packet_header_accessors {
    () => {
        fn header(&self) -> &PacketHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut PacketHeader {
            &mut self.header
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub header: PacketHeader,
    pub identifier: String,
}
impl ConnectPacket {
    pub fn new(flags: ProtocolFlags, uid: u32, identifier: impl Into<String>) -> ConnectPacket {
        ConnectPacket {
            header: PacketHeader::new(Self::PROTOCOL, flags, uid),
            identifier: identifier.into(),
        }
    }
}
impl ProtocolPacket for ConnectPacket {
    const PROTOCOL: Protocol = Protocol::Connect;
    packet_header_accessors!();

    fn empty() -> Self {
        ConnectPacket::new(ProtocolFlags::empty(), 0, "")
    }

    fn serialize_payload(&mut self, ns: &mut NetStream) -> Result<(), StreamError> {
        ns.serialize(&mut self.identifier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectPacket {
    pub header: PacketHeader,
    pub connection_uid: ConnectionUid,
}
impl DisconnectPacket {
    pub fn new(flags: ProtocolFlags, uid: u32, connection_uid: ConnectionUid) -> DisconnectPacket {
        DisconnectPacket {
            header: PacketHeader::new(Self::PROTOCOL, flags, uid),
            connection_uid,
        }
    }
}
impl ProtocolPacket for DisconnectPacket {
    const PROTOCOL: Protocol = Protocol::Disconnect;
    packet_header_accessors!();

    fn empty() -> Self {
        DisconnectPacket::new(ProtocolFlags::empty(), 0, ConnectionUid::ZERO)
    }

    fn serialize_payload(&mut self, ns: &mut NetStream) -> Result<(), StreamError> {
        ns.serialize(&mut self.connection_uid)
    }
}

/// A method call on a replicated object. The payload is opaque here, it is interpreted by the
///  method's registered invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMethodPacket {
    pub header: PacketHeader,
    pub object_id: u32,
    pub method_id: u32,
    pub data: Vec<u8>,
}
impl RemoteMethodPacket {
    pub fn new(flags: ProtocolFlags, uid: u32, object_id: u32, method_id: u32, data: Vec<u8>) -> RemoteMethodPacket {
        RemoteMethodPacket {
            header: PacketHeader::new(Self::PROTOCOL, flags, uid),
            object_id,
            method_id,
            data,
        }
    }
}
impl ProtocolPacket for RemoteMethodPacket {
    const PROTOCOL: Protocol = Protocol::RemoteMethod;
    packet_header_accessors!();

    fn empty() -> Self {
        RemoteMethodPacket::new(ProtocolFlags::empty(), 0, 0, 0, Vec::new())
    }

    fn serialize_payload(&mut self, ns: &mut NetStream) -> Result<(), StreamError> {
        ns.serialize(&mut self.object_id)?;
        ns.serialize(&mut self.method_id)?;
        ns.serialize(&mut self.data)
    }
}

/// Acknowledges the packet with the same UID. `data` carries protocol specific reply data, e.g.
///  a serialized [ConnectAckPacket] in reply to a connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcknowledgePacket {
    pub header: PacketHeader,
    pub data: Vec<u8>,
}
impl AcknowledgePacket {
    pub fn new(uid: u32, data: Vec<u8>) -> AcknowledgePacket {
        AcknowledgePacket {
            header: PacketHeader::new(Self::PROTOCOL, ProtocolFlags::empty(), uid),
            data,
        }
    }
}
impl ProtocolPacket for AcknowledgePacket {
    const PROTOCOL: Protocol = Protocol::Acknowledgement;
    packet_header_accessors!();

    fn empty() -> Self {
        AcknowledgePacket::new(0, Vec::new())
    }

    fn serialize_payload(&mut self, ns: &mut NetStream) -> Result<(), StreamError> {
        ns.serialize(&mut self.data)
    }
}

/// Header only, it keeps a connection alive on the server side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatPacket {
    pub header: PacketHeader,
}
impl HeartbeatPacket {
    pub fn new(uid: u32) -> HeartbeatPacket {
        HeartbeatPacket {
            header: PacketHeader::new(Self::PROTOCOL, ProtocolFlags::empty(), uid),
        }
    }
}
impl ProtocolPacket for HeartbeatPacket {
    const PROTOCOL: Protocol = Protocol::None;
    packet_header_accessors!();

    fn empty() -> Self {
        HeartbeatPacket::new(0)
    }

    fn serialize_payload(&mut self, _ns: &mut NetStream) -> Result<(), StreamError> {
        Ok(())
    }
}

/// The server's reply to a connect, carried in the acknowledgement's data rather than sent on its
///  own. It has no header and no checksum of its own, the enclosing acknowledgement is signed.
///
/// An all-zero connection UID means the server rejected the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectAckPacket {
    pub connection_uid: ConnectionUid,
}
impl ConnectAckPacket {
    pub fn new(connection_uid: ConnectionUid) -> ConnectAckPacket {
        ConnectAckPacket { connection_uid }
    }

    pub fn is_rejection(&self) -> bool {
        self.connection_uid.is_zero()
    }

    /// The payload of the acknowledgement for a connect. It is a bare stream without a packet
    ///  header of its own.
    pub fn write(&mut self) -> Result<Vec<u8>, PacketError> {
        let mut ns = NetStream::writer();
        ns.serialize(self)?;
        Ok(ns.close().unwrap_or_default())
    }

    pub fn read(data: &[u8]) -> Result<ConnectAckPacket, PacketError> {
        let mut ns = NetStream::reader(data)?;
        let mut packet = ConnectAckPacket::new(ConnectionUid::ZERO);
        ns.serialize(&mut packet)?;
        ns.close();
        Ok(packet)
    }
}

impl NetSerialize for ConnectAckPacket {
    fn net_serialize(&mut self, ns: &mut NetStream) -> Result<(), StreamError> {
        ns.serialize(&mut self.connection_uid)
    }
}
