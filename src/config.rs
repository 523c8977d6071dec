use anyhow::bail;

use crate::protocol::OFFSET_UID;
use crate::transport::udp::MAX_UDP_PAYLOAD;

pub struct NetConfig {
    /// The server rejects connects beyond this number of connections. Connection lookups are
    ///  linear scans, so this is meant to be in the order of a hundred rather than thousands.
    pub max_connections: usize,

    /// Packets longer than this are rejected when sending. Receiving always accepts the full UDP
    ///  payload, so peers with different limits still understand each other.
    ///
    /// With full Ethernet frames and no optional IP headers, the UDP payload is
    ///  `1500 - 20 - 8 = 1472` for IPV4.
    pub max_datagram_size: usize,
}

impl Default for NetConfig {
    fn default() -> Self {
        NetConfig::default_ipv4()
    }
}

impl NetConfig {
    pub fn default_ipv4() -> NetConfig {
        NetConfig {
            max_connections: 100,
            max_datagram_size: 1472,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_connections == 0 {
            bail!("max_connections must be positive");
        }
        // header plus UID
        if self.max_datagram_size < OFFSET_UID + size_of::<u32>() {
            bail!("max_datagram_size {} is too small to hold a packet header", self.max_datagram_size);
        }
        if self.max_datagram_size > MAX_UDP_PAYLOAD {
            bail!("max_datagram_size {} exceeds the UDP payload limit of {}", self.max_datagram_size, MAX_UDP_PAYLOAD);
        }
        Ok(())
    }

    pub fn check_datagram_size(&self, len: usize) -> anyhow::Result<()> {
        if len > self.max_datagram_size {
            bail!("datagram of {} bytes exceeds max_datagram_size {}", len, self.max_datagram_size);
        }
        Ok(())
    }
}
